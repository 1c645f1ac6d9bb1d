use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::reports::{CommunityReport, ReportKind, ReportSink};
use super::score::RiskStatus;

/// WGS84 coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// Identifier of one grid cell of the risk surface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ZoneId(pub String);

/// Rectangular query window for the safety map.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lng: f64,
    pub max_lat: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    fn contains(&self, point: GeoPoint) -> bool {
        (self.min_lat..=self.max_lat).contains(&point.lat)
            && (self.min_lng..=self.max_lng).contains(&point.lng)
    }
}

/// A geographic bucket with an aggregated, time-decayed risk score. Created
/// on the first report resolving into it; never deleted, it only decays back
/// toward safe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Zone {
    pub id: ZoneId,
    pub name: String,
    pub centroid: GeoPoint,
    pub risk_score: f64,
    pub status: RiskStatus,
    pub report_count: usize,
    pub last_recomputed_at: DateTime<Utc>,
}

/// Decay and threshold knobs for the risk surface.
#[derive(Debug, Clone)]
pub struct ZoneConfig {
    /// Days after which a report's contribution halves.
    pub half_life_days: f64,
    /// Below this score a zone is safe (T1).
    pub safe_below: f64,
    /// Above this score a zone is danger (T2); between is caution.
    pub danger_above: f64,
    /// Grid cell edge in degrees (0.01 is roughly a city block cluster).
    pub cell_size_deg: f64,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            half_life_days: 30.0,
            safe_below: 0.5,
            danger_above: 2.0,
            cell_size_deg: 0.01,
        }
    }
}

impl ZoneConfig {
    /// How loudly one report of this kind weighs before decay.
    pub fn type_weight(&self, kind: ReportKind) -> f64 {
        match kind {
            ReportKind::FakeListing => 3.0,
            ReportKind::FakeOwner => 2.5,
            ReportKind::AdvancePayment => 2.0,
            ReportKind::WrongAddress => 1.0,
        }
    }
}

struct Contribution {
    kind: ReportKind,
    created_at: DateTime<Utc>,
}

struct ZoneRecord {
    name: String,
    centroid: GeoPoint,
    contributions: Vec<Contribution>,
    risk_score: f64,
    status: RiskStatus,
    last_recomputed_at: DateTime<Utc>,
}

/// Converts accepted reports into a decayed, geography-bucketed risk surface.
/// Recomputes a zone when a report lands in it, on read, and on the periodic
/// sweep, so zones drift back to safe without new reports.
pub struct ZoneRiskAggregator {
    config: ZoneConfig,
    inner: Mutex<HashMap<ZoneId, ZoneRecord>>,
}

impl ZoneRiskAggregator {
    pub fn new(config: ZoneConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Fold one located report into its zone.
    pub fn record(
        &self,
        kind: ReportKind,
        point: GeoPoint,
        name_hint: &str,
        created_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        let (id, centroid) = self.cell_for(point);
        let mut zones = self.inner.lock().expect("zone mutex poisoned");
        let record = zones.entry(id.clone()).or_insert_with(|| ZoneRecord {
            name: if name_hint.trim().is_empty() {
                format!("({:.4}, {:.4})", centroid.lat, centroid.lng)
            } else {
                name_hint.trim().to_string()
            },
            centroid,
            contributions: Vec::new(),
            risk_score: 0.0,
            status: RiskStatus::Safe,
            last_recomputed_at: now,
        });
        record.contributions.push(Contribution { kind, created_at });
        self.recompute_record(record, now);
        debug!(zone = %id.0, score = record.risk_score, "zone recomputed on report arrival");
    }

    /// Recompute every zone; the periodic sweep calls this so scores decay
    /// even without traffic.
    pub fn sweep(&self, now: DateTime<Utc>) {
        let mut zones = self.inner.lock().expect("zone mutex poisoned");
        for record in zones.values_mut() {
            self.recompute_record(record, now);
        }
    }

    /// Zones whose centroid falls inside the window, freshly recomputed.
    pub fn zones_in(&self, bbox: BoundingBox, now: DateTime<Utc>) -> Vec<Zone> {
        let mut zones = self.inner.lock().expect("zone mutex poisoned");
        let mut matched: Vec<Zone> = zones
            .iter_mut()
            .filter(|(_, record)| bbox.contains(record.centroid))
            .map(|(id, record)| {
                self.recompute_record(record, now);
                snapshot(id, record)
            })
            .collect();
        matched.sort_by(|a, b| {
            b.risk_score
                .partial_cmp(&a.risk_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matched
    }

    pub fn get(&self, id: &ZoneId, now: DateTime<Utc>) -> Option<Zone> {
        let mut zones = self.inner.lock().expect("zone mutex poisoned");
        zones.get_mut(id).map(|record| {
            self.recompute_record(record, now);
            snapshot(id, record)
        })
    }

    fn cell_for(&self, point: GeoPoint) -> (ZoneId, GeoPoint) {
        let cell = self.config.cell_size_deg;
        let lat_idx = (point.lat / cell).floor() as i64;
        let lng_idx = (point.lng / cell).floor() as i64;
        let centroid = GeoPoint {
            lat: (lat_idx as f64 + 0.5) * cell,
            lng: (lng_idx as f64 + 0.5) * cell,
        };
        (ZoneId(format!("z{lat_idx}:{lng_idx}")), centroid)
    }

    fn recompute_record(&self, record: &mut ZoneRecord, now: DateTime<Utc>) {
        let half_life = self.config.half_life_days.max(f64::MIN_POSITIVE);
        record.risk_score = record
            .contributions
            .iter()
            .map(|c| {
                let age_days = (now - c.created_at).num_seconds().max(0) as f64 / 86_400.0;
                self.config.type_weight(c.kind)
                    * (-std::f64::consts::LN_2 * age_days / half_life).exp()
            })
            .sum();
        record.status = if record.risk_score < self.config.safe_below {
            RiskStatus::Safe
        } else if record.risk_score > self.config.danger_above {
            RiskStatus::Danger
        } else {
            RiskStatus::Caution
        };
        record.last_recomputed_at = now;
    }
}

impl ReportSink for ZoneRiskAggregator {
    fn accepted(&self, report: &CommunityReport) {
        // Reports without resolved coordinates never reach the surface.
        if let Some(point) = report.location.coords {
            self.record(
                report.kind,
                point,
                &report.location.raw,
                report.created_at,
                Utc::now(),
            );
        }
    }
}

fn snapshot(id: &ZoneId, record: &ZoneRecord) -> Zone {
    Zone {
        id: id.clone(),
        name: record.name.clone(),
        centroid: record.centroid,
        risk_score: record.risk_score,
        status: record.status,
        report_count: record.contributions.len(),
        last_recomputed_at: record.last_recomputed_at,
    }
}
