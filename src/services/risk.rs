// Context-aware risk scoring
// Each request is scored 0-100 as the capped sum of weighted indicators
// evaluated against session, device, geo, and velocity state. Scoring has
// required side effects: it records new locations, refreshes the last-known
// location, bumps the per-user velocity counter, and appends to the risk
// history. All side effects are safe to repeat on retry.

use chrono::{DateTime, NaiveTime, Utc};
use ipnetwork::IpNetwork;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::db::{KvError, KvStore};
use crate::models::context::{GeoLocation, RequestContext};
use crate::utils::clock::Clock;

pub const UNKNOWN_DEVICE: &str = "unknown_device";
pub const UNKNOWN_LOCATION: &str = "unknown_location";
pub const UNUSUAL_TIME: &str = "unusual_time";
pub const HIGH_TRANSACTION_AMOUNT: &str = "high_transaction_amount";
pub const MULTIPLE_FAILED_ATTEMPTS: &str = "multiple_failed_attempts";
pub const GEO_MISMATCH: &str = "geo_mismatch";
pub const TOR_OR_VPN: &str = "tor_or_vpn";
pub const RAPID_REQUESTS: &str = "rapid_requests";
pub const DEVICE_CHANGE: &str = "device_change";

const HIGH_AMOUNT_THRESHOLD: f64 = 10_000.0;
const FAILED_ATTEMPTS_THRESHOLD: i64 = 3;
const VELOCITY_THRESHOLD: i64 = 30;
const VELOCITY_WINDOW: Duration = Duration::from_secs(60);
const LAST_LOCATION_TTL: Duration = Duration::from_secs(3600);
const GEO_MISMATCH_WINDOW_HOURS: i64 = 6;
const HISTORY_LIMIT: isize = 100;
const HISTORY_TTL: Duration = Duration::from_secs(30 * 86_400);

static DEFAULT_WEIGHTS: Lazy<BTreeMap<&'static str, u32>> = Lazy::new(|| {
    BTreeMap::from([
        (UNKNOWN_DEVICE, 30),
        (UNKNOWN_LOCATION, 20),
        (UNUSUAL_TIME, 15),
        (HIGH_TRANSACTION_AMOUNT, 25),
        (MULTIPLE_FAILED_ATTEMPTS, 40),
        (GEO_MISMATCH, 35),
        (TOR_OR_VPN, 50),
        (RAPID_REQUESTS, 25),
        (DEVICE_CHANGE, 20),
    ])
});

/// Pluggable peer-address reputation check.
pub trait ThreatIntel: Send + Sync {
    fn is_flagged(&self, ip_address: &str) -> bool;
}

/// Threat intel backed by a static CIDR list (Tor exits, datacenter ranges).
#[derive(Default)]
pub struct CidrThreatIntel {
    networks: Vec<IpNetwork>,
}

impl CidrThreatIntel {
    pub fn new(networks: Vec<IpNetwork>) -> Self {
        Self { networks }
    }

    pub fn from_cidrs(cidrs: &[&str]) -> Result<Self, ipnetwork::IpNetworkError> {
        let networks = cidrs
            .iter()
            .map(|cidr| IpNetwork::from_str(cidr))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(networks))
    }
}

impl ThreatIntel for CidrThreatIntel {
    fn is_flagged(&self, ip_address: &str) -> bool {
        match IpAddr::from_str(ip_address) {
            Ok(ip) => self.networks.iter().any(|network| network.contains(ip)),
            Err(_) => false,
        }
    }
}

/// One scored request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub score: u8,
    pub factors: Vec<String>,
    pub assessed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LastLocation {
    location: GeoLocation,
    timestamp: DateTime<Utc>,
}

pub struct RiskAnalyzer {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    weights: BTreeMap<String, u32>,
    threat_intel: Arc<dyn ThreatIntel>,
}

impl RiskAnalyzer {
    pub fn new(kv: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        let weights = DEFAULT_WEIGHTS
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();

        Self {
            kv,
            clock,
            weights,
            threat_intel: Arc::new(CidrThreatIntel::default()),
        }
    }

    /// Override indicator weights from the policy document. Unlisted
    /// indicators keep their defaults.
    pub fn with_weights(mut self, overrides: &BTreeMap<String, u32>) -> Self {
        for (indicator, weight) in overrides {
            self.weights.insert(indicator.clone(), *weight);
        }
        self
    }

    pub fn with_threat_intel(mut self, threat_intel: Arc<dyn ThreatIntel>) -> Self {
        self.threat_intel = threat_intel;
        self
    }

    fn weight(&self, indicator: &str) -> u32 {
        self.weights.get(indicator).copied().unwrap_or(0)
    }

    /// Score a request. Side effects on state are applied even when the
    /// resulting score is zero.
    pub async fn assess(&self, context: &RequestContext) -> Result<RiskAssessment, KvError> {
        let mut score: u32 = 0;
        let mut factors: Vec<String> = Vec::new();
        let mut flag = |name: &str, weight: u32| {
            score += weight;
            factors.push(name.to_string());
        };

        if !context.device_trusted {
            flag(UNKNOWN_DEVICE, self.weight(UNKNOWN_DEVICE));
        }

        if self.is_unknown_location(context).await? {
            flag(UNKNOWN_LOCATION, self.weight(UNKNOWN_LOCATION));
        }

        if self.is_unusual_time() {
            flag(UNUSUAL_TIME, self.weight(UNUSUAL_TIME));
        }

        if context
            .transaction_amount
            .map(|amount| amount > HIGH_AMOUNT_THRESHOLD)
            .unwrap_or(false)
        {
            flag(
                HIGH_TRANSACTION_AMOUNT,
                self.weight(HIGH_TRANSACTION_AMOUNT),
            );
        }

        if let Some(user_id) = &context.user_id {
            if self.has_recent_failed_attempts(user_id).await? {
                flag(
                    MULTIPLE_FAILED_ATTEMPTS,
                    self.weight(MULTIPLE_FAILED_ATTEMPTS),
                );
            }
        }

        if self.detect_geo_mismatch(context).await? {
            flag(GEO_MISMATCH, self.weight(GEO_MISMATCH));
        }

        if let Some(ip) = &context.ip_address {
            if self.threat_intel.is_flagged(ip) {
                flag(TOR_OR_VPN, self.weight(TOR_OR_VPN));
            }
        }

        if let Some(user_id) = &context.user_id {
            if self.detect_rapid_requests(user_id).await? {
                flag(RAPID_REQUESTS, self.weight(RAPID_REQUESTS));
            }
        }

        if self.detect_device_change(context).await? {
            flag(DEVICE_CHANGE, self.weight(DEVICE_CHANGE));
        }

        let assessment = RiskAssessment {
            score: score.min(100) as u8,
            factors,
            assessed_at: self.clock.now(),
        };

        info!(
            "Risk assessment - Score: {}, Factors: {}",
            assessment.score,
            if assessment.factors.is_empty() {
                "none".to_string()
            } else {
                assessment.factors.join(", ")
            }
        );

        if let Some(user_id) = &context.user_id {
            self.store_assessment(user_id, &assessment).await?;
        }

        Ok(assessment)
    }

    /// Unknown location check. The first sighting of any location is both
    /// recorded and flagged.
    async fn is_unknown_location(&self, context: &RequestContext) -> Result<bool, KvError> {
        let (user_id, location) = match (&context.user_id, &context.location) {
            (Some(user_id), Some(location)) => (user_id, location),
            _ => return Ok(false),
        };

        let key = format!("user_locations/{}", user_id);
        let member = location.as_member();
        let known = self.kv.smembers(&key).await?;

        if known.iter().any(|m| m == &member) {
            return Ok(false);
        }

        // Record it so it stops being novel, but flag this request.
        self.kv.sadd(&key, &member).await?;
        Ok(true)
    }

    /// Off-hours window: 01:00 through 06:00 UTC inclusive.
    fn is_unusual_time(&self) -> bool {
        let now = self.clock.now().time();
        let start = NaiveTime::from_hms_opt(1, 0, 0).expect("valid time");
        let end = NaiveTime::from_hms_opt(6, 0, 0).expect("valid time");
        now >= start && now <= end
    }

    async fn has_recent_failed_attempts(&self, user_id: &str) -> Result<bool, KvError> {
        let attempts: i64 = self
            .kv
            .get(&format!("failed_attempts/{}", user_id))
            .await?
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0);

        Ok(attempts >= FAILED_ATTEMPTS_THRESHOLD)
    }

    /// Impossible travel: the last-known country differs and was observed
    /// less than six hours ago. The last-known location is created on first
    /// sight and refreshed whenever the country changes.
    async fn detect_geo_mismatch(&self, context: &RequestContext) -> Result<bool, KvError> {
        let (user_id, location) = match (&context.user_id, &context.location) {
            (Some(user_id), Some(location)) => (user_id, location),
            _ => return Ok(false),
        };

        let key = format!("last_location/{}", user_id);
        let now = self.clock.now();

        let previous = match self.kv.get(&key).await? {
            Some(raw) => serde_json::from_str::<LastLocation>(&raw).ok(),
            None => None,
        };

        let previous = match previous {
            Some(previous) => previous,
            None => {
                self.store_last_location(&key, location, now).await?;
                return Ok(false);
            },
        };

        if previous.location.country == location.country {
            return Ok(false);
        }

        self.store_last_location(&key, location, now).await?;

        let elapsed_hours = (now - previous.timestamp).num_hours();
        if elapsed_hours < GEO_MISMATCH_WINDOW_HOURS {
            warn!(
                "Geo mismatch for user {}: {} -> {} within {}h",
                user_id, previous.location.country, location.country, elapsed_hours
            );
            return Ok(true);
        }

        Ok(false)
    }

    async fn store_last_location(
        &self,
        key: &str,
        location: &GeoLocation,
        timestamp: DateTime<Utc>,
    ) -> Result<(), KvError> {
        let record = LastLocation {
            location: location.clone(),
            timestamp,
        };
        let serialized = serde_json::to_string(&record).expect("location record serializes");
        self.kv.set(key, &serialized, Some(LAST_LOCATION_TTL)).await
    }

    /// Velocity check: more than 30 requests inside the rolling 60-second
    /// window. The counter TTL is armed on the observed first increment.
    async fn detect_rapid_requests(&self, user_id: &str) -> Result<bool, KvError> {
        let key = format!("request_velocity/{}", user_id);
        let count = self.kv.incr(&key).await?;

        if count == 1 {
            self.kv.expire(&key, VELOCITY_WINDOW).await?;
        }

        Ok(count > VELOCITY_THRESHOLD)
    }

    /// Device change: a presented device id with no record in the user's
    /// device set.
    async fn detect_device_change(&self, context: &RequestContext) -> Result<bool, KvError> {
        let (user_id, device_id) = match (&context.user_id, &context.device_id) {
            (Some(user_id), Some(device_id)) => (user_id, device_id),
            _ => return Ok(false),
        };

        let known = self
            .kv
            .exists(&format!("device/{}/{}", user_id, device_id))
            .await?;
        Ok(!known)
    }

    async fn store_assessment(
        &self,
        user_id: &str,
        assessment: &RiskAssessment,
    ) -> Result<(), KvError> {
        let key = format!("risk_history/{}", user_id);
        let serialized = serde_json::to_string(assessment).expect("assessment serializes");

        self.kv.lpush(&key, &serialized).await?;
        self.kv.ltrim(&key, 0, HISTORY_LIMIT - 1).await?;
        self.kv.expire(&key, HISTORY_TTL).await?;
        Ok(())
    }

    /// Most recent assessments for a user, newest first.
    pub async fn risk_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<RiskAssessment>, KvError> {
        let key = format!("risk_history/{}", user_id);
        let raw = self.kv.lrange(&key, 0, limit as isize - 1).await?;

        Ok(raw
            .iter()
            .filter_map(|entry| serde_json::from_str(entry).ok())
            .collect())
    }
}
