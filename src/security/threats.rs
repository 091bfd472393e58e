//! Threat scoring and mitigation.
//!
//! Everything lives in sharded in-memory tables so a report takes effect in
//! well under 100 ms and queries are O(1).

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::clock::unix_millis;
use crate::config::ThreatPolicy;
use crate::events::{EventBus, RemediationEvent, RemediationKind};
use crate::observability::metrics;
use crate::security::rate_limit::SourceThrottle;
use crate::storage::entities::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatCategory {
    BruteForce,
    Ddos,
    Suspicious,
}

impl ThreatCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ThreatCategory::BruteForce => "brute_force",
            ThreatCategory::Ddos => "ddos",
            ThreatCategory::Suspicious => "suspicious",
        }
    }
}

/// A detector's report about one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatReport {
    pub source_ip: IpAddr,
    pub category: ThreatCategory,
    pub severity: Severity,
    /// 0..=100
    pub confidence: u8,
    #[serde(default)]
    pub indicators: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Blocked,
    Quarantined,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatAction {
    Block,
    Quarantine,
    Monitor,
}

impl ThreatAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ThreatAction::Block => "block",
            ThreatAction::Quarantine => "quarantine",
            ThreatAction::Monitor => "monitor",
        }
    }
}

/// An active mitigation against one source.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatRecord {
    pub source_ip: IpAddr,
    pub score: u32,
    pub classification: Classification,
    pub category: ThreatCategory,
    pub report_count: u32,
    pub first_seen_at_ms: u64,
    pub expires_at_ms: u64,
    #[serde(skip)]
    expires_at: Instant,
}

impl ThreatRecord {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MitigationOutcome {
    pub source_ip: IpAddr,
    pub action: ThreatAction,
    /// What is in force after this report (a block is never downgraded).
    pub classification: Classification,
    pub score: u32,
    pub ddos_protection: bool,
    pub latency_ms: u64,
}

/// Traffic decision for one request from a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficDecision {
    Allow,
    Throttle,
    Reject,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatCounts {
    pub blocked: usize,
    pub quarantined: usize,
    pub ddos_protected: usize,
}

fn severity_weight(severity: Severity) -> u32 {
    match severity {
        Severity::Low => 10,
        Severity::Medium => 25,
        Severity::High => 50,
        Severity::Critical => 75,
    }
}

/// Score contributed by a single report.
pub fn report_score(report: &ThreatReport) -> u32 {
    let confidence = u32::from(report.confidence.min(100));
    let indicators = report.indicators.len().min(5) as u32;
    severity_weight(report.severity) * confidence / 100 + 4 * indicators
}

/// Decide what to do given the source's accumulated score.
pub fn decide(policy: &ThreatPolicy, report: &ThreatReport, score: u32) -> ThreatAction {
    let volumetric = matches!(report.category, ThreatCategory::BruteForce | ThreatCategory::Ddos);
    if volumetric && report.confidence >= policy.high_confidence {
        return if report.severity >= Severity::High {
            ThreatAction::Block
        } else {
            ThreatAction::Quarantine
        };
    }
    if score >= policy.block_threshold {
        ThreatAction::Block
    } else if score >= policy.quarantine_threshold {
        ThreatAction::Quarantine
    } else {
        ThreatAction::Monitor
    }
}

/// Accumulated score for one source.
#[derive(Debug, Clone, Copy)]
struct SourceScore {
    value: u32,
    expires_at: Instant,
}

impl SourceScore {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

pub struct ThreatMitigationEngine {
    policy: ArcSwap<ThreatPolicy>,
    scores: DashMap<IpAddr, SourceScore>,
    records: DashMap<IpAddr, ThreatRecord>,
    ddos: SourceThrottle,
    quarantine: SourceThrottle,
    events: EventBus,
}

impl ThreatMitigationEngine {
    pub fn new(policy: ThreatPolicy, events: EventBus) -> Self {
        Self {
            policy: ArcSwap::from_pointee(policy),
            scores: DashMap::new(),
            records: DashMap::new(),
            ddos: SourceThrottle::new(),
            quarantine: SourceThrottle::new(),
            events,
        }
    }

    pub fn policy(&self) -> Arc<ThreatPolicy> {
        self.policy.load_full()
    }

    /// Swap in new thresholds. Existing records keep their deadlines.
    pub fn update_policy(&self, policy: ThreatPolicy) {
        tracing::info!(
            block_threshold = policy.block_threshold,
            quarantine_threshold = policy.quarantine_threshold,
            "Threat policy updated"
        );
        self.policy.store(Arc::new(policy));
    }

    /// Score the report and apply block/quarantine if warranted.
    pub fn mitigate(&self, report: &ThreatReport) -> MitigationOutcome {
        let started = Instant::now();
        let policy = self.policy.load();
        let ip = report.source_ip;
        self.expire_source(ip, started);

        let retention = started + Duration::from_secs(policy.score_retention_secs);
        let score = {
            let mut entry = self.scores.entry(ip).or_insert(SourceScore {
                value: 0,
                expires_at: retention,
            });
            if !entry.is_live(started) {
                entry.value = 0;
            }
            entry.value = (entry.value + report_score(report)).min(100);
            entry.expires_at = entry.expires_at.max(retention);
            entry.value
        };
        let action = decide(&policy, report, score);

        let ddos_protection = report.category == ThreatCategory::Ddos;
        if ddos_protection {
            self.ddos
                .protect(ip, Duration::from_secs(policy.block_duration_secs), policy.ddos_burst);
        }

        let (classification, until) = self.apply(report, action, score, &policy);
        if let Some(mut entry) = self.scores.get_mut(&ip) {
            entry.expires_at = entry.expires_at.max(until);
        }
        let latency_ms = started.elapsed().as_millis() as u64;

        metrics::record_threat_action(action.as_str());
        tracing::warn!(
            source_ip = %ip,
            category = report.category.as_str(),
            severity = ?report.severity,
            confidence = report.confidence,
            score,
            action = action.as_str(),
            ddos_protection,
            "Threat report processed"
        );
        self.events.emit(RemediationEvent::new(
            RemediationKind::ThreatMitigation,
            latency_ms,
            true,
            format!("{} {} (score {}, {})", action.as_str(), ip, score, report.category.as_str()),
        ));

        MitigationOutcome {
            source_ip: ip,
            action,
            classification,
            score,
            ddos_protection,
            latency_ms,
        }
    }

    /// Returns what is in force for the source and until when.
    fn apply(
        &self,
        report: &ThreatReport,
        action: ThreatAction,
        score: u32,
        policy: &ThreatPolicy,
    ) -> (Classification, Instant) {
        let now = Instant::now();
        let (wanted, hold) = match action {
            ThreatAction::Block => (Classification::Blocked, policy.block_duration_secs),
            ThreatAction::Quarantine => (Classification::Quarantined, policy.quarantine_secs),
            ThreatAction::Monitor => (Classification::None, 0),
        };

        let mut record = self.records.entry(report.source_ip).or_insert_with(|| ThreatRecord {
            source_ip: report.source_ip,
            score,
            classification: Classification::None,
            category: report.category,
            report_count: 0,
            first_seen_at_ms: unix_millis(),
            expires_at_ms: 0,
            expires_at: now,
        });

        if !record.is_live(now) {
            record.classification = Classification::None;
        }
        record.score = score;
        record.report_count += 1;

        let upgrade = match (record.classification, wanted) {
            (_, Classification::None) => false,
            (Classification::Blocked, Classification::Quarantined) => false,
            _ => true,
        };
        if upgrade {
            record.classification = wanted;
            record.category = report.category;
            let until = now + Duration::from_secs(hold);
            if until > record.expires_at {
                record.expires_at = until;
                record.expires_at_ms = unix_millis() + hold * 1000;
            }
        }

        let classification = record.classification;
        let until = record.expires_at;
        drop(record);
        if classification == Classification::None {
            // Monitor only: keep the score, no record.
            self.records.remove_if(&report.source_ip, |_, r| r.classification == Classification::None);
            return (classification, now);
        }
        (classification, until)
    }

    /// Forget an expired mitigation together with any score that has
    /// outlived its retention.
    fn expire_source(&self, ip: IpAddr, now: Instant) {
        if self.records.remove_if(&ip, |_, r| !r.is_live(now)).is_some() {
            tracing::debug!(source_ip = %ip, "Threat mitigation expired");
        }
        self.scores.remove_if(&ip, |_, s| !s.is_live(now));
    }

    fn live_record(&self, ip: IpAddr) -> Option<ThreatRecord> {
        let now = Instant::now();
        {
            let record = self.records.get(&ip)?;
            if record.is_live(now) {
                return Some(record.clone());
            }
        }
        self.expire_source(ip, now);
        None
    }

    pub fn is_blocked(&self, ip: IpAddr) -> bool {
        self.live_record(ip)
            .map_or(false, |r| r.classification == Classification::Blocked)
    }

    pub fn is_quarantined(&self, ip: IpAddr) -> bool {
        self.live_record(ip)
            .map_or(false, |r| r.classification == Classification::Quarantined)
    }

    pub fn threat_score(&self, ip: IpAddr) -> u32 {
        let now = Instant::now();
        self.scores
            .get(&ip)
            .filter(|s| s.is_live(now))
            .map_or(0, |s| s.value)
    }

    pub fn record(&self, ip: IpAddr) -> Option<ThreatRecord> {
        self.live_record(ip)
    }

    pub fn is_ddos_protected(&self, ip: IpAddr) -> bool {
        self.ddos.is_protected(ip)
    }

    /// Gate one request from `ip`. Blocked sources are rejected; quarantined
    /// and DDoS-protected sources each draw on a restricted bucket.
    pub fn admit(&self, ip: IpAddr) -> TrafficDecision {
        let policy = self.policy.load();
        match self.live_record(ip) {
            Some(record) if record.classification == Classification::Blocked => {
                return TrafficDecision::Reject;
            }
            Some(record) if record.classification == Classification::Quarantined => {
                self.quarantine
                    .protect_until(ip, record.expires_at, policy.quarantine_burst);
                if self.quarantine.check(ip, policy.quarantine_rps, policy.quarantine_burst) == Some(false) {
                    return TrafficDecision::Throttle;
                }
            }
            _ => {}
        }
        match self.ddos.check(ip, policy.ddos_rps, policy.ddos_burst) {
            Some(false) => TrafficDecision::Throttle,
            _ => TrafficDecision::Allow,
        }
    }

    /// Lift every mitigation against `ip` and forget its score.
    pub fn release(&self, ip: IpAddr) -> bool {
        let had_record = self.records.remove(&ip).is_some();
        let had_shield = self.ddos.lift(ip);
        self.quarantine.lift(ip);
        self.scores.remove(&ip);
        if had_record || had_shield {
            tracing::info!(source_ip = %ip, "Threat mitigation released");
        }
        had_record || had_shield
    }

    /// Drop expired records, scores past their retention and expired
    /// traffic restrictions. Returns the number of records and restrictions
    /// dropped.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.records.len();
        self.records.retain(|_, r| r.is_live(now));
        let expired = before - self.records.len();
        self.scores.retain(|_, s| s.is_live(now));
        self.quarantine.sweep();
        expired + self.ddos.sweep()
    }

    /// Sources with a live score.
    pub fn tracked_sources(&self) -> usize {
        self.scores.len()
    }

    pub fn counts(&self) -> ThreatCounts {
        let now = Instant::now();
        let mut counts = ThreatCounts {
            ddos_protected: self.ddos.len(),
            ..Default::default()
        };
        for record in self.records.iter().filter(|r| r.is_live(now)) {
            match record.classification {
                Classification::Blocked => counts.blocked += 1,
                Classification::Quarantined => counts.quarantined += 1,
                Classification::None => {}
            }
        }
        counts
    }
}
