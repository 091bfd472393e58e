use std::net::IpAddr;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::admin::AdminState;
use crate::correction::{CorrectionOutcome, FaultReport};
use crate::health::{HealthReport, OrchestratorStatus};
use crate::resilience::BreakerSnapshot;
use crate::security::{MitigationOutcome, ThreatRecord, ThreatReport};
use crate::storage::HealthDocument;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatView {
    pub source_ip: IpAddr,
    pub score: u32,
    pub blocked: bool,
    pub quarantined: bool,
    pub ddos_protected: bool,
    pub record: Option<ThreatRecord>,
}

#[derive(Serialize)]
pub struct Released {
    pub released: bool,
}

fn parse_ip(raw: &str) -> Result<IpAddr, (StatusCode, String)> {
    raw.parse()
        .map_err(|_| (StatusCode::BAD_REQUEST, format!("'{}' is not an IP address", raw)))
}

pub async fn get_health(State(state): State<AdminState>) -> Json<HealthDocument> {
    Json(state.orchestrator.storage().health_status())
}

pub async fn get_status(State(state): State<AdminState>) -> Json<OrchestratorStatus> {
    Json(state.orchestrator.status())
}

pub async fn run_health_check(State(state): State<AdminState>) -> Json<HealthReport> {
    Json(state.orchestrator.trigger_health_check().await)
}

pub async fn get_breakers(State(state): State<AdminState>) -> Json<Vec<BreakerSnapshot>> {
    Json(state.orchestrator.storage().executor().breaker_snapshots())
}

pub async fn get_threat(
    State(state): State<AdminState>,
    Path(ip): Path<String>,
) -> Result<Json<ThreatView>, (StatusCode, String)> {
    let ip = parse_ip(&ip)?;
    let engine = state.orchestrator.threats();
    Ok(Json(ThreatView {
        source_ip: ip,
        score: engine.threat_score(ip),
        blocked: engine.is_blocked(ip),
        quarantined: engine.is_quarantined(ip),
        ddos_protected: engine.is_ddos_protected(ip),
        record: engine.record(ip),
    }))
}

pub async fn release_threat(
    State(state): State<AdminState>,
    Path(ip): Path<String>,
) -> Result<Json<Released>, (StatusCode, String)> {
    let ip = parse_ip(&ip)?;
    Ok(Json(Released {
        released: state.orchestrator.threats().release(ip),
    }))
}

pub async fn report_threat(
    State(state): State<AdminState>,
    Json(report): Json<ThreatReport>,
) -> Result<Json<MitigationOutcome>, (StatusCode, String)> {
    state
        .orchestrator
        .report_threat(report)
        .await
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

pub async fn report_fault(
    State(state): State<AdminState>,
    Json(report): Json<FaultReport>,
) -> Result<Json<CorrectionOutcome>, (StatusCode, String)> {
    state
        .orchestrator
        .report_fault(report)
        .await
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}
