//! Health check results.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubsystemState {
    Ok,
    Degraded,
    Unreachable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateStatus {
    Healthy,
    Degraded,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubsystemHealth {
    pub name: &'static str,
    pub state: SubsystemState,
    pub detail: String,
}

impl SubsystemHealth {
    pub fn new(name: &'static str, state: SubsystemState, detail: impl Into<String>) -> Self {
        Self {
            name,
            state,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: AggregateStatus,
    pub subsystems: Vec<SubsystemHealth>,
    pub checked_at_ms: u64,
    pub duration_ms: u64,
}

/// "error" only when something is unreachable; impaired is "degraded".
pub fn aggregate(subsystems: &[SubsystemHealth]) -> AggregateStatus {
    match subsystems.iter().map(|s| s.state).max() {
        Some(SubsystemState::Unreachable) => AggregateStatus::Error,
        Some(SubsystemState::Degraded) => AggregateStatus::Degraded,
        _ => AggregateStatus::Healthy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate() {
        let ok = SubsystemHealth::new("cache", SubsystemState::Ok, "");
        let degraded = SubsystemHealth::new("circuit_breakers", SubsystemState::Degraded, "database open");
        let down = SubsystemHealth::new("persistence", SubsystemState::Unreachable, "refused");

        assert_eq!(aggregate(&[ok.clone()]), AggregateStatus::Healthy);
        assert_eq!(aggregate(&[ok.clone(), degraded.clone()]), AggregateStatus::Degraded);
        assert_eq!(aggregate(&[ok, degraded, down]), AggregateStatus::Error);
        assert_eq!(aggregate(&[]), AggregateStatus::Healthy);
    }
}
