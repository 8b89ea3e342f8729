use crate::{MetricsSnapshot, PoolStats};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    Healthy,
    /// No session is free right now; new requests will queue.
    Degraded,
}

/// Point-in-time view served by the health endpoint.
///
/// Serialized with the wire names the health endpoint has always used
/// (`available_workers`, `max_workers`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub status: HealthLevel,
    pub active_requests: i64,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub timeout_requests: u64,
    #[serde(rename = "available_workers")]
    pub available_sessions: usize,
    #[serde(rename = "max_workers")]
    pub max_sessions: usize,
}

impl HealthSnapshot {
    pub fn new(metrics: MetricsSnapshot, pool: &PoolStats) -> Self {
        let status = if pool.available == 0 {
            HealthLevel::Degraded
        } else {
            HealthLevel::Healthy
        };

        Self {
            status,
            active_requests: metrics.active_requests,
            total_requests: metrics.total_requests,
            failed_requests: metrics.failed_requests,
            timeout_requests: metrics.timeout_requests,
            available_sessions: pool.available,
            max_sessions: pool.capacity,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthLevel::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(available: usize) -> PoolStats {
        PoolStats {
            capacity: 2,
            available,
            checked_out: 2 - available,
            invalidated: 0,
            recreations: 0,
        }
    }

    fn metrics() -> MetricsSnapshot {
        MetricsSnapshot {
            active_requests: 2,
            total_requests: 10,
            failed_requests: 3,
            timeout_requests: 1,
        }
    }

    #[test]
    fn degraded_when_no_session_is_free() {
        assert!(HealthSnapshot::new(metrics(), &pool(1)).is_healthy());
        assert_eq!(
            HealthSnapshot::new(metrics(), &pool(0)).status,
            HealthLevel::Degraded
        );
    }

    #[test]
    fn serializes_wire_field_names() {
        let json = serde_json::to_value(HealthSnapshot::new(metrics(), &pool(0))).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "status": "degraded",
                "active_requests": 2,
                "total_requests": 10,
                "failed_requests": 3,
                "timeout_requests": 1,
                "available_workers": 0,
                "max_workers": 2
            })
        );
    }
}
