//! Process state that is written to the registry and queried

use crate::service::{ServiceKey, ServiceName, Tier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One running process tracked by pets.
///
/// `pid` is unique among records; `0` means "no process". `hostname` and
/// `port` describe the endpoint the process listens on once it has been
/// exposed as a service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    /// A name to show to humans
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,

    pub pid: u32,

    #[serde(default)]
    pub start_time: DateTime<Utc>,

    /// e.g. `localhost`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hostname: String,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub port: u16,

    #[serde(default, skip_serializing_if = "ServiceName::is_empty")]
    pub service_name: ServiceName,

    #[serde(default, skip_serializing_if = "Tier::is_empty")]
    pub service_tier: Tier,
}

fn is_zero(port: &u16) -> bool {
    *port == 0
}

impl ProcessRecord {
    /// A record for a process that was just started.
    pub fn started(pid: u32, display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            pid,
            start_time: Utc::now(),
            ..Default::default()
        }
    }

    /// A copy of this record that listens on the given host and port.
    pub fn with_exposed_host(mut self, hostname: impl Into<String>, port: u16) -> Self {
        self.hostname = hostname.into();
        self.port = port;
        self
    }

    /// A copy of this record that implements the given service.
    pub fn with_service_key(mut self, key: &ServiceKey) -> Self {
        self.service_name = key.name.clone();
        self.service_tier = key.tier.clone();
        self
    }

    pub fn service_key(&self) -> ServiceKey {
        ServiceKey::from_parts(self.service_name.clone(), self.service_tier.clone())
    }

    pub fn is_exposed(&self) -> bool {
        !self.hostname.is_empty() && self.port != 0
    }

    /// Whether this record can satisfy a dependency without a restart.
    /// Liveness of the pid is checked separately.
    pub fn is_service(&self) -> bool {
        !self.service_name.is_empty() && !self.service_tier.is_empty() && self.is_exposed()
    }

    /// `host:port` suitable for dialing, or `None` if not exposed.
    pub fn host(&self) -> Option<String> {
        if !self.is_exposed() {
            return None;
        }
        if self.hostname.contains(':') {
            Some(format!("[{}]:{}", self.hostname, self.port))
        } else {
            Some(format!("{}:{}", self.hostname, self.port))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_record_omits_empty_fields() {
        let record = ProcessRecord {
            pid: 12345,
            ..Default::default()
        };
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"pid":12345,"start_time":"1970-01-01T00:00:00Z"}"#);
    }

    #[test]
    fn test_exposed_record() {
        let record = ProcessRecord {
            pid: 12345,
            ..Default::default()
        }
        .with_exposed_host("localhost", 8080);
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"pid":12345,"start_time":"1970-01-01T00:00:00Z","hostname":"localhost","port":8080}"#
        );
        assert_eq!(record.host().as_deref(), Some("localhost:8080"));
    }

    #[test]
    fn test_service_key_round_trips_through_record() {
        let key = ServiceKey::new("frontend", "local").unwrap();
        let record = ProcessRecord {
            pid: 7,
            ..Default::default()
        }
        .with_service_key(&key);
        assert_eq!(record.service_key(), key);
        assert!(!record.is_service(), "no endpoint yet");
        assert!(record.with_exposed_host("localhost", 1).is_service());
    }

    #[test]
    fn test_host_brackets_ipv6() {
        let record = ProcessRecord::default().with_exposed_host("::1", 9000);
        assert_eq!(record.host().as_deref(), Some("[::1]:9000"));
        assert_eq!(ProcessRecord::default().host(), None);
    }

    #[test]
    fn test_parses_record_missing_optional_fields() {
        let record: ProcessRecord = serde_json::from_str(r#"{"pid":42}"#).unwrap();
        assert_eq!(record.pid, 42);
        assert!(record.display_name.is_empty());
        assert_eq!(record.port, 0);
    }
}
