//! Consul client for game-server discovery.
//!
//! Only the health endpoint is used, as a blocking query: the gateway
//! passes the index from the previous response and Consul holds the
//! request open until the service list changes or the wait elapses.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Response header carrying the blocking-query cursor.
const CONSUL_INDEX_HEADER: &str = "X-Consul-Index";

/// One healthy instance returned by `/v1/health/service/:name`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceEntry {
    pub service: AgentService,
    #[serde(default)]
    pub checks: Vec<HealthCheck>,
}

impl ServiceEntry {
    /// Worst status across the entry's checks, Consul-style.
    pub fn aggregated_status(&self) -> &'static str {
        let mut warning = false;
        for check in &self.checks {
            match check.status.as_str() {
                "critical" => return "critical",
                "warning" => warning = true,
                _ => {}
            }
        }
        if warning {
            "warning"
        } else {
            "passing"
        }
    }
}

/// Registered service metadata. Tags carry the supported game types;
/// `Weights.Passing` carries the advertised load.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgentService {
    #[serde(rename = "ID")]
    pub id: String,
    pub service: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub weights: Weights,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Weights {
    #[serde(default)]
    pub passing: i32,
    #[serde(default)]
    pub warning: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HealthCheck {
    #[serde(default)]
    pub status: String,
    #[serde(rename = "CheckID", default)]
    pub check_id: String,
}

/// Thin client over the Consul HTTP API.
#[derive(Clone)]
pub struct ConsulClient {
    http: reqwest::Client,
    base_url: String,
}

impl ConsulClient {
    /// `address` is `host:port` or a full `http(s)://` URL.
    pub fn new(address: &str) -> Self {
        let base_url = if address.starts_with("http://") || address.starts_with("https://") {
            address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", address.trim_end_matches('/'))
        };
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    /// Blocking query for healthy instances of `service`.
    ///
    /// Holds until the service list changes past `wait_index` or `wait`
    /// elapses. Returns the entries plus the new index to pass next time.
    pub async fn health_service(
        &self,
        service: &str,
        wait_index: u64,
        wait: Duration,
    ) -> Result<(Vec<ServiceEntry>, u64)> {
        let url = format!("{}/v1/health/service/{}", self.base_url, service);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("passing", "true".to_string()),
                ("index", wait_index.to_string()),
                ("wait", format!("{}s", wait.as_secs())),
            ])
            .send()
            .await?
            .error_for_status()?;

        let last_index = response
            .headers()
            .get(CONSUL_INDEX_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| {
                Error::InvalidResponse(format!("missing or bad {CONSUL_INDEX_HEADER} header"))
            })?;

        let entries: Vec<ServiceEntry> = response.json().await?;
        debug!(
            service,
            instances = entries.len(),
            index = last_index,
            "consul health query returned"
        );

        Ok((entries, last_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"[
      {
        "Node": {"Node": "node-1", "Address": "10.0.0.5"},
        "Service": {
          "ID": "mines-1",
          "Service": "game-server",
          "Tags": ["mines_pro", "mines_casual"],
          "Address": "10.0.0.5",
          "Port": 9100,
          "Weights": {"Passing": 7, "Warning": 1}
        },
        "Checks": [
          {"CheckID": "serfHealth", "Status": "passing"},
          {"CheckID": "service:mines-1", "Status": "passing"}
        ]
      }
    ]"#;

    #[test]
    fn parses_health_service_payload() {
        let entries: Vec<ServiceEntry> = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(entries.len(), 1);

        let svc = &entries[0].service;
        assert_eq!(svc.id, "mines-1");
        assert_eq!(svc.address, "10.0.0.5");
        assert_eq!(svc.port, 9100);
        assert_eq!(svc.tags, vec!["mines_pro", "mines_casual"]);
        assert_eq!(svc.weights.passing, 7);
        assert_eq!(entries[0].aggregated_status(), "passing");
    }

    #[test]
    fn aggregated_status_prefers_worst() {
        let entry = ServiceEntry {
            service: AgentService {
                id: "s".into(),
                service: "game-server".into(),
                tags: vec![],
                address: "127.0.0.1".into(),
                port: 1,
                weights: Weights::default(),
            },
            checks: vec![
                HealthCheck {
                    status: "passing".into(),
                    check_id: String::new(),
                },
                HealthCheck {
                    status: "warning".into(),
                    check_id: String::new(),
                },
            ],
        };
        assert_eq!(entry.aggregated_status(), "warning");
    }

    #[test]
    fn base_url_normalization() {
        let plain = ConsulClient::new("127.0.0.1:8500");
        assert_eq!(plain.base_url, "http://127.0.0.1:8500");

        let full = ConsulClient::new("https://consul.internal:8501/");
        assert_eq!(full.base_url, "https://consul.internal:8501");
    }
}
