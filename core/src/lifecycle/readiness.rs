//! Readiness probes for local services

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// How a local service is judged ready to accept traffic
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReadinessProbe {
    /// The listening port accepts a TCP connection
    #[default]
    Tcp,
    /// `GET http://127.0.0.1:<port><path>` answers with a non-5xx status
    Http {
        /// Request path, e.g. `/actuator/health`
        path: String,
    },
}

impl ReadinessProbe {
    /// Probe once; any failure means "not yet"
    pub async fn check(&self, port: u16) -> bool {
        match self {
            ReadinessProbe::Tcp => {
                matches!(
                    tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(("127.0.0.1", port)))
                        .await,
                    Ok(Ok(_))
                )
            }
            ReadinessProbe::Http { path } => {
                let url = format!("http://127.0.0.1:{port}{path}");
                let client = match reqwest::Client::builder().timeout(PROBE_TIMEOUT).build() {
                    Ok(client) => client,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to build probe client");
                        return false;
                    }
                };
                match client.get(&url).send().await {
                    Ok(response) => !response.status().is_server_error(),
                    Err(e) => {
                        tracing::trace!(url = %url, error = %e, "Readiness probe failed");
                        false
                    }
                }
            }
        }
    }
}
