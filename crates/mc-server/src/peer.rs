//! Peer notification client.
//!
//! When a purged job's artifacts live on the cooperating node, that node is
//! asked to run its own local purge via `DELETE {peer}/api/cleanup/{id}`.
//! Failures are soft: they are logged and returned, but never undo the local
//! purge. The peer's own sweeps reconcile anything missed.

use async_trait::async_trait;
use reqwest::Client;

use mc_core::config::NodeConfig;
use mc_core::{Error, JobId, NodeLocation, Result};

/// Tells the node holding a job's artifacts that the job is gone.
#[async_trait]
pub trait PeerNotifier: Send + Sync {
    /// Returns `Ok` immediately when `location` is this node.
    async fn notify(&self, job_id: JobId, location: NodeLocation) -> Result<()>;
}

/// [`PeerNotifier`] that calls the peer's cleanup endpoint over HTTP.
///
/// Holds a shared [`reqwest::Client`] so connections are reused across
/// calls; the client carries the configured request timeout.
pub struct HttpPeerClient {
    client: Client,
    base_url: String,
    local: NodeLocation,
}

impl HttpPeerClient {
    pub fn new(config: &NodeConfig) -> Self {
        let client = Client::builder()
            .timeout(config.peer_timeout())
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build peer HTTP client: {e}");
                Client::new()
            });

        Self {
            client,
            base_url: config.peer_url.trim_end_matches('/').to_string(),
            local: config.role,
        }
    }

    fn cleanup_url(&self, job_id: JobId) -> String {
        format!("{}/api/cleanup/{job_id}", self.base_url)
    }
}

#[async_trait]
impl PeerNotifier for HttpPeerClient {
    async fn notify(&self, job_id: JobId, location: NodeLocation) -> Result<()> {
        if location == self.local {
            return Ok(());
        }

        let url = self.cleanup_url(job_id);
        tracing::debug!(job_id = %job_id, peer = %location, url = %url, "Notifying peer");

        match self.client.delete(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(job_id = %job_id, peer = %location, "Peer cleanup acknowledged");
                Ok(())
            }
            Ok(resp) => {
                let status = resp.status();
                tracing::warn!(
                    job_id = %job_id,
                    peer = %location,
                    status = %status,
                    "Peer cleanup returned non-success status"
                );
                Err(Error::PeerUnreachable(format!("{url} returned {status}")))
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %job_id,
                    peer = %location,
                    error = %e,
                    "Failed to contact peer for cleanup"
                );
                Err(Error::PeerUnreachable(format!("{url}: {e}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(peer_url: &str, role: NodeLocation) -> HttpPeerClient {
        HttpPeerClient::new(&NodeConfig {
            role,
            artifact_location: None,
            peer_url: peer_url.to_string(),
            peer_timeout_secs: 2,
        })
    }

    #[tokio::test]
    async fn local_location_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&server.uri(), NodeLocation::ServerA);
        client
            .notify(JobId::new(), NodeLocation::ServerA)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn peer_location_calls_cleanup_endpoint() {
        let server = MockServer::start().await;
        let job_id = JobId::new();
        Mock::given(method("DELETE"))
            .and(path(format!("/api/cleanup/{job_id}")))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        // Trailing slash on the configured URL is tolerated.
        let client = client_for(&format!("{}/", server.uri()), NodeLocation::ServerA);
        client.notify(job_id, NodeLocation::ServerB).await.unwrap();
    }

    #[tokio::test]
    async fn non_success_status_is_peer_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = client_for(&server.uri(), NodeLocation::ServerB);
        let err = client
            .notify(JobId::new(), NodeLocation::ServerA)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PeerUnreachable(_)));
    }

    #[tokio::test]
    async fn network_failure_is_peer_unreachable() {
        // Port 9 (discard) on localhost is expected to refuse connections.
        let client = client_for("http://127.0.0.1:9", NodeLocation::ServerA);
        let err = client
            .notify(JobId::new(), NodeLocation::ServerB)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PeerUnreachable(_)));
    }

    #[tokio::test]
    async fn slow_peer_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(200).set_delay(std::time::Duration::from_secs(5)))
            .mount(&server)
            .await;

        let client = client_for(&server.uri(), NodeLocation::ServerA);
        let err = client
            .notify(JobId::new(), NodeLocation::ServerB)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PeerUnreachable(_)));
    }
}
