use std::sync::Arc;

use error_stack::Report;
use poem::get;
use poem::listener::TcpListener;
use poem::middleware::Tracing;
use poem::post;
use poem::Endpoint;
use poem::EndpointExt;
use poem::Route;
use poem::Server;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;

use super::handlers::healthz;
use super::handlers::resize_container;
use super::ApiError;
use crate::domain::action::ResizeExecutor;

/// HTTP API server executing resize actions
pub struct ApiServer {
    executor: Arc<ResizeExecutor>,
    listen_addr: String,
}

/// Routes served by [`ApiServer`].
pub fn routes(executor: Arc<ResizeExecutor>) -> impl Endpoint {
    Route::new()
        .at("/api/v1/actions/resize", post(resize_container))
        .at("/healthz", get(healthz))
        .data(executor)
        .with(Tracing)
}

impl ApiServer {
    pub fn new(executor: Arc<ResizeExecutor>, listen_addr: String) -> Self {
        Self {
            executor,
            listen_addr,
        }
    }

    /// Serve until `cancellation_token` is cancelled.
    ///
    /// # Errors
    ///
    /// - [`ApiError::ServerError`] if the server fails to start or bind to the address
    pub async fn run(self, cancellation_token: CancellationToken) -> Result<(), Report<ApiError>> {
        info!("Starting HTTP API server on {}", self.listen_addr);

        let app = routes(self.executor);
        let listener = TcpListener::bind(&self.listen_addr);
        let server = Server::new(listener);

        tokio::select! {
            result = server.run(app) => {
                match result {
                    Ok(()) => {
                        info!("API server stopped normally");
                        Ok(())
                    }
                    Err(e) => {
                        error!("API server failed: {e}");
                        Err(Report::new(ApiError::ServerError {
                            message: format!("Server failed: {e}"),
                        }))
                    }
                }
            }
            _ = cancellation_token.cancelled() => {
                info!("API server shutdown requested");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use api_types::ActionOutcomeKind;
    use api_types::ActionResponse;
    use poem::http::StatusCode;
    use poem::test::TestClient;
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::config::ActionConfig;
    use crate::domain::action::mock::running_pod;
    use crate::domain::action::mock::MockCluster;
    use crate::domain::action::mock::MockNodes;
    use crate::domain::lease::LeaseRegistry;

    const POD_UID: &str = "6f1c2a40-1f7e-4c51-9a55-0d1f7e0a9b21";

    fn client() -> TestClient<impl Endpoint> {
        let cluster = Arc::new(MockCluster::new());
        cluster.add_pod(running_pod("default", "web-0", POD_UID, None));
        let executor = Arc::new(ResizeExecutor::new(
            cluster,
            Arc::new(MockNodes { khz: 2_000_000 }),
            Arc::new(LeaseRegistry::new(Duration::from_secs(30))),
            ActionConfig::default(),
        ));
        TestClient::new(routes(executor))
    }

    async fn post_action(body: serde_json::Value) -> (StatusCode, ActionResponse) {
        let resp = client()
            .post("/api/v1/actions/resize")
            .body_json(&body)
            .send()
            .await;
        let status = resp.0.status();
        let response: ActionResponse = resp.json().await.value().deserialize();
        (status, response)
    }

    #[test(tokio::test)]
    async fn successful_action_returns_ok() {
        let (status, response) = post_action(serde_json::json!({
            "targetContainerId": format!("{POD_UID}-0"),
            "hostingPodId": POD_UID,
            "commodity": {"commodityType": "VMEM", "capacity": 262144}
        }))
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(response.is_success(), "{response:?}");
        assert!(response.message.starts_with("resized container of pod default/web-0-"));
    }

    #[test(tokio::test)]
    async fn permanent_failure_is_unprocessable() {
        let (status, response) = post_action(serde_json::json!({
            "targetContainerId": format!("{POD_UID}-0"),
            "hostingPodId": "another-pod",
            "hostingPodDisplayName": "default/web-0",
            "commodity": {"commodityType": "VCPU", "capacity": 2}
        }))
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(response.outcome, ActionOutcomeKind::PermanentFailure);
        assert!(response.message.contains("id mismatch"), "{}", response.message);
    }

    #[test(tokio::test)]
    async fn malformed_body_is_rejected() {
        let resp = client()
            .post("/api/v1/actions/resize")
            .body("not json")
            .content_type("application/json")
            .send()
            .await;
        resp.assert_status(StatusCode::BAD_REQUEST);
    }

    #[test(tokio::test)]
    async fn healthz_responds() {
        let resp = client().get("/healthz").send().await;
        resp.assert_status_is_ok();
        resp.assert_text("ok").await;
    }
}
