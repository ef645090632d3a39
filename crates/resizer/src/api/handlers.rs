use std::sync::Arc;

use api_types::ActionOutcomeKind;
use api_types::ActionRequest;
use api_types::ActionResponse;
use poem::handler;
use poem::http::StatusCode;
use poem::web::Data;
use poem::web::Json;
use tracing::error;

use crate::domain::action::ResizeExecutor;

fn status_of(outcome: ActionOutcomeKind) -> StatusCode {
    match outcome {
        ActionOutcomeKind::Succeeded => StatusCode::OK,
        ActionOutcomeKind::RetryableFailure => StatusCode::SERVICE_UNAVAILABLE,
        ActionOutcomeKind::PermanentFailure => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

/// Execute a container resize action
///
/// The action runs on its own task so that a dropped connection does not
/// cancel it halfway through a scheduler swap.
#[handler]
pub async fn resize_container(
    Json(request): Json<ActionRequest>,
    executor: Data<&Arc<ResizeExecutor>>,
) -> poem::Result<(StatusCode, Json<ActionResponse>)> {
    let executor = Arc::clone(executor.0);
    let response = tokio::spawn(async move {
        let outcome = executor.execute(&request).await;
        ActionResponse::from(&outcome)
    })
    .await
    .map_err(|e| {
        error!("resize action task failed: {e}");
        poem::Error::from_string(
            "resize action task failed",
            StatusCode::INTERNAL_SERVER_ERROR,
        )
    })?;

    Ok((status_of(response.outcome), Json(response)))
}

#[handler]
pub async fn healthz() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn status_code_follows_outcome() {
        assert_eq!(status_of(ActionOutcomeKind::Succeeded), StatusCode::OK);
        assert_eq!(
            status_of(ActionOutcomeKind::RetryableFailure),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(ActionOutcomeKind::PermanentFailure),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }
}
