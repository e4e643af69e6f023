use axum::{body::Bytes, extract::Extension, Json};
use serde_json::{json, Value};
use tracing::debug;

use crate::kernel::QueueMessage;
use crate::server::app::AxumAppState;
use crate::server::error::ApiError;

/// `POST /api/<queue-name>` - publish one `{apiUrl, body}` message.
pub async fn enqueue_handler(
    Extension(state): Extension<AxumAppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let message = QueueMessage::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("{:#}", e)))?;

    state.deps.queue.publish(&message).await?;
    debug!(url = %message.api_url, "message published via ingress");

    Ok(Json(json!({ "success": true })))
}
