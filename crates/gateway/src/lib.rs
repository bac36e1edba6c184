//! HTTP gateway for the Ema server.
//!
//! Exposes the actor surface over REST + SSE:
//! - `POST /actors/:user/:actor/:conversation/input` queues text inputs
//! - `GET /actors/:user/:actor/:conversation/events` streams actor events
//! - `GET /health` liveness probe
//!
//! Built on Axum. Authentication is the deployment's concern, not the
//! gateway's.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::Json,
    routing::{get, post},
    Router,
};
use ema_core::{ActorEvent, Content, Error};
use ema_server::Server;
use futures::stream::Stream;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

/// Build the Axum router over a running server.
pub fn build_router(server: Arc<Server>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/actors/:user_id/:actor_id/:conversation_id/input",
            post(input_handler),
        )
        .route(
            "/actors/:user_id/:actor_id/:conversation_id/events",
            get(events_handler),
        )
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(server)
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

#[derive(Debug, Deserialize)]
struct InputRequest {
    texts: Vec<String>,
}

async fn input_handler(
    State(server): State<Arc<Server>>,
    Path((user_id, actor_id, conversation_id)): Path<(i64, i64, i64)>,
    Json(body): Json<InputRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), (StatusCode, Json<serde_json::Value>)> {
    let actor = server
        .get_actor(user_id, actor_id, conversation_id)
        .await
        .map_err(into_http_error)?;

    let count = body.texts.len();
    actor
        .work(body.texts.into_iter().map(Content::text).collect())
        .await
        .map_err(into_http_error)?;

    Ok((StatusCode::ACCEPTED, Json(json!({"queued": count}))))
}

async fn events_handler(
    State(server): State<Arc<Server>>,
    Path((user_id, actor_id, conversation_id)): Path<(i64, i64, i64)>,
) -> Result<
    Sse<impl Stream<Item = Result<Event, Infallible>>>,
    (StatusCode, Json<serde_json::Value>),
> {
    let actor = server
        .get_actor(user_id, actor_id, conversation_id)
        .await
        .map_err(into_http_error)?;

    let key = actor.key();
    let stream = BroadcastStream::new(actor.events().subscribe()).filter_map(move |item| {
        let result = match item {
            Ok(event) => Some(Ok(sse_event(&event))),
            Err(BroadcastStreamRecvError::Lagged(n)) => {
                warn!(actor = %key, dropped = n, "SSE subscriber lagged; dropping events");
                None
            }
        };
        async move { result }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Encode one actor event for the wire: the variant name becomes the SSE
/// event field, the payload the data line.
fn sse_event(event: &ActorEvent) -> Event {
    let name = match event {
        ActorEvent::Message { .. } => "message",
        ActorEvent::Agent { .. } => "agent",
    };
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(name).data(data)
}

fn into_http_error(error: Error) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &error {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({"error": error.to_string()})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use ema_config::EmaConfig;
    use ema_core::{
        AgentEvent, EmaReply, GenerateRequest, LlmClient, LlmError, LlmResponse, Message,
        ToolRegistry,
    };
    use ema_store::MemoryStore;
    use tokio_util::sync::CancellationToken;
    use tower::util::ServiceExt;

    struct TextClient;

    #[async_trait]
    impl LlmClient for TextClient {
        fn name(&self) -> &str {
            "text"
        }
        async fn generate(
            &self,
            _request: GenerateRequest,
            _cancel: CancellationToken,
        ) -> Result<LlmResponse, LlmError> {
            Ok(LlmResponse {
                message: Message::model("ok"),
                finish_reason: "stop".into(),
                total_tokens: None,
            })
        }
    }

    fn router() -> Router {
        let server = Server::new(
            Arc::new(EmaConfig::default()),
            Arc::new(MemoryStore::new()),
            Arc::new(TextClient),
            Arc::new(ToolRegistry::new()),
            "You are Ema.".into(),
        );
        build_router(server)
    }

    #[tokio::test]
    async fn health_endpoint_responds() {
        let response = router()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn input_endpoint_accepts_texts() {
        let response = router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/actors/1/2/3/input")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"texts": ["hello"]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn empty_input_is_a_bad_request() {
        let response = router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/actors/1/2/3/input")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"texts": []}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn sse_event_names_follow_the_variant() {
        let message = ActorEvent::Message {
            content: "Actor status: running.".into(),
        };
        // The Event type doesn't expose its fields; encoding must not panic
        let _ = sse_event(&message);

        let agent = ActorEvent::Agent {
            event: AgentEvent::EmaReplyReceived {
                reply: EmaReply {
                    think: "t".into(),
                    expression: "普通".into(),
                    action: "无".into(),
                    response: "hi".into(),
                },
            },
        };
        let _ = sse_event(&agent);
    }
}
