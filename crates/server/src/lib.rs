pub mod config;
pub mod error;
pub mod routes;
pub mod signature;
pub mod state;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Callbridge API",
        version = "0.1.0",
        description = "Automated phone calls bridging a telephony provider and a voice-AI agent"
    ),
    paths(
        routes::health_check,
        routes::calls::create_call,
        routes::calls::list_calls,
        routes::calls::get_call,
        routes::calls::end_call,
        routes::calls::analyze_call,
        routes::webhooks::twilio_voice,
        routes::webhooks::twilio_status,
        routes::webhooks::ultravox_event,
        routes::sse::events_stream,
    ),
    components(schemas(
        routes::HealthResponse,
        routes::calls::CreateCallRequest,
        routes::calls::EndCallResponse,
        routes::webhooks::WebhookAck,
        error::ErrorResponse,
        callbridge_core::Call,
        callbridge_core::CallStatus,
        callbridge_core::CallDirection,
        callbridge_core::PromptConfig,
        callbridge_core::TranscriptEntry,
        callbridge_core::Speaker,
        callbridge_core::CallSummary,
        callbridge_core::Sentiment,
    )),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "calls", description = "Call management endpoints"),
        (name = "webhooks", description = "Telephony and voice-AI provider callbacks"),
        (name = "events", description = "Real-time call events (SSE)"),
    )
)]
pub struct ApiDoc;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api/openapi.json", ApiDoc::openapi()))
        .route("/health", get(routes::health_check))
        .route(
            "/api/calls",
            get(routes::calls::list_calls).post(routes::calls::create_call),
        )
        .route("/api/calls/{id}", get(routes::calls::get_call))
        .route("/api/calls/{id}/end", post(routes::calls::end_call))
        .route("/api/calls/{id}/analyze", post(routes::calls::analyze_call))
        .route("/api/events", get(routes::sse::events_stream))
        .route("/webhooks/twilio/voice", post(routes::webhooks::twilio_voice))
        .route("/webhooks/twilio/status", post(routes::webhooks::twilio_status))
        .route("/webhooks/ultravox", post(routes::webhooks::ultravox_event))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
