use axum::{middleware, routing::get, routing::post, Router};

use crate::http::handlers;
use crate::http::middleware::cooldown::chat_cooldown_middleware;
use crate::AppState;

pub fn health() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health))
}

pub fn connections() -> Router<AppState> {
    Router::new()
        .route(
            "/connections/requests/incoming",
            get(handlers::incoming_requests),
        )
        .route(
            "/connections/requests/:id/accept",
            post(handlers::accept_connection),
        )
        .route(
            "/connections/requests/:id/decline",
            post(handlers::decline_connection),
        )
        .route(
            "/connections/requests/:id/cancel",
            post(handlers::cancel_connection),
        )
        .route("/connections/:user_id", get(handlers::connection_status))
        .route(
            "/connections/:user_id/request",
            post(handlers::request_connection),
        )
        .route("/connections/:user_id/unfriend", post(handlers::unfriend))
}

pub fn blocks() -> Router<AppState> {
    Router::new()
        .route("/blocks", get(handlers::list_blocks))
        .route("/users/:id/block", post(handlers::block_user))
        .route("/users/:id/unblock", post(handlers::unblock_user))
}

pub fn messaging(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/messages", post(handlers::send_message))
        .route_layer(middleware::from_fn_with_state(
            state,
            chat_cooldown_middleware,
        ))
        .route("/streaks/:user_id", get(handlers::get_streak))
}

pub fn trust() -> Router<AppState> {
    Router::new()
        .route("/account/trust", get(handlers::my_trust))
        .route("/account/trust/events", get(handlers::my_trust_events))
        .route("/account/chat-status", get(handlers::chat_status))
        .route("/users/:id/trust", get(handlers::user_trust))
}

pub fn reports() -> Router<AppState> {
    Router::new().route("/reports", post(handlers::file_report))
}

pub fn admin() -> Router<AppState> {
    Router::new()
        .route("/admin/trust-events", post(handlers::record_trust_event))
        .route(
            "/admin/users/:id/trust-adjustment",
            post(handlers::adjust_trust),
        )
        .route(
            "/admin/users/:id/trust-recompute",
            post(handlers::recompute_trust),
        )
        .route("/admin/reports", get(handlers::list_reports))
        .route(
            "/admin/reports/:id/status",
            post(handlers::set_report_status),
        )
        .route("/admin/moderation/audit", get(handlers::moderation_audit))
}

pub fn notifications() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(handlers::list_notifications))
        .route(
            "/notifications/:id/read",
            post(handlers::mark_notification_read),
        )
}
