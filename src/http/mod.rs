use axum::Router;

use crate::AppState;

mod auth;
mod error;
mod handlers;
mod middleware;
mod routes;

pub use auth::{AdminToken, AuthUser};
pub use error::AppError;

pub fn router(state: AppState) -> Router {
    let v1 = Router::new()
        .merge(routes::health())
        .merge(routes::connections())
        .merge(routes::blocks())
        .merge(routes::messaging(state.clone()))
        .merge(routes::trust())
        .merge(routes::reports())
        .merge(routes::admin())
        .merge(routes::notifications());

    Router::new()
        .merge(routes::health())
        .nest("/v1", v1)
        .with_state(state)
}
