use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use time::OffsetDateTime;

use crate::app::gate::ReputationGate;
use crate::domain::error::CoreError;
use crate::http::{AppError, AuthUser};
use crate::AppState;

/// Rejects chat traffic from users who are cooling down after a strike.
pub async fn chat_cooldown_middleware(
    State(state): State<AppState>,
    auth: Option<AuthUser>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(auth_user) = auth {
        let gate = ReputationGate::new(state.db.clone());
        let (allowed, until) = gate
            .can_send(auth_user.user_id, OffsetDateTime::now_utc())
            .await
            .map_err(|err| AppError::from_core(err, "failed to check chat cooldown"))?;

        if let (false, Some(until)) = (allowed, until) {
            return Err(CoreError::CooldownActive { until }.into());
        }
    }

    Ok(next.run(request).await)
}
