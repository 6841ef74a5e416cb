use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::app::blocks::BlockService;
use crate::app::connections::ConnectionService;
use crate::app::gate::ReputationGate;
use crate::app::messaging::MessagingService;
use crate::app::moderation::ModerationService;
use crate::app::notifications::NotificationService;
use crate::app::reports::ReportService;
use crate::app::streaks::StreakService;
use crate::app::trust::TrustService;
use crate::app::users::UserService;
use crate::domain::message::{MessageOutcome, RejectReason};
use crate::domain::moderation::{ModerationEvent, Report, ReportStatus};
use crate::domain::notification::Notification;
use crate::domain::pair::PairKey;
use crate::domain::social_graph::{Block, BlockStatus, ConnectionRequest, Relationship};
use crate::domain::streak::{PairStreak, StreakState};
use crate::domain::trust::{
    TrustEvent, TrustEventKind, TrustSnapshot, TrustTier, TRUSTED_THRESHOLD,
};
use crate::http::error::seconds_until;
use crate::http::{AdminToken, AppError, AuthUser};
use crate::AppState;

const DEFAULT_PAGE_SIZE: i64 = 30;
const MAX_PAGE_SIZE: i64 = 200;

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
}

#[derive(Deserialize)]
pub struct PaginationQuery {
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

#[derive(Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

/// Cursors are the id of the last item returned; pages run newest first.
fn parse_page(query: &PaginationQuery) -> Result<(i64, Option<i64>), AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    if !(1..=MAX_PAGE_SIZE).contains(&limit) {
        return Err(AppError::bad_request("limit must be between 1 and 200"));
    }
    let before_id = match query.cursor.as_deref() {
        None | Some("") => None,
        Some(cursor) => Some(
            cursor
                .parse::<i64>()
                .ok()
                .filter(|id| *id > 0)
                .ok_or_else(|| AppError::bad_request("invalid cursor"))?,
        ),
    };
    Ok((limit, before_id))
}

/// Trim the look-ahead row fetched with `limit + 1` and derive the next cursor.
fn page<T>(mut items: Vec<T>, limit: i64, id_of: impl Fn(&T) -> i64) -> ListResponse<T> {
    let next_cursor = if items.len() > limit as usize {
        items.truncate(limit as usize);
        items.last().map(|item| id_of(item).to_string())
    } else {
        None
    };
    ListResponse { items, next_cursor }
}

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = if state.db.ping().await.is_ok() {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse { status })
}

#[derive(Serialize)]
pub struct ConnectionResponse {
    pub request: ConnectionRequest,
    pub relationship: Relationship,
}

pub async fn request_connection(
    Path(user_id): Path<i64>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<ConnectionResponse>, AppError> {
    let service = ConnectionService::new(state.db.clone());
    let request = service
        .request(auth.user_id, user_id)
        .await
        .map_err(|err| AppError::from_core(err, "failed to send connection request"))?;

    Ok(Json(ConnectionResponse {
        relationship: Relationship::from_latest(auth.user_id, Some(&request)),
        request,
    }))
}

pub async fn accept_connection(
    Path(id): Path<i64>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<ConnectionResponse>, AppError> {
    let service = ConnectionService::new(state.db.clone());
    let request = service
        .accept(auth.user_id, id)
        .await
        .map_err(|err| AppError::from_core(err, "failed to accept connection request"))?;

    Ok(Json(ConnectionResponse {
        relationship: Relationship::from_latest(auth.user_id, Some(&request)),
        request,
    }))
}

pub async fn decline_connection(
    Path(id): Path<i64>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<ConnectionResponse>, AppError> {
    let service = ConnectionService::new(state.db.clone());
    let request = service
        .decline(auth.user_id, id)
        .await
        .map_err(|err| AppError::from_core(err, "failed to decline connection request"))?;

    Ok(Json(ConnectionResponse {
        relationship: Relationship::from_latest(auth.user_id, Some(&request)),
        request,
    }))
}

#[derive(Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

pub async fn cancel_connection(
    Path(id): Path<i64>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<CancelResponse>, AppError> {
    let service = ConnectionService::new(state.db.clone());
    let cancelled = service
        .cancel(auth.user_id, id)
        .await
        .map_err(|err| AppError::from_core(err, "failed to cancel connection request"))?;

    Ok(Json(CancelResponse { cancelled }))
}

#[derive(Serialize)]
pub struct UnfriendResponse {
    pub unfriended: bool,
}

pub async fn unfriend(
    Path(user_id): Path<i64>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<UnfriendResponse>, AppError> {
    let service = ConnectionService::new(state.db.clone());
    let unfriended = service
        .unfriend(auth.user_id, user_id)
        .await
        .map_err(|err| AppError::from_core(err, "failed to remove connection"))?;

    Ok(Json(UnfriendResponse { unfriended }))
}

#[derive(Serialize)]
pub struct RelationshipResponse {
    pub user_id: i64,
    pub relationship: Relationship,
    pub block: BlockStatus,
    pub can_interact: bool,
    pub latest_request: Option<ConnectionRequest>,
}

pub async fn connection_status(
    Path(user_id): Path<i64>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<RelationshipResponse>, AppError> {
    // A user is trivially connected to themselves, matching `are_friends(a, a)`.
    if user_id == auth.user_id {
        return Ok(Json(RelationshipResponse {
            user_id,
            relationship: Relationship::Myself,
            block: BlockStatus {
                is_blocking: false,
                is_blocked_by: false,
            },
            can_interact: true,
            latest_request: None,
        }));
    }

    let connections = ConnectionService::new(state.db.clone());
    let relationship = connections
        .relationship(auth.user_id, user_id)
        .await
        .map_err(|err| AppError::from_core(err, "failed to load relationship"))?;
    let latest_request = connections
        .latest(auth.user_id, user_id)
        .await
        .map_err(|err| AppError::from_core(err, "failed to load relationship"))?;
    let block = BlockService::new(state.db.clone())
        .block_status(auth.user_id, user_id)
        .await
        .map_err(|err| AppError::from_core(err, "failed to load block status"))?;
    let can_interact = ReputationGate::new(state.db.clone())
        .can_interact(auth.user_id, user_id)
        .await
        .map_err(|err| AppError::from_core(err, "failed to evaluate interaction"))?;

    Ok(Json(RelationshipResponse {
        user_id,
        relationship,
        block,
        can_interact,
        latest_request,
    }))
}

pub async fn incoming_requests(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<ListResponse<ConnectionRequest>>, AppError> {
    let service = ConnectionService::new(state.db.clone());
    let items = service
        .incoming_pending(auth.user_id)
        .await
        .map_err(|err| AppError::from_core(err, "failed to list incoming requests"))?;

    Ok(Json(ListResponse {
        items,
        next_cursor: None,
    }))
}

#[derive(Serialize)]
pub struct BlockResponse {
    pub blocked: bool,
}

pub async fn block_user(
    Path(id): Path<i64>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<BlockResponse>, AppError> {
    let service = BlockService::new(state.db.clone());
    let blocked = service
        .block(auth.user_id, id)
        .await
        .map_err(|err| AppError::from_core(err, "failed to block user"))?;

    Ok(Json(BlockResponse { blocked }))
}

#[derive(Serialize)]
pub struct UnblockResponse {
    pub unblocked: bool,
}

pub async fn unblock_user(
    Path(id): Path<i64>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<UnblockResponse>, AppError> {
    if auth.user_id == id {
        return Err(AppError::bad_request("cannot unblock yourself"));
    }

    let service = BlockService::new(state.db.clone());
    let unblocked = service
        .unblock(auth.user_id, id)
        .await
        .map_err(|err| AppError::from_core(err, "failed to unblock user"))?;

    Ok(Json(UnblockResponse { unblocked }))
}

pub async fn list_blocks(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<ListResponse<Block>>, AppError> {
    let service = BlockService::new(state.db.clone());
    let blocks = service
        .list_blocked(auth.user_id)
        .await
        .map_err(|err| AppError::from_core(err, "failed to list blocked users"))?;

    Ok(Json(ListResponse {
        items: blocks,
        next_cursor: None,
    }))
}

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub receiver_id: i64,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub has_media: bool,
}

#[derive(Serialize)]
pub struct SendMessageResponse {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plant_state: Option<StreakState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<i64>,
}

pub async fn send_message(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<SendMessageResponse>), AppError> {
    let service = MessagingService::new(state.db.clone(), state.policy());
    let outcome = service
        .send(auth.user_id, payload.receiver_id, &payload.text, payload.has_media)
        .await
        .map_err(|err| AppError::from_core(err, "failed to send message"))?;

    let response = match outcome {
        MessageOutcome::Allowed {
            message_id,
            plant_state,
        } => (
            StatusCode::CREATED,
            SendMessageResponse {
                allowed: true,
                message_id: Some(message_id),
                plant_state: Some(plant_state),
                reason: None,
                message: None,
                retry_after_seconds: None,
            },
        ),
        MessageOutcome::Rejected {
            reason,
            retry_after,
        } => (
            StatusCode::OK,
            SendMessageResponse {
                allowed: false,
                message_id: None,
                plant_state: None,
                reason: Some(reason),
                message: Some(reason.user_message()),
                retry_after_seconds: retry_after.map(seconds_until),
            },
        ),
    };

    Ok((response.0, Json(response.1)))
}

#[derive(Serialize)]
pub struct StreakResponse {
    pub user_id: i64,
    pub plant_state: StreakState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streak: Option<PairStreak>,
}

pub async fn get_streak(
    Path(user_id): Path<i64>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<StreakResponse>, AppError> {
    let pair = PairKey::normalize(auth.user_id, user_id)
        .map_err(|err| AppError::from_core(err, "failed to load streak"))?;

    let service = StreakService::new(state.db.clone(), state.policy.streak_offset);
    let streak = service
        .get(pair)
        .await
        .map_err(|err| AppError::from_core(err, "failed to load streak"))?;

    Ok(Json(StreakResponse {
        user_id,
        plant_state: streak
            .as_ref()
            .map(|streak| streak.state())
            .unwrap_or_default(),
        streak,
    }))
}

pub async fn my_trust(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<TrustSnapshot>, AppError> {
    let service = TrustService::new(state.db.clone(), state.policy.trust_points);
    let snapshot = service
        .snapshot(auth.user_id)
        .await
        .map_err(|err| AppError::from_core(err, "failed to load trust score"))?;

    Ok(Json(snapshot))
}

pub async fn my_trust_events(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<ListResponse<TrustEvent>>, AppError> {
    let (limit, before_id) = parse_page(&query)?;

    let service = TrustService::new(state.db.clone(), state.policy.trust_points);
    let events = service
        .history(auth.user_id, before_id, limit + 1)
        .await
        .map_err(|err| AppError::from_core(err, "failed to list trust events"))?;

    Ok(Json(page(events, limit, |event| event.id)))
}

#[derive(Serialize)]
pub struct PublicTrustResponse {
    pub user_id: i64,
    pub score: i64,
    pub tier: TrustTier,
    pub trusted: bool,
}

/// Another user's standing, without their event history.
pub async fn user_trust(
    Path(id): Path<i64>,
    _auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<PublicTrustResponse>, AppError> {
    if id <= 0 {
        return Err(AppError::bad_request("invalid user id"));
    }

    let service = TrustService::new(state.db.clone(), state.policy.trust_points);
    let score = service
        .score(id)
        .await
        .map_err(|err| AppError::from_core(err, "failed to load trust score"))?;

    Ok(Json(PublicTrustResponse {
        user_id: id,
        score,
        tier: TrustTier::of(score),
        trusted: score >= TRUSTED_THRESHOLD,
    }))
}

#[derive(Serialize)]
pub struct ChatStatusResponse {
    pub can_send: bool,
    pub strike_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<i64>,
}

pub async fn chat_status(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<ChatStatusResponse>, AppError> {
    let now = OffsetDateTime::now_utc();
    let (can_send, until) = ReputationGate::new(state.db.clone())
        .can_send(auth.user_id, now)
        .await
        .map_err(|err| AppError::from_core(err, "failed to load chat status"))?;
    let user = UserService::new(state.db.clone())
        .get_user(auth.user_id)
        .await
        .map_err(|err| AppError::from_core(err, "failed to load chat status"))?;

    Ok(Json(ChatStatusResponse {
        can_send,
        strike_count: user.map(|user| user.strike_count).unwrap_or(0),
        retry_after_seconds: until.map(seconds_until),
    }))
}

#[derive(Deserialize)]
pub struct FileReportRequest {
    pub reported_id: i64,
    pub context_type: String,
    pub context_id: Option<i64>,
    pub reason: String,
}

pub async fn file_report(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<FileReportRequest>,
) -> Result<(StatusCode, Json<Report>), AppError> {
    let service = ReportService::new(state.db.clone(), state.policy.trust_points);
    let report = service
        .file_report(
            auth.user_id,
            payload.reported_id,
            &payload.context_type,
            payload.context_id,
            &payload.reason,
        )
        .await
        .map_err(|err| AppError::from_core(err, "failed to file report"))?;

    Ok((StatusCode::CREATED, Json(report)))
}

#[derive(Deserialize)]
pub struct TrustEventRequest {
    pub user_id: i64,
    #[serde(flatten)]
    pub kind: TrustEventKind,
    #[serde(default)]
    pub details: String,
    pub ref_id: Option<i64>,
}

#[derive(Serialize)]
pub struct TrustScoreResponse {
    pub user_id: i64,
    pub score: i64,
    pub tier: TrustTier,
}

/// Completion events forwarded by the circle, meetup and review subsystems.
pub async fn record_trust_event(
    _admin: AdminToken,
    State(state): State<AppState>,
    Json(payload): Json<TrustEventRequest>,
) -> Result<Json<TrustScoreResponse>, AppError> {
    if matches!(payload.kind, TrustEventKind::AdminAdjustment { .. }) {
        return Err(AppError::bad_request(
            "use the trust-adjustment endpoint for manual adjustments",
        ));
    }

    let service = TrustService::new(state.db.clone(), state.policy.trust_points);
    let score = service
        .record(payload.user_id, &payload.kind, &payload.details, payload.ref_id)
        .await
        .map_err(|err| AppError::from_core(err, "failed to record trust event"))?;

    Ok(Json(TrustScoreResponse {
        user_id: payload.user_id,
        score,
        tier: TrustTier::of(score),
    }))
}

#[derive(Deserialize)]
pub struct TrustAdjustmentRequest {
    pub points: i64,
    pub reason: String,
}

pub async fn adjust_trust(
    Path(id): Path<i64>,
    _admin: AdminToken,
    State(state): State<AppState>,
    Json(payload): Json<TrustAdjustmentRequest>,
) -> Result<Json<TrustScoreResponse>, AppError> {
    if payload.points == 0 {
        return Err(AppError::bad_request("points must be non-zero"));
    }

    let service = TrustService::new(state.db.clone(), state.policy.trust_points);
    let score = service
        .record(
            id,
            &TrustEventKind::AdminAdjustment {
                points: payload.points,
            },
            payload.reason.trim(),
            None,
        )
        .await
        .map_err(|err| AppError::from_core(err, "failed to adjust trust score"))?;

    Ok(Json(TrustScoreResponse {
        user_id: id,
        score,
        tier: TrustTier::of(score),
    }))
}

pub async fn recompute_trust(
    Path(id): Path<i64>,
    _admin: AdminToken,
    State(state): State<AppState>,
) -> Result<Json<TrustScoreResponse>, AppError> {
    if id <= 0 {
        return Err(AppError::bad_request("invalid user id"));
    }

    let service = TrustService::new(state.db.clone(), state.policy.trust_points);
    let score = service
        .recompute(id)
        .await
        .map_err(|err| AppError::from_core(err, "failed to recompute trust score"))?;

    Ok(Json(TrustScoreResponse {
        user_id: id,
        score,
        tier: TrustTier::of(score),
    }))
}

#[derive(Deserialize)]
pub struct ReportListQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

pub async fn list_reports(
    _admin: AdminToken,
    State(state): State<AppState>,
    Query(query): Query<ReportListQuery>,
) -> Result<Json<ListResponse<Report>>, AppError> {
    let status = query
        .status
        .as_deref()
        .map(|status| {
            ReportStatus::from_db(status).ok_or_else(|| AppError::bad_request("invalid status"))
        })
        .transpose()?;
    let (limit, before_id) = parse_page(&PaginationQuery {
        limit: query.limit,
        cursor: query.cursor,
    })?;

    let service = ReportService::new(state.db.clone(), state.policy.trust_points);
    let reports = service
        .list(status, before_id, limit + 1)
        .await
        .map_err(|err| AppError::from_core(err, "failed to list reports"))?;

    Ok(Json(page(reports, limit, |report| report.id)))
}

#[derive(Deserialize)]
pub struct ReportStatusRequest {
    pub status: String,
}

pub async fn set_report_status(
    Path(id): Path<i64>,
    _admin: AdminToken,
    State(state): State<AppState>,
    Json(payload): Json<ReportStatusRequest>,
) -> Result<Json<Report>, AppError> {
    let status = ReportStatus::from_db(&payload.status)
        .ok_or_else(|| AppError::bad_request("invalid status"))?;

    let service = ReportService::new(state.db.clone(), state.policy.trust_points);
    let report = service
        .set_status(id, status)
        .await
        .map_err(|err| AppError::from_core(err, "failed to update report"))?;

    Ok(Json(report))
}

pub async fn moderation_audit(
    _admin: AdminToken,
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<ListResponse<ModerationEvent>>, AppError> {
    let (limit, before_id) = parse_page(&query)?;

    let service = ModerationService::new(state.db.clone(), state.policy());
    let events = service
        .audit(before_id, limit + 1)
        .await
        .map_err(|err| AppError::from_core(err, "failed to list moderation audit"))?;

    Ok(Json(page(events, limit, |event| event.id)))
}

pub async fn list_notifications(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<ListResponse<Notification>>, AppError> {
    let (limit, before_id) = parse_page(&query)?;

    let service = NotificationService::new(state.db.clone());
    let notifications = service
        .list(auth.user_id, before_id, limit + 1)
        .await
        .map_err(|err| AppError::from_core(err, "failed to list notifications"))?;

    Ok(Json(page(notifications, limit, |notification| notification.id)))
}

pub async fn mark_notification_read(
    auth: AuthUser,
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    let service = NotificationService::new(state.db.clone());
    let updated = service
        .mark_read(id, auth.user_id)
        .await
        .map_err(|err| AppError::from_core(err, "failed to mark notification read"))?;

    if updated {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("notification not found"))
    }
}
