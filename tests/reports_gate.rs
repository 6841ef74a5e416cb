//! Reports, the reputation gate and notification inbox tests

mod common;

use axum::http::StatusCode;
use common::{app, DAY_ONE};
use serde_json::json;
use time::{Duration, OffsetDateTime};

use reconnect::app::blocks::BlockService;
use reconnect::app::connections::ConnectionService;
use reconnect::app::gate::ReputationGate;
use reconnect::app::messaging::MessagingService;
use reconnect::app::moderation::ModerationService;
use reconnect::app::reports::ReportService;
use reconnect::app::trust::TrustService;
use reconnect::domain::error::CoreError;
use reconnect::domain::message::{MessageOutcome, RejectReason};
use reconnect::domain::moderation::ReportStatus;
use reconnect::infra::db::retry_on_conflict;

// ===========================================================================
// Reports
// ===========================================================================

#[tokio::test]
async fn file_report_validates_input() {
    let app = app().await;
    let service = ReportService::new(app.db(), app.policy().trust_points);

    let err = service
        .file_report(1, 1, "chat", None, "spam")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidPair));

    let err = service
        .file_report(1, 2, "chat", None, "   ")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidInput(_)));

    let err = service
        .file_report(1, 2, "", None, "spam")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidInput(_)));

    let err = service
        .file_report(1, 2, "chat", None, &"x".repeat(1001))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidInput(_)));

    let report = service
        .file_report(1, 2, "profile", Some(2), "  fake photos ")
        .await
        .unwrap();
    assert_eq!(report.reporter_id, Some(1));
    assert_eq!(report.reported_id, 2);
    assert_eq!(report.reason, "fake photos");
    assert_eq!(report.status, ReportStatus::Pending);
    assert!(report.evidence.is_none());
}

#[tokio::test]
async fn confirming_penalizes_exactly_once() {
    let app = app().await;
    let reports = ReportService::new(app.db(), app.policy().trust_points);
    let trust = TrustService::new(app.db(), app.policy().trust_points);

    let report = reports
        .file_report(1, 2, "chat", None, "harassment")
        .await
        .unwrap();

    let confirmed = reports
        .set_status(report.id, ReportStatus::Confirmed)
        .await
        .unwrap();
    assert_eq!(confirmed.status, ReportStatus::Confirmed);
    assert_eq!(trust.score(2).await.unwrap(), 35);

    let again = reports
        .set_status(report.id, ReportStatus::Confirmed)
        .await
        .unwrap();
    assert_eq!(again.status, ReportStatus::Confirmed);
    assert_eq!(trust.score(2).await.unwrap(), 35);

    let resolved = reports
        .set_status(report.id, ReportStatus::Resolved)
        .await
        .unwrap();
    assert_eq!(resolved.status, ReportStatus::Resolved);
    assert_eq!(trust.score(2).await.unwrap(), 35);

    let (event_type, ref_id): (String, Option<i64>) =
        sqlx::query_as("SELECT event_type, ref_id FROM trust_events WHERE user_id = 2")
            .fetch_one(app.pool())
            .await
            .unwrap();
    assert_eq!(event_type, "report_confirmed");
    assert_eq!(ref_id, Some(report.id));
}

#[tokio::test]
async fn disallowed_transitions_are_ignored() {
    let app = app().await;
    let reports = ReportService::new(app.db(), app.policy().trust_points);
    let trust = TrustService::new(app.db(), app.policy().trust_points);

    let report = reports
        .file_report(1, 2, "chat", None, "spam")
        .await
        .unwrap();
    let invalid = reports
        .set_status(report.id, ReportStatus::Invalid)
        .await
        .unwrap();
    assert_eq!(invalid.status, ReportStatus::Invalid);

    let still_invalid = reports
        .set_status(report.id, ReportStatus::Confirmed)
        .await
        .unwrap();
    assert_eq!(still_invalid.status, ReportStatus::Invalid);
    assert_eq!(trust.score(2).await.unwrap(), 50);

    let err = reports
        .set_status(9999, ReportStatus::Resolved)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)));
}

#[tokio::test]
async fn block_snapshots_conversation_into_pending_reports() {
    let app = app().await;
    app.befriend(1, 2).await;
    let messaging = MessagingService::new(app.db(), app.policy());
    messaging
        .send_at(2, 1, "first message here", false, DAY_ONE)
        .await
        .unwrap();
    messaging
        .send_at(1, 2, "second message here", false, DAY_ONE + Duration::minutes(1))
        .await
        .unwrap();

    let reports = ReportService::new(app.db(), app.policy().trust_points);
    let report = reports
        .file_report(1, 2, "chat", None, "made me uncomfortable")
        .await
        .unwrap();
    // Someone else's report about the same user is left alone.
    let unrelated = reports
        .file_report(3, 2, "profile", None, "spam profile")
        .await
        .unwrap();

    BlockService::new(app.db()).block(1, 2).await.unwrap();

    let report = reports.get(report.id).await.unwrap().unwrap();
    let evidence = report.evidence.expect("evidence captured");
    let messages = evidence["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["body"], "first message here");
    assert_eq!(messages[1]["body"], "second message here");
    assert!(evidence["captured_at"].as_i64().unwrap() > 0);

    let unrelated = reports.get(unrelated.id).await.unwrap().unwrap();
    assert!(unrelated.evidence.is_none());

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
        .fetch_one(app.pool())
        .await
        .unwrap();
    assert_eq!(remaining, 0);
}

#[tokio::test]
async fn http_report_review_flow() {
    let app = app().await;
    let alice = app.user(10);
    let admin = app.admin_token().to_string();

    let resp = app
        .post_json(
            "/v1/reports",
            json!({ "reported_id": 20, "context_type": "chat", "reason": "abusive messages" }),
            Some(&alice.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::CREATED);
    let report_id = resp.json()["id"].as_i64().unwrap();

    let resp = app
        .post_json(
            "/v1/reports",
            json!({ "reported_id": 10, "context_type": "chat", "reason": "me" }),
            Some(&alice.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);

    let resp = app
        .get_admin("/v1/admin/reports?status=pending", Some(&admin))
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json()["items"][0]["id"], report_id);

    let resp = app
        .post_admin(
            &format!("/v1/admin/reports/{}/status", report_id),
            json!({ "status": "valid" }),
            Some(&admin),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json()["status"], "confirmed");

    let resp = app
        .post_admin(
            &format!("/v1/admin/reports/{}/status", report_id),
            json!({ "status": "bogus" }),
            Some(&admin),
        )
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);

    let resp = app.get("/v1/users/20/trust", Some(&alice.access_token)).await;
    assert_eq!(resp.json()["score"], 35);

    let resp = app
        .get_admin("/v1/admin/reports?status=pending", Some(&admin))
        .await;
    assert!(resp.json()["items"].as_array().unwrap().is_empty());
}

// ===========================================================================
// Reputation gate
// ===========================================================================

#[tokio::test]
async fn strangers_cannot_interact() {
    let app = app().await;
    let gate = ReputationGate::new(app.db());

    assert!(!gate.can_interact(1, 2).await.unwrap());
    assert!(matches!(
        gate.can_interact(1, 1).await.unwrap_err(),
        CoreError::InvalidPair
    ));

    let messaging = MessagingService::new(app.db(), app.policy());
    let outcome = messaging
        .send_at(1, 2, "hello stranger", false, DAY_ONE)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        MessageOutcome::Rejected {
            reason: RejectReason::NotAllowed,
            retry_after: None,
        }
    );
}

#[tokio::test]
async fn history_keeps_interaction_open_after_unfriend() {
    let app = app().await;
    let gate = ReputationGate::new(app.db());
    app.befriend(1, 2).await;
    assert!(gate.can_interact(1, 2).await.unwrap());
    assert!(gate.can_interact(2, 1).await.unwrap());

    let messaging = MessagingService::new(app.db(), app.policy());
    messaging
        .send_at(1, 2, "hello friend", false, DAY_ONE)
        .await
        .unwrap();

    // A prior conversation is enough on its own.
    sqlx::query("DELETE FROM connection_requests")
        .execute(app.pool())
        .await
        .unwrap();
    assert!(gate.can_interact(1, 2).await.unwrap());

    BlockService::new(app.db()).block(2, 1).await.unwrap();
    assert!(!gate.can_interact(1, 2).await.unwrap());
}

#[tokio::test]
async fn can_send_reflects_cooldown() {
    let app = app().await;
    let gate = ReputationGate::new(app.db());
    let now = OffsetDateTime::now_utc();

    assert_eq!(gate.can_send(5, now).await.unwrap(), (true, None));

    let moderation = ModerationService::new(app.db(), app.policy());
    moderation.evaluate_at(5, "loser", now).await.unwrap();
    assert_eq!(gate.can_send(5, now).await.unwrap(), (true, None));

    moderation.evaluate_at(5, "loser", now).await.unwrap();
    let (allowed, until) = gate.can_send(5, now).await.unwrap();
    assert!(!allowed);
    assert_eq!(until, Some(now + Duration::minutes(10)));

    let later = now + Duration::minutes(10);
    assert_eq!(gate.can_send(5, later).await.unwrap(), (true, None));
}

async fn pair_message_count(app: &common::TestApp, a: i64, b: i64) -> i64 {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM messages \
         WHERE (sender_id = $1 AND receiver_id = $2) OR (sender_id = $2 AND receiver_id = $1)",
    )
    .bind(a)
    .bind(b)
    .fetch_one(app.pool())
    .await
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn send_racing_unfriend_leaves_no_messages() {
    let app = app().await;
    let messaging = MessagingService::new(app.db(), app.policy());
    let connections = ConnectionService::new(app.db());
    let gate = ReputationGate::new(app.db());

    for i in 0..25 {
        let (a, b) = (1000 + 2 * i, 1001 + 2 * i);
        app.befriend(a, b).await;

        let send = {
            let messaging = messaging.clone();
            tokio::spawn(async move {
                messaging
                    .send_at(a, b, "are we still on for tonight", false, DAY_ONE)
                    .await
            })
        };
        let unfriend = {
            let connections = connections.clone();
            tokio::spawn(async move { retry_on_conflict(|| connections.unfriend(b, a)).await })
        };

        send.await.unwrap().unwrap();
        assert!(unfriend.await.unwrap().unwrap());

        assert_eq!(pair_message_count(&app, a, b).await, 0, "pair {a}-{b}");
        assert!(!gate.can_interact(a, b).await.unwrap());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn send_racing_block_leaves_no_messages() {
    let app = app().await;
    let messaging = MessagingService::new(app.db(), app.policy());
    let blocks = BlockService::new(app.db());

    for i in 0..25 {
        let (a, b) = (3000 + 2 * i, 3001 + 2 * i);
        app.befriend(a, b).await;

        let send = {
            let messaging = messaging.clone();
            tokio::spawn(async move {
                messaging
                    .send_at(a, b, "did you see my last message", false, DAY_ONE)
                    .await
            })
        };
        let block = {
            let blocks = blocks.clone();
            tokio::spawn(async move { retry_on_conflict(|| blocks.block(b, a)).await })
        };

        send.await.unwrap().unwrap();
        assert!(block.await.unwrap().unwrap());

        assert_eq!(pair_message_count(&app, a, b).await, 0, "pair {a}-{b}");
        let outcome = messaging
            .send_at(a, b, "hello again?", false, DAY_ONE)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            MessageOutcome::Rejected {
                reason: RejectReason::NotAllowed,
                retry_after: None,
            }
        );
    }
}

// ===========================================================================
// Notification inbox
// ===========================================================================

#[tokio::test]
async fn http_notifications_list_and_mark_read() {
    let app = app().await;
    let alice = app.user(10);
    let bob = app.user(20);

    let resp = app
        .post_json("/v1/connections/20/request", json!({}), Some(&alice.access_token))
        .await;
    assert_eq!(resp.status, StatusCode::OK);

    let resp = app.get("/v1/notifications", Some(&bob.access_token)).await;
    assert_eq!(resp.status, StatusCode::OK);
    let body = resp.json();
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["notification_type"], "match_request");
    assert_eq!(items[0]["actor_id"], 10);
    assert!(items[0]["read_at"].is_null());
    let notification_id = items[0]["id"].as_i64().unwrap();

    // Only the recipient may mark it.
    let resp = app
        .post_json(
            &format!("/v1/notifications/{}/read", notification_id),
            json!({}),
            Some(&alice.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);

    let resp = app
        .post_json(
            &format!("/v1/notifications/{}/read", notification_id),
            json!({}),
            Some(&bob.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);

    let resp = app.get("/v1/notifications", Some(&bob.access_token)).await;
    assert!(resp.json()["items"][0]["read_at"].is_string());
}
