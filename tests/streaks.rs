//! Engagement streak tests
//!
//! Covers daily advancement, lapses, the stage ladder and concurrent writers.

mod common;

use axum::http::StatusCode;
use common::{app, DAY_ONE};
use time::macros::date;
use time::Duration;

use reconnect::app::messaging::MessagingService;
use reconnect::app::streaks::StreakService;
use reconnect::domain::message::MessageOutcome;
use reconnect::domain::pair::PairKey;
use reconnect::domain::streak::{civil_date, is_qualifying_message, GrowthStage, StreakState};

fn pair(a: i64, b: i64) -> PairKey {
    PairKey::normalize(a, b).unwrap()
}

#[test]
fn pair_key_ignores_order() {
    let key = pair(9, 4);
    assert_eq!(key, pair(4, 9));
    assert_eq!((key.lo(), key.hi()), (4, 9));
    assert!(key.contains(9));
    assert_eq!(key.other(4), Some(9));
    assert_eq!(key.other(5), None);
    assert!(PairKey::normalize(3, 3).is_err());
    assert!(PairKey::normalize(0, 3).is_err());
}

#[tokio::test]
async fn fresh_pair_is_a_seed() {
    let app = app().await;
    let service = StreakService::new(app.db(), app.policy().streak_offset);

    let state = service.current_state(pair(1, 2)).await.unwrap();
    assert_eq!(state, StreakState::default());
    assert_eq!(state.stage, GrowthStage::Seed);
}

#[tokio::test]
async fn consecutive_days_extend_the_streak() {
    let app = app().await;
    let service = StreakService::new(app.db(), app.policy().streak_offset);
    let key = pair(1, 2);

    let mut day = date!(2024 - 03 - 01);
    let mut last = StreakState::default();
    for expected in 1..=7 {
        last = service.advance(key, day).await.unwrap();
        assert_eq!(last.streak, expected);
        assert!(last.longest >= last.streak);
        day = day.next_day().unwrap();
    }

    assert_eq!(last.stage, GrowthStage::Thriving);
    assert_eq!(last.last_streak_date, Some(date!(2024 - 03 - 07)));
}

#[tokio::test]
async fn same_day_counts_once() {
    let app = app().await;
    let service = StreakService::new(app.db(), app.policy().streak_offset);
    let key = pair(1, 2);
    let day = date!(2024 - 03 - 01);

    for _ in 0..50 {
        service.advance(key, day).await.unwrap();
    }

    let state = service.current_state(key).await.unwrap();
    assert_eq!(state.streak, 1);
    assert_eq!(state.longest, 1);
}

#[tokio::test]
async fn lapse_resets_but_keeps_longest() {
    let app = app().await;
    let service = StreakService::new(app.db(), app.policy().streak_offset);
    let key = pair(1, 2);

    service.advance(key, date!(2024 - 03 - 01)).await.unwrap();
    service.advance(key, date!(2024 - 03 - 02)).await.unwrap();
    service.advance(key, date!(2024 - 03 - 03)).await.unwrap();

    let reset = service.advance(key, date!(2024 - 03 - 06)).await.unwrap();
    assert_eq!(reset.streak, 1);
    assert_eq!(reset.longest, 3);
    assert_eq!(reset.stage, GrowthStage::Sprout);
}

#[tokio::test]
async fn earlier_date_never_moves_backwards() {
    let app = app().await;
    let service = StreakService::new(app.db(), app.policy().streak_offset);
    let key = pair(1, 2);

    service.advance(key, date!(2024 - 03 - 05)).await.unwrap();
    let state = service.advance(key, date!(2024 - 03 - 02)).await.unwrap();

    assert_eq!(state.streak, 1);
    assert_eq!(state.last_streak_date, Some(date!(2024 - 03 - 05)));
}

#[tokio::test]
async fn either_member_advances_the_shared_counter() {
    let app = app().await;
    app.befriend(1, 2).await;
    let messaging = MessagingService::new(app.db(), app.policy());

    messaging
        .send_at(1, 2, "morning! slept well?", false, DAY_ONE)
        .await
        .unwrap();
    let outcome = messaging
        .send_at(2, 1, "yes, you too?", false, DAY_ONE + Duration::days(1))
        .await
        .unwrap();

    match outcome {
        MessageOutcome::Allowed { plant_state, .. } => assert_eq!(plant_state.streak, 2),
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn short_text_does_not_count() {
    let app = app().await;
    app.befriend(1, 2).await;
    let messaging = MessagingService::new(app.db(), app.policy());

    let outcome = messaging.send_at(1, 2, " ok ", false, DAY_ONE).await.unwrap();
    match outcome {
        MessageOutcome::Allowed { plant_state, .. } => {
            assert_eq!(plant_state, StreakState::default())
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    let outcome = messaging.send_at(1, 2, "", true, DAY_ONE).await.unwrap();
    match outcome {
        MessageOutcome::Allowed { plant_state, .. } => assert_eq!(plant_state.streak, 1),
        other => panic!("unexpected outcome {:?}", other),
    }

    assert!(!is_qualifying_message("hey!", false));
    assert!(is_qualifying_message("hey you", false));
}

#[tokio::test]
async fn day_boundary_follows_configured_offset() {
    let app = app().await;
    let offset = app.policy().streak_offset;

    // 15:59 UTC is 23:59 in UTC+8; 16:00 UTC is already the next day.
    let before = time::macros::datetime!(2024-03-01 15:59 UTC);
    let after = time::macros::datetime!(2024-03-01 16:00 UTC);
    assert_eq!(civil_date(before, offset), date!(2024 - 03 - 01));
    assert_eq!(civil_date(after, offset), date!(2024 - 03 - 02));

    app.befriend(1, 2).await;
    let messaging = MessagingService::new(app.db(), app.policy());
    messaging.send_at(1, 2, "late night hello", false, before).await.unwrap();
    let outcome = messaging.send_at(2, 1, "early morning reply", false, after).await.unwrap();
    match outcome {
        MessageOutcome::Allowed { plant_state, .. } => assert_eq!(plant_state.streak, 2),
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn concurrent_advances_on_one_day_increment_once() {
    let app = app().await;
    let service = StreakService::new(app.db(), app.policy().streak_offset);
    let key = pair(7, 8);
    service.advance(key, date!(2024 - 03 - 01)).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..12 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            reconnect::infra::db::retry_on_conflict(|| service.advance(key, date!(2024 - 03 - 02)))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let state = service.current_state(key).await.unwrap();
    assert_eq!(state.streak, 2);
    assert_eq!(state.longest, 2);
}

#[tokio::test]
async fn http_streak_view() {
    let app = app().await;
    let alice = app.user(10);
    app.befriend(10, 20).await;

    let resp = app.get("/v1/streaks/20", Some(&alice.access_token)).await;
    assert_eq!(resp.status, StatusCode::OK);
    let body = resp.json();
    assert_eq!(body["plant_state"]["streak"], 0);
    assert_eq!(body["plant_state"]["stage"], "seed");

    let resp = app
        .post_json(
            "/v1/messages",
            serde_json::json!({ "receiver_id": 20, "text": "hello there" }),
            Some(&alice.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::CREATED);
    assert_eq!(resp.json()["plant_state"]["streak"], 1);

    let resp = app.get("/v1/streaks/20", Some(&alice.access_token)).await;
    let body = resp.json();
    assert_eq!(body["plant_state"]["streak"], 1);
    assert_eq!(body["plant_state"]["stage"], "sprout");
}
