#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::SqlitePool;
use time::macros::datetime;
use time::OffsetDateTime;
use tower::ServiceExt;

use reconnect::app::auth::AuthService;
use reconnect::config::policy::EnginePolicy;
use reconnect::config::AppConfig;
use reconnect::infra::db::Db;
use reconnect::AppState;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

// "0123456789abcdef0123456789abcdef" (32 bytes, test-only)
const TEST_PASETO_ACCESS_KEY: [u8; 32] = *b"0123456789abcdef0123456789abcdef";
const TEST_ADMIN_TOKEN: &str = "test-admin-token-12345";

/// 09:00 in the default UTC+8 streak timezone.
pub const DAY_ONE: OffsetDateTime = datetime!(2024-03-01 01:00 UTC);

static DB_COUNTER: AtomicU64 = AtomicU64::new(0);

// ---------------------------------------------------------------------------
// TestApp: one fresh SQLite database per test
// ---------------------------------------------------------------------------

pub struct TestApp {
    router: Router,
    pub state: AppState,
    db_path: PathBuf,
}

pub struct TestResponse {
    pub status: StatusCode,
    body_bytes: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body_bytes).unwrap_or(Value::Null)
    }

    pub fn error_message(&self) -> String {
        self.json()["error"].as_str().unwrap_or("").to_string()
    }
}

pub struct TestUser {
    pub id: i64,
    pub access_token: String,
}

pub async fn app() -> TestApp {
    TestApp::setup(EnginePolicy::default()).await
}

pub async fn app_with_policy(policy: EnginePolicy) -> TestApp {
    TestApp::setup(policy).await
}

impl TestApp {
    async fn setup(policy: EnginePolicy) -> Self {
        let db_path = std::env::temp_dir().join(format!(
            "reconnect-test-{}-{}-{}.db",
            std::process::id(),
            DB_COUNTER.fetch_add(1, Ordering::SeqCst),
            OffsetDateTime::now_utc().unix_timestamp_nanos()
        ));

        let config = AppConfig {
            http_addr: "127.0.0.1:0".into(),
            database_url: format!("sqlite://{}", db_path.display()),
            db_max_connections: 8,
            db_connect_timeout_seconds: 30,
            db_busy_timeout_seconds: 30,
            admin_token: Some(TEST_ADMIN_TOKEN.into()),
            paseto_access_key: TEST_PASETO_ACCESS_KEY,
            access_ttl_minutes: 15,
            request_body_limit_bytes: 65536,
            policy,
        };

        let db = Db::connect(&config).await.expect("Db::connect failed");
        db.migrate().await.expect("migrations failed");

        let state = AppState {
            db,
            policy: Arc::new(config.policy.clone()),
            admin_token: config.admin_token.clone(),
            paseto_access_key: config.paseto_access_key,
            access_ttl_minutes: config.access_ttl_minutes,
        };

        let router = reconnect::http::router(state.clone());

        TestApp {
            router,
            state,
            db_path,
        }
    }

    // ------------------------------------------------------------------
    // Low-level request helper
    // ------------------------------------------------------------------
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("host", "localhost");

        for &(key, value) in headers {
            builder = builder.header(key, value);
        }

        let request = if let Some(body) = body {
            builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap()
        } else {
            builder.body(Body::empty()).unwrap()
        };

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("oneshot failed");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("failed to collect body")
            .to_bytes();

        TestResponse { status, body_bytes }
    }

    // ------------------------------------------------------------------
    // Convenience HTTP helpers
    // ------------------------------------------------------------------
    pub async fn get(&self, path: &str, token: Option<&str>) -> TestResponse {
        let mut headers = vec![];
        let auth;
        if let Some(t) = token {
            auth = format!("Bearer {}", t);
            headers.push(("Authorization", auth.as_str()));
        }
        self.request(Method::GET, path, None, &headers).await
    }

    pub async fn post_json(&self, path: &str, body: Value, token: Option<&str>) -> TestResponse {
        let mut headers = vec![];
        let auth;
        if let Some(t) = token {
            auth = format!("Bearer {}", t);
            headers.push(("Authorization", auth.as_str()));
        }
        self.request(Method::POST, path, Some(body), &headers).await
    }

    /// POST with an admin token in the x-admin-token header.
    pub async fn post_admin(
        &self,
        path: &str,
        body: Value,
        admin_token: Option<&str>,
    ) -> TestResponse {
        let mut headers = vec![];
        if let Some(t) = admin_token {
            headers.push(("x-admin-token", t));
        }
        self.request(Method::POST, path, Some(body), &headers).await
    }

    /// GET with an admin token in the x-admin-token header.
    pub async fn get_admin(&self, path: &str, admin_token: Option<&str>) -> TestResponse {
        let mut headers = vec![];
        if let Some(t) = admin_token {
            headers.push(("x-admin-token", t));
        }
        self.request(Method::GET, path, None, &headers).await
    }

    // ------------------------------------------------------------------
    // Test data helpers
    // ------------------------------------------------------------------

    /// Mint an access token for `id` the way the account service would.
    pub fn user(&self, id: i64) -> TestUser {
        let auth_service = AuthService::new(
            self.state.paseto_access_key,
            self.state.access_ttl_minutes,
        );
        let token = auth_service
            .issue_access_token(id)
            .expect("issue_access_token failed");

        TestUser {
            id,
            access_token: token.token,
        }
    }

    /// Return the admin token used by the test infrastructure.
    pub fn admin_token(&self) -> &str {
        TEST_ADMIN_TOKEN
    }

    pub fn db(&self) -> Db {
        self.state.db.clone()
    }

    pub fn policy(&self) -> EnginePolicy {
        self.state.policy()
    }

    /// Return the pool for direct DB assertions.
    pub fn pool(&self) -> &SqlitePool {
        self.state.db.pool()
    }

    /// Make two users friends through the service layer.
    pub async fn befriend(&self, a: i64, b: i64) {
        let connections = reconnect::app::connections::ConnectionService::new(self.db());
        let request = connections.request(a, b).await.expect("request failed");
        connections
            .accept(b, request.id)
            .await
            .expect("accept failed");
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let mut path = self.db_path.clone().into_os_string();
            path.push(suffix);
            let _ = std::fs::remove_file(path);
        }
    }
}
