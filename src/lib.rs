pub mod app;
pub mod config;
pub mod domain;
pub mod http;
pub mod infra;

use std::sync::Arc;

use crate::config::policy::EnginePolicy;
use crate::infra::db::Db;

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub policy: Arc<EnginePolicy>,
    pub admin_token: Option<String>,
    pub paseto_access_key: [u8; 32],
    pub access_ttl_minutes: u64,
}

impl AppState {
    pub fn policy(&self) -> EnginePolicy {
        self.policy.as_ref().clone()
    }
}
