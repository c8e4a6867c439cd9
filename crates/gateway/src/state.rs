/*!
 * Application State
 *
 * Shared state for the gateway. Constructed once at startup with explicit
 * dependencies; handlers clone it freely (everything inside is a handle).
 */

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use mission_common::StreamBroker;
use mission_config::Config;
use sqlx::SqlitePool;

/// Upstream chat hops are bounded so a stuck agent container cannot pin a
/// proxy task forever.
pub const PROXY_HTTP_TIMEOUT: Duration = Duration::from_secs(20);

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub broker: Arc<dyn StreamBroker>,
    pub config: Arc<Config>,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(pool: SqlitePool, broker: Arc<dyn StreamBroker>, config: Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(PROXY_HTTP_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(AppState {
            pool,
            broker,
            config: Arc::new(config),
            http,
        })
    }
}

// Implement FromRef to allow extracting individual pieces from AppState
impl axum::extract::FromRef<AppState> for SqlitePool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

impl axum::extract::FromRef<AppState> for Arc<Config> {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}
