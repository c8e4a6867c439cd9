//! Configuration for the Mission Control gateway.
//!
//! Everything comes from environment variables (plus an optional `.env`
//! file). The agent maps are parsed once at startup and read-only after;
//! the known-agents set is the one piece of external state that stays
//! live, because it mirrors a directory other tools mutate.

use std::collections::{HashMap, HashSet};
use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// Upstream coordinates for one proxied agent.
#[derive(Debug, Clone)]
pub struct AgentUpstream {
    /// Base URL without a trailing slash, e.g. `http://agent-metrics:26216`.
    pub base_url: String,
    /// Credential injected on the upstream hop; `None` when the configured
    /// value was a placeholder.
    pub token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server configuration
    pub server_host: String,
    pub server_port: u16,

    /// Shared bearer token for `/v1` and `/ws/events`; unset disables auth
    pub auth_token: Option<String>,

    /// Database connection
    pub database_url: String,
    pub database_max_connections: u32,

    /// Stream broker; unset selects the in-process broker
    pub broker_url: Option<String>,
    pub stream_key: String,

    /// Chat proxy registry: slug -> upstream
    pub agents: HashMap<String, AgentUpstream>,
    /// Scheme for injected upstream credentials (`Bearer` unless overridden)
    pub upstream_scheme: String,

    /// Directory whose subdirectory names form the known-agents set
    pub agent_homes_dir: Option<PathBuf>,

    /// CORS configuration
    pub cors_allowed_origins: Vec<String>,

    /// Log output: `compact` or `json`
    pub log_format: String,
}

/// Values operators leave behind from setup templates; treated as "no
/// token configured" rather than sent upstream.
fn is_placeholder_token(value: &str) -> bool {
    let v = value.trim();
    v.is_empty()
        || v.starts_with("CHANGE_ME")
        || v == "TODO"
        || v == "REPLACE_ME"
        || v == "YOUR_TOKEN"
}

fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Parse a `slug=value,slug=value` map, validating slugs.
fn parse_pair_map(raw: &str, var_name: &str) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let Some((slug, value)) = part.split_once('=') else {
            bail!("{var_name}: entry {part:?} is not slug=value");
        };
        let slug = slug.trim();
        if !is_valid_slug(slug) {
            bail!("{var_name}: invalid agent slug {slug:?}");
        }
        pairs.push((slug.to_string(), value.trim().to_string()));
    }
    Ok(pairs)
}

/// Build the proxy registry from the token map, the upstream override map,
/// and the upstream template. A slug appearing in either map is proxied.
fn build_agents(
    token_map: Vec<(String, String)>,
    upstream_map: Vec<(String, String)>,
    template: &str,
) -> HashMap<String, AgentUpstream> {
    let mut agents: HashMap<String, AgentUpstream> = HashMap::new();

    for (slug, url) in upstream_map {
        let base_url = url.trim_end_matches('/').to_string();
        agents.insert(slug, AgentUpstream {
            base_url,
            token: None,
        });
    }

    for (slug, token) in token_map {
        let token = if is_placeholder_token(&token) {
            None
        } else {
            Some(token)
        };
        match agents.get_mut(&slug) {
            Some(upstream) => upstream.token = token,
            None => {
                let base_url = template
                    .replace("{slug}", &slug)
                    .trim_end_matches('/')
                    .to_string();
                agents.insert(slug, AgentUpstream {
                    base_url,
                    token,
                });
            }
        }
    }

    agents
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let token_map = parse_pair_map(
            &env::var("AGENT_TOKEN_MAP").unwrap_or_default(),
            "AGENT_TOKEN_MAP",
        )?;
        let upstream_map = parse_pair_map(
            &env::var("AGENT_UPSTREAM_MAP").unwrap_or_default(),
            "AGENT_UPSTREAM_MAP",
        )?;
        let template = env::var("CHAT_UPSTREAM_TEMPLATE")
            .unwrap_or_else(|_| "http://agent-{slug}:26216".to_string());

        Ok(Config {
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8910".to_string())
                .parse()
                .context("Failed to parse SERVER_PORT")?,

            auth_token: env::var("AUTH_TOKEN").ok().filter(|t| !t.trim().is_empty()),

            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://mission_control.db".to_string()),
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("Failed to parse DATABASE_MAX_CONNECTIONS")?,

            broker_url: env::var("BROKER_URL").ok().filter(|u| !u.trim().is_empty()),
            stream_key: env::var("STREAM_KEY").unwrap_or_else(|_| "mc:events".to_string()),

            agents: build_agents(token_map, upstream_map, &template),
            upstream_scheme: env::var("UPSTREAM_SCHEME")
                .unwrap_or_else(|_| "Bearer".to_string()),

            agent_homes_dir: env::var("AGENT_HOMES_DIR").ok().map(PathBuf::from),

            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "*".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),

            log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "compact".to_string()),
        })
    }

    /// Slugs considered legitimate handoff targets, scanned fresh from the
    /// agent-homes directory. Empty when no directory is configured (which
    /// disables handoff target membership checks).
    pub fn known_agents(&self) -> HashSet<String> {
        let Some(dir) = &self.agent_homes_dir else {
            return HashSet::new();
        };
        let Ok(entries) = std::fs::read_dir(dir) else {
            return HashSet::new();
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect()
    }
}
