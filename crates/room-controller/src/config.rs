//! Room Controller configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.
//!
//! Each component receives its own section (`LockConfig`, `RoomConfig`,
//! `PresenceConfig`, `JanitorConfig`, `AgentConfig`); the sections implement
//! `Default` with the production values so tests can override single fields.

use secrecy::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8090";

/// Default media engine URL.
pub const DEFAULT_MEDIA_URL: &str = "http://localhost:7880";

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "rc";

pub const DEFAULT_ROOM_LOCK_TTL_SECONDS: u64 = 60;
pub const DEFAULT_LOCK_POLL_INTERVAL_MS: u64 = 250;
pub const DEFAULT_LOCK_MAX_WAIT_SECONDS: u64 = 30;

pub const DEFAULT_EMPTY_TIMEOUT_SECONDS: u32 = 1800;
pub const DEFAULT_MAX_ROOM_DURATION_MINUTES: u64 = 0;
pub const DEFAULT_ENDED_ROOM_RETENTION_SECONDS: u64 = 600;

pub const DEFAULT_PRESENCE_OFFLINE_GRACE_SECONDS: u64 = 5;
pub const DEFAULT_PRESENCE_CLEANUP_GRACE_SECONDS: u64 = 30;
pub const DEFAULT_PRESENCE_MAX_PING_GAP_SECONDS: u64 = 60;

pub const DEFAULT_JANITOR_TICK_SECONDS: u64 = 5;
pub const DEFAULT_JANITOR_PRESENCE_INTERVAL_SECONDS: u64 = 60;
pub const DEFAULT_JANITOR_DRIFT_INTERVAL_SECONDS: u64 = 300;
pub const DEFAULT_JANITOR_CLEANUP_INTERVAL_SECONDS: u64 = 3600;
pub const DEFAULT_JANITOR_TASK_LOCK_TTL_SECONDS: u64 = 60;
pub const DEFAULT_ARTIFACT_RETENTION_HOURS: u64 = 72;

pub const DEFAULT_AGENT_LEASE_TTL_SECONDS: u64 = 30;
pub const DEFAULT_AGENT_REFRESH_INTERVAL_SECONDS: u64 = 15;

/// Room-creation lock timings.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// TTL of the room-creation lock.
    pub room_lock_ttl: Duration,
    /// Interval between `TryAcquire` / existence polls.
    pub poll_interval: Duration,
    /// Maximum time to wait for acquisition or for an in-flight creation.
    pub max_wait: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            room_lock_ttl: Duration::from_secs(DEFAULT_ROOM_LOCK_TTL_SECONDS),
            poll_interval: Duration::from_millis(DEFAULT_LOCK_POLL_INTERVAL_MS),
            max_wait: Duration::from_secs(DEFAULT_LOCK_MAX_WAIT_SECONDS),
        }
    }
}

/// Room lifecycle defaults and policy.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Media room empty timeout applied when the request omits one.
    pub default_empty_timeout_seconds: u32,
    /// Upper bound on requested durations; 0 means unlimited.
    pub max_duration_minutes: u64,
    /// How long an Ended state entry is kept for late webhooks.
    pub ended_room_retention: Duration,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            default_empty_timeout_seconds: DEFAULT_EMPTY_TIMEOUT_SECONDS,
            max_duration_minutes: DEFAULT_MAX_ROOM_DURATION_MINUTES,
            ended_room_retention: Duration::from_secs(DEFAULT_ENDED_ROOM_RETENTION_SECONDS),
        }
    }
}

/// Presence grace windows.
#[derive(Debug, Clone)]
pub struct PresenceConfig {
    /// Disconnected → Offline check delay.
    pub offline_grace: Duration,
    /// Offline → resource cleanup check delay (after `offline_grace`).
    pub cleanup_grace: Duration,
    /// Maximum allowed gap between pings before the janitor forces Offline.
    pub max_ping_gap: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            offline_grace: Duration::from_secs(DEFAULT_PRESENCE_OFFLINE_GRACE_SECONDS),
            cleanup_grace: Duration::from_secs(DEFAULT_PRESENCE_CLEANUP_GRACE_SECONDS),
            max_ping_gap: Duration::from_secs(DEFAULT_PRESENCE_MAX_PING_GAP_SECONDS),
        }
    }
}

/// Janitor schedule.
#[derive(Debug, Clone)]
pub struct JanitorConfig {
    /// Base tick; the duration-expiry sweep runs on every tick.
    pub tick_interval: Duration,
    pub presence_interval: Duration,
    pub drift_interval: Duration,
    pub cleanup_interval: Duration,
    /// TTL of each named task lock.
    pub task_lock_ttl: Duration,
    /// Directory holding backup/export artifacts; cleanup disabled when `None`.
    pub artifacts_dir: Option<PathBuf>,
    pub artifact_retention: Duration,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(DEFAULT_JANITOR_TICK_SECONDS),
            presence_interval: Duration::from_secs(DEFAULT_JANITOR_PRESENCE_INTERVAL_SECONDS),
            drift_interval: Duration::from_secs(DEFAULT_JANITOR_DRIFT_INTERVAL_SECONDS),
            cleanup_interval: Duration::from_secs(DEFAULT_JANITOR_CLEANUP_INTERVAL_SECONDS),
            task_lock_ttl: Duration::from_secs(DEFAULT_JANITOR_TASK_LOCK_TTL_SECONDS),
            artifacts_dir: None,
            artifact_retention: Duration::from_secs(DEFAULT_ARTIFACT_RETENTION_HOURS * 3600),
        }
    }
}

/// Agent lease timings.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub lease_ttl: Duration,
    pub refresh_interval: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            lease_ttl: Duration::from_secs(DEFAULT_AGENT_LEASE_TTL_SECONDS),
            refresh_interval: Duration::from_secs(DEFAULT_AGENT_REFRESH_INTERVAL_SECONDS),
        }
    }
}

/// Media engine connection settings.
#[derive(Clone)]
pub struct MediaEngineConfig {
    pub url: String,
    pub api_key: String,
    /// Protected by `SecretString` to prevent accidental logging.
    pub api_secret: SecretString,
}

impl fmt::Debug for MediaEngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaEngineConfig")
            .field("url", &self.url)
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .finish()
    }
}

/// Room Controller configuration.
///
/// Loaded from environment variables with sensible defaults.
/// Sensitive fields are redacted in Debug output.
#[derive(Clone)]
pub struct Config {
    /// Shared store URL. Protected by `SecretString` (may embed a password).
    pub redis_url: SecretString,
    /// Durable store URL. Protected by `SecretString`.
    pub database_url: SecretString,
    pub media: MediaEngineConfig,
    /// Unique identifier for this instance (logs only).
    pub instance_id: String,
    /// Health endpoint bind address (default: "0.0.0.0:8090").
    pub health_bind_address: String,
    /// Emit JSON-formatted logs.
    pub log_json: bool,
    pub locks: LockConfig,
    pub rooms: RoomConfig,
    pub presence: PresenceConfig,
    pub janitor: JanitorConfig,
    pub agents: AgentConfig,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("redis_url", &"[REDACTED]")
            .field("database_url", &"[REDACTED]")
            .field("media", &self.media)
            .field("instance_id", &self.instance_id)
            .field("health_bind_address", &self.health_bind_address)
            .field("log_json", &self.log_json)
            .field("locks", &self.locks)
            .field("rooms", &self.rooms)
            .field("presence", &self.presence)
            .field("janitor", &self.janitor)
            .field("agents", &self.agents)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

fn required(vars: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    vars.get(key)
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

/// Parse a numeric variable, falling back to `default` when absent or invalid.
fn parse_or<T: FromStr>(vars: &HashMap<String, String>, key: &str, default: T) -> T {
    vars.get(key).and_then(|s| s.parse().ok()).unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let redis_url = SecretString::from(required(vars, "REDIS_URL")?);
        let database_url = SecretString::from(required(vars, "DATABASE_URL")?);

        let media = MediaEngineConfig {
            url: vars
                .get("RC_MEDIA_URL")
                .cloned()
                .unwrap_or_else(|| DEFAULT_MEDIA_URL.to_string()),
            api_key: required(vars, "RC_MEDIA_API_KEY")?,
            api_secret: SecretString::from(required(vars, "RC_MEDIA_API_SECRET")?),
        };

        let health_bind_address = vars
            .get("RC_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let log_json = vars
            .get("RC_LOG_FORMAT")
            .is_some_and(|v| v.eq_ignore_ascii_case("json"));

        let locks = LockConfig {
            room_lock_ttl: Duration::from_secs(parse_or(
                vars,
                "RC_ROOM_LOCK_TTL_SECONDS",
                DEFAULT_ROOM_LOCK_TTL_SECONDS,
            )),
            poll_interval: Duration::from_millis(parse_or(
                vars,
                "RC_LOCK_POLL_INTERVAL_MS",
                DEFAULT_LOCK_POLL_INTERVAL_MS,
            )),
            max_wait: Duration::from_secs(parse_or(
                vars,
                "RC_LOCK_MAX_WAIT_SECONDS",
                DEFAULT_LOCK_MAX_WAIT_SECONDS,
            )),
        };

        let rooms = RoomConfig {
            default_empty_timeout_seconds: parse_or(
                vars,
                "RC_DEFAULT_EMPTY_TIMEOUT_SECONDS",
                DEFAULT_EMPTY_TIMEOUT_SECONDS,
            ),
            max_duration_minutes: parse_or(
                vars,
                "RC_MAX_ROOM_DURATION_MINUTES",
                DEFAULT_MAX_ROOM_DURATION_MINUTES,
            ),
            ended_room_retention: Duration::from_secs(parse_or(
                vars,
                "RC_ENDED_ROOM_RETENTION_SECONDS",
                DEFAULT_ENDED_ROOM_RETENTION_SECONDS,
            )),
        };

        let presence = PresenceConfig {
            offline_grace: Duration::from_secs(parse_or(
                vars,
                "RC_PRESENCE_OFFLINE_GRACE_SECONDS",
                DEFAULT_PRESENCE_OFFLINE_GRACE_SECONDS,
            )),
            cleanup_grace: Duration::from_secs(parse_or(
                vars,
                "RC_PRESENCE_CLEANUP_GRACE_SECONDS",
                DEFAULT_PRESENCE_CLEANUP_GRACE_SECONDS,
            )),
            max_ping_gap: Duration::from_secs(parse_or(
                vars,
                "RC_PRESENCE_MAX_PING_GAP_SECONDS",
                DEFAULT_PRESENCE_MAX_PING_GAP_SECONDS,
            )),
        };

        let janitor = JanitorConfig {
            tick_interval: Duration::from_secs(parse_or(
                vars,
                "RC_JANITOR_TICK_SECONDS",
                DEFAULT_JANITOR_TICK_SECONDS,
            )),
            presence_interval: Duration::from_secs(parse_or(
                vars,
                "RC_JANITOR_PRESENCE_INTERVAL_SECONDS",
                DEFAULT_JANITOR_PRESENCE_INTERVAL_SECONDS,
            )),
            drift_interval: Duration::from_secs(parse_or(
                vars,
                "RC_JANITOR_DRIFT_INTERVAL_SECONDS",
                DEFAULT_JANITOR_DRIFT_INTERVAL_SECONDS,
            )),
            cleanup_interval: Duration::from_secs(parse_or(
                vars,
                "RC_JANITOR_CLEANUP_INTERVAL_SECONDS",
                DEFAULT_JANITOR_CLEANUP_INTERVAL_SECONDS,
            )),
            task_lock_ttl: Duration::from_secs(parse_or(
                vars,
                "RC_JANITOR_TASK_LOCK_TTL_SECONDS",
                DEFAULT_JANITOR_TASK_LOCK_TTL_SECONDS,
            )),
            artifacts_dir: vars
                .get("RC_ARTIFACTS_DIR")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            artifact_retention: Duration::from_secs(
                parse_or(
                    vars,
                    "RC_ARTIFACT_RETENTION_HOURS",
                    DEFAULT_ARTIFACT_RETENTION_HOURS,
                )
                .saturating_mul(3600),
            ),
        };

        if janitor.tick_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "RC_JANITOR_TICK_SECONDS must be greater than zero".to_string(),
            ));
        }

        let agents = AgentConfig {
            lease_ttl: Duration::from_secs(parse_or(
                vars,
                "RC_AGENT_LEASE_TTL_SECONDS",
                DEFAULT_AGENT_LEASE_TTL_SECONDS,
            )),
            refresh_interval: Duration::from_secs(parse_or(
                vars,
                "RC_AGENT_REFRESH_INTERVAL_SECONDS",
                DEFAULT_AGENT_REFRESH_INTERVAL_SECONDS,
            )),
        };

        if agents.refresh_interval.is_zero() || agents.refresh_interval >= agents.lease_ttl {
            return Err(ConfigError::InvalidValue(format!(
                "RC_AGENT_REFRESH_INTERVAL_SECONDS ({}) must be non-zero and below RC_AGENT_LEASE_TTL_SECONDS ({})",
                agents.refresh_interval.as_secs(),
                agents.lease_ttl.as_secs()
            )));
        }

        let instance_id = vars.get("RC_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let hostname = env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            redis_url,
            database_url,
            media,
            instance_id,
            health_bind_address,
            log_json,
            locks,
            rooms,
            presence,
            janitor,
            agents,
        })
    }
}
