//! Configuration for applications hosting a streamwatch watchlist.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext), and
//! translation to `streamwatch_core::WatchlistConfig` and the login
//! request a connection opens with.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use streamwatch_api::{LoginRequest, StreamId, UserIdType};
use streamwatch_core::{ReissuePolicy, WatchlistConfig};

/// Keyring service under which profile passwords are stored.
const KEYRING_SERVICE: &str = "streamwatch";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{profile}' not found")]
    UnknownProfile { profile: String },

    #[error("no user name configured for profile '{profile}'")]
    NoUsername { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named.
    pub default_profile: Option<String>,

    /// Watchlist options every profile starts from.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named connection profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Look up `name`, or the default profile when `name` is `None`.
    pub fn profile<'a>(&'a self, name: Option<&'a str>) -> Result<(&'a str, &'a Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get(name)
            .map(|profile| (name, profile))
            .ok_or_else(|| ConfigError::UnknownProfile {
                profile: name.into(),
            })
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct Defaults {
    #[serde(default = "default_true")]
    pub enable_watchlist: bool,

    #[serde(default = "default_true")]
    pub obey_open_window: bool,

    /// Seconds to wait for a refresh before a request is retried.
    #[serde(default = "default_timeout")]
    pub request_timeout: u64,

    /// Seconds to wait for a post acknowledgement.
    #[serde(default = "default_timeout")]
    pub post_ack_timeout: u64,

    #[serde(default = "default_max_outstanding_posts")]
    pub max_outstanding_posts: usize,

    #[serde(default)]
    pub channel_open_callback: bool,

    /// Unset retries forever.
    pub max_request_retries: Option<u32>,

    #[serde(default)]
    pub reissue_policy: ReissuePolicy,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            enable_watchlist: true,
            obey_open_window: true,
            request_timeout: default_timeout(),
            post_ack_timeout: default_timeout(),
            max_outstanding_posts: default_max_outstanding_posts(),
            channel_open_callback: false,
            max_request_retries: None,
            reissue_policy: ReissuePolicy::default(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_timeout() -> u64 {
    15
}
fn default_max_outstanding_posts() -> usize {
    100_000
}

/// A named connection profile: login identity plus watchlist overrides.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Login user name.
    pub username: Option<String>,

    /// How the user name is interpreted: "name", "email", "token", "cookie"
    /// or "authn_token".
    pub user_name_type: Option<String>,

    /// Password (plaintext, prefer keyring or env var).
    pub password: Option<String>,

    /// Environment variable name containing the password.
    pub password_env: Option<String>,

    pub application_id: Option<String>,
    pub application_name: Option<String>,
    pub position: Option<String>,
    pub instance_id: Option<String>,

    /// Ask the provider side to recover item streams.
    pub single_open: Option<bool>,
    pub allow_suspect_data: Option<bool>,

    // ── Watchlist overrides ──
    pub enable_watchlist: Option<bool>,
    pub obey_open_window: Option<bool>,
    pub request_timeout: Option<u64>,
    pub post_ack_timeout: Option<u64>,
    pub max_outstanding_posts: Option<usize>,
    pub max_request_retries: Option<u32>,
    pub reissue_policy: Option<ReissuePolicy>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "streamwatch", "streamwatch").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("streamwatch");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the platform config file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + environment. A missing file yields the defaults.
///
/// Environment overrides use `STREAMWATCH_` and `__` between levels, e.g.
/// `STREAMWATCH_DEFAULTS__REQUEST_TIMEOUT=30`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("STREAMWATCH_").split("__"));

    let config: Config = figment.extract()?;
    tracing::debug!(
        path = %path.display(),
        profiles = config.profiles.len(),
        "configuration loaded"
    );
    Ok(config)
}

/// Load config, returning a default if loading fails.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the login password from the credential chain. `None` when the
/// profile logs in without one.
pub fn resolve_password(profile: &Profile, profile_name: &str) -> Option<SecretString> {
    // 1. Profile's password_env → env var lookup
    if let Some(ref env_name) = profile.password_env {
        if let Ok(val) = std::env::var(env_name) {
            return Some(SecretString::from(val));
        }
        tracing::debug!(env = %env_name, "password variable not set, trying keyring");
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/password")) {
        if let Ok(pw) = entry.get_password() {
            return Some(SecretString::from(pw));
        }
    }

    // 3. Plaintext in config
    profile.password.clone().map(SecretString::from)
}

/// Store a profile password in the system keyring.
pub fn store_password(profile_name: &str, password: &SecretString) -> Result<(), ConfigError> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/password"))
        .map_err(|e| keyring_error(&e))?;
    entry
        .set_password(password.expose_secret())
        .map_err(|e| keyring_error(&e))
}

fn keyring_error(err: &keyring::Error) -> ConfigError {
    ConfigError::Validation {
        field: "keyring".into(),
        reason: err.to_string(),
    }
}

// ── Translation ─────────────────────────────────────────────────────

/// Build a `WatchlistConfig` from the defaults with `profile`'s overrides.
pub fn profile_watchlist_config(
    config: &Config,
    profile: &Profile,
) -> Result<WatchlistConfig, ConfigError> {
    let defaults = &config.defaults;
    let request_timeout = profile.request_timeout.unwrap_or(defaults.request_timeout);
    let post_ack_timeout = profile.post_ack_timeout.unwrap_or(defaults.post_ack_timeout);
    let max_outstanding_posts = profile
        .max_outstanding_posts
        .unwrap_or(defaults.max_outstanding_posts);

    for (field, secs) in [
        ("request_timeout", request_timeout),
        ("post_ack_timeout", post_ack_timeout),
    ] {
        if secs == 0 {
            return Err(ConfigError::Validation {
                field: field.into(),
                reason: "must be at least one second".into(),
            });
        }
    }
    if max_outstanding_posts == 0 {
        return Err(ConfigError::Validation {
            field: "max_outstanding_posts".into(),
            reason: "must be positive".into(),
        });
    }

    Ok(WatchlistConfig {
        enable_watchlist: profile.enable_watchlist.unwrap_or(defaults.enable_watchlist),
        obey_open_window: profile.obey_open_window.unwrap_or(defaults.obey_open_window),
        request_timeout: Duration::from_secs(request_timeout),
        post_ack_timeout: Duration::from_secs(post_ack_timeout),
        max_outstanding_posts,
        channel_open_callback: defaults.channel_open_callback,
        max_request_retries: profile.max_request_retries.or(defaults.max_request_retries),
        reissue_policy: profile.reissue_policy.unwrap_or(defaults.reissue_policy),
    })
}

/// Build the login request a connection for `profile` opens with.
///
/// The user name falls back to `STREAMWATCH_USERNAME`.
pub fn profile_login_request(
    profile: &Profile,
    profile_name: &str,
    stream_id: StreamId,
) -> Result<LoginRequest, ConfigError> {
    let username = profile
        .username
        .clone()
        .or_else(|| std::env::var("STREAMWATCH_USERNAME").ok())
        .ok_or_else(|| ConfigError::NoUsername {
            profile: profile_name.into(),
        })?;

    let mut request = LoginRequest::new(stream_id, username);
    if let Some(ref kind) = profile.user_name_type {
        request.user_name_type =
            kind.parse::<UserIdType>()
                .map_err(|_| ConfigError::Validation {
                    field: "user_name_type".into(),
                    reason: format!(
                        "expected 'name', 'email', 'token', 'cookie', or 'authn_token', got '{kind}'"
                    ),
                })?;
    }
    request.password = resolve_password(profile, profile_name);
    request.application_id.clone_from(&profile.application_id);
    request.application_name.clone_from(&profile.application_name);
    request.position.clone_from(&profile.position);
    request.instance_id.clone_from(&profile.instance_id);
    if let Some(single_open) = profile.single_open {
        request.single_open = single_open;
    }
    if let Some(allow) = profile.allow_suspect_data {
        request.allow_suspect_data = allow;
    }
    Ok(request)
}
