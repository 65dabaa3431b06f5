//! Settings loading with layered sources and validation.
//!
//! Loading flow:
//! 1. Start with compiled [`PodiumSettings::default()`]
//! 2. If a settings file was given, merge its JSON over the defaults
//! 3. Merge `PODIUM_*` environment variables (nested with `__`)
//! 4. Merge the bare `DOMAIN_NAME` variable (highest priority)
//! 5. Validate ranges and required values

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized};
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::PodiumSettings;

/// Prefix for nested environment overrides.
pub const ENV_PREFIX: &str = "PODIUM_";

/// Load a `.env` file into the process environment.
///
/// With `path`, only that file is read. Without it, `.env` is searched for in
/// the working directory and its parents. A missing file is not an error.
/// Returns the path that was loaded.
pub fn load_dotenv(path: Option<&Path>) -> Result<Option<PathBuf>> {
    let loaded = match path {
        Some(path) => dotenvy::from_path(path).map(|()| path.to_path_buf()),
        None => dotenvy::dotenv(),
    };
    match loaded {
        Ok(path) => Ok(Some(path)),
        Err(e) if e.not_found() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Build the layered figment without extracting it.
pub fn figment(config_path: Option<&Path>) -> Figment {
    let mut figment = Figment::from(Serialized::defaults(PodiumSettings::default()));
    if let Some(path) = config_path {
        debug!(?path, "merging settings file");
        figment = figment.merge(Json::file(path));
    }
    figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .merge(Env::raw().only(&["DOMAIN_NAME"]))
}

/// Load and validate settings.
///
/// If `config_path` names a file that does not exist, it is skipped the same
/// way an absent environment variable is.
pub fn load_settings(config_path: Option<&Path>) -> Result<PodiumSettings> {
    let settings: PodiumSettings = figment(config_path).extract()?;
    validate(&settings)?;
    Ok(settings)
}

/// Check required values and ranges.
pub fn validate(settings: &PodiumSettings) -> Result<()> {
    if settings.domain_name.trim().is_empty() {
        return Err(SettingsError::MissingDomainName);
    }
    let server = &settings.server;
    if server.max_connections == 0 {
        return Err(invalid("server.max_connections must be at least 1"));
    }
    if server.heartbeat_interval_secs == 0 {
        return Err(invalid("server.heartbeat_interval_secs must be at least 1"));
    }
    if server.heartbeat_timeout_secs < server.heartbeat_interval_secs {
        return Err(invalid(
            "server.heartbeat_timeout_secs must not be shorter than the interval",
        ));
    }
    if server.max_message_size == 0 {
        return Err(invalid("server.max_message_size must be at least 1"));
    }
    if server.send_queue_capacity == 0 {
        return Err(invalid("server.send_queue_capacity must be at least 1"));
    }
    if server.max_dropped_messages == 0 {
        return Err(invalid("server.max_dropped_messages must be at least 1"));
    }
    Ok(())
}

fn invalid(message: &str) -> SettingsError {
    SettingsError::InvalidValue(message.to_owned())
}
