//! # podium-settings
//!
//! Configuration for the Podium relay, loaded from layered sources (in
//! priority order, lowest first):
//!
//! 1. **Compiled defaults** — [`PodiumSettings::default()`]
//! 2. **Settings file** — optional JSON file passed with `--config`
//! 3. **Prefixed environment** — `PODIUM_*`, with `__` separating nested keys
//!    (e.g. `PODIUM_SERVER__PORT=9000`)
//! 4. **`DOMAIN_NAME`** — the bare variable, usually supplied via `.env`
//!
//! Call [`load_dotenv`] before [`load_settings`] so `.env` values are visible
//! to the environment layers.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{load_dotenv, load_settings, validate};
pub use types::*;
