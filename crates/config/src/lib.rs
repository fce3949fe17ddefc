//! Typed configuration for the translation dataplane
//!
//! The upstream services treated configuration as loose dictionaries; here
//! every option is a typed field with an explicit default, validated at
//! construction. Values are layered from an optional TOML file and
//! `LINGO_`-prefixed environment variables.

mod settings;

pub use settings::{
    AgreementConfig, ChannelConfig, MetricsConfig, MtConfig, ServerConfig, SessionConfig,
    Settings, SttConfig, TtsConfig, VoicePresetConfig,
};

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Load settings from the default locations and validate them.
///
/// Layering order (later wins): built-in defaults, `config/lingo.toml` if
/// present, an explicit file passed by the caller, `LINGO_*` environment
/// variables (`LINGO_SERVER__PORT=9090` style).
pub fn load_settings(path: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = config::Config::builder()
        .add_source(config::File::with_name("config/lingo").required(false));

    if let Some(path) = path {
        builder = builder.add_source(config::File::with_name(path));
    }

    let loaded: Settings = builder
        .add_source(config::Environment::with_prefix("LINGO").separator("__"))
        .build()?
        .try_deserialize()?;

    loaded.validate()?;
    Ok(loaded)
}
