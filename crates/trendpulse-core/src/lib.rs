//! Shared domain types and configuration for the trend aggregation engine.

pub mod app_config;
pub mod config;
pub mod entities;
pub mod mention;
pub mod sink;
pub mod snapshot;
pub mod window;

use thiserror::Error;

pub use app_config::{AppConfig, Environment};
pub use config::{load_app_config, load_app_config_from_env};
pub use entities::{
    load_catalog, normalize_alias, parse_catalog, CanonicalEntity, CatalogFile, EntityId,
    EntityKind, EntitySeed,
};
pub use mention::MentionEvent;
pub use sink::{MentionSink, SinkError};
pub use snapshot::{ScoreSnapshot, TrendCategory, TrendDirection};
pub use window::{AggregationWindow, BucketSpec};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for environment variable {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read catalog file {path}: {source}")]
    CatalogFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse catalog file: {0}")]
    CatalogFileParse(#[from] serde_yaml::Error),

    #[error("catalog validation error: {0}")]
    Validation(String),
}
