//! Shared types, error model, and configuration for woof-rs.
//!
//! This crate is the foundation depended on by all other woof-rs crates.
//! It provides:
//! - [`WoofError`], the unified error type
//! - Domain types ([`CompressionLevel`], [`PayloadKind`])
//! - Configuration ([`AppConfig`], [`ShareConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, ServerConfig, ShareConfig, config_dir, config_file_path,
    init_config, init_config_in, load_config, load_config_from,
};
pub use error::{Result, WoofError};
pub use types::{CompressionLevel, DEFAULT_ARCHIVE_NAME, PayloadKind};
