//! Configuration models and layered loading for Vidra nodes.
//!
//! Both binaries load one [`Config`] at startup: compiled defaults, then an
//! optional TOML file, then `VIDRA_*` environment overrides. There is no
//! dynamic settings lookup at runtime; components receive the typed
//! sections they need at construction.
#![allow(missing_docs)]

pub mod loader;
pub mod models;

pub use loader::{load, load_from_path};
pub use models::{
    AlertConfig, BrokerConfig, Config, DatabaseConfig, DiskConfig,
    EncoderConfig, GalleryConfig, RamdiskConfig, ServerConfig, StorageConfig,
    SubtitleConfig, UploadConfig, WarmCacheConfig, WorkerConfig,
};
