//! Layered configuration loading.
//!
//! Precedence, lowest first: compiled defaults, an optional TOML file
//! (`vidra.toml` in the working directory unless a path is given), then
//! `VIDRA_*` environment variables with `__` as the section separator
//! (`VIDRA_WORKER__CONCURRENCY=4`).

use std::path::Path;

use anyhow::Context;

use crate::models::Config;

/// Loads configuration using the default file lookup.
pub fn load() -> anyhow::Result<Config> {
    build(None)
}

/// Loads configuration from an explicit file path.
pub fn load_from_path(path: &Path) -> anyhow::Result<Config> {
    build(Some(path))
}

fn build(path: Option<&Path>) -> anyhow::Result<Config> {
    let defaults = config::Config::try_from(&Config::default())
        .context("serializing default configuration")?;

    let mut builder = config::Config::builder().add_source(defaults);

    builder = match path {
        Some(path) => builder.add_source(
            config::File::from(path).format(config::FileFormat::Toml),
        ),
        None => builder.add_source(
            config::File::with_name("vidra")
                .format(config::FileFormat::Toml)
                .required(false),
        ),
    };

    builder = builder.add_source(
        config::Environment::with_prefix("VIDRA")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let config: Config = builder
        .build()
        .context("assembling configuration layers")?
        .try_deserialize()
        .context("deserializing configuration")?;

    config.validate()?;
    Ok(config)
}
