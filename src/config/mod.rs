mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    expand_paths(&mut config);
    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./classcast.toml",
        "./config.toml",
        "~/.config/classcast/config.toml",
        "/etc/classcast/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

fn expand_paths(config: &mut Config) {
    let expand = |p: &std::path::PathBuf| {
        std::path::PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref())
    };
    config.storage.videos_dir = expand(&config.storage.videos_dir);
    config.helper.program = expand(&config.helper.program);
    if let Some(p) = &config.tools.ffmpeg_path {
        config.tools.ffmpeg_path = Some(expand(p));
    }
    if let Some(p) = &config.tools.ffprobe_path {
        config.tools.ffprobe_path = Some(expand(p));
    }
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    if config.transcode.encoder_slots == 0 {
        anyhow::bail!("transcode.encoder_slots must be at least 1");
    }

    if config.transcode.segment_seconds == 0 {
        anyhow::bail!("transcode.segment_seconds must be at least 1");
    }

    let live = &config.live;
    if live.default_width == 0 || live.default_height == 0 || live.default_fps == 0 {
        anyhow::bail!("live defaults must be non-zero");
    }

    if config.helper.ready_marker.trim().is_empty() {
        anyhow::bail!("helper.ready_marker cannot be empty");
    }

    if config.preview.max_attempts == 0 {
        anyhow::bail!("preview.max_attempts must be at least 1");
    }

    if !config.storage.videos_dir.exists() {
        tracing::warn!("Videos dir does not exist: {:?}", config.storage.videos_dir);
    }

    Ok(())
}
