//! TOML configuration parsing.
//!
//! The configuration is loaded once at startup and passed by reference to
//! every operation. Nothing below the CLI reads the process environment.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::tags::{TagExtractor, TagRule};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub tags: TagsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory holding the active `YYYY-MM-DD.jsonl` partitions.
    pub hot_dir: PathBuf,
    /// Relocation target, partitions land in `<cold_dir>/<YYYY-MM>/`.
    pub cold_dir: PathBuf,
    pub digest_dir: PathBuf,
    /// Fingerprint index database. Defaults to `<hot_dir>/index.sqlite`.
    #[serde(default)]
    pub index_path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn index_path(&self) -> PathBuf {
        self.index_path
            .clone()
            .unwrap_or_else(|| self.hot_dir.join("index.sqlite"))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetentionConfig {
    #[serde(default = "default_hot_days")]
    pub hot_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            hot_days: default_hot_days(),
        }
    }
}

fn default_hot_days() -> u32 {
    7
}

#[derive(Debug, Deserialize, Clone)]
pub struct TagsConfig {
    /// When true (the default), configured rules replace the built-in table.
    /// When false they are appended after it.
    #[serde(default = "default_replace_defaults")]
    pub replace_defaults: bool,
    #[serde(default)]
    pub rules: Vec<TagRule>,
}

impl Default for TagsConfig {
    fn default() -> Self {
        Self {
            replace_defaults: true,
            rules: Vec::new(),
        }
    }
}

fn default_replace_defaults() -> bool {
    true
}

impl TagsConfig {
    /// The effective, ordered rule table.
    pub fn effective_rules(&self) -> Vec<TagRule> {
        if self.rules.is_empty() {
            return TagRule::defaults();
        }
        if self.replace_defaults {
            self.rules.clone()
        } else {
            let mut rules = TagRule::defaults();
            rules.extend(self.rules.iter().cloned());
            rules
        }
    }

    pub fn extractor(&self) -> Result<TagExtractor> {
        TagExtractor::new(&self.effective_rules())
    }
}

impl Config {
    /// A config rooted at `root`, with default retention and tag rules.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            storage: StorageConfig {
                hot_dir: root.join("chat-stream"),
                cold_dir: root.join("chat-archive"),
                digest_dir: root.join("chat-digest"),
                index_path: None,
            },
            retention: RetentionConfig::default(),
            tags: TagsConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;

    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.retention.hot_days == 0 {
        anyhow::bail!("retention.hot_days must be >= 1");
    }

    if config.storage.hot_dir == config.storage.cold_dir {
        anyhow::bail!(
            "storage.hot_dir and storage.cold_dir must differ (both are {})",
            config.storage.hot_dir.display()
        );
    }

    // Compile every pattern now so a bad rule fails at startup, not mid-ingest.
    config.tags.extractor()?;

    Ok(())
}
