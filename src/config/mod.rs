//! Configuration loading
//!
//! The configuration file is JSON: a watch list, an ordered plugin list,
//! and per-plugin sections keyed by name. Loading is synchronous and
//! validated up front; configuration must be known good before any
//! traffic flows. Plugins receive their section as raw JSON and parse it
//! in their factories; they never re-read files the loader owns.

pub mod cli;
pub mod crud;
pub mod mocks;

use std::{
    collections::HashMap,
    fs,
    path::Path,
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use validator::Validate;

use crate::{
    core::{
        error::{ErrorContext, ProxyResult},
        pipeline::PluginPipeline,
        traits::PluginInit,
    },
    plugins::build_plugin,
    watch::WatchList,
};

use cli::ProxyArgs;

/// One entry in the ordered plugin list.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PluginEntry {
    #[validate(length(min = 1))]
    pub name: String,

    #[serde(default = "PluginEntry::default_enabled")]
    pub enabled: bool,

    /// Key of the top-level section holding this plugin's config.
    /// Defaults to the plugin name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_section: Option<String>,

    /// Per-plugin watch list override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urls_to_watch: Option<Vec<String>>,
}

impl PluginEntry {
    fn default_enabled() -> bool {
        true
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Include patterns; `!`-prefixed entries are excludes.
    #[serde(default)]
    pub urls_to_watch: Vec<String>,

    #[serde(default)]
    #[validate(nested)]
    pub plugins: Vec<PluginEntry>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Per-plugin configuration sections, keyed by section name.
    #[serde(flatten)]
    pub sections: HashMap<String, JsonValue>,
}

impl Config {
    /// Load and validate configuration from a JSON file.
    pub fn load_from_json<P>(path: P) -> ProxyResult<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .config_context(&format!("unable to read config file {}", path.display()))?;
        log::debug!("config file read from {}", path.display());
        Self::from_json_str(&text)
    }

    /// Parse a configuration string with validation.
    pub fn from_json_str(text: &str) -> ProxyResult<Self> {
        let config: Config =
            serde_json::from_str(text).config_context("unable to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply CLI overrides that belong to the loader (plugin-owned
    /// options travel through the options-loaded event instead).
    pub fn merge_with_args(&mut self, args: &ProxyArgs) {
        if let Some(level) = &args.log_level {
            self.log_level = Some(level.clone());
        }
    }

    /// The config section for a plugin entry, `{}` when absent.
    pub fn section_for(&self, entry: &PluginEntry) -> JsonValue {
        let key = entry.config_section.as_deref().unwrap_or(&entry.name);
        self.sections
            .get(key)
            .cloned()
            .unwrap_or_else(|| JsonValue::Object(Default::default()))
    }

    /// Build the plugin pipeline in declared order. A plugin whose
    /// factory fails is logged at error level and left out: the
    /// configuration-error path disables the plugin, never the proxy.
    pub fn build_pipeline(&self, config_dir: &Path) -> ProxyResult<PluginPipeline> {
        let global_watch = Arc::new(WatchList::compile(&self.urls_to_watch)?);
        let mut plugins = Vec::new();

        for entry in self.plugins.iter().filter(|e| e.enabled) {
            let watch = match &entry.urls_to_watch {
                Some(patterns) => Arc::new(WatchList::compile(patterns)?),
                None => Arc::clone(&global_watch),
            };
            let init = PluginInit {
                cfg: self.section_for(entry),
                urls_to_watch: watch,
                config_dir,
            };
            match build_plugin(&entry.name, init) {
                Ok(plugin) => plugins.push(plugin),
                Err(e) => {
                    log::error!("{}: disabled, failed to build: {e}", entry.name);
                }
            }
        }

        Ok(PluginPipeline::new(plugins))
    }
}
