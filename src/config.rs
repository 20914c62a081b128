//! Loader configuration, read once from `loader.json` at attach time.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// The endpoint used when no custom source is configured.
pub const DEFAULT_BUNDLE_URL: &str =
    "https://raw.githubusercontent.com/burrow-mod/builds/main/burrow.min.js";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomLoadUrl {
    pub enabled: bool,
    pub url: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoaderConfig {
    pub custom_load_url: CustomLoadUrl,
}

impl LoaderConfig {
    /// Reads the config file, falling back to the built-in defaults if it is missing or
    /// unparseable. Unknown fields are ignored.
    pub fn load(path: &Path) -> LoaderConfig {
        match std::fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|err| {
                log::warn!("ignoring malformed loader config: {err}");
                LoaderConfig::default()
            }),
            Err(_) => LoaderConfig::default(),
        }
    }

    /// The URL the script bundle should be fetched from.
    pub fn bundle_url(&self) -> &str {
        if self.custom_load_url.enabled && !self.custom_load_url.url.is_empty() {
            &self.custom_load_url.url
        } else {
            DEFAULT_BUNDLE_URL
        }
    }
}
