//! The attach-time context: everything hooks and modules share for the life of the process.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{Result, WrapErr};

use crate::config::LoaderConfig;
use crate::host::HostRuntime;
use crate::AttachParams;

/// Directory namespace under the host's cache and files roots.
pub const NAMESPACE: &str = "burrow";

/// Receives short user-facing notices (fetch failures and the like). How they are displayed is
/// the collaborator's business.
pub type Notifier = Box<dyn Fn(&str) + Send + Sync>;

/// Created once per attach and shared by every hook closure. Implicitly torn down with the host
/// process; nothing here needs explicit cleanup.
pub struct Context {
    host: Arc<dyn HostRuntime>,
    package_name: String,
    config: LoaderConfig,
    cache_dir: PathBuf,
    files_dir: PathBuf,
    legacy_files_dir: PathBuf,
    notifier: Option<Notifier>,
}

impl Context {
    pub fn new(host: Arc<dyn HostRuntime>, params: AttachParams) -> Result<Context> {
        let cache_dir = params.data_dir.join("cache").join(NAMESPACE);
        let legacy_files_dir = params.data_dir.join("files");
        let files_dir = legacy_files_dir.join(NAMESPACE);

        let mut context = Context {
            host,
            package_name: params.package_name,
            cache_dir,
            files_dir,
            legacy_files_dir,
            config: LoaderConfig::default(),
            notifier: params.notifier,
        };

        for dir in [
            &context.cache_dir,
            &context.files_dir,
            &context.preloads_dir(),
            &context.fonts_dir(),
            &context.drawables_dir(),
        ] {
            std::fs::create_dir_all(dir)
                .wrap_err_with(|| format!("failed to create {}", dir.display()))?;
        }

        let config_path = context.config_path();
        context.config = LoaderConfig::load(&config_path);

        Ok(context)
    }

    pub fn host(&self) -> &Arc<dyn HostRuntime> {
        &self.host
    }

    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn bundle_path(&self) -> PathBuf {
        self.cache_dir.join("bundle.js")
    }

    pub fn etag_path(&self) -> PathBuf {
        self.cache_dir.join("etag.txt")
    }

    pub fn config_path(&self) -> PathBuf {
        self.files_dir.join("loader.json")
    }

    pub fn preloads_dir(&self) -> PathBuf {
        self.files_dir.join("preloads")
    }

    pub fn fonts_manifest_path(&self) -> PathBuf {
        self.files_dir.join("fonts.json")
    }

    pub fn fonts_dir(&self) -> PathBuf {
        self.files_dir.join("downloads").join("fonts")
    }

    pub fn theme_path(&self) -> PathBuf {
        self.files_dir.join("current-theme.json")
    }

    /// Where older loader builds kept the theme, outside the namespaced directory.
    pub fn legacy_theme_path(&self) -> PathBuf {
        self.legacy_files_dir.join("burrow_theme.json")
    }

    pub fn drawables_dir(&self) -> PathBuf {
        self.files_dir.join("drawables")
    }

    pub fn log_dir(&self) -> &Path {
        &self.files_dir
    }

    /// Surfaces a short notice to the user, if a notifier was supplied. Always logged.
    pub fn notify(&self, message: &str) {
        log::warn!("{message}");

        if let Some(notifier) = &self.notifier {
            notifier(message);
        }
    }
}
