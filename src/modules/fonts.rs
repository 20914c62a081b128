//! Custom fonts: keeps a downloads directory in sync with the font manifest and replaces the
//! host's typeface factory so downloaded fonts take precedence over bundled ones.
//!
//! The replacement reproduces the host's own resolution semantics: a comma-separated family
//! list becomes a fallback-chain typeface where the OS supports chains, single families probe
//! (override directory, then bundled assets) x (style suffix) x (file extension) in that fixed
//! order, and anything unresolved is handed back to the host's native constructor.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once};
use std::thread::JoinHandle;

use eyre::{Result, WrapErr};
use serde::Deserialize;

use crate::context::Context;
use crate::hook::{HookConflict, HookRegistry};
use crate::host::{targets, FontSource, HostRuntime, Probe, Value};
use crate::modules::Module;
use crate::LOADER_NAME;

const FILE_EXTENSIONS: [&str; 2] = [".ttf", ".otf"];

/// Style suffixes indexed by the host's style constant.
const STYLE_SUFFIXES: [&str; 4] = ["", "_bold", "_italic", "_bold_italic"];

/// Where the host package keeps its bundled fonts.
const ASSET_FONTS_PATH: &str = "fonts/";

/// API level that can build fallback-chain typefaces.
const FALLBACK_CHAIN_API: u32 = 29;

#[derive(Clone, Debug, Deserialize)]
pub struct FontDefinition {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Manifest format version.
    pub spec: i32,

    pub hash: String,

    /// Font family name to source URL.
    pub main: HashMap<String, String>,
}

pub struct FontsModule {
    fonts_dir: PathBuf,
    downloads: Arc<DownloadSet>,
    active: bool,
}

impl FontsModule {
    pub fn load(ctx: &Context) -> FontsModule {
        let fonts_dir = ctx.fonts_dir();

        let definition = read_manifest(&ctx.fonts_manifest_path());

        let downloads = match &definition {
            Some(definition) => {
                reconcile_fonts_dir(&fonts_dir, definition);
                DownloadSet::start(&fonts_dir, definition)
            }
            None => DownloadSet::idle(),
        };

        FontsModule {
            fonts_dir,
            downloads,
            active: definition.is_some(),
        }
    }
}

impl Module for FontsModule {
    fn name(&self) -> &'static str {
        "fonts"
    }

    fn contribute_config(
        &self,
        _ctx: &Context,
        payload: &mut serde_json::Map<String, serde_json::Value>,
    ) {
        payload.insert("fontPatch".to_string(), serde_json::Value::from(1));
    }

    fn on_attach(
        &self,
        ctx: &Arc<Context>,
        probe: &Probe,
        registry: &HookRegistry,
    ) -> Result<(), HookConflict> {
        if !self.active {
            return Ok(());
        }

        let Some(target) = probe.resolve(targets::FONT_MANAGER, targets::create_asset_typeface())
        else {
            return Ok(());
        };

        let host = Arc::clone(ctx.host());
        let fonts_dir = self.fonts_dir.clone();
        let downloads = Arc::clone(&self.downloads);

        registry.register_replace(&target, move |invocation| {
            let family = invocation
                .args
                .first()
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let style = invocation.args.get(1).and_then(Value::as_int).unwrap_or(0);

            // First use of a font this launch; any downloads still in flight finish here.
            downloads.wait();

            invocation.set_result(create_typeface(host.as_ref(), &fonts_dir, &family, style));
        })
    }
}

fn read_manifest(path: &Path) -> Option<FontDefinition> {
    let text = fs::read_to_string(path).ok()?;

    match serde_json::from_str(&text) {
        Ok(definition) => Some(definition),
        Err(err) => {
            log::warn!("ignoring malformed font manifest: {err}");
            None
        }
    }
}

/// Deletes downloaded files that no longer belong to any defined family. Dotfiles are left
/// alone.
fn reconcile_fonts_dir(fonts_dir: &Path, definition: &FontDefinition) {
    let Ok(entries) = fonts_dir.read_dir() else {
        return;
    };

    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();

        if file_name.starts_with('.') {
            continue;
        }

        let stem = file_name.split('.').next().unwrap_or(&file_name);

        if !definition.main.contains_key(stem) {
            log::info!("deleting stale font file {file_name}");

            if let Err(err) = fs::remove_file(entry.path()) {
                log::warn!("could not delete {file_name}: {err}");
            }
        }
    }
}

/// Background downloads for fonts named in the manifest but missing on disk. Joined at most
/// once, by the first typeface creation that needs them.
struct DownloadSet {
    threads: Mutex<Vec<JoinHandle<()>>>,
    joined: Once,
}

impl DownloadSet {
    fn idle() -> Arc<DownloadSet> {
        Arc::new(DownloadSet {
            threads: Mutex::new(Vec::new()),
            joined: Once::new(),
        })
    }

    fn start(fonts_dir: &Path, definition: &FontDefinition) -> Arc<DownloadSet> {
        let mut threads = Vec::new();

        for (family, url) in &definition.main {
            let Some(extension) = FILE_EXTENSIONS.iter().find(|ext| url.ends_with(*ext)) else {
                log::warn!("not downloading {family}: unrecognised font URL {url}");
                continue;
            };

            let path = fonts_dir.join(format!("{family}{extension}"));

            if path.exists() {
                continue;
            }

            let family = family.clone();
            let url = url.clone();
            let family_for_error = family.clone();

            let thread = std::thread::Builder::new()
                .name(format!("burrow-font-{family}"))
                .spawn(move || {
                    if let Err(err) = download_font(&url, &path) {
                        log::error!("failed to download font {family} from {url}: {err:?}");
                    }
                });

            match thread {
                Ok(thread) => threads.push(thread),
                Err(err) => log::error!("could not spawn download thread for {family_for_error}: {err}"),
            }
        }

        Arc::new(DownloadSet {
            threads: Mutex::new(threads),
            joined: Once::new(),
        })
    }

    fn wait(&self) {
        self.joined.call_once(|| {
            for thread in self.threads.lock().unwrap().drain(..) {
                let _ = thread.join();
            }
        });
    }
}

fn download_font(url: &str, path: &Path) -> Result<()> {
    log::info!("downloading font from {url}");

    let client = reqwest::blocking::Client::builder()
        .user_agent(LOADER_NAME)
        .build()?;

    let body = client
        .get(url)
        .send()?
        .error_for_status()?
        .bytes()
        .wrap_err("failed to read font body")?;

    let tmp = path.with_extension("download");
    fs::write(&tmp, &body)?;
    fs::rename(&tmp, path)?;

    Ok(())
}

fn style_suffix(style: i64) -> &'static str {
    usize::try_from(style)
        .ok()
        .and_then(|index| STYLE_SUFFIXES.get(index))
        .copied()
        .unwrap_or("")
}

/// Candidate locations for a font file, in resolution order.
fn font_sources(fonts_dir: &Path, file_stem: &str) -> Vec<FontSource> {
    let mut sources = Vec::with_capacity(FILE_EXTENSIONS.len() * 2);

    for extension in FILE_EXTENSIONS {
        sources.push(FontSource::File(
            fonts_dir.join(format!("{file_stem}{extension}")),
        ));
    }

    for extension in FILE_EXTENSIONS {
        sources.push(FontSource::Asset(format!(
            "{ASSET_FONTS_PATH}{file_stem}{extension}"
        )));
    }

    sources
}

fn create_typeface(host: &dyn HostRuntime, fonts_dir: &Path, family: &str, style: i64) -> Value {
    let families: Vec<&str> = family
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .collect();

    if families.len() > 1 {
        if host.api_level() >= FALLBACK_CHAIN_API {
            return typeface_with_fallbacks(host, fonts_dir, &families, style);
        }

        // Older hosts cannot chain font families; the first one wins.
        return single_family_typeface(host, fonts_dir, families[0], style);
    }

    single_family_typeface(host, fonts_dir, families.first().unwrap_or(&family), style)
}

fn single_family_typeface(
    host: &dyn HostRuntime,
    fonts_dir: &Path,
    family: &str,
    style: i64,
) -> Value {
    let file_stem = format!("{family}{}", style_suffix(style));

    for source in font_sources(fonts_dir, &file_stem) {
        if let Some(typeface) = host.typeface_from_source(&source) {
            return typeface;
        }
    }

    host.fallback_typeface(family, style)
}

fn typeface_with_fallbacks(
    host: &dyn HostRuntime,
    fonts_dir: &Path,
    families: &[&str],
    style: i64,
) -> Value {
    let mut fonts = Vec::new();

    for family in families {
        for source in font_sources(fonts_dir, family) {
            if let Some(font) = host.load_font(&source) {
                fonts.push(font);
            }
        }
    }

    if fonts.is_empty() {
        return single_family_typeface(host, fonts_dir, families[0], style);
    }

    host.compose_typeface(&fonts)
        .unwrap_or_else(|| single_family_typeface(host, fonts_dir, families[0], style))
}
