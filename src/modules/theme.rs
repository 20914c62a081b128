//! Theme overrides: semantic colors hooked per accessor, raw colors served from a lookup table
//! inside the host's generic color-resolution path.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use case_insensitive_hashmap::CaseInsensitiveHashMap;
use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::hook::{HookConflict, HookRegistry};
use crate::host::{targets, Probe, Value};
use crate::modules::Module;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeData {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<Author>>,

    /// Theme format version.
    pub spec: i32,

    /// Mode-dependent colors: key to a `[dark, light]` pair of hex strings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_colors: Option<HashMap<String, Vec<String>>>,

    /// Mode-independent colors keyed by resource entry name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_colors: Option<HashMap<String, String>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Theme {
    pub id: String,
    pub selected: bool,
    pub data: ThemeData,
}

pub struct ThemeModule {
    theme: Option<Theme>,
}

impl ThemeModule {
    pub fn load(ctx: &Context) -> ThemeModule {
        ThemeModule {
            theme: read_theme(&ctx.theme_path(), &ctx.legacy_theme_path()),
        }
    }
}

impl Module for ThemeModule {
    fn name(&self) -> &'static str {
        "theme"
    }

    fn contribute_config(&self, _ctx: &Context, payload: &mut serde_json::Map<String, serde_json::Value>) {
        payload.insert("hasThemeSupport".to_string(), serde_json::Value::Bool(true));

        let stored = match &self.theme {
            Some(theme) => serde_json::to_value(theme).unwrap_or(serde_json::Value::Null),
            None => serde_json::Value::Null,
        };

        payload.insert("storedTheme".to_string(), stored);
    }

    fn on_attach(
        &self,
        ctx: &Arc<Context>,
        probe: &Probe,
        registry: &HookRegistry,
    ) -> Result<(), HookConflict> {
        let Some(theme) = &self.theme else {
            return Ok(());
        };

        log::info!("applying theme '{}'", theme.data.name);

        if let Some(semantic) = &theme.data.semantic_colors {
            hook_semantic_colors(semantic, probe, registry);
        }

        let raw_colors = build_raw_color_table(theme);

        if !raw_colors.is_empty() {
            hook_raw_colors(raw_colors, ctx, probe, registry);
        }

        Ok(())
    }
}

/// Installs a before-with-skip hook on the derived accessor of each themed class, so themed
/// colors are served without the native getter ever running. Index 0 of the pair themes the
/// dark variant, index 1 the light variant; accessors missing from this host version are
/// skipped quietly.
fn hook_semantic_colors(
    semantic: &HashMap<String, Vec<String>>,
    probe: &Probe,
    registry: &HookRegistry,
) {
    for (key, pair) in semantic {
        let method = accessor_name(key);

        for (index, hex) in pair.iter().enumerate().take(2) {
            let Some(color) = parse_hex_color(hex) else {
                log::warn!("ignoring unparseable color {hex} for {key}");
                continue;
            };

            let class = if index == 0 {
                targets::DARK_THEME
            } else {
                targets::LIGHT_THEME
            };

            if let Some(target) = probe.resolve(class, targets::theme_accessor(&method)) {
                registry.register_before(&target, move |invocation| {
                    invocation.set_result(Value::Int(color as i64));
                });
            }
        }
    }
}

fn build_raw_color_table(theme: &Theme) -> CaseInsensitiveHashMap<u32> {
    let mut table = CaseInsensitiveHashMap::new();

    if let Some(raw) = &theme.data.raw_colors {
        for (name, hex) in raw {
            match parse_hex_color(hex) {
                Some(color) => {
                    table.insert(name.clone(), color);
                }
                None => log::warn!("ignoring unparseable raw color {hex} for {name}"),
            }
        }
    }

    table
}

/// Hooks the host's generic color-resolution members. The hook maps the integer resource id
/// back to its entry name and substitutes the override when the table has one; anything else
/// falls through to the native body.
fn hook_raw_colors(
    table: CaseInsensitiveHashMap<u32>,
    ctx: &Arc<Context>,
    probe: &Probe,
    registry: &HookRegistry,
) {
    let table = Arc::new(table);

    let signatures = [targets::resolve_color(), targets::resolve_color_legacy()];

    for signature in signatures {
        let Some(target) = probe.resolve(targets::THEME_UTILS, signature) else {
            continue;
        };

        let table = Arc::clone(&table);
        let host = Arc::clone(ctx.host());

        registry.register_before(&target, move |invocation| {
            // The resource id is the second argument in both overloads.
            let Some(id) = invocation.args.get(1).and_then(Value::as_int) else {
                return;
            };

            let Some(name) = host.resource_entry_name(id) else {
                return;
            };

            if let Some(color) = table.get(name) {
                invocation.set_result(Value::Int(*color as i64));
            }
        });
    }
}

/// Derives the accessor method for a semantic color key: `TEXT_NORMAL` becomes `getTextNormal`.
fn accessor_name(key: &str) -> String {
    let pascal: String = key
        .split('_')
        .map(|part| {
            let part = part.to_lowercase();
            let mut chars = part.chars();

            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect();

    format!("get{pascal}")
}

/// Parses `#RRGGBB` or `#RRGGBBAA` into the host's ARGB convention: six digits are opaque,
/// eight have their alpha moved up to the most significant byte.
fn parse_hex_color(hex: &str) -> Option<u32> {
    let digits = hex.strip_prefix('#')?;

    match digits.len() {
        6 => u32::from_str_radix(digits, 16)
            .ok()
            .map(|rgb| 0xFF00_0000 | rgb),
        8 => u32::from_str_radix(digits, 16)
            .ok()
            .map(|rgba| (rgba >> 8) | ((rgba & 0xFF) << 24)),
        _ => None,
    }
}

/// A theme file counts as present only if it holds something that could be a theme. Empty
/// files, `{}` and `null` are all states older builds wrote when clearing a theme.
fn is_validish(path: &Path) -> bool {
    match fs::read_to_string(path) {
        Ok(text) => {
            let text = text.trim();
            !text.is_empty() && text != "{}" && text != "null"
        }
        Err(_) => false,
    }
}

fn read_theme(theme_path: &Path, legacy_path: &Path) -> Option<Theme> {
    if is_validish(legacy_path) && !is_validish(theme_path) {
        log::info!("migrating legacy theme file");

        if let Err(err) = fs::copy(legacy_path, theme_path) {
            log::warn!("legacy theme migration failed: {err}");
        }
    }

    if !is_validish(theme_path) {
        return None;
    }

    let text = fs::read_to_string(theme_path).ok()?;

    match serde_json::from_str(&text) {
        Ok(theme) => Some(theme),
        Err(err) => {
            log::warn!("ignoring malformed theme file: {err}");
            None
        }
    }
}
