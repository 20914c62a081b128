//! Serializes the OS-provided dynamic palette into the loader payload, where the bundle can
//! pick it up for material-style theming. No hooks; this module only contributes config.

use serde_json::{Map, Value as Json};

use crate::context::Context;
use crate::modules::Module;

const PALETTES: [&str; 5] = ["accent1", "accent2", "accent3", "neutral1", "neutral2"];

const SHADES: [u32; 13] = [0, 10, 50, 100, 200, 300, 400, 500, 600, 700, 800, 900, 1000];

/// API level that introduced the dynamic system palette.
const DYNAMIC_COLOR_API: u32 = 31;

pub struct SysColorsModule;

impl Module for SysColorsModule {
    fn name(&self) -> &'static str {
        "sys-colors"
    }

    fn contribute_config(&self, ctx: &Context, payload: &mut Map<String, Json>) {
        let host = ctx.host();
        let supported = host.api_level() >= DYNAMIC_COLOR_API;

        payload.insert("isSysColorsSupported".to_string(), Json::Bool(supported));

        if !supported {
            return;
        }

        let mut colors = Map::new();

        for palette in PALETTES {
            let shades = SHADES
                .iter()
                .map(|shade| {
                    let color = host
                        .system_color(&format!("system_{palette}_{shade}"))
                        .unwrap_or(0);

                    Json::String(format!("#{:06X}", color & 0xFF_FFFF))
                })
                .collect();

            colors.insert(palette.to_string(), Json::Array(shades));
        }

        payload.insert("sysColors".to_string(), Json::Object(colors));
    }
}
