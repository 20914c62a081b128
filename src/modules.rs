//! Self-contained patch units. Each module may contribute a fragment to the shared loader
//! payload and may register hooks for the host capabilities it patches; both capabilities are
//! optional, and a module that has nothing to do simply keeps the defaults.
//!
//! Modules are independent of one another. The only ordering they may rely on is that every
//! module attaches before the injection pipeline's hook can fire; payload fragments are
//! concatenated in the fixed order of [`create_all`] so the injected JSON is reproducible.

pub mod drawables;
pub mod fonts;
pub mod syscolors;
pub mod theme;

use std::sync::Arc;

use serde_json::{Map, Value as Json};

use crate::context::Context;
use crate::hook::{HookConflict, HookRegistry};
use crate::host::Probe;

pub trait Module: Send + Sync {
    fn name(&self) -> &'static str;

    /// Merges this module's fragment into the shared loader payload.
    fn contribute_config(&self, _ctx: &Context, _payload: &mut Map<String, Json>) {}

    /// Probes for the host capabilities this module patches and registers its hooks. Anything
    /// that goes wrong here short of a structural hook conflict is the module's own problem:
    /// log it, disable the feature, and let the rest of the attach continue.
    fn on_attach(
        &self,
        _ctx: &Arc<Context>,
        _probe: &Probe,
        _registry: &HookRegistry,
    ) -> Result<(), HookConflict> {
        Ok(())
    }
}

/// Builds every patch module in the fixed attach order.
pub fn create_all(ctx: &Arc<Context>) -> Vec<Box<dyn Module>> {
    vec![
        Box::new(theme::ThemeModule::load(ctx)),
        Box::new(syscolors::SysColorsModule),
        Box::new(fonts::FontsModule::load(ctx)),
        Box::new(drawables::DrawablesModule),
    ]
}
