//! Fights the side effects of a renamed host package: bundled resources stay keyed to the
//! expected package name, so lookups made under the running name are rewritten back.

use std::sync::Arc;

use crate::context::Context;
use crate::hook::HookRegistry;
use crate::host::{targets, Probe, Value};

pub fn install(ctx: &Arc<Context>, probe: &Probe, registry: &HookRegistry) {
    if ctx.package_name() == targets::EXPECTED_PACKAGE {
        return;
    }

    let Some(target) = probe.resolve(targets::RESOURCES, targets::get_identifier()) else {
        return;
    };

    log::info!(
        "aliasing resource lookups for {} back to {}",
        ctx.package_name(),
        targets::EXPECTED_PACKAGE
    );

    let current = ctx.package_name().to_string();

    registry.register_before(&target, move |invocation| {
        if let Some(Value::Str(package)) = invocation.args.get_mut(2) {
            if *package == current {
                *package = targets::EXPECTED_PACKAGE.to_string();
            }
        }
    });
}
