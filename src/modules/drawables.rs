//! Redirects drawable lookups to the override directory: a requested drawable resolves to a
//! local file URI when a matching image exists there, and falls through otherwise.

use std::path::PathBuf;
use std::sync::Arc;

use cached::proc_macro::cached;

use crate::context::Context;
use crate::hook::{HookConflict, HookRegistry};
use crate::host::{targets, Probe, Value};
use crate::modules::Module;

pub struct DrawablesModule;

/// Resolves a drawable name against the override directory. Memoized for the process lifetime,
/// so the hot path pays the filesystem probe at most once per name; hook call-ins can arrive
/// from several host threads at once, which the cache's locking absorbs.
#[cached]
fn drawable_uri(dir: PathBuf, name: String) -> Option<String> {
    let path = dir.join(format!("{name}.png"));

    path.is_file().then(|| format!("file://{}", path.display()))
}

impl Module for DrawablesModule {
    fn name(&self) -> &'static str {
        "drawables"
    }

    fn on_attach(
        &self,
        ctx: &Arc<Context>,
        probe: &Probe,
        registry: &HookRegistry,
    ) -> Result<(), HookConflict> {
        let Some(target) = probe.resolve(targets::DRAWABLE_HELPER, targets::resource_drawable_uri())
        else {
            return Ok(());
        };

        let dir = ctx.drawables_dir();

        registry.register_before(&target, move |invocation| {
            let Some(name) = invocation.args.get(1).and_then(Value::as_str) else {
                return;
            };

            if let Some(uri) = drawable_uri(dir.clone(), name.to_string()) {
                invocation.set_result(Value::Str(uri));
            }
        });

        Ok(())
    }
}
