//! The script injection pipeline: replaces the host's script-load entry points so that one
//! intercepted call turns into the full injected sequence.
//!
//! Order is the contract here. On every intercepted load: settle the bundle fetch, publish the
//! loader payload as a global, run each preload script in sorted order, then run the cached
//! bundle with the original call's flags. The native loader body never runs; this hook *is*
//! the loader.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use itertools::Itertools;
use serde_json::{Map, Value as Json};

use crate::context::Context;
use crate::hook::{HookConflict, HookRegistry, Invocation};
use crate::host::{targets, Capability, Probe, Value};
use crate::modules::Module;
use crate::update::FetchHandle;
use crate::{GLOBAL_NAME, LOADER_NAME};

struct Pipeline {
    ctx: Arc<Context>,
    fetch: Arc<FetchHandle>,
    modules: Vec<Box<dyn Module>>,
    load_script_from_file: Capability,
    set_global_variable: Capability,
}

/// Resolves the script runtime's entry points and installs the replacement loader on them.
/// If the runtime's members can't be resolved the pipeline stays uninstalled and the host
/// loads its own scripts untouched.
pub fn install(
    ctx: &Arc<Context>,
    probe: &Probe,
    registry: &HookRegistry,
    modules: Vec<Box<dyn Module>>,
    fetch: Arc<FetchHandle>,
) -> Result<(), HookConflict> {
    let load_script_from_file =
        probe.resolve(targets::SCRIPT_RUNTIME, targets::load_script_from_file());
    let set_global_variable =
        probe.resolve(targets::SCRIPT_RUNTIME, targets::set_global_variable());

    let (Some(load_script_from_file), Some(set_global_variable)) =
        (load_script_from_file, set_global_variable)
    else {
        log::warn!("script runtime entry points unavailable; bundle injection disabled");
        return Ok(());
    };

    let pipeline = Arc::new(Pipeline {
        ctx: Arc::clone(ctx),
        fetch,
        modules,
        load_script_from_file: load_script_from_file.clone(),
        set_global_variable,
    });

    // The same replacement serves both entry points; whichever the host calls first runs the
    // injected sequence.
    {
        let pipeline = Arc::clone(&pipeline);
        registry.register_replace(&load_script_from_file, move |invocation| {
            pipeline.run(invocation)
        })?;
    }

    if let Some(load_script_from_assets) =
        probe.resolve(targets::SCRIPT_RUNTIME, targets::load_script_from_assets())
    {
        registry.register_replace(&load_script_from_assets, move |invocation| {
            pipeline.run(invocation)
        })?;
    }

    Ok(())
}

impl Pipeline {
    fn run(&self, invocation: &mut Invocation) {
        let outcome = self.fetch.wait();
        log::info!("bundle fetch settled: {outcome:?}");

        let host = self.ctx.host();

        // The original call's synchronous flag carries over, so injected scripts load the same
        // way the suppressed native call would have.
        let sync_flag = invocation.args.get(2).cloned().unwrap_or(Value::Bool(true));

        let payload = build_payload(&self.ctx, &self.modules);

        host.invoke_original(
            self.set_global_variable.token(),
            &invocation.receiver,
            &[
                Value::Str(GLOBAL_NAME.to_string()),
                Value::Str(payload),
            ],
        );

        for script in preload_scripts(&self.ctx.preloads_dir()) {
            let path = script.display().to_string();
            log::info!("executing preload {path}");

            host.invoke_original(
                self.load_script_from_file.token(),
                &invocation.receiver,
                &[Value::Str(path.clone()), Value::Str(path), sync_flag.clone()],
            );
        }

        let bundle = self.ctx.bundle_path();

        if bundle.exists() {
            let path = bundle.display().to_string();

            host.invoke_original(
                self.load_script_from_file.token(),
                &invocation.receiver,
                &[Value::Str(path.clone()), Value::Str(path), sync_flag],
            );
        } else {
            log::warn!("no cached bundle to execute; this launch gets preloads only");
        }

        // Suppress the native loader.
        invocation.set_result(Value::Unit);
    }
}

fn build_payload(ctx: &Context, modules: &[Box<dyn Module>]) -> String {
    let mut payload = Map::new();

    payload.insert(
        "loaderName".to_string(),
        Json::String(LOADER_NAME.to_string()),
    );
    payload.insert(
        "loaderVersion".to_string(),
        Json::String(env!("CARGO_PKG_VERSION").to_string()),
    );

    for module in modules {
        module.contribute_config(ctx, &mut payload);
    }

    Json::Object(payload).to_string()
}

/// Every `.js` file in the preloads directory, sorted by path so the execution order is stable
/// across launches and filesystems.
fn preload_scripts(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = dir.read_dir() else {
        return Vec::new();
    };

    entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file() && path.extension().map_or(false, |extension| extension == "js")
        })
        .sorted()
        .collect()
}
