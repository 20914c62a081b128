//! Burrow grafts a secondary script runtime and a theming patch layer onto one fixed host
//! application at process-attach time, without modifying the installed package.
//!
//! The bootstrap plumbing hands [`attach`] an implementation of [`HostRuntime`] and keeps the
//! returned [`Engine`], routing every intercepted host call through [`Engine::dispatch`]. From
//! there the engine owns the rest: probing the host's capabilities, attaching the patch
//! modules, keeping the remote script bundle cached and fresh, and running the injected script
//! sequence in place of the host's own loader.

mod alias;
mod config;
mod context;
mod hook;
mod host;
mod logging;
mod modules;
mod pipeline;
mod update;

pub use config::{LoaderConfig, DEFAULT_BUNDLE_URL};
pub use context::{Context, Notifier, NAMESPACE};
pub use hook::{HookConflict, HookRegistry, Invocation};
pub use host::{
    targets, Capability, FontSource, HostRuntime, MethodToken, Probe, Signature, Value,
};
pub use modules::Module;
pub use update::FetchOutcome;

use std::path::PathBuf;
use std::sync::Arc;

/// Identifies the loader to the remote bundle source and in the injected payload.
pub const LOADER_NAME: &str = "Burrow";

/// The global the loader payload is published under before any script runs.
pub const GLOBAL_NAME: &str = "__BURROW_LOADER__";

pub struct AttachParams {
    /// The host app's private data directory.
    pub data_dir: PathBuf,

    /// The package name the host is actually running under.
    pub package_name: String,

    /// Receives short user-facing notices. Optional; notices are always logged too.
    pub notifier: Option<Notifier>,
}

/// A live attach. The bootstrap keeps this for the process lifetime and feeds intercepted
/// calls into [`Engine::dispatch`].
pub struct Engine {
    ctx: Arc<Context>,
    registry: Arc<HookRegistry>,
}

impl Engine {
    /// Runs an intercepted host call through the installed hooks.
    pub fn dispatch(&self, method: MethodToken, receiver: Value, args: Vec<Value>) -> Value {
        self.registry.dispatch(method, receiver, args)
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }
}

/// Wires the engine into the host: builds the attach-time context, attaches every patch
/// module, starts the bundle fetch in the background and installs the injection and aliasing
/// hooks.
///
/// Individual features degrade on their own when the host is missing a capability or a file is
/// bad; the only error that aborts an attach is a structural hook conflict, which means the
/// module composition itself is broken.
pub fn attach(host: Arc<dyn HostRuntime>, params: AttachParams) -> eyre::Result<Engine> {
    let ctx = Arc::new(Context::new(Arc::clone(&host), params)?);

    logging::init(ctx.log_dir());

    log::info!(
        "burrow {} attaching to {}",
        env!("CARGO_PKG_VERSION"),
        ctx.package_name()
    );

    let probe = Probe::new(Arc::clone(&host));
    let registry = Arc::new(HookRegistry::new(Arc::clone(&host)));

    let modules = modules::create_all(&ctx);

    for module in &modules {
        log::debug!("attaching module {}", module.name());
        module.on_attach(&ctx, &probe, &registry)?;
    }

    // Fetching starts now; nothing waits on it until the load hook actually fires.
    let fetch = update::start(&ctx);

    pipeline::install(&ctx, &probe, &registry, modules, fetch)?;
    alias::install(&ctx, &probe, &registry);

    log::info!("attach complete");

    Ok(Engine { ctx, registry })
}
