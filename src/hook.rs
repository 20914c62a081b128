//! Hook registration and dispatch for intercepted host methods.
//!
//! Each resolved target carries an ordered list of before hooks, an ordered list of after hooks
//! and at most one replace hook. The bootstrap routes every intercepted call through
//! [`HookRegistry::dispatch`], which owns the ordering contract:
//!
//! - before hooks run in registration order ahead of the native body; any of them may supply a
//!   result, which skips the body, the replace hook and all after hooks for that invocation;
//! - a replace hook runs instead of the native body and owns the return value;
//! - after hooks run in registration order once the body (native or replacement) has completed,
//!   and may overwrite the result.
//!
//! Registration order is the only ordering guarantee, so callers control relative hook order by
//! attaching modules in a fixed sequence.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::host::{Capability, HostRuntime, MethodToken, Value};

/// A single intercepted call. Hooks may rewrite arguments before the native body sees them and
/// may supply or overwrite the result.
pub struct Invocation {
    pub receiver: Value,
    pub args: Vec<Value>,
    result: Option<Value>,
    settled: bool,
}

impl Invocation {
    fn new(receiver: Value, args: Vec<Value>) -> Invocation {
        Invocation {
            receiver,
            args,
            result: None,
            settled: false,
        }
    }

    /// Supplies the call's result. From a before hook this also suppresses the native body and
    /// the remaining phases of the invocation.
    pub fn set_result(&mut self, value: Value) {
        self.result = Some(value);
        self.settled = true;
    }

    /// The result produced so far, if any. After hooks see the body's result here.
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    fn take_result(&mut self) -> Value {
        self.result.take().unwrap_or(Value::Unit)
    }
}

type HookFn = Arc<dyn Fn(&mut Invocation) + Send + Sync>;

/// Two replace hooks were registered for the same target. This is a defect in module
/// composition, and the only hook-related failure that aborts an attach.
#[derive(Debug, thiserror::Error)]
#[error("a replace hook is already registered for {target}")]
pub struct HookConflict {
    pub target: String,
}

#[derive(Default)]
struct TargetHooks {
    label: String,
    before: Vec<HookFn>,
    after: Vec<HookFn>,
    replace: Option<HookFn>,
}

/// Holds every installed hook and dispatches intercepted calls. Lives for the process lifetime;
/// hooks are never removed.
pub struct HookRegistry {
    host: Arc<dyn HostRuntime>,
    targets: Mutex<HashMap<MethodToken, TargetHooks>>,
}

impl HookRegistry {
    pub fn new(host: Arc<dyn HostRuntime>) -> HookRegistry {
        HookRegistry {
            host,
            targets: Mutex::new(HashMap::new()),
        }
    }

    fn with_target<R>(&self, target: &Capability, f: impl FnOnce(&mut TargetHooks) -> R) -> R {
        let mut targets = self.targets.lock();
        let hooks = targets.entry(target.token()).or_insert_with(|| TargetHooks {
            label: target.to_string(),
            ..TargetHooks::default()
        });

        f(hooks)
    }

    pub fn register_before(
        &self,
        target: &Capability,
        hook: impl Fn(&mut Invocation) + Send + Sync + 'static,
    ) {
        self.with_target(target, |hooks| hooks.before.push(Arc::new(hook)));
    }

    pub fn register_after(
        &self,
        target: &Capability,
        hook: impl Fn(&mut Invocation) + Send + Sync + 'static,
    ) {
        self.with_target(target, |hooks| hooks.after.push(Arc::new(hook)));
    }

    pub fn register_replace(
        &self,
        target: &Capability,
        hook: impl Fn(&mut Invocation) + Send + Sync + 'static,
    ) -> Result<(), HookConflict> {
        self.with_target(target, |hooks| {
            if hooks.replace.is_some() {
                return Err(HookConflict {
                    target: hooks.label.clone(),
                });
            }

            hooks.replace = Some(Arc::new(hook));
            Ok(())
        })
    }

    /// Runs an intercepted call through its hooks. Calls for targets nothing was registered on
    /// fall straight through to the native body.
    ///
    /// Call-ins can arrive from any host thread, so the hook lists are snapshotted out of the
    /// registry lock before anything user-supplied runs.
    pub fn dispatch(&self, method: MethodToken, receiver: Value, args: Vec<Value>) -> Value {
        let snapshot = {
            let targets = self.targets.lock();
            targets.get(&method).map(|hooks| {
                (
                    hooks.label.clone(),
                    hooks.before.clone(),
                    hooks.replace.clone(),
                    hooks.after.clone(),
                )
            })
        };

        let Some((label, before, replace, after)) = snapshot else {
            return self.host.invoke_original(method, &receiver, &args);
        };

        let mut invocation = Invocation::new(receiver, args);

        for hook in &before {
            run_isolated(&label, hook, &mut invocation);

            if invocation.settled {
                return invocation.take_result();
            }
        }

        match &replace {
            Some(hook) => run_isolated(&label, hook, &mut invocation),
            None => {
                let result =
                    self.host
                        .invoke_original(method, &invocation.receiver, &invocation.args);
                invocation.result = Some(result);
            }
        }

        for hook in &after {
            run_isolated(&label, hook, &mut invocation);
        }

        invocation.take_result()
    }
}

/// Runs one hook body, containing any panic so it can never unwind into the host process. A
/// panicking hook is logged and treated as a no-op.
fn run_isolated(label: &str, hook: &HookFn, invocation: &mut Invocation) {
    if catch_unwind(AssertUnwindSafe(|| hook(invocation))).is_err() {
        log::error!("a hook on {label} panicked; ignoring it for this call");
    }
}
