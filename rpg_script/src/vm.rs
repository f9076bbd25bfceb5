use std::fmt;

use serde::Serialize;

use crate::shared::SharedHandles;
use crate::watchdog::Deadline;
use crate::ScriptError;

/// Lifecycle of a VM context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextState {
    /// Prepared but never resumed.
    Ready,
    /// Inside a `resume` call.
    Running,
    /// Yielded; will continue on the next resume.
    Suspended,
    Finished,
    /// Stopped by an error, an explicit abort or the watchdog.
    Aborted,
}

impl ContextState {
    pub fn is_resumable(self) -> bool {
        matches!(self, ContextState::Ready | ContextState::Suspended)
    }
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ContextState::Ready => "ready",
            ContextState::Running => "running",
            ContextState::Suspended => "suspended",
            ContextState::Finished => "finished",
            ContextState::Aborted => "aborted",
        };
        f.write_str(label)
    }
}

/// A thread a script asked for while it was being resumed.
#[derive(Debug)]
pub struct SpawnRequest<F, A> {
    pub function: F,
    pub args: Option<A>,
}

/// The embedded interpreter as seen by the scheduler.
///
/// Script callbacks never reach the scheduler directly: threads spawned from
/// inside `resume` are queued by the VM and collected with
/// [`ScriptVm::take_spawned`] once the resume has returned.
pub trait ScriptVm {
    type Function;
    type Args;
    type Context;
    /// Value stored in the shared registry.
    type Handle: Clone;

    /// Binds `function` and `args` to a fresh context without running it.
    fn prepare(
        &mut self,
        function: Self::Function,
        args: Option<Self::Args>,
    ) -> Result<Self::Context, ScriptError>;

    /// Runs `context` until it yields, finishes or faults. The VM aborts the
    /// run once `deadline` has expired.
    fn resume(&mut self, context: &mut Self::Context, deadline: &Deadline) -> ContextState;

    fn abort(&mut self, context: &mut Self::Context);

    /// Releases a context that will never be resumed again.
    fn recycle(&mut self, context: Self::Context);

    fn take_spawned(&mut self) -> Vec<SpawnRequest<Self::Function, Self::Args>>;

    fn collect_step(&mut self);

    fn collect_full(&mut self);

    fn label(&self, context: &Self::Context) -> String;

    /// Gives script callbacks access to the runtime's shared registry.
    fn bind_registry(&mut self, _registry: SharedHandles<Self::Handle>) {}
}
