//! Cooperative script threads.
//!
//! A [`ScriptRuntime`] multiplexes any number of suspendable script
//! executions onto one per-frame tick. Each tick resumes every live thread
//! once in creation order; a watchdog deadline bounds every resume so a
//! runaway script is aborted instead of freezing the frame.
//!
//! The embedded interpreter sits behind [`ScriptVm`]; [`LuaVm`] is the
//! `mlua` backend.

mod lua_vm;
mod runtime;
mod scheduler;
mod shared;
mod vm;
mod watchdog;

#[cfg(test)]
mod testing;

use thiserror::Error;

pub use lua_vm::{LuaArgs, LuaContext, LuaFunction, LuaHandle, LuaVm};
pub use runtime::ScriptRuntime;
pub use scheduler::{SchedulerConfig, ScriptScheduler, ThreadId};
pub use shared::{SharedHandles, SharedRegistry};
pub use vm::{ContextState, ScriptVm, SpawnRequest};
pub use watchdog::{Clock, Deadline, ManualClock, SystemClock, Watchdog, DEFAULT_WATCHDOG};

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("invalid script function: {0}")]
    InvalidFunction(String),
    #[error("cannot allocate script context: {0}")]
    ContextAllocation(String),
    #[error("lua error: {0}")]
    Lua(#[from] mlua::Error),
}
