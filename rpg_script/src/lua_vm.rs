use std::cell::RefCell;
use std::mem;
use std::rc::Rc;

use log::{debug, error, warn};
use mlua::{
    Function, HookTriggers, Lua, LuaOptions, LuaSerdeExt, MultiValue, RegistryKey, StdLib, Table,
    Thread, ThreadStatus, Value,
};

use crate::shared::SharedHandles;
use crate::vm::{ContextState, ScriptVm, SpawnRequest};
use crate::watchdog::Deadline;
use crate::ScriptError;

/// Script function a thread starts from.
#[derive(Debug)]
pub enum LuaFunction {
    /// Global looked up when the thread is prepared.
    Global(String),
    /// Function value handed over by a script.
    Registered(RegistryKey),
}

impl LuaFunction {
    pub fn global(name: impl Into<String>) -> Self {
        LuaFunction::Global(name.into())
    }
}

/// Argument passed to a thread's first resume.
#[derive(Debug)]
pub enum LuaArgs {
    Json(serde_json::Value),
    Registered(RegistryKey),
}

pub type LuaHandle = Rc<RegistryKey>;

#[derive(Debug)]
pub struct LuaContext {
    label: String,
    thread: Option<RegistryKey>,
    pending_args: Option<RegistryKey>,
    results: Vec<serde_json::Value>,
    state: ContextState,
}

impl LuaContext {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    /// Values returned by the thread's function, converted to JSON. Values
    /// without a JSON form (functions, userdata) are skipped.
    pub fn results(&self) -> &[serde_json::Value] {
        &self.results
    }
}

/// State reachable from script callbacks. Never borrowed across a resume.
#[derive(Debug, Default)]
struct LuaBridge {
    spawned: Vec<SpawnRequest<LuaFunction, LuaArgs>>,
    executing: Option<String>,
    abort_requested: bool,
    watchdog_fired: bool,
    shared: SharedHandles<LuaHandle>,
}

/// Lua 5.1 backend for the script scheduler.
///
/// Besides the safe standard library, scripts see `create_thread(fn[, args])`,
/// `yield(...)`, `abort()`, `make_shared(value, name)`, `get_shared(name)`,
/// `dprint(msg)` and `eprint(msg)`.
pub struct LuaVm {
    lua: Lua,
    bridge: Rc<RefCell<LuaBridge>>,
    next_label: u64,
}

impl LuaVm {
    pub fn new() -> Result<Self, ScriptError> {
        let lua = Lua::new_with(StdLib::ALL_SAFE, LuaOptions::default())?;
        let vm = LuaVm {
            lua,
            bridge: Rc::default(),
            next_label: 1,
        };
        vm.install_globals()?;
        Ok(vm)
    }

    /// The interpreter, for registering host functions.
    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// Runs a chunk on the main state; used to define the functions threads
    /// are later created from.
    pub fn load_chunk(&self, source: &str, name: &str) -> Result<(), ScriptError> {
        self.lua.load(source).set_name(name).exec()?;
        Ok(())
    }

    /// Label of the thread being resumed, if any.
    pub fn executing(&self) -> Option<String> {
        self.bridge.borrow().executing.clone()
    }

    fn install_globals(&self) -> mlua::Result<()> {
        let globals = self.lua.globals();

        self.lua
            .load("yield = coroutine.yield")
            .set_name("=prelude")
            .exec()?;

        let bridge = self.bridge.clone();
        let create_thread = self.lua.create_function(
            move |lua, (function, args): (Value, Option<Table>)| {
                let function = match function {
                    Value::Function(function) => function,
                    other => {
                        error!("create_thread: Invalid function ({})", other.type_name());
                        return Ok(false);
                    }
                };
                let function = lua.create_registry_value(function)?;
                let args = args
                    .map(|table| lua.create_registry_value(table))
                    .transpose()?;
                bridge.borrow_mut().spawned.push(SpawnRequest {
                    function: LuaFunction::Registered(function),
                    args: args.map(LuaArgs::Registered),
                });
                Ok(true)
            },
        )?;
        globals.set("create_thread", create_thread)?;

        let bridge = self.bridge.clone();
        let abort = self.lua.create_function(move |_, ()| -> mlua::Result<()> {
            bridge.borrow_mut().abort_requested = true;
            Err(mlua::Error::RuntimeError("script aborted".to_string()))
        })?;
        globals.set("abort", abort)?;

        let bridge = self.bridge.clone();
        let make_shared =
            self.lua
                .create_function(move |lua, (value, name): (Value, String)| {
                    let key = lua.create_registry_value(value)?;
                    let shared = bridge.borrow().shared.clone();
                    shared.borrow_mut().publish(&name, Rc::new(key));
                    Ok(())
                })?;
        globals.set("make_shared", make_shared)?;

        let bridge = self.bridge.clone();
        let get_shared = self.lua.create_function(move |lua, name: String| {
            let handle = bridge.borrow().shared.borrow().fetch(&name);
            match handle {
                Some(key) => lua.registry_value::<Value>(&key),
                None => Ok(Value::Nil),
            }
        })?;
        globals.set("get_shared", get_shared)?;

        for (name, is_error) in [("dprint", false), ("eprint", true)] {
            let bridge = self.bridge.clone();
            let print = self.lua.create_function(move |lua, message: String| {
                let line = lua
                    .inspect_stack(1)
                    .map(|debug| debug.curr_line())
                    .unwrap_or(-1);
                let label = bridge
                    .borrow()
                    .executing
                    .clone()
                    .unwrap_or_else(|| "main".to_string());
                if is_error {
                    error!("[{label}:{line}] {message}");
                } else {
                    debug!("[{label}:{line}] {message}");
                }
                Ok(())
            })?;
            globals.set(name, print)?;
        }

        Ok(())
    }

    fn release(&self, key: RegistryKey) {
        if let Err(err) = self.lua.remove_registry_value(key) {
            warn!("failed to release registry value: {err}");
        }
    }

    fn release_context(&self, context: &mut LuaContext) {
        if let Some(key) = context.thread.take() {
            self.release(key);
        }
        if let Some(key) = context.pending_args.take() {
            self.release(key);
        }
    }
}

impl ScriptVm for LuaVm {
    type Function = LuaFunction;
    type Args = LuaArgs;
    type Context = LuaContext;
    type Handle = LuaHandle;

    fn prepare(
        &mut self,
        function: LuaFunction,
        args: Option<LuaArgs>,
    ) -> Result<LuaContext, ScriptError> {
        let (label, function) = match function {
            LuaFunction::Global(name) => {
                let value: Value = self.lua.globals().get(name.as_str())?;
                match value {
                    Value::Function(function) => (name, function),
                    other => {
                        return Err(ScriptError::InvalidFunction(format!(
                            "{name} is {}",
                            other.type_name()
                        )))
                    }
                }
            }
            LuaFunction::Registered(key) => {
                let function: Function = self
                    .lua
                    .registry_value(&key)
                    .map_err(|err| ScriptError::InvalidFunction(err.to_string()))?;
                self.lua.remove_registry_value(key)?;
                let label = format!("thread#{}", self.next_label);
                self.next_label += 1;
                (label, function)
            }
        };

        let thread = self
            .lua
            .create_thread(function)
            .and_then(|thread| self.lua.create_registry_value(thread))
            .map_err(|err| ScriptError::ContextAllocation(err.to_string()))?;
        let pending_args = match args {
            None => None,
            Some(LuaArgs::Registered(key)) => Some(key),
            Some(LuaArgs::Json(value)) => {
                let value = self.lua.to_value(&value)?;
                Some(self.lua.create_registry_value(value)?)
            }
        };

        Ok(LuaContext {
            label,
            thread: Some(thread),
            pending_args,
            results: Vec::new(),
            state: ContextState::Ready,
        })
    }

    fn resume(&mut self, context: &mut LuaContext, deadline: &Deadline) -> ContextState {
        if !context.state.is_resumable() {
            return context.state;
        }
        let thread = match context
            .thread
            .as_ref()
            .map(|key| self.lua.registry_value::<Thread>(key))
        {
            Some(Ok(thread)) => thread,
            Some(Err(err)) => {
                error!("script {} lost its thread: {err}", context.label);
                context.state = ContextState::Aborted;
                return context.state;
            }
            None => {
                context.state = ContextState::Aborted;
                return context.state;
            }
        };
        if !matches!(thread.status(), ThreadStatus::Resumable) {
            context.state = ContextState::Finished;
            return context.state;
        }

        let hook_deadline = deadline.clone();
        let hook_bridge = self.bridge.clone();
        let hook_label = context.label.clone();
        thread.set_hook(HookTriggers::new().every_line(), move |_lua, debug| {
            if hook_deadline.is_expired() {
                hook_bridge.borrow_mut().watchdog_fired = true;
                error!(
                    "script {hook_label} exceeded its time budget at line {}",
                    debug.curr_line()
                );
                return Err(mlua::Error::RuntimeError(format!(
                    "script {hook_label} timed out"
                )));
            }
            Ok(())
        });

        let args = match context.pending_args.take() {
            Some(key) => {
                let value = self.lua.registry_value::<Value>(&key).unwrap_or(Value::Nil);
                self.release(key);
                MultiValue::from_vec(vec![value])
            }
            None => MultiValue::new(),
        };

        {
            let mut bridge = self.bridge.borrow_mut();
            bridge.executing = Some(context.label.clone());
            bridge.abort_requested = false;
            bridge.watchdog_fired = false;
        }
        context.state = ContextState::Running;
        let result = thread.resume::<_, MultiValue>(args);
        let (abort_requested, watchdog_fired) = {
            let mut bridge = self.bridge.borrow_mut();
            bridge.executing = None;
            (bridge.abort_requested, bridge.watchdog_fired)
        };

        // A script may catch the abort or timeout error with pcall; the
        // thread is dead either way.
        if abort_requested || watchdog_fired {
            if abort_requested {
                debug!("script {} aborted itself", context.label);
            }
            context.state = ContextState::Aborted;
            return context.state;
        }

        context.state = match result {
            Ok(values) => match thread.status() {
                ThreadStatus::Resumable => ContextState::Suspended,
                ThreadStatus::Unresumable | ThreadStatus::Error => {
                    context.results = values
                        .into_iter()
                        .filter_map(|value| self.lua.from_value(value).ok())
                        .collect();
                    ContextState::Finished
                }
            },
            Err(err) => {
                error!("script {} failed: {err}", context.label);
                ContextState::Aborted
            }
        };
        context.state
    }

    fn abort(&mut self, context: &mut LuaContext) {
        if context.state.is_resumable() {
            debug!("script {} aborted", context.label);
        }
        self.release_context(context);
        context.state = ContextState::Aborted;
    }

    fn recycle(&mut self, mut context: LuaContext) {
        self.release_context(&mut context);
    }

    fn take_spawned(&mut self) -> Vec<SpawnRequest<LuaFunction, LuaArgs>> {
        mem::take(&mut self.bridge.borrow_mut().spawned)
    }

    fn collect_step(&mut self) {
        if let Err(err) = self.lua.gc_step() {
            warn!("incremental gc step failed: {err}");
        }
    }

    fn collect_full(&mut self) {
        self.lua.expire_registry_values();
        if let Err(err) = self.lua.gc_collect() {
            warn!("full gc failed: {err}");
        }
    }

    fn label(&self, context: &LuaContext) -> String {
        context.label.clone()
    }

    fn bind_registry(&mut self, registry: SharedHandles<LuaHandle>) {
        self.bridge.borrow_mut().shared = registry;
    }
}
