use std::rc::Rc;
use std::time::Duration;

use crate::shared::SharedHandles;
use crate::vm::{ContextState, ScriptVm, SpawnRequest};
use crate::watchdog::{Deadline, ManualClock};
use crate::ScriptError;

/// Instructions understood by [`FakeVm`].
#[derive(Debug)]
pub(crate) enum Step {
    Yield,
    Return,
    /// Burns manual-clock time until the watchdog fires.
    Spin,
    Spawn(Script),
    Fault,
    Publish(&'static str, u32),
}

pub(crate) type Script = Rc<Vec<Step>>;

pub(crate) fn script(steps: Vec<Step>) -> Script {
    Rc::new(steps)
}

#[derive(Debug)]
pub(crate) struct FakeContext {
    pub(crate) label: String,
    pub(crate) script: Script,
    pub(crate) pc: usize,
    pub(crate) args: Option<u32>,
    pub(crate) state: ContextState,
}

/// Scripted VM driven by a [`ManualClock`].
#[derive(Debug)]
pub(crate) struct FakeVm {
    clock: Rc<ManualClock>,
    spawned: Vec<SpawnRequest<Option<Script>, u32>>,
    registry: Option<SharedHandles<u32>>,
    next_label: usize,
    pub(crate) fail_allocation: bool,
    pub(crate) resumed: Vec<String>,
    pub(crate) resumes: usize,
    pub(crate) aborted: usize,
    pub(crate) pooled: usize,
    pub(crate) gc_steps: usize,
    pub(crate) full_collections: usize,
}

impl FakeVm {
    pub(crate) fn new(clock: Rc<ManualClock>) -> Self {
        FakeVm {
            clock,
            spawned: Vec::new(),
            registry: None,
            next_label: 1,
            fail_allocation: false,
            resumed: Vec::new(),
            resumes: 0,
            aborted: 0,
            pooled: 0,
            gc_steps: 0,
            full_collections: 0,
        }
    }
}

impl ScriptVm for FakeVm {
    type Function = Option<Script>;
    type Args = u32;
    type Context = FakeContext;
    type Handle = u32;

    fn prepare(
        &mut self,
        function: Option<Script>,
        args: Option<u32>,
    ) -> Result<FakeContext, ScriptError> {
        let Some(script) = function else {
            return Err(ScriptError::InvalidFunction("nil".to_string()));
        };
        if self.fail_allocation {
            return Err(ScriptError::ContextAllocation("pool exhausted".to_string()));
        }
        let label = format!("fake#{}", self.next_label);
        self.next_label += 1;
        Ok(FakeContext {
            label,
            script,
            pc: 0,
            args,
            state: ContextState::Ready,
        })
    }

    fn resume(&mut self, context: &mut FakeContext, deadline: &Deadline) -> ContextState {
        if !context.state.is_resumable() {
            return context.state;
        }
        self.resumes += 1;
        self.resumed.push(context.label.clone());
        context.state = ContextState::Running;

        let script = context.script.clone();
        while let Some(step) = script.get(context.pc) {
            context.pc += 1;
            match step {
                Step::Yield => {
                    context.state = ContextState::Suspended;
                    return context.state;
                }
                Step::Return => break,
                Step::Spin => {
                    while !deadline.is_expired() {
                        self.clock.advance(Duration::from_millis(1));
                    }
                    context.state = ContextState::Aborted;
                    return context.state;
                }
                Step::Spawn(child) => self.spawned.push(SpawnRequest {
                    function: Some(child.clone()),
                    args: None,
                }),
                Step::Fault => {
                    context.state = ContextState::Aborted;
                    return context.state;
                }
                Step::Publish(name, value) => {
                    if let Some(registry) = &self.registry {
                        registry.borrow_mut().publish(name, *value);
                    }
                }
            }
        }
        context.state = ContextState::Finished;
        context.state
    }

    fn abort(&mut self, context: &mut FakeContext) {
        self.aborted += 1;
        context.state = ContextState::Aborted;
    }

    fn recycle(&mut self, _context: FakeContext) {
        self.pooled += 1;
    }

    fn take_spawned(&mut self) -> Vec<SpawnRequest<Option<Script>, u32>> {
        std::mem::take(&mut self.spawned)
    }

    fn collect_step(&mut self) {
        self.gc_steps += 1;
    }

    fn collect_full(&mut self) {
        self.full_collections += 1;
    }

    fn label(&self, context: &FakeContext) -> String {
        context.label.clone()
    }

    fn bind_registry(&mut self, registry: SharedHandles<u32>) {
        self.registry = Some(registry);
    }
}
