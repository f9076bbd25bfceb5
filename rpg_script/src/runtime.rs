use std::rc::Rc;

use crate::scheduler::{SchedulerConfig, ScriptScheduler, ThreadId};
use crate::shared::{SharedHandles, SharedRegistry};
use crate::vm::ScriptVm;
use crate::watchdog::{Clock, SystemClock};

/// Owns a VM together with the threads running on it and the registry they
/// share. Dropping the runtime aborts whatever is still running.
pub struct ScriptRuntime<V: ScriptVm> {
    vm: V,
    scheduler: ScriptScheduler<V>,
    shared: SharedHandles<V::Handle>,
}

impl<V: ScriptVm> ScriptRuntime<V> {
    pub fn new(vm: V) -> Self {
        Self::with_config(vm, SchedulerConfig::default(), Rc::new(SystemClock))
    }

    pub fn with_config(mut vm: V, config: SchedulerConfig, clock: Rc<dyn Clock>) -> Self {
        let shared = SharedRegistry::handles();
        vm.bind_registry(shared.clone());
        ScriptRuntime {
            vm,
            scheduler: ScriptScheduler::with_clock(config, clock),
            shared,
        }
    }

    pub fn create_thread(
        &mut self,
        function: V::Function,
        args: Option<V::Args>,
        keep_alive: bool,
    ) -> Option<ThreadId> {
        self.scheduler
            .create_thread(&mut self.vm, function, args, keep_alive)
    }

    pub fn tick(&mut self) -> usize {
        self.scheduler.tick(&mut self.vm)
    }

    pub fn abort_all(&mut self) {
        self.scheduler.abort_all(&mut self.vm);
    }

    pub fn publish(&self, name: &str, handle: V::Handle) {
        self.shared.borrow_mut().publish(name, handle);
    }

    pub fn fetch(&self, name: &str) -> Option<V::Handle> {
        self.shared.borrow().fetch(name)
    }

    pub fn take_retained(&mut self, id: ThreadId) -> Option<V::Context> {
        self.scheduler.take_retained(id)
    }

    pub fn shared(&self) -> &SharedHandles<V::Handle> {
        &self.shared
    }

    pub fn scheduler(&self) -> &ScriptScheduler<V> {
        &self.scheduler
    }

    pub fn vm(&self) -> &V {
        &self.vm
    }

    pub fn vm_mut(&mut self) -> &mut V {
        &mut self.vm
    }
}

impl<V: ScriptVm> Drop for ScriptRuntime<V> {
    fn drop(&mut self) {
        if !self.scheduler.is_empty() {
            self.abort_all();
        }
    }
}
