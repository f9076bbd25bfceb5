use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use log::{debug, error, trace, warn};
use serde::Serialize;

use crate::vm::{ContextState, ScriptVm};
use crate::watchdog::{Clock, SystemClock, Watchdog, DEFAULT_WATCHDOG};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ThreadId(u64);

impl ThreadId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Longest a single resume may run before the VM aborts it.
    pub watchdog: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            watchdog: DEFAULT_WATCHDOG,
        }
    }
}

struct ScriptThread<C> {
    id: ThreadId,
    label: String,
    context: C,
    keep_alive: bool,
}

/// Live script threads, resumed once each per tick in creation order.
pub struct ScriptScheduler<V: ScriptVm> {
    threads: Vec<ScriptThread<V::Context>>,
    retained: BTreeMap<ThreadId, V::Context>,
    executing: Option<ThreadId>,
    next_id: u64,
    watchdog: Watchdog,
}

impl<V: ScriptVm> ScriptScheduler<V> {
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_clock(config, Rc::new(SystemClock))
    }

    pub fn with_clock(config: SchedulerConfig, clock: Rc<dyn Clock>) -> Self {
        ScriptScheduler {
            threads: Vec::new(),
            retained: BTreeMap::new(),
            executing: None,
            next_id: 1,
            watchdog: Watchdog::new(config.watchdog, clock),
        }
    }

    /// Prepares a thread for `function`. Nothing runs until the next tick.
    pub fn create_thread(
        &mut self,
        vm: &mut V,
        function: V::Function,
        args: Option<V::Args>,
        keep_alive: bool,
    ) -> Option<ThreadId> {
        let context = match vm.prepare(function, args) {
            Ok(context) => context,
            Err(err) => {
                error!("create_thread failed: {err}");
                return None;
            }
        };
        let id = ThreadId(self.next_id);
        self.next_id += 1;
        let label = vm.label(&context);
        debug!("script thread {id} ({label}) created");
        self.threads.push(ScriptThread {
            id,
            label,
            context,
            keep_alive,
        });
        Some(id)
    }

    /// Resumes every live thread once and returns how many are still alive.
    ///
    /// Threads spawned during the tick are appended and resumed before it
    /// returns.
    pub fn tick(&mut self, vm: &mut V) -> usize {
        let mut index = 0;
        while index < self.threads.len() {
            let deadline = self.watchdog.arm();
            let id = self.threads[index].id;
            self.executing = Some(id);
            let state = vm.resume(&mut self.threads[index].context, &deadline);
            self.executing = None;
            trace!("script thread {id} -> {state}");

            for request in vm.take_spawned() {
                self.create_thread(vm, request.function, request.args, false);
            }

            if state == ContextState::Suspended {
                index += 1;
            } else {
                let thread = self.threads.remove(index);
                self.retire(vm, thread, state);
            }
            vm.collect_step();
        }
        self.threads.len()
    }

    pub fn abort_all(&mut self, vm: &mut V) {
        if !self.threads.is_empty() {
            debug!("aborting {} script thread(s)", self.threads.len());
        }
        for mut thread in self.threads.drain(..) {
            vm.abort(&mut thread.context);
            vm.recycle(thread.context);
        }
        vm.collect_full();
    }

    /// Context of a finished keep-alive thread. Retained contexts stay here
    /// until their creator takes them.
    pub fn take_retained(&mut self, id: ThreadId) -> Option<V::Context> {
        self.retained.remove(&id)
    }

    pub fn retained_count(&self) -> usize {
        self.retained.len()
    }

    /// Thread being resumed right now, if any.
    pub fn executing(&self) -> Option<ThreadId> {
        self.executing
    }

    pub fn is_alive(&self, id: ThreadId) -> bool {
        self.threads.iter().any(|thread| thread.id == id)
    }

    pub fn threads(&self) -> impl Iterator<Item = (ThreadId, &str)> {
        self.threads
            .iter()
            .map(|thread| (thread.id, thread.label.as_str()))
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    fn retire(&mut self, vm: &mut V, thread: ScriptThread<V::Context>, state: ContextState) {
        match state {
            ContextState::Finished => {
                debug!("script thread {} ({}) finished", thread.id, thread.label)
            }
            other => warn!(
                "script thread {} ({}) removed while {other}",
                thread.id, thread.label
            ),
        }
        if thread.keep_alive {
            self.retained.insert(thread.id, thread.context);
        } else {
            vm.recycle(thread.context);
        }
    }
}

impl<V: ScriptVm> fmt::Debug for ScriptScheduler<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptScheduler")
            .field("threads", &self.threads().collect::<Vec<_>>())
            .field("retained", &self.retained.keys().collect::<Vec<_>>())
            .field("executing", &self.executing)
            .field("watchdog", &self.watchdog)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;
    use std::time::Duration;

    use super::{SchedulerConfig, ScriptScheduler};
    use crate::testing::{script, FakeVm, Step};
    use crate::vm::ContextState;
    use crate::watchdog::ManualClock;

    fn scheduler(clock: &Rc<ManualClock>) -> ScriptScheduler<FakeVm> {
        ScriptScheduler::with_clock(
            SchedulerConfig {
                watchdog: Duration::from_millis(100),
            },
            clock.clone(),
        )
    }

    #[test]
    fn yielding_threads_are_resumed_once_per_tick() {
        let clock = Rc::new(ManualClock::new());
        let mut vm = FakeVm::new(clock.clone());
        let mut scheduler = scheduler(&clock);
        for _ in 0..4 {
            let body = script(vec![Step::Yield, Step::Yield]);
            assert!(scheduler.create_thread(&mut vm, Some(body), None, false).is_some());
        }
        assert_eq!(vm.resumes, 0);

        assert_eq!(scheduler.tick(&mut vm), 4);
        assert_eq!(vm.resumes, 4);
        assert_eq!(vm.gc_steps, 4);
        assert_eq!(vm.resumed, vec!["fake#1", "fake#2", "fake#3", "fake#4"]);
    }

    #[test]
    fn runaway_thread_is_aborted_by_watchdog() {
        let clock = Rc::new(ManualClock::new());
        let mut vm = FakeVm::new(clock.clone());
        let mut scheduler = scheduler(&clock);
        let spinner = scheduler
            .create_thread(&mut vm, Some(script(vec![Step::Spin])), None, false)
            .expect("thread");
        scheduler.create_thread(&mut vm, Some(script(vec![Step::Yield])), None, false);

        assert_eq!(scheduler.tick(&mut vm), 1);
        assert!(!scheduler.is_alive(spinner));
        assert!(clock.elapsed() >= Duration::from_millis(100));
        assert_eq!(vm.pooled, 1);
    }

    #[test]
    fn invalid_function_creates_nothing() {
        let clock = Rc::new(ManualClock::new());
        let mut vm = FakeVm::new(clock.clone());
        let mut scheduler = scheduler(&clock);
        assert_eq!(scheduler.create_thread(&mut vm, None, None, false), None);

        vm.fail_allocation = true;
        let body = script(vec![Step::Yield]);
        assert_eq!(scheduler.create_thread(&mut vm, Some(body), None, false), None);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn spawned_threads_run_in_the_same_tick() {
        let clock = Rc::new(ManualClock::new());
        let mut vm = FakeVm::new(clock.clone());
        let mut scheduler = scheduler(&clock);
        let child = script(vec![Step::Yield]);
        let parent = script(vec![Step::Spawn(child), Step::Yield]);
        scheduler.create_thread(&mut vm, Some(parent), None, false);

        assert_eq!(scheduler.tick(&mut vm), 2);
        assert_eq!(vm.resumes, 2);
        assert_eq!(scheduler.threads().count(), 2);
    }

    #[test]
    fn finished_threads_are_recycled_unless_kept_alive() {
        let clock = Rc::new(ManualClock::new());
        let mut vm = FakeVm::new(clock.clone());
        let mut scheduler = scheduler(&clock);
        let transient = scheduler
            .create_thread(&mut vm, Some(script(vec![Step::Return])), None, false)
            .expect("thread");
        let kept = scheduler
            .create_thread(&mut vm, Some(script(vec![Step::Return])), Some(7), true)
            .expect("thread");

        assert_eq!(scheduler.tick(&mut vm), 0);
        assert_eq!(vm.pooled, 1);
        assert!(scheduler.take_retained(transient).is_none());
        let context = scheduler.take_retained(kept).expect("retained context");
        assert_eq!(context.state, ContextState::Finished);
        assert_eq!(context.args, Some(7));
    }

    #[test]
    fn faulting_thread_does_not_stop_the_others() {
        let clock = Rc::new(ManualClock::new());
        let mut vm = FakeVm::new(clock.clone());
        let mut scheduler = scheduler(&clock);
        scheduler.create_thread(&mut vm, Some(script(vec![Step::Fault])), None, false);
        scheduler.create_thread(&mut vm, Some(script(vec![Step::Yield])), None, false);

        assert_eq!(scheduler.tick(&mut vm), 1);
        assert_eq!(scheduler.tick(&mut vm), 0);
    }

    #[test]
    fn abort_all_empties_and_collects() {
        let clock = Rc::new(ManualClock::new());
        let mut vm = FakeVm::new(clock.clone());
        let mut scheduler = scheduler(&clock);
        for _ in 0..3 {
            scheduler.create_thread(&mut vm, Some(script(vec![Step::Yield])), None, false);
        }
        scheduler.abort_all(&mut vm);

        assert!(scheduler.is_empty());
        assert_eq!(vm.aborted, 3);
        assert_eq!(vm.full_collections, 1);
        assert_eq!(scheduler.tick(&mut vm), 0);
        assert_eq!(vm.resumes, 0);
    }

    #[test]
    fn executing_is_only_set_during_resume() {
        let clock = Rc::new(ManualClock::new());
        let mut vm = FakeVm::new(clock.clone());
        let mut scheduler = scheduler(&clock);
        scheduler.create_thread(&mut vm, Some(script(vec![Step::Yield])), None, false);
        assert_eq!(scheduler.executing(), None);
        scheduler.tick(&mut vm);
        assert_eq!(scheduler.executing(), None);
    }
}
