use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use mlua::Value;
use rpg_events::{Control, EventHost, EventTracker, TickStatus, START_EVENT};
use rpg_script::{
    ContextState, LuaContext, LuaFunction, LuaVm, SchedulerConfig, ScriptRuntime, ScriptVm,
    SystemClock, ThreadId, DEFAULT_WATCHDOG,
};
use serde::Serialize;

use crate::bindings::{self, CallQueue};
use crate::scene::load_scene;
use crate::triggers::TriggerKind;
use crate::world::{EventLog, World};

/// Global a scene script defines to get a thread started on load.
pub const SCRIPT_ENTRY: &str = "start";

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Simulated time added per frame.
    pub frame: Duration,
    pub watchdog: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            frame: Duration::from_millis(16),
            watchdog: DEFAULT_WATCHDOG,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub scene: String,
    pub frames: u64,
    pub events: Vec<String>,
    pub flags: Vec<String>,
    pub transcript: Vec<String>,
    pub threads: Vec<String>,
}

/// Script runtime of the current scene and the thread started from its
/// entry function. The entry thread is kept alive so its return values can be
/// logged once it ends.
struct SceneScripts {
    runtime: ScriptRuntime<LuaVm>,
    entry: Option<ThreadId>,
}

impl SceneScripts {
    fn tick(&mut self, log: &EventLog) {
        self.runtime.tick();
        let Some(id) = self.entry else {
            return;
        };
        if self.runtime.scheduler().is_alive(id) {
            return;
        }
        self.entry = None;
        if let Some(context) = self.runtime.take_retained(id) {
            log_results(&context, log);
            self.runtime.vm_mut().recycle(context);
        }
    }

    fn abort_all(&mut self) {
        self.runtime.abort_all();
        if let Some(id) = self.entry.take() {
            if let Some(context) = self.runtime.take_retained(id) {
                self.runtime.vm_mut().recycle(context);
            }
        }
    }
}

fn log_results(context: &LuaContext, log: &EventLog) {
    if context.state() != ContextState::Finished || context.results().is_empty() {
        return;
    }
    let values: Vec<String> = context
        .results()
        .iter()
        .map(|value| match value {
            serde_json::Value::String(text) => text.clone(),
            other => other.to_string(),
        })
        .collect();
    log.push(format!("script.{} returned {}", context.label(), values.join(" ")));
}

/// One running scene: the event tracker, the scripts of the scene and the
/// world they both act on.
pub struct SceneRuntime {
    tracker: EventTracker,
    scripts: Option<SceneScripts>,
    world: World,
    calls: CallQueue,
    config: EngineConfig,
    pending_walk: Option<(f32, f32)>,
    now: Duration,
    frames: u64,
}

impl SceneRuntime {
    pub fn load(path: &Path, config: EngineConfig) -> Result<Self> {
        let scene =
            load_scene(path).with_context(|| format!("loading scene {}", path.display()))?;
        let script = scene.script.clone();
        let world = World::new(scene);

        let mut runtime = SceneRuntime {
            tracker: EventTracker::new(),
            scripts: None,
            world,
            calls: CallQueue::default(),
            config,
            pending_walk: None,
            now: Duration::ZERO,
            frames: 0,
        };
        if let Some(start) = runtime.world.find_event(START_EVENT) {
            runtime.tracker.queue_front(start);
        }
        if let Some(script) = script {
            runtime.scripts = Some(runtime.start_scripts(&script)?);
        }
        info!("scene {} loaded from {}", runtime.world.scene(), path.display());
        Ok(runtime)
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn tracker(&self) -> &EventTracker {
        &self.tracker
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn live_threads(&self) -> usize {
        self.scripts
            .as_ref()
            .map_or(0, |scripts| scripts.runtime.scheduler().len())
    }

    pub fn press(&mut self, control: Control) {
        self.world.press(control);
    }

    /// Moves the player at the start of the next frame, unless movement is
    /// locked by then.
    pub fn walk_to(&mut self, position: (f32, f32)) {
        self.pending_walk = Some(position);
    }

    pub fn frame(&mut self) {
        if let Some(position) = self.pending_walk.take() {
            self.walk(position);
        }

        if self.world.is_pressed(Control::Activate) && !self.world.movement_locked() {
            let position = self.world.player();
            if let Some(event) = self.world.fire_trigger(TriggerKind::Button, position) {
                self.world.consume(Control::Activate);
                self.tracker.call(event);
            }
        }

        if self.tracker.tick(&mut self.world, self.now) == TickStatus::Idle
            && self.world.is_box_open()
        {
            self.world.close_box();
        }

        if let Some(script) = self.world.take_pending_script() {
            self.swap_scripts(script);
        }

        if let Some(scripts) = self.scripts.as_mut() {
            scripts.tick(self.world.log());
        }

        let requested: Vec<String> = self.calls.borrow_mut().drain(..).collect();
        for name in requested {
            match self.world.find_event(&name) {
                Some(event) => {
                    self.tracker.call(event);
                }
                None => error!("call_event: event '{name}' not found"),
            }
        }

        self.world.clear_input();
        self.now += self.config.frame;
        self.frames += 1;
    }

    pub fn run(&mut self, frames: u64) {
        for _ in 0..frames {
            self.frame();
        }
    }

    /// Stops every script thread and event frame of the scene.
    pub fn shutdown(&mut self) {
        if let Some(mut scripts) = self.scripts.take() {
            scripts.abort_all();
        }
        self.tracker.reset();
        if self.world.is_box_open() {
            self.world.close_box();
        }
        debug!("scene {} shut down", self.world.scene());
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            scene: self.world.scene().to_string(),
            frames: self.frames,
            events: self.world.log().entries(),
            flags: self
                .world
                .flags()
                .borrow()
                .iter()
                .map(|flag| flag.to_string())
                .collect(),
            transcript: self.world.transcript().to_vec(),
            threads: self
                .scripts
                .as_ref()
                .map(|scripts| {
                    scripts
                        .runtime
                        .scheduler()
                        .threads()
                        .map(|(id, label)| format!("{id} {label}"))
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    fn walk(&mut self, position: (f32, f32)) {
        if self.world.movement_locked() {
            debug!("walk to {position:?} ignored while movement is locked");
            return;
        }
        self.world.set_player(position);
        if let Some(event) = self.world.fire_trigger(TriggerKind::Touch, position) {
            self.tracker.call(event);
        }
    }

    fn swap_scripts(&mut self, script: Option<PathBuf>) {
        if let Some(mut previous) = self.scripts.take() {
            previous.abort_all();
        }
        self.calls.borrow_mut().clear();
        let Some(script) = script else {
            return;
        };
        match self.start_scripts(&script) {
            Ok(scripts) => self.scripts = Some(scripts),
            Err(err) => error!("scene script {} not started: {err:#}", script.display()),
        }
    }

    fn start_scripts(&self, path: &Path) -> Result<SceneScripts> {
        let source = fs::read_to_string(path)
            .with_context(|| format!("reading script {}", path.display()))?;
        let vm = LuaVm::new().context("creating Lua VM")?;
        bindings::install(
            vm.lua(),
            self.world.flags().clone(),
            self.world.log().clone(),
            self.calls.clone(),
        )
        .context("installing engine bindings")?;
        let name = format!("@{}", path.display());
        vm.load_chunk(&source, &name)
            .with_context(|| format!("running script {}", path.display()))?;

        let has_entry = matches!(
            vm.lua().globals().get::<_, Value>(SCRIPT_ENTRY),
            Ok(Value::Function(_))
        );
        let mut scripts = ScriptRuntime::with_config(
            vm,
            SchedulerConfig {
                watchdog: self.config.watchdog,
            },
            Rc::new(SystemClock),
        );
        let entry = if has_entry {
            let entry = scripts.create_thread(LuaFunction::global(SCRIPT_ENTRY), None, true);
            if entry.is_none() {
                warn!("script {} could not start '{SCRIPT_ENTRY}'", path.display());
            }
            entry
        } else {
            debug!("script {} has no '{SCRIPT_ENTRY}' function", path.display());
            None
        };
        Ok(SceneScripts {
            runtime: scripts,
            entry,
        })
    }
}

impl Drop for SceneRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}
