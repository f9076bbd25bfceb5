use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::{debug, error, info};
use rpg_events::{Control, Direction, EntityCue, Event, EventHost, EventLibrary, Flags, Rgba};
use serde::Serialize;

use crate::scene::{load_scene, LoadedScene};
use crate::triggers::{TriggerAction, TriggerArena, TriggerHandle, TriggerKind};

/// Append-only list of world events, shared with the script bindings.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    entries: Rc<RefCell<Vec<String>>>,
}

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        let event = event.into();
        debug!("world: {event}");
        self.entries.borrow_mut().push(event);
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.borrow().clone()
    }

    pub fn contains(&self, event: &str) -> bool {
        self.entries.borrow().iter().any(|entry| entry == event)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EntityState {
    pub position: (f32, f32),
    pub cycle_group: Option<String>,
    pub animation: Option<String>,
    pub animating: bool,
    pub looped: bool,
    pub direction: Option<Direction>,
    pub speaking: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Narrative {
    pub open: bool,
    pub text: String,
    pub cursor: bool,
    pub options: Option<(String, String, usize)>,
    pub expression: Option<String>,
}

/// Headless scene state behind the event interpreter.
#[derive(Debug)]
pub struct World {
    scene: String,
    scene_dir: PathBuf,
    flags: Rc<RefCell<Flags>>,
    log: EventLog,
    library: EventLibrary,
    entities: BTreeMap<String, EntityState>,
    triggers: TriggerArena,
    last_trigger: Option<TriggerHandle>,
    doors: BTreeMap<String, (f32, f32)>,
    player: (f32, f32),
    input: BTreeSet<Control>,
    narrative: Narrative,
    transcript: Vec<String>,
    clicks: usize,
    overlay: Rgba,
    movement_locked: bool,
    music: Option<String>,
    tiles: BTreeMap<(usize, i32, i32), (String, i32)>,
    pending_script: Option<Option<PathBuf>>,
}

impl World {
    pub fn new(scene: LoadedScene) -> Self {
        let mut world = World {
            scene: String::new(),
            scene_dir: PathBuf::new(),
            flags: Rc::default(),
            log: EventLog::default(),
            library: EventLibrary::new(),
            entities: BTreeMap::new(),
            triggers: TriggerArena::new(),
            last_trigger: None,
            doors: BTreeMap::new(),
            player: (0.0, 0.0),
            input: BTreeSet::new(),
            narrative: Narrative::default(),
            transcript: Vec::new(),
            clicks: 0,
            overlay: Rgba::new(0, 0, 0, 0),
            movement_locked: false,
            music: None,
            tiles: BTreeMap::new(),
            pending_script: None,
        };
        world.apply_scene(scene, None);
        world.pending_script = None;
        world
    }

    pub fn scene(&self) -> &str {
        &self.scene
    }

    pub fn flags(&self) -> &Rc<RefCell<Flags>> {
        &self.flags
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn narrative(&self) -> &Narrative {
        &self.narrative
    }

    pub fn transcript(&self) -> &[String] {
        &self.transcript
    }

    pub fn clicks(&self) -> usize {
        self.clicks
    }

    pub fn entity(&self, name: &str) -> Option<&EntityState> {
        self.entities.get(name)
    }

    pub fn player(&self) -> (f32, f32) {
        self.player
    }

    pub fn set_player(&mut self, position: (f32, f32)) {
        self.player = position;
    }

    pub fn overlay(&self) -> Rgba {
        self.overlay
    }

    pub fn movement_locked(&self) -> bool {
        self.movement_locked
    }

    pub fn music(&self) -> Option<&str> {
        self.music.as_deref()
    }

    pub fn tile(&self, layer: usize, position: (i32, i32)) -> Option<&(String, i32)> {
        self.tiles.get(&(layer, position.0, position.1))
    }

    pub fn triggers(&self) -> &TriggerArena {
        &self.triggers
    }

    /// Handle of the trigger that fired last, while it is still live.
    pub fn last_trigger(&self) -> Option<TriggerHandle> {
        self.last_trigger
            .filter(|handle| self.triggers.is_live(*handle))
    }

    pub fn press(&mut self, control: Control) {
        self.input.insert(control);
    }

    pub fn is_pressed(&self, control: Control) -> bool {
        self.input.contains(&control)
    }

    /// Drops presses nobody consumed this frame.
    pub fn clear_input(&mut self) {
        self.input.clear();
    }

    /// Script to start after a scene swap: `Some(None)` means the new scene
    /// has no script.
    pub fn take_pending_script(&mut self) -> Option<Option<PathBuf>> {
        self.pending_script.take()
    }

    /// First trigger of `kind` under `position` whose flag gates pass and
    /// whose event exists. Its bind flag is set only when it fires.
    pub fn fire_trigger(&mut self, kind: TriggerKind, position: (f32, f32)) -> Option<Rc<Event>> {
        let mut fired = None;
        for (handle, trigger) in self.triggers.hits(kind, position) {
            let flags = self.flags.borrow();
            if let Some(flag) = trigger.if_flag.as_deref() {
                if !flags.has(flag) {
                    continue;
                }
            }
            if let Some(flag) = trigger.bind_flag.as_deref() {
                if flags.has(flag) {
                    continue;
                }
            }
            let event = match &trigger.action {
                TriggerAction::Inline(event) => event.clone(),
                TriggerAction::Named(name) => match self.library.get(name) {
                    Some(event) => event,
                    None => {
                        error!("trigger event '{name}' not found");
                        continue;
                    }
                },
            };
            fired = Some((handle, trigger.bind_flag.clone(), event));
            break;
        }

        let (handle, bind_flag, event) = fired?;
        if let Some(flag) = bind_flag {
            self.flags.borrow_mut().set(&flag);
            self.log.push(format!("flag.set {flag}"));
        }
        self.last_trigger = Some(handle);
        Some(event)
    }

    /// Records the dialog page currently shown, if any.
    pub fn flush_dialog(&mut self) {
        if !self.narrative.text.is_empty() {
            let page = std::mem::take(&mut self.narrative.text);
            self.log.push(format!("dialog {page}"));
            self.transcript.push(page);
        }
    }

    fn apply_scene(&mut self, scene: LoadedScene, door: Option<&str>) {
        self.scene_dir = scene.directory().to_path_buf();
        self.scene = scene.name;
        self.library = scene.library;

        self.entities = scene
            .entities
            .into_iter()
            .map(|(name, position)| {
                (
                    name,
                    EntityState {
                        position,
                        ..EntityState::default()
                    },
                )
            })
            .collect();

        self.triggers.clear();
        for trigger in scene.triggers {
            self.triggers.insert(trigger);
        }

        {
            let mut flags = self.flags.borrow_mut();
            for flag in &scene.flags {
                flags.set(flag);
            }
        }

        self.doors = scene.doors;
        let entry = door.and_then(|name| {
            let position = self.doors.get(name).copied();
            if position.is_none() {
                error!("door '{name}' not found in scene {}", self.scene);
            }
            position
        });
        if let Some(position) = entry.or(scene.player) {
            self.player = position;
        }
        self.pending_script = Some(scene.script);
        info!("scene {} active", self.scene);
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.scene_dir.join(path)
        }
    }
}

impl EventHost for World {
    fn has_flag(&self, name: &str) -> bool {
        self.flags.borrow().has(name)
    }

    fn set_flag(&mut self, name: &str) -> bool {
        let changed = self.flags.borrow_mut().set(name);
        if changed {
            self.log.push(format!("flag.set {name}"));
        }
        changed
    }

    fn unset_flag(&mut self, name: &str) -> bool {
        let changed = self.flags.borrow_mut().unset(name);
        if changed {
            self.log.push(format!("flag.unset {name}"));
        }
        changed
    }

    fn find_event(&self, name: &str) -> Option<Rc<Event>> {
        self.library.get(name)
    }

    fn consume(&mut self, control: Control) -> bool {
        self.input.remove(&control)
    }

    fn is_box_open(&self) -> bool {
        self.narrative.open
    }

    fn open_box(&mut self) {
        self.narrative.open = true;
        self.movement_locked = true;
        self.log.push("box.open");
    }

    fn close_box(&mut self) {
        self.flush_dialog();
        self.narrative = Narrative::default();
        self.movement_locked = false;
        self.log.push("box.close");
    }

    fn set_text(&mut self, text: &str) {
        self.flush_dialog();
        self.narrative.text = text.to_string();
    }

    fn append_text(&mut self, text: &str) {
        self.narrative.text.push_str(text);
    }

    fn show_cursor(&mut self, visible: bool) {
        self.narrative.cursor = visible;
    }

    fn show_options(&mut self, first: &str, second: &str, highlighted: usize) {
        if self.narrative.options.is_none() {
            self.log.push(format!("options {first} | {second}"));
        }
        self.narrative.options = Some((first.to_string(), second.to_string(), highlighted));
    }

    fn hide_options(&mut self) {
        if let Some((first, second, highlighted)) = self.narrative.options.take() {
            let chosen = if highlighted == 0 { first } else { second };
            self.log.push(format!("options.chose {chosen}"));
        }
    }

    fn show_expression(&mut self, expression: Option<&str>) {
        self.narrative.expression = expression.map(|value| value.to_string());
    }

    fn dialog_click(&mut self) {
        self.clicks += 1;
    }

    fn play_music(&mut self, path: &str, looped: bool) {
        self.music = Some(path.to_string());
        self.log.push(format!("music.set {path} loop={looped}"));
    }

    fn stop_music(&mut self) {
        self.music = None;
        self.log.push("music.stop");
    }

    fn pause_music(&mut self) {
        self.log.push("music.pause");
    }

    fn resume_music(&mut self) {
        self.log.push("music.play");
    }

    fn has_entity(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    fn entity_cue(&mut self, entity: &str, cue: &EntityCue) {
        let Some(state) = self.entities.get_mut(entity) else {
            error!("cue for missing entity '{entity}'");
            return;
        };
        let label = match cue {
            EntityCue::Speaker { .. } => return,
            EntityCue::Move { x, y, set } => {
                if *set {
                    state.position = (*x, *y);
                } else {
                    state.position = (state.position.0 + x, state.position.1 + y);
                }
                let (px, py) = state.position;
                format!("move {px},{py}")
            }
            EntityCue::SetCycleGroup { group } => {
                state.cycle_group = Some(group.clone());
                format!("cycle_group {group}")
            }
            EntityCue::SetAnimation { name } => {
                state.animation = Some(name.clone());
                format!("animation {name}")
            }
            EntityCue::AnimationStart { looped } => {
                state.animating = true;
                state.looped = *looped;
                "animation.start".to_string()
            }
            EntityCue::AnimationStop => {
                state.animating = false;
                "animation.stop".to_string()
            }
            EntityCue::SetDirection { direction } => {
                state.direction = Some(*direction);
                format!("direction {direction:?}").to_lowercase()
            }
            EntityCue::Speech { active } => {
                state.speaking = *active;
                return;
            }
        };
        self.log.push(format!("entity.{entity} {label}"));
    }

    fn load_scene(&mut self, path: &str, door: Option<&str>) -> Option<Rc<Event>> {
        let full = self.resolve(path);
        let scene = match load_scene(&full) {
            Ok(scene) => scene,
            Err(err) => {
                error!("scene load failed: {err}");
                return None;
            }
        };
        self.log
            .push(format!("scene.load {} door={}", scene.name, door.unwrap_or("-")));
        self.last_trigger = None;
        self.apply_scene(scene, door);
        self.library.start_event()
    }

    fn set_tile(&mut self, layer: usize, position: (i32, i32), atlas: &str, rotation: i32) {
        self.tiles
            .insert((layer, position.0, position.1), (atlas.to_string(), rotation));
    }

    fn overlay_color(&self) -> Rgba {
        self.overlay
    }

    fn set_overlay_color(&mut self, color: Rgba) {
        self.overlay = color;
    }

    fn lock_movement(&mut self, locked: bool) {
        self.movement_locked = locked;
    }
}
