use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use crate::event::{Event, EventLibrary};
use crate::host::{Control, EventHost, Flags, Rgba};
use crate::operation::EntityCue;

/// Headless host that records everything the interpreter asks for.
#[derive(Debug, Default)]
pub(crate) struct RecordingHost {
    pub(crate) flags: Flags,
    pub(crate) library: EventLibrary,
    pub(crate) scenes: BTreeMap<String, EventLibrary>,
    pub(crate) pressed: BTreeSet<Control>,
    pub(crate) box_open: bool,
    pub(crate) text: String,
    pub(crate) cursor_visible: bool,
    pub(crate) options: Option<(String, String, usize)>,
    pub(crate) expression: Option<String>,
    pub(crate) entities: BTreeSet<String>,
    pub(crate) overlay: Rgba,
    pub(crate) movement_locked: bool,
    pub(crate) clicks: usize,
    pub(crate) tiles: Vec<(usize, (i32, i32), String, i32)>,
    pub(crate) log: Vec<String>,
}

impl RecordingHost {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn press(&mut self, control: Control) {
        self.pressed.insert(control);
    }

    pub(crate) fn event(&mut self, name: &str, operations: Vec<crate::Operation>) -> Rc<Event> {
        self.library.insert(name, operations)
    }

    pub(crate) fn logged(&self, entry: &str) -> usize {
        self.log.iter().filter(|line| line.as_str() == entry).count()
    }
}

impl EventHost for RecordingHost {
    fn has_flag(&self, name: &str) -> bool {
        self.flags.has(name)
    }

    fn set_flag(&mut self, name: &str) -> bool {
        self.log.push(format!("flag.set {name}"));
        self.flags.set(name)
    }

    fn unset_flag(&mut self, name: &str) -> bool {
        self.log.push(format!("flag.unset {name}"));
        self.flags.unset(name)
    }

    fn find_event(&self, name: &str) -> Option<Rc<Event>> {
        self.library.get(name)
    }

    fn consume(&mut self, control: Control) -> bool {
        self.pressed.remove(&control)
    }

    fn is_box_open(&self) -> bool {
        self.box_open
    }

    fn open_box(&mut self) {
        self.box_open = true;
        self.log.push("box.open".to_string());
    }

    fn close_box(&mut self) {
        self.box_open = false;
        self.cursor_visible = false;
        self.log.push("box.close".to_string());
    }

    fn set_text(&mut self, text: &str) {
        self.text = text.to_string();
    }

    fn append_text(&mut self, text: &str) {
        self.text.push_str(text);
    }

    fn show_cursor(&mut self, visible: bool) {
        self.cursor_visible = visible;
    }

    fn show_options(&mut self, first: &str, second: &str, highlighted: usize) {
        self.options = Some((first.to_string(), second.to_string(), highlighted));
    }

    fn hide_options(&mut self) {
        self.options = None;
    }

    fn show_expression(&mut self, expression: Option<&str>) {
        self.expression = expression.map(|value| value.to_string());
    }

    fn dialog_click(&mut self) {
        self.clicks += 1;
    }

    fn play_music(&mut self, path: &str, looped: bool) {
        self.log.push(format!("music.play {path} loop={looped}"));
    }

    fn stop_music(&mut self) {
        self.log.push("music.stop".to_string());
    }

    fn has_entity(&self, name: &str) -> bool {
        self.entities.contains(name)
    }

    fn entity_cue(&mut self, entity: &str, cue: &EntityCue) {
        self.log.push(format!("entity.{entity} {cue:?}"));
    }

    fn load_scene(&mut self, path: &str, door: Option<&str>) -> Option<Rc<Event>> {
        self.log
            .push(format!("scene.load {path} door={}", door.unwrap_or("-")));
        if let Some(library) = self.scenes.remove(path) {
            self.library = library;
        }
        self.library.start_event()
    }

    fn set_tile(&mut self, layer: usize, position: (i32, i32), atlas: &str, rotation: i32) {
        self.tiles
            .push((layer, position, atlas.to_string(), rotation));
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
