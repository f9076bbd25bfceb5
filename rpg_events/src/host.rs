use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::event::Event;
use crate::operation::EntityCue;

/// Edge-triggered inputs the interpreter reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Control {
    Activate,
    SelectNext,
    SelectPrevious,
}

impl Control {
    pub fn as_str(self) -> &'static str {
        match self {
            Control::Activate => "activate",
            Control::SelectNext => "select_next",
            Control::SelectPrevious => "select_previous",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "activate" => Some(Control::Activate),
            "select_next" | "next" => Some(Control::SelectNext),
            "select_previous" | "prev" | "previous" => Some(Control::SelectPrevious),
            _ => None,
        }
    }
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Rgba { r, g, b, a }
    }

    pub const fn with_alpha(self, a: u8) -> Self {
        Rgba { a, ..self }
    }
}

/// Named boolean facts of the running game.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Flags {
    names: BTreeSet<String>,
}

impl Flags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Returns `false` when the flag was already set.
    pub fn set(&mut self, name: &str) -> bool {
        self.names.insert(name.to_string())
    }

    /// Returns `false` when the flag was not set.
    pub fn unset(&mut self, name: &str) -> bool {
        self.names.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(|name| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for Flags {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Flags {
            names: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Everything the interpreter needs from the surrounding scene.
///
/// Presentation hooks default to no-ops so headless hosts only implement the
/// state they track.
pub trait EventHost {
    fn has_flag(&self, name: &str) -> bool;
    fn set_flag(&mut self, name: &str) -> bool;
    fn unset_flag(&mut self, name: &str) -> bool;

    fn find_event(&self, name: &str) -> Option<Rc<Event>>;

    /// Returns `true` once per press; later queries in the same tick see `false`.
    fn consume(&mut self, control: Control) -> bool;

    fn is_box_open(&self) -> bool;
    fn open_box(&mut self);
    fn close_box(&mut self);
    fn set_text(&mut self, text: &str);
    fn append_text(&mut self, text: &str);
    fn show_cursor(&mut self, _visible: bool) {}
    fn show_options(&mut self, _first: &str, _second: &str, _highlighted: usize) {}
    fn hide_options(&mut self) {}
    fn show_expression(&mut self, _expression: Option<&str>) {}

    fn dialog_click(&mut self) {}
    fn play_music(&mut self, _path: &str, _looped: bool) {}
    fn stop_music(&mut self) {}
    fn pause_music(&mut self) {}
    fn resume_music(&mut self) {}

    fn has_entity(&self, name: &str) -> bool;
    fn entity_cue(&mut self, _entity: &str, _cue: &EntityCue) {}

    /// Swaps the scene and returns its start event, if it has one.
    fn load_scene(&mut self, path: &str, door: Option<&str>) -> Option<Rc<Event>>;
    fn set_tile(&mut self, _layer: usize, _position: (i32, i32), _atlas: &str, _rotation: i32) {}

    fn overlay_color(&self) -> Rgba;
    fn set_overlay_color(&mut self, color: Rgba);
    fn lock_movement(&mut self, locked: bool);
}
