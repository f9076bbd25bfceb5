use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::event::Event;

/// Reveal interval used by `say` when the scene file does not provide one.
pub const DEFAULT_DIALOG_INTERVAL_MS: i64 = 25;

/// A dialog click is played every this many revealed characters.
pub const DIALOG_CLICK_INTERVAL: usize = 2;

pub const DEFAULT_FADE_MS: u64 = 200;

/// Pixel size of one tile; `Move { set: true }` positions are in tiles.
pub const TILE_SIZE: f32 = 32.0;

/// One executable step of an [`Event`].
///
/// Operations are immutable templates. Everything that changes while an
/// operation runs (reveal cursors, clocks, the highlighted option) is kept by
/// the event frame executing it, so the same event can be active in several
/// places without sharing progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Say(Say),
    Wait(Wait),
    WaitForKey,
    HideBox,
    Selection(Selection),
    Entity { cue: EntityCue },
    FlagSet { flag: String },
    FlagUnset { flag: String },
    FlagIf(FlagIf),
    FlagExitIf { flag: String },
    FlagOnce { flag: String },
    Music { action: MusicAction },
    SceneLoad(SceneLoad),
    TileReplace(TileReplace),
    FadeIn(Fade),
    FadeOut(Fade),
    Unsupported { opcode: String },
}

impl Operation {
    /// Opcodes understood by the deserializer, in `"op"` tag form.
    pub const OPCODES: &'static [&'static str] = &[
        "say",
        "wait",
        "wait_for_key",
        "hide_box",
        "selection",
        "entity",
        "flag_set",
        "flag_unset",
        "flag_if",
        "flag_exit_if",
        "flag_once",
        "music",
        "scene_load",
        "tile_replace",
        "fade_in",
        "fade_out",
        "unsupported",
    ];

    pub fn opcode(&self) -> &'static str {
        match self {
            Operation::Say(_) => "say",
            Operation::Wait(_) => "wait",
            Operation::WaitForKey => "wait_for_key",
            Operation::HideBox => "hide_box",
            Operation::Selection(_) => "selection",
            Operation::Entity { .. } => "entity",
            Operation::FlagSet { .. } => "flag_set",
            Operation::FlagUnset { .. } => "flag_unset",
            Operation::FlagIf(_) => "flag_if",
            Operation::FlagExitIf { .. } => "flag_exit_if",
            Operation::FlagOnce { .. } => "flag_once",
            Operation::Music { .. } => "music",
            Operation::SceneLoad(_) => "scene_load",
            Operation::TileReplace(_) => "tile_replace",
            Operation::FadeIn(_) => "fade_in",
            Operation::FadeOut(_) => "fade_out",
            Operation::Unsupported { .. } => "unsupported",
        }
    }

    pub fn is_known_opcode(tag: &str) -> bool {
        Self::OPCODES.contains(&tag)
    }

    pub fn say(text: impl Into<String>, interval_ms: i64) -> Self {
        Operation::Say(Say {
            text: text.into(),
            expression: None,
            interval_ms,
            append: false,
        })
    }

    pub fn wait(duration_ms: u64) -> Self {
        Operation::Wait(Wait { duration_ms })
    }

    pub fn flag_set(flag: impl Into<String>) -> Self {
        Operation::FlagSet { flag: flag.into() }
    }

    pub fn flag_once(flag: impl Into<String>) -> Self {
        Operation::FlagOnce { flag: flag.into() }
    }

    pub fn flag_exit_if(flag: impl Into<String>) -> Self {
        Operation::FlagExitIf { flag: flag.into() }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.opcode())
    }
}

fn default_dialog_interval() -> i64 {
    DEFAULT_DIALOG_INTERVAL_MS
}

fn default_fade_ms() -> u64 {
    DEFAULT_FADE_MS
}

/// Narrative text. A negative `interval_ms` shows the text in one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Say {
    pub text: String,
    #[serde(default)]
    pub expression: Option<String>,
    #[serde(default = "default_dialog_interval")]
    pub interval_ms: i64,
    #[serde(default)]
    pub append: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wait {
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionOption {
    pub label: String,
    pub event: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub first: SelectionOption,
    pub second: SelectionOption,
}

impl Selection {
    pub fn option(&self, index: usize) -> &SelectionOption {
        if index == 0 {
            &self.first
        } else {
            &self.second
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

/// Commands addressed to the current speaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityCue {
    /// Selects the speaker; `None` or an empty name clears it.
    Speaker {
        #[serde(default)]
        name: Option<String>,
    },
    Move {
        x: f32,
        y: f32,
        #[serde(default)]
        set: bool,
    },
    SetCycleGroup {
        group: String,
    },
    SetAnimation {
        name: String,
    },
    AnimationStart {
        #[serde(default)]
        looped: bool,
    },
    AnimationStop,
    SetDirection {
        direction: Direction,
    },
    /// Speech animation toggled by `say`; not produced by scene files.
    Speech {
        active: bool,
    },
}

/// Calls `inline` when it has operations, otherwise the event named `event`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagIf {
    pub flag: String,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub inline: Option<Rc<Event>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MusicAction {
    Set {
        path: String,
        #[serde(default)]
        looped: bool,
    },
    Stop,
    Pause,
    Play,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneLoad {
    pub path: String,
    #[serde(default)]
    pub door: Option<String>,
}

/// Fills the half-open rectangle `[from, to)` of `layer` with one tile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileReplace {
    pub layer: usize,
    pub from: (i32, i32),
    pub to: (i32, i32),
    pub atlas: String,
    #[serde(default)]
    pub rotation: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fade {
    #[serde(default = "default_fade_ms")]
    pub duration_ms: u64,
}

impl Default for Fade {
    fn default() -> Self {
        Fade {
            duration_ms: DEFAULT_FADE_MS,
        }
    }
}
