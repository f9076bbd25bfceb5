//! Scene event interpreter.
//!
//! Scenes describe cutscenes and dialog as [`Event`]s: immutable lists of
//! [`Operation`]s. An [`EventTracker`] keeps a stack of running events and is
//! ticked once per frame; each tick runs operations until one of them needs
//! more time (revealing text, waiting, fading) or the stack empties.

mod event;
mod host;
mod interpreter;
mod operation;
mod tracker;

#[cfg(test)]
mod testing;

pub use event::{Event, EventLibrary, START_EVENT};
pub use host::{Control, EventHost, Flags, Rgba};
pub use operation::{
    Direction, EntityCue, Fade, FlagIf, MusicAction, Operation, Say, SceneLoad, Selection,
    SelectionOption, TileReplace, Wait, DEFAULT_DIALOG_INTERVAL_MS, DEFAULT_FADE_MS,
    DIALOG_CLICK_INTERVAL, TILE_SIZE,
};
pub use tracker::{EventFrame, EventTracker, TickStatus};
