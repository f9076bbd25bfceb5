use std::mem;
use std::rc::Rc;
use std::time::Duration;

use log::{debug, error, trace};

use crate::event::Event;
use crate::host::EventHost;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    /// The stack is empty; the caller should close any open dialog UI.
    Idle,
    /// An operation asked for more time.
    Suspended,
}

/// Per-frame state of the active operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum Progress {
    #[default]
    Fresh,
    Say {
        offset: usize,
        revealed: usize,
        last_reveal: Option<Duration>,
    },
    Wait {
        started: Duration,
    },
    Selection {
        highlighted: usize,
    },
    Fade {
        started: Duration,
    },
}

/// What the active operation asks the tracker to do next.
#[derive(Debug)]
pub(crate) enum Flow {
    Next,
    Suspend(Progress),
    Call(Rc<Event>),
    CancelFrame,
}

/// One activation of an event on the tracker stack.
#[derive(Debug, Clone)]
pub struct EventFrame {
    event: Rc<Event>,
    cursor: usize,
    just_entered: bool,
    awaiting_child: bool,
    progress: Progress,
}

impl EventFrame {
    fn new(event: Rc<Event>) -> Self {
        EventFrame {
            event,
            cursor: 0,
            just_entered: true,
            awaiting_child: false,
            progress: Progress::Fresh,
        }
    }

    pub fn event(&self) -> &Rc<Event> {
        &self.event
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn just_entered(&self) -> bool {
        self.just_entered
    }

    /// True while an event called by the active operation is still stacked.
    pub fn awaiting_child(&self) -> bool {
        self.awaiting_child
    }

    fn is_finished(&self) -> bool {
        self.cursor >= self.event.len()
    }

    fn advance(&mut self) {
        self.cursor += 1;
        self.just_entered = true;
        self.awaiting_child = false;
        self.progress = Progress::Fresh;
    }
}

/// Stack machine that runs scene events one operation at a time.
#[derive(Debug, Default)]
pub struct EventTracker {
    frames: Vec<EventFrame>,
    pub(crate) speaker: Option<String>,
    pub(crate) music: Option<String>,
}

impl EventTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs operations until one suspends or the stack empties.
    pub fn tick(&mut self, host: &mut dyn EventHost, now: Duration) -> TickStatus {
        loop {
            let Some(frame) = self.settle() else {
                return TickStatus::Idle;
            };
            let event = frame.event.clone();
            let cursor = frame.cursor;
            let entering = frame.just_entered;
            let progress = mem::take(&mut frame.progress);

            let Some(operation) = event.get(cursor) else {
                continue;
            };
            trace!(
                "event {} [{cursor}] {operation}{}",
                event.display_name(),
                if entering { " (enter)" } else { "" }
            );

            match self.execute(operation, entering, progress, host, now) {
                Flow::Next => self.complete_active(),
                Flow::Suspend(progress) => {
                    if let Some(frame) = self.frames.last_mut() {
                        frame.just_entered = false;
                        frame.progress = progress;
                    }
                    return TickStatus::Suspended;
                }
                Flow::Call(child) => {
                    if !self.push(child, true) {
                        self.complete_active();
                    }
                }
                Flow::CancelFrame => self.cancel_current(),
            }
        }
    }

    /// Pushes `event` on top of the stack. The interrupted frame continues
    /// where it left off once `event` ends.
    pub fn call(&mut self, event: Rc<Event>) -> bool {
        self.push(event, false)
    }

    pub fn cancel_current(&mut self) {
        if let Some(frame) = self.frames.pop() {
            debug!(
                "event {} cancelled at [{}]",
                frame.event.display_name(),
                frame.cursor
            );
        }
    }

    pub fn cancel_all(&mut self) {
        if !self.frames.is_empty() {
            debug!("cancelling {} event frame(s)", self.frames.len());
        }
        self.frames.clear();
    }

    pub fn interrupt(&mut self, event: Rc<Event>) {
        self.cancel_all();
        self.push(event, false);
    }

    /// Inserts `event` at the bottom of the stack so it runs after everything
    /// already stacked has finished.
    pub fn queue_front(&mut self, event: Rc<Event>) {
        debug!("event {} queued", event.display_name());
        self.frames.insert(0, EventFrame::new(event));
    }

    pub fn is_idle(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Frames from bottom to top; the last one is active.
    pub fn frames(&self) -> &[EventFrame] {
        &self.frames
    }

    pub fn active(&self) -> Option<&EventFrame> {
        self.frames.last()
    }

    pub fn speaker(&self) -> Option<&str> {
        self.speaker.as_deref()
    }

    /// Drops every frame and the interpreter's scene-local state.
    pub fn reset(&mut self) {
        self.frames.clear();
        self.speaker = None;
        self.music = None;
    }

    fn push(&mut self, event: Rc<Event>, from_operation: bool) -> bool {
        if self
            .frames
            .iter()
            .any(|frame| Rc::ptr_eq(&frame.event, &event))
        {
            error!(
                "event {} is already running; recursive call ignored",
                event.display_name()
            );
            return false;
        }
        if from_operation {
            if let Some(parent) = self.frames.last_mut() {
                parent.awaiting_child = true;
            }
        }
        debug!("event {} called", event.display_name());
        self.frames.push(EventFrame::new(event));
        true
    }

    /// Pops finished frames and advances callers whose child has returned,
    /// then yields the active frame.
    fn settle(&mut self) -> Option<&mut EventFrame> {
        loop {
            let frame = self.frames.last_mut()?;
            if frame.awaiting_child {
                frame.advance();
            }
            if frame.is_finished() {
                self.frames.pop();
                continue;
            }
            break;
        }
        self.frames.last_mut()
    }

    fn complete_active(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            frame.advance();
        }
    }
}
