use std::rc::Rc;

use rpg_events::Event;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Fires when the player walks into the area.
    Touch,
    /// Fires when the player presses activate while facing the area.
    Button,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Rect { x, y, w, h }
    }

    /// Edges are inclusive.
    pub fn contains(&self, (px, py): (f32, f32)) -> bool {
        px >= self.x && py >= self.y && px <= self.x + self.w && py <= self.y + self.h
    }
}

#[derive(Debug, Clone)]
pub enum TriggerAction {
    Named(String),
    Inline(Rc<Event>),
}

#[derive(Debug, Clone)]
pub struct Trigger {
    pub kind: TriggerKind,
    pub area: Rect,
    /// Trigger is ignored unless this flag is set.
    pub if_flag: Option<String>,
    /// Set when the trigger fires; the trigger is ignored once it is set.
    pub bind_flag: Option<String>,
    pub action: TriggerAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TriggerHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    trigger: Option<Trigger>,
}

/// Scene triggers addressed by generational handles. A handle kept across a
/// removal or a scene swap stops resolving instead of pointing at whatever
/// took its slot.
#[derive(Debug, Default)]
pub struct TriggerArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl TriggerArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, trigger: Trigger) -> TriggerHandle {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.trigger = Some(trigger);
            return TriggerHandle {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            trigger: Some(trigger),
        });
        TriggerHandle {
            index,
            generation: 0,
        }
    }

    pub fn get(&self, handle: TriggerHandle) -> Option<&Trigger> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.trigger.as_ref())
    }

    pub fn is_live(&self, handle: TriggerHandle) -> bool {
        self.get(handle).is_some()
    }

    pub fn remove(&mut self, handle: TriggerHandle) -> Option<Trigger> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let trigger = slot.trigger.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.live -= 1;
        Some(trigger)
    }

    pub fn clear(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.trigger.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
            }
        }
        self.live = 0;
    }

    /// Live triggers in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (TriggerHandle, &Trigger)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.trigger.as_ref().map(|trigger| {
                (
                    TriggerHandle {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    trigger,
                )
            })
        })
    }

    /// Triggers of `kind` whose area contains `position`.
    pub fn hits(
        &self,
        kind: TriggerKind,
        position: (f32, f32),
    ) -> impl Iterator<Item = (TriggerHandle, &Trigger)> {
        self.iter()
            .filter(move |(_, trigger)| trigger.kind == kind && trigger.area.contains(position))
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}
