use std::collections::BTreeMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::operation::Operation;

/// Name of the event a scene runs when it is loaded.
pub const START_EVENT: &str = "_start_";

/// An immutable, ordered list of operations.
///
/// Events are shared through `Rc` by every frame that runs them; nothing in an
/// event changes after construction.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Operation>", into = "Vec<Operation>")]
pub struct Event {
    name: Option<String>,
    operations: Vec<Operation>,
}

impl Event {
    pub fn new(operations: Vec<Operation>) -> Self {
        Event {
            name: None,
            operations,
        }
    }

    pub fn named(name: impl Into<String>, operations: Vec<Operation>) -> Self {
        Event {
            name: Some(name.into()),
            operations,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or("<inline>")
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Operation> {
        self.operations.get(index)
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }
}

impl From<Vec<Operation>> for Event {
    fn from(operations: Vec<Operation>) -> Self {
        Event::new(operations)
    }
}

impl From<Event> for Vec<Operation> {
    fn from(event: Event) -> Self {
        event.operations
    }
}

/// Named events of one scene.
#[derive(Debug, Clone, Default)]
pub struct EventLibrary {
    events: BTreeMap<String, Rc<Event>>,
}

impl EventLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `operations` under `name`, replacing any previous event.
    pub fn insert(&mut self, name: impl Into<String>, operations: Vec<Operation>) -> Rc<Event> {
        let name = name.into();
        let event = Rc::new(Event::named(name.clone(), operations));
        self.events.insert(name, event.clone());
        event
    }

    pub fn get(&self, name: &str) -> Option<Rc<Event>> {
        self.events.get(name).cloned()
    }

    pub fn start_event(&self) -> Option<Rc<Event>> {
        self.get(START_EVENT)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.events.keys().map(|name| name.as_str())
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
