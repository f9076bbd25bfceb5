use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use log::debug;

/// Named values published by one script thread for the others.
#[derive(Debug)]
pub struct SharedRegistry<H> {
    entries: BTreeMap<String, H>,
}

pub type SharedHandles<H> = Rc<RefCell<SharedRegistry<H>>>;

impl<H: Clone> SharedRegistry<H> {
    pub fn new() -> Self {
        SharedRegistry {
            entries: BTreeMap::new(),
        }
    }

    pub fn handles() -> SharedHandles<H> {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Stores `handle` under `name`, replacing any previous value.
    pub fn publish(&mut self, name: &str, handle: H) {
        if self.entries.insert(name.to_string(), handle).is_some() {
            debug!("shared handle '{name}' replaced");
        }
    }

    pub fn fetch(&self, name: &str) -> Option<H> {
        self.entries.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|name| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<H: Clone> Default for SharedRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}
