use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::{debug, warn};
use rpg_events::{Event, EventLibrary, Operation, TILE_SIZE};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::triggers::{Rect, Trigger, TriggerAction, TriggerKind};

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("event '{event}' in {}: {source}", path.display())]
    Event {
        path: PathBuf,
        event: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("trigger #{index} in {} has no event", path.display())]
    TriggerWithoutEvent { path: PathBuf, index: usize },
}

/// On-disk scene description. Positions are in tiles.
#[derive(Debug, Deserialize)]
struct SceneFile {
    name: String,
    #[serde(default)]
    events: BTreeMap<String, Value>,
    #[serde(default)]
    entities: Vec<EntitySpec>,
    #[serde(default)]
    triggers: Vec<TriggerSpec>,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    script: Option<PathBuf>,
    #[serde(default)]
    doors: BTreeMap<String, [f32; 2]>,
    #[serde(default)]
    player: Option<[f32; 2]>,
}

#[derive(Debug, Deserialize)]
struct EntitySpec {
    name: String,
    #[serde(default)]
    x: f32,
    #[serde(default)]
    y: f32,
}

#[derive(Debug, Deserialize)]
struct TriggerSpec {
    kind: TriggerKind,
    x: f32,
    y: f32,
    #[serde(default = "one")]
    w: f32,
    #[serde(default = "one")]
    h: f32,
    #[serde(default)]
    if_flag: Option<String>,
    #[serde(default)]
    bind_flag: Option<String>,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    inline: Option<Value>,
}

fn one() -> f32 {
    1.0
}

/// A parsed scene with positions converted to pixels.
#[derive(Debug)]
pub struct LoadedScene {
    pub name: String,
    pub path: PathBuf,
    pub library: EventLibrary,
    pub entities: Vec<(String, (f32, f32))>,
    pub triggers: Vec<Trigger>,
    pub flags: Vec<String>,
    /// Lua file, resolved against the scene's directory.
    pub script: Option<PathBuf>,
    pub doors: BTreeMap<String, (f32, f32)>,
    pub player: Option<(f32, f32)>,
}

impl LoadedScene {
    pub fn directory(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }
}

pub fn load_scene(path: &Path) -> Result<LoadedScene, SceneError> {
    let text = fs::read_to_string(path).map_err(|source| SceneError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_scene(&text, path)
}

pub fn parse_scene(text: &str, path: &Path) -> Result<LoadedScene, SceneError> {
    let file: SceneFile = serde_json::from_str(text).map_err(|source| SceneError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));

    let mut library = EventLibrary::new();
    for (name, mut body) in file.events {
        let operations = parse_operations(&mut body).map_err(|source| SceneError::Event {
            path: path.to_path_buf(),
            event: name.clone(),
            source,
        })?;
        library.insert(name, operations);
    }

    let mut triggers = Vec::with_capacity(file.triggers.len());
    for (index, spec) in file.triggers.into_iter().enumerate() {
        let action = match (spec.inline, spec.event) {
            (Some(mut body), _) => {
                let operations =
                    parse_operations(&mut body).map_err(|source| SceneError::Event {
                        path: path.to_path_buf(),
                        event: format!("trigger #{index}"),
                        source,
                    })?;
                TriggerAction::Inline(Rc::new(Event::new(operations)))
            }
            (None, Some(name)) => TriggerAction::Named(name),
            (None, None) => {
                return Err(SceneError::TriggerWithoutEvent {
                    path: path.to_path_buf(),
                    index,
                })
            }
        };
        triggers.push(Trigger {
            kind: spec.kind,
            area: Rect::new(
                spec.x * TILE_SIZE,
                spec.y * TILE_SIZE,
                spec.w * TILE_SIZE,
                spec.h * TILE_SIZE,
            ),
            if_flag: spec.if_flag.filter(|flag| !flag.is_empty()),
            bind_flag: spec.bind_flag.filter(|flag| !flag.is_empty()),
            action,
        });
    }

    debug!(
        "scene {} parsed: {} event(s), {} trigger(s)",
        file.name,
        library.len(),
        triggers.len()
    );

    Ok(LoadedScene {
        name: file.name,
        path: path.to_path_buf(),
        library,
        entities: file
            .entities
            .into_iter()
            .map(|entity| (entity.name, tiles_to_pixels([entity.x, entity.y])))
            .collect(),
        triggers,
        flags: file.flags,
        script: file.script.map(|script| base.join(script)),
        doors: file
            .doors
            .into_iter()
            .map(|(name, position)| (name, tiles_to_pixels(position)))
            .collect(),
        player: file.player.map(tiles_to_pixels),
    })
}

fn tiles_to_pixels([x, y]: [f32; 2]) -> (f32, f32) {
    (x * TILE_SIZE, y * TILE_SIZE)
}

fn parse_operations(body: &mut Value) -> Result<Vec<Operation>, serde_json::Error> {
    mark_unsupported(body);
    serde_json::from_value(body.take())
}

/// Rewrites every operation with an unknown `"op"` tag, including those nested
/// in inline events, into an `unsupported` operation.
fn mark_unsupported(value: &mut Value) {
    match value {
        Value::Array(items) => items.iter_mut().for_each(mark_unsupported),
        Value::Object(map) => {
            let unknown = match map.get("op") {
                Some(Value::String(op)) if !Operation::is_known_opcode(op) => Some(op.clone()),
                _ => None,
            };
            if let Some(opcode) = unknown {
                warn!("unknown opcode '{opcode}' loaded as unsupported");
                *value = json!({ "op": "unsupported", "opcode": opcode });
                return;
            }
            map.values_mut().for_each(mark_unsupported);
        }
        _ => {}
    }
}
