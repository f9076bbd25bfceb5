use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use rpg_events::Control;

#[derive(Parser, Debug)]
#[command(about = "Headless scene runner for event scripts and Lua threads", version)]
pub struct Args {
    /// Scene JSON file to load
    #[arg(long)]
    pub scene: PathBuf,

    /// Number of frames to simulate
    #[arg(long, default_value_t = 600)]
    pub frames: u64,

    /// Simulated milliseconds per frame
    #[arg(long, default_value_t = 16)]
    pub frame_ms: u64,

    /// Milliseconds a script may run in one resume before it is aborted
    #[arg(long, default_value_t = 5000)]
    pub watchdog_ms: u64,

    /// Press a control on a frame, as FRAME:CONTROL (activate, next, prev)
    #[arg(long = "press", value_parser = parse_press)]
    pub presses: Vec<Press>,

    /// Walk the player to a pixel position on a frame, as FRAME:X,Y
    #[arg(long = "walk", value_parser = parse_walk)]
    pub walks: Vec<Walk>,

    /// Path to write the run summary and event log as JSON
    #[arg(long)]
    pub event_log_json: Option<PathBuf>,

    /// Print every logged world event after the run
    #[arg(long)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Press {
    pub frame: u64,
    pub control: Control,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Walk {
    pub frame: u64,
    pub position: (f32, f32),
}

fn split_frame(value: &str) -> Result<(u64, &str)> {
    let (frame, rest) = value
        .split_once(':')
        .ok_or_else(|| anyhow!("expected FRAME:VALUE, got '{value}'"))?;
    let frame = frame
        .trim()
        .parse()
        .with_context(|| format!("invalid frame number '{frame}'"))?;
    Ok((frame, rest.trim()))
}

fn parse_press(value: &str) -> Result<Press> {
    let (frame, label) = split_frame(value)?;
    let Some(control) = Control::parse(label) else {
        bail!("unknown control '{label}'");
    };
    Ok(Press { frame, control })
}

fn parse_walk(value: &str) -> Result<Walk> {
    let (frame, position) = split_frame(value)?;
    let (x, y) = position
        .split_once(',')
        .ok_or_else(|| anyhow!("expected X,Y, got '{position}'"))?;
    let x = x
        .trim()
        .parse()
        .with_context(|| format!("invalid x coordinate '{x}'"))?;
    let y = y
        .trim()
        .parse()
        .with_context(|| format!("invalid y coordinate '{y}'"))?;
    Ok(Walk {
        frame,
        position: (x, y),
    })
}
