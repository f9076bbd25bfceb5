use std::fs;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::LevelFilter;

mod bindings;
mod cli;
mod runtime;
mod scene;
mod triggers;
mod world;

use cli::Args;
use runtime::{EngineConfig, SceneRuntime};

fn main() -> Result<()> {
    let args = Args::parse();

    let mut logger = env_logger::Builder::from_default_env();
    if args.verbose {
        logger.filter_level(LevelFilter::Debug);
    }
    logger.init();

    let config = EngineConfig {
        frame: Duration::from_millis(args.frame_ms),
        watchdog: Duration::from_millis(args.watchdog_ms),
    };
    let mut runtime = SceneRuntime::load(&args.scene, config)
        .with_context(|| format!("starting scene {}", args.scene.display()))?;

    for frame in 0..args.frames {
        for press in args.presses.iter().filter(|press| press.frame == frame) {
            runtime.press(press.control);
        }
        if let Some(walk) = args.walks.iter().rev().find(|walk| walk.frame == frame) {
            runtime.walk_to(walk.position);
        }
        runtime.frame();
    }

    let summary = runtime.summary();
    runtime.shutdown();

    println!(
        "Scene {} after {} frame(s): {} event(s), {} flag(s), {} live thread(s)",
        summary.scene,
        summary.frames,
        summary.events.len(),
        summary.flags.len(),
        summary.threads.len()
    );
    for page in &summary.transcript {
        println!("  > {page}");
    }
    if args.verbose {
        for event in &summary.events {
            println!("  {event}");
        }
    }

    if let Some(path) = args.event_log_json.as_ref() {
        let json = serde_json::to_string_pretty(&summary)
            .context("serializing run summary to JSON")?;
        fs::write(path, json)
            .with_context(|| format!("writing event log JSON to {}", path.display()))?;
        println!("Saved event log JSON to {}", path.display());
    }

    Ok(())
}
