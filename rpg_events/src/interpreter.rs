use std::time::Duration;

use log::{debug, error, warn};

use crate::host::{Control, EventHost};
use crate::operation::{
    EntityCue, Fade, FlagIf, MusicAction, Operation, Say, Selection, TileReplace,
    DIALOG_CLICK_INTERVAL, TILE_SIZE,
};
use crate::tracker::{EventTracker, Flow, Progress};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FadeDirection {
    In,
    Out,
}

impl EventTracker {
    pub(crate) fn execute(
        &mut self,
        operation: &Operation,
        entering: bool,
        progress: Progress,
        host: &mut dyn EventHost,
        now: Duration,
    ) -> Flow {
        match operation {
            Operation::Say(say) => self.say(say, entering, progress, host, now),
            Operation::Wait(wait) => {
                let started = match progress {
                    Progress::Wait { started } if !entering => started,
                    _ => now,
                };
                if now.saturating_sub(started) >= Duration::from_millis(wait.duration_ms) {
                    Flow::Next
                } else {
                    Flow::Suspend(Progress::Wait { started })
                }
            }
            Operation::WaitForKey => {
                if entering {
                    host.show_cursor(true);
                }
                if host.consume(Control::Activate) {
                    host.show_cursor(false);
                    Flow::Next
                } else {
                    Flow::Suspend(Progress::Fresh)
                }
            }
            Operation::HideBox => {
                host.close_box();
                Flow::Next
            }
            Operation::Selection(selection) => selection_step(selection, entering, progress, host),
            Operation::Entity { cue } => {
                self.entity(cue, host);
                Flow::Next
            }
            Operation::FlagSet { flag } => {
                host.set_flag(flag);
                Flow::Next
            }
            Operation::FlagUnset { flag } => {
                host.unset_flag(flag);
                Flow::Next
            }
            Operation::FlagIf(branch) => flag_if(branch, host),
            Operation::FlagExitIf { flag } => {
                if host.has_flag(flag) {
                    Flow::CancelFrame
                } else {
                    Flow::Next
                }
            }
            Operation::FlagOnce { flag } => {
                if host.has_flag(flag) {
                    Flow::CancelFrame
                } else {
                    host.set_flag(flag);
                    Flow::Next
                }
            }
            Operation::Music { action } => {
                self.music(action, host);
                Flow::Next
            }
            Operation::SceneLoad(load) => {
                debug!("scene load {}", load.path);
                if let Some(start) = host.load_scene(&load.path, load.door.as_deref()) {
                    self.queue_front(start);
                }
                if let Some(speaker) = self.speaker.as_deref() {
                    if !host.has_entity(speaker) {
                        self.speaker = None;
                    }
                }
                Flow::Next
            }
            Operation::TileReplace(replace) => {
                replace_tiles(replace, host);
                Flow::Next
            }
            Operation::FadeIn(fade) => fade_step(fade, FadeDirection::In, entering, progress, host, now),
            Operation::FadeOut(fade) => {
                fade_step(fade, FadeDirection::Out, entering, progress, host, now)
            }
            Operation::Unsupported { opcode } => {
                error!("unsupported opcode '{opcode}' skipped");
                Flow::Next
            }
        }
    }

    fn say(
        &mut self,
        say: &Say,
        entering: bool,
        progress: Progress,
        host: &mut dyn EventHost,
        now: Duration,
    ) -> Flow {
        let (mut offset, mut revealed, mut last_reveal) = match progress {
            Progress::Say {
                offset,
                revealed,
                last_reveal,
            } if !entering => (offset, revealed, last_reveal),
            _ => (0, 0, None),
        };

        if entering {
            if let Some(speaker) = self.speaker.as_deref() {
                if say.expression.is_some() {
                    host.show_expression(say.expression.as_deref());
                }
                host.entity_cue(speaker, &EntityCue::Speech { active: true });
            }
            if !host.is_box_open() {
                host.open_box();
            }
            if !say.append {
                host.set_text("");
            }
        }

        if say.interval_ms < 0 {
            host.dialog_click();
            if say.append {
                host.append_text(&say.text);
            } else {
                host.set_text(&say.text);
            }
            self.end_speech(host);
            return Flow::Next;
        }

        let interval = Duration::from_millis(say.interval_ms.unsigned_abs());
        let due = last_reveal.map_or(true, |at| now.saturating_sub(at) >= interval);
        if due && offset < say.text.len() {
            if revealed % DIALOG_CLICK_INTERVAL == 0 {
                host.dialog_click();
            }
            let rest = &say.text[offset..];
            let mut chars = rest.chars();
            let mut width = 0;
            if let Some(first) = chars.next() {
                width += first.len_utf8();
                revealed += 1;
                // Whitespace is revealed together with the following character.
                if first.is_whitespace() {
                    if let Some(next) = chars.next() {
                        width += next.len_utf8();
                        revealed += 1;
                    }
                }
            }
            host.append_text(&rest[..width]);
            offset += width;
            last_reveal = Some(now);
        }

        if offset >= say.text.len() {
            self.end_speech(host);
            Flow::Next
        } else {
            Flow::Suspend(Progress::Say {
                offset,
                revealed,
                last_reveal,
            })
        }
    }

    fn end_speech(&self, host: &mut dyn EventHost) {
        if let Some(speaker) = self.speaker.as_deref() {
            host.entity_cue(speaker, &EntityCue::Speech { active: false });
        }
    }

    fn entity(&mut self, cue: &EntityCue, host: &mut dyn EventHost) {
        if let EntityCue::Speaker { name } = cue {
            match name.as_deref().filter(|name| !name.is_empty()) {
                None => self.speaker = None,
                Some(name) if host.has_entity(name) => {
                    if self.speaker.is_some() {
                        host.show_expression(None);
                    }
                    self.speaker = Some(name.to_string());
                }
                Some(name) => error!("entity '{name}' does not exist"),
            }
            return;
        }

        let Some(speaker) = self.speaker.as_deref() else {
            debug!("entity cue without a speaker skipped");
            return;
        };
        match cue {
            EntityCue::Move { x, y, set: true } => {
                let placed = EntityCue::Move {
                    x: x * TILE_SIZE,
                    y: y * TILE_SIZE,
                    set: true,
                };
                host.entity_cue(speaker, &placed);
            }
            other => host.entity_cue(speaker, other),
        }
    }

    fn music(&mut self, action: &MusicAction, host: &mut dyn EventHost) {
        match action {
            MusicAction::Set { path, looped } => {
                if self.music.as_deref() != Some(path.as_str()) {
                    host.play_music(path, *looped);
                    self.music = Some(path.clone());
                }
            }
            MusicAction::Stop => {
                host.stop_music();
                self.music = None;
            }
            MusicAction::Pause => host.pause_music(),
            MusicAction::Play => host.resume_music(),
        }
    }
}

fn selection_step(
    selection: &Selection,
    entering: bool,
    progress: Progress,
    host: &mut dyn EventHost,
) -> Flow {
    let mut highlighted = match progress {
        Progress::Selection { highlighted } if !entering => highlighted,
        _ => 0,
    };
    if entering {
        host.show_options(&selection.first.label, &selection.second.label, highlighted);
    }
    if host.consume(Control::SelectPrevious) {
        highlighted = 0;
        host.show_options(&selection.first.label, &selection.second.label, highlighted);
    }
    if host.consume(Control::SelectNext) {
        highlighted = 1;
        host.show_options(&selection.first.label, &selection.second.label, highlighted);
    }
    if !host.consume(Control::Activate) {
        return Flow::Suspend(Progress::Selection { highlighted });
    }

    host.hide_options();
    let target = &selection.option(highlighted).event;
    match host.find_event(target) {
        Some(event) => Flow::Call(event),
        None => {
            error!("event '{target}' not found");
            Flow::Next
        }
    }
}

fn flag_if(branch: &FlagIf, host: &mut dyn EventHost) -> Flow {
    if !host.has_flag(&branch.flag) {
        return Flow::Next;
    }
    if let Some(inline) = branch.inline.as_ref().filter(|event| !event.is_empty()) {
        return Flow::Call(inline.clone());
    }
    match branch.event.as_deref() {
        Some(name) => match host.find_event(name) {
            Some(event) => Flow::Call(event),
            None => {
                error!("event '{name}' not found");
                Flow::Next
            }
        },
        None => {
            warn!("flag_if '{}' has no event to call", branch.flag);
            Flow::Next
        }
    }
}

fn replace_tiles(replace: &TileReplace, host: &mut dyn EventHost) {
    let (x0, y0) = replace.from;
    let (x1, y1) = replace.to;
    for x in x0..x1 {
        for y in y0..y1 {
            host.set_tile(replace.layer, (x, y), &replace.atlas, replace.rotation);
        }
    }
}

fn fade_step(
    fade: &Fade,
    direction: FadeDirection,
    entering: bool,
    progress: Progress,
    host: &mut dyn EventHost,
    now: Duration,
) -> Flow {
    let started = match progress {
        Progress::Fade { started } if !entering => started,
        _ => {
            host.lock_movement(true);
            now
        }
    };
    let elapsed = now.saturating_sub(started);
    let duration = Duration::from_millis(fade.duration_ms);
    let color = host.overlay_color();
    let settled = match direction {
        FadeDirection::In => color.a == 0,
        FadeDirection::Out => color.a == u8::MAX,
    };

    if elapsed < duration && !settled {
        let t = elapsed.as_secs_f32() / duration.as_secs_f32();
        let level = match direction {
            FadeDirection::In => 1.0 - t,
            FadeDirection::Out => t,
        };
        let alpha = (255.0 * level).round().clamp(0.0, 255.0) as u8;
        host.set_overlay_color(color.with_alpha(alpha));
        return Flow::Suspend(Progress::Fade { started });
    }

    // Snap to the end value so rounding never leaves a faint overlay.
    let target = match direction {
        FadeDirection::In => 0,
        FadeDirection::Out => u8::MAX,
    };
    host.set_overlay_color(color.with_alpha(target));
    host.lock_movement(false);
    Flow::Next
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;
    use std::time::Duration;

    use crate::testing::RecordingHost;
    use crate::{
        Control, EntityCue, Event, EventLibrary, EventTracker, Fade, FlagIf, MusicAction,
        Operation, Rgba, Say, SceneLoad, Selection, SelectionOption, TickStatus, TileReplace,
    };

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn run(host: &mut RecordingHost, operations: Vec<Operation>) -> EventTracker {
        let mut tracker = EventTracker::new();
        tracker.call(Rc::new(Event::new(operations)));
        tracker.tick(host, ms(0));
        tracker
    }

    #[test]
    fn instant_say_finishes_in_one_tick() {
        let mut host = RecordingHost::new();
        let tracker = run(&mut host, vec![Operation::say("Hello there", -1)]);
        assert!(tracker.is_idle());
        assert_eq!(host.text, "Hello there");
        assert!(host.box_open);
        assert_eq!(host.clicks, 1);
    }

    #[test]
    fn say_reveals_one_character_per_interval() {
        let mut host = RecordingHost::new();
        let mut tracker = EventTracker::new();
        tracker.call(Rc::new(Event::new(vec![Operation::say("abcde", 10)])));

        assert_eq!(tracker.tick(&mut host, ms(0)), TickStatus::Suspended);
        assert_eq!(host.text, "a");
        // Too early for the next character.
        assert_eq!(tracker.tick(&mut host, ms(5)), TickStatus::Suspended);
        assert_eq!(host.text, "a");

        let statuses: Vec<_> = [10, 20, 30, 40]
            .into_iter()
            .map(|at| tracker.tick(&mut host, ms(at)))
            .collect();
        assert_eq!(
            statuses,
            vec![
                TickStatus::Suspended,
                TickStatus::Suspended,
                TickStatus::Suspended,
                TickStatus::Idle
            ]
        );
        assert_eq!(host.text, "abcde");
        assert_eq!(host.clicks, 3);
    }

    #[test]
    fn whitespace_is_revealed_with_the_next_character() {
        let mut host = RecordingHost::new();
        let mut tracker = EventTracker::new();
        tracker.call(Rc::new(Event::new(vec![Operation::say("a b", 10)])));

        assert_eq!(tracker.tick(&mut host, ms(0)), TickStatus::Suspended);
        assert_eq!(tracker.tick(&mut host, ms(10)), TickStatus::Idle);
        assert_eq!(host.text, "a b");
    }

    #[test]
    fn appended_say_keeps_existing_text() {
        let mut host = RecordingHost::new();
        host.box_open = true;
        host.text = "Hi".to_string();
        run(
            &mut host,
            vec![Operation::Say(Say {
                text: " there".to_string(),
                expression: None,
                interval_ms: -1,
                append: true,
            })],
        );
        assert_eq!(host.text, "Hi there");
        assert_eq!(host.logged("box.open"), 0);
    }

    #[test]
    fn say_animates_the_speaker() {
        let mut host = RecordingHost::new();
        host.entities.insert("guard".to_string());
        run(
            &mut host,
            vec![
                Operation::Entity {
                    cue: EntityCue::Speaker {
                        name: Some("guard".to_string()),
                    },
                },
                Operation::Say(Say {
                    text: "Halt!".to_string(),
                    expression: Some("angry".to_string()),
                    interval_ms: -1,
                    append: false,
                }),
            ],
        );
        assert_eq!(host.expression.as_deref(), Some("angry"));
        assert_eq!(host.logged("entity.guard Speech { active: true }"), 1);
        assert_eq!(host.logged("entity.guard Speech { active: false }"), 1);
    }

    #[test]
    fn wait_measures_from_its_first_tick() {
        let mut host = RecordingHost::new();
        let mut tracker = EventTracker::new();
        tracker.call(Rc::new(Event::new(vec![Operation::wait(100)])));

        assert_eq!(tracker.tick(&mut host, ms(500)), TickStatus::Suspended);
        assert_eq!(tracker.tick(&mut host, ms(599)), TickStatus::Suspended);
        assert_eq!(tracker.tick(&mut host, ms(600)), TickStatus::Idle);
    }

    #[test]
    fn wait_for_key_consumes_activate() {
        let mut host = RecordingHost::new();
        let mut tracker = EventTracker::new();
        tracker.call(Rc::new(Event::new(vec![Operation::WaitForKey])));

        assert_eq!(tracker.tick(&mut host, ms(0)), TickStatus::Suspended);
        assert!(host.cursor_visible);

        host.press(Control::Activate);
        assert_eq!(tracker.tick(&mut host, ms(16)), TickStatus::Idle);
        assert!(!host.cursor_visible);
        assert!(host.pressed.is_empty());
    }

    fn choice() -> Operation {
        Operation::Selection(Selection {
            first: SelectionOption {
                label: "Yes".to_string(),
                event: "yes".to_string(),
            },
            second: SelectionOption {
                label: "No".to_string(),
                event: "no".to_string(),
            },
        })
    }

    #[test]
    fn selection_calls_highlighted_option() {
        let mut host = RecordingHost::new();
        host.event("yes", vec![Operation::flag_set("chose_yes")]);
        host.event("no", vec![Operation::flag_set("chose_no")]);
        let mut tracker = EventTracker::new();
        tracker.call(Rc::new(Event::new(vec![choice()])));

        assert_eq!(tracker.tick(&mut host, ms(0)), TickStatus::Suspended);
        assert_eq!(
            host.options,
            Some(("Yes".to_string(), "No".to_string(), 0))
        );

        host.press(Control::SelectNext);
        assert_eq!(tracker.tick(&mut host, ms(16)), TickStatus::Suspended);
        assert_eq!(host.options.as_ref().map(|options| options.2), Some(1));

        host.press(Control::Activate);
        assert_eq!(tracker.tick(&mut host, ms(32)), TickStatus::Idle);
        assert_eq!(host.options, None);
        assert_eq!(host.logged("flag.set chose_no"), 1);
        assert!(!host.flags.has("chose_yes"));
    }

    #[test]
    fn selection_with_missing_event_falls_through() {
        let mut host = RecordingHost::new();
        host.press(Control::Activate);
        let tracker = run(&mut host, vec![choice(), Operation::flag_set("after")]);
        assert!(tracker.is_idle());
        assert!(host.flags.has("after"));
        assert_eq!(host.options, None);
    }

    #[test]
    fn flag_if_prefers_inline_event() {
        let mut host = RecordingHost::new();
        host.event("named", vec![Operation::flag_set("named_ran")]);
        host.flags.set("door_open");
        run(
            &mut host,
            vec![Operation::FlagIf(FlagIf {
                flag: "door_open".to_string(),
                event: Some("named".to_string()),
                inline: Some(Rc::new(Event::new(vec![Operation::flag_set("inline_ran")]))),
            })],
        );
        assert!(host.flags.has("inline_ran"));
        assert!(!host.flags.has("named_ran"));
    }

    #[test]
    fn flag_if_without_flag_skips_call() {
        let mut host = RecordingHost::new();
        host.event("named", vec![Operation::flag_set("named_ran")]);
        run(
            &mut host,
            vec![Operation::FlagIf(FlagIf {
                flag: "door_open".to_string(),
                event: Some("named".to_string()),
                inline: None,
            })],
        );
        assert!(!host.flags.has("named_ran"));
    }

    #[test]
    fn entity_cues_follow_the_speaker() {
        let mut host = RecordingHost::new();
        host.entities.insert("guard".to_string());
        let speaker = |name: &str| Operation::Entity {
            cue: EntityCue::Speaker {
                name: Some(name.to_string()),
            },
        };
        let tracker = run(
            &mut host,
            vec![
                Operation::Entity {
                    cue: EntityCue::AnimationStop,
                },
                speaker("guard"),
                Operation::Entity {
                    cue: EntityCue::Move {
                        x: 2.0,
                        y: 3.0,
                        set: true,
                    },
                },
                speaker("ghost"),
                Operation::Entity {
                    cue: EntityCue::AnimationStop,
                },
            ],
        );

        assert_eq!(tracker.speaker(), Some("guard"));
        assert_eq!(
            host.log,
            vec![
                "entity.guard Move { x: 64.0, y: 96.0, set: true }".to_string(),
                "entity.guard AnimationStop".to_string(),
            ]
        );
    }

    #[test]
    fn music_set_skips_the_playing_track() {
        let mut host = RecordingHost::new();
        let set = |path: &str| Operation::Music {
            action: MusicAction::Set {
                path: path.to_string(),
                looped: true,
            },
        };
        run(
            &mut host,
            vec![
                set("town.ogg"),
                set("town.ogg"),
                Operation::Music {
                    action: MusicAction::Stop,
                },
                set("town.ogg"),
            ],
        );
        assert_eq!(host.logged("music.play town.ogg loop=true"), 2);
        assert_eq!(host.logged("music.stop"), 1);
    }

    #[test]
    fn scene_load_queues_start_event_behind_current_frames() {
        let mut host = RecordingHost::new();
        let mut forest = EventLibrary::new();
        forest.insert("_start_", vec![Operation::flag_set("arrived")]);
        host.scenes.insert("forest.json".to_string(), forest);

        let mut tracker = EventTracker::new();
        tracker.call(Rc::new(Event::new(vec![
            Operation::SceneLoad(SceneLoad {
                path: "forest.json".to_string(),
                door: Some("west".to_string()),
            }),
            Operation::wait(100),
        ])));

        assert_eq!(tracker.tick(&mut host, ms(0)), TickStatus::Suspended);
        assert_eq!(host.logged("scene.load forest.json door=west"), 1);
        assert_eq!(tracker.depth(), 2);
        assert!(!host.flags.has("arrived"));

        assert_eq!(tracker.tick(&mut host, ms(100)), TickStatus::Idle);
        assert!(host.flags.has("arrived"));
    }

    #[test]
    fn tile_replace_fills_half_open_rectangle() {
        let mut host = RecordingHost::new();
        run(
            &mut host,
            vec![Operation::TileReplace(TileReplace {
                layer: 1,
                from: (0, 0),
                to: (2, 3),
                atlas: "cave".to_string(),
                rotation: 90,
            })],
        );
        assert_eq!(host.tiles.len(), 6);
        assert!(host.tiles.contains(&(1, (1, 2), "cave".to_string(), 90)));
        assert!(!host.tiles.iter().any(|tile| tile.1 == (2, 3)));
    }

    #[test]
    fn fade_out_snaps_to_opaque_and_releases_movement() {
        let mut host = RecordingHost::new();
        host.overlay = Rgba::new(0, 0, 0, 0);
        let mut tracker = EventTracker::new();
        tracker.call(Rc::new(Event::new(vec![Operation::FadeOut(Fade {
            duration_ms: 100,
        })])));

        assert_eq!(tracker.tick(&mut host, ms(0)), TickStatus::Suspended);
        assert!(host.movement_locked);
        assert_eq!(tracker.tick(&mut host, ms(50)), TickStatus::Suspended);
        assert!(host.overlay.a > 100 && host.overlay.a < 155);

        assert_eq!(tracker.tick(&mut host, ms(100)), TickStatus::Idle);
        assert_eq!(host.overlay.a, 255);
        assert!(!host.movement_locked);
    }

    #[test]
    fn fade_in_on_clear_overlay_finishes_at_once() {
        let mut host = RecordingHost::new();
        let tracker = run(&mut host, vec![Operation::FadeIn(Fade::default())]);
        assert!(tracker.is_idle());
        assert_eq!(host.overlay.a, 0);
        assert!(!host.movement_locked);
    }

    #[test]
    fn unsupported_opcode_is_skipped() {
        let mut host = RecordingHost::new();
        let tracker = run(
            &mut host,
            vec![
                Operation::Unsupported {
                    opcode: "camera_shake".to_string(),
                },
                Operation::flag_set("after"),
            ],
        );
        assert!(tracker.is_idle());
        assert!(host.flags.has("after"));
    }
}
