use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::annotation::{AnnotationStore, SharedStore};
use crate::autoplay::{Autoplay, FrameSignal, SharedClock};
use crate::clock::{Direction, PlaybackClock, PlaybackState, PlaybackStatus};
use crate::config::ViewerConfig;
use crate::foundation::core::{FrameIndex, TrackId};
use crate::foundation::error::{TrajviewError, TrajviewResult};
use crate::index::SharedIndex;
use crate::model::{AnnotationEdit, AnnotationRecord, Category};

/// Playback keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    Space,
    Left,
    Right,
    Up,
    Down,
    R,
    Escape,
    Home,
    End,
}

impl Key {
    pub const ALL: [Key; 9] = [
        Key::Space,
        Key::Left,
        Key::Right,
        Key::Up,
        Key::Down,
        Key::R,
        Key::Escape,
        Key::Home,
        Key::End,
    ];

    pub fn action(self) -> Action {
        match self {
            Key::Space => Action::TogglePlay,
            Key::Left => Action::Step(Direction::Reverse),
            Key::Right => Action::Step(Direction::Forward),
            Key::Up => Action::SpeedUp,
            Key::Down => Action::SpeedDown,
            Key::R => Action::Reset,
            Key::Escape => Action::Exit,
            Key::Home => Action::First,
            Key::End => Action::Last,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Key::Space => "space",
            Key::Left => "left",
            Key::Right => "right",
            Key::Up => "up",
            Key::Down => "down",
            Key::R => "r",
            Key::Escape => "escape",
            Key::Home => "home",
            Key::End => "end",
        }
    }
}

impl FromStr for Key {
    type Err = TrajviewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("esc") {
            return Ok(Key::Escape);
        }
        Key::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| TrajviewError::validation(format!("unknown key '{s}'")))
    }
}

/// Everything the controller can be asked to do, from keys or widgets.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    TogglePlay,
    /// Set direction, then move one frame that way.
    Step(Direction),
    SpeedUp,
    SpeedDown,
    Reset,
    First,
    Last,
    Seek(FrameIndex),
    Exit,
    Describe(String),
    Categorize(Option<Category>),
    SelectReferred(Option<TrackId>),
    ToggleRelated(TrackId),
    SetRelated(BTreeSet<TrackId>),
    ClearAnnotation,
}

impl FromStr for Action {
    type Err = TrajviewError;

    /// Text command form used by the headless `play` loop: a key name, or one of
    /// `seek <frame>`, `desc <text>`, `cat <category|none>`, `ref <id|none>`,
    /// `rel <id>`, `related <id,id,..>`, `clear`.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        if let Ok(key) = line.parse::<Key>() {
            return Ok(key.action());
        }
        let (cmd, arg) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(c, a)| (c, a.trim()));
        let none = arg.eq_ignore_ascii_case("none") || arg.is_empty();
        match cmd.to_ascii_lowercase().as_str() {
            "seek" => Ok(Action::Seek(FrameIndex(parse_number(arg)?))),
            "desc" => Ok(Action::Describe(arg.to_string())),
            "cat" if none => Ok(Action::Categorize(None)),
            "cat" => Ok(Action::Categorize(Some(Category::from_label(arg)?))),
            "ref" if none => Ok(Action::SelectReferred(None)),
            "ref" => Ok(Action::SelectReferred(Some(TrackId(parse_number(arg)?)))),
            "rel" => Ok(Action::ToggleRelated(TrackId(parse_number(arg)?))),
            "related" => arg
                .split([',', ';', ' '])
                .filter(|t| !t.is_empty())
                .map(|t| parse_number(t).map(TrackId))
                .collect::<TrajviewResult<BTreeSet<_>>>()
                .map(Action::SetRelated),
            "clear" => Ok(Action::ClearAnnotation),
            _ => Err(TrajviewError::validation(format!("unknown command '{line}'"))),
        }
    }
}

fn parse_number(s: &str) -> TrajviewResult<u64> {
    s.trim()
        .parse()
        .map_err(|_| TrajviewError::validation(format!("expected a number, got '{s}'")))
}

/// Result of one handled action.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Playback(PlaybackState),
    Annotated(AnnotationRecord),
    Exited,
}

/// Routes actions to the clock, the autoplay thread, and the annotation store.
///
/// Annotation edits always target the clock's current frame. Object selections
/// must name a track active in that frame. Index and store are read through
/// their shared handles on every action, so reloads apply immediately.
#[derive(Debug)]
pub struct InputController {
    clock: SharedClock,
    store: SharedStore,
    index: SharedIndex,
    signal: Arc<FrameSignal>,
    base_interval: Duration,
    speed_factor: f64,
    autoplay: Option<Autoplay>,
    exited: bool,
}

impl InputController {
    pub fn new(
        clock: SharedClock,
        store: SharedStore,
        index: SharedIndex,
        signal: Arc<FrameSignal>,
        cfg: &ViewerConfig,
    ) -> Self {
        Self {
            clock,
            store,
            index,
            signal,
            base_interval: cfg.base_interval(),
            speed_factor: cfg.speed_factor,
            autoplay: None,
            exited: false,
        }
    }

    pub fn current_frame(&self) -> FrameIndex {
        self.clock.lock().frame()
    }

    pub fn playback(&self) -> PlaybackState {
        self.clock.lock().state()
    }

    /// Annotation for the current frame.
    pub fn annotation(&self) -> AnnotationRecord {
        self.store().get(self.current_frame())
    }

    fn store(&self) -> Arc<AnnotationStore> {
        self.store.read().clone()
    }

    pub fn is_exited(&self) -> bool {
        self.exited
    }

    /// True while an autoplay thread is still ticking.
    pub fn autoplay_active(&self) -> bool {
        self.autoplay.as_ref().is_some_and(|a| !a.is_finished())
    }

    pub fn handle_key(&mut self, key: Key) -> TrajviewResult<Outcome> {
        self.dispatch(key.action())
    }

    #[tracing::instrument(skip(self), level = "debug")]
    pub fn dispatch(&mut self, action: Action) -> TrajviewResult<Outcome> {
        if self.exited {
            return Err(TrajviewError::closed("controller has exited"));
        }
        match action {
            Action::TogglePlay => self.toggle_play(),
            Action::Step(direction) => {
                let frame = {
                    let mut clock = self.clock.lock();
                    clock.set_direction(direction);
                    clock.step(direction.sign())
                };
                self.signal.publish(frame);
                Ok(self.playback_outcome())
            }
            Action::SpeedUp => {
                self.clock.lock().speed_up(self.speed_factor);
                Ok(self.playback_outcome())
            }
            Action::SpeedDown => {
                self.clock.lock().speed_down(self.speed_factor);
                Ok(self.playback_outcome())
            }
            Action::Reset => {
                self.clock.lock().reset();
                self.stop_autoplay()?;
                Ok(self.playback_outcome())
            }
            Action::First => self.move_to(|c| c.first()),
            Action::Last => self.move_to(|c| c.last()),
            Action::Seek(frame) => self.move_to(|c| c.seek(frame)),
            Action::Exit => {
                self.shutdown()?;
                Ok(Outcome::Exited)
            }
            Action::Describe(text) => self.annotate(AnnotationEdit::Description(text)),
            Action::Categorize(category) => self.annotate(AnnotationEdit::Category(category)),
            Action::SelectReferred(id) => {
                if let Some(id) = id {
                    self.require_active(id)?;
                }
                self.annotate(AnnotationEdit::Referred(id))
            }
            Action::ToggleRelated(id) => {
                self.require_active(id)?;
                self.annotate(AnnotationEdit::ToggleRelated(id))
            }
            Action::SetRelated(ids) => {
                for id in &ids {
                    self.require_active(*id)?;
                }
                self.annotate(AnnotationEdit::Related(ids))
            }
            Action::ClearAnnotation => self.annotate(AnnotationEdit::Clear),
        }
    }

    /// Stop playback, join the autoplay thread, then close the store.
    ///
    /// A failed final flush leaves the controller usable so exit can be retried.
    pub fn shutdown(&mut self) -> TrajviewResult<()> {
        if self.exited {
            return Ok(());
        }
        self.clock.lock().pause();
        self.stop_autoplay()?;
        self.store().close()?;
        self.exited = true;
        tracing::info!("controller shut down");
        Ok(())
    }

    fn toggle_play(&mut self) -> TrajviewResult<Outcome> {
        let status = self.clock.lock().toggle_play_pause();
        // A previous thread may have ended on its own at a boundary.
        self.stop_autoplay()?;
        if status != PlaybackStatus::Paused {
            self.autoplay = Some(Autoplay::spawn(
                self.clock.clone(),
                self.signal.clone(),
                self.base_interval,
            )?);
        }
        Ok(self.playback_outcome())
    }

    fn stop_autoplay(&mut self) -> TrajviewResult<()> {
        if let Some(auto) = self.autoplay.take() {
            auto.stop_and_join()?;
        }
        Ok(())
    }

    fn move_to(
        &mut self,
        f: impl FnOnce(&mut PlaybackClock) -> FrameIndex,
    ) -> TrajviewResult<Outcome> {
        let frame = {
            let mut clock = self.clock.lock();
            f(&mut clock)
        };
        self.signal.publish(frame);
        Ok(self.playback_outcome())
    }

    fn playback_outcome(&self) -> Outcome {
        Outcome::Playback(self.playback())
    }

    fn require_active(&self, id: TrackId) -> TrajviewResult<()> {
        let frame = self.current_frame();
        if self.index.read().state_at(frame, id).is_some() {
            return Ok(());
        }
        tracing::warn!(track = %id, frame = %frame, "selection rejected: track not active");
        Err(TrajviewError::not_found(format!(
            "track {id} is not active at frame {frame}"
        )))
    }

    fn annotate(&mut self, edit: AnnotationEdit) -> TrajviewResult<Outcome> {
        let frame = self.current_frame();
        let record = self.store().set(frame, edit)?;
        Ok(Outcome::Annotated(record))
    }
}

impl Drop for InputController {
    fn drop(&mut self) {
        if self.exited {
            return;
        }
        if let Err(err) = self.shutdown() {
            tracing::warn!(error = %err, "controller dropped without clean shutdown");
        }
    }
}
