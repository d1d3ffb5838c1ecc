use std::time::Duration;

use crate::foundation::core::{FrameIndex, FrameSpan};

pub const MIN_SPEED: f64 = 0.2;
pub const MAX_SPEED: f64 = 5.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Forward,
    Reverse,
}

impl Direction {
    pub fn sign(self) -> i64 {
        match self {
            Direction::Forward => 1,
            Direction::Reverse => -1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    Paused,
    PlayingForward,
    PlayingReverse,
}

/// Cursor state. Only [`PlaybackClock`] writes it.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize)]
pub struct PlaybackState {
    pub frame: FrameIndex,
    pub direction: Direction,
    pub speed: f64,
    pub running: bool,
}

impl PlaybackState {
    pub fn status(&self) -> PlaybackStatus {
        match (self.running, self.direction) {
            (false, _) => PlaybackStatus::Paused,
            (true, Direction::Forward) => PlaybackStatus::PlayingForward,
            (true, Direction::Reverse) => PlaybackStatus::PlayingReverse,
        }
    }
}

/// Result of one autoplay tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Clock is paused; nothing moved.
    Idle,
    Advanced(FrameIndex),
    /// The step would have left the span; the cursor sits on the boundary and
    /// playback is paused.
    Stopped(FrameIndex),
}

/// Frame cursor with direction, speed and running flag.
///
/// The cursor always stays inside the span it was created with; every move
/// clamps instead of failing.
#[derive(Clone, Debug)]
pub struct PlaybackClock {
    state: PlaybackState,
    span: FrameSpan,
}

impl PlaybackClock {
    pub fn new(span: FrameSpan) -> Self {
        Self {
            state: PlaybackState {
                frame: span.first,
                direction: Direction::Forward,
                speed: 1.0,
                running: false,
            },
            span,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn frame(&self) -> FrameIndex {
        self.state.frame
    }

    pub fn span(&self) -> FrameSpan {
        self.span
    }

    pub fn is_running(&self) -> bool {
        self.state.running
    }

    pub fn status(&self) -> PlaybackStatus {
        self.state.status()
    }

    /// Replace the valid span (data reload); the cursor is clamped into it.
    pub fn set_span(&mut self, span: FrameSpan) {
        self.span = span;
        self.state.frame = span.clamp(self.state.frame);
    }

    /// Paused resumes in the last active direction; playing pauses.
    pub fn toggle_play_pause(&mut self) -> PlaybackStatus {
        self.state.running = !self.state.running;
        tracing::debug!(status = ?self.status(), "toggle play/pause");
        self.status()
    }

    pub fn play(&mut self) {
        self.state.running = true;
    }

    pub fn pause(&mut self) {
        self.state.running = false;
    }

    /// Takes effect on the next tick; the running flag is untouched.
    pub fn set_direction(&mut self, direction: Direction) {
        self.state.direction = direction;
    }

    /// Move one frame in the sign of `delta`, clamped. Works in any state.
    pub fn step(&mut self, delta: i64) -> FrameIndex {
        self.seek(self.state.frame.offset(delta.signum()))
    }

    /// Set the current frame, clamped to the span.
    pub fn seek(&mut self, frame: FrameIndex) -> FrameIndex {
        self.state.frame = self.span.clamp(frame);
        self.state.frame
    }

    pub fn first(&mut self) -> FrameIndex {
        self.seek(self.span.first)
    }

    pub fn last(&mut self) -> FrameIndex {
        self.seek(self.span.last)
    }

    /// Frames moved by one tick: `round(speed)`, at least 1.
    pub fn step_size(&self) -> u64 {
        (self.state.speed.round() as u64).max(1)
    }

    /// Advance by [`step_size`](Self::step_size) in the current direction.
    /// A step that would leave the span parks the cursor on the boundary and
    /// pauses; the clock never wraps.
    pub fn tick(&mut self) -> TickOutcome {
        if !self.state.running {
            return TickOutcome::Idle;
        }

        let step = self.step_size();
        let cur = self.state.frame.0;
        let target = match self.state.direction {
            Direction::Forward => cur
                .checked_add(step)
                .filter(|&t| t <= self.span.last.0),
            Direction::Reverse => cur
                .checked_sub(step)
                .filter(|&t| t >= self.span.first.0),
        };

        match target {
            Some(t) => {
                self.state.frame = FrameIndex(t);
                TickOutcome::Advanced(self.state.frame)
            }
            None => {
                self.state.frame = match self.state.direction {
                    Direction::Forward => self.span.last,
                    Direction::Reverse => self.span.first,
                };
                self.state.running = false;
                tracing::debug!(frame = %self.state.frame, "playback reached boundary");
                TickOutcome::Stopped(self.state.frame)
            }
        }
    }

    /// Clamp into `[MIN_SPEED, MAX_SPEED]`. NaN leaves the speed unchanged.
    pub fn set_speed(&mut self, multiplier: f64) -> f64 {
        if !multiplier.is_nan() {
            self.state.speed = multiplier.clamp(MIN_SPEED, MAX_SPEED);
        }
        self.state.speed
    }

    pub fn speed_up(&mut self, factor: f64) -> f64 {
        self.set_speed(self.state.speed * factor)
    }

    pub fn speed_down(&mut self, factor: f64) -> f64 {
        self.set_speed(self.state.speed / factor)
    }

    /// Forward, 1.0x, paused. The current frame is kept.
    pub fn reset(&mut self) {
        self.state.direction = Direction::Forward;
        self.state.speed = 1.0;
        self.state.running = false;
    }

    /// Sleep between ticks: `base / speed`.
    pub fn interval(&self, base: Duration) -> Duration {
        base.div_f64(self.state.speed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock(first: u64, last: u64) -> PlaybackClock {
        PlaybackClock::new(FrameSpan::new(FrameIndex(first), FrameIndex(last)).unwrap())
    }

    #[test]
    fn starts_paused_forward_at_first_frame() {
        let c = clock(3, 9);
        assert_eq!(c.frame(), FrameIndex(3));
        assert_eq!(c.status(), PlaybackStatus::Paused);
        assert_eq!(c.state().speed, 1.0);
    }

    #[test]
    fn ticks_move_by_rounded_speed() {
        let mut c = clock(0, 10);
        c.set_speed(2.0);
        c.toggle_play_pause();
        for _ in 0..3 {
            c.tick();
        }
        assert_eq!(c.frame(), FrameIndex(6));

        c.set_speed(0.2);
        assert_eq!(c.step_size(), 1);
        c.set_speed(2.6);
        assert_eq!(c.step_size(), 3);
    }

    #[test]
    fn tick_while_paused_is_idle() {
        let mut c = clock(0, 10);
        assert_eq!(c.tick(), TickOutcome::Idle);
        assert_eq!(c.frame(), FrameIndex(0));
    }

    #[test]
    fn forward_boundary_pauses_without_wrapping() {
        let mut c = clock(0, 10);
        c.seek(FrameIndex(9));
        c.set_speed(3.0);
        c.play();
        assert_eq!(c.tick(), TickOutcome::Stopped(FrameIndex(10)));
        assert_eq!(c.status(), PlaybackStatus::Paused);
        assert_eq!(c.frame(), FrameIndex(10));
    }

    #[test]
    fn landing_exactly_on_last_keeps_running_until_next_tick() {
        let mut c = clock(0, 4);
        c.set_speed(2.0);
        c.play();
        assert_eq!(c.tick(), TickOutcome::Advanced(FrameIndex(2)));
        assert_eq!(c.tick(), TickOutcome::Advanced(FrameIndex(4)));
        assert!(c.is_running());
        assert_eq!(c.tick(), TickOutcome::Stopped(FrameIndex(4)));
        assert!(!c.is_running());
    }

    #[test]
    fn reverse_boundary_pauses_at_first() {
        let mut c = clock(5, 10);
        c.seek(FrameIndex(6));
        c.set_direction(Direction::Reverse);
        c.play();
        assert_eq!(c.tick(), TickOutcome::Advanced(FrameIndex(5)));
        assert_eq!(c.tick(), TickOutcome::Stopped(FrameIndex(5)));
        assert_eq!(c.status(), PlaybackStatus::Paused);
    }

    #[test]
    fn set_speed_is_idempotent_at_bounds() {
        let mut c = clock(0, 1);
        assert_eq!(c.set_speed(9.0), MAX_SPEED);
        assert_eq!(c.set_speed(9.0), MAX_SPEED);
        assert_eq!(c.set_speed(0.01), MIN_SPEED);
        assert_eq!(c.set_speed(-3.0), MIN_SPEED);
        assert_eq!(c.set_speed(f64::INFINITY), MAX_SPEED);
        assert_eq!(c.set_speed(f64::NAN), MAX_SPEED);
    }

    #[test]
    fn speed_steps_saturate() {
        let mut c = clock(0, 1);
        for _ in 0..10 {
            c.speed_up(1.5);
        }
        assert_eq!(c.state().speed, MAX_SPEED);
        for _ in 0..20 {
            c.speed_down(1.5);
        }
        assert_eq!(c.state().speed, MIN_SPEED);
    }

    #[test]
    fn reset_restores_rate_and_keeps_position() {
        let mut c = clock(0, 100);
        c.seek(FrameIndex(42));
        c.set_direction(Direction::Reverse);
        c.set_speed(4.0);
        c.play();
        c.reset();
        let s = c.state();
        assert_eq!(s.frame, FrameIndex(42));
        assert_eq!(s.direction, Direction::Forward);
        assert_eq!(s.speed, 1.0);
        assert!(!s.running);
    }

    #[test]
    fn toggle_resumes_last_direction() {
        let mut c = clock(0, 10);
        c.set_direction(Direction::Reverse);
        assert_eq!(c.toggle_play_pause(), PlaybackStatus::PlayingReverse);
        assert_eq!(c.toggle_play_pause(), PlaybackStatus::Paused);
        assert_eq!(c.toggle_play_pause(), PlaybackStatus::PlayingReverse);
    }

    #[test]
    fn step_and_seek_clamp() {
        let mut c = clock(2, 4);
        assert_eq!(c.step(-1), FrameIndex(2));
        assert_eq!(c.step(5), FrameIndex(3));
        assert_eq!(c.seek(FrameIndex(99)), FrameIndex(4));
        assert_eq!(c.step(1), FrameIndex(4));
        assert!(!c.is_running());
        assert_eq!(c.first(), FrameIndex(2));
    }

    #[test]
    fn interval_scales_inversely_with_speed() {
        let mut c = clock(0, 1);
        let base = Duration::from_millis(50);
        let ms = |c: &PlaybackClock| c.interval(base).as_secs_f64() * 1000.0;
        assert!((ms(&c) - 50.0).abs() < 1e-3);
        c.set_speed(2.0);
        assert!((ms(&c) - 25.0).abs() < 1e-3);
        c.set_speed(0.5);
        assert!((ms(&c) - 100.0).abs() < 1e-3);
    }

    #[test]
    fn set_span_clamps_cursor() {
        let mut c = clock(0, 100);
        c.seek(FrameIndex(80));
        c.set_span(FrameSpan::new(FrameIndex(0), FrameIndex(50)).unwrap());
        assert_eq!(c.frame(), FrameIndex(50));
    }
}
