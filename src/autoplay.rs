//! Background autoplay: one worker thread that sleeps, ticks the shared clock,
//! and hands the new frame to the UI loop through a single-slot signal.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::clock::{PlaybackClock, TickOutcome};
use crate::foundation::core::FrameIndex;
use crate::foundation::error::{TrajviewError, TrajviewResult};

/// Clock handle shared by the controller and the autoplay thread.
pub type SharedClock = Arc<Mutex<PlaybackClock>>;

/// Latest-frame handoff. Publishing overwrites any frame the UI has not yet
/// taken, so a slow consumer only ever sees the newest position.
#[derive(Debug, Default)]
pub struct FrameSignal {
    slot: Mutex<Option<FrameIndex>>,
    ready: Condvar,
}

impl FrameSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, frame: FrameIndex) {
        *self.slot.lock() = Some(frame);
        self.ready.notify_all();
    }

    pub fn take_latest(&self) -> Option<FrameIndex> {
        self.slot.lock().take()
    }

    /// Block up to `timeout` for a frame.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<FrameIndex> {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            self.ready.wait_for(&mut slot, timeout);
        }
        slot.take()
    }
}

/// Why the worker loop returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AutoplayExit {
    /// Stop requested by the owner.
    Cancelled,
    /// The clock was paused from outside.
    Paused,
    /// Playback ran into the end of the frame range.
    Boundary(FrameIndex),
}

#[derive(Debug, Default)]
struct StopFlag {
    stopped: Mutex<bool>,
    cv: Condvar,
}

impl StopFlag {
    fn request(&self) {
        *self.stopped.lock() = true;
        self.cv.notify_all();
    }

    /// Sleep for `interval` unless a stop arrives first. Returns true when stopped.
    fn sleep(&self, interval: Duration) -> bool {
        let mut stopped = self.stopped.lock();
        if !*stopped {
            self.cv.wait_for(&mut stopped, interval);
        }
        *stopped
    }
}

/// Handle to a running autoplay thread. Dropping it stops and joins the thread.
#[derive(Debug)]
pub struct Autoplay {
    stop: Arc<StopFlag>,
    handle: Option<JoinHandle<AutoplayExit>>,
}

impl Autoplay {
    /// Start ticking `clock` every `base / speed`. The speed is re-read before
    /// each sleep, so speed changes apply from the next interval.
    pub fn spawn(
        clock: SharedClock,
        signal: Arc<FrameSignal>,
        base: Duration,
    ) -> TrajviewResult<Self> {
        let stop = Arc::new(StopFlag::default());
        let worker_stop = stop.clone();
        let handle = std::thread::Builder::new()
            .name("trajview-autoplay".to_string())
            .spawn(move || run(&clock, &signal, &worker_stop, base))
            .map_err(|e| TrajviewError::Other(anyhow::anyhow!("spawn autoplay thread: {e}")))?;
        tracing::debug!("autoplay started");
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// True once the loop has returned on its own (pause or boundary).
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Request a stop and block until the thread has exited.
    pub fn stop_and_join(mut self) -> TrajviewResult<AutoplayExit> {
        self.join()
    }

    fn join(&mut self) -> TrajviewResult<AutoplayExit> {
        self.stop.request();
        let Some(handle) = self.handle.take() else {
            return Ok(AutoplayExit::Cancelled);
        };
        let exit = handle
            .join()
            .map_err(|_| TrajviewError::Other(anyhow::anyhow!("autoplay thread panicked")))?;
        tracing::debug!(?exit, "autoplay joined");
        Ok(exit)
    }
}

impl Drop for Autoplay {
    fn drop(&mut self) {
        if let Err(err) = self.join() {
            tracing::warn!(error = %err, "autoplay shutdown");
        }
    }
}

fn run(clock: &SharedClock, signal: &FrameSignal, stop: &StopFlag, base: Duration) -> AutoplayExit {
    loop {
        let interval = clock.lock().interval(base);
        if stop.sleep(interval) {
            return AutoplayExit::Cancelled;
        }
        let outcome = clock.lock().tick();
        match outcome {
            TickOutcome::Idle => return AutoplayExit::Paused,
            TickOutcome::Advanced(frame) => signal.publish(frame),
            TickOutcome::Stopped(frame) => {
                signal.publish(frame);
                return AutoplayExit::Boundary(frame);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::foundation::core::FrameSpan;

    fn shared(first: u64, last: u64) -> SharedClock {
        let span = FrameSpan::new(FrameIndex(first), FrameIndex(last)).unwrap();
        Arc::new(Mutex::new(PlaybackClock::new(span)))
    }

    #[test]
    fn signal_keeps_only_latest_frame() {
        let s = FrameSignal::new();
        s.publish(FrameIndex(1));
        s.publish(FrameIndex(2));
        assert_eq!(s.take_latest(), Some(FrameIndex(2)));
        assert_eq!(s.take_latest(), None);
        assert_eq!(s.wait_timeout(Duration::from_millis(1)), None);
    }

    #[test]
    fn runs_to_boundary_and_pauses() {
        let clock = shared(0, 5);
        clock.lock().play();
        let signal = Arc::new(FrameSignal::new());
        let auto = Autoplay::spawn(clock.clone(), signal.clone(), Duration::from_millis(1)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !auto.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(auto.stop_and_join().unwrap(), AutoplayExit::Boundary(FrameIndex(5)));
        assert_eq!(signal.take_latest(), Some(FrameIndex(5)));
        assert!(!clock.lock().is_running());
    }

    #[test]
    fn stop_interrupts_long_sleep() {
        let clock = shared(0, 100);
        clock.lock().play();
        let signal = Arc::new(FrameSignal::new());
        let auto = Autoplay::spawn(clock.clone(), signal, Duration::from_secs(30)).unwrap();

        let started = Instant::now();
        assert_eq!(auto.stop_and_join().unwrap(), AutoplayExit::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(clock.lock().frame(), FrameIndex(0));
    }

    #[test]
    fn external_pause_ends_loop() {
        let clock = shared(0, 1_000_000);
        clock.lock().play();
        let signal = Arc::new(FrameSignal::new());
        let auto = Autoplay::spawn(clock.clone(), signal, Duration::from_millis(1)).unwrap();
        std::thread::sleep(Duration::from_millis(10));
        clock.lock().pause();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !auto.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(auto.is_finished());
        assert_eq!(auto.stop_and_join().unwrap(), AutoplayExit::Paused);
    }
}
