use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::error::{Result, StreamError};

/// Default pause between loop turns that dispatched nothing.
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for [`Mainloop`].
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// How long an idle turn sleeps before polling readiness again.
    pub idle_interval: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            idle_interval: DEFAULT_IDLE_INTERVAL,
        }
    }
}

/// An immediate wakeup registered on a [`Mainloop`].
///
/// While enabled, the loop dispatches its owner before it would block.
/// Dropping the source unregisters it.
#[derive(Debug)]
pub struct DeferSource {
    armed: Rc<Cell<bool>>,
}

impl DeferSource {
    pub fn enable(&self, enabled: bool) {
        self.armed.set(enabled);
    }

    pub fn is_enabled(&self) -> bool {
        self.armed.get()
    }
}

/// Something the loop can drive.
pub trait Dispatch {
    /// Whether the owner's immediate wakeup is armed.
    fn wants_prepare(&self) -> bool;

    /// Whether the owner's channel has readiness worth acting on.
    fn io_ready(&self) -> bool;

    /// Run the owner's handlers once.
    fn dispatch(&mut self);
}

/// Single-threaded cooperative polling loop.
///
/// Each turn has a prepare phase followed by an I/O phase. The prepare phase
/// dispatches every target whose wakeup is armed. The I/O phase asks each
/// target for readiness, which channels sample without blocking, and
/// dispatches the ready ones. The loop never waits on a descriptor: a turn
/// that dispatches nothing sleeps for the idle interval and polls again, so
/// wakeup latency on a quiet loop is bounded by that interval.
#[derive(Debug, Default)]
pub struct Mainloop {
    sources: RefCell<Vec<Weak<Cell<bool>>>>,
    config: LoopConfig,
}

impl Mainloop {
    /// Create a loop with default configuration.
    pub fn new() -> Self {
        Self::with_config(LoopConfig::default())
    }

    /// Create a loop with explicit configuration.
    pub fn with_config(config: LoopConfig) -> Self {
        Self {
            sources: RefCell::new(Vec::new()),
            config,
        }
    }

    /// Register a new, disabled immediate wakeup.
    pub fn defer_source(&self) -> DeferSource {
        let armed = Rc::new(Cell::new(false));
        let mut sources = self.sources.borrow_mut();
        sources.retain(|source| source.strong_count() > 0);
        sources.push(Rc::downgrade(&armed));
        DeferSource { armed }
    }

    /// Wakeups that are still registered.
    pub fn live_sources(&self) -> usize {
        self.sources
            .borrow()
            .iter()
            .filter(|source| source.strong_count() > 0)
            .count()
    }

    /// Registered wakeups that are currently enabled.
    pub fn armed_sources(&self) -> usize {
        self.sources
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|armed| armed.get())
            .count()
    }

    /// Run one turn and return how many dispatches it made.
    pub fn iterate(&self, targets: &mut [&mut dyn Dispatch]) -> usize {
        let mut dispatched = 0;

        for target in targets.iter_mut() {
            if target.wants_prepare() {
                target.dispatch();
                dispatched += 1;
            }
        }

        for target in targets.iter_mut() {
            if target.io_ready() {
                target.dispatch();
                dispatched += 1;
            }
        }

        trace!(dispatched, "loop turn");
        dispatched
    }

    /// Turn the loop until `done` returns true.
    ///
    /// Returns the number of turns taken, or [`StreamError::Timeout`] when
    /// `timeout` elapses first.
    pub fn run_until<F>(
        &self,
        targets: &mut [&mut dyn Dispatch],
        timeout: Duration,
        mut done: F,
    ) -> Result<usize>
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut turns = 0usize;

        loop {
            if done() {
                debug!(turns, "loop finished");
                return Ok(turns);
            }
            if Instant::now() >= deadline {
                debug!(turns, ?timeout, "loop deadline reached");
                return Err(StreamError::Timeout(timeout));
            }

            turns += 1;
            if self.iterate(targets) == 0 {
                std::thread::sleep(self.config.idle_interval);
            }
        }
    }

    /// Current loop configuration.
    pub fn config(&self) -> &LoopConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Countdown {
        defer: DeferSource,
        remaining: usize,
        dispatched: usize,
    }

    impl Dispatch for Countdown {
        fn wants_prepare(&self) -> bool {
            self.defer.is_enabled()
        }

        fn io_ready(&self) -> bool {
            false
        }

        fn dispatch(&mut self) {
            self.defer.enable(false);
            self.dispatched += 1;
            if self.remaining > 0 {
                self.remaining -= 1;
                self.defer.enable(true);
            }
        }
    }

    #[test]
    fn sources_start_disabled_and_unregister_on_drop() {
        let mainloop = Mainloop::new();
        let first = mainloop.defer_source();
        let second = mainloop.defer_source();
        assert!(!first.is_enabled());
        assert_eq!(mainloop.live_sources(), 2);
        assert_eq!(mainloop.armed_sources(), 0);

        second.enable(true);
        assert_eq!(mainloop.armed_sources(), 1);

        drop(second);
        assert_eq!(mainloop.live_sources(), 1);
        assert_eq!(mainloop.armed_sources(), 0);
        drop(first);
        assert_eq!(mainloop.live_sources(), 0);
    }

    #[test]
    fn armed_target_is_dispatched_in_prepare_phase() {
        let mainloop = Mainloop::new();
        let mut target = Countdown {
            defer: mainloop.defer_source(),
            remaining: 0,
            dispatched: 0,
        };

        assert_eq!(mainloop.iterate(&mut [&mut target]), 0);
        target.defer.enable(true);
        assert_eq!(mainloop.iterate(&mut [&mut target]), 1);
        assert_eq!(target.dispatched, 1);
        assert!(!target.defer.is_enabled());
    }

    #[test]
    fn run_until_stops_when_done() {
        let mainloop = Mainloop::new();
        let mut target = Countdown {
            defer: mainloop.defer_source(),
            remaining: 3,
            dispatched: 0,
        };
        target.defer.enable(true);

        let turns = mainloop
            .run_until(&mut [&mut target], Duration::from_secs(1), || {
                mainloop.armed_sources() == 0
            })
            .unwrap();
        assert_eq!(turns, 4);
        assert_eq!(target.dispatched, 4);
    }

    #[test]
    fn idle_turns_sleep_between_polls() {
        let mainloop = Mainloop::with_config(LoopConfig {
            idle_interval: Duration::from_millis(5),
        });
        let checks = Cell::new(0);
        let started = Instant::now();
        let turns = mainloop
            .run_until(&mut [], Duration::from_secs(5), || {
                checks.set(checks.get() + 1);
                checks.get() > 3
            })
            .unwrap();
        assert_eq!(turns, 3);
        assert!(started.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn busy_turns_do_not_sleep() {
        let mainloop = Mainloop::with_config(LoopConfig {
            idle_interval: Duration::from_secs(1),
        });
        let mut target = Countdown {
            defer: mainloop.defer_source(),
            remaining: 9,
            dispatched: 0,
        };
        target.defer.enable(true);
        let started = Instant::now();
        mainloop
            .run_until(&mut [&mut target], Duration::from_secs(5), || {
                mainloop.armed_sources() == 0
            })
            .unwrap();
        assert_eq!(target.dispatched, 10);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn run_until_times_out() {
        let mainloop = Mainloop::with_config(LoopConfig {
            idle_interval: Duration::from_millis(1),
        });
        let err = mainloop
            .run_until(&mut [], Duration::from_millis(20), || false)
            .unwrap_err();
        assert!(matches!(err, StreamError::Timeout(_)));
    }
}
