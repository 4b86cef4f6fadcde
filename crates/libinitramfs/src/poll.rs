//! Sleep-poll loops over an injectable clock.
//!
//! Every wait in the pipeline is one of these: devices appear whenever the
//! device manager gets around to creating them, and the only way to notice
//! is to look again.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    #[error("gave up after {elapsed:?}")]
    Timeout { elapsed: Duration },
    #[error("cancelled")]
    Cancelled,
}

pub trait Clock {
    fn as_any(&self) -> &dyn Any;
    /// Monotonic time since an arbitrary fixed point.
    fn now(&self) -> Duration;
    fn sleep(&self, duration: Duration);
}

pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        SystemClock {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration)
    }
}

type SleepHook = Box<dyn Fn(usize)>;

/// Simulated time: `sleep` advances the clock instantly and is recorded.
#[derive(Default)]
pub struct TestClock {
    now: Cell<Duration>,
    sleeps: RefCell<Vec<Duration>>,
    hook: RefCell<Option<SleepHook>>,
}

impl TestClock {
    /// Moves time forward without recording a sleep, e.g. to model a slow
    /// helper program.
    pub fn advance(&self, duration: Duration) {
        self.now.set(self.now.get() + duration);
    }

    pub fn get_sleeps(&self) -> Vec<Duration> {
        self.sleeps.borrow().clone()
    }

    /// Runs `hook` after every sleep with the number of sleeps so far, so a
    /// test can change the world while the code under test waits.
    pub fn on_sleep<F>(&self, hook: F)
    where
        F: Fn(usize) + 'static,
    {
        *self.hook.borrow_mut() = Some(Box::new(hook));
    }
}

impl Clock for TestClock {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn now(&self) -> Duration {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.borrow_mut().push(duration);
        self.advance(duration);
        let count = self.sleeps.borrow().len();
        if let Some(hook) = self.hook.borrow().as_ref() {
            hook(count);
        }
    }
}

pub fn create_clock() -> Box<dyn Clock> {
    if cfg!(test) {
        Box::<TestClock>::default()
    } else {
        Box::<SystemClock>::default()
    }
}

/// Stops an unbounded poll from another thread (or a test).
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Calls `probe` until it yields a value or `timeout` of wall-clock time has
/// passed since the first call. `probe` runs at least once, and once more
/// after the last sleep.
pub fn poll_until<T, F>(
    clock: &dyn Clock,
    timeout: Duration,
    interval: Duration,
    mut probe: F,
) -> Result<T, PollError>
where
    F: FnMut() -> Option<T>,
{
    let start = clock.now();
    loop {
        if let Some(found) = probe() {
            return Ok(found);
        }

        let elapsed = clock.now().saturating_sub(start);
        if elapsed >= timeout {
            return Err(PollError::Timeout { elapsed });
        }
        clock.sleep(interval.min(timeout - elapsed));
    }
}

/// Calls `probe` every `interval` until it yields a value. Only `cancel`
/// ends the loop otherwise.
pub fn poll_forever<T, F>(
    clock: &dyn Clock,
    interval: Duration,
    cancel: &CancelToken,
    mut probe: F,
) -> Result<T, PollError>
where
    F: FnMut() -> Option<T>,
{
    loop {
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled);
        }
        if let Some(found) = probe() {
            return Ok(found);
        }
        clock.sleep(interval);
    }
}
