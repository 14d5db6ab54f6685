//! Debounce timer and generation counter.
//!
//! Time is passed in explicitly, so this primitive does not depend on any
//! event loop. The async driver feeds it `tokio::time::Instant::now()`;
//! tests feed it synthetic instants.
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Tag attached to each issued request. Strictly increasing per debouncer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    pub fn value(self) -> u64 {
        self.0
    }

    fn next(self) -> Self {
        Generation(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Holds at most one armed value and the latest issued generation.
///
/// Arming replaces whatever was armed before. Only a response tagged with
/// [`Debouncer::latest`] is current; anything older is stale.
#[derive(Debug)]
pub struct Debouncer<T> {
    delay: Duration,
    armed: Option<(Instant, T)>,
    latest: Generation,
}

impl<T> Debouncer<T> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            armed: None,
            latest: Generation::default(),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Arms (or re-arms) the timer with `value`, cancelling any armed value.
    pub fn arm(&mut self, value: T, now: Instant) {
        self.armed = Some((now + self.delay, value));
    }

    /// Cancels the armed timer, returning its value.
    pub fn cancel(&mut self) -> Option<T> {
        self.armed.take().map(|(_, value)| value)
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.armed.as_ref().map(|(deadline, _)| *deadline)
    }

    pub fn pending(&self) -> Option<&T> {
        self.armed.as_ref().map(|(_, value)| value)
    }

    /// Fires the timer if its deadline has passed, issuing a new generation.
    pub fn fire(&mut self, now: Instant) -> Option<(Generation, T)> {
        if !matches!(self.deadline(), Some(deadline) if deadline <= now) {
            return None;
        }
        let (_, value) = self.armed.take()?;
        Some((self.issue(), value))
    }

    /// Issues a generation immediately, bypassing the timer. An armed value
    /// stays armed.
    pub fn issue(&mut self) -> Generation {
        self.latest = self.latest.next();
        self.latest
    }

    /// Makes every outstanding generation stale without issuing a request.
    pub fn invalidate(&mut self) {
        self.latest = self.latest.next();
    }

    pub fn latest(&self) -> Generation {
        self.latest
    }

    pub fn is_current(&self, generation: Generation) -> bool {
        generation == self.latest
    }
}
