//! Contention (blocking) tracking
//!
//! Rust has no runtime hook that reports every blocked thread, so blocking
//! events come from instrumented code:
//! - [`Mutex`] records how long a contended `lock()` waited
//! - [`BlockingSection`] marks a region as blocking and records its duration
//! - [`record`] for anything else (channels, condvars, I/O waits)
//!
//! Events are only recorded while the process-wide rate is nonzero. A rate
//! of 1 records every event; a larger rate `r` records events that waited at
//! least `r` nanoseconds. Records accumulate for the lifetime of the process.

use log::trace;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{self, LockResult, MutexGuard, PoisonError, TryLockError};
use std::time::{Duration, Instant};

use super::ReleaseAction;
use crate::diagnostics::status;
use crate::domain::{Mode, ReleaseError};
use crate::export::PprofExporter;

/// Deepest stack recorded per event
const MAX_STACK_DEPTH: usize = 64;

/// Frames from the recording machinery itself, hidden by pprof viewers
const DROP_FRAMES: &str = "profguard::profiling::contention::.*";

/// Minimum wait (ns) worth recording; 0 disables recording
static PROFILE_RATE: AtomicI64 = AtomicI64::new(0);

static RECORDS: sync::Mutex<BTreeMap<Vec<u64>, ContentionBucket>> = sync::Mutex::new(BTreeMap::new());

/// Current process-wide contention sampling rate
pub fn profile_rate() -> i64 {
    PROFILE_RATE.load(Ordering::Acquire)
}

/// Install a new contention sampling rate, returning the previous one
pub fn set_profile_rate(rate: i64) -> i64 {
    PROFILE_RATE.swap(rate, Ordering::AcqRel)
}

/// Cumulative counters for one blocking stack
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContentionBucket {
    pub count: u64,
    pub delay_nanos: u64,
}

/// One aggregated entry of the contention profile
#[derive(Debug, Clone)]
pub struct ContentionSample {
    /// Instruction pointers, leaf first
    pub stack: Vec<u64>,
    pub bucket: ContentionBucket,
}

fn records() -> sync::MutexGuard<'static, BTreeMap<Vec<u64>, ContentionBucket>> {
    RECORDS.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Record that the calling thread was blocked for `wait`
///
/// Captures the caller's stack. Does nothing while the rate is 0.
pub fn record(wait: Duration) {
    let rate = profile_rate();
    if rate <= 0 {
        return;
    }
    let nanos = i64::try_from(wait.as_nanos()).unwrap_or(i64::MAX);
    if rate > 1 && nanos < rate {
        return;
    }

    let mut stack = Vec::with_capacity(MAX_STACK_DEPTH);
    backtrace::trace(|frame| {
        stack.push(frame.ip() as u64);
        stack.len() < MAX_STACK_DEPTH
    });
    trace!("Blocking event: {nanos}ns, {} frames", stack.len());

    let mut records = records();
    let bucket = records.entry(stack).or_default();
    bucket.count += 1;
    bucket.delay_nanos = bucket.delay_nanos.saturating_add(nanos.unsigned_abs());
}

/// Mutual exclusion lock that reports contended acquisitions
///
/// Behaves like [`std::sync::Mutex`]; when `lock` cannot take the lock
/// immediately and contention profiling is on, the time spent waiting is
/// recorded against the caller's stack.
#[derive(Debug, Default)]
pub struct Mutex<T> {
    inner: sync::Mutex<T>,
}

impl<T> Mutex<T> {
    pub const fn new(value: T) -> Self {
        Self { inner: sync::Mutex::new(value) }
    }

    /// Consume the mutex, returning the protected value
    ///
    /// # Errors
    /// Returns an error if the mutex was poisoned
    pub fn into_inner(self) -> LockResult<T> {
        self.inner.into_inner()
    }

    /// Acquire the lock, blocking the current thread until it is available
    ///
    /// # Errors
    /// Returns an error if another holder panicked while holding the lock
    pub fn lock(&self) -> LockResult<MutexGuard<'_, T>> {
        match self.inner.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::Poisoned(poisoned)) => Err(poisoned),
            Err(TryLockError::WouldBlock) => {
                if profile_rate() <= 0 {
                    return self.inner.lock();
                }
                let start = Instant::now();
                let guard = self.inner.lock();
                record(start.elapsed());
                guard
            }
        }
    }

    /// Mutable access without locking (the borrow proves exclusivity)
    ///
    /// # Errors
    /// Returns an error if the mutex was poisoned
    pub fn get_mut(&mut self) -> LockResult<&mut T> {
        self.inner.get_mut()
    }
}

/// Marks the enclosing scope as blocking; its duration is recorded on drop
///
/// ```rust,ignore
/// let _blocking = profguard::contention::BlockingSection::enter();
/// let reply = socket.recv(&mut buf)?;
/// ```
#[must_use = "the section ends (and is recorded) when the guard is dropped"]
pub struct BlockingSection {
    start: Instant,
}

impl BlockingSection {
    pub fn enter() -> Self {
        Self { start: Instant::now() }
    }
}

impl Drop for BlockingSection {
    fn drop(&mut self) {
        record(self.start.elapsed());
    }
}

/// Copy of every recorded stack and its counters
pub fn snapshot() -> Vec<ContentionSample> {
    records()
        .iter()
        .map(|(stack, bucket)| ContentionSample { stack: stack.clone(), bucket: *bucket })
        .collect()
}

/// Write the contention profile to `writer`
///
/// # Errors
/// Returns an error if writing fails
#[allow(clippy::cast_possible_wrap)]
pub fn write_profile<W: Write>(writer: &mut W) -> io::Result<()> {
    let mut exporter = PprofExporter::new(&[("contentions", "count"), ("delay", "nanoseconds")]);
    exporter.set_period("contentions", "count", 1);
    exporter.set_drop_frames(DROP_FRAMES);
    for sample in snapshot() {
        exporter.add_sample(
            &sample.stack,
            vec![sample.bucket.count as i64, sample.bucket.delay_nanos as i64],
        );
    }
    exporter.export(writer)
}

struct ArmedBlock {
    file: File,
    path: PathBuf,
}

/// Record every blocking event until release
pub(crate) fn arm(file: File, path: PathBuf, quiet: bool) -> ReleaseAction {
    set_profile_rate(1);
    status(quiet, format_args!("block profiling enabled, {}", path.display()));

    let armed = sync::Mutex::new(Some(ArmedBlock { file, path }));
    Box::new(move || {
        let Some(armed) = armed.lock().unwrap_or_else(PoisonError::into_inner).take() else {
            return Err(ReleaseError::AlreadyReleased(Mode::Block));
        };
        release(armed, quiet)
    })
}

fn release(armed: ArmedBlock, quiet: bool) -> Result<(), ReleaseError> {
    let ArmedBlock { mut file, path } = armed;

    let written = write_profile(&mut file).and_then(|()| file.sync_all());
    drop(file);
    set_profile_rate(0);

    written.map_err(|source| ReleaseError::Write { mode: Mode::Block, path: path.clone(), source })?;
    status(quiet, format_args!("block profiling disabled, {}", path.display()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiling::lock_globals;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn total() -> ContentionBucket {
        snapshot().iter().fold(ContentionBucket::default(), |mut acc, s| {
            acc.count += s.bucket.count;
            acc.delay_nanos += s.bucket.delay_nanos;
            acc
        })
    }

    #[test]
    fn test_disabled_rate_records_nothing() {
        let _globals = lock_globals();
        let previous = set_profile_rate(0);
        let before = total();

        record(Duration::from_millis(5));
        drop(BlockingSection::enter());

        assert_eq!(total(), before);
        set_profile_rate(previous);
    }

    #[test]
    fn test_rate_one_records_every_event() {
        let _globals = lock_globals();
        let previous = set_profile_rate(1);
        let before = total();

        record(Duration::from_nanos(1));
        record(Duration::from_micros(3));

        let after = total();
        set_profile_rate(previous);
        assert_eq!(after.count, before.count + 2);
        assert_eq!(after.delay_nanos, before.delay_nanos + 3_001);
    }

    #[test]
    fn test_rate_is_a_minimum_wait() {
        let _globals = lock_globals();
        let previous = set_profile_rate(1_000);
        let before = total();

        record(Duration::from_nanos(999));
        record(Duration::from_nanos(1_000));

        let after = total();
        set_profile_rate(previous);
        assert_eq!(after.count, before.count + 1);
    }

    #[test]
    fn test_contended_mutex_records_wait() {
        let _globals = lock_globals();
        let previous = set_profile_rate(1);
        let before = total();

        let shared = Arc::new(Mutex::new(0u32));
        let barrier = Arc::new(Barrier::new(2));
        let holder = {
            let shared = Arc::clone(&shared);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut guard = shared.lock().unwrap();
                barrier.wait();
                thread::sleep(Duration::from_millis(50));
                *guard += 1;
            })
        };

        barrier.wait();
        *shared.lock().unwrap() += 1;
        holder.join().unwrap();

        let after = total();
        set_profile_rate(previous);
        assert_eq!(*shared.lock().unwrap(), 2);
        assert!(after.count > before.count);
        assert!(after.delay_nanos >= before.delay_nanos + 10_000_000);
    }

    #[test]
    fn test_uncontended_mutex_records_nothing() {
        let _globals = lock_globals();
        let previous = set_profile_rate(1);
        let before = total();

        let mutex = Mutex::new(String::from("free"));
        mutex.lock().unwrap().push('!');

        let after = total();
        set_profile_rate(previous);
        assert_eq!(after.count, before.count);
        assert_eq!(mutex.into_inner().unwrap(), "free!");
    }
}
