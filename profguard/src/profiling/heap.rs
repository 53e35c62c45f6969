//! Heap allocation sampling
//!
//! [`SampledAlloc`] wraps the real global allocator. While the process-wide
//! rate is nonzero, each thread counts down allocated bytes and records one
//! allocation (with its stack) every `rate` bytes; a rate of 1 records every
//! allocation. Sampled pointers are remembered so their frees move them out
//! of the in-use totals.
//!
//! Install it once in the host binary:
//!
//! ```rust,ignore
//! #[global_allocator]
//! static ALLOC: profguard::SampledAlloc = profguard::SampledAlloc::system();
//! ```
//!
//! Without it a memory session still produces a valid, sample-free profile.
//!
//! The registry is cleared when a memory session arms and again once its
//! profile is written, so each `mem.pprof` covers one session and frees
//! after the session cost a single atomic load.

#![allow(unsafe_code)] // GlobalAlloc is an unsafe trait

use log::warn;
use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::ReleaseAction;
use crate::diagnostics::status;
use crate::domain::{Mode, ReleaseError};
use crate::export::PprofExporter;

/// Deepest stack recorded per sample
const MAX_STACK_DEPTH: usize = 64;

/// Frames from the sampling machinery itself, hidden by pprof viewers
const DROP_FRAMES: &str = "profguard::profiling::heap::.*";

/// Bytes between samples; 0 disables sampling
static PROFILE_RATE: AtomicUsize = AtomicUsize::new(0);

/// Sampled allocations not yet freed, checked before touching the registry
static LIVE_SAMPLES: AtomicUsize = AtomicUsize::new(0);

/// Set once any allocation went through [`SampledAlloc`]
static INSTALLED: AtomicBool = AtomicBool::new(false);

static REGISTRY: Mutex<Registry> = Mutex::new(Registry::new());

thread_local! {
    /// Set while this thread is inside the sampler, so the sampler's own
    /// allocations pass straight through
    static IN_SAMPLER: Cell<bool> = const { Cell::new(false) };

    /// Bytes this thread may still allocate before the next sample
    static UNTIL_SAMPLE: Cell<usize> = const { Cell::new(0) };
}

/// Current process-wide heap sampling rate
pub fn profile_rate() -> usize {
    PROFILE_RATE.load(Ordering::Acquire)
}

/// Install a new heap sampling rate, returning the previous one
pub fn set_profile_rate(rate: usize) -> usize {
    PROFILE_RATE.swap(rate, Ordering::AcqRel)
}

/// Cumulative counters for one allocation stack
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapBucket {
    pub allocs: u64,
    pub alloc_bytes: u64,
    pub frees: u64,
    pub free_bytes: u64,
}

impl HeapBucket {
    #[must_use]
    pub fn inuse_objects(&self) -> u64 {
        self.allocs.saturating_sub(self.frees)
    }

    #[must_use]
    pub fn inuse_bytes(&self) -> u64 {
        self.alloc_bytes.saturating_sub(self.free_bytes)
    }
}

/// One aggregated entry of the heap profile
#[derive(Debug, Clone)]
pub struct HeapSample {
    /// Instruction pointers, leaf first
    pub stack: Vec<u64>,
    pub bucket: HeapBucket,
}

struct LiveAlloc {
    bucket: usize,
    size: usize,
}

struct Registry {
    stacks: BTreeMap<Vec<u64>, usize>,
    buckets: Vec<(Vec<u64>, HeapBucket)>,
    live: BTreeMap<usize, LiveAlloc>,
}

impl Registry {
    const fn new() -> Self {
        Self { stacks: BTreeMap::new(), buckets: Vec::new(), live: BTreeMap::new() }
    }

    fn record_alloc(&mut self, stack: Vec<u64>, ptr: usize, size: usize) {
        let bucket = match self.stacks.get(&stack) {
            Some(&idx) => idx,
            None => {
                let idx = self.buckets.len();
                self.stacks.insert(stack.clone(), idx);
                self.buckets.push((stack, HeapBucket::default()));
                idx
            }
        };
        let counters = &mut self.buckets[bucket].1;
        counters.allocs += 1;
        counters.alloc_bytes += size as u64;
        if self.live.insert(ptr, LiveAlloc { bucket, size }).is_none() {
            LIVE_SAMPLES.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_free(&mut self, ptr: usize) {
        if let Some(LiveAlloc { bucket, size }) = self.live.remove(&ptr) {
            LIVE_SAMPLES.fetch_sub(1, Ordering::Relaxed);
            let counters = &mut self.buckets[bucket].1;
            counters.frees += 1;
            counters.free_bytes += size as u64;
        }
    }
}

fn registry() -> MutexGuard<'static, Registry> {
    REGISTRY.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Marks the current thread as inside the sampler for its lifetime
struct SamplerScope;

impl SamplerScope {
    /// `None` when the thread is already sampling or its TLS is gone
    fn enter() -> Option<Self> {
        IN_SAMPLER
            .try_with(|flag| {
                if flag.replace(true) {
                    None
                } else {
                    Some(SamplerScope)
                }
            })
            .ok()
            .flatten()
    }
}

impl Drop for SamplerScope {
    fn drop(&mut self) {
        let _ = IN_SAMPLER.try_with(|flag| flag.set(false));
    }
}

/// Consume `size` bytes of this thread's budget; true when due for a sample
fn due_for_sample(rate: usize, size: usize) -> bool {
    UNTIL_SAMPLE
        .try_with(|remaining| {
            let left = remaining.get().min(rate);
            if left > size {
                remaining.set(left - size);
                false
            } else {
                remaining.set(rate);
                true
            }
        })
        .unwrap_or(false)
}

fn capture_stack() -> Vec<u64> {
    let mut stack = Vec::with_capacity(MAX_STACK_DEPTH);
    backtrace::trace(|frame| {
        stack.push(frame.ip() as u64);
        stack.len() < MAX_STACK_DEPTH
    });
    stack
}

fn on_alloc(ptr: *mut u8, size: usize) {
    if ptr.is_null() {
        return;
    }
    let rate = PROFILE_RATE.load(Ordering::Relaxed);
    if rate == 0 {
        return;
    }
    let Some(_scope) = SamplerScope::enter() else {
        return;
    };
    if !due_for_sample(rate, size) {
        return;
    }
    let stack = capture_stack();
    registry().record_alloc(stack, ptr as usize, size);
}

fn on_free(ptr: *mut u8) {
    if LIVE_SAMPLES.load(Ordering::Relaxed) == 0 {
        return;
    }
    let Some(_scope) = SamplerScope::enter() else {
        return;
    };
    registry().record_free(ptr as usize);
}

/// Global allocator wrapper that feeds the heap profile
pub struct SampledAlloc<A = System> {
    inner: A,
}

impl SampledAlloc<System> {
    /// Wrap the system allocator
    #[must_use]
    pub const fn system() -> Self {
        Self { inner: System }
    }
}

impl<A> SampledAlloc<A> {
    /// Wrap an arbitrary allocator
    pub const fn new(inner: A) -> Self {
        Self { inner }
    }
}

fn mark_installed() {
    if !INSTALLED.load(Ordering::Relaxed) {
        INSTALLED.store(true, Ordering::Relaxed);
    }
}

unsafe impl<A: GlobalAlloc> GlobalAlloc for SampledAlloc<A> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        mark_installed();
        let ptr = self.inner.alloc(layout);
        on_alloc(ptr, layout.size());
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        mark_installed();
        let ptr = self.inner.alloc_zeroed(layout);
        on_alloc(ptr, layout.size());
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        on_free(ptr);
        self.inner.dealloc(ptr, layout);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = self.inner.realloc(ptr, layout, new_size);
        if !new_ptr.is_null() {
            on_free(ptr);
            on_alloc(new_ptr, new_size);
        }
        new_ptr
    }
}

/// Forget every sampled stack and live pointer
fn reset_registry() {
    let _scope = SamplerScope::enter();
    let mut registry = registry();
    *registry = Registry::new();
    LIVE_SAMPLES.store(0, Ordering::Relaxed);
}

/// Estimate the allocations behind `count` samples totalling `bytes`
///
/// An allocation of `size` bytes is sampled with probability
/// `1 - exp(-size / rate)`; dividing by it undoes the sampling so viewers
/// show real counts and sizes.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn scale_heap_sample(count: u64, bytes: u64, rate: usize) -> (i64, i64) {
    if count == 0 || bytes == 0 {
        return (0, 0);
    }
    let (count, bytes) = (count as f64, bytes as f64);
    if rate <= 1 {
        return (count as i64, bytes as i64);
    }
    let avg_size = bytes / count;
    let scale = 1.0 / (1.0 - (-avg_size / rate as f64).exp());
    ((count * scale) as i64, (bytes * scale) as i64)
}

/// Copy of every sampled stack and its counters, in first-seen order
pub fn snapshot() -> Vec<HeapSample> {
    let _scope = SamplerScope::enter();
    registry()
        .buckets
        .iter()
        .map(|(stack, bucket)| HeapSample { stack: stack.clone(), bucket: *bucket })
        .collect()
}

/// Write the current heap profile to `writer`
///
/// # Errors
/// Returns an error if writing fails
#[allow(clippy::cast_possible_wrap)]
pub fn write_profile<W: Write>(writer: &mut W) -> io::Result<()> {
    let samples = snapshot();
    // The exporter allocates heavily; keep those allocations out of the profile
    let _scope = SamplerScope::enter();

    let mut exporter = PprofExporter::new(&[
        ("alloc_objects", "count"),
        ("alloc_space", "bytes"),
        ("inuse_objects", "count"),
        ("inuse_space", "bytes"),
    ]);
    exporter.set_period("space", "bytes", profile_rate() as i64);
    exporter.set_drop_frames(DROP_FRAMES);
    let rate = profile_rate();
    for sample in samples {
        let b = sample.bucket;
        let (alloc_objects, alloc_space) = scale_heap_sample(b.allocs, b.alloc_bytes, rate);
        let (inuse_objects, inuse_space) = scale_heap_sample(b.inuse_objects(), b.inuse_bytes(), rate);
        exporter.add_sample(&sample.stack, vec![alloc_objects, alloc_space, inuse_objects, inuse_space]);
    }
    exporter.export(writer)
}

struct ArmedHeap {
    file: File,
    path: PathBuf,
    previous_rate: usize,
}

/// Install `rate` for the session, remembering the rate it replaces
pub(crate) fn arm(file: File, path: PathBuf, rate: usize, quiet: bool) -> ReleaseAction {
    if !INSTALLED.load(Ordering::Relaxed) {
        warn!("SampledAlloc is not the global allocator; the heap profile will have no samples");
    }
    reset_registry();
    let previous_rate = set_profile_rate(rate);
    status(quiet, format_args!("memory profiling enabled (rate {rate}), {}", path.display()));

    let armed = Mutex::new(Some(ArmedHeap { file, path, previous_rate }));
    Box::new(move || {
        let Some(armed) = armed.lock().unwrap_or_else(PoisonError::into_inner).take() else {
            return Err(ReleaseError::AlreadyReleased(Mode::Memory));
        };
        release(armed, quiet)
    })
}

fn release(armed: ArmedHeap, quiet: bool) -> Result<(), ReleaseError> {
    let ArmedHeap { mut file, path, previous_rate } = armed;

    let written = write_profile(&mut file).and_then(|()| file.sync_all());
    drop(file);
    // Restore even when the write failed
    set_profile_rate(previous_rate);
    reset_registry();

    written.map_err(|source| ReleaseError::Write { mode: Mode::Memory, path: path.clone(), source })?;
    status(quiet, format_args!("memory profiling disabled, {}", path.display()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiling::lock_globals;
    use pprof::protos::{Message, Profile};

    #[global_allocator]
    static ALLOC: SampledAlloc = SampledAlloc::system();

    #[inline(never)]
    fn allocate_marker() -> Box<[u8; 4096]> {
        Box::new([7u8; 4096])
    }

    fn totals() -> HeapBucket {
        snapshot().iter().fold(HeapBucket::default(), |mut acc, s| {
            acc.allocs += s.bucket.allocs;
            acc.alloc_bytes += s.bucket.alloc_bytes;
            acc.frees += s.bucket.frees;
            acc.free_bytes += s.bucket.free_bytes;
            acc
        })
    }

    #[test]
    fn test_rate_zero_records_nothing() {
        let _globals = lock_globals();
        let previous = set_profile_rate(0);
        let before = totals();

        let boxed = allocate_marker();
        drop(boxed);

        let after = totals();
        set_profile_rate(previous);
        assert_eq!(before.allocs, after.allocs);
    }

    #[test]
    fn test_rate_one_records_alloc_and_free() {
        let _globals = lock_globals();
        let previous = set_profile_rate(1);
        let before = totals();

        let boxed = std::hint::black_box(allocate_marker());
        let mid = totals();
        drop(boxed);
        let after = totals();

        set_profile_rate(previous);
        assert!(mid.allocs > before.allocs);
        assert!(mid.alloc_bytes >= before.alloc_bytes + 4096);
        assert!(after.frees > mid.frees);
        assert!(snapshot().iter().all(|s| !s.stack.is_empty()));
    }

    #[test]
    fn test_countdown_samples_once_per_rate_bytes() {
        let _globals = lock_globals();
        UNTIL_SAMPLE.with(|c| c.set(0));
        assert!(due_for_sample(100, 10));
        // 100 bytes of budget: nine more 10-byte allocations pass unsampled
        let sampled = (0..9).filter(|_| due_for_sample(100, 10)).count();
        assert_eq!(sampled, 0);
        assert!(due_for_sample(100, 10));
        // Budget shrinks immediately when the rate drops
        assert!(due_for_sample(1, 1));
    }

    #[test]
    fn test_bucket_inuse_saturates() {
        let bucket = HeapBucket { allocs: 2, alloc_bytes: 10, frees: 3, free_bytes: 20 };
        assert_eq!(bucket.inuse_objects(), 0);
        assert_eq!(bucket.inuse_bytes(), 0);
    }

    #[test]
    fn test_write_profile_has_heap_sample_types() {
        let _globals = lock_globals();
        let previous = set_profile_rate(1);
        let _kept = std::hint::black_box(allocate_marker());

        let mut buf = Vec::new();
        write_profile(&mut buf).unwrap();
        set_profile_rate(previous);

        let profile = Profile::decode(buf.as_slice()).unwrap();
        let names: Vec<&str> = profile
            .sample_type
            .iter()
            .map(|vt| profile.string_table[vt.ty as usize].as_str())
            .collect();
        assert_eq!(names, ["alloc_objects", "alloc_space", "inuse_objects", "inuse_space"]);
        assert_eq!(profile.period, 1);
        assert!(!profile.sample.is_empty());
    }

    #[test]
    fn test_scale_heap_sample() {
        assert_eq!(scale_heap_sample(0, 0, 4096), (0, 0));
        // Rate 1 records every allocation; nothing to undo
        assert_eq!(scale_heap_sample(3, 300, 1), (3, 300));

        // A 64-byte sample at rate 4096 stands for ~64.5 allocations
        let (objects, bytes) = scale_heap_sample(1, 64, 4096);
        assert_eq!(objects, 64);
        assert!((4096..=4160).contains(&bytes), "bytes = {bytes}");

        // Allocations far larger than the rate are always sampled
        assert_eq!(scale_heap_sample(1, 1 << 20, 4096), (1, 1 << 20));
    }

    #[test]
    fn test_write_profile_scales_sampled_totals() {
        let _globals = lock_globals();
        reset_registry();
        let previous = set_profile_rate(4096);

        let kept: Vec<Box<[u8; 64]>> =
            (0..10_000).map(|_| std::hint::black_box(Box::new([0u8; 64]))).collect();
        let mut buf = Vec::new();
        write_profile(&mut buf).unwrap();

        set_profile_rate(previous);
        drop(kept);
        reset_registry();

        let profile = Profile::decode(buf.as_slice()).unwrap();
        let total = |idx: usize| profile.sample.iter().map(|s| s.value[idx]).sum::<i64>();
        let (alloc_objects, alloc_space) = (total(0), total(1));
        println!("alloc_objects={alloc_objects} alloc_space={alloc_space}");

        // 10,000 boxes of 64 bytes, plus the vector holding them
        assert_eq!(profile.period, 4096);
        assert!((5_000..=50_000).contains(&alloc_objects), "alloc_objects = {alloc_objects}");
        assert!((320_000..=3_200_000).contains(&alloc_space), "alloc_space = {alloc_space}");
        assert!(total(3) >= 320_000, "inuse_space = {}", total(3));
    }

    #[test]
    fn test_release_forgets_live_samples() {
        let _globals = lock_globals();
        let previous = set_profile_rate(0);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(crate::domain::MEM_PROFILE_FILE);
        let file = File::create(&path).unwrap();

        let release = arm(file, path.clone(), 1, true);
        let kept = std::hint::black_box(allocate_marker());
        assert!(LIVE_SAMPLES.load(Ordering::Relaxed) > 0);

        release().unwrap();
        assert_eq!(profile_rate(), 0);
        assert_eq!(LIVE_SAMPLES.load(Ordering::Relaxed), 0);
        assert!(snapshot().is_empty());
        assert!(std::fs::metadata(&path).unwrap().len() > 0);

        drop(kept);
        assert_eq!(LIVE_SAMPLES.load(Ordering::Relaxed), 0);
        set_profile_rate(previous);
    }
}
