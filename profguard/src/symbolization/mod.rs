//! # Symbol Resolution for In-Process Stacks
//!
//! Heap and contention samples are captured as raw instruction pointers
//! (via `backtrace::trace`) because resolving symbols at capture time would
//! be far too slow, and inside the allocator it would recurse. When a
//! profile is written, every distinct address is translated once into:
//! - **Function name**: `myapp::cache::Cache::insert`
//! - **File path**: `/src/myapp/src/cache.rs`
//! - **Line number**: `42`
//!
//! ## How it differs from out-of-process symbolization
//!
//! The addresses come from the running process itself, so no
//! `/proc/<pid>/maps` parsing or PIE base adjustment is needed: the
//! `backtrace` crate already knows where every module is loaded and reads
//! the DWARF info of each one lazily.
//!
//! ## Inlining
//!
//! One address can map to several functions when the compiler inlined
//! callees. [`ResolvedFrame::frames`] keeps them innermost first, which is
//! also the order the pprof `Location.line` list expects.
//!
//! ## Limitations
//!
//! - Stripped binaries resolve to `<unknown>`; build with `debug = true`
//! - Demangling assumes Rust (legacy or v0) symbols; other names pass through

pub mod symbolizer;

pub use symbolizer::{InlinedFrame, ResolvedFrame, SourceLocation, Symbolizer};
