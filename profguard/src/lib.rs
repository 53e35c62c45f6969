//! # profguard - Single-Session Runtime Profiling
//!
//! profguard runs exactly one profiling session per process and guarantees
//! the captured profile reaches disk, whether the program stops the session
//! itself or is interrupted with Ctrl-C.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Host Application                          │
//! │      options (ProfileOption)   +   flags (--cpuprofile, ...)    │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ Builder::start()
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Session Guard                              │
//! │  1. claim process-wide ACTIVE flag (fatal if already set)       │
//! │  2. config::resolve      options, then flag overrides           │
//! │  3. provision            output dir (explicit or temp)          │
//! │  4. profiling::arm       cpu | memory | block                   │
//! │  5. release action that clears ACTIVE                           │
//! │  6. shutdown hook        SIGINT → stop() → exit(0)              │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ Session::stop()
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │   cpu.pprof  │  mem.pprof  │  block.pprof   (pprof protobuf)     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`session`]: the start/stop state machine and the SIGINT hook
//! - [`config`]: [`ProfileOption`]s and [`SessionConfig`] resolution
//! - [`cli`]: [`ProfileFlags`] for hosts to flatten into their `clap` parser
//! - [`provision`]: output directory creation
//! - [`profiling`]: per-mode arming and the instrumentation behind it
//!   - `cpu`: `SIGPROF` sampling via the `pprof` crate
//!   - `heap`: [`SampledAlloc`], a sampling global allocator
//!   - `contention`: instrumented [`contention::Mutex`] and blocking markers
//! - [`symbolization`]: in-process address → function/file/line
//! - [`export`]: pprof protobuf encoding for heap and contention data
//! - [`domain`]: modes, file names and error types
//!
//! ## Typical Usage
//!
//! ```rust,ignore
//! use profguard::{Builder, ProfileOption};
//!
//! #[global_allocator]
//! static ALLOC: profguard::SampledAlloc = profguard::SampledAlloc::system();
//!
//! fn main() {
//!     let args = Args::parse(); // with #[command(flatten)] profile: ProfileFlags
//!     let session = Builder::new()
//!         .option(ProfileOption::MemProfile)
//!         .flags(args.profile)
//!         .start();
//!     run();
//!     session.stop().ok();
//! }
//! ```
//!
//! ## Guarantees
//!
//! - At most one session per process at a time; a second `start` exits
//!   before touching any instrumentation
//! - Global sampling rates are restored (heap) or disabled (contention) when
//!   the session stops
//! - Flags always override programmatic options
//! - `stop` is not idempotent; call it once

pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod domain;
pub mod export;
pub mod profiling;
pub mod provision;
pub mod session;
pub mod symbolization;

pub use cli::ProfileFlags;
pub use config::{ProfileOption, SessionConfig};
pub use domain::Mode;
pub use profiling::contention;
pub use profiling::heap::SampledAlloc;
pub use session::{start, Builder, Session};
