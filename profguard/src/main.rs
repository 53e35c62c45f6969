//! # profguard - Main Entry Point
//!
//! Runs one built-in workload under a single profiling session:
//! - `--workload cpu` with `--cpuprofile` produces `cpu.pprof`
//! - `--workload alloc` with `--memprofile` / `--memprofilerate N` produces `mem.pprof`
//! - `--workload contend` with `--blockprofile` produces `block.pprof`
//!
//! Ctrl-C during the run flushes the profile and exits 0 (unless
//! `--no-shutdown-hook` is given).

use anyhow::{Context, Result};
use clap::Parser;
use log::debug;
use std::hint::black_box;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use profguard::cli::{Args, Workload};
use profguard::contention;
use profguard::{Builder, ProfileOption, SampledAlloc};

#[global_allocator]
static ALLOC: SampledAlloc = SampledAlloc::system();

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;

/// Upper bound on a single idle sleep, so the deadline is honoured promptly
const IDLE_TICK: Duration = Duration::from_millis(50);

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            EXIT_ERROR
        }
    });
}

fn run() -> Result<()> {
    let args = Args::parse();

    let mut builder = Builder::new();
    if args.quiet {
        builder = builder.option(ProfileOption::Quiet);
    }
    if args.no_shutdown_hook {
        builder = builder.option(ProfileOption::NoShutdownHook);
    }
    let session = builder.flags(args.profile.clone()).start();

    let duration = Duration::from_millis(args.duration_ms);
    if !args.quiet {
        eprintln!("running {} workload for {}ms", workload_name(args.workload), args.duration_ms);
    }

    let deadline = Instant::now() + duration;
    let work_done = match args.workload {
        Workload::Cpu => spin(deadline),
        Workload::Alloc => churn(deadline),
        Workload::Contend => contend(deadline, args.threads.max(1)),
        Workload::Idle => idle(deadline),
    };
    debug!("Workload finished after {work_done} iterations");

    session.stop().context("Failed to write profile")?;
    Ok(())
}

fn workload_name(workload: Workload) -> &'static str {
    match workload {
        Workload::Cpu => "cpu",
        Workload::Alloc => "alloc",
        Workload::Contend => "contend",
        Workload::Idle => "idle",
    }
}

/// Integer hashing in a tight loop
fn spin(deadline: Instant) -> u64 {
    let mut rounds = 0u64;
    let mut acc = 0x9e37_79b9_7f4a_7c15u64;
    while Instant::now() < deadline {
        for i in 0..10_000u64 {
            acc = black_box(acc.rotate_left(5) ^ i).wrapping_mul(0x0100_0000_01b3);
        }
        rounds += 1;
    }
    black_box(acc);
    rounds
}

/// Allocate and drop buffers of varying size, keeping a small live set
fn churn(deadline: Instant) -> u64 {
    let mut rounds = 0u64;
    let mut live: Vec<Vec<u8>> = Vec::new();
    while Instant::now() < deadline {
        let size = 64 << (rounds % 8);
        let buf = black_box(vec![0u8; size]);
        if live.len() < 256 {
            live.push(buf);
        } else {
            #[allow(clippy::cast_possible_truncation)]
            let slot = (rounds % 256) as usize;
            live[slot] = buf;
        }
        rounds += 1;
    }
    rounds
}

/// Several threads take turns on one instrumented lock
fn contend(deadline: Instant, threads: usize) -> u64 {
    let shared = Arc::new(contention::Mutex::new(0u64));
    let workers: Vec<_> = (0..threads)
        .map(|_| {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                while Instant::now() < deadline {
                    let Ok(mut count) = shared.lock() else { break };
                    *count += 1;
                    thread::sleep(Duration::from_micros(200));
                }
            })
        })
        .collect();
    for worker in workers {
        let _ = worker.join();
    }
    shared.lock().map_or(0, |count| *count)
}

fn idle(deadline: Instant) -> u64 {
    let mut ticks = 0u64;
    loop {
        let now = Instant::now();
        if now >= deadline {
            return ticks;
        }
        thread::sleep(IDLE_TICK.min(deadline - now));
        ticks += 1;
    }
}
