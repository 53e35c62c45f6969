//! Block profiling demo
//!
//! Worker threads share a `profguard::contention::Mutex`; while the block
//! profile is armed every contended `lock()` is recorded with its wait time.
//!
//! Run with: cargo run --example lock-contention -- --outputdir ./prof
//! Inspect with: go tool pprof -top ./prof/block.pprof

use clap::Parser;
use profguard::contention::{BlockingSection, Mutex};
use profguard::{Builder, ProfileFlags, ProfileOption};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Parser)]
struct Args {
    #[command(flatten)]
    profile: ProfileFlags,
}

fn main() {
    let args = Args::parse();
    let session = Builder::new().option(ProfileOption::BlockProfile).flags(args.profile).start();

    println!("🔒 Lock contention demo");

    let ledger = Arc::new(Mutex::new(Vec::new()));
    let workers: Vec<_> = (0..4)
        .map(|id| {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                for round in 0..50 {
                    let Ok(mut entries) = ledger.lock() else { return };
                    entries.push((id, round));
                    // Hold the lock long enough for the others to queue up
                    thread::sleep(Duration::from_millis(2));
                }
            })
        })
        .collect();

    {
        let _blocking = BlockingSection::enter();
        for worker in workers {
            let _ = worker.join();
        }
    }

    let entries = ledger.lock().map_or(0, |entries| entries.len());
    println!("  ✓ {entries} ledger entries");

    if let Err(e) = session.stop() {
        eprintln!("failed to write profile: {e}");
    }
}
