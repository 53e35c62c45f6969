//! CPU profiling demo
//!
//! A tokio app where one task hogs a worker with synchronous hashing while
//! others behave. The hot function should dominate `cpu.pprof`.
//!
//! Run with: cargo run --example cpu-burn -- --outputdir ./prof
//! Inspect with: go tool pprof -top ./prof/cpu.pprof

use clap::Parser;
use profguard::{Builder, ProfileFlags, ProfileOption};
use std::hint::black_box;
use std::time::{Duration, Instant};
use tokio::time::sleep;

#[derive(Parser)]
struct Args {
    #[command(flatten)]
    profile: ProfileFlags,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let session = Builder::new().option(ProfileOption::CpuProfile).flags(args.profile).start();

    println!("🔥 CPU burn demo");

    let mut tasks = Vec::new();
    for id in 0..3 {
        tasks.push(tokio::spawn(well_behaved_task(id)));
    }
    tasks.push(tokio::spawn(async {
        hot_loop(Duration::from_secs(2));
    }));

    for task in tasks {
        let _ = task.await;
    }

    if let Err(e) = session.stop() {
        eprintln!("failed to write profile: {e}");
    }
}

async fn well_behaved_task(id: u32) {
    for _ in 0..20 {
        sleep(Duration::from_millis(100)).await;
    }
    println!("  ✓ Task {id} complete");
}

#[inline(never)]
fn hot_loop(budget: Duration) -> u64 {
    let start = Instant::now();
    let mut acc = 0xcbf2_9ce4_8422_2325u64;
    while start.elapsed() < budget {
        for byte in 0..=255u8 {
            acc = black_box((acc ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3));
        }
    }
    println!("  🔥 hot loop done ({acc:x})");
    acc
}
