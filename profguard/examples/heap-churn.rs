//! Heap profiling demo
//!
//! Sampling only sees allocations that go through `SampledAlloc`, so the
//! program installs it as the global allocator.
//!
//! Run with: cargo run --example heap-churn -- --memprofilerate 1 --outputdir ./prof
//! Inspect with: go tool pprof -sample_index=inuse_space ./prof/mem.pprof

use clap::Parser;
use profguard::{Builder, ProfileFlags, ProfileOption, SampledAlloc};
use std::collections::HashMap;

#[global_allocator]
static ALLOC: SampledAlloc = SampledAlloc::system();

#[derive(Parser)]
struct Args {
    #[command(flatten)]
    profile: ProfileFlags,
}

fn main() {
    let args = Args::parse();
    let session = Builder::new().option(ProfileOption::MemProfile).flags(args.profile).start();

    println!("📦 Heap churn demo");

    // Retained: shows up under inuse_space
    let cache = build_cache(10_000);
    // Transient: shows up only under alloc_space
    let total: usize = (0..1_000).map(|i| transient_strings(i).len()).sum();

    println!("  cache entries: {}, transient bytes: {total}", cache.len());

    if let Err(e) = session.stop() {
        eprintln!("failed to write profile: {e}");
    }
}

#[inline(never)]
fn build_cache(entries: usize) -> HashMap<usize, Vec<u8>> {
    (0..entries).map(|i| (i, vec![0u8; 256])).collect()
}

#[inline(never)]
fn transient_strings(round: usize) -> String {
    (0..32).map(|i| format!("{round}-{i};")).collect()
}
