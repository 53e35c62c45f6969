//! Session start/stop against real directories
//!
//! The active flag is process-wide, so every test takes `SERIAL` first.

use pprof::protos::{Message, Profile};
use profguard::contention;
use profguard::{Builder, ProfileFlags, ProfileOption};
use std::fs;
use std::hint::black_box;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

static SERIAL: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(PoisonError::into_inner)
}

fn quiet_in(dir: &Path) -> Vec<ProfileOption> {
    vec![
        ProfileOption::Quiet,
        ProfileOption::NoShutdownHook,
        ProfileOption::ProfilePath(dir.to_path_buf()),
    ]
}

#[inline(never)]
fn burn(budget: Duration) -> u64 {
    let start = Instant::now();
    let mut acc = 1u64;
    while start.elapsed() < budget {
        for i in 0..1_000u64 {
            acc = black_box(acc.wrapping_mul(31).wrapping_add(i));
        }
    }
    acc
}

#[test]
fn test_session_without_mode_writes_nothing() {
    let _serial = serial();
    let tmp = tempfile::tempdir().unwrap();

    let session = profguard::start(quiet_in(tmp.path()));
    session.stop().expect("stop failed");

    assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);

    // The active flag was released, so a new session may start
    let again = profguard::start(quiet_in(tmp.path()));
    again.stop().expect("second stop failed");
}

#[test]
fn test_cpu_session_writes_profile_into_new_dir() {
    let _serial = serial();
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path().join("prof1");
    assert!(!out.exists());

    let mut options = quiet_in(&out);
    options.push(ProfileOption::CpuProfile);
    let session = profguard::start(options);
    assert!(out.is_dir(), "output dir is created at start");

    black_box(burn(Duration::from_millis(200)));
    session.stop().expect("stop failed");

    let bytes = fs::read(out.join("cpu.pprof")).expect("cpu.pprof missing");
    assert!(!bytes.is_empty());
    let profile = Profile::decode(bytes.as_slice()).expect("cpu.pprof is not a profile");
    assert!(!profile.sample_type.is_empty());
}

#[test]
fn test_block_session_enables_then_disables_recording() {
    let _serial = serial();
    let tmp = tempfile::tempdir().unwrap();

    let mut options = quiet_in(tmp.path());
    options.push(ProfileOption::BlockProfile);
    let session = profguard::start(options);
    assert_eq!(contention::profile_rate(), 1);

    contention::record(Duration::from_micros(250));
    session.stop().expect("stop failed");
    assert_eq!(contention::profile_rate(), 0);

    let bytes = fs::read(tmp.path().join("block.pprof")).unwrap();
    let profile = Profile::decode(bytes.as_slice()).unwrap();
    assert!(!profile.sample.is_empty());
    let string = |id: i64| profile.string_table[usize::try_from(id).unwrap()].as_str();
    assert_eq!(string(profile.sample_type[0].ty), "contentions");
    assert_eq!(string(profile.sample_type[1].ty), "delay");
}

#[test]
fn test_flags_override_options() {
    let _serial = serial();
    let option_dir = tempfile::tempdir().unwrap();
    let flag_dir = tempfile::tempdir().unwrap();

    let flags = ProfileFlags {
        block: true,
        output_dir: Some(flag_dir.path().to_path_buf()),
        ..ProfileFlags::default()
    };
    let session = Builder::new()
        .options(quiet_in(option_dir.path()))
        .option(ProfileOption::MemProfile)
        .flags(flags)
        .start();
    session.stop().expect("stop failed");

    assert!(flag_dir.path().join("block.pprof").is_file());
    assert!(!flag_dir.path().join("mem.pprof").exists());
    assert_eq!(fs::read_dir(option_dir.path()).unwrap().count(), 0);
}

#[test]
fn test_temp_dir_is_allocated_when_no_path_given() {
    let _serial = serial();
    let before: Vec<_> = temp_profile_dirs();

    let session = profguard::start([ProfileOption::Quiet, ProfileOption::NoShutdownHook]);
    session.stop().expect("stop failed");

    let created: Vec<_> =
        temp_profile_dirs().into_iter().filter(|d| !before.contains(d)).collect();
    assert!(!created.is_empty(), "expected a new profile* dir under the temp dir");
    for dir in created {
        let _ = fs::remove_dir(dir);
    }
}

fn temp_profile_dirs() -> Vec<std::path::PathBuf> {
    fs::read_dir(std::env::temp_dir())
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| e.file_name().to_string_lossy().starts_with("profile"))
                .map(|e| e.path())
                .collect()
        })
        .unwrap_or_default()
}
