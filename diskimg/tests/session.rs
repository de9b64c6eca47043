mod common;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};

use common::assertions::{assert_no_mounts, mount_attempts, unmount_order};
use common::fixtures::{FakeTools, Failures};
use diskimg::{MountSession, run_command, with_session};
use diskimg_contracts::{SessionError, ToolAdapter};
use diskimg_types::SessionState;

fn partitions(numbers: &[u32]) -> BTreeSet<u32> {
    numbers.iter().copied().collect()
}

fn argv(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[test]
fn operation_sees_every_mount_and_teardown_is_reversed() {
    let work = tempfile::tempdir().unwrap();
    let tools = FakeTools::new(work.path());

    let outcome = with_session(&tools, Path::new("disk.img"), &partitions(&[3, 1, 2]), |mounts| {
        mounts.keys().copied().collect::<Vec<_>>()
    })
    .unwrap();

    assert_eq!(outcome.result, vec![1, 2, 3]);
    assert!(outcome.teardown.is_empty());
    assert_eq!(mount_attempts(&tools), vec![1, 2, 3]);
    assert_eq!(unmount_order(&tools), vec![3, 2, 1]);
    assert_no_mounts(&tools);
}

#[test]
fn failed_mount_releases_earlier_ones_and_names_the_rest() {
    let work = tempfile::tempdir().unwrap();
    let tools = FakeTools::failing(
        work.path(),
        Failures {
            mount: Some(2),
            ..Failures::default()
        },
    );
    let mut ran = false;

    let error = with_session(&tools, Path::new("disk.img"), &partitions(&[1, 2, 3]), |_| {
        ran = true;
    })
    .unwrap_err();

    match &error {
        SessionError::PartialMount {
            released,
            failed,
            not_attempted,
            cleanup,
            ..
        } => {
            assert_eq!(released, &vec![1]);
            assert_eq!(*failed, 2);
            assert_eq!(not_attempted, &vec![3]);
            assert!(cleanup.is_empty());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!ran);
    assert_eq!(error.kind().exit_code(), 75);
    assert_eq!(unmount_order(&tools), vec![1]);
    assert_no_mounts(&tools);
}

#[test]
fn two_partition_session_with_second_failing() {
    let work = tempfile::tempdir().unwrap();
    let tools = FakeTools::failing(
        work.path(),
        Failures {
            mount: Some(2),
            ..Failures::default()
        },
    );

    let error = with_session(&tools, Path::new("disk.img"), &partitions(&[1, 2]), |_| ()).unwrap_err();
    let message = error.to_string();
    assert!(message.contains("mounting partition 2"));
    assert!(message.contains("mounted and released: 1"));
    assert!(message.contains("not attempted: none"));
    assert_no_mounts(&tools);
}

#[test]
fn teardown_failure_does_not_replace_the_result() {
    let work = tempfile::tempdir().unwrap();
    let tools = FakeTools::failing(
        work.path(),
        Failures {
            unmount: [2].into(),
            ..Failures::default()
        },
    );

    let outcome = with_session(&tools, Path::new("disk.img"), &partitions(&[1, 2, 3]), |_| 7).unwrap();
    assert_eq!(unmount_order(&tools), vec![3, 2, 1]);

    let (result, teardown) = outcome.split();
    assert_eq!(result, 7);
    match teardown {
        Some(SessionError::TeardownFailure { failures, .. }) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].partition, Some(2));
        }
        other => panic!("expected a teardown failure, got {other:?}"),
    }
}

#[test]
fn panicking_operation_still_unmounts() {
    let work = tempfile::tempdir().unwrap();
    let tools = FakeTools::new(work.path());

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        with_session(&tools, Path::new("disk.img"), &partitions(&[1, 2]), |mounts| {
            assert!(mounts.is_empty(), "operation blew up with {} mounts", mounts.len());
        })
    }));

    assert!(outcome.is_err());
    assert_eq!(unmount_order(&tools), vec![2, 1]);
    assert_no_mounts(&tools);
}

#[test]
fn session_states_follow_the_lifecycle() {
    let work = tempfile::tempdir().unwrap();
    let tools = FakeTools::new(work.path());
    let requested = partitions(&[1]);

    let mut session = MountSession::new(&tools, Path::new("disk.img"), &requested);
    assert_eq!(session.state(), SessionState::Unmounted);
    session.mount_all().unwrap();
    assert_eq!(session.state(), SessionState::Mounted);
    assert_eq!(session.mount_points()[&1], tools.mount_point(1));
    assert!(session.teardown().is_empty());
    assert_eq!(session.state(), SessionState::Unmounted);
    assert!(session.teardown().is_empty());
    assert_eq!(unmount_order(&tools), vec![1]);
}

#[test]
fn dropping_a_mounted_session_unmounts() {
    let work = tempfile::tempdir().unwrap();
    let tools = FakeTools::new(work.path());
    {
        let mut session = MountSession::new(&tools, Path::new("disk.img"), &partitions(&[1, 2]));
        session.mount_all().unwrap();
        assert_eq!(tools.active_mounts().len(), 2);
    }
    assert_no_mounts(&tools);
}

#[test]
fn command_runs_in_mount_root_with_partition_variables() {
    let work = tempfile::tempdir().unwrap();
    let p1 = work.path().join("p1");
    fs::create_dir_all(&p1).unwrap();
    let mounts: BTreeMap<u32, PathBuf> = [(1, p1.clone())].into();

    let code = run_command(
        &argv(&["sh", "-c", "pwd > cwd.txt; printf %s \"$DISKIMG_P1\" > p1.txt"]),
        work.path(),
        &mounts,
    )
    .unwrap();

    assert_eq!(code, 0);
    let cwd = fs::read_to_string(work.path().join("cwd.txt")).unwrap();
    assert_eq!(
        fs::canonicalize(cwd.trim()).unwrap(),
        fs::canonicalize(work.path()).unwrap()
    );
    assert_eq!(fs::read_to_string(work.path().join("p1.txt")).unwrap(), p1.to_string_lossy());
}

#[test]
fn command_exit_code_is_passed_through() {
    let work = tempfile::tempdir().unwrap();
    let code = run_command(&argv(&["sh", "-c", "exit 9"]), work.path(), &BTreeMap::new()).unwrap();
    assert_eq!(code, 9);

    let code = run_command(&argv(&["sh", "-c", "kill -TERM $$"]), work.path(), &BTreeMap::new()).unwrap();
    assert_eq!(code, 128 + 15);
}

#[test]
fn missing_command_is_a_spawn_error() {
    let work = tempfile::tempdir().unwrap();
    let error = run_command(&argv(&["diskimg-no-such-command"]), work.path(), &BTreeMap::new()).unwrap_err();
    assert_eq!(error.kind(), std::io::ErrorKind::NotFound);
}
