mod common;

use std::fs;
use std::path::{Path, PathBuf};

use common::assertions::{assert_no_mounts, unmount_order};
use common::fixtures::{Call, FakeTools, Failures, layout};
use diskimg::{BuildOptions, PlanOptions, build};
use diskimg_contracts::{BuildError, PopulationStage, ToolError};
use diskimg_types::{MIB, TableType};

fn content_dir(root: &Path, name: &str) -> PathBuf {
    let dir = root.join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("file.txt"), b"payload").unwrap();
    dir
}

#[test]
fn builds_and_populates_in_partition_order() {
    let work = tempfile::tempdir().unwrap();
    let boot = content_dir(work.path(), "boot");
    let plan = layout(
        &[
            ("partition01_8MiB_fat32", Some(boot.as_path())),
            ("partition02_64MiB_ext4", None),
        ],
        PlanOptions::default(),
    );
    let tools = FakeTools::new(&work.path().join("mnt"));
    let image = work.path().join("disk.img");

    let report = build(&tools, &plan, &image, BuildOptions::default()).unwrap();

    assert_eq!(
        tools.calls(),
        vec![
            Call::Create(64 * MIB),
            Call::Partition(TableType::Gpt, 2),
            Call::Format(1, "fat32".to_string()),
            Call::Mount(1),
            Call::Populate(1),
            Call::Unmount(1),
            Call::Format(2, "ext4".to_string()),
        ]
    );
    assert_eq!(fs::metadata(&image).unwrap().len(), 64 * MIB);
    assert_eq!(report.partitions.len(), 2);
    assert!(report.partitions[0].populated.is_some());
    assert!(report.partitions[1].populated.is_none());
    assert_eq!(report.partitions[1].start_byte, 8 * MIB);
    assert!(report.to_string().contains("p2"));
    assert_no_mounts(&tools);
}

#[test]
fn copy_failure_unmounts_and_reports_partial_image() {
    let work = tempfile::tempdir().unwrap();
    let boot = content_dir(work.path(), "boot");
    let plan = layout(&[("partition01_16MiB_ext4", Some(boot.as_path()))], PlanOptions::default());
    let tools = FakeTools::failing(
        &work.path().join("mnt"),
        Failures {
            populate: Some(1),
            ..Failures::default()
        },
    );
    let image = work.path().join("disk.img");

    let error = build(&tools, &plan, &image, BuildOptions::default()).unwrap_err();

    match &error {
        BuildError::Population {
            partition,
            stage,
            cleanup,
            ..
        } => {
            assert_eq!(*partition, 1);
            assert_eq!(*stage, PopulationStage::Copy);
            assert!(cleanup.is_empty());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(error.partial_image(), Some(image.as_path()));
    assert!(error.to_string().contains("image left incomplete"));
    assert_eq!(unmount_order(&tools), vec![1]);
    assert_no_mounts(&tools);
}

#[test]
fn failed_cleanup_is_reported_with_the_copy_failure() {
    let work = tempfile::tempdir().unwrap();
    let boot = content_dir(work.path(), "boot");
    let plan = layout(&[("partition01_16MiB_ext4", Some(boot.as_path()))], PlanOptions::default());
    let tools = FakeTools::failing(
        &work.path().join("mnt"),
        Failures {
            populate: Some(1),
            unmount: [1].into(),
            ..Failures::default()
        },
    );

    let error = build(&tools, &plan, &work.path().join("disk.img"), BuildOptions::default()).unwrap_err();
    let BuildError::Population { cleanup, stage, .. } = &error else {
        panic!("unexpected error: {error}");
    };
    assert_eq!(*stage, PopulationStage::Copy);
    assert_eq!(cleanup.len(), 1);
    assert_eq!(cleanup[0].partition, Some(1));
    assert!(error.to_string().contains("cleanup also failed"));
}

#[test]
fn unmount_failure_after_copy_is_its_own_stage() {
    let work = tempfile::tempdir().unwrap();
    let boot = content_dir(work.path(), "boot");
    let plan = layout(&[("partition01_16MiB_ext4", Some(boot.as_path()))], PlanOptions::default());
    let tools = FakeTools::failing(
        &work.path().join("mnt"),
        Failures {
            unmount: [1].into(),
            ..Failures::default()
        },
    );

    let error = build(&tools, &plan, &work.path().join("disk.img"), BuildOptions::default()).unwrap_err();
    assert!(matches!(
        error,
        BuildError::Population {
            stage: PopulationStage::Unmount,
            partition: 1,
            ..
        }
    ));
}

#[test]
fn later_partition_failures_leave_no_mounts() {
    let work = tempfile::tempdir().unwrap();
    let boot = content_dir(work.path(), "boot");
    let root = content_dir(work.path(), "root");
    let plan = layout(
        &[
            ("partition01_8MiB_fat32", Some(boot.as_path())),
            ("partition02_64MiB_ext4", Some(root.as_path())),
        ],
        PlanOptions::default(),
    );
    let tools = FakeTools::failing(
        &work.path().join("mnt"),
        Failures {
            mount: Some(2),
            ..Failures::default()
        },
    );

    let error = build(&tools, &plan, &work.path().join("disk.img"), BuildOptions::default()).unwrap_err();
    assert!(matches!(
        error,
        BuildError::Population {
            stage: PopulationStage::Mount,
            partition: 2,
            ..
        }
    ));
    assert_no_mounts(&tools);
}

#[test]
fn format_failure_names_the_partition() {
    let work = tempfile::tempdir().unwrap();
    let plan = layout(
        &[
            ("partition01_8MiB_fat32", None),
            ("partition02_64MiB_xfs", None),
        ],
        PlanOptions::default(),
    );
    let tools = FakeTools::failing(
        &work.path().join("mnt"),
        Failures {
            format: Some(2),
            ..Failures::default()
        },
    );

    let error = build(&tools, &plan, &work.path().join("disk.img"), BuildOptions::default()).unwrap_err();
    assert!(matches!(
        error,
        BuildError::Population {
            stage: PopulationStage::Format,
            partition: 2,
            ..
        }
    ));
    assert_eq!(error.kind().exit_code(), 72);
}

#[test]
fn partitioning_failure_keeps_the_image() {
    let work = tempfile::tempdir().unwrap();
    let plan = layout(&[("partition01_16MiB_ext4", None)], PlanOptions::default());
    let tools = FakeTools::failing(
        &work.path().join("mnt"),
        Failures {
            partition: true,
            ..Failures::default()
        },
    );
    let image = work.path().join("disk.img");

    let error = build(&tools, &plan, &image, BuildOptions::default()).unwrap_err();
    assert!(matches!(error, BuildError::Partitioning { .. }));
    assert!(image.exists());
    assert!(error.to_string().contains("overlapping"));
}

#[test]
fn allocation_failure_before_any_file_is_not_partial() {
    let work = tempfile::tempdir().unwrap();
    let plan = layout(&[("partition01_16MiB_ext4", None)], PlanOptions::default());
    let tools = FakeTools::failing(
        &work.path().join("mnt"),
        Failures {
            create: true,
            ..Failures::default()
        },
    );

    let error = build(&tools, &plan, &work.path().join("disk.img"), BuildOptions::default()).unwrap_err();
    assert!(matches!(error, BuildError::Allocation { partial: false, .. }));
    assert_eq!(error.partial_image(), None);
}

#[test]
fn unsupported_filesystem_is_refused_before_allocation() {
    let work = tempfile::tempdir().unwrap();
    let plan = layout(
        &[
            ("partition01_8MiB_fat32", None),
            ("partition02_64MiB_jfs", None),
        ],
        PlanOptions::default(),
    );
    let tools = FakeTools::new(&work.path().join("mnt")).without_filesystem("jfs");
    let image = work.path().join("disk.img");

    let error = build(&tools, &plan, &image, BuildOptions::default()).unwrap_err();
    match error {
        BuildError::Allocation {
            partial: false,
            source: ToolError::UnsupportedFilesystem { filesystem },
            ..
        } => assert_eq!(filesystem, "jfs"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(tools.calls().is_empty());
    assert!(!image.exists());
}

#[test]
fn existing_image_needs_overwrite() {
    let work = tempfile::tempdir().unwrap();
    let plan = layout(&[("partition01_16MiB_ext4", None)], PlanOptions::default());
    let tools = FakeTools::new(&work.path().join("mnt"));
    let image = work.path().join("disk.img");
    fs::write(&image, b"keep me").unwrap();

    let error = build(&tools, &plan, &image, BuildOptions::default()).unwrap_err();
    assert!(matches!(error, BuildError::Allocation { partial: false, .. }));
    assert!(error.to_string().contains("--force"));
    assert_eq!(fs::read(&image).unwrap(), b"keep me");

    build(&tools, &plan, &image, BuildOptions { overwrite: true }).unwrap();
    assert_eq!(fs::metadata(&image).unwrap().len(), 16 * MIB);
}

#[test]
fn content_for_swap_is_skipped() {
    let work = tempfile::tempdir().unwrap();
    let data = content_dir(work.path(), "data");
    let plan = layout(
        &[
            ("partition01_8MiB_fat32", None),
            ("partition02_32MiB_swap", Some(data.as_path())),
        ],
        PlanOptions::default(),
    );
    let tools = FakeTools::new(&work.path().join("mnt"));

    let report = build(&tools, &plan, &work.path().join("disk.img"), BuildOptions::default()).unwrap();
    assert!(!tools.calls().iter().any(|call| matches!(call, Call::Mount(_))));
    assert!(report.partitions[1].populated.is_none());
    assert_eq!(report.partitions[1].filesystem.as_str(), "linux-swap");
}
