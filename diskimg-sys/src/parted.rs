// SPDX-License-Identifier: GPL-3.0-only

//! `parted --script` generation.

use std::path::Path;

use diskimg_types::{ResolvedPartition, SECTOR_SIZE, TableType};

use crate::mkfs;

const LABEL_COMMANDS: [&str; 2] = ["mklabel", "mktable"];

fn sector(byte: u64) -> u64 {
    byte / SECTOR_SIZE
}

fn declares_label(partitions: &[ResolvedPartition]) -> bool {
    partitions.iter().any(|partition| {
        partition
            .parted_args
            .iter()
            .any(|arg| LABEL_COMMANDS.contains(&arg.as_str()))
    })
}

fn boot_flag(partition: &ResolvedPartition) -> [String; 4] {
    [
        "set".to_string(),
        partition.number().to_string(),
        "boot".to_string(),
        "on".to_string(),
    ]
}

fn sets_boot_flag(args: &[String]) -> bool {
    args.windows(3)
        .any(|window| window[0] == "set" && window[2] == "boot")
}

fn short_form_commands(partition: &ResolvedPartition) -> Vec<String> {
    let mut script = vec!["mkpart".to_string(), "primary".to_string()];
    if let Some(name) = mkfs::lookup(&partition.filesystem).and_then(|tool| tool.parted_name) {
        script.push(name.to_string());
    }
    script.push(format!("{}s", sector(partition.start_byte)));
    if partition.extends_to_end {
        script.push("100%".to_string());
    } else {
        // parted end sectors are inclusive
        script.push(format!("{}s", sector(partition.end_byte) - 1));
    }
    if partition.bootable {
        script.extend(boot_flag(partition));
    }
    script
}

/// Every partition of the table as one parted command sequence.
/// Long-form partitions contribute their tokens unchanged, followed by the
/// boot flag when the partition is bootable and its tokens do not set one.
pub fn script(table_type: TableType, partitions: &[ResolvedPartition]) -> Vec<String> {
    let mut script = Vec::new();
    if !declares_label(partitions) {
        script.push("mklabel".to_string());
        script.push(table_type.as_str().to_string());
    }
    for partition in partitions {
        if partition.is_long_form() {
            script.extend(partition.parted_args.iter().cloned());
            if partition.bootable && !sets_boot_flag(&partition.parted_args) {
                script.extend(boot_flag(partition));
            }
        } else {
            script.extend(short_form_commands(partition));
        }
    }
    script
}

/// Full argument list for `parted`
pub fn arguments(image: &Path, table_type: TableType, partitions: &[ResolvedPartition]) -> Vec<String> {
    let mut args = vec![
        "--script".to_string(),
        image.display().to_string(),
        "--".to_string(),
    ];
    args.extend(script(table_type, partitions));
    args.push("print".to_string());
    args
}
