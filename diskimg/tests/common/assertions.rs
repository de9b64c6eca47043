use diskimg_contracts::ToolAdapter;

use super::fixtures::{Call, FakeTools};

pub fn assert_no_mounts(tools: &FakeTools) {
    let left = tools.active_mounts();
    assert!(left.is_empty(), "mounts left behind: {left:?}");
}

/// Partition numbers in the order they were unmounted
pub fn unmount_order(tools: &FakeTools) -> Vec<u32> {
    tools
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            Call::Unmount(partition) => Some(partition),
            _ => None,
        })
        .collect()
}

pub fn mount_attempts(tools: &FakeTools) -> Vec<u32> {
    tools
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            Call::Mount(partition) => Some(partition),
            _ => None,
        })
        .collect()
}
