use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use diskimg::{PlanOptions, SpecEntry, parse_set, plan};
use diskimg_contracts::{ToolAdapter, ToolError};
use diskimg_types::{
    ContentSource, FilesystemType, LayoutPlan, MountMechanism, ResolvedPartition, TableType,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(u64),
    Partition(TableType, usize),
    Format(u32, String),
    Mount(u32),
    Populate(u32),
    Unmount(u32),
}

/// Which steps fail, by partition number where that applies
#[derive(Debug, Default)]
pub struct Failures {
    pub create: bool,
    pub partition: bool,
    pub format: Option<u32>,
    pub mount: Option<u32>,
    pub populate: Option<u32>,
    pub unmount: BTreeSet<u32>,
}

/// In-memory adapter that records calls and mounts onto plain directories
pub struct FakeTools {
    root: PathBuf,
    failures: Failures,
    unsupported: Vec<String>,
    calls: Mutex<Vec<Call>>,
    mounted: Mutex<BTreeMap<PathBuf, u32>>,
}

pub fn failure(tool: &str, stderr: &str) -> ToolError {
    ToolError::Failed {
        tool: tool.to_string(),
        command: format!("{tool} (fake)"),
        status: "exit status: 32".to_string(),
        stderr: stderr.to_string(),
    }
}

impl FakeTools {
    pub fn new(root: &Path) -> Self {
        Self::failing(root, Failures::default())
    }

    pub fn failing(root: &Path, failures: Failures) -> Self {
        Self {
            root: root.to_path_buf(),
            failures,
            unsupported: Vec::new(),
            calls: Mutex::new(Vec::new()),
            mounted: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn without_filesystem(mut self, filesystem: &str) -> Self {
        self.unsupported.push(filesystem.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn mount_point(&self, partition: u32) -> PathBuf {
        self.root.join(format!("p{partition}"))
    }

    fn partition_at(&self, mount_point: &Path) -> Option<u32> {
        self.mounted.lock().unwrap().get(mount_point).copied()
    }
}

impl ToolAdapter for FakeTools {
    fn create_image(&self, path: &Path, size_bytes: u64) -> Result<(), ToolError> {
        self.record(Call::Create(size_bytes));
        if self.failures.create {
            return Err(failure("dd", "No space left on device"));
        }
        File::create(path)
            .and_then(|file| file.set_len(size_bytes))
            .map_err(|error| ToolError::io("creating fake image", error))
    }

    fn write_partition_table(
        &self,
        _path: &Path,
        table_type: TableType,
        partitions: &[ResolvedPartition],
    ) -> Result<(), ToolError> {
        self.record(Call::Partition(table_type, partitions.len()));
        if self.failures.partition {
            return Err(failure("parted", "Error: Can't have overlapping partitions."));
        }
        Ok(())
    }

    fn format_partition(
        &self,
        _path: &Path,
        partition: u32,
        filesystem: &FilesystemType,
    ) -> Result<(), ToolError> {
        self.record(Call::Format(partition, filesystem.to_string()));
        if self.failures.format == Some(partition) {
            return Err(failure("mkfs", "invalid argument"));
        }
        Ok(())
    }

    fn mount(&self, _path: &Path, partition: u32) -> Result<PathBuf, ToolError> {
        self.record(Call::Mount(partition));
        if self.failures.mount == Some(partition) {
            return Err(failure("mount", "wrong fs type, bad option, bad superblock"));
        }
        let mount_point = self.mount_point(partition);
        fs::create_dir_all(&mount_point).map_err(|error| ToolError::io("creating mount point", error))?;
        self.mounted.lock().unwrap().insert(mount_point.clone(), partition);
        Ok(mount_point)
    }

    fn unmount(&self, mount_point: &Path) -> Result<(), ToolError> {
        let Some(partition) = self.partition_at(mount_point) else {
            return Ok(());
        };
        self.record(Call::Unmount(partition));
        if self.failures.unmount.contains(&partition) {
            return Err(failure("umount", "target is busy"));
        }
        self.mounted.lock().unwrap().remove(mount_point);
        Ok(())
    }

    fn populate(&self, _content: &ContentSource, mount_point: &Path) -> Result<(), ToolError> {
        let partition = self.partition_at(mount_point).unwrap_or_default();
        self.record(Call::Populate(partition));
        if self.failures.populate == Some(partition) {
            return Err(failure("cp", "No space left on device"));
        }
        fs::write(mount_point.join("populated"), b"ok").map_err(|error| ToolError::io("populating", error))
    }

    fn supports_filesystem(&self, filesystem: &FilesystemType) -> bool {
        !self.unsupported.iter().any(|name| name == filesystem.as_str())
    }

    fn mechanism(&self) -> Result<MountMechanism, ToolError> {
        Ok(MountMechanism::LoopDevice)
    }

    fn active_mounts(&self) -> Vec<PathBuf> {
        self.mounted.lock().unwrap().keys().cloned().collect()
    }
}

/// Layout for `(identifier, content)` pairs, parsed and planned the way the
/// creator does it
pub fn layout(entries: &[(&str, Option<&Path>)], options: PlanOptions) -> LayoutPlan {
    let entries: Vec<SpecEntry> = entries
        .iter()
        .map(|(identifier, content)| SpecEntry::new(*identifier, content.map(Path::to_path_buf)))
        .collect();
    let specs = parse_set(&entries).expect("specs should parse");
    plan(&specs, options).expect("layout should plan")
}
