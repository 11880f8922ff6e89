// SPDX-License-Identifier: GPL-3.0-only

//! In-memory collaborators for reconciler tests

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use storage_contracts::{
    CommandOutput, CommandRunner, EventPublisher, MountTable, SourceControl, StorageError,
    StorageErrorKind,
};
use storage_sys::FstabStore;
use storage_types::{FilterDecision, MountRecord};
use tempfile::TempDir;

use crate::merge::MergeReconciler;
use crate::mount::MountReconciler;
use crate::registry::MergeRegistry;

#[derive(Default)]
pub struct FakeMountTable {
    records: Mutex<Vec<MountRecord>>,
    next_id: AtomicU32,
}

impl FakeMountTable {
    pub fn insert(&self, mount_point: &str, source: &str, fstype: &str) -> MountRecord {
        let record = MountRecord {
            id: 100 + self.next_id.fetch_add(1, Ordering::SeqCst),
            parent_id: 1,
            mount_point: mount_point.to_string(),
            source: source.to_string(),
            fstype: fstype.to_string(),
            options: "rw,relatime".to_string(),
            super_options: "rw".to_string(),
            extended: BTreeMap::new(),
        };
        self.records.lock().unwrap().push(record.clone());
        record
    }

    /// Drop the topmost record at `mount_point`.
    pub fn remove(&self, mount_point: &str) -> bool {
        let mut records = self.records.lock().unwrap();
        match records.iter().rposition(|r| r.mount_point == mount_point) {
            Some(index) => {
                records.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn mounted(&self, mount_point: &str) -> bool {
        self.records
            .lock()
            .unwrap()
            .iter()
            .any(|r| r.mount_point == mount_point)
    }
}

impl MountTable for FakeMountTable {
    fn get_mounts(
        &self,
        filter: &dyn Fn(&MountRecord) -> FilterDecision,
    ) -> Result<Vec<MountRecord>, StorageError> {
        let mut out = Vec::new();
        for record in self.records.lock().unwrap().iter() {
            let decision = filter(record);
            if !decision.skip {
                out.push(record.clone());
            }
            if decision.stop {
                break;
            }
        }
        Ok(out)
    }
}

/// Command runner that applies `mount`/`umount` to a [`FakeMountTable`].
pub struct FakeRunner {
    table: Arc<FakeMountTable>,
    calls: Mutex<Vec<(String, Vec<String>)>>,
    failing_mounts: Mutex<HashSet<String>>,
    lsblk_json: Mutex<String>,
}

impl FakeRunner {
    pub fn new(table: Arc<FakeMountTable>) -> Self {
        Self {
            table,
            calls: Mutex::new(Vec::new()),
            failing_mounts: Mutex::new(HashSet::new()),
            lsblk_json: Mutex::new(r#"{"blockdevices":[]}"#.to_string()),
        }
    }

    pub fn fail_mount_at(&self, mount_point: &str) {
        self.failing_mounts
            .lock()
            .unwrap()
            .insert(mount_point.to_string());
    }

    pub fn set_lsblk(&self, json: &str) {
        *self.lsblk_json.lock().unwrap() = json.to_string();
    }

    pub fn calls(&self, program: &str) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == program)
            .map(|(_, args)| args.clone())
            .collect()
    }
}

fn success(stdout: String) -> CommandOutput {
    CommandOutput {
        code: Some(0),
        stdout,
        stderr: String::new(),
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, StorageError> {
        self.calls
            .lock()
            .unwrap()
            .push((program.to_string(), args.to_vec()));

        match program {
            "mount" => {
                let mut fstype = String::new();
                let mut positional = Vec::new();
                let mut iter = args.iter();
                while let Some(arg) = iter.next() {
                    match arg.as_str() {
                        "-t" => fstype = iter.next().cloned().unwrap_or_default(),
                        "-o" => {
                            iter.next();
                        }
                        _ => positional.push(arg.clone()),
                    }
                }
                let [source, mount_point] = positional.as_slice() else {
                    return Err(StorageError::new(
                        StorageErrorKind::InvalidInput,
                        format!("unexpected mount arguments {args:?}"),
                    ));
                };
                if self.failing_mounts.lock().unwrap().contains(mount_point) {
                    return Ok(CommandOutput {
                        code: Some(32),
                        stdout: String::new(),
                        stderr: format!("mount: {mount_point}: wrong fs type"),
                    });
                }
                self.table.insert(mount_point, source, &fstype);
                Ok(success(String::new()))
            }
            "umount" => {
                let Some(mount_point) = args.last() else {
                    return Err(StorageError::new(StorageErrorKind::InvalidInput, "umount without target"));
                };
                if self.table.remove(mount_point) {
                    Ok(success(String::new()))
                } else {
                    Ok(CommandOutput {
                        code: Some(32),
                        stdout: String::new(),
                        stderr: format!("umount: {mount_point}: not mounted"),
                    })
                }
            }
            "lsblk" => Ok(success(self.lsblk_json.lock().unwrap().clone())),
            other => Err(StorageError::tool_failure(other, "unknown program")),
        }
    }
}

#[derive(Default)]
pub struct FakeSourceControl {
    sources: Mutex<HashMap<String, Vec<String>>>,
    ops: Mutex<Vec<String>>,
}

impl FakeSourceControl {
    pub fn seed(&self, mount_point: &str, sources: &[&str]) {
        self.sources.lock().unwrap().insert(
            mount_point.to_string(),
            sources.iter().map(|s| s.to_string()).collect(),
        );
    }

    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }
}

impl SourceControl for FakeSourceControl {
    fn list_all(&self, mount_point: &str) -> Result<BTreeMap<String, String>, StorageError> {
        let sources = self.get_sources(mount_point)?;
        Ok(BTreeMap::from([(
            "user.mergerfs.srcmounts".to_string(),
            sources.join(":"),
        )]))
    }

    fn get_sources(&self, mount_point: &str) -> Result<Vec<String>, StorageError> {
        self.sources
            .lock()
            .unwrap()
            .get(mount_point)
            .cloned()
            .ok_or_else(|| StorageError::new(StorageErrorKind::NotFound, mount_point))
    }

    fn set_sources(&self, mount_point: &str, sources: &[String]) -> Result<(), StorageError> {
        self.ops.lock().unwrap().push(format!("={}", sources.join(":")));
        self.sources
            .lock()
            .unwrap()
            .insert(mount_point.to_string(), sources.to_vec());
        Ok(())
    }

    fn add_source(&self, mount_point: &str, source: &str) -> Result<(), StorageError> {
        self.ops.lock().unwrap().push(format!("+{source}"));
        self.sources
            .lock()
            .unwrap()
            .entry(mount_point.to_string())
            .or_default()
            .push(source.to_string());
        Ok(())
    }

    fn remove_source(&self, mount_point: &str, source: &str) -> Result<(), StorageError> {
        self.ops.lock().unwrap().push(format!("-{source}"));
        if let Some(list) = self.sources.lock().unwrap().get_mut(mount_point) {
            list.retain(|s| s != source);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<(String, BTreeMap<String, String>)>>,
    pub fail: bool,
}

impl RecordingPublisher {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, name: &str, properties: &BTreeMap<String, String>) -> Result<(), StorageError> {
        self.events
            .lock()
            .unwrap()
            .push((name.to_string(), properties.clone()));
        if self.fail {
            return Err(StorageError::internal("bus unavailable"));
        }
        Ok(())
    }
}

pub const MERGE_OPTIONS: &str = "category.create=mfs,allow_other";

/// Reconcilers wired to fakes inside a scratch directory.
pub struct Harness {
    pub dir: TempDir,
    pub table: Arc<FakeMountTable>,
    pub runner: Arc<FakeRunner>,
    pub sources: Arc<FakeSourceControl>,
    pub events: Arc<RecordingPublisher>,
    pub registry: Arc<MergeRegistry>,
    pub fstab: FstabStore,
    pub mounts: Arc<MountReconciler>,
    pub merges: MergeReconciler,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_publisher(RecordingPublisher::default())
    }

    pub fn with_publisher(publisher: RecordingPublisher) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let table = Arc::new(FakeMountTable::default());
        let runner = Arc::new(FakeRunner::new(table.clone()));
        let sources = Arc::new(FakeSourceControl::default());
        let events = Arc::new(publisher);
        let registry = Arc::new(MergeRegistry::in_memory());
        let fstab_path = dir.path().join("fstab");
        fs::write(&fstab_path, "UUID=3f2a / ext4 errors=remount-ro 0 1\n").unwrap();
        let fstab = FstabStore::new(&fstab_path);

        let mounts = Arc::new(MountReconciler::new(
            table.clone(),
            runner.clone(),
            FstabStore::new(&fstab_path),
            registry.clone(),
            events.clone(),
        ));
        let merges = MergeReconciler::new(
            mounts.clone(),
            table.clone(),
            sources.clone(),
            registry.clone(),
            events.clone(),
            MERGE_OPTIONS,
        );

        Self {
            dir,
            table,
            runner,
            sources,
            events,
            registry,
            fstab,
            mounts,
            merges,
        }
    }

    /// Absolute path below the scratch directory, without creating it.
    pub fn path(&self, relative: &str) -> String {
        self.dir.path().join(relative).to_string_lossy().into_owned()
    }

    /// Absolute path below the scratch directory, created as a directory.
    pub fn mkdir(&self, relative: &str) -> String {
        let path = self.dir.path().join(relative);
        fs::create_dir_all(&path).unwrap();
        path.to_string_lossy().into_owned()
    }
}

pub fn touch(dir: &str, name: &str) {
    fs::write(Path::new(dir).join(name), b"data").unwrap();
}
