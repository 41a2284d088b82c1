//! End-to-end pipeline tests over an in-memory transport.
//!
//! Exercises classify -> resolve -> plan -> execute -> base update without
//! a device, verifying the properties the pipeline guarantees: structural
//! convergence, idempotence, fake removals, and withheld base entries on
//! verification failure.

use async_trait::async_trait;
use mcsync::error::{Result, SyncError};
use mcsync::reconcile::plan::plan_operations;
use mcsync::reconcile::resolve::{resolve_conflicts, ConflictChoice, NoHistoryChoice, UserPrompt};
use mcsync::reconcile::{classify, partition_actions, Action, Conflict, FinalAction};
use mcsync::snapshot::{md5_hex, FsNode, StatEntry};
use mcsync::transfer::transpile::Transpiler;
use mcsync::transfer::{Executor, Transport};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Mutex;

// =============================================================================
// In-memory transport
// =============================================================================

#[derive(Default)]
struct Side {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
}

impl Side {
    fn insert_file(&mut self, path: &str, data: &[u8]) {
        self.files.insert(path.to_string(), data.to_vec());
        let mut current = path;
        while let Some((parent, _)) = current.rsplit_once('/') {
            self.dirs.insert(parent.to_string());
            current = parent;
        }
    }

    fn remove_tree(&mut self, path: &str) {
        let prefix = format!("{}/", path);
        self.files.retain(|p, _| p != path && !p.starts_with(&prefix));
        self.dirs.retain(|p| p != path && !p.starts_with(&prefix));
    }

    fn tree(&self) -> FsNode {
        let mut stats: Vec<StatEntry> = Vec::new();
        for dir in &self.dirs {
            stats.push(StatEntry::Dir {
                relative_path: dir.clone(),
            });
        }
        for (path, data) in &self.files {
            stats.push(StatEntry::File {
                relative_path: path.clone(),
                size: data.len() as u64,
                md5: md5_hex(data),
            });
        }
        mcsync::snapshot::to_structure(&stats)
    }

    fn stat(&self, path: &str) -> Option<FsNode> {
        if let Some(data) = self.files.get(path) {
            return Some(FsNode::File {
                size: data.len() as u64,
                md5: md5_hex(data),
            });
        }
        if self.dirs.contains(path) {
            return Some(FsNode::empty_dir());
        }
        None
    }
}

/// Both sides of the transfer plus a log of physical delete calls.
#[derive(Default)]
struct MemoryTransport {
    local: Mutex<Side>,
    remote: Mutex<Side>,
    remote_deletes: Mutex<Vec<String>>,
    /// Remote paths whose uploads get silently corrupted.
    corrupt_remote_writes: HashSet<String>,
}

fn not_found(path: &str) -> SyncError {
    SyncError::Io(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        path.to_string(),
    ))
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn read_local(&self, path: &str) -> Result<Vec<u8>> {
        self.local
            .lock()
            .unwrap()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| not_found(path))
    }
    async fn write_local(&self, path: &str, data: &[u8]) -> Result<()> {
        self.local.lock().unwrap().insert_file(path, data);
        Ok(())
    }
    async fn delete_local(&self, path: &str) -> Result<()> {
        self.local.lock().unwrap().remove_tree(path);
        Ok(())
    }
    async fn create_local_dir(&self, path: &str) -> Result<()> {
        self.local.lock().unwrap().dirs.insert(path.to_string());
        Ok(())
    }
    async fn stat_local(&self, path: &str) -> Result<Option<FsNode>> {
        Ok(self.local.lock().unwrap().stat(path))
    }

    async fn read_remote(&self, path: &str) -> Result<Vec<u8>> {
        self.remote
            .lock()
            .unwrap()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| not_found(path))
    }
    async fn write_remote(&self, path: &str, data: &[u8]) -> Result<()> {
        let mut stored = data.to_vec();
        if self.corrupt_remote_writes.contains(path) {
            stored.push(0xFF);
        }
        self.remote.lock().unwrap().insert_file(path, &stored);
        Ok(())
    }
    async fn delete_remote(&self, path: &str) -> Result<()> {
        self.remote_deletes.lock().unwrap().push(path.to_string());
        self.remote.lock().unwrap().remove_tree(path);
        Ok(())
    }
    async fn create_remote_dir(&self, path: &str) -> Result<()> {
        self.remote.lock().unwrap().dirs.insert(path.to_string());
        Ok(())
    }
    async fn stat_remote(&self, path: &str) -> Result<Option<FsNode>> {
        Ok(self.remote.lock().unwrap().stat(path))
    }
}

struct ScriptedPrompt(Vec<ConflictChoice>);

impl UserPrompt for ScriptedPrompt {
    fn resolve_conflict(&mut self, _conflict: &Conflict) -> Result<ConflictChoice> {
        Ok(self.0.remove(0))
    }
    fn no_sync_history(&mut self) -> Result<NoHistoryChoice> {
        Ok(NoHistoryChoice::InitialSync)
    }
    fn confirm_restart(&mut self, preset: Option<bool>) -> Result<bool> {
        Ok(preset.unwrap_or(false))
    }
}

/// Run one classify -> resolve -> plan -> execute round against the
/// transport, mutating `base` the way a session would.
async fn run_round(
    transport: &MemoryTransport,
    base: &mut FsNode,
    choices: Vec<ConflictChoice>,
) -> mcsync::transfer::TransferReport {
    let local = transport.local.lock().unwrap().tree();
    let remote = transport.remote.lock().unwrap().tree();

    let actions = classify(&local, &remote, base);
    let (mut finals, conflicts) = partition_actions(actions);
    let mut prompt = ScriptedPrompt(choices);
    finals.extend(resolve_conflicts(conflicts, &mut prompt).unwrap());

    for action in &finals {
        if let FinalAction::UpdateBase { path } = action {
            mcsync::reconcile::apply_update_base(base, &local, path);
        }
    }

    let ops = plan_operations(&finals, &local, &remote);
    Executor::new(transport, None, &local, &remote)
        .execute(&ops, base)
        .await
}

// =============================================================================
// Pipeline behavior
// =============================================================================

#[tokio::test]
async fn test_push_new_tree_converges_and_updates_base() {
    let transport = MemoryTransport::default();
    {
        let mut local = transport.local.lock().unwrap();
        local.insert_file("a.txt", b"0123456789");
        local.insert_file("d/x.txt", b"xx");
        local.insert_file("d/sub/y.txt", b"yy");
    }
    let mut base = FsNode::empty_dir();

    let report = run_round(&transport, &mut base, vec![]).await;
    assert!(report.is_clean());
    assert!(report.remote_changed);

    // remote now structurally equals local
    let local_tree = transport.local.lock().unwrap().tree();
    let remote_tree = transport.remote.lock().unwrap().tree();
    assert_eq!(local_tree, remote_tree);

    // base recorded the transferred file with its content hash
    assert_eq!(
        base.get_at_path("a.txt"),
        Some(&FsNode::File {
            size: 10,
            md5: md5_hex(b"0123456789"),
        })
    );
    assert!(base.get_at_path("d/sub/y.txt").is_some());
}

#[tokio::test]
async fn test_second_run_is_all_noop() {
    let transport = MemoryTransport::default();
    {
        let mut local = transport.local.lock().unwrap();
        local.insert_file("a.txt", b"content");
        local.insert_file("d/x.txt", b"x");
    }
    let mut base = FsNode::empty_dir();
    run_round(&transport, &mut base, vec![]).await;

    // no external changes in between
    let local = transport.local.lock().unwrap().tree();
    let remote = transport.remote.lock().unwrap().tree();
    let actions = classify(&local, &remote, &base);
    assert!(!actions.is_empty());
    for action in actions {
        assert!(
            matches!(action, Action::Final(FinalAction::Noop { .. })),
            "expected noop, got {:?}",
            action
        );
    }
}

#[tokio::test]
async fn test_local_edit_pushes_and_base_follows() {
    // base and remote at H0, local edited to H1
    let transport = MemoryTransport::default();
    transport.local.lock().unwrap().insert_file("b.txt", b"new");
    transport.remote.lock().unwrap().insert_file("b.txt", b"old");
    let mut base = transport.remote.lock().unwrap().tree();

    let report = run_round(&transport, &mut base, vec![]).await;
    assert!(report.is_clean());

    assert_eq!(
        transport.remote.lock().unwrap().files.get("b.txt").unwrap(),
        b"new"
    );
    assert_eq!(
        base.get_at_path("b.txt"),
        Some(&FsNode::File {
            size: 3,
            md5: md5_hex(b"new"),
        })
    );
}

#[tokio::test]
async fn test_conflict_keep_remote_pulls() {
    // base H0, local H1, remote H2, user keeps remote
    let transport = MemoryTransport::default();
    transport.local.lock().unwrap().insert_file("c.txt", b"local edit");
    transport
        .remote
        .lock()
        .unwrap()
        .insert_file("c.txt", b"remote edit");
    let mut base = FsNode::empty_dir();
    base.set_at_path(
        "c.txt",
        FsNode::File {
            size: 2,
            md5: md5_hex(b"h0"),
        },
    );

    let report = run_round(&transport, &mut base, vec![ConflictChoice::KeepRemote]).await;
    assert!(report.is_clean());

    assert_eq!(
        transport.local.lock().unwrap().files.get("c.txt").unwrap(),
        b"remote edit"
    );
    assert_eq!(
        base.get_at_path("c.txt"),
        Some(&FsNode::File {
            size: 11,
            md5: md5_hex(b"remote edit"),
        })
    );
}

#[tokio::test]
async fn test_skipped_conflict_leaves_everything_alone() {
    let transport = MemoryTransport::default();
    transport.local.lock().unwrap().insert_file("c.txt", b"mine");
    transport.remote.lock().unwrap().insert_file("c.txt", b"theirs");
    let mut base = FsNode::empty_dir();
    base.set_at_path(
        "c.txt",
        FsNode::File {
            size: 3,
            md5: "h0".into(),
        },
    );
    let base_before = base.clone();

    let report = run_round(&transport, &mut base, vec![ConflictChoice::Skip]).await;
    assert!(report.is_clean());
    assert!(report.completed.is_empty());
    assert_eq!(base, base_before);
    assert_eq!(
        transport.local.lock().unwrap().files.get("c.txt").unwrap(),
        b"mine"
    );
}

#[tokio::test]
async fn test_whole_dir_deletion_uses_one_physical_delete() {
    // d/ with d/x.txt deleted locally; remote unchanged
    let transport = MemoryTransport::default();
    transport.remote.lock().unwrap().insert_file("d/x.txt", b"x");
    let mut base = transport.remote.lock().unwrap().tree();

    let report = run_round(&transport, &mut base, vec![]).await;
    assert!(report.is_clean());

    // exactly one physical delete, at the directory; the file was implied
    assert_eq!(*transport.remote_deletes.lock().unwrap(), vec!["d"]);
    assert_eq!(report.fake_removed.len(), 1);
    assert_eq!(report.fake_removed[0].path, "d/x.txt");

    assert!(transport.remote.lock().unwrap().files.is_empty());
    assert_eq!(base.get_at_path("d"), None);
    assert_eq!(base.get_at_path("d/x.txt"), None);
}

#[tokio::test]
async fn test_verification_failure_withholds_base_entry() {
    let mut transport = MemoryTransport::default();
    transport.corrupt_remote_writes.insert("bad.txt".to_string());
    {
        let mut local = transport.local.lock().unwrap();
        local.insert_file("a.txt", b"a");
        local.insert_file("bad.txt", b"b");
        local.insert_file("z.txt", b"z");
    }
    let mut base = FsNode::empty_dir();

    let report = run_round(&transport, &mut base, vec![]).await;
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].path, "bad.txt");
    assert!(matches!(report.failed[0].error, SyncError::Verify { .. }));

    // siblings went through and were recorded; the failed path was not
    assert!(base.get_at_path("a.txt").is_some());
    assert!(base.get_at_path("z.txt").is_some());
    assert_eq!(base.get_at_path("bad.txt"), None);

    // next round retries exactly the failed path
    let local = transport.local.lock().unwrap().tree();
    let remote = transport.remote.lock().unwrap().tree();
    // bad.txt differs between local and corrupted remote and base is
    // absent there, so it surfaces again; everything else is noop
    let actions = classify(&local, &remote, &base);
    let retries: Vec<&Action> = actions
        .iter()
        .filter(|a| !matches!(a, Action::Final(FinalAction::Noop { .. })))
        .collect();
    assert_eq!(retries.len(), 1);
    assert_eq!(retries[0].path(), "bad.txt");
}

#[tokio::test]
async fn test_failed_parent_skips_descendants_but_not_siblings() {
    let mut transport = MemoryTransport::default();
    transport.corrupt_remote_writes.insert("d/x.txt".to_string());
    {
        let mut local = transport.local.lock().unwrap();
        local.insert_file("d/x.txt", b"x");
        local.insert_file("other.txt", b"o");
    }
    let mut base = FsNode::empty_dir();

    let report = run_round(&transport, &mut base, vec![]).await;
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].path, "d/x.txt");
    assert!(base.get_at_path("other.txt").is_some());
}

struct Uppercase;

impl Transpiler for Uppercase {
    fn transform(&self, _path: &str, source: Vec<u8>) -> Result<Vec<u8>> {
        Ok(source.to_ascii_uppercase())
    }
}

/// The local snapshot as the scanner produces it: qualifying files are
/// hashed through the transform.
fn transformed_tree(side: &Side, transpiler: &dyn Transpiler) -> FsNode {
    let mut stats: Vec<StatEntry> = Vec::new();
    for dir in &side.dirs {
        stats.push(StatEntry::Dir {
            relative_path: dir.clone(),
        });
    }
    for (path, data) in &side.files {
        let data = if transpiler.qualifies(path) {
            transpiler.transform(path, data.clone()).unwrap()
        } else {
            data.clone()
        };
        stats.push(StatEntry::File {
            relative_path: path.clone(),
            size: data.len() as u64,
            md5: md5_hex(&data),
        });
    }
    mcsync::snapshot::to_structure(&stats)
}

#[tokio::test]
async fn test_transpiled_upload_verifies_transformed_bytes() {
    let transport = MemoryTransport::default();
    transport
        .local
        .lock()
        .unwrap()
        .insert_file("main.js", b"let x = 1;");
    let mut base = FsNode::empty_dir();

    let local = transformed_tree(&transport.local.lock().unwrap(), &Uppercase);
    let remote = transport.remote.lock().unwrap().tree();
    let actions = classify(&local, &remote, &base);
    let (finals, _) = partition_actions(actions);
    let ops = plan_operations(&finals, &local, &remote);

    let transpiler = Uppercase;
    let report = Executor::new(&transport, Some(&transpiler), &local, &remote)
        .execute(&ops, &mut base)
        .await;

    // verification hashed the transformed bytes, so the upload is clean
    assert!(report.is_clean(), "failures: {:?}", report.failed);
    assert_eq!(
        transport.remote.lock().unwrap().files.get("main.js").unwrap(),
        b"LET X = 1;"
    );
}

#[tokio::test]
async fn test_transpiled_second_run_is_all_noop() {
    // the local snapshot carries the transformed hash, so an untouched
    // source classifies as unchanged against both base and device
    let transport = MemoryTransport::default();
    {
        let mut local = transport.local.lock().unwrap();
        local.insert_file("main.js", b"let x = 1;");
        local.insert_file("readme.txt", b"plain");
    }
    let mut base = FsNode::empty_dir();

    let local = transformed_tree(&transport.local.lock().unwrap(), &Uppercase);
    let remote = transport.remote.lock().unwrap().tree();
    let (finals, _) = partition_actions(classify(&local, &remote, &base));
    let ops = plan_operations(&finals, &local, &remote);
    let transpiler = Uppercase;
    let report = Executor::new(&transport, Some(&transpiler), &local, &remote)
        .execute(&ops, &mut base)
        .await;
    assert!(report.is_clean(), "failures: {:?}", report.failed);

    // no external changes in between
    let local = transformed_tree(&transport.local.lock().unwrap(), &Uppercase);
    let remote = transport.remote.lock().unwrap().tree();
    let actions = classify(&local, &remote, &base);
    assert!(!actions.is_empty());
    for action in actions {
        assert!(
            matches!(action, Action::Final(FinalAction::Noop { .. })),
            "expected noop, got {:?}",
            action
        );
    }
}
