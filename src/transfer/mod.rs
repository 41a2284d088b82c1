//! Transfer execution.
//!
//! Applies the planned operation log against local storage and the device,
//! verifying every file write by re-reading the destination's content hash.
//! Verified paths are absorbed into the base snapshot as they complete; a
//! failed operation poisons the rest of its subtree but leaves sibling
//! subtrees running, so the next run's reconciliation retries exactly the
//! paths whose base entries were withheld.

pub mod local;
pub mod transpile;

use crate::error::{Result, SyncError};
use crate::reconcile::plan::{Direction, OpKind, Operation};
use crate::snapshot::{md5_hex, EntryKind, FsNode};
use async_trait::async_trait;
use tracing::{debug, warn};

use transpile::Transpiler;

/// File transfer transport: the local sync directory on one side, the
/// device filesystem on the other. Paths are crate-normalized relative
/// paths. Deletes must treat an already-absent target as success.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn read_local(&self, path: &str) -> Result<Vec<u8>>;
    async fn write_local(&self, path: &str, data: &[u8]) -> Result<()>;
    async fn delete_local(&self, path: &str) -> Result<()>;
    async fn create_local_dir(&self, path: &str) -> Result<()>;
    /// Re-stat a local path for verification; `None` when absent.
    async fn stat_local(&self, path: &str) -> Result<Option<FsNode>>;

    async fn read_remote(&self, path: &str) -> Result<Vec<u8>>;
    async fn write_remote(&self, path: &str, data: &[u8]) -> Result<()>;
    async fn delete_remote(&self, path: &str) -> Result<()>;
    async fn create_remote_dir(&self, path: &str) -> Result<()>;
    /// Re-stat a remote path for verification; `None` when absent.
    async fn stat_remote(&self, path: &str) -> Result<Option<FsNode>>;
}

/// A path that did not synchronize, with the error that stopped it.
#[derive(Debug)]
pub struct TransferFailure {
    pub path: String,
    pub error: SyncError,
}

/// Outcome of executing one operation log.
#[derive(Debug, Default)]
pub struct TransferReport {
    /// Operations that completed (and, for files, verified).
    pub completed: Vec<Operation>,
    /// Bookkeeping-only removals.
    pub fake_removed: Vec<Operation>,
    /// Paths whose subtree processing stopped.
    pub failed: Vec<TransferFailure>,
    /// Whether anything on the device side changed.
    pub remote_changed: bool,
}

impl TransferReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Executes an operation log in planner order.
pub struct Executor<'a> {
    transport: &'a dyn Transport,
    transpiler: Option<&'a dyn Transpiler>,
    local: &'a FsNode,
    remote: &'a FsNode,
}

impl<'a> Executor<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        transpiler: Option<&'a dyn Transpiler>,
        local: &'a FsNode,
        remote: &'a FsNode,
    ) -> Self {
        Self {
            transport,
            transpiler,
            local,
            remote,
        }
    }

    /// Apply the log in order, mutating `base` as paths verify. Transfer
    /// failures are collected in the report, not returned as errors.
    pub async fn execute(&self, ops: &[Operation], base: &mut FsNode) -> TransferReport {
        let mut report = TransferReport::default();
        let mut failed_roots: Vec<String> = Vec::new();

        for op in ops {
            if failed_roots.iter().any(|root| is_self_or_under(root, &op.path)) {
                debug!(path = %op.path, "skipped: ancestor failed");
                continue;
            }

            if op.op == OpKind::FakeRemove {
                base.remove_at_path(&op.path);
                if op.direction == Direction::ToRemote {
                    report.remote_changed = true;
                }
                report.fake_removed.push(op.clone());
                continue;
            }

            match self.apply(op, base).await {
                Ok(()) => {
                    if op.direction == Direction::ToRemote {
                        report.remote_changed = true;
                    }
                    report.completed.push(op.clone());
                }
                Err(error) => {
                    warn!(path = %op.path, %error, "transfer failed");
                    failed_roots.push(op.path.clone());
                    report.failed.push(TransferFailure {
                        path: op.path.clone(),
                        error,
                    });
                }
            }
        }

        report
    }

    async fn apply(&self, op: &Operation, base: &mut FsNode) -> Result<()> {
        match (op.op, op.kind) {
            (OpKind::Add | OpKind::Update, EntryKind::File) => {
                self.transfer_file(op, base).await
            }
            (OpKind::Add | OpKind::Update, EntryKind::Dir) => {
                match op.direction {
                    Direction::ToRemote => self.transport.create_remote_dir(&op.path).await?,
                    Direction::ToLocal => self.transport.create_local_dir(&op.path).await?,
                }
                base.ensure_dir_at_path(&op.path);
                Ok(())
            }
            (OpKind::Remove, _) => {
                match op.direction {
                    Direction::ToRemote => self.transport.delete_remote(&op.path).await?,
                    Direction::ToLocal => self.transport.delete_local(&op.path).await?,
                }
                base.remove_at_path(&op.path);
                Ok(())
            }
            (OpKind::FakeRemove, _) => unreachable!("handled before dispatch"),
        }
    }

    async fn transfer_file(&self, op: &Operation, base: &mut FsNode) -> Result<()> {
        let mut data = match op.direction {
            Direction::ToRemote => self.transport.read_local(&op.path).await?,
            Direction::ToLocal => self.transport.read_remote(&op.path).await?,
        };

        // Uploads may pass through the configured source transformation.
        if op.direction == Direction::ToRemote {
            if let Some(transpiler) = self.transpiler {
                if transpiler.qualifies(&op.path) {
                    data = transpiler.transform(&op.path, data)?;
                }
            }
        }

        let written_md5 = md5_hex(&data);
        let written_size = data.len() as u64;

        let dest_stat = match op.direction {
            Direction::ToRemote => {
                self.transport.write_remote(&op.path, &data).await?;
                self.transport.stat_remote(&op.path).await?
            }
            Direction::ToLocal => {
                self.transport.write_local(&op.path, &data).await?;
                self.transport.stat_local(&op.path).await?
            }
        };

        verify(&op.path, written_size, &written_md5, dest_stat.as_ref())?;

        // The base absorbs the source snapshot's value. The local scan
        // observed qualifying files through the same transform, so this
        // equals what was just written and verified.
        match self.source_node(op) {
            Some(node @ FsNode::File { .. }) => base.set_at_path(&op.path, node.clone()),
            _ => base.set_at_path(
                &op.path,
                FsNode::File {
                    size: written_size,
                    md5: written_md5,
                },
            ),
        }
        Ok(())
    }

    fn source_node(&self, op: &Operation) -> Option<&FsNode> {
        match op.direction {
            Direction::ToRemote => self.local.get_at_path(&op.path),
            Direction::ToLocal => self.remote.get_at_path(&op.path),
        }
    }
}

/// Compare the destination's reported hash (or size, when the destination
/// cannot hash) against what was written.
fn verify(path: &str, size: u64, md5: &str, dest: Option<&FsNode>) -> Result<()> {
    match dest {
        Some(FsNode::File {
            size: dest_size,
            md5: dest_md5,
        }) => {
            let matches = if dest_md5.is_empty() {
                *dest_size == size
            } else {
                dest_md5 == md5
            };
            if matches {
                Ok(())
            } else {
                Err(SyncError::Verify {
                    path: path.to_string(),
                    expected: md5.to_string(),
                    actual: dest_md5.clone(),
                })
            }
        }
        Some(FsNode::Dir { .. }) | None => Err(SyncError::Verify {
            path: path.to_string(),
            expected: md5.to_string(),
            actual: "missing".to_string(),
        }),
    }
}

fn is_self_or_under(root: &str, path: &str) -> bool {
    path == root || (path.len() > root.len() && path.starts_with(root) && path.as_bytes()[root.len()] == b'/')
}
