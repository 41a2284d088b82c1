//! Operation planning.
//!
//! Turns final actions plus the local and remote snapshots into an ordered
//! log of file-level operations. Creation order is parent before child;
//! deletions are a single `Remove` at the highest deleted ancestor with a
//! `FakeRemove` per descendant, since the device deletes recursively and a
//! second physical delete on an already-gone path would fail.
//!
//! Applied in order, the log transforms each destination subtree into the
//! corresponding source subtree. Planning is pure - no I/O.

use crate::reconcile::FinalAction;
use crate::snapshot::{join_path, EntryKind, FsNode};

/// Which side receives the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ToLocal,
    ToRemote,
}

impl Direction {
    /// Arrow used in the per-file sync report.
    pub fn label(&self) -> &'static str {
        match self {
            Direction::ToLocal => "MC => PC",
            Direction::ToRemote => "PC => MC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Add,
    Update,
    Remove,
    /// Bookkeeping-only removal: the path is already gone once its ancestor
    /// was removed, so only the base entry is dropped.
    FakeRemove,
}

/// One planned file-level operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub direction: Direction,
    pub path: String,
    pub kind: EntryKind,
    pub op: OpKind,
}

/// Expand final actions into the ordered operation log.
pub fn plan_operations(actions: &[FinalAction], local: &FsNode, remote: &FsNode) -> Vec<Operation> {
    let mut ops = Vec::new();
    for action in actions {
        match action {
            FinalAction::SyncToRemote { path, .. } => {
                plan_subtree(
                    Direction::ToRemote,
                    path,
                    local.get_at_path(path),
                    remote.get_at_path(path),
                    &mut ops,
                );
            }
            FinalAction::SyncToLocal { path, .. } => {
                plan_subtree(
                    Direction::ToLocal,
                    path,
                    remote.get_at_path(path),
                    local.get_at_path(path),
                    &mut ops,
                );
            }
            FinalAction::Noop { .. } | FinalAction::UpdateBase { .. } => {}
        }
    }
    ops
}

fn plan_subtree(
    direction: Direction,
    path: &str,
    source: Option<&FsNode>,
    dest: Option<&FsNode>,
    ops: &mut Vec<Operation>,
) {
    match source {
        Some(FsNode::File { .. }) => {
            // A directory in the way must go before the file can land.
            if let Some(dir @ FsNode::Dir { .. }) = dest {
                plan_removal(direction, path, dir, ops);
            }
            let op = match dest {
                Some(FsNode::File { .. }) => OpKind::Update,
                _ => OpKind::Add,
            };
            ops.push(Operation {
                direction,
                path: path.to_string(),
                kind: EntryKind::File,
                op,
            });
        }
        Some(src_dir @ FsNode::Dir { .. }) => {
            if let Some(file @ FsNode::File { .. }) = dest {
                plan_removal(direction, path, file, ops);
            }
            let dest_dir = dest.filter(|n| n.is_dir());
            if dest_dir.is_none() {
                ops.push(Operation {
                    direction,
                    path: path.to_string(),
                    kind: EntryKind::Dir,
                    op: OpKind::Add,
                });
            }

            let src_entries = src_dir.entries().expect("source is a directory");
            for (name, child) in src_entries {
                let child_path = join_path(path, name);
                let dest_child = dest_dir
                    .and_then(FsNode::entries)
                    .and_then(|e| e.get(name));
                if dest_child == Some(child) {
                    // already identical on the destination
                    continue;
                }
                plan_subtree(direction, &child_path, Some(child), dest_child, ops);
            }

            // Destination-only children no longer exist at the source.
            if let Some(dest_entries) = dest_dir.and_then(FsNode::entries) {
                for (name, child) in dest_entries {
                    if src_entries.contains_key(name) {
                        continue;
                    }
                    plan_removal(direction, &join_path(path, name), child, ops);
                }
            }
        }
        None => {
            if let Some(node) = dest {
                plan_removal(direction, path, node, ops);
            }
        }
    }
}

/// One real `Remove` at the subtree root, `FakeRemove` for everything the
/// recursive delete already covers.
fn plan_removal(direction: Direction, path: &str, node: &FsNode, ops: &mut Vec<Operation>) {
    ops.push(Operation {
        direction,
        path: path.to_string(),
        kind: node.kind(),
        op: OpKind::Remove,
    });
    for (descendant, kind) in node.walk_paths(path) {
        ops.push(Operation {
            direction,
            path: descendant,
            kind,
            op: OpKind::FakeRemove,
        });
    }
}
