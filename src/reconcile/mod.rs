//! Three-way reconciliation.
//!
//! Classifies every path in the union of the local, remote and base
//! snapshots into an [`Action`], visiting top-down. A directory that
//! classifies decisively (directional sync or conflict) subsumes its
//! descendants; a directory present on both observed sides is classified
//! shallowly and recursion proceeds into its children.
//!
//! Classification is a pure total function over the three trees - no I/O -
//! so it is testable without a filesystem or a device.

pub mod plan;
pub mod resolve;

use crate::snapshot::{join_path, EntryKind, FsNode};
use std::collections::BTreeSet;
use tracing::debug;

/// An action that needs no further input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalAction {
    /// Path is in sync; nothing to do.
    Noop { path: String },
    /// Push the local value (or the local deletion) to the device.
    SyncToRemote { path: String, kind: EntryKind },
    /// Pull the remote value (or the remote deletion) to local disk.
    SyncToLocal { path: String, kind: EntryKind },
    /// No transfer needed, but the base snapshot must absorb the local
    /// value at this path (or drop it, when deleted on both sides).
    UpdateBase { path: String },
}

impl FinalAction {
    pub fn path(&self) -> &str {
        match self {
            FinalAction::Noop { path }
            | FinalAction::SyncToRemote { path, .. }
            | FinalAction::SyncToLocal { path, .. }
            | FinalAction::UpdateBase { path } => path,
        }
    }

    /// Whether this action moves file content in either direction.
    pub fn is_directional(&self) -> bool {
        matches!(
            self,
            FinalAction::SyncToRemote { .. } | FinalAction::SyncToLocal { .. }
        )
    }
}

/// A path that changed differently on both sides relative to base and
/// needs a human decision. Carries everything the prompt shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub path: String,
    pub local: Option<FsNode>,
    pub remote: Option<FsNode>,
    /// Whether the base knew this path; false means both sides created it
    /// independently with different content.
    pub base_existed: bool,
}

/// Per-path result of classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Final(FinalAction),
    AskUser(Conflict),
}

impl Action {
    pub fn path(&self) -> &str {
        match self {
            Action::Final(f) => f.path(),
            Action::AskUser(c) => &c.path,
        }
    }
}

/// Split actions into the ones ready for planning and the conflicts that
/// still need the user.
pub fn partition_actions(actions: Vec<Action>) -> (Vec<FinalAction>, Vec<Conflict>) {
    let mut finals = Vec::new();
    let mut conflicts = Vec::new();
    for action in actions {
        match action {
            Action::Final(f) => finals.push(f),
            Action::AskUser(c) => conflicts.push(c),
        }
    }
    (finals, conflicts)
}

/// Classify every path in the union of the three snapshots.
///
/// All three arguments are snapshot roots (directories). The root itself is
/// never classified.
pub fn classify(local: &FsNode, remote: &FsNode, base: &FsNode) -> Vec<Action> {
    let mut actions = Vec::new();
    classify_children("", local, remote, Some(base), &mut actions);
    actions
}

fn classify_children(
    prefix: &str,
    local: &FsNode,
    remote: &FsNode,
    base: Option<&FsNode>,
    out: &mut Vec<Action>,
) {
    let mut names: BTreeSet<&str> = BTreeSet::new();
    for node in [Some(local), Some(remote), base].into_iter().flatten() {
        if let Some(entries) = node.entries() {
            names.extend(entries.keys().map(String::as_str));
        }
    }

    for name in names {
        let path = join_path(prefix, name);
        let l = local.entries().and_then(|e| e.get(name));
        let r = remote.entries().and_then(|e| e.get(name));
        let b = base
            .and_then(FsNode::entries)
            .and_then(|e| e.get(name));
        classify_path(&path, l, r, b, out);
    }
}

fn classify_path(
    path: &str,
    l: Option<&FsNode>,
    r: Option<&FsNode>,
    b: Option<&FsNode>,
    out: &mut Vec<Action>,
) {
    // A directory on both observed sides is classified shallowly and its
    // children individually; whole-subtree comparison only applies once one
    // side stops being a directory.
    if let (Some(ld), Some(rd)) = (l, r) {
        if ld.is_dir() && rd.is_dir() {
            let base_is_dir = matches!(b, Some(FsNode::Dir { .. }));
            if base_is_dir {
                out.push(Action::Final(FinalAction::Noop {
                    path: path.to_string(),
                }));
            } else {
                // Both sides agree a directory belongs here; the base has
                // yet to record it.
                out.push(Action::Final(FinalAction::UpdateBase {
                    path: path.to_string(),
                }));
            }
            classify_children(path, ld, rd, b.filter(|n| n.is_dir()), out);
            return;
        }
    }

    let changed_local = l != b;
    let changed_remote = r != b;

    let action = match (changed_local, changed_remote) {
        (false, false) => Action::Final(FinalAction::Noop {
            path: path.to_string(),
        }),
        (true, false) => Action::Final(FinalAction::SyncToRemote {
            path: path.to_string(),
            kind: transfer_kind(l, r),
        }),
        (false, true) => Action::Final(FinalAction::SyncToLocal {
            path: path.to_string(),
            kind: transfer_kind(r, l),
        }),
        (true, true) => {
            if l == r {
                // Both sides converged on the same value (or both deleted);
                // only the base needs to catch up.
                Action::Final(FinalAction::UpdateBase {
                    path: path.to_string(),
                })
            } else {
                debug!(path, base_existed = b.is_some(), "conflict detected");
                Action::AskUser(Conflict {
                    path: path.to_string(),
                    local: l.cloned(),
                    remote: r.cloned(),
                    base_existed: b.is_some(),
                })
            }
        }
    };
    out.push(action);
}

/// Kind carried by a directional action: the source node's kind when it
/// exists, otherwise the kind of the destination node being deleted.
fn transfer_kind(source: Option<&FsNode>, dest: Option<&FsNode>) -> EntryKind {
    source
        .or(dest)
        .map(FsNode::kind)
        .unwrap_or(EntryKind::File)
}

/// Apply one `UpdateBase` action: the base absorbs the local value at the
/// path. Directories are absorbed shallowly (children carry their own
/// actions); an absent local value drops the base entry.
pub fn apply_update_base(base: &mut FsNode, local: &FsNode, path: &str) {
    match local.get_at_path(path) {
        Some(FsNode::Dir { .. }) => base.ensure_dir_at_path(path),
        Some(file) => base.set_at_path(path, file.clone()),
        None => base.remove_at_path(path),
    }
}
