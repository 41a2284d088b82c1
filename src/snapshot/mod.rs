//! Filesystem snapshot model.
//!
//! A snapshot is a tree of [`FsNode`]s keyed by path segment. Three of them
//! flow through every sync: the local tree, the remote (device) tree, and the
//! persisted base tree. Flat stat listings from the scanner and the device
//! are converted with [`to_structure`]; lookups and mutations at arbitrary
//! depth go through [`FsNode::get_at_path`] / [`FsNode::set_at_path`].

pub mod base;
pub mod scan;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of a filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Dir,
}

impl EntryKind {
    /// Human label used in the per-file sync report.
    pub fn label(&self) -> &'static str {
        match self {
            EntryKind::File => "File",
            EntryKind::Dir => "Folder",
        }
    }
}

/// One flat stat record, as produced by the local scanner or the device
/// listing. Order within a listing is irrelevant; paths are unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatEntry {
    File {
        relative_path: String,
        size: u64,
        md5: String,
    },
    Dir {
        relative_path: String,
    },
}

impl StatEntry {
    pub fn relative_path(&self) -> &str {
        match self {
            StatEntry::File { relative_path, .. } => relative_path,
            StatEntry::Dir { relative_path } => relative_path,
        }
    }

    pub fn kind(&self) -> EntryKind {
        match self {
            StatEntry::File { .. } => EntryKind::File,
            StatEntry::Dir { .. } => EntryKind::Dir,
        }
    }
}

/// A node in a snapshot tree.
///
/// Equality is structural: two files are equal iff size and md5 match, two
/// directories are equal iff their child-name sets are equal and every
/// corresponding child is equal. Comparing against an absent node (an
/// `Option::None` elsewhere in the crate) is always unequal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FsNode {
    File { size: u64, md5: String },
    Dir { entries: BTreeMap<String, FsNode> },
}

impl FsNode {
    /// An empty directory; also the value of a just-created base snapshot.
    pub fn empty_dir() -> Self {
        FsNode::Dir {
            entries: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> EntryKind {
        match self {
            FsNode::File { .. } => EntryKind::File,
            FsNode::Dir { .. } => EntryKind::Dir,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, FsNode::Dir { .. })
    }

    /// Child map of a directory node, empty for files.
    pub fn entries(&self) -> Option<&BTreeMap<String, FsNode>> {
        match self {
            FsNode::Dir { entries } => Some(entries),
            FsNode::File { .. } => None,
        }
    }

    /// Look up the node at `path`. Returns `None` (not an error) when no
    /// node exists there. An empty path refers to `self`.
    pub fn get_at_path(&self, path: &str) -> Option<&FsNode> {
        let mut node = self;
        for segment in segments(path) {
            match node {
                FsNode::Dir { entries } => node = entries.get(segment)?,
                FsNode::File { .. } => return None,
            }
        }
        Some(node)
    }

    /// Write `value` at `path`, materializing missing intermediate
    /// directories and overwriting whatever was there. Siblings are never
    /// touched. Files occupying an intermediate segment are replaced by
    /// directories.
    pub fn set_at_path(&mut self, path: &str, value: FsNode) {
        let mut segs: Vec<&str> = segments(path).collect();
        if segs.is_empty() {
            *self = value;
            return;
        }
        let last = segs.pop().expect("non-empty segment list");

        let mut node = self;
        for segment in segs {
            if !node.is_dir() {
                *node = FsNode::empty_dir();
            }
            let FsNode::Dir { entries } = node else {
                unreachable!("just ensured a directory")
            };
            node = entries
                .entry(segment.to_string())
                .or_insert_with(FsNode::empty_dir);
            if !node.is_dir() {
                *node = FsNode::empty_dir();
            }
        }
        if !node.is_dir() {
            *node = FsNode::empty_dir();
        }
        if let FsNode::Dir { entries } = node {
            entries.insert(last.to_string(), value);
        }
    }

    /// Ensure a directory exists at `path` without disturbing an existing
    /// directory's children. A file at `path` is replaced by an empty
    /// directory.
    pub fn ensure_dir_at_path(&mut self, path: &str) {
        match self.get_at_path(path) {
            Some(FsNode::Dir { .. }) => {}
            _ => self.set_at_path(path, FsNode::empty_dir()),
        }
    }

    /// Drop the node at `path`. A no-op when absent.
    pub fn remove_at_path(&mut self, path: &str) {
        let mut segs: Vec<&str> = segments(path).collect();
        let Some(last) = segs.pop() else {
            *self = FsNode::empty_dir();
            return;
        };

        let mut node = self;
        for segment in segs {
            match node {
                FsNode::Dir { entries } => match entries.get_mut(segment) {
                    Some(child) => node = child,
                    None => return,
                },
                FsNode::File { .. } => return,
            }
        }
        if let FsNode::Dir { entries } = node {
            entries.remove(last);
        }
    }

    /// All paths in this subtree, parent before child, rooted at `prefix`.
    pub fn walk_paths(&self, prefix: &str) -> Vec<(String, EntryKind)> {
        let mut out = Vec::new();
        if let FsNode::Dir { entries } = self {
            for (name, child) in entries {
                let path = join_path(prefix, name);
                out.push((path.clone(), child.kind()));
                out.extend(child.walk_paths(&path));
            }
        }
        out
    }
}

/// Build a snapshot tree from a flat stat listing.
///
/// Total and deterministic in the entry *set*: any permutation of the same
/// entries yields a structurally identical tree. Directories listed after
/// their children do not clobber them.
pub fn to_structure(stats: &[StatEntry]) -> FsNode {
    let mut root = FsNode::empty_dir();
    for stat in stats {
        let path = normalize_path(stat.relative_path());
        match stat {
            StatEntry::File { size, md5, .. } => {
                root.set_at_path(
                    &path,
                    FsNode::File {
                        size: *size,
                        md5: md5.clone(),
                    },
                );
            }
            StatEntry::Dir { .. } => root.ensure_dir_at_path(&path),
        }
    }
    root
}

/// Normalize a path to the crate-wide convention: forward slashes, no
/// leading or trailing slash, root-relative. Shared by the scanner, the
/// device listing, and the base snapshot so the three never diverge.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Join a normalized prefix with a child name.
pub fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// Parent of a normalized path, `None` for top-level entries.
pub fn parent_path(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(parent, _)| parent)
}

/// Hex MD5 of a byte slice. The device protocol reports MD5 sums, so every
/// locally computed content hash must match that choice.
pub fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}
