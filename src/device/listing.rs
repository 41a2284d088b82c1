//! Parser for the device's filesystem listing.
//!
//! The device answers a PROPFIND on `/fs` with a fixed multistatus
//! document: one `<response>` per entry, a percent-encoded `<href>`, and a
//! `<prop>` carrying `getcontentlength` + `md5sum` for files and nothing
//! for directories. The grammar is a closed subset, so this is a small
//! purpose-built scanner rather than a general XML parser.

use crate::error::{Result, SyncError};
use crate::snapshot::scan::matches_any_subpath;
use crate::snapshot::{normalize_path, FsNode, StatEntry};
use glob::Pattern;

/// Parse a multistatus body into flat stat entries, dropping the listing
/// root and every excluded path (exclusions match the path and all of its
/// ancestor subpaths, like the local scan).
pub fn parse_listing(body: &str, exclude: &[Pattern]) -> Result<Vec<StatEntry>> {
    let mut stats = Vec::new();

    for block in blocks(body, "response") {
        let href = tag_text(block, "href")
            .ok_or_else(|| SyncError::Listing("response without href".to_string()))?;
        let Some(raw_path) = href.trim().strip_prefix("/fs") else {
            return Err(SyncError::Listing(format!(
                "href outside /fs: '{}'",
                href.trim()
            )));
        };
        if raw_path.is_empty() || raw_path == "/" {
            continue;
        }

        let decoded = urlencoding::decode(raw_path)
            .map_err(|e| SyncError::Listing(format!("href encoding: {}", e)))?;
        let rel_path = normalize_path(&decoded);
        if rel_path.is_empty() || matches_any_subpath(&rel_path, exclude) {
            continue;
        }

        match tag_text(block, "getcontentlength") {
            Some(len) => {
                let size: u64 = len.trim().parse().map_err(|_| {
                    SyncError::Listing(format!("bad getcontentlength '{}'", len.trim()))
                })?;
                let md5 = tag_text(block, "md5sum")
                    .map(|s| s.trim().to_string())
                    .unwrap_or_default();
                stats.push(StatEntry::File {
                    relative_path: rel_path,
                    size,
                    md5,
                });
            }
            None => stats.push(StatEntry::Dir {
                relative_path: rel_path,
            }),
        }
    }

    Ok(stats)
}

/// Convert a single listing entry to a snapshot node, for one-path stats.
pub fn entry_to_node(entry: &StatEntry) -> FsNode {
    match entry {
        StatEntry::File { size, md5, .. } => FsNode::File {
            size: *size,
            md5: md5.clone(),
        },
        StatEntry::Dir { .. } => FsNode::empty_dir(),
    }
}

/// Iterator over the inner text of each `<name ...>...</name>` block.
fn blocks<'a>(body: &'a str, name: &'a str) -> impl Iterator<Item = &'a str> {
    let close = format!("</{}>", name);
    let mut rest = body;
    std::iter::from_fn(move || {
        let start = find_open_tag(rest, name)?;
        let after_open = &rest[start..];
        let end = after_open.find(close.as_str())?;
        let inner = &after_open[..end];
        rest = &after_open[end + close.len()..];
        Some(inner)
    })
}

fn tag_text<'a>(block: &'a str, name: &str) -> Option<&'a str> {
    let start = find_open_tag(block, name)?;
    let after_open = &block[start..];
    let end = after_open.find(&format!("</{}>", name))?;
    Some(&after_open[..end])
}

/// Byte offset just past `<name>` or `<name attr...>`, skipping
/// self-closing and unrelated tags sharing a prefix.
fn find_open_tag(haystack: &str, name: &str) -> Option<usize> {
    let open = format!("<{}", name);
    let mut offset = 0;
    loop {
        let pos = haystack[offset..].find(&open)? + offset;
        let after = &haystack[pos + open.len()..];
        let gt = after.find('>')?;
        let tag_rest = &after[..gt];
        // reject "<response2" style prefixes and <tag/> self-closes
        let boundary_ok = tag_rest.is_empty() || tag_rest.starts_with(|c: char| c.is_whitespace());
        if boundary_ok && !tag_rest.ends_with('/') {
            return Some(pos + open.len() + gt + 1);
        }
        offset = pos + open.len();
    }
}
