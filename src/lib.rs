//! mcsync - three-way directory sync for microcontroller filesystems.
//!
//! Reconciles a local directory tree against the filesystem a device exposes
//! over HTTP, using a persisted "base" snapshot (the last state both sides
//! were known to agree on) to tell genuine edits apart from re-observations.
//!
//! # Architecture
//!
//! ```text
//! +----------+   +-----------+   +----------+   +----------+
//! | Snapshot |-->| Reconcile |-->|   Plan   |-->| Transfer |
//! | (3 trees)|   | (actions) |   |  (ops)   |   | (verify) |
//! +----------+   +-----------+   +----------+   +----------+
//!                      |                              |
//!                 conflicts -> user               base update
//! ```
//!
//! Classification and planning are pure functions over snapshot trees; all
//! I/O lives behind the [`transfer::Transport`] trait and the device client.

pub mod config;
pub mod device;
pub mod error;
pub mod reconcile;
pub mod snapshot;
pub mod sync;
pub mod transfer;
