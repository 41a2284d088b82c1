//! Sync session orchestration.
//!
//! One run is a strict sequence of phases with no overlap: acquire the
//! three snapshots, classify, resolve conflicts, persist the base, plan,
//! execute, report, post-sync side effects. Classification and planning
//! are pure; everything that touches the disk, the device or the user
//! happens here or behind the [`Transport`] trait.

use crate::config::Config;
use crate::device::{Device, ProgramStatus};
use crate::error::{Result, SyncError};
use crate::reconcile::plan::{plan_operations, OpKind, Operation};
use crate::reconcile::resolve::{resolve_conflicts, NoHistoryChoice, UserPrompt};
use crate::reconcile::{apply_update_base, classify, partition_actions, FinalAction};
use crate::snapshot::base::BaseStore;
use crate::snapshot::scan::{compile_globs, scan_local};
use crate::snapshot::{to_structure, FsNode};
use crate::transfer::local::LocalStore;
use crate::transfer::transpile::{Passthrough, Transpiler};
use crate::transfer::{Executor, Transport};
use anyhow::Context;
use async_trait::async_trait;
use std::fs;
use std::sync::Arc;
use tracing::info;

/// Run-time options, layered over the config file.
#[derive(Debug, Default, Clone)]
pub struct SyncOptions {
    /// Print the planned operations and stop before transferring.
    pub dry_run: bool,
    /// Preset answer for the restart prompt (--restart / --no-restart).
    pub restart: Option<bool>,
    /// Override the config's transpile switch.
    pub transpile: Option<bool>,
}

/// What a finished (or aborted) session has to report.
#[derive(Debug, Default)]
pub struct SyncSummary {
    pub aborted: bool,
    /// Human-readable per-path transfer lines, in execution order.
    pub lines: Vec<String>,
    /// Paths that did not synchronize, with the error message.
    pub failed: Vec<(String, String)>,
    pub remote_changed: bool,
}

impl SyncSummary {
    fn aborted() -> Self {
        Self {
            aborted: true,
            ..Self::default()
        }
    }
}

/// Real transport: the sync directory on one side, the device on the other.
pub struct DeviceTransport<'a> {
    local: LocalStore,
    device: &'a dyn Device,
}

impl<'a> DeviceTransport<'a> {
    pub fn new(local: LocalStore, device: &'a dyn Device) -> Self {
        Self { local, device }
    }
}

#[async_trait]
impl Transport for DeviceTransport<'_> {
    async fn read_local(&self, path: &str) -> Result<Vec<u8>> {
        self.local.read(path).await
    }
    async fn write_local(&self, path: &str, data: &[u8]) -> Result<()> {
        self.local.write(path, data).await
    }
    async fn delete_local(&self, path: &str) -> Result<()> {
        self.local.delete(path).await
    }
    async fn create_local_dir(&self, path: &str) -> Result<()> {
        self.local.create_dir(path).await
    }
    async fn stat_local(&self, path: &str) -> Result<Option<FsNode>> {
        self.local.stat(path).await
    }

    async fn read_remote(&self, path: &str) -> Result<Vec<u8>> {
        self.device.read_file(path).await
    }
    async fn write_remote(&self, path: &str, data: &[u8]) -> Result<()> {
        self.device.write_file(path, data).await
    }
    async fn delete_remote(&self, path: &str) -> Result<()> {
        self.device.delete(path).await
    }
    async fn create_remote_dir(&self, path: &str) -> Result<()> {
        self.device.create_dir(path).await
    }
    async fn stat_remote(&self, path: &str) -> Result<Option<FsNode>> {
        self.device.stat(path).await
    }
}

/// Run one full sync session against `device`.
pub async fn run_sync(
    config: &Config,
    device: &dyn Device,
    options: &SyncOptions,
    prompt: &mut dyn UserPrompt,
) -> anyhow::Result<SyncSummary> {
    let sync_dir = config.sync_dir();
    prepare_sync_dir(&sync_dir)?;

    let globs = compile_globs(&config.exclude_globs())?;
    let store = BaseStore::new(config.sync_state_path());

    let transpile_enabled = options.transpile.unwrap_or(config.transpile);
    let transpiler: Option<Arc<dyn Transpiler>> =
        transpile_enabled.then(|| Arc::new(Passthrough) as Arc<dyn Transpiler>);

    info!("Fetching file system listings...");

    let scan_root = sync_dir.clone();
    let scan_globs = globs.clone();
    let scan_transpiler = transpiler.clone();
    let local_stats = tokio::task::spawn_blocking(move || {
        scan_local(&scan_root, &scan_globs, scan_transpiler.as_deref())
    })
    .await
    .context("local scan task panicked")??;

    let remote_listing = device.list(&globs).await.context("device listing failed")?;

    if !remote_listing.had_put {
        // Device was never synced; a stale history file would misclassify
        // everything as remotely deleted.
        if !local_stats.is_empty() && store.exists() {
            match prompt.no_sync_history()? {
                NoHistoryChoice::Abort => return Ok(SyncSummary::aborted()),
                NoHistoryChoice::InitialSync => {}
            }
        }
        if !options.dry_run {
            store.discard()?;
            device.mark_had_put().await?;
        }
    }

    let local = to_structure(&local_stats);
    let remote = to_structure(&remote_listing.stats);
    let mut base = if remote_listing.had_put {
        store.load()?
    } else {
        // History was (or would be, on a dry run) discarded.
        FsNode::empty_dir()
    };

    // Phase: classify, then resolve what needs the user.
    let actions = classify(&local, &remote, &base);
    let (mut finals, conflicts) = partition_actions(actions);
    if !conflicts.is_empty() {
        info!(count = conflicts.len(), "conflicts need resolution");
        match resolve_conflicts(conflicts, prompt) {
            Ok(resolved) => finals.extend(resolved),
            Err(SyncError::Aborted) => return Ok(SyncSummary::aborted()),
            Err(e) => return Err(e.into()),
        }
    }

    let ops = plan_operations(&finals, &local, &remote);

    if options.dry_run {
        return Ok(SyncSummary {
            lines: ops.iter().map(report_line).collect(),
            ..SyncSummary::default()
        });
    }

    // Absorb the already-converged paths and persist before any transfer,
    // so a crash mid-transfer cannot lose them.
    for action in &finals {
        if let FinalAction::UpdateBase { path } = action {
            apply_update_base(&mut base, &local, path);
        }
    }
    store.save(&base)?;

    if ops.is_empty() {
        info!("Nothing to synchronize.");
        return Ok(SyncSummary::default());
    }

    let transport = DeviceTransport::new(LocalStore::new(&sync_dir), device);
    let executor = Executor::new(&transport, transpiler.as_deref(), &local, &remote);
    let report = executor.execute(&ops, &mut base).await;

    // Verified paths were folded into the base as they completed; failed
    // ones were withheld and will reclassify next run.
    store.save(&base)?;

    let mut summary = SyncSummary {
        aborted: false,
        lines: report
            .completed
            .iter()
            .chain(report.fake_removed.iter())
            .map(report_line)
            .collect(),
        failed: report
            .failed
            .iter()
            .map(|f| (f.path.clone(), f.error.to_string()))
            .collect(),
        remote_changed: report.remote_changed,
    };

    if summary.remote_changed {
        maybe_restart(device, options, prompt, &mut summary).await?;
    }

    Ok(summary)
}

async fn maybe_restart(
    device: &dyn Device,
    options: &SyncOptions,
    prompt: &mut dyn UserPrompt,
    summary: &mut SyncSummary,
) -> anyhow::Result<()> {
    let status = device.program_status().await?;
    if status == ProgramStatus::Stopped {
        return Ok(());
    }
    if prompt.confirm_restart(options.restart)? {
        info!("Restarting program...");
        device.restart_program().await?;
        summary.lines.push("Program restarted.".to_string());
    }
    Ok(())
}

fn prepare_sync_dir(dir: &std::path::Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
        info!(dir = %dir.display(), "created sync directory");
        return Ok(());
    }
    if !dir.is_dir() {
        return Err(SyncError::Config(format!(
            "cannot synchronize with '{}': a file exists in that location",
            dir.display()
        )));
    }
    Ok(())
}

fn report_line(op: &Operation) -> String {
    let sign = match op.op {
        OpKind::Add => "+",
        OpKind::Update => "~",
        OpKind::Remove | OpKind::FakeRemove => "-",
    };
    format!(
        "{}: {}{} {}",
        op.direction.label(),
        sign,
        op.kind.label(),
        op.path
    )
}
