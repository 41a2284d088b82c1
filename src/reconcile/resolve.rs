//! Interactive conflict resolution.
//!
//! Every conflict is resolved sequentially, one decision per path, in
//! lexicographic path order so repeated runs present identical conflicts in
//! a reproducible order. An abort discards all decisions made so far; the
//! snapshots and the base file stay untouched.

use crate::error::{Result, SyncError};
use crate::reconcile::{Conflict, FinalAction};
use crate::snapshot::{EntryKind, FsNode};
use std::io::{BufRead, Write};
use tracing::info;

/// The user's decision for one conflicting path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictChoice {
    /// Keep the local value and push it to the device.
    KeepLocal,
    /// Keep the remote value and pull it to local disk.
    KeepRemote,
    /// Leave both sides as they are; the conflict reappears next run.
    Skip,
}

/// Decision when the device reports no prior sync yet local files and a
/// sync history file exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoHistoryChoice {
    Abort,
    /// Discard the stale history and reconcile from scratch; nothing is
    /// overwritten without asking.
    InitialSync,
}

/// User-interaction surface of the sync session. All methods block the
/// session; no two prompts run concurrently.
pub trait UserPrompt {
    /// Resolve one conflict. `Err(SyncError::Aborted)` cancels the whole
    /// session.
    fn resolve_conflict(&mut self, conflict: &Conflict) -> Result<ConflictChoice>;

    /// One-time choice when no prior sync history matches the device state.
    fn no_sync_history(&mut self) -> Result<NoHistoryChoice>;

    /// Whether to restart the running device program after device-side
    /// changes. `preset` short-circuits the prompt (--restart / --no-restart).
    fn confirm_restart(&mut self, preset: Option<bool>) -> Result<bool>;
}

/// Resolve all conflicts into final actions.
///
/// Returns `Err(SyncError::Aborted)` if the user aborts; any decisions
/// already made are discarded with it, never partially applied.
pub fn resolve_conflicts(
    mut conflicts: Vec<Conflict>,
    prompt: &mut dyn UserPrompt,
) -> Result<Vec<FinalAction>> {
    conflicts.sort_by(|a, b| a.path.cmp(&b.path));

    let mut resolved = Vec::with_capacity(conflicts.len());
    for conflict in &conflicts {
        let choice = prompt.resolve_conflict(conflict)?;
        info!(path = %conflict.path, ?choice, "conflict resolved");
        resolved.push(apply_choice(conflict, choice));
    }
    Ok(resolved)
}

fn apply_choice(conflict: &Conflict, choice: ConflictChoice) -> FinalAction {
    let path = conflict.path.clone();
    match choice {
        ConflictChoice::KeepLocal => FinalAction::SyncToRemote {
            path,
            kind: side_kind(&conflict.local, &conflict.remote),
        },
        ConflictChoice::KeepRemote => FinalAction::SyncToLocal {
            path,
            kind: side_kind(&conflict.remote, &conflict.local),
        },
        ConflictChoice::Skip => FinalAction::Noop { path },
    }
}

/// Kind of the kept side's node, falling back to the other side when the
/// kept side is a deletion.
fn side_kind(kept: &Option<FsNode>, other: &Option<FsNode>) -> EntryKind {
    kept.as_ref()
        .or(other.as_ref())
        .map(FsNode::kind)
        .unwrap_or(EntryKind::File)
}

// =============================================================================
// Terminal prompt
// =============================================================================

/// Prompt on the controlling terminal, one line per decision.
pub struct TerminalPrompt;

impl TerminalPrompt {
    fn ask(&self, question: &str, choices: &str) -> Result<String> {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        write!(out, "{} {} ", question, choices)?;
        out.flush()?;

        let stdin = std::io::stdin();
        let mut line = String::new();
        stdin.lock().read_line(&mut line)?;
        Ok(line.trim().to_ascii_lowercase())
    }

    fn describe(node: &Option<FsNode>) -> String {
        match node {
            Some(FsNode::File { size, md5 }) => format!("file ({} bytes, md5 {})", size, md5),
            Some(FsNode::Dir { .. }) => "directory".to_string(),
            None => "deleted".to_string(),
        }
    }
}

impl UserPrompt for TerminalPrompt {
    fn resolve_conflict(&mut self, conflict: &Conflict) -> Result<ConflictChoice> {
        println!("Conflict at '{}':", conflict.path);
        println!("  local:  {}", Self::describe(&conflict.local));
        println!("  remote: {}", Self::describe(&conflict.remote));
        if !conflict.base_existed {
            println!("  (this path has never been synced before)");
        }

        loop {
            let answer = self.ask("Keep which side?", "[l]ocal / [r]emote / [s]kip / [a]bort:")?;
            match answer.as_str() {
                "l" | "local" => return Ok(ConflictChoice::KeepLocal),
                "r" | "remote" => return Ok(ConflictChoice::KeepRemote),
                "s" | "skip" => return Ok(ConflictChoice::Skip),
                "a" | "abort" => return Err(SyncError::Aborted),
                _ => println!("Please answer l, r, s or a."),
            }
        }
    }

    fn no_sync_history(&mut self) -> Result<NoHistoryChoice> {
        println!("The filesystem of the microcontroller has not been synced before.");
        loop {
            let answer = self.ask(
                "Abort, or discard sync history and do an initial sync (no files are overwritten without asking)?",
                "[a]bort / [i]nitial sync:",
            )?;
            match answer.as_str() {
                "a" | "abort" => return Ok(NoHistoryChoice::Abort),
                "i" | "initial" => return Ok(NoHistoryChoice::InitialSync),
                _ => println!("Please answer a or i."),
            }
        }
    }

    fn confirm_restart(&mut self, preset: Option<bool>) -> Result<bool> {
        if let Some(answer) = preset {
            return Ok(answer);
        }
        loop {
            let answer = self.ask(
                "The device filesystem changed. Restart the running program for the changes to take effect?",
                "[y]es / [n]o:",
            )?;
            match answer.as_str() {
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => println!("Please answer y or n."),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Prompt double answering from a script, recording the order in which
    /// conflicts were presented.
    struct ScriptedPrompt {
        answers: Vec<Result<ConflictChoice>>,
        seen: Vec<String>,
    }

    impl ScriptedPrompt {
        fn new(answers: Vec<Result<ConflictChoice>>) -> Self {
            Self {
                answers,
                seen: Vec::new(),
            }
        }
    }

    impl UserPrompt for ScriptedPrompt {
        fn resolve_conflict(&mut self, conflict: &Conflict) -> Result<ConflictChoice> {
            self.seen.push(conflict.path.clone());
            self.answers.remove(0)
        }

        fn no_sync_history(&mut self) -> Result<NoHistoryChoice> {
            Ok(NoHistoryChoice::InitialSync)
        }

        fn confirm_restart(&mut self, preset: Option<bool>) -> Result<bool> {
            Ok(preset.unwrap_or(false))
        }
    }

    fn conflict(path: &str) -> Conflict {
        Conflict {
            path: path.to_string(),
            local: Some(FsNode::File {
                size: 1,
                md5: "aa".into(),
            }),
            remote: Some(FsNode::File {
                size: 2,
                md5: "bb".into(),
            }),
            base_existed: true,
        }
    }

    #[test]
    fn test_conflicts_presented_in_lexicographic_order() {
        let mut prompt = ScriptedPrompt::new(vec![
            Ok(ConflictChoice::Skip),
            Ok(ConflictChoice::Skip),
            Ok(ConflictChoice::Skip),
        ]);
        let conflicts = vec![conflict("zz.txt"), conflict("aa.txt"), conflict("mm.txt")];

        resolve_conflicts(conflicts, &mut prompt).unwrap();
        assert_eq!(prompt.seen, vec!["aa.txt", "mm.txt", "zz.txt"]);
    }

    #[test]
    fn test_choices_map_to_final_actions() {
        let mut prompt = ScriptedPrompt::new(vec![
            Ok(ConflictChoice::KeepLocal),
            Ok(ConflictChoice::KeepRemote),
            Ok(ConflictChoice::Skip),
        ]);
        let conflicts = vec![conflict("a"), conflict("b"), conflict("c")];

        let resolved = resolve_conflicts(conflicts, &mut prompt).unwrap();
        assert_eq!(
            resolved,
            vec![
                FinalAction::SyncToRemote {
                    path: "a".into(),
                    kind: EntryKind::File,
                },
                FinalAction::SyncToLocal {
                    path: "b".into(),
                    kind: EntryKind::File,
                },
                FinalAction::Noop { path: "c".into() },
            ]
        );
    }

    #[test]
    fn test_keep_local_deletion_pushes_remote_kind() {
        let mut prompt = ScriptedPrompt::new(vec![Ok(ConflictChoice::KeepLocal)]);
        let conflicts = vec![Conflict {
            path: "d".into(),
            local: None,
            remote: Some(FsNode::empty_dir()),
            base_existed: true,
        }];

        let resolved = resolve_conflicts(conflicts, &mut prompt).unwrap();
        assert_eq!(
            resolved,
            vec![FinalAction::SyncToRemote {
                path: "d".into(),
                kind: EntryKind::Dir,
            }]
        );
    }

    #[test]
    fn test_abort_discards_partial_decisions() {
        let mut prompt = ScriptedPrompt::new(vec![
            Ok(ConflictChoice::KeepLocal),
            Err(SyncError::Aborted),
        ]);
        let conflicts = vec![conflict("a"), conflict("b"), conflict("c")];

        let err = resolve_conflicts(conflicts, &mut prompt).unwrap_err();
        assert!(matches!(err, SyncError::Aborted));
        // the first decision was made but never surfaced
        assert_eq!(prompt.seen, vec!["a", "b"]);
    }
}
