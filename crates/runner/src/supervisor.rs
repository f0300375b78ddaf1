use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;
use plexback_core::{
    BackupKind, BackupRun, BackupStatus, NewBackupRun, TriggeredBy, format_instant, parse_instant,
};
use plexback_db::Db;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    /// Precondition rejection; the reason is user-facing and no state was
    /// mutated.
    #[error("{reason}")]
    Rejected { reason: String },
    #[error("Backup script not found: {}", path.display())]
    ScriptMissing { path: PathBuf },
    /// The process could not be spawned. The run record created for this
    /// attempt has already been marked failed.
    #[error("failed to start backup script: {source}")]
    Spawn { source: std::io::Error },
    #[error("db error: {0}")]
    Db(#[from] plexback_db::DbError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotStatus {
    pub running: bool,
    pub cooldown_remaining_secs: Option<u64>,
}

struct Slot {
    child: Child,
    stdout_rx: Receiver<String>,
    stderr_rx: Receiver<String>,
}

#[derive(Default)]
struct SlotState {
    slot: Option<Slot>,
    last_trigger: Option<Instant>,
}

/// Owns the single external-process execution slot. All slot and cooldown
/// access goes through one mutex region spanning inspection and mutation,
/// so two near-simultaneous trigger calls cannot both spawn a process.
pub struct BackupSupervisor {
    script_path: PathBuf,
    cooldown: Duration,
    state: Mutex<SlotState>,
}

impl BackupSupervisor {
    pub fn new(script_path: impl Into<PathBuf>, cooldown: Duration) -> Self {
        Self {
            script_path: script_path.into(),
            cooldown,
            state: Mutex::new(SlotState::default()),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn rejection_reason(&self, state: &SlotState) -> Option<String> {
        // The slot stays occupied until reconcile() has folded the exit back
        // into the record store, which keeps at most one running manual
        // record in existence.
        if state.slot.is_some() {
            return Some("A backup is already running".to_string());
        }
        if let Some(remaining) = cooldown_remaining(state, self.cooldown) {
            return Some(format!("Cooldown active. Try again in {}s", remaining));
        }
        None
    }

    /// Advisory check for the UI. `trigger` revalidates under the same lock.
    pub fn can_trigger(&self) -> Result<(), String> {
        let state = self.lock_state();
        match self.rejection_reason(&state) {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }

    pub fn status(&self) -> SlotStatus {
        let state = self.lock_state();
        SlotStatus {
            running: state.slot.is_some(),
            cooldown_remaining_secs: cooldown_remaining(&state, self.cooldown),
        }
    }

    /// Launches a manual backup: inserts a running record, starts the script
    /// without blocking, and arms the cooldown. A spawn failure marks the
    /// record failed and leaves the supervisor idle.
    pub fn trigger(&self, db: &Db) -> Result<BackupRun, TriggerError> {
        let mut state = self.lock_state();
        if let Some(reason) = self.rejection_reason(&state) {
            return Err(TriggerError::Rejected { reason });
        }
        if !self.script_path.exists() {
            return Err(TriggerError::ScriptMissing {
                path: self.script_path.clone(),
            });
        }

        let record = db.insert_run(&NewBackupRun {
            kind: BackupKind::Manual,
            status: BackupStatus::Running,
            started_at: format_instant(Local::now().naive_local()),
            triggered_by: TriggeredBy::Manual,
        })?;

        let mut command = Command::new(&self.script_path);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        match command.spawn() {
            Ok(mut child) => {
                let stdout_rx = capture_pipe(child.stdout.take());
                let stderr_rx = capture_pipe(child.stderr.take());
                state.slot = Some(Slot {
                    child,
                    stdout_rx,
                    stderr_rx,
                });
                state.last_trigger = Some(Instant::now());
                Ok(record)
            }
            Err(err) => {
                db.fail_run(
                    record.id,
                    &format_instant(Local::now().naive_local()),
                    &err.to_string(),
                )?;
                Err(TriggerError::Spawn { source: err })
            }
        }
    }

    /// Non-blocking completion poll. When the held process has exited,
    /// captures its exit code and combined output, clears the slot, and
    /// transitions the running manual record to its terminal state. This is
    /// the only place that transition happens; once the slot is idle,
    /// further calls are no-ops.
    pub fn reconcile(&self, db: &Db) -> plexback_db::Result<Option<BackupRun>> {
        let mut state = self.lock_state();
        let Some(slot) = state.slot.as_mut() else {
            return Ok(None);
        };
        let exit = match slot.child.try_wait() {
            Ok(Some(exit)) => exit,
            // Still running, or the wait itself failed; check again next tick.
            Ok(None) | Err(_) => return Ok(None),
        };
        let slot = state.slot.take().expect("slot occupied");
        let raw_output = combine_output(slot.stdout_rx, slot.stderr_rx);

        let Some(record) = db.latest_running(TriggeredBy::Manual)? else {
            return Ok(None);
        };
        let finished = Local::now().naive_local();
        let duration = parse_instant(&record.started_at)
            .map(|started| (finished - started).num_seconds() as f64)
            .unwrap_or(0.0);
        let (status, error_message) = terminal_state(exit);
        db.finish_run(
            record.id,
            status,
            &format_instant(finished),
            duration,
            Some(&raw_output),
            error_message.as_deref(),
        )?;
        db.get_run(record.id)
    }
}

fn cooldown_remaining(state: &SlotState, cooldown: Duration) -> Option<u64> {
    let last = state.last_trigger?;
    let elapsed = last.elapsed();
    if elapsed >= cooldown {
        return None;
    }
    Some((cooldown - elapsed).as_secs_f64().ceil() as u64)
}

fn terminal_state(exit: ExitStatus) -> (BackupStatus, Option<String>) {
    if exit.success() {
        return (BackupStatus::Success, None);
    }
    let message = match exit.code() {
        Some(code) => format!("Script exited with code {}", code),
        None => "Script terminated by signal".to_string(),
    };
    (BackupStatus::Failure, Some(message))
}

/// Drains a child pipe on its own thread so a chatty script can never fill
/// the pipe buffer and stall before exiting.
fn capture_pipe<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    if let Some(mut pipe) = pipe {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
        });
    }
    rx
}

fn combine_output(stdout_rx: Receiver<String>, stderr_rx: Receiver<String>) -> String {
    let stdout = stdout_rx.recv().unwrap_or_default();
    let stderr = stderr_rx.recv().unwrap_or_default();
    if stderr.is_empty() {
        stdout
    } else if stdout.is_empty() {
        stderr
    } else {
        format!("{}{}", stdout, stderr)
    }
}
