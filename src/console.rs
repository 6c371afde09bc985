//! Line-oriented console front end
//!
//! Commands, one per line:
//!
//! ```text
//! press N     tap slot N (record / stop / play)
//! hold N      long-press slot N (delete its clip)
//! fx NAME     play an effect
//! stop        stop everything
//! status      show the board
//! quit        exit
//! ```

use crate::controller::Outcome;
use crate::orchestrator::OrchestratorHandle;
use crate::permission::{PermissionGate, PermissionResponse, PermissionState};
use crate::slot::{SlotId, SlotPhase};
use crate::state::SessionSnapshot;
use crate::Result;
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::Arc;
use tracing::{debug, info};

const HELP: &str = "Commands: press N | hold N | fx NAME | stop | status | help | quit";

/// A parsed console line
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    Press(SlotId),
    Hold(SlotId),
    Effect(String),
    Stop,
    Status,
    Help,
    Quit,
}

/// Parse one input line; `None` if it is not a command
pub fn parse_command(line: &str) -> Option<ConsoleCommand> {
    let line = line.trim();
    let (verb, rest) = line
        .split_once(char::is_whitespace)
        .map(|(verb, rest)| (verb, rest.trim()))
        .unwrap_or((line, ""));

    match (verb.to_ascii_lowercase().as_str(), rest) {
        ("press" | "p", id) => id.parse().ok().map(ConsoleCommand::Press),
        ("hold" | "h", id) => id.parse().ok().map(ConsoleCommand::Hold),
        ("fx" | "effect", "") => None,
        ("fx" | "effect", name) => Some(ConsoleCommand::Effect(name.to_string())),
        ("stop" | "s", "") => Some(ConsoleCommand::Stop),
        ("status" | "ls", "") => Some(ConsoleCommand::Status),
        ("help" | "?", "") => Some(ConsoleCommand::Help),
        ("quit" | "exit" | "q", "") => Some(ConsoleCommand::Quit),
        _ => None,
    }
}

/// One-line description of a command outcome
pub fn describe(outcome: &Outcome) -> String {
    match outcome {
        Outcome::RecordingStarted => "Recording...".to_string(),
        Outcome::RecordingStopped => "Recording stopped, saving".to_string(),
        Outcome::PlaybackStarted => "Playing".to_string(),
        Outcome::EffectStarted => "Playing effect".to_string(),
        Outcome::DeleteRequested => "Deleting".to_string(),
        Outcome::DeleteCancelled => "Delete cancelled".to_string(),
        Outcome::ClipSaved => "Saved".to_string(),
        Outcome::ClipDeleted => "Deleted".to_string(),
        Outcome::Queued => "Waiting for the previous save".to_string(),
        Outcome::Busy => "Busy: the audio device is in use".to_string(),
        Outcome::Ignored => "Nothing to do".to_string(),
        Outcome::Stopped => "Stopped".to_string(),
        Outcome::Failed(e) => e.user_message(),
    }
}

/// The board as text
pub fn render(snapshot: &SessionSnapshot) -> String {
    let mut lines = vec![format!("Status: {}", snapshot.status)];

    for slot in &snapshot.slots {
        let mut line = format!("  [{}] {}", slot.id, slot.display.label());
        if slot.phase == SlotPhase::PlayingOwnClip {
            line.push_str(" (playing)");
        }
        if slot.write_pending {
            line.push_str(" (saving)");
        }
        lines.push(line);
    }

    if !snapshot.effects.is_empty() {
        let effects: Vec<String> = snapshot
            .effects
            .iter()
            .map(|effect| match (effect.loaded, effect.playing) {
                (false, _) => format!("{} (unavailable)", effect.name),
                (true, true) => format!("{} (playing)", effect.name),
                (true, false) => effect.name.clone(),
            })
            .collect();
        lines.push(format!("  Effects: {}", effects.join(", ")));
    }

    lines.join("\n")
}

/// Run the console until `quit` or end of input
///
/// Delete confirmations and the microphone prompt are asked here, on the
/// console thread, and read from `lines` like any command. The control thread
/// never reads input, so a press replayed after a pending save cannot stall
/// it. Pass the same `permission` that was given to the session.
pub fn run<I, W>(
    handle: &OrchestratorHandle,
    permission: Option<&ConsolePermission>,
    lines: I,
    mut out: W,
) -> Result<()>
where
    I: IntoIterator<Item = io::Result<String>>,
    W: Write,
{
    let mut lines = lines.into_iter();
    writeln!(out, "{}", HELP)?;
    writeln!(out, "{}", render(&handle.state().snapshot()))?;

    while let Some(line) = lines.next() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let Some(command) = parse_command(&line) else {
            writeln!(out, "Unknown command '{}'. {}", line.trim(), HELP)?;
            continue;
        };
        debug!("Console command {:?}", command);

        let outcome = match command {
            ConsoleCommand::Press(id) => {
                if let Some(permission) = permission {
                    let snapshot = handle.state().snapshot();
                    if permission.state() != PermissionState::Granted && may_record(&snapshot, id)
                    {
                        let granted = ask_yes_no(
                            &mut lines,
                            &mut out,
                            "Allow microphone access to record?",
                        )?;
                        permission.answer(granted);
                    }
                }
                handle.press(id)
            }
            ConsoleCommand::Hold(id) => {
                let snapshot = handle.state().snapshot();
                if may_delete(&snapshot, id)
                    && !ask_yes_no(&mut lines, &mut out, &format!("Delete recording {}?", id))?
                {
                    info!("Delete of slot {} cancelled", id);
                    Ok(Outcome::DeleteCancelled)
                } else {
                    handle.long_press(id)
                }
            }
            ConsoleCommand::Effect(name) => handle.play_effect(&name),
            ConsoleCommand::Stop => handle.stop_all(),
            ConsoleCommand::Status => {
                writeln!(out, "{}", render(&handle.state().snapshot()))?;
                continue;
            }
            ConsoleCommand::Help => {
                writeln!(out, "{}", HELP)?;
                continue;
            }
            ConsoleCommand::Quit => break,
        };

        match outcome {
            Ok(outcome) => writeln!(out, "{} | {}", describe(&outcome), handle.status())?,
            Err(e) => writeln!(out, "Error: {}", e)?,
        }
    }

    Ok(())
}

/// A press on `id` could start a recording
fn may_record(snapshot: &SessionSnapshot, id: SlotId) -> bool {
    snapshot
        .slot(id)
        .is_some_and(|slot| slot.phase == SlotPhase::Idle && (!slot.has_clip || slot.write_pending))
}

/// A long-press on `id` could delete a clip
fn may_delete(snapshot: &SessionSnapshot, id: SlotId) -> bool {
    snapshot
        .slot(id)
        .is_some_and(|slot| slot.phase != SlotPhase::Recording && (slot.has_clip || slot.write_pending))
}

/// Ask a yes/no question, reading the answer from `lines`
///
/// Anything but "y"/"yes", including end of input, is no.
pub fn ask_yes_no<I, W>(lines: &mut I, out: &mut W, question: &str) -> Result<bool>
where
    I: Iterator<Item = io::Result<String>>,
    W: Write,
{
    write!(out, "{} [y/N] ", question)?;
    out.flush()?;

    match lines.next() {
        Some(answer) => Ok(matches!(
            answer?.trim().to_ascii_lowercase().as_str(),
            "y" | "yes"
        )),
        None => Ok(false),
    }
}

/// Microphone permission answered on the console
///
/// The console asks before sending a press that may record and stores the
/// answer here; the session only reads it. A request with no stored grant is
/// refused without prompting.
#[derive(Clone, Debug, Default)]
pub struct ConsolePermission {
    state: Arc<Mutex<PermissionState>>,
}

impl ConsolePermission {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the user's answer
    pub fn answer(&self, granted: bool) {
        let state = if granted {
            PermissionState::Granted
        } else {
            PermissionState::Denied
        };
        *self.state.lock() = state;
        info!("Microphone permission {:?}", state);
    }
}

impl PermissionGate for ConsolePermission {
    fn state(&self) -> PermissionState {
        *self.state.lock()
    }

    fn request(&mut self) -> PermissionResponse {
        match self.state() {
            PermissionState::Granted => PermissionResponse::Granted,
            PermissionState::Denied | PermissionState::Undetermined => PermissionResponse::Denied,
        }
    }
}

/// Lines from stdin, taking the stdin lock only while reading each line
pub fn stdin_lines() -> impl Iterator<Item = io::Result<String>> {
    std::iter::from_fn(|| {
        let mut line = String::new();
        match io::stdin().read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(Ok(line)),
            Err(e) => Some(Err(e)),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SoundboardConfig;
    use crate::coordinator::SessionServices;
    use crate::engine::SimulatedEngine;
    use crate::orchestrator::Orchestrator;
    use crate::permission::{AlwaysConfirm, StaticPermission};
    use crate::store::MemoryClipStore;
    use crate::engine::ClipData;
    use crate::store::ClipStore;
    use crate::SoundboardError;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            parse_command("press 2"),
            Some(ConsoleCommand::Press(SlotId::new(2)))
        );
        assert_eq!(
            parse_command("  HOLD   1 "),
            Some(ConsoleCommand::Hold(SlotId::new(1)))
        );
        assert_eq!(
            parse_command("fx Cha Ching"),
            Some(ConsoleCommand::Effect("Cha Ching".into()))
        );
        assert_eq!(parse_command("stop"), Some(ConsoleCommand::Stop));
        assert_eq!(parse_command("q"), Some(ConsoleCommand::Quit));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_command("press"), None);
        assert_eq!(parse_command("press x"), None);
        assert_eq!(parse_command("fx"), None);
        assert_eq!(parse_command("stop now"), None);
        assert_eq!(parse_command("dance"), None);
    }

    #[test]
    fn test_describe_failure_uses_user_message() {
        assert_eq!(
            describe(&Outcome::Failed(SoundboardError::PermissionDenied)),
            "Microphone access is required to record."
        );
    }

    #[test]
    fn test_ask_yes_no() {
        let mut out = Vec::new();
        let mut answers = ["y", " YES ", "n"].into_iter().map(|a| Ok(a.to_string()));
        assert!(ask_yes_no(&mut answers, &mut out, "Delete?").unwrap());
        assert!(ask_yes_no(&mut answers, &mut out, "Delete?").unwrap());
        assert!(!ask_yes_no(&mut answers, &mut out, "Delete?").unwrap());
        // End of input
        assert!(!ask_yes_no(&mut answers, &mut out, "Delete?").unwrap());
        assert!(String::from_utf8(out).unwrap().starts_with("Delete? [y/N] "));
    }

    fn start_board(
        permission: impl PermissionGate + 'static,
        store: Arc<MemoryClipStore>,
    ) -> OrchestratorHandle {
        let services = SessionServices::new(SimulatedEngine::new(), permission, AlwaysConfirm);
        let (orchestrator, handle) = Orchestrator::new(
            SoundboardConfig::new().without_persistence(),
            services,
            store,
        )
        .unwrap();
        orchestrator.start().unwrap();
        handle
    }

    fn script(text: &str) -> Vec<io::Result<String>> {
        text.lines().map(|line| Ok(line.to_string())).collect()
    }

    #[test]
    fn test_console_session() {
        let handle = start_board(StaticPermission::granted(), Arc::new(MemoryClipStore::new()));

        let mut out = Vec::new();
        run(
            &handle,
            None,
            script("press 1\npress 2\nbogus\nstop\nstatus\nquit\npress 3\n"),
            &mut out,
        )
        .unwrap();
        let out = String::from_utf8(out).unwrap();

        assert!(out.contains("Recording... | Recording"));
        assert!(out.contains("Busy: the audio device is in use | Busy"));
        assert!(out.contains("Unknown command 'bogus'"));
        assert!(out.contains("Stopped | Stopped"));
        assert!(out.contains("[1] Record"));
        // Input after quit is not read
        assert_eq!(handle.state().slot_phase(SlotId::new(3)), Some(SlotPhase::Idle));
        handle.shutdown().unwrap();
    }

    #[test]
    fn test_prompts_are_answered_on_the_console() {
        let store = Arc::new(MemoryClipStore::new());
        store.insert(SlotId::new(2), ClipData::new(vec![0.1; 160], 16000, 1));
        let permission = ConsolePermission::new();
        let handle = start_board(permission.clone(), Arc::clone(&store));

        let mut out = Vec::new();
        run(
            &handle,
            Some(&permission),
            script("press 1\nn\npress 1\ny\npress 1\nhold 2\nno\nhold 2\nyes\nhold 3\nquit\n"),
            &mut out,
        )
        .unwrap();
        let out = String::from_utf8(out).unwrap();

        assert_eq!(out.matches("Allow microphone access to record? [y/N] ").count(), 2);
        assert!(out.contains("Microphone access is required to record."));
        assert!(out.contains("Recording... | Recording"));
        assert!(out.contains("Recording stopped, saving"));
        assert_eq!(out.matches("Delete recording 2? [y/N] ").count(), 2);
        assert!(out.contains("Delete cancelled"));
        assert!(out.contains("Deleting"));
        // Slot 3 has nothing to delete, so nothing is asked
        assert!(!out.contains("Delete recording 3?"));
        assert!(out.contains("Nothing to do"));
        assert!(!out.contains("Unknown command"));
        assert_eq!(permission.state(), PermissionState::Granted);

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while handle.state().has_pending_writes() && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(store.get(SlotId::new(2)).unwrap().is_none());
        assert!(store.get(SlotId::new(1)).unwrap().is_some());
        handle.shutdown().unwrap();
    }

    #[test]
    fn test_unanswered_permission_is_refused_without_prompting() {
        let mut permission = ConsolePermission::new();
        assert_eq!(permission.request(), PermissionResponse::Denied);
        assert_eq!(permission.state(), PermissionState::Undetermined);

        permission.answer(true);
        assert_eq!(permission.request(), PermissionResponse::Granted);
    }
}
