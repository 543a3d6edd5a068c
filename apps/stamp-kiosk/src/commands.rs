//! # Console Commands
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  m [code]   enter a place code (prompts when the code is omitted)      │
//! │  s          switch camera                                               │
//! │  c          cancel the pending submission                               │
//! │  r          restart after a failure                                     │
//! │  p          print the current session                                   │
//! │  h          help                                                        │
//! │  q          quit                                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! While a manual prompt is open the next console line answers it instead
//! of being parsed as a command.

use std::sync::mpsc;
use std::sync::Mutex;
use tracing::debug;

use stamp_scan::ManualCodeInput;

pub const HELP: &str = "m [código] ingresar código · s cambiar cámara · c cancelar · r reintentar · p estado · q salir";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Manual(Option<String>),
    Switch,
    Cancel,
    Restart,
    Print,
    Help,
    Quit,
}

impl ConsoleCommand {
    /// Parses one console line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (line, ""),
        };

        let cmd = match head.to_ascii_lowercase().as_str() {
            "" => return Ok(None),
            "m" | "manual" => {
                ConsoleCommand::Manual(Some(rest.to_string()).filter(|c| !c.is_empty()))
            }
            "s" | "switch" => ConsoleCommand::Switch,
            "c" | "cancel" => ConsoleCommand::Cancel,
            "r" | "restart" => ConsoleCommand::Restart,
            "p" | "print" => ConsoleCommand::Print,
            "h" | "help" | "?" => ConsoleCommand::Help,
            "q" | "quit" | "exit" => ConsoleCommand::Quit,
            other => return Err(format!("comando desconocido: {}", other)),
        };
        Ok(Some(cmd))
    }
}

// =============================================================================
// Console Prompt
// =============================================================================

/// Manual code prompt fed by the console reader.
///
/// [`ManualCodeInput::prompt`] blocks on the blocking pool until the reader
/// hands over the next line through [`ConsolePrompt::answer`].
#[derive(Default)]
pub struct ConsolePrompt {
    slot: Mutex<PromptSlot>,
}

#[derive(Default)]
struct PromptSlot {
    pending: Option<mpsc::SyncSender<Option<String>>>,
    closed: bool,
}

impl ConsolePrompt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_waiting(&self) -> bool {
        self.slot
            .lock()
            .map(|slot| slot.pending.is_some())
            .unwrap_or(false)
    }

    /// Answers an open prompt. A blank line dismisses it.
    ///
    /// Returns `false` if no prompt was waiting.
    pub fn answer(&self, line: &str) -> bool {
        let sender = match self.slot.lock() {
            Ok(mut slot) => slot.pending.take(),
            Err(_) => None,
        };
        let Some(sender) = sender else {
            return false;
        };

        let code = Some(line.trim().to_string()).filter(|c| !c.is_empty());
        let _ = sender.send(code);
        true
    }

    /// Closes the prompt for good, e.g. on shutdown.
    ///
    /// An open prompt returns `None`, and so does any prompt opened later
    /// without waiting for input.
    pub fn close(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            slot.closed = true;
            if let Some(sender) = slot.pending.take() {
                let _ = sender.send(None);
            }
        }
    }
}

impl ManualCodeInput for ConsolePrompt {
    fn prompt(&self, label: &str) -> Option<String> {
        let (tx, rx) = mpsc::sync_channel(1);
        match self.slot.lock() {
            Ok(mut slot) if !slot.closed => slot.pending = Some(tx),
            _ => {
                debug!("Manual prompt closed before it opened");
                return None;
            }
        }

        println!("{}", label);
        let answer = rx.recv().ok().flatten();
        debug!(answered = answer.is_some(), "Manual prompt closed");
        answer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_parse_commands() {
        assert_eq!(ConsoleCommand::parse("  "), Ok(None));
        assert_eq!(ConsoleCommand::parse("s"), Ok(Some(ConsoleCommand::Switch)));
        assert_eq!(ConsoleCommand::parse("Q"), Ok(Some(ConsoleCommand::Quit)));
        assert_eq!(
            ConsoleCommand::parse("m  PLACE-42 "),
            Ok(Some(ConsoleCommand::Manual(Some("PLACE-42".into()))))
        );
        assert_eq!(
            ConsoleCommand::parse("m"),
            Ok(Some(ConsoleCommand::Manual(None)))
        );
        assert!(ConsoleCommand::parse("zap").is_err());
    }

    #[test]
    fn test_prompt_is_answered_by_next_line() {
        let prompt = Arc::new(ConsolePrompt::new());
        assert!(!prompt.answer("too early"));

        let waiting = prompt.clone();
        let asker = std::thread::spawn(move || waiting.prompt("Ingresa el ID del lugar:"));

        while !prompt.is_waiting() {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(prompt.answer(" PLACE-7 "));
        assert_eq!(asker.join().unwrap(), Some("PLACE-7".to_string()));
        assert!(!prompt.is_waiting());
    }

    #[test]
    fn test_close_ends_open_prompt() {
        let prompt = Arc::new(ConsolePrompt::new());
        let waiting = prompt.clone();
        let asker = std::thread::spawn(move || waiting.prompt("label"));

        while !prompt.is_waiting() {
            std::thread::sleep(Duration::from_millis(1));
        }
        prompt.close();
        assert_eq!(asker.join().unwrap(), None);
    }

    #[test]
    fn test_prompt_after_close_returns_at_once() {
        let prompt = Arc::new(ConsolePrompt::new());
        prompt.close();

        let waiting = prompt.clone();
        let asker = std::thread::spawn(move || waiting.prompt("label"));
        assert_eq!(asker.join().unwrap(), None);
        assert!(!prompt.is_waiting());
        assert!(!prompt.answer("PLACE-7"));
    }
}
