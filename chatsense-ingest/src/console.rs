//! Operator console commands
//!
//! One command per stdin line:
//!
//! | Input               | Action                              |
//! |---------------------|-------------------------------------|
//! | `<name>`            | join channel `<name>`               |
//! | `join <name>`       | join channel `<name>`               |
//! | empty line, `leave` | leave the active channel            |
//! | `switch <name>`     | leave (if needed), then join        |
//! | `status`            | print session and pipeline counters |
//! | `help`              | list commands                       |
//! | `q`, `quit`         | shut down                           |

use crate::error::{Error, Result};
use crate::session::{JoinOutcome, SessionManager};
use chatsense_common::SessionState;

pub const HELP: &str = "\
Commands:
  <channel> | join <channel>   join a channel
  <ENTER>   | leave            leave the current channel
  switch <channel>             leave, then join another channel
  status                       show session and pipeline counters
  q | quit                     shut down";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Join(String),
    Leave,
    Switch(String),
    Status,
    Help,
    Quit,
}

/// What the console loop does after a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleFlow {
    /// Print the message and read the next line
    Continue(String),
    /// Print the message and shut down
    Quit(String),
}

/// Parse one input line
pub fn parse_command(line: &str) -> Result<ConsoleCommand> {
    let line = line.trim();
    let mut words = line.split_whitespace();
    let Some(first) = words.next() else {
        return Ok(ConsoleCommand::Leave);
    };
    let rest: Vec<&str> = words.collect();

    let single_argument = |command: &str| -> Result<String> {
        match rest.as_slice() {
            [name] => Ok(name.to_string()),
            [] => Err(Error::InvalidInput(format!("usage: {} <channel>", command))),
            _ => Err(Error::InvalidInput(format!(
                "channel name must be a single word: '{}'",
                rest.join(" ")
            ))),
        }
    };

    match first.to_lowercase().as_str() {
        "q" | "quit" | "exit" if rest.is_empty() => Ok(ConsoleCommand::Quit),
        "leave" if rest.is_empty() => Ok(ConsoleCommand::Leave),
        "status" if rest.is_empty() => Ok(ConsoleCommand::Status),
        "help" | "?" if rest.is_empty() => Ok(ConsoleCommand::Help),
        "join" => single_argument("join").map(ConsoleCommand::Join),
        "switch" => single_argument("switch").map(ConsoleCommand::Switch),
        _ if rest.is_empty() => Ok(ConsoleCommand::Join(first.to_string())),
        _ => Err(Error::InvalidInput(format!(
            "channel name must be a single word: '{}'",
            line
        ))),
    }
}

fn describe_join(outcome: JoinOutcome) -> String {
    match outcome {
        JoinOutcome::Joined { source_id } => {
            format!("Joined channel {}. Press ENTER to leave.", source_id)
        }
        JoinOutcome::Queued(pending) => {
            let source_id = pending.source_id().to_string();
            let joined = source_id.clone();
            tokio::spawn(async move {
                match pending.wait().await {
                    Ok(()) => println!("Joined channel {}. Press ENTER to leave.", joined),
                    Err(e) => println!("{}", e),
                }
            });
            format!("Join of {} queued until the current leave completes", source_id)
        }
    }
}

/// Run one command against the session
///
/// Session errors are reported in the returned message; they never end the
/// console loop.
pub async fn execute(session: &SessionManager, command: ConsoleCommand) -> ConsoleFlow {
    let outcome = match command {
        ConsoleCommand::Join(name) => session.request_join(&name).await.map(describe_join),
        ConsoleCommand::Switch(name) => session.switch_to(&name).await.map(describe_join),
        ConsoleCommand::Leave => session.request_leave().await.map(|report| {
            if report.drained {
                format!("Left channel {}. Enter a channel name to join.", report.source_id)
            } else {
                format!(
                    "Left channel {} with {} event(s) still in flight. Enter a channel name to join.",
                    report.source_id, report.unfinished
                )
            }
        }),
        ConsoleCommand::Status => Ok(format_status(session)),
        ConsoleCommand::Help => Ok(HELP.to_string()),
        ConsoleCommand::Quit => return ConsoleFlow::Quit("Shutting down...".to_string()),
    };

    match outcome {
        Ok(message) => ConsoleFlow::Continue(message),
        Err(e) => ConsoleFlow::Continue(format!("Error: {}", e)),
    }
}

fn format_status(session: &SessionManager) -> String {
    let snapshot = session.snapshot();
    let stats = session.pipeline().snapshot();

    let channel = match (&snapshot.state, &snapshot.source_id) {
        (SessionState::Idle, _) | (_, None) => String::new(),
        (_, Some(id)) => format!(" {}", id),
    };

    format!(
        "Session: {}{}\n\
         Pipeline: admitted {}, filtered {}, dropped {}, classified {} ({} errors), \
         logged {}, lost {}, queued {}/{}",
        snapshot.state,
        channel,
        stats.admitted,
        stats.filtered,
        stats.dropped_overflow(),
        stats.classified,
        stats.classification_errors,
        stats.persisted,
        stats.lost,
        stats.intake_depth,
        stats.result_depth,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_name_joins() {
        assert_eq!(
            parse_command("  Chan1 ").unwrap(),
            ConsoleCommand::Join("Chan1".to_string())
        );
        assert_eq!(
            parse_command("join chan1").unwrap(),
            ConsoleCommand::Join("chan1".to_string())
        );
    }

    #[test]
    fn test_empty_line_leaves() {
        assert_eq!(parse_command("").unwrap(), ConsoleCommand::Leave);
        assert_eq!(parse_command("   ").unwrap(), ConsoleCommand::Leave);
        assert_eq!(parse_command("leave").unwrap(), ConsoleCommand::Leave);
    }

    #[test]
    fn test_quit_and_status() {
        assert_eq!(parse_command("q").unwrap(), ConsoleCommand::Quit);
        assert_eq!(parse_command("QUIT").unwrap(), ConsoleCommand::Quit);
        assert_eq!(parse_command("status").unwrap(), ConsoleCommand::Status);
    }

    #[test]
    fn test_switch_requires_one_channel() {
        assert_eq!(
            parse_command("switch chan2").unwrap(),
            ConsoleCommand::Switch("chan2".to_string())
        );
        assert!(parse_command("switch").is_err());
        assert!(parse_command("switch a b").is_err());
    }

    #[test]
    fn test_multi_word_name_rejected() {
        assert!(matches!(parse_command("two words"), Err(Error::InvalidInput(_))));
    }
}
