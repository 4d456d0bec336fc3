use crossbeam_channel::Sender;
use std::io::{self, BufRead};
use std::thread;
use voxlisten::log_debug;

/// Line commands accepted on stdin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    Start,
    Pause,
    Resume,
    Status,
    Stop,
    Quit,
}

pub(crate) fn parse_command(line: &str) -> Option<Command> {
    match line.trim().to_ascii_lowercase().as_str() {
        "start" => Some(Command::Start),
        "pause" => Some(Command::Pause),
        "resume" => Some(Command::Resume),
        "status" => Some(Command::Status),
        "stop" => Some(Command::Stop),
        "quit" | "exit" | "q" => Some(Command::Quit),
        _ => None,
    }
}

/// Read stdin line by line until EOF; the sender is dropped on exit.
pub(crate) fn spawn_command_thread(tx: Sender<Command>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    log_debug(&format!("stdin read error: {err}"));
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match parse_command(&line) {
                Some(command) => {
                    if tx.send(command).is_err() {
                        return;
                    }
                }
                None => eprintln!("unknown command: {}", line.trim()),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_commands() {
        assert_eq!(parse_command("pause"), Some(Command::Pause));
        assert_eq!(parse_command("  Resume \n"), Some(Command::Resume));
        assert_eq!(parse_command("STATUS"), Some(Command::Status));
        assert_eq!(parse_command("stop"), Some(Command::Stop));
        assert_eq!(parse_command("start"), Some(Command::Start));
        assert_eq!(parse_command("q"), Some(Command::Quit));
    }

    #[test]
    fn rejects_unknown_commands() {
        assert_eq!(parse_command("record"), None);
        assert_eq!(parse_command(""), None);
    }
}
