use std::str::FromStr;

use anyhow::{anyhow, bail, Error};

/// A line typed at the endpoint prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Call,
    Hang,
    Grant,
    Decline,
    Send(String),
    Status,
    Help,
    Quit,
}

pub const HELP: &str =
    "commands: call | hang | grant | decline | send <text> | status | help | quit";

impl FromStr for Command {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        let command = match word.to_ascii_lowercase().as_str() {
            "call" => Command::Call,
            "hang" | "hangup" => Command::Hang,
            "grant" => Command::Grant,
            "decline" => Command::Decline,
            "send" if rest.is_empty() => bail!("send needs some text"),
            "send" => return Ok(Command::Send(rest.to_string())),
            "status" => Command::Status,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            "" => bail!("empty command"),
            other => return Err(anyhow!("unknown command {other:?}")),
        };
        if !rest.is_empty() {
            bail!("{word} takes no arguments");
        }
        Ok(command)
    }
}
