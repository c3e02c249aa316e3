//! CLI utilities for the interactive client.
//!
//! A line is either a dot command or a message in wire syntax, such as
//! `ECHO{text="hi"}`.
use std::io::{BufRead, Write};

use crate::message::Message;

/// Possible commands from a user.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Exit command `.exit`, also produced at end of input.
    Exit,
    /// `.ping`
    Ping,
    /// `.login <user> <passphrase>`
    Login { user: String, passphrase: String },
    /// `.batch`: following messages are collected instead of sent.
    BeginBatch,
    /// `.send`: sends the collected batch.
    EndBatch,
    /// `.discard`: drops the collected batch.
    CancelBatch,
    /// A message to send as-is.
    Send(Message),
    /// Blank line.
    Empty,
}

/// Prompt user for a valid command.
///
/// Returns a description of the problem if the line is neither a known
/// command nor a well-formed message.
pub fn prompt<R, W>(mut reader: R, mut writer: W) -> Result<Command, String>
where
    R: BufRead,
    W: Write,
{
    let mut s = String::default();
    write!(&mut writer, "> ")
        .and_then(|_| writer.flush())
        .map_err(|e| format!("failed to write prompt: {e}"))?;

    let read = reader
        .read_line(&mut s)
        .map_err(|e| format!("failed to read input: {e}"))?;
    if read == 0 {
        return Ok(Command::Exit);
    }

    parse_line(s.trim())
}

fn parse_line(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    match words.next() {
        None => Ok(Command::Empty),
        Some(".exit") => Ok(Command::Exit),
        Some(".ping") => Ok(Command::Ping),
        Some(".batch") => Ok(Command::BeginBatch),
        Some(".send") => Ok(Command::EndBatch),
        Some(".discard") => Ok(Command::CancelBatch),
        Some(".login") => match (words.next(), words.next()) {
            (Some(user), Some(passphrase)) => Ok(Command::Login {
                user: user.to_string(),
                passphrase: passphrase.to_string(),
            }),
            _ => Err("usage: .login <user> <passphrase>".to_string()),
        },
        Some(s) if s.starts_with('.') => Err(format!("unrecognized command '{s}'")),
        Some(_) => Message::parse(line)
            .map(Command::Send)
            .map_err(|e| format!("invalid message: {e}")),
    }
}
