//! Line-oriented command syntax
//!
//! `<name> [argument]`, with an optional leading `.` (`.start chan`). Missing
//! or malformed arguments are rejected here, before anything is executed.

use std::fmt;
use std::str::FromStr;

use crate::error::{SupervisorError, SupervisorResult};
use crate::traits::Notification;
use shared::{RecordingId, SourceKey};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start the continuous pipeline of a source
    Start(SourceKey),
    Stop(SourceKey),
    /// Start an ad-hoc recording of a URL
    Record(String),
    /// Stop an ad-hoc recording
    End(RecordingId),
    Watch(SourceKey),
    Unwatch(SourceKey),
    Watchlist,
    List,
    Delete(SourceKey),
    Upload(SourceKey),
    Status,
    Help,
}

impl Command {
    /// Whether executing the command changes the persisted watchlist
    pub fn changes_watchlist(&self) -> bool {
        matches!(self, Command::Watch(_) | Command::Unwatch(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Start(_) => "start",
            Command::Stop(_) => "stop",
            Command::Record(_) => "record",
            Command::End(_) => "end",
            Command::Watch(_) => "watch",
            Command::Unwatch(_) => "unwatch",
            Command::Watchlist => "watchlist",
            Command::List => "list",
            Command::Delete(_) => "delete",
            Command::Upload(_) => "upload",
            Command::Status => "status",
            Command::Help => "help",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Start(key)
            | Command::Stop(key)
            | Command::Watch(key)
            | Command::Unwatch(key)
            | Command::Delete(key)
            | Command::Upload(key) => write!(f, ".{} {}", self.name(), key),
            Command::Record(url) => write!(f, ".record {url}"),
            Command::End(id) => write!(f, ".end {id}"),
            _ => write!(f, ".{}", self.name()),
        }
    }
}

fn required<'a>(argument: Option<&'a str>, what: &str) -> SupervisorResult<&'a str> {
    argument.ok_or_else(|| SupervisorError::invalid_input(format!("Please provide a {what}.")))
}

fn source_key(argument: Option<&str>) -> SupervisorResult<SourceKey> {
    Ok(SourceKey::new(required(argument, "channel name")?)?)
}

impl FromStr for Command {
    type Err = SupervisorError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let name = parts
            .next()
            .ok_or_else(|| SupervisorError::invalid_input("empty command"))?
            .trim_start_matches('.')
            .to_lowercase();
        let argument = parts.next();

        let command = match name.as_str() {
            "start" => Command::Start(source_key(argument)?),
            "stop" => Command::Stop(source_key(argument)?),
            "record" => Command::Record(required(argument, "m3u8 URL")?.to_string()),
            "end" => Command::End(RecordingId::parse(required(argument, "m3u8 stream ID")?)?),
            "watch" => Command::Watch(source_key(argument)?),
            "unwatch" => Command::Unwatch(source_key(argument)?),
            "watchlist" => Command::Watchlist,
            "list" => Command::List,
            "delete" => Command::Delete(source_key(argument)?),
            "upload" => Command::Upload(source_key(argument)?),
            "status" => Command::Status,
            "help" => Command::Help,
            other => {
                return Err(SupervisorError::invalid_input(format!(
                    "unknown command {other:?}, try .help"
                )));
            }
        };
        Ok(command)
    }
}

/// Plain-text reply to a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub title: String,
    pub message: String,
    pub color: u32,
}

impl CommandOutcome {
    pub fn new(title: impl Into<String>, message: impl Into<String>, color: u32) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            color,
        }
    }

    pub fn success(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(title, message, Notification::GREEN)
    }

    pub fn failure(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(title, message, Notification::RED)
    }

    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(title, message, Notification::BLUE)
    }
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.title, self.message)
    }
}

pub const HELP_TEXT: &str = "\
`.start <channel>` - Starts recording the specified channel.
`.stop <channel>` - Stops recording the specified channel.
`.record <url>` - Starts recording an m3u8 stream.
`.end <id>` - Stops recording an m3u8 stream.
`.watch <channel>` - Activates monitoring for the specified channel.
`.unwatch <channel>` - Deactivates monitoring for the specified channel.
`.watchlist` - Shows the current status of monitored channels.
`.list` - Lists all recorded files with download links.
`.delete <channel>` - Deletes the local folder for the specified channel.
`.upload <channel>` - Uploads the folder for the specified channel.
`.status` - Shows running recordings.
`.help` - Displays this help message.";
