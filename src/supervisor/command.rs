//! Command Channel - serializes console commands to the server's stdin
//!
//! Commands are queued to the stdin writer task of the current process.
//! With no process attached every send fails with `CommandError::NotAttached`.

use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;

use super::error::CommandError;

#[derive(Debug, Clone, Default)]
pub struct CommandChannel {
    stdin_tx: Option<mpsc::UnboundedSender<String>>,
}

impl CommandChannel {
    /// A channel with no process behind it.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, stdin_tx: mpsc::UnboundedSender<String>) {
        self.stdin_tx = Some(stdin_tx);
    }

    pub fn detach(&mut self) {
        self.stdin_tx = None;
    }

    pub fn is_attached(&self) -> bool {
        self.stdin_tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Join `parts` with single spaces and write them as one line.
    pub fn send<I, S>(&self, parts: I) -> Result<(), CommandError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tx = self.stdin_tx.as_ref().ok_or(CommandError::NotAttached)?;
        let line = format_command(parts);
        tracing::debug!("> {}", line.trim_end());
        tx.send(line).map_err(|_| CommandError::Closed)
    }

    pub fn say(&self, message: &str) -> Result<(), CommandError> {
        self.send(["say", message])
    }

    pub fn tell_raw<T: Serialize + ?Sized>(&self, target: &str, data: &T) -> Result<(), CommandError> {
        let data = serde_json::to_string(data)?;
        self.send(["tellraw", target, data.as_str()])
    }

    pub fn title<T: Serialize + ?Sized>(&self, target: &str, data: &T) -> Result<(), CommandError> {
        let data = serde_json::to_string(data)?;
        self.send(["title", target, "title", data.as_str()])
    }

    /// Red chat line for a single player.
    pub fn tell_error(&self, target: &str, message: &str) -> Result<(), CommandError> {
        self.tell_raw(target, &json!([{ "text": message, "color": "red" }]))
    }

    pub fn add_objective(
        &self,
        name: &str,
        criteria: Option<&str>,
        display_name: Option<&str>,
    ) -> Result<(), CommandError> {
        self.send([
            "scoreboard",
            "objectives",
            "add",
            name,
            criteria.unwrap_or("dummy"),
            display_name.unwrap_or(name),
        ])
    }

    pub fn set_score(&self, target: &str, objective: &str, score: i64) -> Result<(), CommandError> {
        let score = score.to_string();
        self.send(["scoreboard", "players", "set", target, objective, score.as_str()])
    }
}

fn format_command<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut line = parts
        .into_iter()
        .map(|p| p.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(" ");
    line.push('\n');
    line
}
