//! Inbound chat commands.

use crate::config::CommandsConfig;

/// A recognised inbound command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Subscribe,
    Unsubscribe,
}

/// Command tokens and the acknowledgement sent for each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSet {
    pub subscribe: String,
    pub unsubscribe: String,
    pub subscribed_reply: String,
    pub unsubscribed_reply: String,
}

impl Default for CommandSet {
    fn default() -> Self {
        Self::from(&CommandsConfig::default())
    }
}

impl From<&CommandsConfig> for CommandSet {
    fn from(config: &CommandsConfig) -> Self {
        Self {
            subscribe: config.subscribe.clone(),
            unsubscribe: config.unsubscribe.clone(),
            subscribed_reply: config.subscribed_reply.clone(),
            unsubscribed_reply: config.unsubscribed_reply.clone(),
        }
    }
}

impl CommandSet {
    /// Match the first word of `text` against the command tokens.
    ///
    /// Telegram appends `@botname` to commands issued in groups, so
    /// `/start@my_bot` matches `/start`.
    pub fn parse(&self, text: &str) -> Option<Command> {
        let word = text.split_whitespace().next()?;
        let word = match word.split_once('@') {
            Some((command, _bot)) if word.starts_with('/') => command,
            _ => word,
        };

        if word == self.subscribe {
            Some(Command::Subscribe)
        } else if word == self.unsubscribe {
            Some(Command::Unsubscribe)
        } else {
            None
        }
    }

    pub fn reply(&self, command: Command) -> &str {
        match command {
            Command::Subscribe => &self.subscribed_reply,
            Command::Unsubscribe => &self.unsubscribed_reply,
        }
    }
}
