//! Prefix-command routing.
//!
//! Commands are registered once at startup into a [`CommandRouter`]. For each
//! incoming message the router parses `<prefix><name> [args]`, looks the name
//! up (case-sensitive), and spawns the handler as its own task so a slow
//! lookup never holds up the next message.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::format::Reply;
use crate::http::{HttpError, Outbox};
use crate::session::Session;
use crate::types::{Message, Snowflake};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum RouterError {
    #[error("command `{0}` is already registered")]
    Duplicate(String),
    #[error("invalid command name `{0}`: must be non-empty and contain no whitespace")]
    InvalidName(String),
}

// ---------------------------------------------------------------------------
// Handler seam
// ---------------------------------------------------------------------------

/// What a command takes after its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Trailing text is ignored.
    None,
    /// The rest of the message, required and passed as one string.
    Text,
}

/// Everything a handler needs to answer one message.
#[derive(Clone)]
pub struct CommandContext {
    pub session: Arc<Session>,
    pub outbox: Arc<dyn Outbox>,
    pub channel_id: Snowflake,
}

impl CommandContext {
    /// Send a reply to the channel the command came from.
    pub async fn reply(&self, reply: Reply) -> Result<(), HttpError> {
        self.outbox
            .create_message(&self.channel_id, &reply.into_message())
            .await
    }

    pub async fn say(&self, text: impl Into<String> + Send) -> Result<(), HttpError> {
        self.reply(Reply::text(text)).await
    }
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Run the command. `args` is empty for [`Arity::None`] commands.
    ///
    /// Lookup failures are handled inside; only a failed reply send escapes.
    async fn call(&self, ctx: &CommandContext, args: &str) -> Result<(), HttpError>;
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// A message split into command name and trailing text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedCommand<'a> {
    pub name: &'a str,
    pub args: &'a str,
}

/// Split `content` into a command if it starts with `prefix`.
///
/// The name is the first whitespace-delimited token right after the prefix;
/// the rest, trimmed at both ends, is the argument.
pub fn parse_command<'a>(prefix: &str, content: &'a str) -> Option<ParsedCommand<'a>> {
    let rest = content.strip_prefix(prefix)?;
    let (name, args) = match rest.find(char::is_whitespace) {
        Some(idx) => (&rest[..idx], rest[idx..].trim()),
        None => (rest, ""),
    };
    if name.is_empty() {
        return None;
    }
    Some(ParsedCommand { name, args })
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

struct Registered {
    arity: Arity,
    handler: Arc<dyn CommandHandler>,
}

pub struct CommandRouter {
    prefix: String,
    commands: HashMap<String, Registered>,
}

impl CommandRouter {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            commands: HashMap::new(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Registered command names, sorted.
    pub fn command_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.commands.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn register(
        &mut self,
        name: &str,
        arity: Arity,
        handler: impl CommandHandler + 'static,
    ) -> Result<(), RouterError> {
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(RouterError::InvalidName(name.to_string()));
        }
        if self.commands.contains_key(name) {
            return Err(RouterError::Duplicate(name.to_string()));
        }
        self.commands.insert(
            name.to_string(),
            Registered {
                arity,
                handler: Arc::new(handler),
            },
        );
        Ok(())
    }

    /// Route one message. Returns the spawned task when a handler runs, and
    /// `None` when the message is ignored.
    pub fn dispatch(
        &self,
        msg: &Message,
        session: &Arc<Session>,
        outbox: &Arc<dyn Outbox>,
    ) -> Option<JoinHandle<()>> {
        let parsed = parse_command(&self.prefix, &msg.content)?;

        let Some(registered) = self.commands.get(parsed.name) else {
            debug!(command = parsed.name, "unknown command, ignoring");
            return None;
        };

        let args = match registered.arity {
            Arity::None => String::new(),
            Arity::Text if parsed.args.is_empty() => {
                warn!(
                    command = parsed.name,
                    channel_id = %msg.channel_id,
                    "missing required argument, ignoring"
                );
                return None;
            }
            Arity::Text => parsed.args.to_string(),
        };

        let ctx = CommandContext {
            session: Arc::clone(session),
            outbox: Arc::clone(outbox),
            channel_id: msg.channel_id.clone(),
        };
        let handler = Arc::clone(&registered.handler);
        let command = parsed.name.to_string();

        debug!(command = %command, channel_id = %ctx.channel_id, "dispatching command");
        Some(tokio::spawn(async move {
            if let Err(e) = handler.call(&ctx, &args).await {
                error!(error = %e, command = %command, "failed to send reply");
            }
        }))
    }
}

impl std::fmt::Debug for CommandRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRouter")
            .field("prefix", &self.prefix)
            .field("commands", &self.command_names())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
