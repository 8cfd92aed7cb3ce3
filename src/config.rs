//! Process settings read from the environment (after `.env` is loaded).

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::router::RouterError;

pub const DEFAULT_PREFIX: &str = "!";
pub const DEFAULT_LOG_FILE: &str = "discord.log";

/// Anything that stops the bot before it connects.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("DISCORD_TOKEN environment variable not set")]
    MissingToken,

    #[error("invalid {name}: {message}")]
    InvalidSetting { name: &'static str, message: String },

    #[error("failed to set up logging: {0}")]
    Logging(String),

    #[error(transparent)]
    Router(#[from] RouterError),
}

/// Which command set to register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Profile {
    /// `ping` and `hello`.
    Ping,
    /// `ping` and `anime`.
    AniList,
    /// `ping` and `naruto`.
    Jikan,
    #[default]
    All,
}

impl FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ping" => Ok(Profile::Ping),
            "anilist" => Ok(Profile::AniList),
            "jikan" => Ok(Profile::Jikan),
            "all" => Ok(Profile::All),
            other => Err(format!(
                "unknown profile '{}' (expected ping, anilist, jikan or all)",
                other
            )),
        }
    }
}

#[derive(Clone)]
pub struct BotConfig {
    pub token: String,
    pub prefix: String,
    pub profile: Profile,
    pub log_path: PathBuf,
    /// Applied to AniList/Jikan calls. `None` means no timeout.
    pub http_timeout: Option<Duration>,
}

impl fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotConfig")
            .field("token", &"[redacted]")
            .field("prefix", &self.prefix)
            .field("profile", &self.profile)
            .field("log_path", &self.log_path)
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

impl BotConfig {
    pub fn from_env() -> Result<Self, StartupError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Build the config from any variable source. Empty values count as
    /// unset.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, StartupError> {
        let get = |name: &str| var(name).filter(|v| !v.trim().is_empty());

        let token = get("DISCORD_TOKEN")
            .map(|t| t.trim().to_string())
            .ok_or(StartupError::MissingToken)?;

        let prefix = match var("BOT_PREFIX") {
            None => DEFAULT_PREFIX.to_string(),
            Some(p) if p.trim().is_empty() => {
                return Err(StartupError::InvalidSetting {
                    name: "BOT_PREFIX",
                    message: "must not be empty".to_string(),
                })
            }
            Some(p) => p.trim().to_string(),
        };

        let profile = match get("BOT_PROFILE") {
            Some(p) => p.parse().map_err(|message| StartupError::InvalidSetting {
                name: "BOT_PROFILE",
                message,
            })?,
            None => Profile::default(),
        };

        let log_path = get("LOG_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE));

        let http_timeout = match get("HTTP_TIMEOUT_SECS") {
            Some(secs) => Some(parse_timeout(&secs)?),
            None => None,
        };

        Ok(Self {
            token,
            prefix,
            profile,
            log_path,
            http_timeout,
        })
    }
}

fn parse_timeout(raw: &str) -> Result<Duration, StartupError> {
    let invalid = |message: String| StartupError::InvalidSetting {
        name: "HTTP_TIMEOUT_SECS",
        message,
    };
    let secs: u64 = raw.trim().parse().map_err(|e| invalid(format!("{}", e)))?;
    if secs == 0 {
        return Err(invalid("must be at least 1".to_string()));
    }
    Ok(Duration::from_secs(secs))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
