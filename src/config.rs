use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Permisos
    pub priority_user_id: Option<u64>,
    pub blocked_user_id: Option<u64>,
    pub dj_role_name: String,

    // Sonidos de bienvenida
    pub ambient_default_sound: String,
    pub ambient_for_everyone: bool,

    // Paths
    pub data_dir: PathBuf,

    // Límites (segundos)
    pub connect_timeout_secs: u64,
    pub resolve_timeout_secs: u64,
    pub session_idle_secs: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN")?,
            guild_id: optional_id("GUILD_ID")?,

            // Permisos
            priority_user_id: optional_id("PRIORITY_USER_ID")?,
            blocked_user_id: optional_id("BLOCKED_USER_ID")?,
            dj_role_name: std::env::var("DJ_ROLE_NAME").unwrap_or_else(|_| "DJ".to_string()),

            // Sonidos de bienvenida
            ambient_default_sound: std::env::var("AMBIENT_DEFAULT_SOUND")
                .unwrap_or_else(|_| "audio/welcome.mp3".to_string()),
            ambient_for_everyone: std::env::var("AMBIENT_FOR_EVERYONE")
                .unwrap_or_else(|_| "false".to_string())
                .parse()?,

            // Paths
            data_dir: std::env::var("DATA_DIR")
                .unwrap_or_else(|_| "./data".to_string())
                .into(),

            // Límites
            connect_timeout_secs: std::env::var("CONNECT_TIMEOUT_SECS")
                .unwrap_or_else(|_| "15".to_string())
                .parse()?,
            resolve_timeout_secs: std::env::var("RESOLVE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
            session_idle_secs: std::env::var("SESSION_IDLE_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()?,
        };

        std::fs::create_dir_all(&config.data_dir)?;

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Timeouts must be greater than zero
    /// - The DJ role name must not be blank
    /// - The default ambient sound must not be blank
    /// - Priority and blocked user must differ
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_secs == 0 {
            anyhow::bail!("Connect timeout must be greater than 0");
        }

        if self.resolve_timeout_secs == 0 {
            anyhow::bail!("Resolve timeout must be greater than 0");
        }

        if self.session_idle_secs == 0 {
            anyhow::bail!("Session idle time must be greater than 0");
        }

        if self.dj_role_name.trim().is_empty() {
            anyhow::bail!("DJ role name cannot be empty");
        }

        if self.ambient_default_sound.trim().is_empty() {
            anyhow::bail!("Default ambient sound cannot be empty");
        }

        if self.priority_user_id.is_some() && self.priority_user_id == self.blocked_user_id {
            anyhow::bail!("The priority user cannot also be the blocked user");
        }

        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }

    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes the Discord token.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: commands {}\n  \
            Permissions: DJ role '{}', priority user {}, blocked user {}\n  \
            Ambient: default '{}', everyone={}\n  \
            Timeouts: connect {}, resolve {}, idle sessions {}\n  \
            Data: {}",
            self.guild_id
                .map_or("global".to_string(), |id| format!("in guild {id}")),
            self.dj_role_name,
            self.priority_user_id
                .map_or("none".to_string(), |id| id.to_string()),
            self.blocked_user_id
                .map_or("none".to_string(), |id| id.to_string()),
            self.ambient_default_sound,
            self.ambient_for_everyone,
            humantime::format_duration(self.connect_timeout()),
            humantime::format_duration(self.resolve_timeout()),
            humantime::format_duration(self.session_idle()),
            self.data_dir.display()
        )
    }
}

fn optional_id(key: &str) -> Result<Option<u64>> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(Some(value.trim().parse()?)),
        _ => Ok(None),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (sin valor por defecto - debe proveerse)
            discord_token: String::new(),
            guild_id: None,

            priority_user_id: None,
            blocked_user_id: None,
            dj_role_name: "DJ".to_string(),

            ambient_default_sound: "audio/welcome.mp3".to_string(),
            ambient_for_everyone: false,

            data_dir: "./data".into(),

            connect_timeout_secs: 15,
            resolve_timeout_secs: 30,
            session_idle_secs: 3600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let config = Config {
            connect_timeout_secs: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            resolve_timeout_secs: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn blank_role_is_rejected() {
        let config = Config {
            dj_role_name: "  ".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn priority_user_cannot_be_blocked() {
        let config = Config {
            priority_user_id: Some(7),
            blocked_user_id: Some(7),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn summary_hides_the_token() {
        let config = Config {
            discord_token: "super-secret".to_string(),
            priority_user_id: Some(42),
            ..Config::default()
        };
        let summary = config.summary();
        assert!(!summary.contains("super-secret"));
        assert!(summary.contains("priority user 42"));
        assert!(summary.contains("connect 15s"));
    }
}
