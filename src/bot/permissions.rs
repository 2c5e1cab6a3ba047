use serenity::model::id::UserId;
use thiserror::Error;

use crate::config::Config;

/// Verbos de usuario que pasan por el control de permisos
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Play,
    Pause,
    Resume,
    Skip,
    Queue,
    Clear,
    Stop,
    AmbientSet,
    AmbientRemove,
    AmbientList,
}

impl Verb {
    pub fn from_command(name: &str, subcommand: Option<&str>) -> Option<Self> {
        let verb = match (name, subcommand) {
            ("play", _) => Self::Play,
            ("pause", _) => Self::Pause,
            ("resume", _) => Self::Resume,
            ("skip", _) => Self::Skip,
            ("queue", _) => Self::Queue,
            ("clear", _) => Self::Clear,
            ("stop", _) => Self::Stop,
            ("ambient", Some("set")) => Self::AmbientSet,
            ("ambient", Some("remove")) => Self::AmbientRemove,
            ("ambient", Some("list")) => Self::AmbientList,
            _ => return None,
        };
        Some(verb)
    }

    fn priority_only(self) -> bool {
        matches!(
            self,
            Self::Skip | Self::Clear | Self::Stop | Self::AmbientSet | Self::AmbientRemove
        )
    }

    fn describe(self) -> &'static str {
        match self {
            Self::Play => "play music",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Skip => "skip songs",
            Self::Queue => "view the queue",
            Self::Clear => "clear the queue",
            Self::Stop => "stop the music",
            Self::AmbientSet | Self::AmbientRemove => "change welcome sounds",
            Self::AmbientList => "list welcome sounds",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Denial {
    #[error("nu uh. Not you")]
    Blocked,
    #[error("You don't have permission to use this command (requires the {0} role).")]
    MissingRole(String),
    #[error("You don't have permission to {}.", .0.describe())]
    PriorityOnly(Verb),
}

/// Quién puede invocar qué
#[derive(Debug, Clone)]
pub struct PermissionPolicy {
    priority_user: Option<UserId>,
    blocked_user: Option<UserId>,
    dj_role_name: String,
}

impl PermissionPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            priority_user: config.priority_user_id.map(UserId::new),
            blocked_user: config.blocked_user_id.map(UserId::new),
            dj_role_name: config.dj_role_name.clone(),
        }
    }

    pub fn is_priority(&self, user_id: UserId) -> bool {
        self.priority_user == Some(user_id)
    }

    /// `role_names` son los nombres de los roles del miembro en el guild
    pub fn check(&self, verb: Verb, user_id: UserId, role_names: &[String]) -> Result<(), Denial> {
        if self.blocked_user == Some(user_id) {
            return Err(Denial::Blocked);
        }

        if !role_names.iter().any(|role| role == &self.dj_role_name) {
            return Err(Denial::MissingRole(self.dj_role_name.clone()));
        }

        if verb.priority_only() && self.priority_user.is_some() && !self.is_priority(user_id) {
            return Err(Denial::PriorityOnly(verb));
        }

        Ok(())
    }
}
