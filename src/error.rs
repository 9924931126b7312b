use thiserror::Error;

use crate::simulation::Collision;

/// Errors returned by session, mapper and channel operations.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("unknown entity '{0}'")]
    UnknownEntity(String),

    #[error("invalid hint: {0}")]
    InvalidHint(String),

    /// Every collision found in the offending step.
    #[error("collision detected: {}", list_collisions(.0))]
    CollisionDetected(Vec<Collision>),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("session is closed")]
    SessionClosed,

    #[error(transparent)]
    Motion(#[from] anyhow::Error),
}

impl ControlError {
    /// Stable code used on the command channel.
    pub fn code(&self) -> &'static str {
        match self {
            ControlError::UnknownEntity(_) => "unknown_entity",
            ControlError::InvalidHint(_) => "invalid_hint",
            ControlError::CollisionDetected(_) => "collision_detected",
            ControlError::InvalidArgument(_) => "invalid_argument",
            ControlError::SessionClosed => "session_closed",
            ControlError::Motion(_) => "motion_error",
        }
    }
}

fn list_collisions(collisions: &[Collision]) -> String {
    collisions.iter().map(|c| c.to_string()).collect::<Vec<_>>().join("; ")
}

pub type Result<T> = std::result::Result<T, ControlError>;
