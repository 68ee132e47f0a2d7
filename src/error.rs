use thiserror::Error;

use crate::placement::Phase;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("component `{0}` is already registered")]
    DuplicateComponent(String),

    #[error("unknown component `{0}`")]
    UnknownComponentReference(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("could not place component `{component}` during {phase}")]
    PlacementFailure { component: String, phase: Phase },

    #[error("engine run panicked: {0}")]
    RunPanicked(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
