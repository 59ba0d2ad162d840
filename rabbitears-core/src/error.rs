//! Error handling.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors the simulator core can produce.
#[derive(Error, Debug)]
#[must_use]
pub enum Error {
    /// A reception referenced a station index outside the station table.
    #[error("reception references unknown station {0}")]
    UnknownStation(usize),
    /// A control scenario was well-formed JSON but semantically unusable.
    #[error("scenario error: {0}")]
    Scenario(String),
    /// A control scenario could not be parsed.
    #[error(transparent)]
    ScenarioParse(#[from] serde_json::Error),
}

impl Error {
    pub fn scenario(msg: impl Into<String>) -> Self {
        Self::Scenario(msg.into())
    }
}
