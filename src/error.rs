//! The top of the error taxonomy. Lower layers have their own error types;
//! this one just gathers them so `?` works all the way up to `main`.

use crate::audio_source::SourceError;
use crate::config::ConfigError;
use crate::gui::GuiError;
use crate::link::LinkError;

use std::{borrow::Cow, fmt};

/// Anything that can end a choreography run early.
#[derive(Debug)]
pub enum ChoreoError {
    /// The printer stopped answering, or the port failed
    Link(LinkError),
    /// The audio source failed (running out is not an error)
    Source(SourceError),
    /// The configuration could not be loaded
    Config(ConfigError),
    /// The terminal front end failed
    Gui(GuiError),
}

impl fmt::Display for ChoreoError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            ChoreoError::Link(e) => Cow::from(format!("link: {}", e)),
            ChoreoError::Source(e) => Cow::from(format!("audio: {}", e)),
            ChoreoError::Config(e) => Cow::from(format!("config: {}", e)),
            ChoreoError::Gui(e) => Cow::from(format!("terminal: {}", e)),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for ChoreoError {}

impl From<LinkError> for ChoreoError {
    fn from(value: LinkError) -> Self {
        Self::Link(value)
    }
}

impl From<SourceError> for ChoreoError {
    fn from(value: SourceError) -> Self {
        Self::Source(value)
    }
}

impl From<ConfigError> for ChoreoError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<GuiError> for ChoreoError {
    fn from(value: GuiError) -> Self {
        Self::Gui(value)
    }
}
