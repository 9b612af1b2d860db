use std::{error::Error, fmt::Display, sync::mpsc};

/// What can go wrong in the terminal front end.
#[derive(Debug)]
pub enum GuiError {
    /// The terminal could not be driven
    IOError(std::io::Error),
    /// The worker went away without handing back a result
    MPSCTryRecvError(mpsc::TryRecvError),
    /// The worker thread panicked
    JoinError,
}

impl Display for GuiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#?}", self)
    }
}

impl Error for GuiError {}

impl From<std::io::Error> for GuiError {
    fn from(value: std::io::Error) -> Self {
        Self::IOError(value)
    }
}

impl From<mpsc::TryRecvError> for GuiError {
    fn from(value: mpsc::TryRecvError) -> Self {
        Self::MPSCTryRecvError(value)
    }
}
