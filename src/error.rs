//! Contains the main error type for the library.
use thiserror::Error;

/// The main error type for the library. Each module has it's own error type that is contained by
/// this error.
#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("Not Found")]
    NotFound,
    #[error("Malformed Frame")]
    MalformedFrame,
    #[error("Invalid Configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("I/O Error: {0:?}")]
    Io(std::io::ErrorKind),
    #[error(transparent)]
    FlashError(#[from] crate::flash::Error),
    #[error(transparent)]
    IsoTPError(#[from] crate::isotp::Error),
    #[error(transparent)]
    ScriptError(#[from] crate::script::Error),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::Io(err.kind())
    }
}
