use std::io;
use std::path::Path;

use thiserror::Error;

use crate::utils::path_str;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The caller lacks a permission required by the operation
    #[error("security exception: {0}")]
    Security(String),

    /// Persisted state is corrupt
    #[error("failed to parse persisted state: {0}")]
    Parse(String),

    #[error("xml error: {0}")]
    Xml(quick_xml::Error),

    #[error("{0}")]
    IO(io::Error),

    #[error("missing required env var: {0}")]
    MissingEnv(String),

    #[error("failed to get basedirs")]
    NoBaseDirs,

    #[error("file {0} doesn't exist")]
    MissingFile(String),

    #[error("invalid config {0}: {1}")]
    InvalidConfig(String, String),

    #[error("generic error: {0}")]
    Generic(String),
}

impl Error {
    pub fn new_generic<S: ToString + ?Sized>(s: &S) -> Self {
        Self::Generic(s.to_string())
    }

    pub fn new_cfg<S: ToString + ?Sized>(path: &Path, s: &S) -> Self {
        Self::InvalidConfig(path_str(path).into_owned(), s.to_string())
    }

    pub fn invalid_argument<S: ToString + ?Sized>(s: &S) -> Self {
        Self::InvalidArgument(s.to_string())
    }

    pub fn parse<S: ToString + ?Sized>(s: &S) -> Self {
        Self::Parse(s.to_string())
    }

    pub fn is_security(&self) -> bool {
        matches!(self, Self::Security(_))
    }
}

impl From<quick_xml::Error> for Error {
    fn from(err: quick_xml::Error) -> Self {
        Self::Xml(err)
    }
}

impl From<quick_xml::events::attributes::AttrError> for Error {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for Error {
    fn from(value: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self::Generic(value.to_string())
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::IO(err)
    }
}
