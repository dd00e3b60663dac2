use clap::error::ErrorKind;
use std::fmt::Display;

mod package_ref;
pub use package_ref::{PackageRef, PackageRefValueParser};

mod access_flags;
pub use access_flags::AccessFlagsValueParser;

pub fn simple_error(err: impl Display) -> clap::Error {
    clap::Error::raw(ErrorKind::InvalidValue, format!("{}\n", err))
}
