pub mod ids;

pub mod flags;
pub use flags::{AccessFlags, AccessRequestState};

pub mod manifest;
pub use manifest::Manifest;

pub mod package;
pub use package::{PackageSnapshot, PackageState, PackageStateProvider, SharedPackageSnapshot};

pub mod allowlist;
pub use allowlist::AgentAllowlist;

pub mod context;
pub use context::{Context, DefaultContext};

pub mod config;

pub mod errors;
pub use errors::{Error, Result};

pub mod xml;

pub mod state;

pub mod persistence;

pub mod policy;

pub mod service;
pub use service::{AccessService, CallerIdentity};

pub mod version;
pub use version::VERSION;

pub mod utils;

#[cfg(test)]
pub mod testing;
