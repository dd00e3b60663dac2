use std::collections::HashSet;
use std::fmt::Display;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use serde::Serialize;

use crate::package::PackageState;
use crate::utils::{bytes_from_hex, bytes_to_hex, NewlineReader};
use crate::Error;

/// One allowlisted agent: a package name, optionally pinned to a signing
/// certificate digest
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct AllowlistEntry {
    pub package_name: String,
    #[serde(serialize_with = "serialize_digest")]
    pub certificate_digest: Option<Vec<u8>>,
}

fn serialize_digest<S: serde::Serializer>(
    digest: &Option<Vec<u8>>,
    ser: S,
) -> Result<S::Ok, S::Error> {
    match digest {
        Some(d) => ser.serialize_some(&bytes_to_hex(d)),
        None => ser.serialize_none(),
    }
}

impl AllowlistEntry {
    pub fn new(package_name: &str) -> Self {
        Self {
            package_name: String::from(package_name),
            certificate_digest: None,
        }
    }

    pub fn signed(package_name: &str, digest: Vec<u8>) -> Self {
        Self {
            package_name: String::from(package_name),
            certificate_digest: Some(digest),
        }
    }

    pub fn matches(&self, package: &PackageState) -> bool {
        if self.package_name != package.package_name {
            return false;
        }
        match &self.certificate_digest {
            None => true,
            Some(digest) => package.has_signing_certificate_digest(digest),
        }
    }
}

/// Entries are written as `package` or `package:HEXDIGEST`
impl FromStr for AllowlistEntry {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (name, digest) = match s.split_once(':') {
            Some((name, hex)) => {
                let digest = bytes_from_hex(hex).ok_or_else(|| {
                    Error::invalid_argument(&format!("invalid certificate digest in {s}"))
                })?;
                if digest.is_empty() {
                    return Err(Error::invalid_argument(&format!(
                        "empty certificate digest in {s}"
                    )));
                }
                (name, Some(digest))
            }
            None => (s, None),
        };
        if name.is_empty() {
            return Err(Error::invalid_argument(&format!(
                "missing package name in allowlist entry `{s}`"
            )));
        }
        Ok(Self {
            package_name: String::from(name),
            certificate_digest: digest,
        })
    }
}

impl Display for AllowlistEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.certificate_digest {
            Some(d) => write!(f, "{}:{}", self.package_name, bytes_to_hex(d)),
            None => write!(f, "{}", self.package_name),
        }
    }
}

/// The set of packages allowed to act as agents. Whether an allowlist is
/// enforced at all is expressed by wrapping this in an `Option`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentAllowlist {
    entries: Vec<AllowlistEntry>,
    #[serde(skip)]
    names: HashSet<String>,
}

impl AgentAllowlist {
    pub fn new(entries: Vec<AllowlistEntry>) -> Self {
        let names = entries.iter().map(|it| it.package_name.clone()).collect();
        Self { entries, names }
    }

    pub fn parse<S: AsRef<str>>(raw: &[S]) -> crate::Result<Self> {
        let entries = raw
            .iter()
            .map(|it| it.as_ref().parse())
            .collect::<crate::Result<Vec<AllowlistEntry>>>()?;
        Ok(Self::new(entries))
    }

    /// Read a newline separated allowlist, `#` starts a comment line
    pub fn from_reader<R: Read>(reader: R) -> crate::Result<Self> {
        let mut entries = Vec::new();
        for line in NewlineReader::new(reader) {
            entries.push(line?.parse()?);
        }
        Ok(Self::new(entries))
    }

    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let file = crate::utils::open_file(path)?;
        Self::from_reader(file)
    }

    pub fn entries(&self) -> &[AllowlistEntry] {
        self.entries.as_slice()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_package_name(&self, package_name: &str) -> bool {
        self.names.contains(package_name)
    }

    pub fn matches(&self, package: &PackageState) -> bool {
        self.contains_package_name(&package.package_name)
            && self.entries.iter().any(|it| it.matches(package))
    }
}
