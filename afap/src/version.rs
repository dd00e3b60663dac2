use std::fmt::Display;

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub struct Version {
    pub major: usize,
    pub minor: usize,
    pub patch: usize,
}

const fn parse_component(raw: &str) -> usize {
    let bytes = raw.as_bytes();
    let mut value = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        value = value * 10 + (bytes[i] - b'0') as usize;
        i += 1;
    }
    value
}

pub const VERSION: Version = Version {
    major: parse_component(env!("CARGO_PKG_VERSION_MAJOR")),
    minor: parse_component(env!("CARGO_PKG_VERSION_MINOR")),
    patch: parse_component(env!("CARGO_PKG_VERSION_PATCH")),
};

/// Version of the on-disk state format written under `<access version="">`
pub const STATE_FORMAT_VERSION: i32 = 1;

impl Default for Version {
    fn default() -> Self {
        VERSION
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
