use std::fmt::{Display, Formatter};
use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// The grant/deny decisions recorded for one agent and target pair.
///
/// Two independent authorities may record a decision: the user (`USER_*`) and
/// anything else such as device policy or the shell (`OTHER_*`). Each authority
/// has an opposing granted/denied pair. `PREGRANTED` is the default used when
/// neither authority has spoken.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessFlags(u32);

const NAMES: &[(AccessFlags, &str)] = &[
    (AccessFlags::PREGRANTED, "PREGRANTED"),
    (AccessFlags::OTHER_GRANTED, "OTHER_GRANTED"),
    (AccessFlags::OTHER_DENIED, "OTHER_DENIED"),
    (AccessFlags::USER_GRANTED, "USER_GRANTED"),
    (AccessFlags::USER_DENIED, "USER_DENIED"),
];

/// The opposing pairs, each given as (granted, denied)
const OPPOSING_PAIRS: &[(AccessFlags, AccessFlags)] = &[
    (AccessFlags::USER_GRANTED, AccessFlags::USER_DENIED),
    (AccessFlags::OTHER_GRANTED, AccessFlags::OTHER_DENIED),
];

impl AccessFlags {
    pub const EMPTY: Self = Self(0);
    pub const PREGRANTED: Self = Self(1);
    pub const OTHER_GRANTED: Self = Self(1 << 1);
    pub const OTHER_DENIED: Self = Self(1 << 2);
    pub const USER_GRANTED: Self = Self(1 << 3);
    pub const USER_DENIED: Self = Self(1 << 4);

    pub const MASK_USER: Self = Self(Self::USER_GRANTED.0 | Self::USER_DENIED.0);
    pub const MASK_OTHER: Self = Self(Self::OTHER_GRANTED.0 | Self::OTHER_DENIED.0);
    pub const MASK_ALL: Self = Self(Self::PREGRANTED.0 | Self::MASK_OTHER.0 | Self::MASK_USER.0);

    #[inline]
    pub const fn from_bits_retain(bits: u32) -> Self {
        Self(bits)
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if every bit of `other` is set
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if any bit of `other` is set
    #[inline]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Apply `flags` to the bits selected by `mask`, leaving the others alone
    #[inline]
    pub fn update(self, mask: Self, flags: Self) -> Self {
        (self & !mask) | (flags & mask)
    }

    /// See [resolve_grant]
    #[inline]
    pub fn is_granted(self) -> bool {
        resolve_grant(self)
    }
}

/// Check that a `flags`/`mask` pair may be applied to a stored flag word.
///
/// Setting one side of an opposing pair requires the mask to cover the other
/// side as well, so that the stale opposite can never survive an update.
pub fn validate_flags(flags: AccessFlags, mask: AccessFlags) -> crate::Result<()> {
    if !AccessFlags::MASK_ALL.contains(flags) {
        return Err(Error::InvalidArgument(format!(
            "invalid access flags {:#x}",
            flags.bits()
        )));
    }

    if flags & mask != flags {
        return Err(Error::InvalidArgument(format!(
            "access flags {} are not covered by the mask {}",
            flags, mask
        )));
    }

    for (granted, denied) in OPPOSING_PAIRS {
        let pair = *granted | *denied;
        if flags.contains(pair) {
            return Err(Error::InvalidArgument(format!(
                "opposing access flags {} cannot both be set",
                pair
            )));
        }
        if flags.intersects(pair) && !mask.contains(pair) {
            return Err(Error::InvalidArgument(format!(
                "setting {} requires the mask to include {}",
                flags & pair,
                pair
            )));
        }
    }

    Ok(())
}

/// Decide whether a flag word grants access.
///
/// Strict precedence: any USER bit decides, otherwise any OTHER bit decides,
/// otherwise PREGRANTED decides.
pub fn resolve_grant(flags: AccessFlags) -> bool {
    if flags.intersects(AccessFlags::MASK_USER) {
        flags.contains(AccessFlags::USER_GRANTED)
    } else if flags.intersects(AccessFlags::MASK_OTHER) {
        flags.contains(AccessFlags::OTHER_GRANTED)
    } else {
        flags.contains(AccessFlags::PREGRANTED)
    }
}

impl BitAnd for AccessFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        Self(self.0 & rhs.0)
    }
}

impl BitAndAssign for AccessFlags {
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

impl BitOr for AccessFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for AccessFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl Not for AccessFlags {
    type Output = Self;

    fn not(self) -> Self::Output {
        Self(!self.0)
    }
}

impl From<u32> for AccessFlags {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<AccessFlags> for u32 {
    fn from(value: AccessFlags) -> Self {
        value.0
    }
}

impl Display for AccessFlags {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "0");
        }

        let mut first = true;
        let mut remaining = *self;
        for (flag, name) in NAMES {
            if !self.contains(*flag) {
                continue;
            }
            if !first {
                write!(f, "|")?;
            }
            write!(f, "{}", name)?;
            first = false;
            remaining &= !*flag;
        }

        if !remaining.is_empty() {
            if !first {
                write!(f, "|")?;
            }
            write!(f, "{:#x}", remaining.bits())?;
        }
        Ok(())
    }
}

fn parse_flag_name(raw: &str) -> Option<AccessFlags> {
    let upper = raw.trim().to_ascii_uppercase().replace('-', "_");
    let name = upper.strip_prefix("ACCESS_FLAG_").unwrap_or(&upper);
    match name {
        "MASK_USER" => return Some(AccessFlags::MASK_USER),
        "MASK_OTHER" => return Some(AccessFlags::MASK_OTHER),
        "MASK_ALL" => return Some(AccessFlags::MASK_ALL),
        _ => {}
    }
    NAMES
        .iter()
        .find(|(_, n)| *n == name)
        .map(|(flag, _)| *flag)
}

fn parse_flag_number(raw: &str) -> Option<AccessFlags> {
    let raw = raw.trim();
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => raw.parse::<u32>(),
    };
    parsed.ok().map(AccessFlags)
}

impl FromStr for AccessFlags {
    type Err = Error;

    /// Parses `USER_GRANTED|OTHER_DENIED`, `user-granted,other-denied`,
    /// `ACCESS_FLAG_USER_GRANTED` or a plain decimal / `0x` integer
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut flags = AccessFlags::EMPTY;
        for part in s.split(|c| c == '|' || c == ',') {
            if part.trim().is_empty() {
                continue;
            }
            let flag = parse_flag_number(part)
                .or_else(|| parse_flag_name(part))
                .ok_or_else(|| Error::InvalidArgument(format!("unknown access flag `{}`", part)))?;
            flags |= flag;
        }
        Ok(flags)
    }
}

/// The effective outcome of an access request, derived on every query
#[repr(i32)]
#[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessRequestState {
    Granted = 0,
    Denied = 1,
    /// The agent or target is not eligible, so access cannot even be requested
    Unrequestable = 2,
}

impl From<AccessRequestState> for i32 {
    fn from(value: AccessRequestState) -> Self {
        value as i32
    }
}

impl Display for AccessRequestState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Granted => "granted",
                Self::Denied => "denied",
                Self::Unrequestable => "unrequestable",
            }
        )
    }
}
