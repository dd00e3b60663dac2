use clap::{self, Args, ValueEnum};

use afap::{AccessFlags, CallerIdentity, Context};

use crate::access::AccessPair;
use crate::device::Device;
use crate::parsers::AccessFlagsValueParser;

#[derive(Args)]
pub struct UpdateFlags {
    #[command(flatten)]
    pair: AccessPair,

    /// The flags to change, either names like `USER_GRANTED|USER_DENIED` or
    /// an integer
    #[arg(short, long, value_parser = AccessFlagsValueParser)]
    mask: AccessFlags,

    /// The new values of the flags in the mask, flags outside of the mask are
    /// left untouched. Defaults to clearing everything in the mask.
    #[arg(short, long, value_parser = AccessFlagsValueParser)]
    flags: Option<AccessFlags>,
}

impl UpdateFlags {
    pub fn run(&self, ctx: &dyn Context, caller: &CallerIdentity) -> anyhow::Result<()> {
        let device = Device::open(ctx)?;
        let flags = self.flags.unwrap_or(AccessFlags::EMPTY);
        update(&device, caller, &self.pair, self.mask, flags)
    }
}

/// Which pair of grant/deny flags to set
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Tier {
    /// The decision a user made in the settings UI
    User,
    /// A decision made on the user's behalf, e.g. by device policy
    Other,
}

impl Tier {
    fn mask(self) -> AccessFlags {
        match self {
            Self::User => AccessFlags::MASK_USER,
            Self::Other => AccessFlags::MASK_OTHER,
        }
    }

    fn granted(self) -> AccessFlags {
        match self {
            Self::User => AccessFlags::USER_GRANTED,
            Self::Other => AccessFlags::OTHER_GRANTED,
        }
    }

    fn denied(self) -> AccessFlags {
        match self {
            Self::User => AccessFlags::USER_DENIED,
            Self::Other => AccessFlags::OTHER_DENIED,
        }
    }
}

#[derive(Args)]
pub struct Grant {
    #[command(flatten)]
    pair: AccessPair,

    #[arg(short, long, value_enum, default_value_t = Tier::User)]
    tier: Tier,
}

impl Grant {
    pub fn run(&self, ctx: &dyn Context, caller: &CallerIdentity) -> anyhow::Result<()> {
        let device = Device::open(ctx)?;
        update(
            &device,
            caller,
            &self.pair,
            self.tier.mask(),
            self.tier.granted(),
        )
    }
}

#[derive(Args)]
pub struct Deny {
    #[command(flatten)]
    pair: AccessPair,

    #[arg(short, long, value_enum, default_value_t = Tier::User)]
    tier: Tier,
}

impl Deny {
    pub fn run(&self, ctx: &dyn Context, caller: &CallerIdentity) -> anyhow::Result<()> {
        let device = Device::open(ctx)?;
        update(
            &device,
            caller,
            &self.pair,
            self.tier.mask(),
            self.tier.denied(),
        )
    }
}

fn update(
    device: &Device,
    caller: &CallerIdentity,
    pair: &AccessPair,
    mask: AccessFlags,
    flags: AccessFlags,
) -> anyhow::Result<()> {
    let AccessPair { agent, target } = pair;
    let changed = device.service.update_access_flags(
        caller,
        &agent.package,
        agent.user,
        &target.package,
        target.user,
        mask,
        flags,
    )?;
    device.flush();
    if changed {
        log::info!("{} -> {}: set {} in {}", agent, target, flags, mask);
        println!("updated");
    } else {
        println!("unchanged");
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use afap::flags::validate_flags;
    use rstest::*;

    #[rstest]
    #[case(Tier::User)]
    #[case(Tier::Other)]
    fn test_tier_flags_are_valid(#[case] tier: Tier) {
        assert!(validate_flags(tier.granted(), tier.mask()).is_ok());
        assert!(validate_flags(tier.denied(), tier.mask()).is_ok());
        assert!(tier.mask().contains(tier.granted() | tier.denied()));
    }
}
