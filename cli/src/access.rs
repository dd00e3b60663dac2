use clap::{self, Args};

use afap::{CallerIdentity, Context};

use crate::device::Device;
use crate::parsers::{PackageRef, PackageRefValueParser};

/// An agent and a target, each written as `package[@user]`
#[derive(Args)]
pub struct AccessPair {
    /// The agent package
    #[arg(value_parser = PackageRefValueParser)]
    pub agent: PackageRef,

    /// The target package
    #[arg(value_parser = PackageRefValueParser)]
    pub target: PackageRef,
}

#[derive(Args)]
pub struct GetState {
    #[command(flatten)]
    pair: AccessPair,

    /// Print the numeric state instead of its name
    #[arg(short, long, action = clap::ArgAction::SetTrue)]
    numeric: bool,
}

impl GetState {
    pub fn run(&self, ctx: &dyn Context, caller: &CallerIdentity) -> anyhow::Result<()> {
        let device = Device::open(ctx)?;
        let AccessPair { agent, target } = &self.pair;
        let state = device.service.get_access_request_state(
            caller,
            &agent.package,
            agent.user,
            &target.package,
            target.user,
        )?;
        if self.numeric {
            println!("{}", i32::from(state));
        } else {
            println!("{}", state);
        }
        Ok(())
    }
}

#[derive(Args)]
pub struct CheckAccess {
    #[command(flatten)]
    pair: AccessPair,
}

impl CheckAccess {
    pub fn run(&self, ctx: &dyn Context, caller: &CallerIdentity) -> anyhow::Result<()> {
        let device = Device::open(ctx)?;
        let AccessPair { agent, target } = &self.pair;
        let granted = device.service.check_access(
            caller,
            &agent.package,
            agent.user,
            &target.package,
            target.user,
        )?;
        println!("{}", granted);
        Ok(())
    }
}

#[derive(Args)]
pub struct GetFlags {
    #[command(flatten)]
    pair: AccessPair,

    /// Print the raw integer value
    #[arg(short, long, action = clap::ArgAction::SetTrue)]
    raw: bool,
}

impl GetFlags {
    pub fn run(&self, ctx: &dyn Context, caller: &CallerIdentity) -> anyhow::Result<()> {
        let device = Device::open(ctx)?;
        let AccessPair { agent, target } = &self.pair;
        let flags = device.service.get_access_flags(
            caller,
            &agent.package,
            agent.user,
            &target.package,
            target.user,
        )?;
        if self.raw {
            println!("{}", flags.bits());
        } else {
            println!("{}", flags);
        }
        Ok(())
    }
}
