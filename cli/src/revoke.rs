use clap::Args;

use afap::{CallerIdentity, Context};

use crate::device::Device;
use crate::parsers::{PackageRef, PackageRefValueParser};

/// Revoke an agent's own access to a target, acting as the agent
#[derive(Args)]
pub struct RevokeSelf {
    /// The agent giving up its access, as `package[@user]`
    #[arg(value_parser = PackageRefValueParser)]
    agent: PackageRef,

    /// The target package, always in the agent's user
    #[arg()]
    target: String,
}

impl RevokeSelf {
    /// The global caller is ignored, the call is made as `agent` itself
    pub fn run(&self, ctx: &dyn Context, _caller: &CallerIdentity) -> anyhow::Result<()> {
        let device = Device::open(ctx)?;
        let caller = device.caller_for(&self.agent)?;
        let changed = device
            .service
            .revoke_self_access(&caller, &self.agent.package, &self.target)?;
        device.flush();
        println!("{}", if changed { "revoked" } else { "unchanged" });
        Ok(())
    }
}
