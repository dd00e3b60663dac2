use clap::{self, Args};
use itertools::Itertools;

use afap::ids::{UserId, USER_SYSTEM};
use afap::{CallerIdentity, Context};

use crate::device::Device;

#[derive(Args)]
pub struct ListAgents {
    #[command(flatten)]
    opts: ListOpts,
}

#[derive(Args)]
pub struct ListTargets {
    #[command(flatten)]
    opts: ListOpts,
}

#[derive(Args)]
struct ListOpts {
    /// The user to list packages for
    #[arg(long, default_value_t = USER_SYSTEM)]
    user: UserId,

    /// Output a JSON array
    #[arg(short, long, action = clap::ArgAction::SetTrue)]
    json: bool,
}

impl ListOpts {
    fn print(&self, names: Vec<String>) -> anyhow::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(&names)?);
        } else if !names.is_empty() {
            println!("{}", names.iter().sorted().join("\n"));
        }
        Ok(())
    }
}

impl ListAgents {
    pub fn run(&self, ctx: &dyn Context, caller: &CallerIdentity) -> anyhow::Result<()> {
        let device = Device::open(ctx)?;
        let agents = device.service.get_valid_agents(caller, self.opts.user)?;
        self.opts.print(agents)
    }
}

impl ListTargets {
    pub fn run(&self, ctx: &dyn Context, caller: &CallerIdentity) -> anyhow::Result<()> {
        let device = Device::open(ctx)?;
        let targets = device.service.get_valid_targets(caller, self.opts.user)?;
        self.opts.print(targets)
    }
}
