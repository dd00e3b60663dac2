use std::path::PathBuf;

use anyhow::{bail, Context as AnyhowContext};
use clap::{self, Args};
use itertools::Itertools;

use afap::utils::path_str;
use afap::{AgentAllowlist, CallerIdentity, Context};

use crate::device::Device;

/// Replace the agent allowlist
///
/// Agents that are no longer allowed lose every access they were granted.
/// The allowlist is stored next to the access state and takes precedence over
/// the one in the device description until `--reset` is used.
#[derive(Args)]
pub struct SetAllowlist {
    /// Allowlist entries, `package` or `package:HEXDIGEST`
    #[arg()]
    entries: Vec<String>,

    /// Read the entries from a newline separated file instead
    #[arg(short, long, conflicts_with = "entries")]
    file: Option<PathBuf>,

    /// Turn allowlist enforcement off
    #[arg(long, action = clap::ArgAction::SetTrue, conflicts_with_all = ["entries", "file", "reset"])]
    disable: bool,

    /// Forget the stored allowlist and go back to the device description
    #[arg(long, action = clap::ArgAction::SetTrue, conflicts_with_all = ["entries", "file"])]
    reset: bool,

    /// Only print the allowlist currently in effect
    #[arg(long, action = clap::ArgAction::SetTrue, conflicts_with_all = ["entries", "file", "disable", "reset"])]
    show: bool,
}

impl SetAllowlist {
    pub fn run(&self, ctx: &dyn Context, caller: &CallerIdentity) -> anyhow::Result<()> {
        let device = Device::open(ctx)?;

        if self.show {
            match device.service.get_agent_allowlist() {
                Some(allowlist) => {
                    println!("{}", allowlist.entries().iter().join("\n"));
                }
                None => println!("not enforced"),
            }
            return Ok(());
        }

        if self.reset {
            device.forget_allowlist()?;
            log::info!(
                "removed stored allowlist {}",
                path_str(&device.get_allowlist_file())
            );
            return Ok(());
        }

        let allowlist = self.get_allowlist()?;
        device
            .service
            .set_agent_allowlist(caller, allowlist.clone())?;
        device.store_allowlist(allowlist.as_ref())?;
        device.flush();
        Ok(())
    }

    fn get_allowlist(&self) -> anyhow::Result<Option<AgentAllowlist>> {
        if self.disable {
            return Ok(None);
        }
        let allowlist = match &self.file {
            Some(path) => AgentAllowlist::from_file(path)
                .with_context(|| format!("reading {}", path_str(path)))?,
            None => AgentAllowlist::parse(&self.entries)?,
        };
        if allowlist.is_empty() {
            bail!("no allowlist entries given, use --disable to turn enforcement off");
        }
        Ok(Some(allowlist))
    }
}
