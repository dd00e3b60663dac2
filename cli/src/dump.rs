use clap::{self, Args};
use itertools::Itertools;

use afap::ids::{app_id_of, user_id_of, UserId};
use afap::service::AccessEntry;
use afap::{CallerIdentity, Context};

use crate::device::Device;

/// Print every stored access entry
#[derive(Args)]
pub struct Dump {
    /// Only print entries stored for this user
    #[arg(long)]
    user: Option<UserId>,

    /// Output JSON
    #[arg(short, long, action = clap::ArgAction::SetTrue)]
    json: bool,
}

impl Dump {
    pub fn run(&self, ctx: &dyn Context, _caller: &CallerIdentity) -> anyhow::Result<()> {
        let device = Device::open(ctx)?;
        let entries = device
            .service
            .dump()
            .into_iter()
            .filter(|it| self.user.map_or(true, |user| it.user_id == user))
            .collect::<Vec<AccessEntry>>();

        if self.json {
            println!("{}", serde_json::to_string_pretty(&entries)?);
            return Ok(());
        }

        for (user_id, user_entries) in &entries.iter().chunk_by(|it| it.user_id) {
            println!("user {}", user_id);
            for entry in user_entries {
                println!("  {}", format_entry(entry));
            }
        }
        Ok(())
    }
}

fn format_entry(entry: &AccessEntry) -> String {
    format!(
        "agent {} -> target {} (user {} app {}): {}",
        entry.agent_app_id,
        entry.target_uid,
        user_id_of(entry.target_uid),
        app_id_of(entry.target_uid),
        entry.flags
    )
}
