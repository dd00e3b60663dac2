use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context as AnyhowContext};
use itertools::Itertools;

use afap::config::DeviceConfig;
use afap::ids::uid_of;
use afap::service::{Collaborators, PackagePermissionEnforcer, SnapshotUserOracle};
use afap::utils::{path_str, write_file_atomic};
use afap::{
    AccessService, AgentAllowlist, CallerIdentity, Context, PackageStateProvider,
    SharedPackageSnapshot,
};

use crate::parsers::PackageRef;

/// Name of the file under the state directory holding an allowlist set with
/// `afap set-allowlist`. When present it replaces the allowlist from the
/// device description, an empty file turns enforcement off.
pub const ALLOWLIST_FILE_NAME: &str = "agent_allowlist.txt";

/// The device described by `afap.toml` together with the access state
/// persisted for it
pub struct Device {
    pub service: AccessService,
    pub packages: Arc<SharedPackageSnapshot>,
    pub state_dir: PathBuf,
}

impl Device {
    pub fn open(ctx: &dyn Context) -> anyhow::Result<Self> {
        let cfg = match ctx.get_config().with_context(|| "loading device description")? {
            Some(cfg) => cfg,
            None => {
                let path = ctx.get_config_file()?;
                return Err(anyhow!(
                    "no device description found, create {}",
                    path_str(&path)
                ));
            }
        };
        let device = DeviceConfig::from_config(cfg)
            .with_context(|| format!("parsing {}", path_str(cfg.get_path())))?;
        let state_dir = ctx.get_state_dir()?;

        let packages = Arc::new(SharedPackageSnapshot::new(device.packages));
        let collaborators = Collaborators {
            packages: Arc::clone(&packages) as Arc<dyn PackageStateProvider>,
            enforcer: Arc::new(PackagePermissionEnforcer::new(Arc::clone(&packages))),
            users: Arc::new(SnapshotUserOracle::new(Arc::clone(&packages))),
        };

        let service = AccessService::open(&state_dir, collaborators)
            .with_context(|| format!("loading access state from {}", path_str(&state_dir)))?;

        let allowlist = match load_allowlist_override(&state_dir)? {
            Some(stored) => stored,
            None => device.allowlist,
        };
        if let Some(allowlist) = allowlist {
            log::debug!("enforcing an allowlist of {} agents", allowlist.entries().len());
            service.apply_agent_allowlist(Some(allowlist))?;
        }

        Ok(Self {
            service,
            packages,
            state_dir,
        })
    }

    /// The identity of `pkg` running as its user
    pub fn caller_for(&self, pkg: &PackageRef) -> anyhow::Result<CallerIdentity> {
        let snapshot = self.packages.get_snapshot();
        let app_id = snapshot
            .installed_app_id(&pkg.package, pkg.user)
            .ok_or_else(|| anyhow!("{} is not installed", pkg))?;
        Ok(CallerIdentity::new(
            uid_of(pkg.user, app_id),
            std::process::id() as i32,
        ))
    }

    pub fn get_allowlist_file(&self) -> PathBuf {
        self.state_dir.join(ALLOWLIST_FILE_NAME)
    }

    /// Persist `allowlist` so that it's applied every time the device is
    /// opened, `None` keeps enforcement off
    pub fn store_allowlist(&self, allowlist: Option<&AgentAllowlist>) -> anyhow::Result<()> {
        let path = self.get_allowlist_file();
        let content = allowlist
            .map(|it| it.entries().iter().join("\n"))
            .unwrap_or_default();
        write_file_atomic(&path, |w| {
            if !content.is_empty() {
                writeln!(w, "{}", content)?;
            }
            Ok(())
        })
        .with_context(|| format!("writing {}", path_str(&path)))?;
        Ok(())
    }

    /// Drop the stored allowlist, the device description applies again
    pub fn forget_allowlist(&self) -> anyhow::Result<()> {
        let path = self.get_allowlist_file();
        if path.exists() {
            std::fs::remove_file(&path).with_context(|| format!("removing {}", path_str(&path)))?;
        }
        Ok(())
    }

    /// Wait for every pending state write
    pub fn flush(&self) {
        self.service.flush();
    }
}

/// `None` without a stored allowlist, `Some(None)` if it was disabled
fn load_allowlist_override(state_dir: &Path) -> anyhow::Result<Option<Option<AgentAllowlist>>> {
    let path = state_dir.join(ALLOWLIST_FILE_NAME);
    if !path.exists() {
        return Ok(None);
    }
    let allowlist = AgentAllowlist::from_file(&path)
        .with_context(|| format!("reading allowlist {}", path_str(&path)))?;
    if allowlist.is_empty() {
        return Ok(Some(None));
    }
    Ok(Some(Some(allowlist)))
}

#[cfg(test)]
mod test {
    use super::*;
    use afap::allowlist::AllowlistEntry;
    use rstest::*;
    use std::fs;
    use tempfile::TempDir;

    #[fixture]
    fn tmp() -> TempDir {
        TempDir::with_prefix("afap_cli_test_").expect("create tmp dir")
    }

    #[rstest]
    fn test_allowlist_override(tmp: TempDir) {
        assert_eq!(load_allowlist_override(&tmp.path()).expect("load"), None);

        fs::write(
            tmp.path().join(ALLOWLIST_FILE_NAME),
            "# agents\ncom.example.agent\ncom.example.signed:0a1b\n",
        )
        .expect("write allowlist");

        let loaded = load_allowlist_override(&tmp.path())
            .expect("load")
            .flatten()
            .expect("allowlist present");
        assert_eq!(
            loaded.entries(),
            &[
                AllowlistEntry::new("com.example.agent"),
                AllowlistEntry::signed("com.example.signed", vec![0x0a, 0x1b]),
            ]
        );
    }

    #[rstest]
    fn test_allowlist_override_disabled(tmp: TempDir) {
        fs::write(tmp.path().join(ALLOWLIST_FILE_NAME), "# nothing\n").expect("write allowlist");
        assert_eq!(load_allowlist_override(&tmp.path()).expect("load"), Some(None));
    }

    #[rstest]
    fn test_allowlist_override_invalid(tmp: TempDir) {
        fs::write(tmp.path().join(ALLOWLIST_FILE_NAME), "com.example.agent:zz\n")
            .expect("write allowlist");
        assert!(load_allowlist_override(&tmp.path()).is_err());
    }
}
