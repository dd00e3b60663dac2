//! Replays package manager and user manager events against the stored
//! access state. The device description itself is left alone, so an
//! uninstalled package reappears the next time the device is opened, just
//! without any of its former access.

use anyhow::anyhow;
use clap::Args;

use afap::ids::{AppId, UserId};
use afap::{CallerIdentity, Context, PackageStateProvider};

use crate::device::Device;
use crate::parsers::{PackageRef, PackageRefValueParser};

#[derive(Args)]
pub struct PackageUninstalled {
    /// The package being removed, as `package[@user]`
    #[arg(value_parser = PackageRefValueParser)]
    package: PackageRef,
}

impl PackageUninstalled {
    pub fn run(&self, ctx: &dyn Context, _caller: &CallerIdentity) -> anyhow::Result<()> {
        let device = Device::open(ctx)?;
        let PackageRef { package, user } = &self.package;
        let app_id = device
            .packages
            .get_snapshot()
            .installed_app_id(package, *user)
            .ok_or_else(|| anyhow!("{} is not installed", self.package))?;

        device.packages.update(|snapshot| {
            if let Some(state) = snapshot.get_package_state_mut(package) {
                state.set_installed(*user, false);
            }
        });
        device
            .service
            .on_package_uninstalled(package, app_id, *user)?;
        device.flush();
        Ok(())
    }
}

#[derive(Args)]
pub struct RemoveAppId {
    /// The app id that no longer has any package
    #[arg()]
    app_id: AppId,
}

impl RemoveAppId {
    pub fn run(&self, ctx: &dyn Context, _caller: &CallerIdentity) -> anyhow::Result<()> {
        let device = Device::open(ctx)?;
        device.packages.update(|snapshot| {
            let names = snapshot
                .packages_for_app_id(self.app_id)
                .map(|it| it.package_name.clone())
                .collect::<Vec<String>>();
            for name in names {
                log::debug!("dropping {} with app id {}", name, self.app_id);
                snapshot.remove_package(&name);
            }
        });
        device.service.on_app_id_removed(self.app_id)?;
        device.flush();
        Ok(())
    }
}

#[derive(Args)]
pub struct RemoveUser {
    /// The user being removed
    #[arg()]
    user: UserId,
}

impl RemoveUser {
    pub fn run(&self, ctx: &dyn Context, _caller: &CallerIdentity) -> anyhow::Result<()> {
        let device = Device::open(ctx)?;
        if !device.packages.get_snapshot().has_user(self.user) {
            return Err(anyhow!("no user {}", self.user));
        }
        device
            .packages
            .update(|snapshot| snapshot.remove_user(self.user));
        device.service.on_user_removed(self.user)?;
        device.flush();
        Ok(())
    }
}
