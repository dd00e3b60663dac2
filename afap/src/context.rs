use blanket::blanket;
use once_cell::sync::OnceCell;
use std::env;
use std::path::PathBuf;

use directories::BaseDirs;

use crate::config::{Config, DeviceConfig};
use crate::utils::{ensure_dir_exists, path_str};
use crate::Error;

pub const HOME_ENV: &str = "AFAP_HOME";
pub const CONFIG_FILE_NAME: &str = "afap.toml";

/// Context standardizes where the device description, the persisted state
/// and logs live, and how env vars are looked up.
///
/// Most methods on this trait have a default implementation that is perfectly
/// safe to leave unchanged.
#[blanket(derive(Ref, Box))]
pub trait Context: Send + Sync {
    fn maybe_get_env(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }

    fn get_env(&self, key: &str) -> crate::Result<String> {
        self.maybe_get_env(key)
            .ok_or_else(|| Error::MissingEnv(key.into()))
    }

    /// `AFAP_HOME`, falling back to the user's local data directory
    fn get_home_dir(&self) -> crate::Result<PathBuf> {
        if let Some(home) = self.maybe_get_env(HOME_ENV) {
            let home = PathBuf::from(home);
            if !home.exists() {
                return Err(Error::Generic(format!(
                    "{HOME_ENV} set to {}, but that directory doesn't exist",
                    path_str(&home)
                )));
            }
            return Ok(home);
        }
        let bd = BaseDirs::new().ok_or(Error::NoBaseDirs)?;
        let home = bd.data_local_dir().join("afap");
        ensure_dir_exists(&home)?;
        Ok(home)
    }

    fn get_home_dir_child(&self, child: &str) -> crate::Result<PathBuf> {
        self.get_home_dir().map(|it| it.join(child))
    }

    fn get_config_file(&self) -> crate::Result<PathBuf> {
        self.get_home_dir_child(CONFIG_FILE_NAME)
    }

    /// The parsed device description, `None` if there is no config file
    fn get_config<'a>(&'a self) -> crate::Result<Option<&'a Config>>;

    /// The directory holding the per user state files, overridable with
    /// `state_dir` in the device description
    fn get_state_dir(&self) -> crate::Result<PathBuf> {
        if let Some(cfg) = self.get_config()? {
            if let Some(dir) = DeviceConfig::from_config(cfg)?.state_dir {
                return Ok(dir);
            }
        }
        self.get_home_dir_child("state")
    }

    fn get_log_file(&self) -> crate::Result<PathBuf> {
        self.get_home_dir_child("afap.log")
    }
}

#[derive(Default, Clone)]
pub struct DefaultContext {
    config: OnceCell<Option<Config>>,
}

impl DefaultContext {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Context for DefaultContext {
    fn get_config<'a>(&'a self) -> crate::Result<Option<&'a Config>> {
        let cfg = self
            .config
            .get_or_try_init(|| -> crate::Result<Option<Config>> {
                let path = self.get_config_file()?;
                if !path.exists() {
                    log::debug!("no device config at {}", path_str(&path));
                    Ok(None)
                } else {
                    Ok(Some(Config::parse(&path)?))
                }
            })?;
        Ok(cfg.as_ref())
    }
}
