use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::{env, fs};

use rand::Rng;
use rstest::fixture;

use crate::config::Config;
use crate::context::{CONFIG_FILE_NAME, HOME_ENV};
use crate::utils::ensure_dir_exists;
use crate::Context;

#[fixture]
pub fn tmp_context() -> TestContext {
    TestContext::default()
}

/// A [Context] rooted in a fresh temporary `AFAP_HOME`
pub struct TestContext {
    base_dir: PathBuf,
    env: HashMap<String, String>,
    config: Option<Config>,
}

impl TestContext {
    pub fn set_env<K: AsRef<str>, V: AsRef<str>>(&mut self, key: K, value: V) -> &mut Self {
        self.env.insert(key.as_ref().into(), value.as_ref().into());
        self
    }

    /// Write `content` as the device config and use it from now on
    pub fn set_config(&mut self, content: &str) -> &mut Self {
        let path = self.base_dir.join(CONFIG_FILE_NAME);
        fs::write(&path, content).expect("failed to write config");
        self.config = Some(Config::parse(&path).expect("invalid test config"));
        self
    }

    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        _ = fs::remove_dir_all(&self.base_dir);
    }
}

impl Default for TestContext {
    fn default() -> Self {
        let mut rng = rand::thread_rng();
        let rand_name: u64 = rng.gen();
        let base_dir = env::temp_dir().join(format!("afap_test_home_{}", rand_name));
        ensure_dir_exists(&base_dir).expect("failed to create test home");

        let mut env = HashMap::new();
        env.insert(
            String::from(HOME_ENV),
            base_dir.to_string_lossy().into_owned(),
        );

        Self {
            base_dir,
            env,
            config: None,
        }
    }
}

impl Context for TestContext {
    fn maybe_get_env(&self, key: &str) -> Option<String> {
        self.env.get(key).map(String::from)
    }

    fn get_config<'a>(&'a self) -> crate::Result<Option<&'a Config>> {
        Ok(self.config.as_ref())
    }
}
