use std::fs;
use std::{env, path::PathBuf};

use rand::Rng;
use rstest::fixture;

/// A scratch directory removed again when the fixture is dropped
pub struct TmpDir {
    temp_dir: PathBuf,
    base: bool,
}

impl TmpDir {
    pub fn get_path(&self) -> &PathBuf {
        &self.temp_dir
    }

    pub fn create_dir(&self, name: &str) -> TmpDir {
        let path = self.temp_dir.join(name);
        fs::create_dir_all(&path).expect("failed to make temp directory");
        TmpDir {
            temp_dir: path,
            base: false,
        }
    }

    pub fn create_file_name(&self, name: &str, content: Option<&str>) -> PathBuf {
        let path = self.temp_dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("failed to create directories for new file");
        }
        fs::write(&path, content.unwrap_or("")).expect("failed to make temp file");
        path
    }
}

impl Drop for TmpDir {
    fn drop(&mut self) {
        if self.base {
            _ = fs::remove_dir_all(&self.temp_dir);
        }
    }
}

#[fixture]
pub fn tmp_dir() -> TmpDir {
    let mut rng = rand::thread_rng();
    let rand_name: u64 = rng.gen();
    let temp_dir = env::temp_dir().join(format!("afap_test_{}", rand_name));
    fs::create_dir_all(&temp_dir).expect("failed to make temp directory");
    TmpDir {
        temp_dir,
        base: true,
    }
}
