use std::borrow::Cow;
use std::fmt::Display;
use std::path::{Path, PathBuf};

use toml::{Table, Value};

use crate::allowlist::AgentAllowlist;
use crate::ids::{
    is_valid_app_id, is_valid_user_id, AppId, UserId, MAX_USER_ID, PER_USER_RANGE, USER_SYSTEM,
};
use crate::manifest::Manifest;
use crate::package::{PackageSnapshot, PackageState};
use crate::utils::{bytes_from_hex, path_str, read_file};

#[derive(Debug)]
pub enum Error {
    InvalidType,
    MissingKey,
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::InvalidType => "InvalidType",
                Self::MissingKey => "MissingKey",
            }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub struct ConfigMap<'c> {
    path: &'c Path,
    name: Option<Cow<'c, str>>,
    table: &'c Table,
}

#[derive(Clone, Debug)]
pub struct Config {
    path: PathBuf,
    base: Table,
}

impl Config {
    pub fn parse(source: &Path) -> crate::Result<Self> {
        let as_str = read_file(source)?;
        Self::from_str(source, &as_str)
    }

    /// Parse TOML content, `source` is only used for error messages and to
    /// resolve relative paths
    pub fn from_str(source: &Path, content: &str) -> crate::Result<Self> {
        let base: Table = match toml::from_str(content) {
            Ok(v) => v,
            Err(e) => return Err(crate::Error::new_cfg(source, &e)),
        };
        Ok(Self {
            base,
            path: PathBuf::from(source),
        })
    }

    pub fn get_path(&self) -> &Path {
        &self.path
    }

    pub fn get_map(&self) -> ConfigMap {
        ConfigMap {
            name: None,
            path: &self.path,
            table: &self.base,
        }
    }
}

impl<'c> ConfigMap<'c> {
    fn key_path<'a>(&self, key: &'a str) -> Cow<'a, str> {
        match &self.name {
            None => Cow::Borrowed(key),
            Some(v) => Cow::Owned(format!("{}.{}", v, key)),
        }
    }

    pub fn get_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Helper to create a crate::Error for a missing key
    pub fn missing_key(&self, key: &str) -> crate::Error {
        let path = self.key_path(key);
        crate::Error::new_cfg(self.path, &format!("missing key: {}", path))
    }

    /// Helper to create a crate::Error for an invalid key
    pub fn invalid_key(&self, key: &str, expected: &str) -> crate::Error {
        let path = self.key_path(key);
        crate::Error::new_cfg(
            self.path,
            &format!(
                "invalid value for key: {} (expected type: {})",
                path, expected
            ),
        )
    }

    fn typecheck<T>(&self, key: &str, expected: &str, res: Result<T>) -> crate::Result<T> {
        match res {
            Ok(v) => Ok(v),
            Err(Error::InvalidType) => Err(self.invalid_key(key, expected)),
            Err(Error::MissingKey) => Err(self.missing_key(key)),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &'c str> {
        self.table.keys().map(|it| it.as_str())
    }

    fn get(&self, key: &str) -> Option<&'c Value> {
        self.table.get(key)
    }

    pub fn maybe_get_int(&self, key: &str) -> Result<Option<i64>> {
        match self.get(key) {
            Some(v) => v.as_integer().map(Some).ok_or(Error::InvalidType),
            None => Ok(None),
        }
    }

    pub fn get_int(&self, key: &str) -> Result<i64> {
        self.maybe_get_int(key)?.ok_or(Error::MissingKey)
    }

    pub fn must_get_int(&self, key: &str) -> crate::Result<i64> {
        self.typecheck(key, "int", self.get_int(key))
    }

    pub fn maybe_get_str(&self, key: &str) -> Result<Option<&'c str>> {
        match self.get(key) {
            Some(v) => v.as_str().map(Some).ok_or(Error::InvalidType),
            None => Ok(None),
        }
    }

    pub fn get_str(&self, key: &str) -> Result<&'c str> {
        self.maybe_get_str(key)?.ok_or(Error::MissingKey)
    }

    pub fn maybe_get_str_typecheck(&self, key: &str) -> crate::Result<Option<&'c str>> {
        self.typecheck(key, "string", self.maybe_get_str(key))
    }

    pub fn must_get_str(&self, key: &str) -> crate::Result<&'c str> {
        self.typecheck(key, "string", self.get_str(key))
    }

    pub fn maybe_get_bool_typecheck(&self, key: &str) -> crate::Result<Option<bool>> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => v
                .as_bool()
                .map(Some)
                .ok_or_else(|| self.invalid_key(key, "bool")),
        }
    }

    fn maybe_get_array(&self, key: &str) -> Result<Option<&'c Vec<Value>>> {
        match self.get(key) {
            Some(v) => v.as_array().map(Some).ok_or(Error::InvalidType),
            None => Ok(None),
        }
    }

    pub fn maybe_get_int_array(&self, key: &str) -> Result<Option<Vec<i64>>> {
        let arr = match self.maybe_get_array(key)? {
            Some(v) => v,
            None => return Ok(None),
        };
        arr.iter()
            .map(|it| it.as_integer().ok_or(Error::InvalidType))
            .collect::<Result<Vec<i64>>>()
            .map(Some)
    }

    pub fn maybe_get_int_array_typecheck(&self, key: &str) -> crate::Result<Option<Vec<i64>>> {
        self.typecheck(key, "int array", self.maybe_get_int_array(key))
    }

    pub fn maybe_get_str_array(&self, key: &str) -> Result<Option<Vec<&'c str>>> {
        let arr = match self.maybe_get_array(key)? {
            Some(v) => v,
            None => return Ok(None),
        };
        arr.iter()
            .map(|it| it.as_str().ok_or(Error::InvalidType))
            .collect::<Result<Vec<&'c str>>>()
            .map(Some)
    }

    pub fn maybe_get_str_array_typecheck(&self, key: &str) -> crate::Result<Option<Vec<&'c str>>> {
        self.typecheck(key, "string array", self.maybe_get_str_array(key))
    }

    pub fn maybe_get_map(&self, key: &str) -> Result<Option<ConfigMap<'c>>> {
        match self.get(key) {
            Some(v) => match v.as_table() {
                Some(table) => Ok(Some(ConfigMap {
                    name: Some(Cow::Owned(self.key_path(key).into_owned())),
                    path: self.path,
                    table,
                })),
                None => Err(Error::InvalidType),
            },
            None => Ok(None),
        }
    }

    pub fn get_map(&self, key: &str) -> Result<ConfigMap<'c>> {
        self.maybe_get_map(key)?.ok_or(Error::MissingKey)
    }

    pub fn maybe_get_map_typecheck(&self, key: &str) -> crate::Result<Option<ConfigMap<'c>>> {
        self.typecheck(key, "table", self.maybe_get_map(key))
    }

    pub fn must_get_map(&self, key: &str) -> crate::Result<ConfigMap<'c>> {
        self.typecheck(key, "table", self.get_map(key))
    }
}

/// The device being simulated: which users exist, which packages are
/// installed, and the optional agent allowlist
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub packages: PackageSnapshot,
    pub allowlist: Option<AgentAllowlist>,
    /// State directory override, relative paths are resolved against the
    /// config file's directory
    pub state_dir: Option<PathBuf>,
}

impl DeviceConfig {
    pub fn parse(path: &Path) -> crate::Result<Self> {
        Self::from_config(&Config::parse(path)?)
    }

    pub fn from_config(cfg: &Config) -> crate::Result<Self> {
        let map = cfg.get_map();
        let base_dir = cfg
            .get_path()
            .parent()
            .map(PathBuf::from)
            .unwrap_or_default();

        let mut packages = PackageSnapshot::new();
        for user in map.maybe_get_int_array_typecheck("users")?.unwrap_or_default() {
            packages.add_user(to_user_id(&map, user)?);
        }

        if let Some(pkgs) = map.maybe_get_map_typecheck("packages")? {
            for name in pkgs.keys() {
                let pkg = pkgs.must_get_map(name)?;
                packages.insert_package(parse_package(&base_dir, name, &pkg)?);
            }
        }

        let allowlist = match map.maybe_get_str_array_typecheck("allowlist")? {
            Some(raw) => Some(
                AgentAllowlist::parse(&raw)
                    .map_err(|e| crate::Error::new_cfg(cfg.get_path(), &e))?,
            ),
            None => None,
        };

        let state_dir = map
            .maybe_get_str_typecheck("state_dir")?
            .map(|it| base_dir.join(it));

        Ok(Self {
            packages,
            allowlist,
            state_dir,
        })
    }
}

fn to_i32(map: &ConfigMap, key: &str, value: i64) -> crate::Result<i32> {
    i32::try_from(value).map_err(|_| map.invalid_key(key, "i32"))
}

fn to_user_id(map: &ConfigMap, value: i64) -> crate::Result<UserId> {
    let user: UserId = to_i32(map, "users", value)?;
    if !is_valid_user_id(user) {
        let expected = format!("user id in {}..={}", USER_SYSTEM, MAX_USER_ID);
        return Err(map.invalid_key("users", &expected));
    }
    Ok(user)
}

fn parse_package(base_dir: &Path, name: &str, map: &ConfigMap) -> crate::Result<PackageState> {
    let app_id: AppId = to_i32(map, "app_id", map.must_get_int("app_id")?)?;
    if !is_valid_app_id(app_id) {
        let expected = format!("app id below {}", PER_USER_RANGE);
        return Err(map.invalid_key("app_id", &expected));
    }

    let mut pkg = match map.maybe_get_str_typecheck("manifest")? {
        Some(rel) => {
            let path = base_dir.join(rel);
            let manifest = Manifest::from_file(&path)
                .map_err(|e| crate::Error::new_cfg(&path, &e))?;
            if manifest.package != name {
                log::warn!(
                    "manifest {} declares package {}, using {}",
                    path_str(&path),
                    manifest.package,
                    name
                );
            }
            let mut pkg = PackageState::from_manifest(&manifest, app_id);
            pkg.package_name = String::from(name);
            pkg
        }
        None => PackageState::new(name, app_id),
    };

    for user in map.maybe_get_int_array_typecheck("users")?.unwrap_or_default() {
        pkg.set_installed(to_user_id(map, user)?, true);
    }

    for perm in map
        .maybe_get_str_array_typecheck("permissions")?
        .unwrap_or_default()
    {
        pkg = pkg.with_permission(perm);
    }

    for hex in map
        .maybe_get_str_array_typecheck("certificate_digests")?
        .unwrap_or_default()
    {
        let digest =
            bytes_from_hex(hex).ok_or_else(|| map.invalid_key("certificate_digests", "hex"))?;
        pkg = pkg.with_signing_certificate_digest(digest);
    }

    if map
        .maybe_get_bool_typecheck("app_function_service")?
        .unwrap_or(false)
    {
        pkg = pkg.with_app_function_service();
    }

    Ok(pkg)
}

#[cfg(test)]
mod test {
    use crate::package::{APP_FUNCTION_SERVICE_INTERFACE, EXECUTE_APP_FUNCTIONS};
    use crate::testing::{tmp_dir, TmpDir};

    use super::*;
    use rstest::*;

    const DEVICE: &str = r#"
users = [0, 10]
state_dir = "state"
allowlist = ["com.example.agent", "com.example.signed:cafe"]

[packages."com.example.agent"]
app_id = 10001
users = [0, 10]
permissions = ["android.permission.EXECUTE_APP_FUNCTIONS"]

[packages."com.example.target"]
app_id = 10002
users = [0]
app_function_service = true

[packages."com.example.signed"]
app_id = 10003
users = [10]
certificate_digests = ["CA:FE"]
"#;

    #[test]
    fn test_config_map() {
        let cfg = Config::from_str(Path::new("test.toml"), DEVICE).expect("valid toml");
        let map = cfg.get_map();
        assert_eq!(map.maybe_get_int_array("users").unwrap(), Some(vec![0, 10]));
        assert_eq!(map.get_str("state_dir").unwrap(), "state");
        assert!(matches!(map.get_int("state_dir"), Err(Error::InvalidType)));
        assert!(matches!(map.get_int("nothing"), Err(Error::MissingKey)));

        let pkgs = map.must_get_map("packages").unwrap();
        let agent = pkgs.must_get_map("com.example.agent").unwrap();
        assert_eq!(agent.get_name(), Some("packages.com.example.agent"));

        let err = agent.must_get_str("app_id").unwrap_err();
        assert!(err
            .to_string()
            .contains("packages.com.example.agent.app_id"));
    }

    #[test]
    fn test_device_config() {
        let cfg = Config::from_str(Path::new("/device/afap.toml"), DEVICE).expect("valid toml");
        let device = DeviceConfig::from_config(&cfg).expect("valid device config");

        let snapshot = &device.packages;
        assert!(snapshot.has_user(0));
        assert!(snapshot.has_user(10));

        let agent = snapshot.get_package_state("com.example.agent").unwrap();
        assert_eq!(agent.app_id, 10001);
        assert!(agent.is_installed(10));
        assert!(agent.requests_permission(EXECUTE_APP_FUNCTIONS));

        let target = snapshot.get_package_state("com.example.target").unwrap();
        assert!(target.has_app_function_service());
        assert!(!target.is_installed(10));

        let signed = snapshot.get_package_state("com.example.signed").unwrap();
        assert!(signed.has_signing_certificate_digest(&[0xca, 0xfe]));

        let allowlist = device.allowlist.expect("allowlist configured");
        assert!(allowlist.matches(signed));
        assert_eq!(device.state_dir, Some(PathBuf::from("/device/state")));
    }

    #[test]
    fn test_device_config_errors() {
        let missing_app_id = "[packages.\"a\"]\nusers = [0]\n";
        let cfg = Config::from_str(Path::new("x.toml"), missing_app_id).unwrap();
        assert!(DeviceConfig::from_config(&cfg).is_err());

        let bad_users = "users = \"0\"\n";
        let cfg = Config::from_str(Path::new("x.toml"), bad_users).unwrap();
        assert!(DeviceConfig::from_config(&cfg).is_err());

        for bad_device in [
            "users = [21474]\n",
            "users = [-1]\n",
            "[packages.\"a\"]\napp_id = 10001\nusers = [30000]\n",
            "[packages.\"a\"]\napp_id = 100001\nusers = [0]\n",
            "[packages.\"a\"]\napp_id = -2\nusers = [0]\n",
        ] {
            let cfg = Config::from_str(Path::new("x.toml"), bad_device).unwrap();
            let err = DeviceConfig::from_config(&cfg).expect_err(bad_device);
            assert!(
                matches!(err, crate::Error::InvalidConfig(..)),
                "unexpected error {:?}",
                err
            );
        }

        let bad_allowlist = "allowlist = [\"a:zz\"]\n";
        let cfg = Config::from_str(Path::new("x.toml"), bad_allowlist).unwrap();
        assert!(DeviceConfig::from_config(&cfg).is_err());

        let empty = Config::from_str(Path::new("x.toml"), "").unwrap();
        let device = DeviceConfig::from_config(&empty).unwrap();
        assert!(device.allowlist.is_none());
        assert!(device.state_dir.is_none());
    }

    #[rstest]
    fn test_device_config_manifest(tmp_dir: TmpDir) {
        tmp_dir.create_file_name(
            "target/AndroidManifest.xml",
            Some(&format!(
                r#"<manifest package="com.example.target">
    <application>
        <service name=".Functions">
            <intent-filter>
                <action name="{APP_FUNCTION_SERVICE_INTERFACE}" />
            </intent-filter>
        </service>
    </application>
</manifest>"#
            )),
        );
        let path = tmp_dir.create_file_name(
            "afap.toml",
            Some(
                r#"
users = [0]
[packages."com.example.target"]
app_id = 10002
users = [0]
manifest = "target/AndroidManifest.xml"
"#,
            ),
        );

        let device = DeviceConfig::parse(&path).expect("valid device config");
        let target = device
            .packages
            .get_package_state("com.example.target")
            .unwrap();
        assert!(target.has_app_function_service());
        assert!(target.is_installed(0));
    }
}
