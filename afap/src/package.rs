use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use blanket::blanket;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::ids::{AppId, UserId};
use crate::manifest::{IntentFilter, Manifest, Service};

/// Permission an agent must request to execute app functions
pub const EXECUTE_APP_FUNCTIONS: &str = "android.permission.EXECUTE_APP_FUNCTIONS";

/// Permission required to inspect or change other apps' access
pub const MANAGE_APP_FUNCTION_ACCESS: &str = "android.permission.MANAGE_APP_FUNCTION_ACCESS";

pub const INTERACT_ACROSS_USERS: &str = "android.permission.INTERACT_ACROSS_USERS";
pub const INTERACT_ACROSS_USERS_FULL: &str = "android.permission.INTERACT_ACROSS_USERS_FULL";

/// Intent action a target's app function service must handle
pub const APP_FUNCTION_SERVICE_INTERFACE: &str = "android.app.appfunctions.AppFunctionService";

/// What we know about one installed package. Owned by the package manager
/// side; the access policy only ever reads it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackageState {
    pub package_name: String,
    pub app_id: AppId,
    installed_users: BTreeSet<UserId>,
    requested_permissions: BTreeSet<String>,
    /// SHA-256 digests of the signing certificates
    #[serde(skip)]
    signing_certificate_digests: Vec<Vec<u8>>,
    #[serde(skip)]
    services: Vec<Service>,
}

impl PackageState {
    pub fn new(package_name: &str, app_id: AppId) -> Self {
        Self {
            package_name: String::from(package_name),
            app_id,
            installed_users: BTreeSet::new(),
            requested_permissions: BTreeSet::new(),
            signing_certificate_digests: Vec::new(),
            services: Vec::new(),
        }
    }

    /// Build the package from its manifest, taking the requested permissions
    /// and the declared services from it
    pub fn from_manifest(manifest: &Manifest, app_id: AppId) -> Self {
        let mut state = Self::new(&manifest.package, app_id);
        for perm in manifest.get_uses_permissions() {
            state.requested_permissions.insert(perm.name.clone());
        }
        state.services = manifest.get_services().to_vec();
        state
    }

    pub fn installed_for(mut self, user_id: UserId) -> Self {
        self.installed_users.insert(user_id);
        self
    }

    pub fn with_permission(mut self, permission: &str) -> Self {
        self.requested_permissions.insert(String::from(permission));
        self
    }

    pub fn with_service(mut self, service: Service) -> Self {
        self.services.push(service);
        self
    }

    /// Declare a bare, action-only app function service
    pub fn with_app_function_service(self) -> Self {
        self.with_service(Service::new(
            ".AppFunctionService",
            vec![IntentFilter::for_action(APP_FUNCTION_SERVICE_INTERFACE)],
        ))
    }

    /// Record the signing certificate, given as encoded certificate bytes
    pub fn with_signing_certificate(self, certificate: &[u8]) -> Self {
        let digest = Sha256::digest(certificate).to_vec();
        self.with_signing_certificate_digest(digest)
    }

    pub fn with_signing_certificate_digest(mut self, digest: Vec<u8>) -> Self {
        self.signing_certificate_digests.push(digest);
        self
    }

    pub fn set_installed(&mut self, user_id: UserId, installed: bool) {
        if installed {
            self.installed_users.insert(user_id);
        } else {
            self.installed_users.remove(&user_id);
        }
    }

    pub fn is_installed(&self, user_id: UserId) -> bool {
        self.installed_users.contains(&user_id)
    }

    pub fn installed_users(&self) -> impl Iterator<Item = UserId> + '_ {
        self.installed_users.iter().copied()
    }

    pub fn requests_permission(&self, permission: &str) -> bool {
        self.requested_permissions.contains(permission)
    }

    pub fn has_signing_certificate_digest(&self, digest: &[u8]) -> bool {
        self.signing_certificate_digests
            .iter()
            .any(|it| it.as_slice() == digest)
    }

    pub fn get_services(&self) -> &[Service] {
        self.services.as_slice()
    }

    /// Whether some service handles the app function action with a bare
    /// filter: no data schemes and no data types
    pub fn has_app_function_service(&self) -> bool {
        self.services.iter().any(|service| {
            service.intent_filters.iter().any(|filter| {
                filter.has_action(APP_FUNCTION_SERVICE_INTERFACE)
                    && filter.count_data_schemes() == 0
                    && filter.count_data_types() == 0
            })
        })
    }
}

/// An immutable view of the installed packages and the users that exist
#[derive(Debug, Clone, Default)]
pub struct PackageSnapshot {
    packages: BTreeMap<String, PackageState>,
    app_id_packages: BTreeMap<AppId, BTreeSet<String>>,
    user_ids: BTreeSet<UserId>,
}

impl PackageSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.add_user(user_id);
        self
    }

    pub fn with_package(mut self, package: PackageState) -> Self {
        self.insert_package(package);
        self
    }

    pub fn add_user(&mut self, user_id: UserId) {
        self.user_ids.insert(user_id);
    }

    /// Forget the user, and mark every package as no longer installed for it
    pub fn remove_user(&mut self, user_id: UserId) {
        self.user_ids.remove(&user_id);
        for pkg in self.packages.values_mut() {
            pkg.set_installed(user_id, false);
        }
    }

    pub fn insert_package(&mut self, package: PackageState) {
        if let Some(old) = self.packages.get(&package.package_name) {
            if old.app_id != package.app_id {
                self.unlink_app_id(old.app_id, &package.package_name);
            }
        }
        self.app_id_packages
            .entry(package.app_id)
            .or_default()
            .insert(package.package_name.clone());
        self.packages.insert(package.package_name.clone(), package);
    }

    pub fn remove_package(&mut self, package_name: &str) -> Option<PackageState> {
        let removed = self.packages.remove(package_name)?;
        self.unlink_app_id(removed.app_id, package_name);
        Some(removed)
    }

    pub fn get_package_state_mut(&mut self, package_name: &str) -> Option<&mut PackageState> {
        self.packages.get_mut(package_name)
    }

    fn unlink_app_id(&mut self, app_id: AppId, package_name: &str) {
        if let Some(names) = self.app_id_packages.get_mut(&app_id) {
            names.remove(package_name);
            if names.is_empty() {
                self.app_id_packages.remove(&app_id);
            }
        }
    }

    pub fn get_package_state(&self, package_name: &str) -> Option<&PackageState> {
        self.packages.get(package_name)
    }

    pub fn packages(&self) -> impl Iterator<Item = &PackageState> {
        self.packages.values()
    }

    /// Every package sharing the given app id
    pub fn packages_for_app_id(&self, app_id: AppId) -> impl Iterator<Item = &PackageState> {
        self.app_id_packages
            .get(&app_id)
            .into_iter()
            .flat_map(|names| names.iter())
            .filter_map(|name| self.packages.get(name))
    }

    pub fn has_app_id(&self, app_id: AppId) -> bool {
        self.app_id_packages.contains_key(&app_id)
    }

    pub fn app_id_packages(&self) -> &BTreeMap<AppId, BTreeSet<String>> {
        &self.app_id_packages
    }

    pub fn has_user(&self, user_id: UserId) -> bool {
        self.user_ids.contains(&user_id)
    }

    pub fn user_ids(&self) -> impl Iterator<Item = UserId> + '_ {
        self.user_ids.iter().copied()
    }

    /// The app id of the package, if it is installed for the user
    pub fn installed_app_id(&self, package_name: &str, user_id: UserId) -> Option<AppId> {
        self.get_package_state(package_name)
            .filter(|it| it.is_installed(user_id))
            .map(|it| it.app_id)
    }
}

/// Hands out the current package snapshot
#[blanket(derive(Ref, Arc, Box))]
pub trait PackageStateProvider: Send + Sync {
    fn get_snapshot(&self) -> Arc<PackageSnapshot>;
}

/// A [PackageStateProvider] whose snapshot is swapped in whole whenever the
/// package set changes
#[derive(Default)]
pub struct SharedPackageSnapshot {
    current: RwLock<Arc<PackageSnapshot>>,
}

impl SharedPackageSnapshot {
    pub fn new(snapshot: PackageSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// Publish a modified copy of the current snapshot
    pub fn update<F: FnOnce(&mut PackageSnapshot)>(&self, f: F) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        let mut next = PackageSnapshot::clone(&guard);
        f(&mut next);
        *guard = Arc::new(next);
    }
}

impl PackageStateProvider for SharedPackageSnapshot {
    fn get_snapshot(&self) -> Arc<PackageSnapshot> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::manifest::Data;

    #[test]
    fn test_app_function_service_filters() {
        let bare = PackageState::new("a", 10001).with_app_function_service();
        assert!(bare.has_app_function_service());

        let with_scheme = PackageState::new("b", 10002).with_service(Service::new(
            ".Svc",
            vec![
                IntentFilter::for_action(APP_FUNCTION_SERVICE_INTERFACE).with_data(Data {
                    scheme: Some(String::from("content")),
                    ..Default::default()
                }),
            ],
        ));
        assert!(!with_scheme.has_app_function_service());

        let with_type = PackageState::new("c", 10003).with_service(Service::new(
            ".Svc",
            vec![
                IntentFilter::for_action(APP_FUNCTION_SERVICE_INTERFACE).with_data(Data {
                    mime_type: Some(String::from("text/plain")),
                    ..Default::default()
                }),
            ],
        ));
        assert!(!with_type.has_app_function_service());

        let host_only = PackageState::new("d", 10004).with_service(Service::new(
            ".Svc",
            vec![
                IntentFilter::for_action(APP_FUNCTION_SERVICE_INTERFACE).with_data(Data {
                    host: Some(String::from("example.com")),
                    ..Default::default()
                }),
            ],
        ));
        assert!(host_only.has_app_function_service());

        let wrong_action = PackageState::new("e", 10005)
            .with_service(Service::new(".Svc", vec![IntentFilter::for_action("x.Y")]));
        assert!(!wrong_action.has_app_function_service());
    }

    #[test]
    fn test_package_state_from_manifest() {
        let raw = r#"<manifest package="com.example.target">
            <application>
                <service name=".Functions">
                    <intent-filter>
                        <action name="android.app.appfunctions.AppFunctionService" />
                    </intent-filter>
                </service>
            </application>
        </manifest>"#;
        let manifest = Manifest::from_xml(raw).expect("parse manifest");
        let pkg = PackageState::from_manifest(&manifest, 10002);
        assert!(pkg.has_app_function_service());
        assert_eq!(pkg, PackageState::from_manifest(&manifest, 10002));

        let other_service = pkg.clone().with_service(Service::new(".Other", Vec::new()));
        assert_ne!(pkg, other_service);
    }

    #[test]
    fn test_snapshot_app_ids() {
        let mut snapshot = PackageSnapshot::new()
            .with_user(0)
            .with_package(PackageState::new("shared.one", 10001).installed_for(0))
            .with_package(PackageState::new("shared.two", 10001))
            .with_package(PackageState::new("solo", 10002).installed_for(0));

        let names = snapshot
            .packages_for_app_id(10001)
            .map(|it| it.package_name.as_str())
            .collect::<Vec<&str>>();
        assert_eq!(names, vec!["shared.one", "shared.two"]);
        assert_eq!(snapshot.installed_app_id("shared.one", 0), Some(10001));
        assert_eq!(snapshot.installed_app_id("shared.two", 0), None);

        snapshot.remove_package("solo");
        assert!(!snapshot.has_app_id(10002));

        snapshot.insert_package(PackageState::new("shared.two", 10003));
        assert_eq!(snapshot.packages_for_app_id(10001).count(), 1);
        assert!(snapshot.has_app_id(10003));

        snapshot.remove_user(0);
        assert!(!snapshot.has_user(0));
        assert_eq!(snapshot.installed_app_id("shared.one", 0), None);
    }

    #[test]
    fn test_signing_certificate_digest() {
        let pkg = PackageState::new("signed", 10001).with_signing_certificate(b"certificate");
        let digest = Sha256::digest(b"certificate");
        assert!(pkg.has_signing_certificate_digest(digest.as_slice()));
        assert!(!pkg.has_signing_certificate_digest(b"other"));
    }

    #[test]
    fn test_shared_snapshot_update() {
        let shared = SharedPackageSnapshot::new(PackageSnapshot::new().with_user(0));
        let before = shared.get_snapshot();
        shared.update(|it| it.add_user(10));
        assert!(!before.has_user(10), "old snapshots must not change");
        assert!(shared.get_snapshot().has_user(10));
    }
}
