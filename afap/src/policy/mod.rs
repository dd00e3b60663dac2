//! Access policies, one per (subject scheme, object scheme) pair.
//!
//! Every policy owns one container in each user's persisted state and gets a
//! say in every lifecycle event. The [PolicyRegistry] is built once when the
//! service starts and never changes afterwards.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::allowlist::AgentAllowlist;
use crate::flags::{AccessFlags, AccessRequestState};
use crate::ids::{uid_of, AppId, Uid, UserId};
use crate::package::PackageSnapshot;
use crate::state::{AccessState, MutateStateScope, UserState};
use crate::xml::{StartTag, TagReader, TagWriter};

pub mod app_id;
pub use app_id::AppIdAccessPolicy;

pub const APP_ID_SCHEME: &str = "app-id";
pub const UID_SCHEME: &str = "uid";

/// An app as seen from one user
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Principal {
    pub app_id: AppId,
    pub user_id: UserId,
}

impl Principal {
    pub fn new(app_id: AppId, user_id: UserId) -> Self {
        Self { app_id, user_id }
    }

    pub fn uid(&self) -> Uid {
        uid_of(self.user_id, self.app_id)
    }
}

pub trait SchemePolicy: Send + Sync {
    fn subject_scheme(&self) -> &'static str;

    fn object_scheme(&self) -> &'static str;

    /// Name of the tag holding this policy's part of a user's state
    fn container_tag(&self) -> &'static str;

    /// Read this policy's container into `user_state`. `container` is the
    /// start tag that was just read.
    fn parse(
        &self,
        reader: &mut TagReader,
        container: &StartTag,
        user_id: UserId,
        packages: &PackageSnapshot,
        user_state: &mut UserState,
    ) -> crate::Result<()>;

    fn serialize(&self, writer: &mut TagWriter, user_state: &UserState) -> crate::Result<()>;

    fn get_access_request_state(
        &self,
        state: &AccessState,
        packages: &PackageSnapshot,
        agent: Principal,
        target: Principal,
    ) -> AccessRequestState;

    fn get_access_flags(
        &self,
        state: &AccessState,
        packages: &PackageSnapshot,
        agent: Principal,
        target: Principal,
    ) -> AccessFlags;

    fn update_access_flags(
        &self,
        scope: &mut MutateStateScope,
        packages: &PackageSnapshot,
        agent: Principal,
        target: Principal,
        flag_mask: AccessFlags,
        flags: AccessFlags,
    ) -> crate::Result<bool>;

    /// Package names that may currently act as agents for the user
    fn valid_agents(
        &self,
        state: &AccessState,
        packages: &PackageSnapshot,
        user_id: UserId,
    ) -> Vec<String>;

    /// Package names that may currently be targeted for the user
    fn valid_targets(&self, packages: &PackageSnapshot, user_id: UserId) -> Vec<String>;

    fn on_user_added(&self, _scope: &mut MutateStateScope, _user_id: UserId) {}

    fn on_user_removed(&self, _scope: &mut MutateStateScope, _user_id: UserId) {}

    fn on_app_id_removed(&self, _scope: &mut MutateStateScope, _app_id: AppId) {}

    fn on_package_uninstalled(
        &self,
        _scope: &mut MutateStateScope,
        _packages: &PackageSnapshot,
        _package_name: &str,
        _app_id: AppId,
        _user_id: UserId,
    ) {
    }

    fn on_agent_allowlist_changed(
        &self,
        _scope: &mut MutateStateScope,
        _packages: &PackageSnapshot,
        _allowlist: Option<&AgentAllowlist>,
    ) {
    }
}

type SchemeKey = (&'static str, &'static str);

pub struct PolicyRegistry {
    policies: BTreeMap<SchemeKey, Arc<dyn SchemePolicy>>,
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl PolicyRegistry {
    pub fn empty() -> Self {
        Self {
            policies: BTreeMap::new(),
        }
    }

    /// Every policy this crate knows about
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(AppIdAccessPolicy::new()));
        registry
    }

    /// Register a policy, replacing any earlier policy for the same schemes
    pub fn register(&mut self, policy: Arc<dyn SchemePolicy>) {
        let key = (policy.subject_scheme(), policy.object_scheme());
        if self.policies.insert(key, policy).is_some() {
            log::warn!("replaced policy for {} -> {}", key.0, key.1);
        }
    }

    pub fn get(&self, subject_scheme: &str, object_scheme: &str) -> Option<Arc<dyn SchemePolicy>> {
        self.policies
            .iter()
            .find(|((s, o), _)| *s == subject_scheme && *o == object_scheme)
            .map(|(_, p)| Arc::clone(p))
    }

    pub fn for_container_tag(&self, tag: &str) -> Option<&dyn SchemePolicy> {
        self.policies
            .values()
            .find(|it| it.container_tag() == tag)
            .map(|it| it.as_ref())
    }

    pub fn policies(&self) -> impl Iterator<Item = &dyn SchemePolicy> {
        self.policies.values().map(|it| it.as_ref())
    }
}
