//! The caller facing side of the access policy.
//!
//! [AccessService] turns `(package, user)` pairs into principals, runs the
//! permission checks through the injected [PermissionEnforcer], and calls into
//! the registered policy under a read or mutate scope. Lifecycle events from
//! the host are forwarded to every registered policy.

use std::path::Path;
use std::sync::Arc;

use blanket::blanket;
use serde::Serialize;

use crate::allowlist::AgentAllowlist;
use crate::flags::{validate_flags, AccessFlags, AccessRequestState};
use crate::ids::{app_id_of, user_id_of, AppId, Uid, UserId};
use crate::package::{
    PackageSnapshot, PackageStateProvider, INTERACT_ACROSS_USERS, INTERACT_ACROSS_USERS_FULL,
    MANAGE_APP_FUNCTION_ACCESS,
};
use crate::persistence::{AsyncStateWriter, StateFiles};
use crate::policy::{PolicyRegistry, Principal, SchemePolicy, APP_ID_SCHEME, UID_SCHEME};
use crate::state::{AccessState, AccessStateStore, UserState};
use crate::utils::path_str;
use crate::{Error, Result};

pub const ROOT_UID: Uid = 0;
pub const SYSTEM_UID: Uid = 1000;
pub const SHELL_UID: Uid = 2000;

/// Who is making a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerIdentity {
    pub uid: Uid,
    pub pid: i32,
}

impl CallerIdentity {
    pub fn new(uid: Uid, pid: i32) -> Self {
        Self { uid, pid }
    }

    /// The shell acting from this process
    pub fn shell() -> Self {
        Self::new(SHELL_UID, std::process::id() as i32)
    }

    pub fn user_id(&self) -> UserId {
        user_id_of(self.uid)
    }

    pub fn app_id(&self) -> AppId {
        app_id_of(self.uid)
    }

    /// Root, system and shell hold every permission
    pub fn is_privileged(&self) -> bool {
        matches!(self.app_id(), ROOT_UID | SYSTEM_UID | SHELL_UID)
    }
}

/// Permission checks, failing with [Error::Security] on denial
#[blanket(derive(Ref, Arc, Box))]
pub trait PermissionEnforcer: Send + Sync {
    /// Allow the call if it targets the caller's own user, or the caller may
    /// interact across users
    fn enforce_calling_or_self_cross_user_permission(
        &self,
        caller: &CallerIdentity,
        user_id: UserId,
        message: &str,
    ) -> Result<()>;

    /// Allow the call if the caller holds at least one of `permissions`
    fn enforce_calling_or_self_any_permission(
        &self,
        caller: &CallerIdentity,
        permissions: &[&'static str],
        message: &str,
    ) -> Result<()>;
}

#[blanket(derive(Ref, Arc, Box))]
pub trait UserOracle: Send + Sync {
    fn user_exists(&self, user_id: UserId) -> bool;
}

/// Treats a permission as held when a package of the calling app requests it.
/// Privileged callers hold everything.
pub struct PackagePermissionEnforcer<P: PackageStateProvider> {
    packages: P,
}

impl<P: PackageStateProvider> PackagePermissionEnforcer<P> {
    pub fn new(packages: P) -> Self {
        Self { packages }
    }

    fn holds_any(&self, caller: &CallerIdentity, permissions: &[&str]) -> bool {
        if caller.is_privileged() {
            return true;
        }
        self.packages
            .get_snapshot()
            .packages_for_app_id(caller.app_id())
            .filter(|pkg| pkg.is_installed(caller.user_id()))
            .any(|pkg| permissions.iter().any(|p| pkg.requests_permission(p)))
    }
}

impl<P: PackageStateProvider> PermissionEnforcer for PackagePermissionEnforcer<P> {
    fn enforce_calling_or_self_cross_user_permission(
        &self,
        caller: &CallerIdentity,
        user_id: UserId,
        message: &str,
    ) -> Result<()> {
        if caller.user_id() == user_id
            || self.holds_any(caller, &[INTERACT_ACROSS_USERS, INTERACT_ACROSS_USERS_FULL])
        {
            return Ok(());
        }
        Err(Error::Security(format!(
            "{}: uid {} can't interact with user {}",
            message, caller.uid, user_id
        )))
    }

    fn enforce_calling_or_self_any_permission(
        &self,
        caller: &CallerIdentity,
        permissions: &[&'static str],
        message: &str,
    ) -> Result<()> {
        if self.holds_any(caller, permissions) {
            return Ok(());
        }
        Err(Error::Security(format!(
            "{}: uid {} needs one of {}",
            message,
            caller.uid,
            permissions.join(", ")
        )))
    }
}

/// Users exist when the package snapshot knows them
pub struct SnapshotUserOracle<P: PackageStateProvider> {
    packages: P,
}

impl<P: PackageStateProvider> SnapshotUserOracle<P> {
    pub fn new(packages: P) -> Self {
        Self { packages }
    }
}

impl<P: PackageStateProvider> UserOracle for SnapshotUserOracle<P> {
    fn user_exists(&self, user_id: UserId) -> bool {
        self.packages.get_snapshot().has_user(user_id)
    }
}

/// The collaborators an [AccessService] is composed from
#[derive(Clone)]
pub struct Collaborators {
    pub packages: Arc<dyn PackageStateProvider>,
    pub enforcer: Arc<dyn PermissionEnforcer>,
    pub users: Arc<dyn UserOracle>,
}

/// One stored access entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessEntry {
    pub user_id: UserId,
    pub agent_app_id: AppId,
    pub target_uid: Uid,
    pub flags: AccessFlags,
}

pub struct AccessService {
    store: AccessStateStore,
    registry: Arc<PolicyRegistry>,
    policy: Arc<dyn SchemePolicy>,
    packages: Arc<dyn PackageStateProvider>,
    enforcer: Arc<dyn PermissionEnforcer>,
    users: Arc<dyn UserOracle>,
}

fn initial_state(snapshot: &PackageSnapshot) -> AccessState {
    snapshot
        .user_ids()
        .fold(AccessState::new(), |state, user_id| {
            state.with_user(user_id, UserState::default())
        })
}

impl AccessService {
    fn new(
        store: AccessStateStore,
        registry: Arc<PolicyRegistry>,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let policy = registry.get(APP_ID_SCHEME, UID_SCHEME).ok_or_else(|| {
            Error::Generic(format!(
                "no policy registered for {} -> {}",
                APP_ID_SCHEME, UID_SCHEME
            ))
        })?;
        Ok(Self {
            store,
            registry,
            policy,
            packages: collaborators.packages,
            enforcer: collaborators.enforcer,
            users: collaborators.users,
        })
    }

    /// A service without persistence, every known user starts out empty
    pub fn in_memory(collaborators: Collaborators) -> Result<Self> {
        let state = initial_state(&collaborators.packages.get_snapshot());
        Self::new(
            AccessStateStore::in_memory(state),
            Arc::new(PolicyRegistry::with_defaults()),
            collaborators,
        )
    }

    /// Load the state of every known user from `state_dir`. Users whose
    /// persisted state had to be healed are rewritten in the background, and
    /// persisted state of users that no longer exist is deleted.
    pub fn open(state_dir: &Path, collaborators: Collaborators) -> Result<Self> {
        let registry = Arc::new(PolicyRegistry::with_defaults());
        let files = StateFiles::new(state_dir);
        let snapshot = collaborators.packages.get_snapshot();

        let mut state = AccessState::new();
        for user_id in snapshot.user_ids() {
            let user_state = files
                .read_user(&registry, user_id, &snapshot)?
                .unwrap_or_default();
            state = state.with_user(user_id, user_state);
        }

        for stored in files.stored_user_ids()? {
            if !snapshot.has_user(stored) {
                log::warn!(
                    "deleting state of unknown user {} in {}",
                    stored,
                    path_str(files.get_dir())
                );
                files.delete_user(stored)?;
            }
        }

        let writer = AsyncStateWriter::new(files, Arc::clone(&registry))?;
        let store = AccessStateStore::new(state, Some(Box::new(writer)));
        Self::new(store, registry, collaborators)
    }

    fn enforce_cross_user(&self, caller: &CallerIdentity, user_id: UserId, op: &str) -> Result<()> {
        self.enforcer
            .enforce_calling_or_self_cross_user_permission(caller, user_id, op)
    }

    fn enforce_manage(&self, caller: &CallerIdentity, op: &str) -> Result<()> {
        self.enforcer
            .enforce_calling_or_self_any_permission(caller, &[MANAGE_APP_FUNCTION_ACCESS], op)
    }

    fn resolve(snapshot: &PackageSnapshot, package_name: &str, user_id: UserId) -> Option<Principal> {
        snapshot
            .installed_app_id(package_name, user_id)
            .map(|app_id| Principal::new(app_id, user_id))
    }

    /// Resolve both packages, `None` if either user is gone or either package
    /// isn't installed for its user
    fn resolve_pair(
        &self,
        snapshot: &PackageSnapshot,
        agent_package: &str,
        agent_user: UserId,
        target_package: &str,
        target_user: UserId,
    ) -> Option<(Principal, Principal)> {
        if !self.users.user_exists(agent_user) || !self.users.user_exists(target_user) {
            return None;
        }
        Some((
            Self::resolve(snapshot, agent_package, agent_user)?,
            Self::resolve(snapshot, target_package, target_user)?,
        ))
    }

    /// Requires MANAGE_APP_FUNCTION_ACCESS unless the agent is the caller
    pub fn get_access_request_state(
        &self,
        caller: &CallerIdentity,
        agent_package: &str,
        agent_user: UserId,
        target_package: &str,
        target_user: UserId,
    ) -> Result<AccessRequestState> {
        const OP: &str = "get_access_request_state";
        self.enforce_cross_user(caller, agent_user, OP)?;
        self.enforce_cross_user(caller, target_user, OP)?;

        let snapshot = self.packages.get_snapshot();
        let agent_is_caller = Self::resolve(&snapshot, agent_package, agent_user)
            .map_or(false, |agent| agent.uid() == caller.uid);
        if !agent_is_caller {
            self.enforce_manage(caller, OP)?;
        }

        let (agent, target) =
            match self.resolve_pair(&snapshot, agent_package, agent_user, target_package, target_user) {
                Some(v) => v,
                None => return Ok(AccessRequestState::Unrequestable),
            };
        Ok(self.store.read(|scope| {
            self.policy
                .get_access_request_state(scope.state(), &snapshot, agent, target)
        }))
    }

    pub fn check_access(
        &self,
        caller: &CallerIdentity,
        agent_package: &str,
        agent_user: UserId,
        target_package: &str,
        target_user: UserId,
    ) -> Result<bool> {
        let state = self.get_access_request_state(
            caller,
            agent_package,
            agent_user,
            target_package,
            target_user,
        )?;
        Ok(state == AccessRequestState::Granted)
    }

    /// Empty when the pair isn't eligible
    pub fn get_access_flags(
        &self,
        caller: &CallerIdentity,
        agent_package: &str,
        agent_user: UserId,
        target_package: &str,
        target_user: UserId,
    ) -> Result<AccessFlags> {
        const OP: &str = "get_access_flags";
        self.enforce_cross_user(caller, agent_user, OP)?;
        self.enforce_cross_user(caller, target_user, OP)?;
        self.enforce_manage(caller, OP)?;

        let snapshot = self.packages.get_snapshot();
        let (agent, target) =
            match self.resolve_pair(&snapshot, agent_package, agent_user, target_package, target_user) {
                Some(v) => v,
                None => return Ok(AccessFlags::EMPTY),
            };
        Ok(self.store.read(|scope| {
            self.policy
                .get_access_flags(scope.state(), &snapshot, agent, target)
        }))
    }

    /// Returns whether the stored flags changed. Invalid flag combinations
    /// fail; an ineligible pair or a missing user is a no-op.
    #[allow(clippy::too_many_arguments)]
    pub fn update_access_flags(
        &self,
        caller: &CallerIdentity,
        agent_package: &str,
        agent_user: UserId,
        target_package: &str,
        target_user: UserId,
        flag_mask: AccessFlags,
        flags: AccessFlags,
    ) -> Result<bool> {
        const OP: &str = "update_access_flags";
        self.enforce_cross_user(caller, agent_user, OP)?;
        self.enforce_cross_user(caller, target_user, OP)?;
        self.enforce_manage(caller, OP)?;
        validate_flags(flags, flag_mask)?;

        let snapshot = self.packages.get_snapshot();
        let (agent, target) =
            match self.resolve_pair(&snapshot, agent_package, agent_user, target_package, target_user) {
                Some(v) => v,
                None => {
                    log::warn!(
                        "not updating {}@{} -> {}@{}: user or package missing",
                        agent_package,
                        agent_user,
                        target_package,
                        target_user
                    );
                    return Ok(false);
                }
            };
        self.store.mutate(|scope| {
            self.policy
                .update_access_flags(scope, &snapshot, agent, target, flag_mask, flags)
        })
    }

    /// Deny the calling app access to the target in the caller's user,
    /// overriding whatever the user or anyone else decided
    pub fn revoke_self_access(
        &self,
        caller: &CallerIdentity,
        caller_package: &str,
        target_package: &str,
    ) -> Result<bool> {
        let user_id = caller.user_id();
        let snapshot = self.packages.get_snapshot();
        let agent = match Self::resolve(&snapshot, caller_package, user_id) {
            Some(agent) if agent.uid() == caller.uid => agent,
            _ => {
                return Err(Error::Security(format!(
                    "package {} does not belong to uid {}",
                    caller_package, caller.uid
                )))
            }
        };
        let target = match Self::resolve(&snapshot, target_package, user_id) {
            Some(v) => v,
            None => return Ok(false),
        };
        self.store.mutate(|scope| {
            self.policy.update_access_flags(
                scope,
                &snapshot,
                agent,
                target,
                AccessFlags::MASK_USER | AccessFlags::MASK_OTHER,
                AccessFlags::OTHER_DENIED,
            )
        })
    }

    pub fn get_valid_agents(&self, caller: &CallerIdentity, user_id: UserId) -> Result<Vec<String>> {
        const OP: &str = "get_valid_agents";
        self.enforce_cross_user(caller, user_id, OP)?;
        self.enforce_manage(caller, OP)?;
        let snapshot = self.packages.get_snapshot();
        Ok(self
            .store
            .read(|scope| self.policy.valid_agents(scope.state(), &snapshot, user_id)))
    }

    pub fn get_valid_targets(&self, caller: &CallerIdentity, user_id: UserId) -> Result<Vec<String>> {
        const OP: &str = "get_valid_targets";
        self.enforce_cross_user(caller, user_id, OP)?;
        self.enforce_manage(caller, OP)?;
        let snapshot = self.packages.get_snapshot();
        Ok(self.policy.valid_targets(&snapshot, user_id))
    }

    /// `None` turns allowlist enforcement off
    pub fn set_agent_allowlist(
        &self,
        caller: &CallerIdentity,
        allowlist: Option<AgentAllowlist>,
    ) -> Result<()> {
        self.enforce_manage(caller, "set_agent_allowlist")?;
        self.apply_agent_allowlist(allowlist)
    }

    /// Install the allowlist without permission checks, for use by the host
    /// while composing the service
    pub fn apply_agent_allowlist(&self, allowlist: Option<AgentAllowlist>) -> Result<()> {
        let snapshot = self.packages.get_snapshot();
        self.store.mutate(|scope| {
            scope.set_agent_allowlist(allowlist.clone());
            for policy in self.registry.policies() {
                policy.on_agent_allowlist_changed(scope, &snapshot, allowlist.as_ref());
            }
            Ok(())
        })
    }

    pub fn get_agent_allowlist(&self) -> Option<AgentAllowlist> {
        self.store
            .read(|scope| scope.state().agent_allowlist().cloned())
    }

    pub fn on_user_added(&self, user_id: UserId) -> Result<()> {
        self.store.mutate(|scope| {
            for policy in self.registry.policies() {
                policy.on_user_added(scope, user_id);
            }
            Ok(())
        })
    }

    pub fn on_user_removed(&self, user_id: UserId) -> Result<()> {
        self.store.mutate(|scope| {
            for policy in self.registry.policies() {
                policy.on_user_removed(scope, user_id);
            }
            scope.remove_user(user_id);
            Ok(())
        })
    }

    pub fn on_app_id_removed(&self, app_id: AppId) -> Result<()> {
        self.store.mutate(|scope| {
            for policy in self.registry.policies() {
                policy.on_app_id_removed(scope, app_id);
            }
            Ok(())
        })
    }

    /// Call after the package is gone from the package snapshot
    pub fn on_package_uninstalled(
        &self,
        package_name: &str,
        app_id: AppId,
        user_id: UserId,
    ) -> Result<()> {
        let snapshot = self.packages.get_snapshot();
        self.store.mutate(|scope| {
            for policy in self.registry.policies() {
                policy.on_package_uninstalled(scope, &snapshot, package_name, app_id, user_id);
            }
            Ok(())
        })
    }

    /// Every stored entry, ordered by user, agent and target
    pub fn dump(&self) -> Vec<AccessEntry> {
        self.store.read(|scope| {
            let mut entries = Vec::new();
            for (user_id, user) in scope.state().users() {
                for (agent_app_id, targets) in &user.app_function_access {
                    for (target_uid, flags) in targets {
                        entries.push(AccessEntry {
                            user_id,
                            agent_app_id: *agent_app_id,
                            target_uid: *target_uid,
                            flags: *flags,
                        });
                    }
                }
            }
            entries
        })
    }

    /// Wait for scheduled writes to finish
    pub fn flush(&self) {
        self.store.flush();
    }
}
