use std::collections::BTreeSet;

use crate::allowlist::AgentAllowlist;
use crate::flags::{validate_flags, AccessFlags, AccessRequestState};
use crate::ids::{app_id_of, uid_of, user_id_of, AppId, Uid, UserId};
use crate::package::{PackageSnapshot, PackageState, EXECUTE_APP_FUNCTIONS};
use crate::persistence::{read_reconciled_agent_table, write_agent_table};
use crate::state::{AccessState, AgentTable, MutateStateScope, UserState, WriteMode};
use crate::xml::{StartTag, TagReader, TagWriter};

use super::{Principal, SchemePolicy, APP_ID_SCHEME, UID_SCHEME};

pub const CONTAINER_TAG: &str = "app-function-access";

fn is_agent_package(
    package: &PackageState,
    user_id: UserId,
    allowlist: Option<&AgentAllowlist>,
) -> bool {
    package.is_installed(user_id)
        && package.requests_permission(EXECUTE_APP_FUNCTIONS)
        && allowlist.map_or(true, |it| it.matches(package))
}

fn is_target_package(package: &PackageState, user_id: UserId) -> bool {
    package.is_installed(user_id) && package.has_app_function_service()
}

/// Remove every target matching `drop_target` from every agent, and agents
/// left without targets. Returns whether anything was removed.
fn remove_targets<F>(table: &mut AgentTable, drop_target: F) -> bool
where
    F: Fn(Uid) -> bool,
{
    let mut changed = false;
    table.retain(|_, targets| {
        let before = targets.len();
        targets.retain(|uid, _| !drop_target(*uid));
        changed |= targets.len() != before;
        !targets.is_empty()
    });
    changed
}

fn has_target<F>(table: &AgentTable, matches: F) -> bool
where
    F: Fn(Uid) -> bool,
{
    table
        .values()
        .any(|targets| targets.keys().any(|uid| matches(*uid)))
}

/// Access of agents, identified by app id, to targets, identified by uid
#[derive(Debug, Default, Clone, Copy)]
pub struct AppIdAccessPolicy;

impl AppIdAccessPolicy {
    pub fn new() -> Self {
        Self
    }

    /// Whether any package with the app id may act as an agent for the user
    pub fn is_valid_agent(
        &self,
        packages: &PackageSnapshot,
        allowlist: Option<&AgentAllowlist>,
        agent: Principal,
    ) -> bool {
        packages
            .packages_for_app_id(agent.app_id)
            .any(|pkg| is_agent_package(pkg, agent.user_id, allowlist))
    }

    /// Whether any package with the app id exposes app functions for the user
    pub fn is_valid_target(&self, packages: &PackageSnapshot, target: Principal) -> bool {
        packages
            .packages_for_app_id(target.app_id)
            .any(|pkg| is_target_package(pkg, target.user_id))
    }

    fn is_valid_pair(
        &self,
        state: &AccessState,
        packages: &PackageSnapshot,
        agent: Principal,
        target: Principal,
    ) -> bool {
        self.is_valid_agent(packages, state.agent_allowlist(), agent)
            && self.is_valid_target(packages, target)
    }

    fn stored_flags(&self, state: &AccessState, agent: Principal, target: Principal) -> AccessFlags {
        state
            .user_state(agent.user_id)
            .and_then(|it| it.get_flags(agent.app_id, target.uid()))
            .unwrap_or_default()
    }

    /// Apply `change` to every user whose table `needs_change` says to touch
    fn for_each_user_table<N, C>(&self, scope: &mut MutateStateScope, needs_change: N, mut change: C)
    where
        N: Fn(UserId, &AgentTable) -> bool,
        C: FnMut(UserId, &mut AgentTable),
    {
        let affected = scope
            .state()
            .users()
            .filter(|(user_id, user)| needs_change(*user_id, &user.app_function_access))
            .map(|(user_id, _)| user_id)
            .collect::<Vec<UserId>>();

        for user_id in affected {
            if let Some(user) = scope.mutate_user_state(user_id, WriteMode::Asynchronous) {
                change(user_id, &mut user.app_function_access);
            }
        }
    }

    fn remove_agents<F>(&self, scope: &mut MutateStateScope, drop_agent: F)
    where
        F: Fn(UserId, AppId) -> bool,
    {
        self.for_each_user_table(
            scope,
            |user_id, table| table.keys().any(|app_id| drop_agent(user_id, *app_id)),
            |user_id, table| {
                table.retain(|app_id, _| {
                    let drop = drop_agent(user_id, *app_id);
                    if drop {
                        log::debug!("removing agent {} for user {}", app_id, user_id);
                    }
                    !drop
                })
            },
        );
    }

    fn remove_target_uids<F>(&self, scope: &mut MutateStateScope, drop_target: F)
    where
        F: Fn(Uid) -> bool,
    {
        self.for_each_user_table(
            scope,
            |_, table| has_target(table, &drop_target),
            |user_id, table| {
                if remove_targets(table, &drop_target) {
                    log::debug!("removed stale targets for user {}", user_id);
                }
            },
        );
    }
}

impl SchemePolicy for AppIdAccessPolicy {
    fn subject_scheme(&self) -> &'static str {
        APP_ID_SCHEME
    }

    fn object_scheme(&self) -> &'static str {
        UID_SCHEME
    }

    fn container_tag(&self) -> &'static str {
        CONTAINER_TAG
    }

    fn parse(
        &self,
        reader: &mut TagReader,
        container: &StartTag,
        user_id: UserId,
        packages: &PackageSnapshot,
        user_state: &mut UserState,
    ) -> crate::Result<()> {
        read_reconciled_agent_table(reader, container, user_id, packages, user_state)
    }

    fn serialize(&self, writer: &mut TagWriter, user_state: &UserState) -> crate::Result<()> {
        write_agent_table(writer, CONTAINER_TAG, &user_state.app_function_access)
    }

    fn get_access_request_state(
        &self,
        state: &AccessState,
        packages: &PackageSnapshot,
        agent: Principal,
        target: Principal,
    ) -> AccessRequestState {
        if !self.is_valid_pair(state, packages, agent, target) {
            return AccessRequestState::Unrequestable;
        }
        if self.stored_flags(state, agent, target).is_granted() {
            AccessRequestState::Granted
        } else {
            AccessRequestState::Denied
        }
    }

    fn get_access_flags(
        &self,
        state: &AccessState,
        packages: &PackageSnapshot,
        agent: Principal,
        target: Principal,
    ) -> AccessFlags {
        if !self.is_valid_pair(state, packages, agent, target) {
            return AccessFlags::EMPTY;
        }
        self.stored_flags(state, agent, target)
    }

    fn update_access_flags(
        &self,
        scope: &mut MutateStateScope,
        packages: &PackageSnapshot,
        agent: Principal,
        target: Principal,
        flag_mask: AccessFlags,
        flags: AccessFlags,
    ) -> crate::Result<bool> {
        validate_flags(flags, flag_mask)?;

        for user_id in [agent.user_id, target.user_id] {
            if !scope.state().has_user(user_id) {
                log::warn!("can't update access flags, user {} doesn't exist", user_id);
                return Ok(false);
            }
        }

        if !self.is_valid_pair(scope.state(), packages, agent, target) {
            log::debug!(
                "not updating flags of ineligible pair {:?} -> {:?}",
                agent,
                target
            );
            return Ok(false);
        }

        let existing = scope
            .state()
            .user_state(agent.user_id)
            .and_then(|it| it.get_flags(agent.app_id, target.uid()));
        let new = existing.unwrap_or_default().update(flag_mask, flags);
        let unchanged = match existing {
            Some(old) => old == new,
            None => new.is_empty(),
        };
        if unchanged {
            return Ok(false);
        }

        let user = match scope.mutate_user_state(agent.user_id, WriteMode::Asynchronous) {
            Some(v) => v,
            None => return Ok(false),
        };
        user.app_function_access
            .entry(agent.app_id)
            .or_default()
            .insert(target.uid(), new);
        Ok(true)
    }

    fn valid_agents(
        &self,
        state: &AccessState,
        packages: &PackageSnapshot,
        user_id: UserId,
    ) -> Vec<String> {
        let allowlist = state.agent_allowlist();
        packages
            .packages()
            .filter(|pkg| is_agent_package(pkg, user_id, allowlist))
            .map(|pkg| pkg.package_name.clone())
            .collect()
    }

    fn valid_targets(&self, packages: &PackageSnapshot, user_id: UserId) -> Vec<String> {
        packages
            .packages()
            .filter(|pkg| is_target_package(pkg, user_id))
            .map(|pkg| pkg.package_name.clone())
            .collect()
    }

    fn on_user_added(&self, scope: &mut MutateStateScope, user_id: UserId) {
        if scope.ensure_user(user_id) {
            log::debug!("created empty state for user {}", user_id);
        }
    }

    fn on_user_removed(&self, scope: &mut MutateStateScope, user_id: UserId) {
        // The removed user's own table goes away with the user
        self.for_each_user_table(
            scope,
            |owner, table| owner != user_id && has_target(table, |uid| user_id_of(uid) == user_id),
            |_, table| {
                remove_targets(table, |uid| user_id_of(uid) == user_id);
            },
        );
    }

    fn on_app_id_removed(&self, scope: &mut MutateStateScope, app_id: AppId) {
        self.remove_agents(scope, |_, agent| agent == app_id);
        self.remove_target_uids(scope, |uid| app_id_of(uid) == app_id);
    }

    fn on_package_uninstalled(
        &self,
        scope: &mut MutateStateScope,
        packages: &PackageSnapshot,
        package_name: &str,
        app_id: AppId,
        user_id: UserId,
    ) {
        let principal = Principal::new(app_id, user_id);

        if !self.is_valid_agent(packages, scope.state().agent_allowlist(), principal) {
            log::debug!(
                "{} uninstalled, app id {} is no longer an agent for user {}",
                package_name,
                app_id,
                user_id
            );
            self.remove_agents(scope, |owner, agent| owner == user_id && agent == app_id);
        }

        if !self.is_valid_target(packages, principal) {
            let target_uid = uid_of(user_id, app_id);
            self.remove_target_uids(scope, |uid| uid == target_uid);
        }
    }

    fn on_agent_allowlist_changed(
        &self,
        scope: &mut MutateStateScope,
        packages: &PackageSnapshot,
        allowlist: Option<&AgentAllowlist>,
    ) {
        let allowlist = match allowlist {
            Some(v) => v,
            None => return,
        };
        let allowed = packages
            .packages()
            .filter(|pkg| allowlist.contains_package_name(&pkg.package_name))
            .map(|pkg| pkg.app_id)
            .collect::<BTreeSet<AppId>>();
        self.remove_agents(scope, |_, agent| !allowed.contains(&agent));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::allowlist::AllowlistEntry;
    use crate::state::AccessStateStore;
    use crate::testing::{
        device_packages, AGENT, AGENT_APP_ID, AGENT_SIBLING, OTHER_AGENT, OTHER_AGENT_APP_ID,
        TARGET, TARGET_APP_ID,
    };
    use crate::Error;
    use rstest::*;

    const USER: UserId = 0;

    fn agent() -> Principal {
        Principal::new(AGENT_APP_ID, USER)
    }

    fn target() -> Principal {
        Principal::new(TARGET_APP_ID, USER)
    }

    fn store_for(packages: &PackageSnapshot) -> AccessStateStore {
        let mut state = AccessState::new();
        for user_id in packages.user_ids() {
            state = state.with_user(user_id, UserState::default());
        }
        AccessStateStore::in_memory(state)
    }

    fn update(
        store: &AccessStateStore,
        packages: &PackageSnapshot,
        agent: Principal,
        target: Principal,
        mask: AccessFlags,
        flags: AccessFlags,
    ) -> crate::Result<bool> {
        store.mutate(|scope| {
            AppIdAccessPolicy.update_access_flags(scope, packages, agent, target, mask, flags)
        })
    }

    fn request_state(
        store: &AccessStateStore,
        packages: &PackageSnapshot,
        agent: Principal,
        target: Principal,
    ) -> AccessRequestState {
        store.read(|scope| {
            AppIdAccessPolicy.get_access_request_state(scope.state(), packages, agent, target)
        })
    }

    fn grant(store: &AccessStateStore, packages: &PackageSnapshot, agent: Principal, target: Principal) {
        assert!(update(
            store,
            packages,
            agent,
            target,
            AccessFlags::MASK_USER,
            AccessFlags::USER_GRANTED
        )
        .unwrap());
    }

    fn stored(store: &AccessStateStore, user_id: UserId) -> AgentTable {
        store
            .snapshot()
            .user_state(user_id)
            .map(|it| it.app_function_access.clone())
            .unwrap_or_default()
    }

    #[rstest]
    fn test_grant_then_deny(device_packages: PackageSnapshot) {
        let store = store_for(&device_packages);

        assert_eq!(
            request_state(&store, &device_packages, agent(), target()),
            AccessRequestState::Denied
        );

        grant(&store, &device_packages, agent(), target());
        assert_eq!(
            request_state(&store, &device_packages, agent(), target()),
            AccessRequestState::Granted
        );

        assert!(update(
            &store,
            &device_packages,
            agent(),
            target(),
            AccessFlags::MASK_OTHER,
            AccessFlags::OTHER_GRANTED
        )
        .unwrap());
        assert!(update(
            &store,
            &device_packages,
            agent(),
            target(),
            AccessFlags::MASK_USER,
            AccessFlags::USER_DENIED
        )
        .unwrap());
        assert_eq!(
            request_state(&store, &device_packages, agent(), target()),
            AccessRequestState::Denied
        );
        let flags = store.read(|scope| {
            AppIdAccessPolicy.get_access_flags(scope.state(), &device_packages, agent(), target())
        });
        assert_eq!(flags, AccessFlags::USER_DENIED | AccessFlags::OTHER_GRANTED);
    }

    #[rstest]
    fn test_update_is_idempotent(device_packages: PackageSnapshot) {
        let store = store_for(&device_packages);
        grant(&store, &device_packages, agent(), target());
        let before = stored(&store, USER);
        assert!(!update(
            &store,
            &device_packages,
            agent(),
            target(),
            AccessFlags::MASK_USER,
            AccessFlags::USER_GRANTED
        )
        .unwrap());
        assert_eq!(stored(&store, USER), before);
    }

    #[rstest]
    fn test_clearing_keeps_explicit_zero(device_packages: PackageSnapshot) {
        let store = store_for(&device_packages);
        assert!(!update(
            &store,
            &device_packages,
            agent(),
            target(),
            AccessFlags::MASK_ALL,
            AccessFlags::EMPTY
        )
        .unwrap());
        assert!(stored(&store, USER).is_empty(), "no entry for a no-op");

        grant(&store, &device_packages, agent(), target());
        assert!(update(
            &store,
            &device_packages,
            agent(),
            target(),
            AccessFlags::MASK_USER,
            AccessFlags::EMPTY
        )
        .unwrap());
        assert_eq!(
            stored(&store, USER)[&AGENT_APP_ID][&target().uid()],
            AccessFlags::EMPTY
        );
    }

    #[rstest]
    fn test_invalid_flags_fail(device_packages: PackageSnapshot) {
        let store = store_for(&device_packages);
        let res = update(
            &store,
            &device_packages,
            agent(),
            target(),
            AccessFlags::USER_GRANTED,
            AccessFlags::USER_GRANTED,
        );
        assert!(matches!(res, Err(Error::InvalidArgument(_))));
    }

    #[rstest]
    fn test_soft_failures(device_packages: PackageSnapshot) {
        let store = store_for(&device_packages);

        let unknown_user = Principal::new(TARGET_APP_ID, 42);
        assert!(!update(
            &store,
            &device_packages,
            agent(),
            unknown_user,
            AccessFlags::MASK_USER,
            AccessFlags::USER_GRANTED
        )
        .unwrap());

        let not_an_agent = Principal::new(TARGET_APP_ID, USER);
        assert!(!update(
            &store,
            &device_packages,
            not_an_agent,
            target(),
            AccessFlags::MASK_USER,
            AccessFlags::USER_GRANTED
        )
        .unwrap());
        assert_eq!(
            request_state(&store, &device_packages, not_an_agent, target()),
            AccessRequestState::Unrequestable
        );
        assert!(stored(&store, USER).is_empty());
    }

    #[rstest]
    fn test_uninstalled_agent_is_unrequestable(mut device_packages: PackageSnapshot) {
        let store = store_for(&device_packages);
        grant(&store, &device_packages, agent(), target());

        for name in [AGENT, AGENT_SIBLING] {
            if let Some(pkg) = device_packages.get_package_state_mut(name) {
                pkg.set_installed(USER, false);
            }
        }
        assert_eq!(
            request_state(&store, &device_packages, agent(), target()),
            AccessRequestState::Unrequestable
        );
        let flags = store.read(|scope| {
            AppIdAccessPolicy.get_access_flags(scope.state(), &device_packages, agent(), target())
        });
        assert!(flags.is_empty());
    }

    #[rstest]
    fn test_pregranted_and_other_tiers(device_packages: PackageSnapshot) {
        let store = store_for(&device_packages);
        update(
            &store,
            &device_packages,
            agent(),
            target(),
            AccessFlags::PREGRANTED,
            AccessFlags::PREGRANTED,
        )
        .unwrap();
        assert_eq!(
            request_state(&store, &device_packages, agent(), target()),
            AccessRequestState::Granted
        );
        update(
            &store,
            &device_packages,
            agent(),
            target(),
            AccessFlags::MASK_OTHER,
            AccessFlags::OTHER_DENIED,
        )
        .unwrap();
        assert_eq!(
            request_state(&store, &device_packages, agent(), target()),
            AccessRequestState::Denied
        );
    }

    #[rstest]
    fn test_user_removed(device_packages: PackageSnapshot) {
        let store = store_for(&device_packages);
        let work_target = Principal::new(TARGET_APP_ID, 10);
        grant(&store, &device_packages, agent(), target());
        grant(&store, &device_packages, agent(), work_target);
        grant(
            &store,
            &device_packages,
            Principal::new(OTHER_AGENT_APP_ID, USER),
            work_target,
        );
        grant(&store, &device_packages, Principal::new(AGENT_APP_ID, 10), work_target);

        store
            .mutate(|scope| {
                AppIdAccessPolicy.on_user_removed(scope, 10);
                Ok(())
            })
            .unwrap();

        let table = stored(&store, USER);
        assert_eq!(table.len(), 1, "agent left without targets is dropped");
        assert_eq!(
            table[&AGENT_APP_ID].keys().copied().collect::<Vec<Uid>>(),
            vec![target().uid()]
        );
        assert_eq!(stored(&store, 10).len(), 1, "removed user's own table is left alone");
    }

    #[rstest]
    fn test_app_id_removed(device_packages: PackageSnapshot) {
        let store = store_for(&device_packages);
        let other_agent = Principal::new(OTHER_AGENT_APP_ID, USER);
        grant(&store, &device_packages, agent(), target());
        grant(&store, &device_packages, other_agent, target());
        grant(&store, &device_packages, other_agent, Principal::new(AGENT_APP_ID, USER));

        for _ in 0..2 {
            store
                .mutate(|scope| {
                    AppIdAccessPolicy.on_app_id_removed(scope, AGENT_APP_ID);
                    Ok(())
                })
                .unwrap();
            let table = stored(&store, USER);
            assert!(!table.contains_key(&AGENT_APP_ID));
            assert_eq!(
                table[&OTHER_AGENT_APP_ID].keys().copied().collect::<Vec<Uid>>(),
                vec![target().uid()]
            );
        }
    }

    #[rstest]
    fn test_package_uninstalled(mut device_packages: PackageSnapshot) {
        let store = store_for(&device_packages);
        let other_agent = Principal::new(OTHER_AGENT_APP_ID, USER);
        grant(&store, &device_packages, agent(), target());
        grant(&store, &device_packages, other_agent, target());
        grant(&store, &device_packages, other_agent, Principal::new(AGENT_APP_ID, USER));
        let before = stored(&store, USER);

        // Agent still has a sibling package sharing its app id: nothing changes
        device_packages.remove_package(AGENT_SIBLING);
        store
            .mutate(|scope| {
                AppIdAccessPolicy.on_package_uninstalled(
                    scope,
                    &device_packages,
                    AGENT_SIBLING,
                    AGENT_APP_ID,
                    USER,
                );
                Ok(())
            })
            .unwrap();
        assert_eq!(stored(&store, USER), before);

        device_packages.remove_package(AGENT);
        store
            .mutate(|scope| {
                AppIdAccessPolicy.on_package_uninstalled(
                    scope,
                    &device_packages,
                    AGENT,
                    AGENT_APP_ID,
                    USER,
                );
                Ok(())
            })
            .unwrap();
        let table = stored(&store, USER);
        assert!(!table.contains_key(&AGENT_APP_ID));
        assert_eq!(table[&OTHER_AGENT_APP_ID].len(), 1);

        device_packages.remove_package(TARGET);
        store
            .mutate(|scope| {
                AppIdAccessPolicy.on_package_uninstalled(
                    scope,
                    &device_packages,
                    TARGET,
                    TARGET_APP_ID,
                    USER,
                );
                Ok(())
            })
            .unwrap();
        assert!(stored(&store, USER).is_empty());
    }

    #[rstest]
    fn test_allowlist_changed(device_packages: PackageSnapshot) {
        let store = store_for(&device_packages);
        let other_agent = Principal::new(OTHER_AGENT_APP_ID, USER);
        grant(&store, &device_packages, agent(), target());
        grant(&store, &device_packages, other_agent, target());

        store
            .mutate(|scope| {
                AppIdAccessPolicy.on_agent_allowlist_changed(scope, &device_packages, None);
                Ok(())
            })
            .unwrap();
        assert_eq!(stored(&store, USER).len(), 2);

        let allowlist = AgentAllowlist::new(vec![AllowlistEntry::new(AGENT)]);
        store
            .mutate(|scope| {
                scope.set_agent_allowlist(Some(allowlist.clone()));
                AppIdAccessPolicy.on_agent_allowlist_changed(
                    scope,
                    &device_packages,
                    Some(&allowlist),
                );
                Ok(())
            })
            .unwrap();
        let table = stored(&store, USER);
        assert_eq!(table.keys().copied().collect::<Vec<AppId>>(), vec![AGENT_APP_ID]);
        assert_eq!(
            request_state(&store, &device_packages, other_agent, target()),
            AccessRequestState::Unrequestable
        );
    }

    #[rstest]
    fn test_app_id_removed_across_users(device_packages: PackageSnapshot) {
        let store = store_for(&device_packages);
        let work_agent = Principal::new(AGENT_APP_ID, 10);
        let work_target = Principal::new(TARGET_APP_ID, 10);
        grant(&store, &device_packages, work_agent, target());
        grant(&store, &device_packages, work_agent, Principal::new(AGENT_APP_ID, USER));
        grant(&store, &device_packages, agent(), work_target);

        store
            .mutate(|scope| {
                AppIdAccessPolicy.on_app_id_removed(scope, TARGET_APP_ID);
                Ok(())
            })
            .unwrap();

        assert!(stored(&store, USER).is_empty());
        let work_table = stored(&store, 10);
        assert_eq!(
            work_table[&AGENT_APP_ID].keys().copied().collect::<Vec<Uid>>(),
            vec![uid_of(USER, AGENT_APP_ID)]
        );
    }

    #[rstest]
    fn test_package_uninstalled_across_users(mut device_packages: PackageSnapshot) {
        let store = store_for(&device_packages);
        let work_agent = Principal::new(AGENT_APP_ID, 10);
        let work_target = Principal::new(TARGET_APP_ID, 10);
        grant(&store, &device_packages, work_agent, target());
        grant(&store, &device_packages, agent(), work_target);
        grant(&store, &device_packages, agent(), target());

        device_packages
            .get_package_state_mut(TARGET)
            .expect("target package")
            .set_installed(USER, false);
        store
            .mutate(|scope| {
                AppIdAccessPolicy.on_package_uninstalled(
                    scope,
                    &device_packages,
                    TARGET,
                    TARGET_APP_ID,
                    USER,
                );
                Ok(())
            })
            .unwrap();

        assert!(
            stored(&store, 10).is_empty(),
            "work agent pointed only at the uninstalled target"
        );
        assert_eq!(
            stored(&store, USER)[&AGENT_APP_ID]
                .keys()
                .copied()
                .collect::<Vec<Uid>>(),
            vec![work_target.uid()],
            "target is still installed for user 10"
        );
    }

    #[rstest]
    fn test_allowlist_changed_across_users(device_packages: PackageSnapshot) {
        let store = store_for(&device_packages);
        let other_agent = Principal::new(OTHER_AGENT_APP_ID, USER);
        grant(&store, &device_packages, Principal::new(AGENT_APP_ID, 10), target());
        grant(&store, &device_packages, agent(), target());
        grant(&store, &device_packages, other_agent, target());

        let allowlist = AgentAllowlist::new(vec![AllowlistEntry::new(OTHER_AGENT)]);
        store
            .mutate(|scope| {
                scope.set_agent_allowlist(Some(allowlist.clone()));
                AppIdAccessPolicy.on_agent_allowlist_changed(
                    scope,
                    &device_packages,
                    Some(&allowlist),
                );
                Ok(())
            })
            .unwrap();

        assert!(stored(&store, 10).is_empty());
        assert_eq!(
            stored(&store, USER).keys().copied().collect::<Vec<AppId>>(),
            vec![OTHER_AGENT_APP_ID]
        );
    }

    #[rstest]
    fn test_valid_agents_and_targets(device_packages: PackageSnapshot) {
        let state = AccessState::new();
        let mut agents = AppIdAccessPolicy.valid_agents(&state, &device_packages, USER);
        agents.sort();
        assert_eq!(
            agents,
            vec![
                String::from(AGENT),
                String::from(AGENT_SIBLING),
                String::from(OTHER_AGENT)
            ]
        );
        assert_eq!(
            AppIdAccessPolicy.valid_targets(&device_packages, USER),
            vec![String::from(AGENT), String::from(TARGET)]
        );
        assert!(AppIdAccessPolicy.valid_agents(&state, &device_packages, 99).is_empty());
    }
}
