//! Copy-on-write access state.
//!
//! Readers get an immutable [GetStateScope] over the published state. Writers
//! are serialized and work on a [MutateStateScope], a copy of the published
//! state that shares every user's table until that user is touched. Nothing a
//! writer does is visible until its closure returns successfully.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use blanket::blanket;

use crate::allowlist::AgentAllowlist;
use crate::flags::AccessFlags;
use crate::ids::{AppId, Uid, UserId};

/// Target uid to flags
pub type TargetTable = BTreeMap<Uid, AccessFlags>;

/// Agent app id to the agent's targets. Agents never map to an empty table.
pub type AgentTable = BTreeMap<AppId, TargetTable>;

/// Whether a user's state needs to be persisted after it was published
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum WriteMode {
    #[default]
    None,
    Asynchronous,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserState {
    pub app_function_access: AgentTable,
    pub write_mode: WriteMode,
}

impl UserState {
    /// Request a write, never downgrading one that is already pending
    pub fn request_write(&mut self, mode: WriteMode) {
        self.write_mode = self.write_mode.max(mode);
    }

    pub fn get_flags(&self, agent_app_id: AppId, target_uid: Uid) -> Option<AccessFlags> {
        self.app_function_access
            .get(&agent_app_id)
            .and_then(|targets| targets.get(&target_uid))
            .copied()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AccessState {
    users: BTreeMap<UserId, Arc<UserState>>,
    agent_allowlist: Option<Arc<AgentAllowlist>>,
}

impl AccessState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user_id: UserId, user_state: UserState) -> Self {
        self.users.insert(user_id, Arc::new(user_state));
        self
    }

    pub fn has_user(&self, user_id: UserId) -> bool {
        self.users.contains_key(&user_id)
    }

    pub fn user_state(&self, user_id: UserId) -> Option<&UserState> {
        self.users.get(&user_id).map(|it| it.as_ref())
    }

    pub fn user_ids(&self) -> Vec<UserId> {
        self.users.keys().copied().collect()
    }

    pub fn users(&self) -> impl Iterator<Item = (UserId, &UserState)> {
        self.users.iter().map(|(k, v)| (*k, v.as_ref()))
    }

    /// `None` when no allowlist is enforced
    pub fn agent_allowlist(&self) -> Option<&AgentAllowlist> {
        self.agent_allowlist.as_deref()
    }

    /// Clear every pending write request, returning the users that had one
    fn take_dirty_users(&mut self) -> Vec<(UserId, Arc<UserState>)> {
        let mut dirty = Vec::new();
        for (user_id, user_state) in self.users.iter_mut() {
            if user_state.write_mode == WriteMode::None {
                continue;
            }
            Arc::make_mut(user_state).write_mode = WriteMode::None;
            dirty.push((*user_id, Arc::clone(user_state)));
        }
        dirty
    }
}

/// Read access to one published snapshot of the state
pub struct GetStateScope {
    state: Arc<AccessState>,
}

impl GetStateScope {
    pub fn state(&self) -> &AccessState {
        &self.state
    }
}

/// Write access to a private copy of the state
pub struct MutateStateScope {
    new_state: AccessState,
    removed_users: BTreeSet<UserId>,
}

impl MutateStateScope {
    fn new(base: &AccessState) -> Self {
        Self {
            new_state: base.clone(),
            removed_users: BTreeSet::new(),
        }
    }

    pub fn state(&self) -> &AccessState {
        &self.new_state
    }

    /// Mutable access to a user's state, copying it first if it is still
    /// shared with a published snapshot. `None` for unknown users.
    pub fn mutate_user_state(
        &mut self,
        user_id: UserId,
        write_mode: WriteMode,
    ) -> Option<&mut UserState> {
        let user_state = Arc::make_mut(self.new_state.users.get_mut(&user_id)?);
        user_state.request_write(write_mode);
        Some(user_state)
    }

    /// Add a user, keeping any state it already has
    pub fn ensure_user(&mut self, user_id: UserId) -> bool {
        if self.new_state.has_user(user_id) {
            return false;
        }
        self.removed_users.remove(&user_id);
        self.new_state
            .users
            .insert(user_id, Arc::new(UserState::default()));
        true
    }

    pub fn insert_user(&mut self, user_id: UserId, user_state: UserState) {
        self.removed_users.remove(&user_id);
        self.new_state.users.insert(user_id, Arc::new(user_state));
    }

    /// Drop the user's state entirely, its persisted copy is deleted as well
    pub fn remove_user(&mut self, user_id: UserId) -> bool {
        let removed = self.new_state.users.remove(&user_id).is_some();
        if removed {
            self.removed_users.insert(user_id);
        }
        removed
    }

    pub fn set_agent_allowlist(&mut self, allowlist: Option<AgentAllowlist>) {
        self.new_state.agent_allowlist = allowlist.map(Arc::new);
    }
}

/// Where published user states go to be persisted
#[blanket(derive(Arc, Box))]
pub trait StateSink: Send + Sync {
    fn write_user(&self, user_id: UserId, user_state: Arc<UserState>);
    fn remove_user(&self, user_id: UserId);
    /// Block until everything handed to the sink so far is done
    fn flush(&self);
}

pub struct AccessStateStore {
    current: RwLock<Arc<AccessState>>,
    writer: Mutex<()>,
    sink: Option<Box<dyn StateSink>>,
}

impl AccessStateStore {
    /// Publish `initial`, handing any user with a pending write to `sink`
    pub fn new(initial: AccessState, sink: Option<Box<dyn StateSink>>) -> Self {
        let store = Self {
            current: RwLock::new(Arc::new(AccessState::default())),
            writer: Mutex::new(()),
            sink,
        };
        store.publish(initial, BTreeSet::new());
        store
    }

    pub fn in_memory(initial: AccessState) -> Self {
        Self::new(initial, None)
    }

    pub fn snapshot(&self) -> Arc<AccessState> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    pub fn read<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&GetStateScope) -> R,
    {
        let scope = GetStateScope {
            state: self.snapshot(),
        };
        f(&scope)
    }

    /// Run `f` against a private copy of the state and publish the copy if `f`
    /// succeeds. Writers are serialized; readers are never blocked by `f`.
    pub fn mutate<R, F>(&self, f: F) -> crate::Result<R>
    where
        F: FnOnce(&mut MutateStateScope) -> crate::Result<R>,
    {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let base = self.snapshot();
        let mut scope = MutateStateScope::new(&base);
        drop(base);
        let res = f(&mut scope)?;
        self.publish(scope.new_state, scope.removed_users);
        Ok(res)
    }

    fn publish(&self, mut state: AccessState, removed_users: BTreeSet<UserId>) {
        let dirty = state.take_dirty_users();
        {
            let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
            *guard = Arc::new(state);
        }
        let sink = match &self.sink {
            Some(v) => v,
            None => return,
        };
        for user_id in removed_users {
            sink.remove_user(user_id);
        }
        for (user_id, user_state) in dirty {
            log::trace!("scheduling write of user {}", user_id);
            sink.write_user(user_id, user_state);
        }
    }

    /// Wait for all scheduled writes to land
    pub fn flush(&self) {
        if let Some(sink) = &self.sink {
            sink.flush();
        }
    }
}
