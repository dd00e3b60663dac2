use std::collections::BTreeSet;
use std::fs;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Sender};
use walkdir::WalkDir;

use crate::flags::AccessFlags;
use crate::ids::{app_id_of, user_id_of, UserId};
use crate::package::PackageSnapshot;
use crate::policy::PolicyRegistry;
use crate::state::{AgentTable, StateSink, UserState, WriteMode};
use crate::utils::{open_file, path_str, write_file_atomic};
use crate::version::STATE_FORMAT_VERSION;
use crate::xml::{StartTag, TagReader, TagWriter};
use crate::{Error, Result};

pub const ACCESS_FILE_NAME: &str = "app_function_access.xml";

const ROOT_TAG: &str = "access";
const ATTR_VERSION: &str = "version";

const TAG_AGENT: &str = "agent";
const TAG_TARGET: &str = "target";
const ATTR_APP_ID: &str = "app-id";
const ATTR_UID: &str = "uid";
const ATTR_FLAGS: &str = "flags";

/// Write one user's state as an `<access>` document with one container per
/// registered policy
pub fn serialize_user_state<W: Write>(
    registry: &PolicyRegistry,
    user_state: &UserState,
    sink: W,
) -> Result<()> {
    let mut writer = TagWriter::new(sink);
    writer.declaration()?;
    writer.tag(
        ROOT_TAG,
        &[(ATTR_VERSION, STATE_FORMAT_VERSION.to_string())],
        |w| {
            for policy in registry.policies() {
                policy.serialize(w, user_state)?;
            }
            Ok(())
        },
    )?;
    writer.finish()
}

/// Parse one user's state. The result is a fresh state, nothing is published
/// unless the whole document was read.
pub fn parse_user_state<R: BufRead>(
    registry: &PolicyRegistry,
    user_id: UserId,
    packages: &PackageSnapshot,
    source: R,
) -> Result<UserState> {
    let mut reader = TagReader::new(source);
    let root = reader.root()?;
    if root.name() != ROOT_TAG {
        return Err(Error::parse(&format!(
            "expected <{}> as root, found <{}>",
            ROOT_TAG,
            root.name()
        )));
    }
    if let Some(version) = root.attribute(ATTR_VERSION) {
        if version != STATE_FORMAT_VERSION.to_string() {
            log::warn!(
                "user {} state has version {}, expected {}",
                user_id,
                version,
                STATE_FORMAT_VERSION
            );
        }
    }

    let mut user_state = UserState::default();
    reader.for_each_tag(&root, |r, container| {
        match registry.for_container_tag(container.name()) {
            Some(policy) => policy.parse(r, &container, user_id, packages, &mut user_state),
            None => {
                log::warn!("ignoring unknown tag <{}> in user {} state", container.name(), user_id);
                Ok(())
            }
        }
    })?;
    Ok(user_state)
}

/// Write an agent table as `<container>` -> `<agent app-id>` ->
/// `<target uid flags/>`
pub fn write_agent_table(writer: &mut TagWriter, container: &str, table: &AgentTable) -> Result<()> {
    writer.tag(container, &[], |w| {
        for (agent_app_id, targets) in table {
            w.tag(TAG_AGENT, &[(ATTR_APP_ID, agent_app_id.to_string())], |w| {
                for (target_uid, flags) in targets {
                    w.empty_tag(
                        TAG_TARGET,
                        &[
                            (ATTR_UID, target_uid.to_string()),
                            (ATTR_FLAGS, (flags.bits() as i32).to_string()),
                        ],
                    )?;
                }
                Ok(())
            })?;
        }
        Ok(())
    })
}

/// Read an agent table written by [write_agent_table]. Malformed integers
/// abort the read; unknown tags are skipped.
pub fn read_agent_table(
    reader: &mut TagReader,
    container: &StartTag,
    user_id: UserId,
) -> Result<AgentTable> {
    let mut table = AgentTable::new();
    reader.for_each_tag(container, |r, agent| {
        if agent.name() != TAG_AGENT {
            log::warn!("ignoring unknown tag <{}> in user {} state", agent.name(), user_id);
            return Ok(());
        }
        let agent_app_id = agent.get_int_attribute(ATTR_APP_ID)?;
        let targets = table.entry(agent_app_id).or_default();
        r.for_each_tag(&agent, |_, target| {
            if target.name() != TAG_TARGET {
                log::warn!(
                    "ignoring unknown tag <{}> under agent {}",
                    target.name(),
                    agent_app_id
                );
                return Ok(());
            }
            let uid = target.get_int_attribute(ATTR_UID)?;
            let flags = target.get_int_attribute(ATTR_FLAGS)?;
            targets.insert(uid, AccessFlags::from_bits_retain(flags as u32));
            Ok(())
        })
    })?;
    Ok(table)
}

/// Drop every agent app id, target user and target app id unknown to
/// `packages`, along with agents left without targets. Returns whether
/// anything was dropped.
pub fn reconcile_agent_table(
    table: &mut AgentTable,
    user_id: UserId,
    packages: &PackageSnapshot,
) -> bool {
    let mut changed = false;
    table.retain(|agent_app_id, targets| {
        if !packages.has_app_id(*agent_app_id) {
            log::warn!(
                "dropping unknown agent app id {} for user {}",
                agent_app_id,
                user_id
            );
            changed = true;
            return false;
        }
        targets.retain(|target_uid, _| {
            let keep = packages.has_user(user_id_of(*target_uid))
                && packages.has_app_id(app_id_of(*target_uid));
            if !keep {
                log::warn!(
                    "dropping unknown target uid {} of agent {} for user {}",
                    target_uid,
                    agent_app_id,
                    user_id
                );
                changed = true;
            }
            keep
        });
        if targets.is_empty() {
            changed = true;
            return false;
        }
        true
    });
    changed
}

/// Read a policy container into `user_state`, healing it against `packages`
pub(crate) fn read_reconciled_agent_table(
    reader: &mut TagReader,
    container: &StartTag,
    user_id: UserId,
    packages: &PackageSnapshot,
    user_state: &mut UserState,
) -> Result<()> {
    let mut table = read_agent_table(reader, container, user_id)?;
    let mut healed = reconcile_agent_table(&mut table, user_id, packages);

    let stored = &mut user_state.app_function_access;
    if !stored.is_empty() {
        // a repeated container is merged, later entries win
        log::warn!("merging repeated <{}> in user {} state", container.name(), user_id);
        healed = true;
    }
    for (agent_app_id, targets) in table {
        stored.entry(agent_app_id).or_default().extend(targets);
    }

    if healed {
        user_state.request_write(WriteMode::Asynchronous);
    }
    Ok(())
}

/// Layout of the persisted state: `<dir>/users/<user id>/app_function_access.xml`
#[derive(Debug, Clone)]
pub struct StateFiles {
    dir: PathBuf,
}

impl StateFiles {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: PathBuf::from(dir),
        }
    }

    pub fn get_dir(&self) -> &Path {
        &self.dir
    }

    fn users_dir(&self) -> PathBuf {
        self.dir.join("users")
    }

    fn user_dir(&self, user_id: UserId) -> PathBuf {
        self.users_dir().join(user_id.to_string())
    }

    pub fn user_file(&self, user_id: UserId) -> PathBuf {
        self.user_dir(user_id).join(ACCESS_FILE_NAME)
    }

    /// `None` if the user has nothing persisted yet
    pub fn read_user(
        &self,
        registry: &PolicyRegistry,
        user_id: UserId,
        packages: &PackageSnapshot,
    ) -> Result<Option<UserState>> {
        let path = self.user_file(user_id);
        let file = match open_file(&path) {
            Ok(f) => f,
            Err(Error::MissingFile(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        log::debug!("reading {}", path_str(&path));
        parse_user_state(registry, user_id, packages, BufReader::new(file))
            .map(Some)
            .map_err(|e| match e {
                Error::Parse(msg) => Error::Parse(format!("{}: {}", path_str(&path), msg)),
                other => other,
            })
    }

    pub fn write_user(
        &self,
        registry: &PolicyRegistry,
        user_id: UserId,
        user_state: &UserState,
    ) -> Result<()> {
        let path = self.user_file(user_id);
        log::debug!("writing {}", path_str(&path));
        write_file_atomic(&path, |w| serialize_user_state(registry, user_state, w))
    }

    pub fn delete_user(&self, user_id: UserId) -> Result<()> {
        let dir = self.user_dir(user_id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Users with a state file on disk
    pub fn stored_user_ids(&self) -> Result<BTreeSet<UserId>> {
        let users_dir = self.users_dir();
        let mut ids = BTreeSet::new();
        if !users_dir.exists() {
            return Ok(ids);
        }
        for entry in WalkDir::new(&users_dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| Error::new_generic(&e))?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            match name.parse::<UserId>() {
                Ok(id) if entry.path().join(ACCESS_FILE_NAME).exists() => {
                    ids.insert(id);
                }
                Ok(_) => {}
                Err(_) => log::warn!("ignoring {} in {}", name, path_str(&users_dir)),
            }
        }
        Ok(ids)
    }
}

enum WriteRequest {
    Write(UserId, Arc<UserState>),
    Remove(UserId),
    Flush(Sender<()>),
}

/// Persists published user states on a background thread.
///
/// Requests are handled in order; failures are logged and otherwise dropped,
/// the next publish of that user writes it again.
pub struct AsyncStateWriter {
    tx: Option<Sender<WriteRequest>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncStateWriter {
    pub fn new(files: StateFiles, registry: Arc<PolicyRegistry>) -> Result<Self> {
        let (tx, rx) = channel::unbounded::<WriteRequest>();
        let handle = thread::Builder::new()
            .name(String::from("afap-state-writer"))
            .spawn(move || {
                for req in rx {
                    match req {
                        WriteRequest::Write(user_id, user_state) => {
                            if let Err(e) = files.write_user(&registry, user_id, &user_state) {
                                log::error!("failed to write state of user {}: {}", user_id, e);
                            }
                        }
                        WriteRequest::Remove(user_id) => {
                            if let Err(e) = files.delete_user(user_id) {
                                log::error!("failed to delete state of user {}: {}", user_id, e);
                            }
                        }
                        WriteRequest::Flush(done) => {
                            _ = done.send(());
                        }
                    }
                }
            })?;
        Ok(Self {
            tx: Some(tx),
            handle: Mutex::new(Some(handle)),
        })
    }

    fn send(&self, req: WriteRequest) {
        let sent = match &self.tx {
            Some(tx) => tx.send(req).is_ok(),
            None => false,
        };
        if !sent {
            log::error!("state writer is gone, dropping request");
        }
    }
}

impl StateSink for AsyncStateWriter {
    fn write_user(&self, user_id: UserId, user_state: Arc<UserState>) {
        self.send(WriteRequest::Write(user_id, user_state));
    }

    fn remove_user(&self, user_id: UserId) {
        self.send(WriteRequest::Remove(user_id));
    }

    fn flush(&self) {
        let (done_tx, done_rx) = channel::bounded(1);
        self.send(WriteRequest::Flush(done_tx));
        _ = done_rx.recv();
    }
}

impl Drop for AsyncStateWriter {
    fn drop(&mut self) {
        // Closing the channel lets the thread drain what's queued and exit
        self.tx.take();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("state writer thread panicked");
            }
        }
    }
}
