use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::codec::{encode_tasks, parse_tasks};
use crate::error::{DecodeError, Result, TaskError};
use crate::filter::{StatusFilter, filter};
use crate::ids::IdClock;
use crate::mutation::{Action, apply_mutation};
use crate::namespace::{Layout, NamespaceKeys, resolve_namespace};
use crate::notify::Notifier;
use crate::storage::{Storage, StorageEvent, Subscription};
use crate::task::{Role, Task, TaskCollection};

/// Where a session is in its load cycle. Writes happen only in `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifecycle {
    #[default]
    Uninitialized,
    Loading,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    Replaced { count: usize },
    NoChange,
}

#[derive(Debug, Clone)]
struct Session {
    user: String,
    role: Role,
    keys: NamespaceKeys,
}

/// Reads the first of `keys.primary`, `keys.fallback` that decodes, or an
/// empty collection. Decode and read failures are logged, never returned.
#[instrument(skip(storage, ids), fields(primary = %keys.primary, fallback = %keys.fallback))]
pub fn load_tasks<S: Storage + ?Sized>(
    storage: &S,
    keys: &NamespaceKeys,
    ids: &IdClock,
) -> TaskCollection {
    for key in [&keys.primary, &keys.fallback] {
        let raw = match storage.get(key) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(%key, error = %err, "failed reading storage key");
                continue;
            }
        };
        match parse_tasks(raw.as_deref(), ids) {
            Ok(tasks) => {
                debug!(%key, count = tasks.len(), "loaded tasks");
                return tasks;
            }
            Err(DecodeError::Absent) => debug!(%key, "no record stored"),
            Err(err) => warn!(%key, error = %err, "discarding undecodable record"),
        }
    }

    debug!("no tasks found, starting empty");
    Vec::new()
}

/// The task store of one browsing context: one session at a time, its
/// in-memory collection, and the queue of changes other contexts wrote.
pub struct TaskStore<S: Storage> {
    storage: S,
    layout: Layout,
    ids: IdClock,
    notifier: Arc<dyn Notifier>,
    session: Option<Session>,
    lifecycle: Lifecycle,
    tasks: TaskCollection,
    inbox: Arc<Mutex<VecDeque<StorageEvent>>>,
    subscription: Option<Subscription>,
}

impl<S: Storage> TaskStore<S> {
    pub fn new(storage: S, layout: Layout, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            storage,
            layout,
            ids: IdClock::new(),
            notifier,
            session: None,
            lifecycle: Lifecycle::Uninitialized,
            tasks: Vec::new(),
            inbox: Arc::new(Mutex::new(VecDeque::new())),
            subscription: None,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn user(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.user.as_str())
    }

    pub fn role(&self) -> Option<Role> {
        self.session.as_ref().map(|s| s.role)
    }

    pub fn keys(&self) -> Option<&NamespaceKeys> {
        self.session.as_ref().map(|s| &s.keys)
    }

    /// Whether this context is currently listening for other contexts' writes.
    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn resolve_namespace(&self, user: &str, role: Role) -> NamespaceKeys {
        resolve_namespace(user, role, self.layout)
    }

    /// Loads what `user` acting as `role` would see, without touching the
    /// current session.
    pub fn load(&self, user: &str, role: Role) -> TaskCollection {
        let keys = self.resolve_namespace(user, role);
        load_tasks(&self.storage, &keys, &self.ids)
    }

    /// Starts a session and enters `Loading`. Saves stay suppressed until
    /// [`TaskStore::finish_initial_load`] runs.
    #[instrument(skip(self))]
    pub fn begin_session(&mut self, user: &str, role: Role) {
        self.lifecycle = Lifecycle::Loading;
        self.tasks.clear();
        self.inbox.lock().clear();

        let keys = self.resolve_namespace(user, role);
        info!(user, %role, primary = %keys.primary, "starting session");
        self.session = Some(Session {
            user: user.to_string(),
            role,
            keys,
        });

        let inbox = Arc::clone(&self.inbox);
        self.subscription = Some(self.storage.subscribe(Arc::new(move |event: &StorageEvent| {
            inbox.lock().push_back(event.clone());
        })));
    }

    /// Runs the initial load and only then marks the session ready.
    #[instrument(skip(self))]
    pub fn finish_initial_load(&mut self) -> &[Task] {
        let Some(session) = self.session.as_ref() else {
            warn!("initial load requested without a session");
            return &self.tasks;
        };
        if self.lifecycle == Lifecycle::Ready {
            return &self.tasks;
        }

        self.tasks = load_tasks(&self.storage, &session.keys, &self.ids);
        self.lifecycle = Lifecycle::Ready;
        info!(count = self.tasks.len(), "initial load finished");
        &self.tasks
    }

    pub fn open_session(&mut self, user: &str, role: Role) -> &[Task] {
        self.begin_session(user, role);
        self.finish_initial_load()
    }

    #[instrument(skip(self))]
    pub fn end_session(&mut self) {
        self.subscription = None;
        self.session = None;
        self.tasks.clear();
        self.inbox.lock().clear();
        self.lifecycle = Lifecycle::Uninitialized;
        info!("session ended");
    }

    /// Persists the current collection. Returns whether anything was written.
    ///
    /// Skipped before the initial load finishes and for viewers.
    #[instrument(skip(self), fields(count = self.tasks.len()))]
    pub fn save(&self) -> Result<bool> {
        let Some(session) = self.session.as_ref() else {
            return Ok(false);
        };
        if self.lifecycle != Lifecycle::Ready {
            debug!("skip save during initial load");
            return Ok(false);
        }
        if !session.role.can_write() {
            return Ok(false);
        }

        let payload = encode_tasks(&self.tasks).map_err(|err| TaskError::Storage {
            key: session.keys.primary.clone(),
            reason: err.to_string(),
        })?;
        for key in session.keys.write_targets() {
            if let Err(err) = self.storage.set(key, &payload) {
                error!(%key, error = %err, "failed saving tasks");
                let err = TaskError::Storage {
                    key: key.to_string(),
                    reason: err.to_string(),
                };
                self.notifier.error(&err.to_string());
                return Err(err);
            }
            debug!(%key, "saved tasks");
        }
        Ok(true)
    }

    /// Applies `action` for the session user and persists the result.
    ///
    /// Refused mutations leave the collection unchanged. When the write
    /// fails the in-memory collection keeps the change, the storage error is
    /// returned, and no outcome notice is sent. Deletions are announced at
    /// error level.
    #[instrument(skip(self))]
    pub fn apply(&mut self, action: Action) -> Result<&[Task]> {
        let Some(session) = self.session.as_ref() else {
            return Err(TaskError::NotReady);
        };
        if self.lifecycle != Lifecycle::Ready {
            warn!("mutation attempted before initial load finished");
            return Err(TaskError::NotReady);
        }

        match apply_mutation(&self.tasks, &action, session.role, &self.ids) {
            Ok(next) => {
                self.tasks = next;
                self.save()?;
                let message = action.success_message();
                match action {
                    Action::Toggle { .. } => self.notifier.info(message),
                    Action::Delete { .. } => self.notifier.error(message),
                    Action::Add { .. } | Action::Edit { .. } => self.notifier.success(message),
                }
                Ok(&self.tasks)
            }
            Err(err) => {
                self.notifier.error(&err.to_string());
                Err(err)
            }
        }
    }

    pub fn add(&mut self, title: &str, description: &str) -> Result<&[Task]> {
        let author = self.user().unwrap_or_default().to_string();
        self.apply(Action::Add {
            title: title.to_string(),
            description: description.to_string(),
            author,
        })
    }

    pub fn toggle(&mut self, id: i64) -> Result<&[Task]> {
        self.apply(Action::Toggle { id })
    }

    pub fn edit(&mut self, id: i64, title: &str, description: &str) -> Result<&[Task]> {
        self.apply(Action::Edit {
            id,
            title: title.to_string(),
            description: description.to_string(),
        })
    }

    pub fn delete(&mut self, id: i64) -> Result<&[Task]> {
        self.apply(Action::Delete { id })
    }

    /// Replaces the collection with what another context wrote to one of
    /// this session's keys. Never saves; applying the same change twice
    /// yields the same collection.
    #[instrument(skip(self, raw), fields(has_value = raw.is_some()))]
    pub fn reconcile_external_change(&mut self, key: &str, raw: Option<&str>) -> Reconciled {
        let Some(session) = self.session.as_ref() else {
            return Reconciled::NoChange;
        };
        if !session.keys.is_relevant(key) {
            debug!("ignoring change to unrelated key");
            return Reconciled::NoChange;
        }

        self.tasks = match parse_tasks(raw, &self.ids) {
            Ok(tasks) => {
                debug!(count = tasks.len(), "storage event loaded tasks");
                tasks
            }
            Err(DecodeError::Absent) => {
                debug!("storage event: key cleared");
                Vec::new()
            }
            Err(err) => {
                warn!(error = %err, "storage event carried undecodable record");
                Vec::new()
            }
        };
        Reconciled::Replaced {
            count: self.tasks.len(),
        }
    }

    /// Applies queued changes from other contexts. Events wait in the queue
    /// until the initial load has finished.
    pub fn pump(&mut self) -> usize {
        if self.lifecycle != Lifecycle::Ready {
            return 0;
        }
        let events: Vec<StorageEvent> = self.inbox.lock().drain(..).collect();
        let mut applied = 0;
        for event in events {
            if let Reconciled::Replaced { .. } =
                self.reconcile_external_change(&event.key, event.new_value.as_deref())
            {
                applied += 1;
            }
        }
        applied
    }

    pub fn filtered(&self, query: &str, status: StatusFilter) -> Vec<Task> {
        filter(&self.tasks, query, status)
    }
}
