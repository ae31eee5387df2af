use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use anyhow::Context;
use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::{debug, info, trace};

use crate::error::StorageError;

/// A change written by some other context onto a shared key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    /// `None` when the key was removed.
    pub new_value: Option<String>,
}

pub type Listener = Arc<dyn Fn(&StorageEvent) + Send + Sync>;

/// Minimal key-value substrate the task store persists through.
///
/// Listeners registered with [`Storage::subscribe`] hear about writes made by
/// *other* contexts on the same substrate, never about their own.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
    fn subscribe(&self, listener: Listener) -> Subscription;
}

type ContextId = u64;

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    listeners: Mutex<BTreeMap<u64, (ContextId, Listener)>>,
}

impl Registry {
    fn next_context(&self) -> ContextId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn register(self: &Arc<Self>, context: ContextId, listener: Listener) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().insert(id, (context, listener));
        trace!(subscription = id, context, "registered storage listener");
        Subscription {
            registry: Arc::downgrade(self),
            id,
        }
    }

    fn notify(&self, origin: ContextId, event: &StorageEvent) {
        // Listeners may call back into storage, so run them unlocked.
        let targets: Vec<Listener> = self
            .listeners
            .lock()
            .values()
            .filter(|(context, _)| *context != origin)
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        trace!(key = %event.key, listeners = targets.len(), "dispatching storage event");
        for listener in targets {
            listener(event);
        }
    }
}

/// Keeps a listener registered; dropping it unsubscribes.
#[must_use = "dropping a subscription unregisters its listener"]
pub struct Subscription {
    registry: Weak<Registry>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.listeners.lock().remove(&self.id);
            trace!(subscription = self.id, "unregistered storage listener");
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

struct MemoryShared {
    data: Mutex<BTreeMap<String, String>>,
    registry: Arc<Registry>,
    quota: Option<usize>,
    writes: AtomicU64,
}

/// In-process substrate shared by any number of contexts, the way one
/// browser profile's local storage is shared by its tabs.
#[derive(Clone)]
pub struct MemoryStorage {
    shared: Arc<MemoryShared>,
    context: ContextId,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_quota(None)
    }

    /// Refuses writes that would grow the total stored bytes past `quota`.
    pub fn with_quota(quota: Option<usize>) -> Self {
        let registry = Arc::new(Registry::default());
        let context = registry.next_context();
        Self {
            shared: Arc::new(MemoryShared {
                data: Mutex::new(BTreeMap::new()),
                registry,
                quota,
                writes: AtomicU64::new(0),
            }),
            context,
        }
    }

    /// A new handle onto the same data with its own notification identity.
    pub fn context(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            context: self.shared.registry.next_context(),
        }
    }

    /// Number of successful `set` calls and removals of existing keys,
    /// across every context.
    pub fn write_count(&self) -> u64 {
        self.shared.writes.load(Ordering::SeqCst)
    }

    pub fn keys(&self) -> Vec<String> {
        self.shared.data.lock().keys().cloned().collect()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.shared.data.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        {
            let mut data = self.shared.data.lock();
            if let Some(quota) = self.shared.quota {
                let others: usize = data
                    .iter()
                    .filter(|(k, _)| k.as_str() != key)
                    .map(|(k, v)| k.len() + v.len())
                    .sum();
                if others + key.len() + value.len() > quota {
                    return Err(StorageError::QuotaExceeded {
                        key: key.to_string(),
                        len: value.len(),
                    });
                }
            }
            data.insert(key.to_string(), value.to_string());
        }
        self.shared.writes.fetch_add(1, Ordering::SeqCst);
        self.shared.registry.notify(
            self.context,
            &StorageEvent {
                key: key.to_string(),
                new_value: Some(value.to_string()),
            },
        );
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let existed = self.shared.data.lock().remove(key).is_some();
        if existed {
            self.shared.writes.fetch_add(1, Ordering::SeqCst);
            self.shared.registry.notify(
                self.context,
                &StorageEvent {
                    key: key.to_string(),
                    new_value: None,
                },
            );
        }
        Ok(())
    }

    fn subscribe(&self, listener: Listener) -> Subscription {
        self.shared.registry.register(self.context, listener)
    }
}

/// One JSON file per key under a data directory.
///
/// Writes go through a temp file in the same directory and are renamed into
/// place. Notifications reach other contexts of the same process only.
#[derive(Clone)]
pub struct FileStorage {
    pub data_dir: PathBuf,
    registry: Arc<Registry>,
    context: ContextId,
}

impl FileStorage {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        info!(data_dir = %data_dir.display(), "opened file storage");

        let registry = Arc::new(Registry::default());
        let context = registry.next_context();
        Ok(Self {
            data_dir,
            registry,
            context,
        })
    }

    pub fn context(&self) -> Self {
        Self {
            data_dir: self.data_dir.clone(),
            registry: Arc::clone(&self.registry),
            context: self.registry.next_context(),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && !key.contains(['/', '\\', '\0']);
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.data_dir.join(format!("{key}.json")))
    }
}

impl Storage for FileStorage {
    #[tracing::instrument(skip(self))]
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(text) => {
                debug!(file = %path.display(), len = text.len(), "read key");
                Ok(Some(text))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    #[tracing::instrument(skip(self, value), fields(len = value.len()))]
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let mut temp = NamedTempFile::new_in(&self.data_dir)?;
        temp.write_all(value.as_bytes())?;
        temp.flush()?;
        temp.persist(&path).map_err(|err| StorageError::Io(err.error))?;
        debug!(file = %path.display(), "wrote key atomically");

        self.registry.notify(
            self.context,
            &StorageEvent {
                key: key.to_string(),
                new_value: Some(value.to_string()),
            },
        );
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                self.registry.notify(
                    self.context,
                    &StorageEvent {
                        key: key.to_string(),
                        new_value: None,
                    },
                );
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn subscribe(&self, listener: Listener) -> Subscription {
        self.registry.register(self.context, listener)
    }
}
