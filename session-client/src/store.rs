use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use common_auth::{AuthError, AuthResult};
use tracing::{debug, warn};

pub const TOKEN_KEY: &str = "token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Durable key/value storage for session credentials.
///
/// Reads are synchronous so the request pipeline can decide on the
/// authorization header before any network call is issued.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// Process-local store; contents vanish with the process.
#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map = entries
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, key: &str) -> Option<String> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        guard.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        guard.insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        guard.remove(key);
    }
}

/// JSON-file backed store that survives process restarts.
///
/// The in-memory map is the read source; every mutation rewrites the file
/// through a temporary sibling and a rename.
pub struct FileSessionStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, String>>,
}

impl FileSessionStore {
    /// Opens the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> AuthResult<Self> {
        let path = path.into();
        let entries = match fs::read(&path) {
            Ok(raw) if raw.iter().all(u8::is_ascii_whitespace) => HashMap::new(),
            Ok(raw) => serde_json::from_slice(&raw).map_err(|err| {
                AuthError::Storage(format!("{} is not a session file: {err}", path.display()))
            })?,
            Err(err) if err.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(err) => {
                return Err(AuthError::Storage(format!(
                    "failed to read {}: {err}",
                    path.display()
                )))
            }
        };

        debug!(path = %path.display(), keys = entries.len(), "opened session store");
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &HashMap<String, String>) {
        if let Err(err) = write_atomically(&self.path, entries) {
            warn!(?err, path = %self.path.display(), "failed to persist session store");
        }
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self, key: &str) -> Option<String> {
        let guard = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        guard.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut guard = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        guard.insert(key.to_string(), value.to_string());
        self.persist(&guard);
    }

    fn remove(&self, key: &str) {
        let mut guard = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if guard.remove(key).is_some() {
            self.persist(&guard);
        }
    }
}

fn write_atomically(path: &Path, entries: &HashMap<String, String>) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let payload = serde_json::to_vec_pretty(entries)?;
    let staging = path.with_extension("tmp");
    fs::write(&staging, payload)?;
    fs::rename(&staging, path)
}
