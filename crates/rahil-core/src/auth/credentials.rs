//! Durable storage for the session: access token, refresh token, cached
//! user profile and device id.
//!
//! Every save is written through immediately. `load` tolerates missing or
//! corrupt individual keys so a bad profile blob never costs the user
//! their tokens.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use keyring::Entry;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use super::Session;
use crate::models::UserProfile;

/// Session file name in the data directory
const SESSION_FILE: &str = "session.json";

/// Keychain service name
pub const KEYRING_SERVICE: &str = "the-rahil";

const TOKEN_KEY: &str = "token";
const REFRESH_TOKEN_KEY: &str = "refresh_token";
const USER_KEY: &str = "user";
const DEVICE_ID_KEY: &str = "device_id";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Credential file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode credentials: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Keychain access failed: {0}")]
    Keyring(#[from] keyring::Error),
}

/// Key-value persistence for the session.
///
/// Each save writes one field independently. `clear_all` removes every key
/// at once; no reader may observe a half-cleared store.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Session;
    fn save_token(&self, token: &str) -> Result<(), StoreError>;
    fn save_refresh_token(&self, refresh_token: &str) -> Result<(), StoreError>;
    fn save_user(&self, user: &UserProfile) -> Result<(), StoreError>;
    fn save_device_id(&self, device_id: u64) -> Result<(), StoreError>;
    fn clear_all(&self) -> Result<(), StoreError>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn parse_user(raw: &str) -> Option<UserProfile> {
    match serde_json::from_str(raw) {
        Ok(user) => Some(user),
        Err(e) => {
            warn!(error = %e, "Ignoring corrupt cached user profile");
            None
        }
    }
}

// ============================================================================
// File store
// ============================================================================

/// Stores the session as a single `session.json`.
///
/// Writes go to a temp file that is fsynced and renamed over the original,
/// so each save is atomic and durable. `clear_all` is a single unlink.
pub struct FileCredentialStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(SESSION_FILE),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the raw fields. A missing or corrupt file yields no fields;
    /// any other read failure is an error.
    fn read_fields(&self) -> Result<Map<String, Value>, StoreError> {
        let contents = match fs::read(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice::<Value>(&contents) {
            Ok(Value::Object(fields)) => Ok(fields),
            Ok(_) | Err(_) => {
                warn!(path = ?self.path, "Session file is corrupt, ignoring it");
                Ok(Map::new())
            }
        }
    }

    fn write_fields(&self, fields: &Map<String, Value>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        {
            let mut options = OpenOptions::new();
            options.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                options.mode(0o600);
            }
            let mut file = options.open(&tmp)?;
            file.write_all(&serde_json::to_vec_pretty(fields)?)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn save_field(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let _guard = lock(&self.lock);
        let mut fields = self.read_fields()?;
        fields.insert(key.to_string(), value);
        self.write_fields(&fields)
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Session {
        let fields = {
            let _guard = lock(&self.lock);
            self.read_fields().unwrap_or_else(|e| {
                warn!(path = ?self.path, error = %e, "Failed to read session file");
                Map::new()
            })
        };

        let string_field = |key: &str| {
            non_empty(fields.get(key).and_then(Value::as_str).map(str::to_string))
        };

        let user = match fields.get(USER_KEY) {
            None | Some(Value::Null) => None,
            Some(Value::String(raw)) => parse_user(raw),
            Some(value) => match serde_json::from_value(value.clone()) {
                Ok(user) => Some(user),
                Err(e) => {
                    warn!(error = %e, "Ignoring corrupt cached user profile");
                    None
                }
            },
        };

        let device_id = fields.get(DEVICE_ID_KEY).and_then(|v| {
            let id = v.as_u64();
            if id.is_none() && !v.is_null() {
                warn!("Ignoring malformed device id");
            }
            id
        });

        Session {
            access_token: string_field(TOKEN_KEY),
            refresh_token: string_field(REFRESH_TOKEN_KEY),
            user,
            device_id,
        }
    }

    fn save_token(&self, token: &str) -> Result<(), StoreError> {
        self.save_field(TOKEN_KEY, Value::from(token))
    }

    fn save_refresh_token(&self, refresh_token: &str) -> Result<(), StoreError> {
        self.save_field(REFRESH_TOKEN_KEY, Value::from(refresh_token))
    }

    fn save_user(&self, user: &UserProfile) -> Result<(), StoreError> {
        self.save_field(USER_KEY, serde_json::to_value(user)?)
    }

    fn save_device_id(&self, device_id: u64) -> Result<(), StoreError> {
        self.save_field(DEVICE_ID_KEY, Value::from(device_id))
    }

    fn clear_all(&self) -> Result<(), StoreError> {
        let _guard = lock(&self.lock);
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = ?self.path, "Session file removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// Keychain store
// ============================================================================

/// Stores each key as a separate OS keychain entry.
///
/// The profile is kept as JSON text. All access is serialized so an
/// in-process reader never sees a partially cleared keychain.
pub struct KeyringCredentialStore {
    token: Entry,
    refresh_token: Entry,
    user: Entry,
    device_id: Entry,
    lock: Mutex<()>,
}

impl KeyringCredentialStore {
    pub fn new() -> Result<Self, StoreError> {
        Self::with_service(KEYRING_SERVICE)
    }

    pub fn with_service(service: &str) -> Result<Self, StoreError> {
        Ok(Self {
            token: Entry::new(service, TOKEN_KEY)?,
            refresh_token: Entry::new(service, REFRESH_TOKEN_KEY)?,
            user: Entry::new(service, USER_KEY)?,
            device_id: Entry::new(service, DEVICE_ID_KEY)?,
            lock: Mutex::new(()),
        })
    }

    fn read(entry: &Entry) -> Option<String> {
        match entry.get_password() {
            Ok(value) => non_empty(Some(value)),
            Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                warn!(error = %e, "Failed to read keychain entry");
                None
            }
        }
    }

    fn write(&self, entry: &Entry, value: &str) -> Result<(), StoreError> {
        let _guard = lock(&self.lock);
        entry.set_password(value)?;
        Ok(())
    }

    fn delete(entry: &Entry) -> Result<(), StoreError> {
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn load(&self) -> Session {
        let _guard = lock(&self.lock);
        let device_id = Self::read(&self.device_id).and_then(|raw| match raw.parse() {
            Ok(id) => Some(id),
            Err(_) => {
                warn!("Ignoring malformed device id");
                None
            }
        });

        Session {
            access_token: Self::read(&self.token),
            refresh_token: Self::read(&self.refresh_token),
            user: Self::read(&self.user).as_deref().and_then(parse_user),
            device_id,
        }
    }

    fn save_token(&self, token: &str) -> Result<(), StoreError> {
        self.write(&self.token, token)
    }

    fn save_refresh_token(&self, refresh_token: &str) -> Result<(), StoreError> {
        self.write(&self.refresh_token, refresh_token)
    }

    fn save_user(&self, user: &UserProfile) -> Result<(), StoreError> {
        let raw = serde_json::to_string(user)?;
        self.write(&self.user, &raw)
    }

    fn save_device_id(&self, device_id: u64) -> Result<(), StoreError> {
        self.write(&self.device_id, &device_id.to_string())
    }

    /// Refresh token goes first, access token last: an interrupted clear
    /// leaves at worst an access token that cannot be refreshed.
    fn clear_all(&self) -> Result<(), StoreError> {
        let _guard = lock(&self.lock);
        for entry in [&self.refresh_token, &self.device_id, &self.user, &self.token] {
            Self::delete(entry)?;
        }
        Ok(())
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Process-local store with no durability. Useful for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryCredentialStore {
    session: Mutex<Session>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: Session) -> Self {
        Self {
            session: Mutex::new(session),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Session {
        lock(&self.session).clone()
    }

    fn save_token(&self, token: &str) -> Result<(), StoreError> {
        lock(&self.session).access_token = Some(token.to_string());
        Ok(())
    }

    fn save_refresh_token(&self, refresh_token: &str) -> Result<(), StoreError> {
        lock(&self.session).refresh_token = Some(refresh_token.to_string());
        Ok(())
    }

    fn save_user(&self, user: &UserProfile) -> Result<(), StoreError> {
        lock(&self.session).user = Some(user.clone());
        Ok(())
    }

    fn save_device_id(&self, device_id: u64) -> Result<(), StoreError> {
        lock(&self.session).device_id = Some(device_id);
        Ok(())
    }

    fn clear_all(&self) -> Result<(), StoreError> {
        *lock(&self.session) = Session::default();
        Ok(())
    }
}
