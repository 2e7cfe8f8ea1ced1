//! Small file-backed JSON store for values that should survive a restart.
//!
//! The file carries an `_expires` header (Unix seconds). Once it has passed
//! the store is wiped and restarted with a fresh lifetime, so whatever is kept
//! here is a cache, never the source of truth. Long-lived stores (one year)
//! are meant for the credential access token; short-lived ones (30 minutes)
//! for anything derived from it.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value as JsonValue};
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, instrument};

use crate::error::Error;
use crate::keys::KeyMaterial;

const EXPIRES_KEY: &str = "_expires";
const YEAR_KEY: &str = "_year";
const KEYS_KEY: &str = "keys";

/// How long a store lives before it resets itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    /// 30 minutes.
    Short,
    /// One year.
    Long,
}

impl Lifetime {
    fn duration(self) -> Duration {
        match self {
            Self::Short => Duration::minutes(30),
            Self::Long => Duration::days(365),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KeyStore {
    path: PathBuf,
}

impl KeyStore {
    /// Opens the store at `path`, creating or resetting it as needed.
    ///
    /// An existing file keeps the lifetime it was created with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] on I/O failure or if an existing file has no
    /// `_expires` header.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, lifetime: Lifetime) -> Result<Self, Error> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
        };

        if !store.path.exists() {
            debug!(?lifetime, "creating key store");
            store.initialize(lifetime)?;
            return Ok(store);
        }

        let db = store.read()?;
        let expires = db
            .get(EXPIRES_KEY)
            .and_then(JsonValue::as_i64)
            .ok_or_else(|| Error::Store("store header `_expires` not found".into()))?;
        if expires < OffsetDateTime::now_utc().unix_timestamp() {
            let kept = if db.get(YEAR_KEY).and_then(JsonValue::as_bool) == Some(true) {
                Lifetime::Long
            } else {
                Lifetime::Short
            };
            info!(lifetime = ?kept, "key store expired, resetting");
            store.initialize(kept)?;
        }
        Ok(store)
    }

    /// Gets a value by key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the file cannot be read or the value has another shape.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, Error> {
        match self.read()?.remove(key) {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| Error::Store(format!("{key}: {e}"))),
            None => Ok(None),
        }
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an empty or reserved key, and
    /// [`Error::Store`] on I/O failure.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), Error> {
        check_key(key)?;
        let value = serde_json::to_value(value)?;
        if value.is_null() {
            return Err(Error::InvalidArgument(format!("no value for {key}")));
        }
        let mut db = self.read()?;
        db.insert(key.to_owned(), value);
        self.write(&db)
    }

    /// Removes a key. Returns whether it was present.
    ///
    /// # Errors
    ///
    /// Same as [`KeyStore::set`].
    pub fn remove(&self, key: &str) -> Result<bool, Error> {
        check_key(key)?;
        let mut db = self.read()?;
        if db.remove(key).is_none() {
            return Ok(false);
        }
        self.write(&db)?;
        Ok(true)
    }

    /// # Errors
    ///
    /// Returns [`Error::Store`] if the file cannot be read.
    pub fn contains(&self, key: &str) -> Result<bool, Error> {
        Ok(self
            .read()?
            .get(key)
            .is_some_and(|value| !value.is_null()))
    }

    /// All user entries, headers excluded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the file cannot be read.
    pub fn entries(&self) -> Result<Map<String, JsonValue>, Error> {
        let mut db = self.read()?;
        db.remove(EXPIRES_KEY);
        db.remove(YEAR_KEY);
        Ok(db)
    }

    /// # Errors
    ///
    /// Returns [`Error::Store`] on I/O failure.
    pub fn save_keys(&self, keys: &KeyMaterial) -> Result<(), Error> {
        self.set(KEYS_KEY, keys)
    }

    /// # Errors
    ///
    /// Returns [`Error::Store`] if stored keys are unreadable or invalid.
    pub fn load_keys(&self) -> Result<Option<KeyMaterial>, Error> {
        self.get(KEYS_KEY)
    }

    fn initialize(&self, lifetime: Lifetime) -> Result<(), Error> {
        let expires = (OffsetDateTime::now_utc() + lifetime.duration()).unix_timestamp();
        let mut db = Map::new();
        db.insert(EXPIRES_KEY.into(), expires.into());
        if lifetime == Lifetime::Long {
            db.insert(YEAR_KEY.into(), true.into());
        }
        self.write(&db)
    }

    fn read(&self) -> Result<Map<String, JsonValue>, Error> {
        let text = fs::read_to_string(&self.path)
            .map_err(|e| Error::Store(format!("{}: {e}", self.path.display())))?;
        serde_json::from_str(&text)
            .map_err(|e| Error::Store(format!("{}: {e}", self.path.display())))
    }

    fn write(&self, db: &Map<String, JsonValue>) -> Result<(), Error> {
        let text = serde_json::to_string_pretty(db)?;
        fs::write(&self.path, text)
            .map_err(|e| Error::Store(format!("{}: {e}", self.path.display())))
    }
}

fn check_key(key: &str) -> Result<(), Error> {
    if key.is_empty() {
        return Err(Error::InvalidArgument("no key provided".into()));
    }
    if key == EXPIRES_KEY || key == YEAR_KEY {
        return Err(Error::InvalidArgument(format!("`{key}` is reserved")));
    }
    Ok(())
}
