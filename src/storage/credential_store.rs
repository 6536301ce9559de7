use crate::common::{DetectorError, PasswordScheme, Result};
use rand::RngCore;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use subtle::ConstantTimeEq;

const SALT_LEN: usize = 16;
const SALT_SEPARATOR: char = '$';

const CREATE_USERS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT UNIQUE NOT NULL,
        password TEXT NOT NULL
    )";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
}

/// SHA-256 of the UTF-8 password as lowercase hex.
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Salted digest in the `<salt_hex>$<digest_hex>` storage form.
pub fn hash_password_salted(password: &str, salt: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    format!("{}{}{}", hex::encode(salt), SALT_SEPARATOR, hex::encode(hasher.finalize()))
}

fn verify_stored(password: &str, stored: &str) -> bool {
    let candidate = match stored.split_once(SALT_SEPARATOR) {
        Some((salt_hex, _)) => match hex::decode(salt_hex) {
            Ok(salt) => hash_password_salted(password, &salt),
            Err(_) => return false,
        },
        None => hash_password(password),
    };
    candidate.as_bytes().ct_eq(stored.as_bytes()).into()
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::ConstraintViolation
                && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// Username/password-digest table in a single SQLite file.
///
/// Every operation opens its own connection; operations on one store are
/// serialized by an internal lock.
pub struct CredentialStore {
    db_path: PathBuf,
    scheme: PasswordScheme,
    lock: Mutex<()>,
}

impl CredentialStore {
    pub fn new(db_path: impl Into<PathBuf>, scheme: PasswordScheme) -> Self {
        Self {
            db_path: db_path.into(),
            scheme,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub fn scheme(&self) -> PasswordScheme {
        self.scheme
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        // The guarded value is unit, so a poisoned lock carries no broken state.
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn open(&self) -> Result<Connection> {
        Ok(Connection::open(&self.db_path)?)
    }

    /// Creates the database file and `users` table when the file is absent.
    /// An existing file is left untouched.
    pub fn initialize(&self) -> Result<()> {
        let _guard = self.guard();
        self.initialize_locked()
    }

    fn initialize_locked(&self) -> Result<()> {
        if self.db_path.exists() {
            return Ok(());
        }

        if let Some(parent) = self.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = self.open()?;
        conn.execute(CREATE_USERS_TABLE, [])?;
        tracing::info!("Created credential store at {}", self.db_path.display());
        Ok(())
    }

    pub fn hash(&self, password: &str) -> String {
        match self.scheme {
            PasswordScheme::Sha256 => hash_password(password),
            PasswordScheme::SaltedSha256 => {
                let mut salt = [0u8; SALT_LEN];
                rand::thread_rng().fill_bytes(&mut salt);
                hash_password_salted(password, &salt)
            }
        }
    }

    /// Returns `Ok(false)` when the username is already taken.
    pub fn register(&self, username: &str, password: &str) -> Result<bool> {
        match self.insert_user(username, password) {
            Ok(_) => Ok(true),
            Err(DetectorError::Conflict(name)) => {
                tracing::warn!("Registration rejected, username exists: {}", name);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Inserts a new user, reporting a taken username as [`DetectorError::Conflict`].
    pub fn insert_user(&self, username: &str, password: &str) -> Result<UserRecord> {
        if username.is_empty() || password.is_empty() {
            return Err(DetectorError::Validation(
                "Username and password are required".into(),
            ));
        }

        let _guard = self.guard();
        self.initialize_locked()?;

        let password_hash = self.hash(password);
        let conn = self.open()?;
        match conn.execute(
            "INSERT INTO users (username, password) VALUES (?1, ?2)",
            params![username, password_hash],
        ) {
            Ok(_) => {
                let id = conn.last_insert_rowid();
                tracing::info!("Registered user {} (id {})", username, id);
                Ok(UserRecord {
                    id,
                    username: username.to_string(),
                    password_hash,
                })
            }
            Err(e) if is_unique_violation(&e) => Err(DetectorError::Conflict(username.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Unknown usernames and wrong passwords both yield `Ok(false)`.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<bool> {
        let _guard = self.guard();
        self.initialize_locked()?;
        let conn = self.open()?;

        let authenticated = match self.scheme {
            PasswordScheme::Sha256 => {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM users WHERE username = ?1 AND password = ?2",
                    params![username, hash_password(password)],
                    |row| row.get(0),
                )?;
                count == 1
            }
            PasswordScheme::SaltedSha256 => {
                let stored: Option<String> = conn
                    .query_row(
                        "SELECT password FROM users WHERE username = ?1",
                        params![username],
                        |row| row.get(0),
                    )
                    .optional()?;
                stored.map_or(false, |stored| verify_stored(password, &stored))
            }
        };

        tracing::debug!("Authentication for {}: {}", username, authenticated);
        Ok(authenticated)
    }

    pub fn find_user(&self, username: &str) -> Result<Option<UserRecord>> {
        let _guard = self.guard();
        self.initialize_locked()?;
        let conn = self.open()?;

        let user = conn
            .query_row(
                "SELECT id, username, password FROM users WHERE username = ?1",
                params![username],
                |row| {
                    Ok(UserRecord {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        password_hash: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    pub fn user_count(&self) -> Result<u64> {
        let _guard = self.guard();
        self.initialize_locked()?;
        let conn = self.open()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
