//! # Authentication and sessions
//!
//! Users live in a JSON file with unsalted SHA-256 password hashes.
//! Logging in issues an opaque session token which clients attach to
//! every request, sessions are held in memory and die with the exec.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use log::{info, warn};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

// Internal
use comms_if::arm::UserRole;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of random bytes behind a session token, hex doubles this on
/// the wire.
const TOKEN_BYTES: usize = 16;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// One entry of the credential file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub username: String,

    /// Lowercase hex SHA-256 of the password
    pub pass_hash: String,

    pub role: UserRole,
}

/// On-disk shape of the credential file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UserFile {
    users: Vec<User>,
}

/// A live login.
#[derive(Debug, Clone)]
pub struct LoginSession {
    pub username: String,
    pub role: UserRole,

    /// Where the client said it was connecting from, audit only
    pub peer: String,
}

/// Credential store and session table.
pub struct AuthService {
    file_path: Option<PathBuf>,
    users: Vec<User>,
    sessions: HashMap<String, LoginSession>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors raised by the auth service.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Could not read the user file: {0}")]
    FileReadError(std::io::Error),

    #[error("Could not write the user file: {0}")]
    FileWriteError(std::io::Error),

    #[error("Could not parse the user file: {0}")]
    ParseError(serde_json::Error),

    #[error("Unknown username or wrong password")]
    BadCredentials,

    #[error("Unknown or expired session token")]
    UnknownToken,

    #[error("A user with that name already exists")]
    DuplicateUser,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl AuthService {
    /// Load the credential file at the given path.
    ///
    /// A missing file leaves an empty store, nobody can log in until a
    /// file is provided or a user is added by other means.
    pub fn load<P: AsRef<Path>>(file_path: P) -> Result<Self, AuthError> {
        let file_path = file_path.as_ref().to_path_buf();

        let users = if file_path.exists() {
            let json = fs::read_to_string(&file_path).map_err(AuthError::FileReadError)?;
            let file: UserFile = serde_json::from_str(&json).map_err(AuthError::ParseError)?;
            file.users
        } else {
            warn!("No user file at {:?}, nobody will be able to log in", file_path);
            Vec::new()
        };

        info!("{} user(s) loaded", users.len());

        Ok(Self {
            file_path: Some(file_path),
            users,
            sessions: HashMap::new(),
        })
    }

    /// Build an in-memory service from a fixed user list, nothing is
    /// persisted.
    pub fn with_users(users: Vec<User>) -> Self {
        Self {
            file_path: None,
            users,
            sessions: HashMap::new(),
        }
    }

    /// Check a username and password and open a session.
    ///
    /// Unknown usernames and wrong passwords are indistinguishable to the
    /// caller, both come back as [`AuthError::BadCredentials`].
    pub fn login(
        &mut self,
        username: &str,
        password: &str,
        peer: &str,
    ) -> Result<(String, UserRole), AuthError> {
        let (username, role) = match self
            .users
            .iter()
            .find(|u| u.username == username && u.pass_hash == hash_password(password))
        {
            Some(user) => (user.username.clone(), user.role),
            None => {
                warn!("Failed login attempt for {:?} from {}", username, peer);
                return Err(AuthError::BadCredentials);
            }
        };

        let token = new_token();

        info!("User {} logged in from {}", username, peer);

        self.sessions.insert(
            token.clone(),
            LoginSession {
                username,
                role,
                peer: peer.to_string(),
            },
        );

        Ok((token, role))
    }

    /// Close the session behind a token.
    pub fn logout(&mut self, token: &str) -> Result<(), AuthError> {
        match self.sessions.remove(token) {
            Some(session) => {
                info!("User {} logged out", session.username);
                Ok(())
            }
            None => Err(AuthError::UnknownToken),
        }
    }

    /// Look up the live session behind a token.
    pub fn session(&self, token: &str) -> Option<&LoginSession> {
        self.sessions.get(token)
    }

    /// All live sessions, in no particular order.
    pub fn active_sessions(&self) -> Vec<&LoginSession> {
        self.sessions.values().collect()
    }

    /// Usernames and roles of all known users, no hashes.
    pub fn list_users(&self) -> Vec<(String, UserRole)> {
        self.users
            .iter()
            .map(|u| (u.username.clone(), u.role))
            .collect()
    }

    /// Add a user and persist the credential file.
    pub fn add_user(
        &mut self,
        username: &str,
        password: &str,
        role: UserRole,
    ) -> Result<(), AuthError> {
        if self.users.iter().any(|u| u.username == username) {
            return Err(AuthError::DuplicateUser);
        }

        info!("Adding user {} with role {}", username, role);

        self.users.push(User {
            username: username.to_string(),
            pass_hash: hash_password(password),
            role,
        });

        self.save()
    }

    /// Write the credential file back if the service is file backed.
    fn save(&self) -> Result<(), AuthError> {
        let file_path = match &self.file_path {
            Some(path) => path,
            None => return Ok(()),
        };

        let file = UserFile {
            users: self.users.clone(),
        };

        let json = serde_json::to_string_pretty(&file).map_err(AuthError::ParseError)?;

        fs::write(file_path, json).map_err(AuthError::FileWriteError)
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Hash a password the way the credential file stores it.
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Generate a fresh random session token.
fn new_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
