use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use log::info;
use rand::RngCore;

use crate::message::{MessageError, MessageObject};

use super::{ErrorKind, ProtocolError};

/// Number of random bytes in a session id; the hex form is twice as long.
pub const SESSION_ID_BYTES: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub passphrase: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, passphrase: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            passphrase: passphrase.into(),
        }
    }
}

/// Server-side login state: configured users and the last session issued to
/// each of them.
#[derive(Debug)]
pub struct SessionStore {
    version: String,
    users: Vec<Credentials>,
    sessions: Mutex<HashMap<String, String>>,
}

impl SessionStore {
    pub fn new(version: impl Into<String>, users: Vec<Credentials>) -> Self {
        Self {
            version: version.into(),
            users,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Checks the protocol version, then the credentials, and issues a fresh
    /// session id. Any session previously issued to `user` stops validating.
    pub fn login(
        &self,
        user: &str,
        passphrase: &str,
        version: &str,
    ) -> Result<String, ProtocolError> {
        if version != self.version {
            return Err(ProtocolError::new(
                ErrorKind::VersionMismatch,
                format!("client speaks {version}, server speaks {}", self.version),
            ));
        }

        if !self
            .users
            .iter()
            .any(|c| c.user == user && c.passphrase == passphrase)
        {
            return Err(ProtocolError::new(
                ErrorKind::LoginFailed,
                format!("invalid credentials for '{user}'"),
            ));
        }

        let session_id = generate_session_id();
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user.to_string(), session_id.clone());

        info!("user '{user}' logged in");
        Ok(session_id)
    }

    /// Succeeds only if `session_id` is the latest one issued to `user`.
    pub fn validate(&self, user: &str, session_id: &str) -> Result<(), ProtocolError> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        match sessions.get(user) {
            Some(current) if current == session_id => Ok(()),
            Some(_) => Err(ProtocolError::new(
                ErrorKind::SessionInvalid,
                format!("session for '{user}' has been replaced or revoked"),
            )),
            None => Err(ProtocolError::new(
                ErrorKind::NotLoggedIn,
                format!("'{user}' is not logged in"),
            )),
        }
    }

    /// Drops the session of `user`, if any.
    pub fn logout(&self, user: &str) -> bool {
        let removed = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(user)
            .is_some();
        if removed {
            info!("user '{user}' logged out");
        }
        removed
    }
}

/// Hex-encoded bytes from the thread-local CSPRNG.
fn generate_session_id() -> String {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Credentials a client received from a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user: String,
    pub session_id: String,
}

impl Session {
    /// Stamps `user` and `sessionId` onto a privileged request.
    pub fn authorize(&self, request: &mut MessageObject) -> Result<(), MessageError> {
        request.set("user", self.user.as_str())?;
        request.set("sessionId", self.session_id.as_str())?;
        Ok(())
    }

    /// Builder form of [`Session::authorize`].
    pub fn sign(&self, mut request: MessageObject) -> Result<MessageObject, MessageError> {
        self.authorize(&mut request)?;
        Ok(request)
    }
}
