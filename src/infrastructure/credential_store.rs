use crate::domain::models::StoredSession;
use crate::infrastructure::error::InfraError;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::warn;
use url::Url;

pub const SESSION_SERVICE: &str = "mission-control.session";
const SESSION_PAYLOAD_VERSION: u32 = 1;

pub trait CredentialStore: Send + Sync {
    fn save_session(&self, session: &StoredSession) -> Result<(), InfraError>;
    fn load_session(&self) -> Result<Option<StoredSession>, InfraError>;
    fn delete_session(&self) -> Result<(), InfraError>;
}

#[derive(Serialize)]
struct SessionEnvelopeRef<'a> {
    version: u32,
    session: &'a StoredSession,
}

#[derive(Deserialize)]
struct SessionEnvelope {
    version: u32,
    session: StoredSession,
}

pub fn encode_session(session: &StoredSession) -> Result<String, InfraError> {
    serde_json::to_string(&SessionEnvelopeRef {
        version: SESSION_PAYLOAD_VERSION,
        session,
    })
    .map_err(|error| InfraError::Credential(format!("failed encoding session: {error}")))
}

/// Unreadable or foreign-version payloads decode to `None`; the caller signs in again.
pub fn decode_session(payload: &str) -> Option<StoredSession> {
    match serde_json::from_str::<SessionEnvelope>(payload) {
        Ok(envelope) if envelope.version == SESSION_PAYLOAD_VERSION => Some(envelope.session),
        Ok(envelope) => {
            warn!(version = envelope.version, "ignoring stored session with unsupported version");
            None
        }
        Err(error) => {
            warn!(error = %error, "ignoring unreadable stored session");
            None
        }
    }
}

/// Session storage in the platform keychain, one entry per database.
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service_name: String,
    account_name: String,
}

impl KeyringCredentialStore {
    pub fn new(service_name: impl Into<String>, account_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            account_name: account_name.into(),
        }
    }

    /// Keys the entry by database host so separate backends keep separate sessions.
    pub fn for_database(database_url: &str) -> Self {
        Self::new(SESSION_SERVICE, session_account(database_url))
    }

    pub fn account_name(&self) -> &str {
        &self.account_name
    }

    fn entry(&self) -> Result<keyring::Entry, InfraError> {
        keyring::Entry::new(&self.service_name, &self.account_name).map_err(|error| {
            InfraError::Credential(format!(
                "keychain entry {}/{} unavailable: {error}",
                self.service_name, self.account_name
            ))
        })
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn save_session(&self, session: &StoredSession) -> Result<(), InfraError> {
        let payload = encode_session(session)?;
        self.entry()?
            .set_password(&payload)
            .map_err(|error| InfraError::Credential(format!("failed saving session: {error}")))
    }

    fn load_session(&self) -> Result<Option<StoredSession>, InfraError> {
        let payload = match self.entry()?.get_password() {
            Ok(payload) => payload,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(error) => {
                return Err(InfraError::Credential(format!("failed reading session: {error}")));
            }
        };
        Ok(decode_session(&payload))
    }

    fn delete_session(&self) -> Result<(), InfraError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(InfraError::Credential(format!("failed deleting session: {error}"))),
        }
    }
}

fn session_account(database_url: &str) -> String {
    Url::parse(database_url.trim())
        .ok()
        .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
        .unwrap_or_else(|| "default".to_string())
}

/// Keeps the encoded payload in memory, so it decodes exactly like the keychain copy.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    payload: Mutex<Option<String>>,
}

impl InMemoryCredentialStore {
    pub fn with_raw_payload(payload: impl Into<String>) -> Self {
        Self {
            payload: Mutex::new(Some(payload.into())),
        }
    }

    pub fn raw_payload(&self) -> Option<String> {
        self.payload.lock().ok().and_then(|payload| payload.clone())
    }

    fn slot(&self) -> Result<std::sync::MutexGuard<'_, Option<String>>, InfraError> {
        self.payload
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn save_session(&self, session: &StoredSession) -> Result<(), InfraError> {
        let payload = encode_session(session)?;
        *self.slot()? = Some(payload);
        Ok(())
    }

    fn load_session(&self) -> Result<Option<StoredSession>, InfraError> {
        Ok(self.slot()?.as_deref().and_then(decode_session))
    }

    fn delete_session(&self) -> Result<(), InfraError> {
        *self.slot()? = None;
        Ok(())
    }
}
