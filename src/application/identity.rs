use crate::domain::models::{Identity, ProfileUpdate, StoredSession};
use crate::infrastructure::auth_client::{AccountProfile, AuthHttpClient, AuthTokenResponse};
use crate::infrastructure::credential_store::CredentialStore;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::realtime_client::TokenSource;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const TOKEN_LEEWAY_SECONDS: i64 = 60;

/// Authentication provider consumed by the session manager and the store.
///
/// Credential rejections are reported as [`InfraError::Auth`]; anything else
/// (network, keychain) is a provider failure.
#[async_trait]
pub trait IdentityProvider: TokenSource {
    /// Resolves the persisted session, if any, without prompting.
    async fn restore_session(&self) -> Result<Option<Identity>, InfraError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, InfraError>;

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<Identity, InfraError>;

    async fn sign_out(&self) -> Result<(), InfraError>;

    async fn update_profile(&self, update: &ProfileUpdate) -> Result<Identity, InfraError>;

    /// Re-reads profile fields of the signed-in account.
    async fn reload_identity(&self) -> Result<Option<Identity>, InfraError>;
}

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct PasswordIdentityProvider<S, C>
where
    S: CredentialStore,
    C: AuthHttpClient,
{
    credential_store: Arc<S>,
    auth_client: Arc<C>,
    session: Mutex<Option<StoredSession>>,
    now_provider: NowProvider,
}

impl<S, C> PasswordIdentityProvider<S, C>
where
    S: CredentialStore,
    C: AuthHttpClient,
{
    pub fn new(credential_store: Arc<S>, auth_client: Arc<C>) -> Self {
        Self {
            credential_store,
            auth_client,
            session: Mutex::new(None),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    fn ensure_non_empty(value: &str, field: &str) -> Result<(), InfraError> {
        if value.trim().is_empty() {
            return Err(InfraError::Validation(format!("{field} must not be empty")));
        }
        Ok(())
    }

    fn cached_session(&self) -> Result<Option<StoredSession>, InfraError> {
        let guard = self
            .session
            .lock()
            .map_err(|error| InfraError::Credential(format!("session cache lock poisoned: {error}")))?;
        Ok(guard.clone())
    }

    fn remember(&self, session: Option<StoredSession>) -> Result<(), InfraError> {
        match session.as_ref() {
            Some(session) => self.credential_store.save_session(session)?,
            None => self.credential_store.delete_session()?,
        }
        let mut guard = self
            .session
            .lock()
            .map_err(|error| InfraError::Credential(format!("session cache lock poisoned: {error}")))?;
        *guard = session;
        Ok(())
    }

    fn session_from_response(&self, response: AuthTokenResponse) -> StoredSession {
        StoredSession {
            identity: Identity {
                uid: response.uid,
                email: response.email,
                display_name: response.display_name,
                photo_url: response.photo_url,
            },
            id_token: response.id_token,
            refresh_token: response.refresh_token,
            expires_at: (self.now_provider)() + Duration::seconds(response.expires_in),
        }
    }

    /// Returns a session with a usable id token, refreshing it when expired.
    ///
    /// A refresh rejected by the provider clears the stored session.
    async fn active_session(&self) -> Result<Option<StoredSession>, InfraError> {
        let stored = match self.cached_session()? {
            Some(session) => Some(session),
            None => self.credential_store.load_session()?,
        };
        let Some(stored) = stored else {
            return Ok(None);
        };

        if stored.is_valid_at((self.now_provider)(), TOKEN_LEEWAY_SECONDS) {
            return Ok(Some(stored));
        }

        match self.auth_client.refresh_token(&stored.refresh_token).await {
            Ok(refreshed) => {
                if refreshed.uid != stored.identity.uid {
                    self.remember(None)?;
                    return Ok(None);
                }
                let session = StoredSession {
                    identity: stored.identity,
                    id_token: refreshed.id_token,
                    refresh_token: refreshed.refresh_token,
                    expires_at: (self.now_provider)() + Duration::seconds(refreshed.expires_in),
                };
                self.remember(Some(session.clone()))?;
                Ok(Some(session))
            }
            Err(InfraError::Auth(_)) => {
                self.remember(None)?;
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    async fn require_session(&self) -> Result<StoredSession, InfraError> {
        self.active_session()
            .await?
            .ok_or_else(|| InfraError::Auth("no signed-in user".to_string()))
    }

    fn apply_profile(identity: Identity, profile: AccountProfile) -> Identity {
        Identity {
            uid: identity.uid,
            email: if profile.email.is_empty() {
                identity.email
            } else {
                profile.email
            },
            display_name: profile.display_name,
            photo_url: profile.photo_url,
        }
    }
}

#[async_trait]
impl<S, C> TokenSource for PasswordIdentityProvider<S, C>
where
    S: CredentialStore,
    C: AuthHttpClient,
{
    async fn id_token(&self) -> Result<Option<String>, InfraError> {
        Ok(self.active_session().await?.map(|session| session.id_token))
    }
}

#[async_trait]
impl<S, C> IdentityProvider for PasswordIdentityProvider<S, C>
where
    S: CredentialStore,
    C: AuthHttpClient,
{
    async fn restore_session(&self) -> Result<Option<Identity>, InfraError> {
        Ok(self.active_session().await?.map(|session| session.identity))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, InfraError> {
        Self::ensure_non_empty(email, "email")?;
        Self::ensure_non_empty(password, "password")?;

        let response = self
            .auth_client
            .sign_in_with_password(email.trim(), password)
            .await?;
        let session = self.session_from_response(response);
        let identity = session.identity.clone();
        self.remember(Some(session))?;
        Ok(identity)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<Identity, InfraError> {
        Self::ensure_non_empty(email, "email")?;
        Self::ensure_non_empty(password, "password")?;

        let response = self.auth_client.sign_up(email.trim(), password).await?;
        let mut session = self.session_from_response(response);

        if let Some(name) = display_name.map(str::trim).filter(|name| !name.is_empty()) {
            let update = ProfileUpdate {
                display_name: Some(name.to_string()),
                photo_url: None,
            };
            let profile = self
                .auth_client
                .update_profile(&session.id_token, &update)
                .await?;
            session.identity = Self::apply_profile(session.identity, profile);
        }

        let identity = session.identity.clone();
        self.remember(Some(session))?;
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), InfraError> {
        self.remember(None)
    }

    async fn update_profile(&self, update: &ProfileUpdate) -> Result<Identity, InfraError> {
        update.validate().map_err(InfraError::Validation)?;
        let mut session = self.require_session().await?;
        let profile = self
            .auth_client
            .update_profile(&session.id_token, update)
            .await?;
        session.identity = Self::apply_profile(session.identity, profile);
        let identity = session.identity.clone();
        self.remember(Some(session))?;
        Ok(identity)
    }

    async fn reload_identity(&self) -> Result<Option<Identity>, InfraError> {
        let Some(mut session) = self.active_session().await? else {
            return Ok(None);
        };
        let profile = self.auth_client.lookup(&session.id_token).await?;
        session.identity = Self::apply_profile(session.identity, profile);
        let identity = session.identity.clone();
        self.remember(Some(session))?;
        Ok(Some(identity))
    }
}

#[derive(Debug, Clone)]
struct InMemoryAccount {
    password: String,
    identity: Identity,
}

/// Account registry held in memory, with hooks for scripting provider failures.
#[derive(Debug, Default)]
pub struct InMemoryIdentityProvider {
    accounts: Mutex<HashMap<String, InMemoryAccount>>,
    current: Mutex<Option<Identity>>,
    restore_failures: Mutex<VecDeque<String>>,
    profile_failure: Mutex<Option<String>>,
    hang_restore: Mutex<bool>,
    restore_calls: AtomicUsize,
    next_uid: AtomicUsize,
}

impl InMemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an account and makes it the restored session.
    pub fn with_signed_in(self, identity: Identity, password: &str) -> Self {
        if let Ok(mut accounts) = self.accounts.lock() {
            accounts.insert(
                identity.email.to_lowercase(),
                InMemoryAccount {
                    password: password.to_string(),
                    identity: identity.clone(),
                },
            );
        }
        if let Ok(mut current) = self.current.lock() {
            *current = Some(identity);
        }
        self
    }

    /// Queues provider failures returned by the next `restore_session` calls.
    pub fn fail_next_restores(&self, messages: &[&str]) {
        if let Ok(mut failures) = self.restore_failures.lock() {
            failures.extend(messages.iter().map(|message| (*message).to_string()));
        }
    }

    /// Makes `restore_session` never complete.
    pub fn hang_restores(&self, hang: bool) {
        if let Ok(mut guard) = self.hang_restore.lock() {
            *guard = hang;
        }
    }

    pub fn fail_profile_updates(&self, message: Option<&str>) {
        if let Ok(mut guard) = self.profile_failure.lock() {
            *guard = message.map(ToOwned::to_owned);
        }
    }

    pub fn restore_calls(&self) -> usize {
        self.restore_calls.load(Ordering::SeqCst)
    }

    fn lock_error(error: impl std::fmt::Display) -> InfraError {
        InfraError::Credential(format!("in-memory identity lock poisoned: {error}"))
    }

    fn set_current(&self, identity: Option<Identity>) -> Result<(), InfraError> {
        let mut current = self.current.lock().map_err(Self::lock_error)?;
        *current = identity;
        Ok(())
    }

    fn current(&self) -> Result<Option<Identity>, InfraError> {
        Ok(self.current.lock().map_err(Self::lock_error)?.clone())
    }
}

#[async_trait]
impl TokenSource for InMemoryIdentityProvider {
    async fn id_token(&self) -> Result<Option<String>, InfraError> {
        Ok(self
            .current()?
            .map(|identity| format!("in-memory-token-{}", identity.uid)))
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentityProvider {
    async fn restore_session(&self) -> Result<Option<Identity>, InfraError> {
        self.restore_calls.fetch_add(1, Ordering::SeqCst);
        let hang = *self.hang_restore.lock().map_err(Self::lock_error)?;
        if hang {
            std::future::pending::<()>().await;
        }
        let failure = self
            .restore_failures
            .lock()
            .map_err(Self::lock_error)?
            .pop_front();
        if let Some(message) = failure {
            return Err(InfraError::Network(message));
        }
        self.current()
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, InfraError> {
        let account = self
            .accounts
            .lock()
            .map_err(Self::lock_error)?
            .get(&email.trim().to_lowercase())
            .cloned();
        match account {
            Some(account) if account.password == password => {
                self.set_current(Some(account.identity.clone()))?;
                Ok(account.identity)
            }
            _ => Err(InfraError::Auth("Invalid email or password".to_string())),
        }
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<Identity, InfraError> {
        if password.len() < 6 {
            return Err(InfraError::Auth(
                "Password should be at least 6 characters".to_string(),
            ));
        }
        let key = email.trim().to_lowercase();
        let identity = {
            let mut accounts = self.accounts.lock().map_err(Self::lock_error)?;
            if accounts.contains_key(&key) {
                return Err(InfraError::Auth(
                    "An account with this email already exists".to_string(),
                ));
            }
            let sequence = self.next_uid.fetch_add(1, Ordering::SeqCst) + 1;
            let identity = Identity {
                uid: format!("uid-{sequence}"),
                email: email.trim().to_string(),
                display_name: display_name
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(ToOwned::to_owned),
                photo_url: None,
            };
            accounts.insert(
                key,
                InMemoryAccount {
                    password: password.to_string(),
                    identity: identity.clone(),
                },
            );
            identity
        };
        self.set_current(Some(identity.clone()))?;
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), InfraError> {
        self.set_current(None)
    }

    async fn update_profile(&self, update: &ProfileUpdate) -> Result<Identity, InfraError> {
        if let Some(message) = self.profile_failure.lock().map_err(Self::lock_error)?.clone() {
            return Err(InfraError::Auth(message));
        }
        let Some(mut identity) = self.current()? else {
            return Err(InfraError::Auth("no signed-in user".to_string()));
        };
        if let Some(name) = update.display_name.as_deref() {
            identity.display_name = Some(name.trim().to_string());
        }
        if let Some(photo_url) = update.photo_url.as_deref() {
            identity.photo_url = Some(photo_url.trim().to_string());
        }
        let mut accounts = self.accounts.lock().map_err(Self::lock_error)?;
        if let Some(account) = accounts.get_mut(&identity.email.to_lowercase()) {
            account.identity = identity.clone();
        }
        drop(accounts);
        self.set_current(Some(identity.clone()))?;
        Ok(identity)
    }

    async fn reload_identity(&self) -> Result<Option<Identity>, InfraError> {
        self.current()
    }
}
