use crate::application::identity::IdentityProvider;
use crate::domain::models::Identity;
use crate::infrastructure::config::BackendConfig;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready(Option<Identity>),
    TimedOut,
    Failed(String),
}

impl SessionState {
    pub fn needs_manual_retry(&self) -> bool {
        matches!(self, Self::TimedOut | Self::Failed(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    pub init_timeout: Duration,
    pub max_auto_retries: u8,
    pub retry_backoff: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            init_timeout: Duration::from_secs(30),
            max_auto_retries: 3,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

impl SessionPolicy {
    pub fn from_config(config: &BackendConfig) -> Self {
        Self {
            init_timeout: config.auth_timeout,
            max_auto_retries: config.auth_max_retries,
            retry_backoff: config.auth_retry_backoff,
        }
    }
}

/// Component that must rebind before consumers observe a new identity.
#[async_trait]
pub trait IdentityObserver: Send + Sync {
    async fn identity_changed(&self, identity: Option<Identity>);
}

/// Owns the authentication lifecycle and publishes it as [`SessionState`].
///
/// Every provider round trip belongs to an attempt; results of superseded
/// attempts are dropped.
pub struct SessionManager<P>
where
    P: IdentityProvider,
{
    provider: Arc<P>,
    policy: SessionPolicy,
    state: watch::Sender<SessionState>,
    observers: Mutex<Vec<Arc<dyn IdentityObserver>>>,
    attempt: AtomicU64,
    transition: tokio::sync::Mutex<()>,
}

impl<P> SessionManager<P>
where
    P: IdentityProvider,
{
    pub fn new(provider: Arc<P>) -> Self {
        let (state, _) = watch::channel(SessionState::Uninitialized);
        Self {
            provider,
            policy: SessionPolicy::default(),
            state,
            observers: Mutex::new(Vec::new()),
            attempt: AtomicU64::new(0),
            transition: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_policy(mut self, policy: SessionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    pub fn add_observer(&self, observer: Arc<dyn IdentityObserver>) {
        if let Ok(mut observers) = self.observers.lock() {
            observers.push(observer);
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn current_identity(&self) -> Option<Identity> {
        match &*self.state.borrow() {
            SessionState::Ready(identity) => identity.clone(),
            _ => None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Resolves the persisted session, applying the timeout and auto-retry policy.
    pub async fn initialize(&self) -> SessionState {
        self.run_attempts(true).await
    }

    /// Starts a fresh attempt when the last one timed out or failed.
    pub async fn retry(&self) -> SessionState {
        if !self.state().needs_manual_retry() {
            return self.state();
        }
        info!("retrying session initialization");
        self.run_attempts(true).await
    }

    /// Re-checks the provider session while Ready, keeping Ready visible meanwhile.
    pub async fn revalidate(&self) -> SessionState {
        if !matches!(self.state(), SessionState::Ready(_)) {
            return self.state();
        }
        self.run_attempts(false).await
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, InfraError> {
        let identity = self.provider.sign_in(email, password).await?;
        info!(uid = %identity.uid, "signed in");
        let attempt = self.next_attempt();
        self.establish(Some(identity.clone()), attempt).await?;
        Ok(identity)
    }

    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<Identity, InfraError> {
        let identity = self.provider.sign_up(email, password, display_name).await?;
        info!(uid = %identity.uid, "account created");
        let attempt = self.next_attempt();
        self.establish(Some(identity.clone()), attempt).await?;
        Ok(identity)
    }

    /// Clears the local identity even when the provider call fails.
    pub async fn sign_out(&self) -> Result<(), InfraError> {
        let result = self.provider.sign_out().await;
        if let Err(error) = &result {
            warn!(error = %error, "provider sign-out failed; clearing local session");
        }
        let attempt = self.next_attempt();
        self.establish(None, attempt).await?;
        result
    }

    /// Re-reads profile fields after a profile update.
    pub async fn refresh_identity(&self) -> Result<Option<Identity>, InfraError> {
        if self.current_identity().is_none() {
            return Ok(None);
        }
        let identity = self.provider.reload_identity().await?;
        let attempt = self.next_attempt();
        self.establish(identity.clone(), attempt).await?;
        Ok(identity)
    }

    fn next_attempt(&self) -> u64 {
        self.attempt.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, attempt: u64) -> bool {
        self.attempt.load(Ordering::SeqCst) == attempt
    }

    fn publish_if_current(&self, attempt: u64, state: SessionState) -> bool {
        if !self.is_current(attempt) {
            return false;
        }
        self.state.send_replace(state);
        true
    }

    /// Rebinds observers and publishes Ready, bounded by the init timeout.
    ///
    /// An observer that never finishes leaves the session `TimedOut` so a
    /// manual retry is possible.
    async fn establish(&self, identity: Option<Identity>, attempt: u64) -> Result<(), InfraError> {
        let rebind = async {
            let _transition = self.transition.lock().await;
            if !self.is_current(attempt) {
                return;
            }

            let observers = self
                .observers
                .lock()
                .map(|observers| observers.clone())
                .unwrap_or_default();
            for observer in observers {
                observer.identity_changed(identity.clone()).await;
            }
            self.publish_if_current(attempt, SessionState::Ready(identity));
        };

        if tokio::time::timeout(self.policy.init_timeout, rebind).await.is_ok() {
            return Ok(());
        }
        let timeout_ms = self.policy.init_timeout.as_millis() as u64;
        if self.publish_if_current(attempt, SessionState::TimedOut) {
            warn!(timeout_ms, "identity observers did not finish rebinding");
        }
        Err(InfraError::Timeout(format!(
            "identity rebinding did not finish within {timeout_ms} ms"
        )))
    }

    async fn run_attempts(&self, announce_first: bool) -> SessionState {
        let mut failures: u8 = 0;
        let mut announce = announce_first;

        loop {
            let attempt = self.next_attempt();
            if announce {
                self.state.send_replace(SessionState::Initializing);
            }
            announce = true;

            let outcome =
                tokio::time::timeout(self.policy.init_timeout, self.provider.restore_session()).await;

            match outcome {
                Err(_) => {
                    if self.publish_if_current(attempt, SessionState::TimedOut) {
                        warn!(
                            timeout_ms = self.policy.init_timeout.as_millis() as u64,
                            "session initialization timed out"
                        );
                    }
                    return self.state();
                }
                Ok(Ok(identity)) => {
                    match identity.as_ref() {
                        Some(identity) => info!(uid = %identity.uid, "session restored"),
                        None => info!("no stored session"),
                    }
                    if let Err(error) = self.establish(identity, attempt).await {
                        warn!(error = %error, "session restored but not established");
                    }
                    return self.state();
                }
                Ok(Err(error)) => {
                    if !self.publish_if_current(attempt, SessionState::Failed(error.to_string())) {
                        return self.state();
                    }
                    if failures >= self.policy.max_auto_retries {
                        warn!(error = %error, attempts = failures + 1, "session initialization failed; manual retry required");
                        return self.state();
                    }
                    failures += 1;
                    warn!(error = %error, retry = failures, "session initialization failed; retrying");
                    tokio::time::sleep(self.policy.retry_backoff).await;
                    if !self.is_current(attempt) {
                        return self.state();
                    }
                }
            }
        }
    }
}
