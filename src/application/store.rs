use crate::application::identity::IdentityProvider;
use crate::application::projections::week_window;
use crate::application::session::IdentityObserver;
use crate::domain::models::{
    DayPlan, DayPlanDraft, Goal, GoalDraft, GoalPatch, GoalStatus, Identity, ProfileUpdate,
    UserSettings,
};
use crate::domain::themes::{DEFAULT_THEME_ID, ThemeColors, find_theme, resolve_theme};
use crate::infrastructure::remote_store::{LiveSubscription, RemoteStore, paths};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Everything the views render, published as one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreState {
    pub identity: Option<Identity>,
    pub goals: Vec<Goal>,
    pub day_plans: BTreeMap<String, DayPlan>,
    pub settings: Option<UserSettings>,
    pub theme_id: String,
    pub loading: bool,
    pub error: Option<String>,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            identity: None,
            goals: Vec::new(),
            day_plans: BTreeMap::new(),
            settings: None,
            theme_id: DEFAULT_THEME_ID.to_string(),
            loading: false,
            error: None,
        }
    }
}

impl StoreState {
    pub fn goal(&self, goal_id: &str) -> Option<&Goal> {
        self.goals.iter().find(|goal| goal.id == goal_id)
    }

    pub fn theme(&self) -> &'static ThemeColors {
        resolve_theme(&self.theme_id)
    }

    fn bound_to(identity: &Identity) -> Self {
        Self {
            identity: Some(identity.clone()),
            loading: true,
            ..Self::default()
        }
    }
}

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// State shared with subscription tasks.
///
/// The epoch only changes inside the watch lock, so a task that passes the
/// epoch check cannot publish after a rebind has been published.
struct Shared {
    state: watch::Sender<StoreState>,
    epoch: AtomicU64,
}

impl Shared {
    fn apply_if_current<F>(&self, epoch: u64, apply: F) -> bool
    where
        F: FnOnce(&mut StoreState),
    {
        self.state.send_if_modified(|state| {
            if self.epoch.load(Ordering::SeqCst) != epoch {
                return false;
            }
            apply(state);
            true
        })
    }

    fn fail(&self, epoch: u64, message: String) {
        warn!(error = %message, "store operation failed");
        self.apply_if_current(epoch, |state| state.error = Some(message));
    }

    fn succeed(&self, epoch: u64) {
        self.state.send_if_modified(|state| {
            if self.epoch.load(Ordering::SeqCst) != epoch || state.error.is_none() {
                return false;
            }
            state.error = None;
            true
        });
    }
}

#[derive(Default)]
struct Binding {
    uid: Option<String>,
    tasks: Vec<JoinHandle<()>>,
}

impl Binding {
    fn teardown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// Remote-backed goal, day-plan and settings state for the signed-in user.
///
/// Operations never return remote failures; they record them in
/// [`StoreState::error`]. Without an identity every operation is a no-op.
pub struct SyncStore<R, P>
where
    R: RemoteStore + 'static,
    P: IdentityProvider + 'static,
{
    remote: Arc<R>,
    provider: Arc<P>,
    shared: Arc<Shared>,
    binding: tokio::sync::Mutex<Binding>,
    now_provider: NowProvider,
}

impl<R, P> SyncStore<R, P>
where
    R: RemoteStore + 'static,
    P: IdentityProvider + 'static,
{
    pub fn new(remote: Arc<R>, provider: Arc<P>) -> Self {
        let (state, _) = watch::channel(StoreState::default());
        Self {
            remote,
            provider,
            shared: Arc::new(Shared {
                state,
                epoch: AtomicU64::new(0),
            }),
            binding: tokio::sync::Mutex::new(Binding::default()),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<StoreState> {
        self.shared.state.subscribe()
    }

    pub fn snapshot(&self) -> StoreState {
        self.shared.state.borrow().clone()
    }

    /// Uid and epoch of the current binding, or `None` when signed out.
    fn current(&self) -> Option<(String, u64)> {
        let state = self.shared.state.borrow();
        let uid = state.identity.as_ref()?.uid.clone();
        Some((uid, self.shared.epoch.load(Ordering::SeqCst)))
    }

    /// Rebinds the store to `identity`, replacing all per-user state.
    ///
    /// Rebinding to the same uid only refreshes the identity's profile fields.
    pub async fn set_identity(&self, identity: Option<Identity>) {
        let mut binding = self.binding.lock().await;

        let next_uid = identity.as_ref().map(|identity| identity.uid.clone());
        if next_uid.is_some() && next_uid == binding.uid {
            self.shared.state.send_modify(|state| state.identity = identity);
            return;
        }

        binding.teardown();
        binding.uid = None;
        let mut epoch = 0;
        self.shared.state.send_modify(|state| {
            epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            *state = match identity.as_ref() {
                Some(identity) => StoreState::bound_to(identity),
                None => StoreState::default(),
            };
        });

        let Some(identity) = identity else {
            debug!("store cleared");
            return;
        };
        debug!(uid = %identity.uid, epoch, "store bound to identity");

        match self.remote.subscribe(&paths::goals(&identity.uid)).await {
            Ok(subscription) => {
                binding
                    .tasks
                    .push(spawn_goal_listener(Arc::clone(&self.shared), epoch, subscription));
            }
            Err(error) => {
                self.shared.apply_if_current(epoch, |state| {
                    state.loading = false;
                    state.error = Some(format!("Failed to load goals: {error}"));
                });
            }
        }

        match self.remote.subscribe(&paths::settings(&identity.uid)).await {
            Ok(subscription) => {
                binding.tasks.push(spawn_settings_listener(
                    Arc::clone(&self.shared),
                    epoch,
                    identity,
                    subscription,
                ));
            }
            Err(error) => self
                .shared
                .fail(epoch, format!("Failed to load settings: {error}")),
        }
        // Only a completed bind counts; an interrupted one rebinds next time.
        binding.uid = next_uid;
    }

    /// Creates a goal and returns its server-assigned id.
    pub async fn add_goal(&self, draft: GoalDraft) -> Option<String> {
        let (uid, epoch) = self.current()?;
        let record = draft.into_record((self.now_provider)());
        match self.remote.push(&paths::goals(&uid), record).await {
            Ok(goal_id) => {
                debug!(uid = %uid, goal_id = %goal_id, "goal created");
                self.shared.succeed(epoch);
                Some(goal_id)
            }
            Err(error) => {
                self.shared.fail(epoch, format!("Failed to add goal: {error}"));
                None
            }
        }
    }

    /// Merges the set fields of `patch` into the goal record.
    pub async fn update_goal(&self, goal_id: &str, patch: GoalPatch) {
        let Some((uid, epoch)) = self.current() else {
            return;
        };
        if patch.is_empty() {
            return;
        }
        let fields = match patch.to_fields() {
            Ok(fields) => fields,
            Err(error) => {
                self.shared.fail(epoch, format!("Failed to update goal: {error}"));
                return;
            }
        };
        match self.remote.update(&paths::goal(&uid, goal_id), fields).await {
            Ok(()) => self.shared.succeed(epoch),
            Err(error) => self.shared.fail(epoch, format!("Failed to update goal: {error}")),
        }
    }

    pub async fn set_goal_status(&self, goal_id: &str, status: GoalStatus) {
        self.update_goal(goal_id, GoalPatch::for_status(status)).await;
    }

    /// Negates the locally known `completed` flag. Only `completed` is written.
    ///
    /// The flag is read from the last delivered snapshot, so two toggles issued
    /// before the first write round-trips both write the same value.
    pub async fn toggle_goal(&self, goal_id: &str) {
        let Some((uid, epoch)) = self.current() else {
            return;
        };
        let completed = self
            .shared
            .state
            .borrow()
            .goal(goal_id)
            .map(|goal| goal.completed);
        let Some(completed) = completed else {
            self.shared
                .fail(epoch, format!("Failed to toggle goal: goal {goal_id} not found"));
            return;
        };

        let mut fields = Map::new();
        fields.insert("completed".to_string(), Value::Bool(!completed));
        match self.remote.update(&paths::goal(&uid, goal_id), fields).await {
            Ok(()) => self.shared.succeed(epoch),
            Err(error) => self.shared.fail(epoch, format!("Failed to toggle goal: {error}")),
        }
    }

    pub async fn delete_goal(&self, goal_id: &str) {
        let Some((uid, epoch)) = self.current() else {
            return;
        };
        match self.remote.remove(&paths::goal(&uid, goal_id)).await {
            Ok(()) => self.shared.succeed(epoch),
            Err(error) => self.shared.fail(epoch, format!("Failed to delete goal: {error}")),
        }
    }

    /// Updates the provider profile, then mirrors it into settings.
    ///
    /// The two writes are independent: a failed mirror leaves the provider
    /// record updated.
    pub async fn update_user_profile(&self, update: ProfileUpdate) {
        let Some((uid, epoch)) = self.current() else {
            return;
        };

        let identity = match self.provider.update_profile(&update).await {
            Ok(identity) => identity,
            Err(error) => {
                self.shared
                    .fail(epoch, format!("Failed to update profile: {error}"));
                return;
            }
        };
        self.shared
            .apply_if_current(epoch, |state| state.identity = Some(identity));

        let fields = update.settings_fields();
        if fields.is_empty() {
            self.shared.succeed(epoch);
            return;
        }
        match self.remote.update(&paths::settings(&uid), fields).await {
            Ok(()) => self.shared.succeed(epoch),
            Err(error) => self.shared.fail(
                epoch,
                format!("Profile updated but saving settings failed: {error}"),
            ),
        }
    }

    /// Applies a known theme locally at once, then persists it.
    pub async fn update_user_theme(&self, theme_id: &str) {
        let Some((uid, epoch)) = self.current() else {
            return;
        };
        let Some(theme) = find_theme(theme_id) else {
            debug!(theme_id = %theme_id, "ignoring unknown theme");
            return;
        };

        self.shared.apply_if_current(epoch, |state| {
            state.theme_id = theme.id.to_string();
            if let Some(settings) = state.settings.as_mut() {
                settings.theme = theme.id.to_string();
            }
        });

        let mut fields = Map::new();
        fields.insert("theme".to_string(), Value::String(theme.id.to_string()));
        match self.remote.update(&paths::settings(&uid), fields).await {
            Ok(()) => self.shared.succeed(epoch),
            Err(error) => self.shared.fail(epoch, format!("Failed to save theme: {error}")),
        }
    }

    /// Upserts the plan for its date, keeping the original creation time.
    pub async fn save_day_plan(&self, draft: DayPlanDraft) -> Option<DayPlan> {
        let (uid, epoch) = self.current()?;
        let path = paths::day_plan(&uid, &draft.date);

        let cached_created_at = self
            .shared
            .state
            .borrow()
            .day_plans
            .get(&draft.date)
            .map(|plan| plan.created_at);
        let created_at = match cached_created_at {
            Some(created_at) => Some(created_at),
            None => match self.remote.get(&path).await {
                Ok(existing) => existing
                    .and_then(|record| DayPlan::from_record(&draft.date, record).ok())
                    .map(|plan| plan.created_at),
                Err(error) => {
                    self.shared
                        .fail(epoch, format!("Failed to save day plan: {error}"));
                    return None;
                }
            },
        };

        let now = (self.now_provider)();
        let plan = draft.into_plan(created_at.unwrap_or(now), now);
        let record = match day_plan_record(&plan) {
            Ok(record) => record,
            Err(error) => {
                self.shared
                    .fail(epoch, format!("Failed to save day plan: {error}"));
                return None;
            }
        };

        match self.remote.set(&path, record).await {
            Ok(()) => {
                let cached = plan.clone();
                self.shared.apply_if_current(epoch, |state| {
                    state.day_plans.insert(cached.date.clone(), cached);
                    state.error = None;
                });
                Some(plan)
            }
            Err(error) => {
                self.shared
                    .fail(epoch, format!("Failed to save day plan: {error}"));
                None
            }
        }
    }

    pub async fn get_day_plan(&self, date: NaiveDate) -> Option<DayPlan> {
        let (uid, epoch) = self.current()?;
        let key = date.format("%Y-%m-%d").to_string();
        match self.remote.get(&paths::day_plan(&uid, &key)).await {
            Ok(Some(record)) => match DayPlan::from_record(&key, record) {
                Ok(plan) => {
                    let cached = plan.clone();
                    self.shared.apply_if_current(epoch, |state| {
                        state.day_plans.insert(key, cached);
                        state.error = None;
                    });
                    Some(plan)
                }
                Err(error) => {
                    self.shared
                        .fail(epoch, format!("Failed to load day plan: {error}"));
                    None
                }
            },
            Ok(None) => {
                self.shared.apply_if_current(epoch, |state| {
                    state.day_plans.remove(&key);
                    state.error = None;
                });
                None
            }
            Err(error) => {
                self.shared
                    .fail(epoch, format!("Failed to load day plan: {error}"));
                None
            }
        }
    }

    /// Plans for the Monday-to-Sunday week containing `anchor`, keyed by date.
    pub async fn get_week_plans(&self, anchor: NaiveDate) -> BTreeMap<String, DayPlan> {
        let Some((uid, epoch)) = self.current() else {
            return BTreeMap::new();
        };
        let window = week_window(anchor);
        let records = match self
            .remote
            .get_key_range(&paths::day_plans(&uid), &window.start_key(), &window.end_key())
            .await
        {
            Ok(records) => records,
            Err(error) => {
                self.shared
                    .fail(epoch, format!("Failed to load week plans: {error}"));
                return BTreeMap::new();
            }
        };

        let plans = records
            .into_iter()
            .filter_map(|(key, record)| match DayPlan::from_record(&key, record) {
                Ok(plan) => Some((key, plan)),
                Err(error) => {
                    warn!(date = %key, error = %error, "skipping malformed day plan");
                    None
                }
            })
            .collect::<BTreeMap<_, _>>();

        let cached = plans.clone();
        self.shared.apply_if_current(epoch, |state| {
            state.day_plans.extend(cached);
            state.error = None;
        });
        plans
    }

    pub fn clear_error(&self) {
        self.shared.state.send_if_modified(|state| state.error.take().is_some());
    }
}

impl<R, P> Drop for SyncStore<R, P>
where
    R: RemoteStore + 'static,
    P: IdentityProvider + 'static,
{
    fn drop(&mut self) {
        self.binding.get_mut().teardown();
    }
}

#[async_trait]
impl<R, P> IdentityObserver for SyncStore<R, P>
where
    R: RemoteStore + 'static,
    P: IdentityProvider + 'static,
{
    async fn identity_changed(&self, identity: Option<Identity>) {
        self.set_identity(identity).await;
    }
}

fn day_plan_record(plan: &DayPlan) -> Result<Value, serde_json::Error> {
    let mut record = serde_json::to_value(plan)?;
    if let Some(object) = record.as_object_mut() {
        object.remove("id");
    }
    Ok(record)
}

fn decode_goals(snapshot: Option<Value>) -> Vec<Goal> {
    let Some(Value::Object(records)) = snapshot else {
        return Vec::new();
    };
    records
        .into_iter()
        .filter_map(|(key, record)| match Goal::from_record(&key, record) {
            Ok(goal) => Some(goal),
            Err(error) => {
                warn!(goal_id = %key, error = %error, "skipping malformed goal");
                None
            }
        })
        .collect()
}

fn decode_settings(snapshot: Option<Value>, identity: &Identity) -> UserSettings {
    snapshot
        .and_then(|record| match serde_json::from_value::<UserSettings>(record) {
            Ok(settings) => Some(settings),
            Err(error) => {
                warn!(uid = %identity.uid, error = %error, "settings record is malformed; using defaults");
                None
            }
        })
        .unwrap_or_else(|| UserSettings::defaults_for(identity))
}

fn spawn_goal_listener(
    shared: Arc<Shared>,
    epoch: u64,
    mut subscription: LiveSubscription,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(snapshot) = subscription.next_snapshot().await {
            let goals = decode_goals(snapshot);
            let applied = shared.apply_if_current(epoch, |state| {
                state.goals = goals;
                state.loading = false;
            });
            if !applied {
                return;
            }
        }
    })
}

fn spawn_settings_listener(
    shared: Arc<Shared>,
    epoch: u64,
    identity: Identity,
    mut subscription: LiveSubscription,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(snapshot) = subscription.next_snapshot().await {
            let settings = decode_settings(snapshot, &identity);
            let applied = shared.apply_if_current(epoch, |state| {
                state.theme_id = resolve_theme(&settings.theme).id.to_string();
                state.settings = Some(settings);
            });
            if !applied {
                return;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::identity::InMemoryIdentityProvider;
    use crate::domain::models::{Meals, Priority};
    use crate::infrastructure::remote_store::InMemoryRemoteStore;
    use proptest::prelude::*;
    use serde_json::json;
    use std::time::Duration;

    type TestStore = SyncStore<InMemoryRemoteStore, InMemoryIdentityProvider>;

    fn ada() -> Identity {
        Identity {
            uid: "u1".to_string(),
            email: "ada@example.com".to_string(),
            display_name: Some("Ada".to_string()),
            photo_url: None,
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-15T09:00:00Z")
            .expect("parse time")
            .with_timezone(&Utc)
    }

    fn goal_record(title: &str, completed: bool) -> Value {
        json!({
            "title": title,
            "description": "",
            "priority": "high",
            "category": "personal",
            "completed": completed,
            "status": "not_started",
            "progress": 0,
            "createdAt": "2024-03-01T08:00:00Z"
        })
    }

    fn build(data: Value) -> (Arc<InMemoryRemoteStore>, TestStore) {
        let remote = Arc::new(InMemoryRemoteStore::with_data(data));
        let provider = Arc::new(InMemoryIdentityProvider::new().with_signed_in(ada(), "pw"));
        let store = SyncStore::new(Arc::clone(&remote), provider)
            .with_now_provider(Arc::new(fixed_now));
        (remote, store)
    }

    async fn wait_until<F>(store: &TestStore, predicate: F) -> StoreState
    where
        F: Fn(&StoreState) -> bool,
    {
        let mut receiver = store.subscribe();
        let state = tokio::time::timeout(Duration::from_secs(2), receiver.wait_for(|state| predicate(state)))
            .await
            .expect("state condition reached in time")
            .expect("store alive")
            .clone();
        state
    }

    #[tokio::test]
    async fn binding_loads_goals_and_settings() {
        let (_remote, store) = build(json!({
            "users": { "u1": {
                "goals": { "g1": goal_record("Run", false) },
                "settings": { "displayName": "Ada", "theme": "deep-ocean" }
            } }
        }));

        store.set_identity(Some(ada())).await;
        let state = wait_until(&store, |state| !state.loading && state.settings.is_some()).await;

        assert_eq!(state.goals.len(), 1);
        assert_eq!(state.goals[0].id, "g1");
        assert_eq!(state.theme_id, "deep-ocean");
        assert_eq!(state.theme().name, "Deep Ocean");
    }

    #[tokio::test]
    async fn missing_settings_fall_back_to_identity_defaults() {
        let (_remote, store) = build(json!({}));

        store.set_identity(Some(ada())).await;
        let state = wait_until(&store, |state| state.settings.is_some()).await;

        let settings = state.settings.expect("settings");
        assert_eq!(settings.display_name, "Ada");
        assert_eq!(settings.theme, DEFAULT_THEME_ID);
    }

    #[tokio::test]
    async fn none_some_none_leaves_collections_empty() {
        let (remote, store) = build(json!({
            "users": { "u1": { "goals": { "g1": goal_record("Run", false) } } }
        }));

        store.set_identity(None).await;
        store.set_identity(Some(ada())).await;
        wait_until(&store, |state| state.goals.len() == 1).await;
        store.set_identity(None).await;

        let state = store.snapshot();
        assert!(state.goals.is_empty());
        assert!(state.day_plans.is_empty());
        assert!(!state.loading);
        assert_eq!(state.theme_id, DEFAULT_THEME_ID);

        remote
            .set("users/u1/goals/g2", goal_record("Late", false))
            .await
            .expect("late write");
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert!(store.snapshot().goals.is_empty());
        assert_eq!(remote.active_listeners(), 0);
    }

    #[tokio::test]
    async fn operations_without_identity_do_nothing() {
        let (remote, store) = build(json!({}));

        assert_eq!(store.add_goal(GoalDraft::new("Run", Priority::High)).await, None);
        store.toggle_goal("g1").await;
        store.update_user_theme("solar-flare").await;

        assert_eq!(remote.write_count(), 0);
        assert_eq!(store.snapshot(), StoreState::default());
    }

    #[tokio::test]
    async fn add_goal_arrives_through_subscription() {
        let (remote, store) = build(json!({}));
        store.set_identity(Some(ada())).await;
        wait_until(&store, |state| !state.loading).await;

        let goal_id = store
            .add_goal(GoalDraft::new("Ship release", Priority::High))
            .await
            .expect("goal id");

        let state = wait_until(&store, |state| !state.goals.is_empty()).await;
        assert_eq!(state.goals.len(), 1);
        let goal = state.goal(&goal_id).expect("new goal");
        assert_eq!(goal.title, "Ship release");
        assert!(!goal.completed);
        assert_eq!(goal.created_at, fixed_now());
        assert_eq!(remote.write_count(), 1);
    }

    #[tokio::test]
    async fn sequential_toggles_restore_completed_flag() {
        let (_remote, store) = build(json!({
            "users": { "u1": { "goals": { "g1": goal_record("Run", false) } } }
        }));
        store.set_identity(Some(ada())).await;
        wait_until(&store, |state| state.goal("g1").is_some()).await;

        store.toggle_goal("g1").await;
        wait_until(&store, |state| state.goal("g1").is_some_and(|goal| goal.completed)).await;
        store.toggle_goal("g1").await;
        let state =
            wait_until(&store, |state| state.goal("g1").is_some_and(|goal| !goal.completed)).await;

        assert_eq!(state.error, None);
    }

    #[tokio::test]
    async fn toggle_of_unknown_goal_sets_error_without_writing() {
        let (remote, store) = build(json!({}));
        store.set_identity(Some(ada())).await;
        wait_until(&store, |state| !state.loading).await;

        store.toggle_goal("missing").await;

        assert_eq!(remote.write_count(), 0);
        assert!(store
            .snapshot()
            .error
            .is_some_and(|error| error.contains("missing")));
    }

    #[tokio::test]
    async fn completing_a_goal_changes_only_status_and_progress() {
        let (remote, store) = build(json!({
            "users": { "u1": { "goals": { "g1": goal_record("Run", false) } } }
        }));
        store.set_identity(Some(ada())).await;
        wait_until(&store, |state| state.goal("g1").is_some()).await;

        store
            .update_goal(
                "g1",
                GoalPatch {
                    status: Some(GoalStatus::Completed),
                    progress: Some(100),
                    ..GoalPatch::default()
                },
            )
            .await;

        let mut expected = goal_record("Run", false);
        expected["status"] = json!("completed");
        expected["progress"] = json!(100);
        assert_eq!(remote.value_at("users/u1/goals/g1"), Some(expected));
    }

    #[tokio::test]
    async fn failed_write_sets_error_and_next_success_clears_it() {
        let (remote, store) = build(json!({
            "users": { "u1": { "goals": { "g1": goal_record("Run", false) } } }
        }));
        store.set_identity(Some(ada())).await;
        wait_until(&store, |state| state.goal("g1").is_some()).await;

        remote.fail_writes(Some("PERMISSION_DENIED"));
        store.delete_goal("g1").await;
        assert_eq!(
            store.snapshot().error.as_deref(),
            Some("Failed to delete goal: Remote store error: PERMISSION_DENIED")
        );

        remote.fail_writes(None);
        store.set_goal_status("g1", GoalStatus::InProgress).await;
        assert_eq!(store.snapshot().error, None);
        assert_eq!(
            remote.value_at("users/u1/goals/g1/progress"),
            Some(json!(50))
        );
    }

    #[tokio::test]
    async fn theme_change_is_optimistic_and_unknown_ids_are_ignored() {
        let (remote, store) = build(json!({}));
        store.set_identity(Some(ada())).await;
        wait_until(&store, |state| state.settings.is_some()).await;

        remote.fail_writes(Some("offline"));
        store.update_user_theme("emerald-nebula").await;
        let state = store.snapshot();
        assert_eq!(state.theme_id, "emerald-nebula");
        assert!(state.error.is_some());

        store.update_user_theme("no-such-theme").await;
        assert_eq!(store.snapshot().theme_id, "emerald-nebula");

        remote.fail_writes(None);
        store.update_user_theme("ice-comet").await;
        assert_eq!(remote.value_at("users/u1/settings/theme"), Some(json!("ice-comet")));
        assert_eq!(store.snapshot().error, None);
    }

    #[tokio::test]
    async fn profile_provider_failure_skips_settings_mirror() {
        let (remote, store) = build(json!({}));
        store.set_identity(Some(ada())).await;
        wait_until(&store, |state| !state.loading).await;
        store.provider.fail_profile_updates(Some("TOKEN_EXPIRED"));

        store
            .update_user_profile(ProfileUpdate {
                display_name: Some("Countess".to_string()),
                photo_url: None,
            })
            .await;

        assert_eq!(remote.value_at("users/u1/settings/displayName"), None);
        assert!(store
            .snapshot()
            .error
            .is_some_and(|error| error.starts_with("Failed to update profile")));
    }

    #[tokio::test]
    async fn profile_mirror_failure_keeps_provider_update() {
        let (remote, store) = build(json!({}));
        store.set_identity(Some(ada())).await;
        wait_until(&store, |state| !state.loading).await;
        remote.fail_writes(Some("offline"));

        store
            .update_user_profile(ProfileUpdate {
                display_name: Some("Countess".to_string()),
                photo_url: None,
            })
            .await;

        let state = store.snapshot();
        assert_eq!(
            state.identity.and_then(|identity| identity.display_name),
            Some("Countess".to_string())
        );
        assert!(state
            .error
            .is_some_and(|error| error.starts_with("Profile updated but saving settings failed")));
    }

    #[tokio::test]
    async fn profile_update_mirrors_into_settings() {
        let (remote, store) = build(json!({}));
        store.set_identity(Some(ada())).await;
        wait_until(&store, |state| !state.loading).await;

        store
            .update_user_profile(ProfileUpdate {
                display_name: Some("Countess".to_string()),
                photo_url: Some("https://example.com/ada.png".to_string()),
            })
            .await;

        assert_eq!(
            remote.value_at("users/u1/settings"),
            Some(json!({ "displayName": "Countess", "photoURL": "https://example.com/ada.png" }))
        );
    }

    #[tokio::test]
    async fn saving_day_plan_preserves_created_at_and_caches() {
        let (remote, store) = build(json!({
            "users": { "u1": { "dayplans": { "2024-03-15": {
                "date": "2024-03-15",
                "gratitude": "coffee",
                "createdAt": "2024-03-14T07:00:00Z",
                "updatedAt": "2024-03-14T07:00:00Z"
            } } } }
        }));
        store.set_identity(Some(ada())).await;

        let mut draft = DayPlanDraft::for_date(NaiveDate::from_ymd_opt(2024, 3, 15).expect("date"));
        draft.top_goals = vec!["g1".to_string(), "g2".to_string()];
        draft.meals = Meals {
            breakfast: "oats".to_string(),
            ..Meals::default()
        };
        let saved = store.save_day_plan(draft).await.expect("saved");

        assert_eq!(saved.created_at.to_rfc3339(), "2024-03-14T07:00:00+00:00");
        assert_eq!(saved.updated_at, fixed_now());
        assert_eq!(
            remote.value_at("users/u1/dayplans/2024-03-15/topGoals"),
            Some(json!(["g1", "g2"]))
        );
        assert_eq!(
            remote.value_at("users/u1/dayplans/2024-03-15/gratitude"),
            Some(json!(""))
        );
        assert_eq!(store.snapshot().day_plans.get("2024-03-15"), Some(&saved));
    }

    #[tokio::test]
    async fn week_plans_cover_monday_to_sunday() {
        let plan = |date: &str| {
            json!({
                "date": date,
                "createdAt": "2024-03-01T08:00:00Z",
                "updatedAt": "2024-03-01T08:00:00Z"
            })
        };
        let (_remote, store) = build(json!({
            "users": { "u1": { "dayplans": {
                "2024-03-10": plan("2024-03-10"),
                "2024-03-11": plan("2024-03-11"),
                "2024-03-17": plan("2024-03-17"),
                "2024-03-18": plan("2024-03-18")
            } } }
        }));
        store.set_identity(Some(ada())).await;

        let plans = store
            .get_week_plans(NaiveDate::from_ymd_opt(2024, 3, 15).expect("date"))
            .await;

        assert_eq!(
            plans.keys().cloned().collect::<Vec<_>>(),
            vec!["2024-03-11".to_string(), "2024-03-17".to_string()]
        );
        assert_eq!(store.snapshot().day_plans.len(), 2);
    }

    #[tokio::test]
    async fn get_day_plan_returns_none_for_missing_date() {
        let (_remote, store) = build(json!({}));
        store.set_identity(Some(ada())).await;

        let plan = store
            .get_day_plan(NaiveDate::from_ymd_opt(2024, 3, 15).expect("date"))
            .await;

        assert_eq!(plan, None);
        assert_eq!(store.snapshot().error, None);
    }

    #[tokio::test]
    async fn subscribe_failure_is_reported_as_store_error() {
        let (remote, store) = build(json!({}));
        remote.fail_reads(Some("PERMISSION_DENIED"));

        store.set_identity(Some(ada())).await;

        let state = store.snapshot();
        assert!(!state.loading);
        assert!(state.error.is_some());
        store.clear_error();
        assert_eq!(store.snapshot().error, None);
    }

    #[tokio::test]
    async fn rebinding_same_uid_keeps_subscriptions() {
        let (remote, store) = build(json!({}));
        store.set_identity(Some(ada())).await;
        assert_eq!(remote.active_listeners(), 2);

        let mut renamed = ada();
        renamed.display_name = Some("Countess".to_string());
        store.set_identity(Some(renamed.clone())).await;

        assert_eq!(remote.active_listeners(), 2);
        assert_eq!(store.snapshot().identity, Some(renamed));
    }

    // Feature: mission-control, Property: partial updates never touch unspecified fields
    proptest! {
        #[test]
        fn partial_update_preserves_other_fields(
            title in "[A-Za-z ]{1,24}",
            progress in 0u8..=100u8,
            completed in any::<bool>()
        ) {
            let runtime = tokio::runtime::Runtime::new().expect("runtime");
            runtime.block_on(async move {
                let (remote, store) = build(json!({
                    "users": { "u1": { "goals": { "g1": goal_record("Original", completed) } } }
                }));
                store.set_identity(Some(ada())).await;

                store
                    .update_goal(
                        "g1",
                        GoalPatch {
                            title: Some(title.clone()),
                            progress: Some(progress),
                            ..GoalPatch::default()
                        },
                    )
                    .await;

                let mut expected = goal_record("Original", completed);
                expected["title"] = json!(title);
                expected["progress"] = json!(progress);
                assert_eq!(remote.value_at("users/u1/goals/g1"), Some(expected));
            });
        }
    }
}
