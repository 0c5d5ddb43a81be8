use crate::application::bootstrap::bootstrap_workspace_with_lookup;
use crate::application::identity::{IdentityProvider, PasswordIdentityProvider};
use crate::application::projections::{
    CompletionSummary, GoalFilter, InlineNotice, completion_summary, goals_for_day, goals_for_month,
    goals_for_week, list_view,
};
use crate::application::session::{SessionManager, SessionPolicy, SessionState};
use crate::application::store::{StoreState, SyncStore};
use crate::domain::models::{
    DayPlan, DayPlanDraft, Goal, GoalDraft, GoalPatch, GoalStatus, Identity, MAX_TOP_GOALS, Meals,
    Priority, ProfileUpdate, parse_date,
};
use crate::infrastructure::auth_client::ReqwestAuthClient;
use crate::infrastructure::credential_store::KeyringCredentialStore;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::realtime_client::{ReqwestRealtimeStore, TokenSource};
use crate::infrastructure::remote_store::{RemoteStore, validate_key};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub type ConnectedIdentityProvider = PasswordIdentityProvider<KeyringCredentialStore, ReqwestAuthClient>;
pub type ConnectedMissionControl = MissionControl<ReqwestRealtimeStore, ConnectedIdentityProvider>;

/// Goal form contents as entered in the UI.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalInput {
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub category: Option<String>,
    pub deadline: Option<String>,
    pub progress: Option<i64>,
    pub status: Option<String>,
}

/// Goal edit form; absent fields stay unchanged and an empty deadline clears it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalEdit {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub category: Option<String>,
    pub deadline: Option<String>,
    pub progress: Option<i64>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayPlanInput {
    pub date: String,
    pub gratitude: Option<String>,
    pub word_of_day: Option<String>,
    pub great_day: Option<String>,
    pub make_it_eleven: Option<String>,
    pub side_quest: Option<String>,
    #[serde(default)]
    pub top_goals: Vec<String>,
    #[serde(default)]
    pub meals: Meals,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DashboardView {
    Day(NaiveDate),
    Week(NaiveDate),
    Month { year: i32, month: u32 },
    List(GoalFilter),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub goals: Vec<Goal>,
    pub total: usize,
    pub completed: usize,
    pub percent_complete: u8,
    pub average_progress: u8,
    pub theme_id: String,
    pub loading: bool,
    pub error: Option<String>,
}

/// Application handle wiring the session manager to the sync store.
///
/// Commands validate their input before anything reaches the store and log
/// their outcome with a `command` field.
pub struct MissionControl<R, P>
where
    R: RemoteStore + 'static,
    P: IdentityProvider + 'static,
{
    session: Arc<SessionManager<P>>,
    store: Arc<SyncStore<R, P>>,
    timezone: Tz,
    notice: Mutex<InlineNotice>,
    now_provider: NowProvider,
}

impl<R, P> MissionControl<R, P>
where
    R: RemoteStore + 'static,
    P: IdentityProvider + 'static,
{
    pub fn new(remote: Arc<R>, provider: Arc<P>, policy: SessionPolicy) -> Self {
        let store = Arc::new(SyncStore::new(remote, Arc::clone(&provider)));
        let session = Arc::new(SessionManager::new(provider).with_policy(policy));
        session.add_observer(store.clone());
        Self {
            session,
            store,
            timezone: Tz::UTC,
            notice: Mutex::new(InlineNotice::default()),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn with_notice_duration(mut self, notice_duration: Duration) -> Self {
        self.notice = Mutex::new(InlineNotice::new(notice_duration));
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn session(&self) -> &SessionManager<P> {
        &self.session
    }

    pub fn store(&self) -> &SyncStore<R, P> {
        &self.store
    }

    pub fn watch_session(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe()
    }

    pub fn watch_store(&self) -> watch::Receiver<StoreState> {
        self.store.subscribe()
    }

    /// Message of the last rejected command while its display window lasts.
    pub fn notice(&self) -> Option<String> {
        self.notice
            .lock()
            .ok()
            .and_then(|notice| notice.visible().map(ToOwned::to_owned))
    }

    pub fn dismiss_notice(&self) {
        if let Ok(mut notice) = self.notice.lock() {
            notice.dismiss();
        }
    }

    fn command_failed(&self, command: &str, error: InfraError) -> InfraError {
        warn!(command = %command, error = %error, "command failed");
        if let Ok(mut notice) = self.notice.lock() {
            notice.raise(error.to_string());
        }
        error
    }

    /// Calendar date in the configured timezone.
    pub fn today(&self) -> NaiveDate {
        (self.now_provider)().with_timezone(&self.timezone).date_naive()
    }

    pub async fn start(&self) -> SessionState {
        let state = self.session.initialize().await;
        info!(command = "start", state = ?state, "session initialized");
        state
    }

    pub async fn retry_session(&self) -> SessionState {
        let state = self.session.retry().await;
        info!(command = "retry_session", state = ?state, "session retry finished");
        state
    }

    pub async fn sign_in(&self, email: String, password: String) -> Result<Identity, InfraError> {
        let email = required(&email, "email").map_err(|error| self.command_failed("sign_in", error))?;
        if password.is_empty() {
            return Err(self.command_failed("sign_in", validation("password must not be empty")));
        }
        let identity = self
            .session
            .sign_in(&email, &password)
            .await
            .map_err(|error| self.command_failed("sign_in", error))?;
        info!(command = "sign_in", uid = %identity.uid, "signed in");
        Ok(identity)
    }

    pub async fn sign_up(
        &self,
        email: String,
        password: String,
        display_name: Option<String>,
    ) -> Result<Identity, InfraError> {
        let email = required(&email, "email").map_err(|error| self.command_failed("sign_up", error))?;
        if password.is_empty() {
            return Err(self.command_failed("sign_up", validation("password must not be empty")));
        }
        let identity = self
            .session
            .sign_up(&email, &password, display_name.as_deref())
            .await
            .map_err(|error| self.command_failed("sign_up", error))?;
        info!(command = "sign_up", uid = %identity.uid, "account created");
        Ok(identity)
    }

    pub async fn sign_out(&self) -> Result<(), InfraError> {
        self.session
            .sign_out()
            .await
            .map_err(|error| self.command_failed("sign_out", error))?;
        info!(command = "sign_out", "signed out");
        Ok(())
    }

    pub async fn create_goal(&self, input: GoalInput) -> Result<Option<String>, InfraError> {
        let draft = goal_draft_from_input(input).map_err(|error| self.command_failed("create_goal", error))?;
        let goal_id = self.store.add_goal(draft).await;
        match goal_id.as_deref() {
            Some(goal_id) => info!(command = "create_goal", goal_id = %goal_id, "goal created"),
            None => warn!(command = "create_goal", "goal was not created"),
        }
        Ok(goal_id)
    }

    pub async fn edit_goal(&self, goal_id: String, edit: GoalEdit) -> Result<(), InfraError> {
        let goal_id = goal_key(&goal_id).map_err(|error| self.command_failed("edit_goal", error))?;
        let patch = goal_patch_from_edit(edit).map_err(|error| self.command_failed("edit_goal", error))?;
        self.store.update_goal(&goal_id, patch).await;
        info!(command = "edit_goal", goal_id = %goal_id, "goal updated");
        Ok(())
    }

    pub async fn toggle_goal(&self, goal_id: String) -> Result<(), InfraError> {
        let goal_id = goal_key(&goal_id).map_err(|error| self.command_failed("toggle_goal", error))?;
        self.store.toggle_goal(&goal_id).await;
        info!(command = "toggle_goal", goal_id = %goal_id, "goal toggled");
        Ok(())
    }

    pub async fn change_goal_status(&self, goal_id: String, status: String) -> Result<(), InfraError> {
        let goal_id =
            goal_key(&goal_id).map_err(|error| self.command_failed("change_goal_status", error))?;
        let status = parse_status(&status).map_err(|error| self.command_failed("change_goal_status", error))?;
        self.store.set_goal_status(&goal_id, status).await;
        info!(command = "change_goal_status", goal_id = %goal_id, status = ?status, "goal status changed");
        Ok(())
    }

    pub async fn remove_goal(&self, goal_id: String) -> Result<(), InfraError> {
        let goal_id = goal_key(&goal_id).map_err(|error| self.command_failed("remove_goal", error))?;
        self.store.delete_goal(&goal_id).await;
        info!(command = "remove_goal", goal_id = %goal_id, "goal removed");
        Ok(())
    }

    pub async fn save_profile(
        &self,
        display_name: Option<String>,
        photo_url: Option<String>,
    ) -> Result<(), InfraError> {
        let update = ProfileUpdate {
            display_name,
            photo_url,
        };
        update
            .validate()
            .map_err(|message| self.command_failed("save_profile", InfraError::Validation(message)))?;

        self.store.update_user_profile(update).await;
        if let Err(error) = self.session.refresh_identity().await {
            warn!(command = "save_profile", error = %error, "profile saved but identity refresh failed");
        }
        info!(command = "save_profile", "profile saved");
        Ok(())
    }

    /// Unknown theme ids are ignored.
    pub async fn choose_theme(&self, theme_id: String) -> Result<(), InfraError> {
        self.store.update_user_theme(theme_id.trim()).await;
        info!(command = "choose_theme", theme_id = %theme_id.trim(), "theme chosen");
        Ok(())
    }

    pub async fn save_day_plan(&self, input: DayPlanInput) -> Result<Option<DayPlan>, InfraError> {
        let draft = day_plan_draft_from_input(input).map_err(|error| self.command_failed("save_day_plan", error))?;
        let date = draft.date.clone();
        let saved = self.store.save_day_plan(draft).await;
        info!(command = "save_day_plan", date = %date, saved = saved.is_some(), "day plan saved");
        Ok(saved)
    }

    pub async fn load_day_plan(&self, date: String) -> Result<Option<DayPlan>, InfraError> {
        let date = parse_date(&date, "date")
            .map_err(|message| self.command_failed("load_day_plan", InfraError::Validation(message)))?;
        Ok(self.store.get_day_plan(date).await)
    }

    /// Plans for the week containing `anchor`, or the current week.
    pub async fn load_week_plans(
        &self,
        anchor: Option<String>,
    ) -> Result<BTreeMap<String, DayPlan>, InfraError> {
        let anchor = match anchor.as_deref().map(str::trim).filter(|value| !value.is_empty()) {
            Some(value) => parse_date(value, "anchor")
                .map_err(|message| self.command_failed("load_week_plans", InfraError::Validation(message)))?,
            None => self.today(),
        };
        let plans = self.store.get_week_plans(anchor).await;
        info!(command = "load_week_plans", anchor = %anchor, count = plans.len(), "week plans loaded");
        Ok(plans)
    }

    /// Goals and completion counts for one view.
    pub fn dashboard(&self, view: &DashboardView) -> Dashboard {
        let state = self.store.snapshot();
        let goals: Vec<Goal> = match view {
            DashboardView::Day(day) => goals_for_day(&state.goals, *day).into_iter().cloned().collect(),
            DashboardView::Week(anchor) => goals_for_week(&state.goals, *anchor)
                .into_iter()
                .cloned()
                .collect(),
            DashboardView::Month { year, month } => goals_for_month(&state.goals, *year, *month)
                .into_values()
                .flatten()
                .cloned()
                .collect(),
            DashboardView::List(filter) => list_view(&state.goals, filter).into_iter().cloned().collect(),
        };
        let CompletionSummary {
            total,
            completed,
            percent_complete,
            average_progress,
        } = completion_summary(&goals);
        Dashboard {
            goals,
            total,
            completed,
            percent_complete,
            average_progress,
            theme_id: state.theme_id,
            loading: state.loading,
            error: state.error,
        }
    }
}

impl ConnectedMissionControl {
    /// Bootstraps `workspace_root` and builds the HTTP-backed handle.
    pub fn connect(workspace_root: &Path) -> Result<Self, InfraError> {
        Self::connect_with_lookup(workspace_root, |key| std::env::var(key).ok())
    }

    pub fn connect_with_lookup<F>(workspace_root: &Path, lookup: F) -> Result<Self, InfraError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bootstrap = bootstrap_workspace_with_lookup(workspace_root, lookup)?;
        let configs = bootstrap.configs;
        let (api_key, database_url) = configs.backend.require_endpoints()?;

        let provider = Arc::new(PasswordIdentityProvider::new(
            Arc::new(KeyringCredentialStore::for_database(&database_url)),
            Arc::new(ReqwestAuthClient::new(api_key)),
        ));
        let tokens: Arc<dyn TokenSource> = provider.clone();
        let remote = Arc::new(ReqwestRealtimeStore::new(database_url, tokens));

        info!(
            command = "connect",
            app = %configs.app.app_name,
            timezone = %configs.app.timezone,
            "mission control connected"
        );
        Ok(
            MissionControl::new(remote, provider, SessionPolicy::from_config(&configs.backend))
                .with_timezone(configs.app.timezone)
                .with_notice_duration(configs.app.notice_duration),
        )
    }
}


fn validation(message: impl Into<String>) -> InfraError {
    InfraError::Validation(message.into())
}

fn required(value: &str, field_name: &str) -> Result<String, InfraError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(validation(format!("{field_name} must not be empty")));
    }
    Ok(value.to_string())
}

fn goal_key(goal_id: &str) -> Result<String, InfraError> {
    let goal_id = required(goal_id, "goal_id")?;
    validate_key(&goal_id, "goal_id")?;
    Ok(goal_id)
}

fn parse_priority(value: &str) -> Result<Priority, InfraError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "high" => Ok(Priority::High),
        "medium" => Ok(Priority::Medium),
        "low" => Ok(Priority::Low),
        other => Err(validation(format!("unsupported priority: {other}"))),
    }
}

fn parse_status(value: &str) -> Result<GoalStatus, InfraError> {
    match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
        "not_started" => Ok(GoalStatus::NotStarted),
        "in_progress" => Ok(GoalStatus::InProgress),
        "completed" => Ok(GoalStatus::Completed),
        other => Err(validation(format!("unsupported status: {other}"))),
    }
}

fn parse_progress(value: i64) -> Result<u8, InfraError> {
    u8::try_from(value)
        .ok()
        .filter(|progress| *progress <= 100)
        .ok_or_else(|| validation("progress must be between 0 and 100"))
}

fn parse_deadline(value: &str) -> Result<Option<NaiveDate>, InfraError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    parse_date(value, "deadline").map(Some).map_err(InfraError::Validation)
}

fn trimmed(value: Option<String>) -> String {
    value.map(|value| value.trim().to_string()).unwrap_or_default()
}

fn goal_draft_from_input(input: GoalInput) -> Result<GoalDraft, InfraError> {
    let title = required(&input.title, "title")?;
    let priority = match input.priority.as_deref() {
        Some(priority) if !priority.trim().is_empty() => parse_priority(priority)?,
        _ => return Err(validation("priority is required")),
    };

    let mut draft = GoalDraft::new(title, priority);
    draft.description = trimmed(input.description);
    if let Some(category) = input.category.filter(|category| !category.trim().is_empty()) {
        draft.category = category.trim().to_string();
    }
    if let Some(deadline) = input.deadline.as_deref() {
        draft.deadline = parse_deadline(deadline)?;
    }
    draft.progress = input.progress.map(parse_progress).transpose()?;
    draft.status = input.status.as_deref().map(parse_status).transpose()?;
    draft.validate().map_err(InfraError::Validation)?;
    Ok(draft)
}

fn goal_patch_from_edit(edit: GoalEdit) -> Result<GoalPatch, InfraError> {
    let patch = GoalPatch {
        title: edit.title.map(|title| title.trim().to_string()),
        description: edit.description.map(|description| description.trim().to_string()),
        priority: edit.priority.as_deref().map(parse_priority).transpose()?,
        category: edit.category.map(|category| category.trim().to_string()),
        deadline: edit.deadline.as_deref().map(parse_deadline).transpose()?,
        completed: None,
        status: edit.status.as_deref().map(parse_status).transpose()?,
        progress: edit.progress.map(parse_progress).transpose()?,
    };
    patch.validate().map_err(InfraError::Validation)?;
    if patch.is_empty() {
        return Err(validation("goal edit must change at least one field"));
    }
    Ok(patch)
}

fn day_plan_draft_from_input(input: DayPlanInput) -> Result<DayPlanDraft, InfraError> {
    let date = parse_date(&input.date, "date").map_err(InfraError::Validation)?;
    if input.top_goals.len() > MAX_TOP_GOALS {
        return Err(validation(format!(
            "at most {MAX_TOP_GOALS} top goals can be selected"
        )));
    }

    let mut draft = DayPlanDraft::for_date(date);
    draft.gratitude = trimmed(input.gratitude);
    draft.word_of_day = trimmed(input.word_of_day);
    draft.great_day = trimmed(input.great_day);
    draft.make_it_eleven = trimmed(input.make_it_eleven);
    draft.side_quest = trimmed(input.side_quest);
    draft.top_goals = input
        .top_goals
        .into_iter()
        .map(|goal_id| goal_id.trim().to_string())
        .collect();
    draft.meals = input.meals;
    draft.validate().map_err(InfraError::Validation)?;
    Ok(draft)
}
