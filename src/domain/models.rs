use chrono::{DateTime, NaiveDate, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::themes::DEFAULT_THEME_ID;

pub const MAX_TOP_GOALS: usize = 5;
pub const PENDING_GOAL_PREFIX: &str = "temp-";
pub const DEFAULT_CATEGORY: &str = "personal";

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
}

impl GoalStatus {
    /// Progress value the UI pairs with each status.
    pub fn default_progress(self) -> u8 {
        match self {
            Self::NotStarted => 0,
            Self::InProgress => 50,
            Self::Completed => 100,
        }
    }

    pub fn is_completed(self) -> bool {
        matches!(self, Self::Completed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default, deserialize_with = "deserialize_optional_date")]
    pub deadline: Option<NaiveDate>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub status: GoalStatus,
    #[serde(default, deserialize_with = "deserialize_progress")]
    pub progress: u8,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
}

impl Goal {
    /// Decodes a remote record stored under `key`; the key is the goal id.
    pub fn from_record(key: &str, record: serde_json::Value) -> Result<Self, serde_json::Error> {
        let mut goal: Goal = serde_json::from_value(record)?;
        goal.id = key.to_string();
        Ok(goal)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoalDraft {
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub category: String,
    pub deadline: Option<NaiveDate>,
    pub progress: Option<u8>,
    pub status: Option<GoalStatus>,
}

impl GoalDraft {
    pub fn new(title: impl Into<String>, priority: Priority) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            priority,
            category: DEFAULT_CATEGORY.to_string(),
            deadline: None,
            progress: None,
            status: None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.title, "goal.title")?;
        validate_non_empty(&self.category, "goal.category")?;
        validate_progress(self.progress, "goal.progress")
    }

    /// Full record written on creation. `completed` always starts false.
    pub fn into_record(self, created_at: DateTime<Utc>) -> serde_json::Value {
        let status = self.status.unwrap_or_default();
        let progress = self.progress.unwrap_or_else(|| status.default_progress());
        let mut record = serde_json::json!({
            "title": self.title.trim(),
            "description": self.description.trim(),
            "priority": self.priority,
            "category": self.category.trim(),
            "completed": false,
            "status": status,
            "progress": progress,
            "createdAt": created_at.to_rfc3339(),
        });
        if let (Some(deadline), Some(object)) = (self.deadline, record.as_object_mut()) {
            object.insert(
                "deadline".to_string(),
                serde_json::Value::String(deadline.format("%Y-%m-%d").to_string()),
            );
        }
        record
    }
}

/// Partial goal update. Only fields that are `Some` are written.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GoalPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// `Some(None)` clears the deadline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<Option<NaiveDate>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<GoalStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
}

impl GoalPatch {
    /// Writes status, completion flag and conventional progress together.
    pub fn for_status(status: GoalStatus) -> Self {
        Self {
            completed: Some(status.is_completed()),
            status: Some(status),
            progress: Some(status.default_progress()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(title) = self.title.as_deref() {
            validate_non_empty(title, "goal.title")?;
        }
        if let Some(category) = self.category.as_deref() {
            validate_non_empty(category, "goal.category")?;
        }
        validate_progress(self.progress, "goal.progress")
    }

    pub fn to_fields(&self) -> Result<serde_json::Map<String, serde_json::Value>, serde_json::Error> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(fields) => Ok(fields),
            _ => Ok(serde_json::Map::new()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Meals {
    #[serde(default)]
    pub breakfast: String,
    #[serde(default)]
    pub lunch: String,
    #[serde(default)]
    pub dinner: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DayPlan {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub gratitude: String,
    #[serde(default)]
    pub word_of_day: String,
    #[serde(default)]
    pub great_day: String,
    #[serde(default)]
    pub make_it_eleven: String,
    #[serde(default)]
    pub side_quest: String,
    #[serde(default)]
    pub top_goals: Vec<String>,
    #[serde(default)]
    pub meals: Meals,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl DayPlan {
    pub fn from_record(key: &str, record: serde_json::Value) -> Result<Self, serde_json::Error> {
        let mut plan: DayPlan = serde_json::from_value(record)?;
        plan.id = key.to_string();
        if plan.date.trim().is_empty() {
            plan.date = key.to_string();
        }
        Ok(plan)
    }

    /// Top goal references shown in the UI, in insertion order.
    pub fn displayed_top_goals(&self) -> &[String] {
        let shown = self.top_goals.len().min(MAX_TOP_GOALS);
        &self.top_goals[..shown]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DayPlanDraft {
    pub date: String,
    pub gratitude: String,
    pub word_of_day: String,
    pub great_day: String,
    pub make_it_eleven: String,
    pub side_quest: String,
    pub top_goals: Vec<String>,
    pub meals: Meals,
}

impl DayPlanDraft {
    pub fn for_date(date: NaiveDate) -> Self {
        Self {
            date: date.format("%Y-%m-%d").to_string(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_date(&self.date, "day_plan.date")?;
        if self.top_goals.len() > MAX_TOP_GOALS {
            return Err(format!(
                "day_plan.top_goals must contain at most {MAX_TOP_GOALS} entries"
            ));
        }
        for goal_id in &self.top_goals {
            validate_non_empty(goal_id, "day_plan.top_goals[]")?;
        }
        Ok(())
    }

    pub fn into_plan(self, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> DayPlan {
        DayPlan {
            id: self.date.clone(),
            date: self.date,
            gratitude: self.gratitude,
            word_of_day: self.word_of_day,
            great_day: self.great_day,
            make_it_eleven: self.make_it_eleven,
            side_quest: self.side_quest,
            top_goals: self.top_goals,
            meals: self.meals,
            created_at,
            updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    #[serde(default)]
    pub display_name: String,
    #[serde(rename = "photoURL", default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default = "default_theme")]
    pub theme: String,
}

impl UserSettings {
    pub fn defaults_for(identity: &Identity) -> Self {
        Self {
            display_name: identity.display_label(),
            photo_url: identity.photo_url.clone(),
            theme: DEFAULT_THEME_ID.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub uid: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(rename = "photoURL", default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
}

impl Identity {
    /// Display name, falling back to the local part of the email address.
    pub fn display_label(&self) -> String {
        if let Some(name) = self
            .display_name
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            return name.to_string();
        }
        self.email
            .split('@')
            .next()
            .unwrap_or_default()
            .to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

impl ProfileUpdate {
    pub fn validate(&self) -> Result<(), String> {
        if self.display_name.is_none() && self.photo_url.is_none() {
            return Err("profile update must change at least one field".to_string());
        }
        if let Some(name) = self.display_name.as_deref() {
            validate_non_empty(name, "profile.display_name")?;
        }
        Ok(())
    }

    /// Fields mirrored into the settings subtree.
    pub fn settings_fields(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut fields = serde_json::Map::new();
        if let Some(name) = self.display_name.as_deref() {
            fields.insert(
                "displayName".to_string(),
                serde_json::Value::String(name.trim().to_string()),
            );
        }
        if let Some(photo_url) = self.photo_url.as_deref() {
            fields.insert(
                "photoURL".to_string(),
                serde_json::Value::String(photo_url.trim().to_string()),
            );
        }
        fields
    }
}

/// Provider session persisted between launches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredSession {
    pub identity: Identity,
    pub id_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl StoredSession {
    pub fn is_valid_at(&self, now: DateTime<Utc>, leeway_seconds: i64) -> bool {
        self.expires_at > now + chrono::Duration::seconds(leeway_seconds)
            && !self.id_token.trim().is_empty()
    }
}

pub fn is_pending_goal_id(goal_id: &str) -> bool {
    goal_id.starts_with(PENDING_GOAL_PREFIX)
}

pub fn parse_date(value: &str, field_name: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| format!("{field_name} must be YYYY-MM-DD"))
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

fn default_theme() -> String {
    DEFAULT_THEME_ID.to_string()
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

fn validate_progress(value: Option<u8>, field_name: &str) -> Result<(), String> {
    match value {
        Some(progress) if progress > 100 => Err(format!("{field_name} must be 0-100")),
        _ => Ok(()),
    }
}

fn validate_date(value: &str, field_name: &str) -> Result<(), String> {
    parse_date(value, field_name).map(|_| ())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Millis(i64),
    Text(String),
}

// Older records carry epoch milliseconds, newer ones RFC 3339.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    match RawTimestamp::deserialize(deserializer)? {
        RawTimestamp::Millis(millis) => DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {millis}"))),
        RawTimestamp::Text(text) => DateTime::parse_from_rfc3339(text.trim())
            .map(|value| value.with_timezone(&Utc))
            .map_err(|error| D::Error::custom(format!("invalid timestamp '{text}': {error}"))),
    }
}

fn deserialize_optional_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(Some(date));
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|value| Some(value.with_timezone(&Utc).date_naive()))
        .map_err(|error| D::Error::custom(format!("invalid deadline '{raw}': {error}")))
}

fn deserialize_progress<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = f64::deserialize(deserializer)?;
    if !raw.is_finite() {
        return Ok(0);
    }
    Ok(raw.round().clamp(0.0, 100.0) as u8)
}
