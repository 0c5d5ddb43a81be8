use crate::infrastructure::error::InfraError;
use crate::infrastructure::snapshot_tree::{SnapshotTree, split_path};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Path builders for the per-user data tree.
pub mod paths {
    pub fn goals(uid: &str) -> String {
        format!("users/{uid}/goals")
    }

    pub fn goal(uid: &str, goal_id: &str) -> String {
        format!("users/{uid}/goals/{goal_id}")
    }

    pub fn settings(uid: &str) -> String {
        format!("users/{uid}/settings")
    }

    pub fn day_plans(uid: &str) -> String {
        format!("users/{uid}/dayplans")
    }

    pub fn day_plan(uid: &str, date: &str) -> String {
        format!("users/{uid}/dayplans/{date}")
    }
}

/// Rejects keys the database would refuse or misinterpret as nested paths.
pub fn validate_key(key: &str, field: &str) -> Result<(), InfraError> {
    if key.trim().is_empty() {
        return Err(InfraError::Validation(format!("{field} must not be empty")));
    }
    if key
        .chars()
        .any(|ch| matches!(ch, '/' | '.' | '#' | '$' | '[' | ']') || ch.is_control())
    {
        return Err(InfraError::Validation(format!(
            "{field} contains characters not allowed in keys: {key}"
        )));
    }
    Ok(())
}

/// Stream of full snapshots for one subscribed path.
///
/// `None` items mean the path currently holds no data. Dropping the
/// subscription stops any background listener feeding it.
#[derive(Debug)]
pub struct LiveSubscription {
    receiver: mpsc::UnboundedReceiver<Option<Value>>,
    task: Option<JoinHandle<()>>,
}

impl LiveSubscription {
    pub fn new(receiver: mpsc::UnboundedReceiver<Option<Value>>) -> Self {
        Self {
            receiver,
            task: None,
        }
    }

    pub fn with_task(receiver: mpsc::UnboundedReceiver<Option<Value>>, task: JoinHandle<()>) -> Self {
        Self {
            receiver,
            task: Some(task),
        }
    }

    /// Waits for the next snapshot; `None` once the feed has closed.
    pub async fn next_snapshot(&mut self) -> Option<Option<Value>> {
        self.receiver.recv().await
    }
}

impl Drop for LiveSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Stores `value` under a new generated child key and returns the key.
    async fn push(&self, path: &str, value: Value) -> Result<String, InfraError>;

    async fn set(&self, path: &str, value: Value) -> Result<(), InfraError>;

    /// Writes only the named fields, leaving siblings untouched.
    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), InfraError>;

    async fn get(&self, path: &str) -> Result<Option<Value>, InfraError>;

    /// Children of `path` whose keys fall in `start..=end`, ordered by key.
    async fn get_key_range(
        &self,
        path: &str,
        start: &str,
        end: &str,
    ) -> Result<Map<String, Value>, InfraError>;

    async fn remove(&self, path: &str) -> Result<(), InfraError>;

    async fn subscribe(&self, path: &str) -> Result<LiveSubscription, InfraError>;
}

/// Generates push keys that sort in creation order.
pub fn next_push_key(timestamp_millis: i64, sequence: u64) -> String {
    format!("-M{:012x}{:06x}", timestamp_millis.max(0), sequence & 0xff_ffff)
}

#[derive(Debug)]
struct Watcher {
    path: String,
    sender: mpsc::UnboundedSender<Option<Value>>,
}

#[derive(Debug, Default)]
struct InMemoryState {
    tree: SnapshotTree,
    watchers: Vec<Watcher>,
    write_failure: Option<String>,
    read_failure: Option<String>,
    writes: usize,
}

/// Process-local data tree with live listeners, used in tests and demos.
#[derive(Debug, Default)]
pub struct InMemoryRemoteStore {
    state: Mutex<InMemoryState>,
    sequence: AtomicU64,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(root: Value) -> Self {
        let store = Self::default();
        if let Ok(mut state) = store.state.lock() {
            state.tree = SnapshotTree::new(root);
        }
        store
    }

    /// Makes every subsequent write fail with `message` until cleared.
    pub fn fail_writes(&self, message: Option<&str>) {
        if let Ok(mut state) = self.state.lock() {
            state.write_failure = message.map(ToOwned::to_owned);
        }
    }

    /// Makes every subsequent read or subscribe fail with `message` until cleared.
    pub fn fail_reads(&self, message: Option<&str>) {
        if let Ok(mut state) = self.state.lock() {
            state.read_failure = message.map(ToOwned::to_owned);
        }
    }

    pub fn value_at(&self, path: &str) -> Option<Value> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.tree.snapshot(path))
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().map(|state| state.writes).unwrap_or(0)
    }

    /// Listeners whose receiving side is still alive.
    pub fn active_listeners(&self) -> usize {
        self.state
            .lock()
            .map(|state| {
                state
                    .watchers
                    .iter()
                    .filter(|watcher| !watcher.sender.is_closed())
                    .count()
            })
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, InMemoryState>, InfraError> {
        self.state
            .lock()
            .map_err(|error| InfraError::Remote(format!("in-memory store lock poisoned: {error}")))
    }

    fn write<F>(&self, path: &str, apply: F) -> Result<(), InfraError>
    where
        F: FnOnce(&mut SnapshotTree),
    {
        let mut state = self.lock()?;
        if let Some(message) = state.write_failure.clone() {
            return Err(InfraError::Remote(message));
        }
        apply(&mut state.tree);
        state.writes += 1;
        notify_watchers(&mut state, path);
        Ok(())
    }

    fn read(&self, path: &str) -> Result<Option<Value>, InfraError> {
        let state = self.lock()?;
        if let Some(message) = state.read_failure.clone() {
            return Err(InfraError::Remote(message));
        }
        Ok(state.tree.snapshot(path))
    }
}

fn overlaps(written: &str, watched: &str) -> bool {
    let written = split_path(written);
    let watched = split_path(watched);
    written
        .iter()
        .zip(watched.iter())
        .all(|(left, right)| left == right)
}

fn notify_watchers(state: &mut InMemoryState, written_path: &str) {
    let InMemoryState { tree, watchers, .. } = state;
    watchers.retain(|watcher| {
        if !overlaps(written_path, &watcher.path) {
            return !watcher.sender.is_closed();
        }
        watcher.sender.send(tree.snapshot(&watcher.path)).is_ok()
    });
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn push(&self, path: &str, value: Value) -> Result<String, InfraError> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let key = next_push_key(chrono::Utc::now().timestamp_millis(), sequence);
        let child = format!("{}/{key}", split_path(path).join("/"));
        self.write(&child, |tree| tree.set(&child, value))?;
        Ok(key)
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), InfraError> {
        self.write(path, |tree| tree.set(path, value))
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), InfraError> {
        self.write(path, |tree| tree.merge(path, fields))
    }

    async fn get(&self, path: &str) -> Result<Option<Value>, InfraError> {
        self.read(path)
    }

    async fn get_key_range(
        &self,
        path: &str,
        start: &str,
        end: &str,
    ) -> Result<Map<String, Value>, InfraError> {
        let Some(Value::Object(children)) = self.read(path)? else {
            return Ok(Map::new());
        };
        let mut matching = children
            .into_iter()
            .filter(|(key, _)| key.as_str() >= start && key.as_str() <= end)
            .collect::<Vec<_>>();
        matching.sort_by(|left, right| left.0.cmp(&right.0));
        Ok(matching.into_iter().collect())
    }

    async fn remove(&self, path: &str) -> Result<(), InfraError> {
        self.write(path, |tree| tree.set(path, Value::Null))
    }

    async fn subscribe(&self, path: &str) -> Result<LiveSubscription, InfraError> {
        let mut state = self.lock()?;
        if let Some(message) = state.read_failure.clone() {
            return Err(InfraError::Remote(message));
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        let _ = sender.send(state.tree.snapshot(path));
        state.watchers.push(Watcher {
            path: path.to_string(),
            sender,
        });
        Ok(LiveSubscription::new(receiver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn paths_follow_user_layout() {
        assert_eq!(paths::goal("u1", "g1"), "users/u1/goals/g1");
        assert_eq!(paths::settings("u1"), "users/u1/settings");
        assert_eq!(paths::day_plan("u1", "2024-03-04"), "users/u1/dayplans/2024-03-04");
    }

    #[test]
    fn validate_key_rejects_path_characters() {
        assert!(validate_key("g1", "goal id").is_ok());
        assert!(validate_key("a/b", "goal id").is_err());
        assert!(validate_key("a.b", "goal id").is_err());
        assert!(validate_key("  ", "goal id").is_err());
    }

    #[test]
    fn push_keys_sort_by_time_then_sequence() {
        let first = next_push_key(1_000, 5);
        let second = next_push_key(1_000, 6);
        let third = next_push_key(2_000, 0);
        assert!(first < second);
        assert!(second < third);
    }

    #[tokio::test]
    async fn subscribe_delivers_initial_and_subsequent_snapshots() {
        let store = InMemoryRemoteStore::with_data(json!({
            "users": { "u1": { "goals": { "g1": { "title": "Run" } } } }
        }));
        let mut subscription = store.subscribe("users/u1/goals").await.expect("subscribe");

        assert_eq!(
            subscription.next_snapshot().await,
            Some(Some(json!({ "g1": { "title": "Run" } })))
        );

        store
            .update(
                "users/u1/goals/g1",
                json!({ "completed": true }).as_object().cloned().expect("object"),
            )
            .await
            .expect("update");
        assert_eq!(
            subscription.next_snapshot().await,
            Some(Some(json!({ "g1": { "title": "Run", "completed": true } })))
        );

        store.remove("users/u1/goals/g1").await.expect("remove");
        assert_eq!(subscription.next_snapshot().await, Some(None));
    }

    #[tokio::test]
    async fn unrelated_writes_do_not_notify() {
        let store = InMemoryRemoteStore::new();
        let mut subscription = store.subscribe("users/u1/goals").await.expect("subscribe");
        assert_eq!(subscription.next_snapshot().await, Some(None));

        store
            .set("users/u2/goals/g9", json!({ "title": "Other" }))
            .await
            .expect("set");
        store
            .set("users/u1/goals/g1", json!({ "title": "Mine" }))
            .await
            .expect("set");

        assert_eq!(
            subscription.next_snapshot().await,
            Some(Some(json!({ "g1": { "title": "Mine" } })))
        );
    }

    #[tokio::test]
    async fn dropped_subscription_is_released_on_next_write() {
        let store = InMemoryRemoteStore::new();
        let subscription = store.subscribe("users/u1/settings").await.expect("subscribe");
        assert_eq!(store.active_listeners(), 1);

        drop(subscription);
        assert_eq!(store.active_listeners(), 0);
        store
            .set("users/u1/settings/theme", json!("solar-flare"))
            .await
            .expect("set");
        assert_eq!(store.active_listeners(), 0);
    }

    #[tokio::test]
    async fn push_returns_generated_key() {
        let store = InMemoryRemoteStore::new();
        let key = store
            .push("users/u1/goals", json!({ "title": "Ship" }))
            .await
            .expect("push");

        assert!(key.starts_with('-'));
        assert_eq!(
            store.value_at(&paths::goal("u1", &key)),
            Some(json!({ "title": "Ship" }))
        );
    }

    #[tokio::test]
    async fn key_range_is_inclusive_on_both_ends() {
        let store = InMemoryRemoteStore::with_data(json!({
            "plans": {
                "2024-03-03": { "focus": "before" },
                "2024-03-04": { "focus": "monday" },
                "2024-03-10": { "focus": "sunday" },
                "2024-03-11": { "focus": "after" }
            }
        }));

        let range = store
            .get_key_range("plans", "2024-03-04", "2024-03-10")
            .await
            .expect("range");
        assert_eq!(range.keys().collect::<Vec<_>>(), vec!["2024-03-04", "2024-03-10"]);
    }

    #[tokio::test]
    async fn injected_write_failure_leaves_tree_untouched() {
        let store = InMemoryRemoteStore::new();
        store.fail_writes(Some("PERMISSION_DENIED"));

        let error = store
            .set("users/u1/settings/theme", json!("ice-comet"))
            .await
            .expect_err("write should fail");
        assert!(matches!(error, InfraError::Remote(message) if message == "PERMISSION_DENIED"));
        assert_eq!(store.value_at("users/u1/settings"), None);
        assert_eq!(store.write_count(), 0);
    }
}
