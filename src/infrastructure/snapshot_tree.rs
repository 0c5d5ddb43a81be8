use serde_json::{Map, Value};

/// JSON tree addressed by slash-separated paths.
///
/// Mirrors realtime-database semantics: writing `null` deletes, and empty
/// objects never survive a write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotTree {
    root: Value,
}

impl SnapshotTree {
    pub fn new(root: Value) -> Self {
        let mut tree = Self::default();
        tree.set("", root);
        tree
    }

    pub fn set(&mut self, path: &str, value: Value) {
        let segments = split_path(path);
        set_at(&mut self.root, &segments, prune(value));
        if is_empty_node(&self.root) {
            self.root = Value::Null;
        }
    }

    /// Writes each field under `path`; field keys may themselves be paths.
    pub fn merge(&mut self, path: &str, fields: Map<String, Value>) {
        let base = split_path(path).join("/");
        for (key, value) in fields {
            let child = if base.is_empty() {
                key
            } else {
                format!("{base}/{key}")
            };
            self.set(&child, value);
        }
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut node = &self.root;
        for segment in split_path(path) {
            node = node.as_object()?.get(segment)?;
        }
        if node.is_null() { None } else { Some(node) }
    }

    pub fn snapshot(&self, path: &str) -> Option<Value> {
        self.get(path).cloned()
    }

    pub fn root(&self) -> Option<Value> {
        self.snapshot("")
    }
}

pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect()
}

fn set_at(node: &mut Value, segments: &[&str], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *node = value;
        return;
    };

    if !node.is_object() {
        if value.is_null() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    let Value::Object(children) = node else {
        return;
    };

    if rest.is_empty() {
        if value.is_null() {
            children.remove(*head);
        } else {
            children.insert((*head).to_string(), value);
        }
        return;
    }

    let child = children
        .entry((*head).to_string())
        .or_insert(Value::Null);
    set_at(child, rest, value);
    if is_empty_node(child) {
        children.remove(*head);
    }
}

fn prune(value: Value) -> Value {
    match value {
        Value::Object(children) => {
            let pruned = children
                .into_iter()
                .map(|(key, child)| (key, prune(child)))
                .filter(|(_, child)| !is_empty_node(child))
                .collect::<Map<_, _>>();
            if pruned.is_empty() {
                Value::Null
            } else {
                Value::Object(pruned)
            }
        }
        other => other,
    }
}

fn is_empty_node(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(children) => children.is_empty(),
        _ => false,
    }
}
