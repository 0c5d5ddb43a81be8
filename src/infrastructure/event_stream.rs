use crate::infrastructure::error::InfraError;
use crate::infrastructure::snapshot_tree::SnapshotTree;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEvent {
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` decoder.
///
/// Chunks may end mid-line or mid-character; only complete lines are decoded.
#[derive(Debug, Default)]
pub struct EventStreamParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl EventStreamParser {
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ServerEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let raw_line = self.buffer.drain(..=newline).collect::<Vec<u8>>();
            let line = String::from_utf8_lossy(&raw_line);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }

        events
    }

    fn dispatch(&mut self) -> Option<ServerEvent> {
        let event = self.event.take();
        let data = std::mem::take(&mut self.data);
        if event.is_none() && data.is_empty() {
            return None;
        }
        Some(ServerEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data: data.join("\n"),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    Put { path: String, data: Value },
    Patch { path: String, data: Value },
    KeepAlive,
    Cancel(String),
    AuthRevoked,
}

#[derive(Debug, serde::Deserialize)]
struct PathPayload {
    path: String,
    data: Value,
}

impl RealtimeEvent {
    /// Returns `Ok(None)` for event names the stream protocol does not define.
    pub fn parse(event: &ServerEvent) -> Result<Option<Self>, InfraError> {
        match event.event.as_str() {
            "put" | "patch" => {
                let payload: PathPayload = serde_json::from_str(&event.data).map_err(|error| {
                    InfraError::Remote(format!("invalid {} event payload: {error}", event.event))
                })?;
                Ok(Some(if event.event == "put" {
                    Self::Put {
                        path: payload.path,
                        data: payload.data,
                    }
                } else {
                    Self::Patch {
                        path: payload.path,
                        data: payload.data,
                    }
                }))
            }
            "keep-alive" => Ok(Some(Self::KeepAlive)),
            "cancel" => Ok(Some(Self::Cancel(event.data.trim().to_string()))),
            "auth_revoked" => Ok(Some(Self::AuthRevoked)),
            _ => Ok(None),
        }
    }

    /// Applies a data event to the tree; returns `false` for control events.
    pub fn apply(self, tree: &mut SnapshotTree) -> bool {
        match self {
            Self::Put { path, data } => {
                tree.set(&path, data);
                true
            }
            Self::Patch { path, data } => {
                if let Value::Object(fields) = data {
                    tree.merge(&path, fields);
                }
                true
            }
            Self::KeepAlive | Self::Cancel(_) | Self::AuthRevoked => false,
        }
    }
}
