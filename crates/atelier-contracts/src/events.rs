use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Append-only session log.
///
/// - default fields are `type`, `session_id`, `ts`
/// - caller payload is merged last and can override defaults
/// - file sinks write one compact JSON object per line
///
/// Clones share the same sink, so the engine and the CLI can both emit.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    sink: Sink,
    session_id: String,
}

#[derive(Debug)]
enum Sink {
    File { path: PathBuf, lock: Mutex<()> },
    Memory(Mutex<Vec<Value>>),
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self::with_sink(
            Sink::File {
                path: path.into(),
                lock: Mutex::new(()),
            },
            session_id,
        )
    }

    /// Keeps events in memory; read them back with [`recorded`](Self::recorded).
    pub fn in_memory(session_id: impl Into<String>) -> Self {
        Self::with_sink(Sink::Memory(Mutex::new(Vec::new())), session_id)
    }

    fn with_sink(sink: Sink, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                sink,
                session_id: session_id.into(),
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.inner.sink {
            Sink::File { path, .. } => Some(path),
            Sink::Memory(_) => None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "session_id".to_string(),
            Value::String(self.inner.session_id.clone()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }
        let event = Value::Object(event);

        match &self.inner.sink {
            Sink::File { path, lock } => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let line = serde_json::to_string(&event)?;
                let _guard = lock
                    .lock()
                    .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
                let mut file = OpenOptions::new().create(true).append(true).open(path)?;
                file.write_all(line.as_bytes())?;
                file.write_all(b"\n")?;
            }
            Sink::Memory(rows) => {
                rows.lock()
                    .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?
                    .push(event.clone());
            }
        }

        Ok(event)
    }

    /// Events captured by an in-memory writer. File writers return nothing.
    pub fn recorded(&self) -> Vec<Value> {
        match &self.inner.sink {
            Sink::Memory(rows) => rows.lock().map(|rows| rows.clone()).unwrap_or_default(),
            Sink::File { .. } => Vec::new(),
        }
    }

    pub fn recorded_types(&self) -> Vec<String> {
        self.recorded()
            .iter()
            .filter_map(|row| row.get("type").and_then(Value::as_str).map(str::to_string))
            .collect()
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
