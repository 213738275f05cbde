//! In-memory notes plugin

use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use skein_mcp::prelude::*;

pub const ALL_NOTES_URI: &str = "notes://all";

const DEFAULT_MAX_NOTES: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub id: u64,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
struct NoteStore {
    notes: RwLock<Vec<Note>>,
    max_notes: AtomicUsize,
}

impl NoteStore {
    fn add(&self, title: String, body: String) -> anyhow::Result<Note> {
        let mut notes = self.notes.write();
        if notes.len() >= self.max_notes.load(Ordering::Relaxed) {
            bail!("note limit of {} reached", notes.len());
        }
        let id = notes.last().map_or(1, |n| n.id + 1);
        let note = Note {
            id,
            title,
            body,
            created_at: Utc::now(),
        };
        notes.push(note.clone());
        Ok(note)
    }

    fn snapshot(&self) -> Vec<Note> {
        self.notes.read().clone()
    }
}

/// Notes live only as long as the plugin stays active
pub struct NotesPlugin {
    store: Arc<NoteStore>,
}

impl NotesPlugin {
    pub fn new() -> Self {
        let store = NoteStore::default();
        store.max_notes.store(DEFAULT_MAX_NOTES, Ordering::Relaxed);
        Self { store: Arc::new(store) }
    }
}

impl Default for NotesPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for NotesPlugin {
    fn version(&self) -> String {
        crate::VERSION.to_string()
    }

    fn tools(&self) -> Vec<Arc<dyn ToolHandler>> {
        vec![
            Arc::new(NoteAddTool {
                store: Arc::clone(&self.store),
            }),
            Arc::new(NoteListTool {
                store: Arc::clone(&self.store),
            }),
        ]
    }

    fn resources(&self) -> Vec<Arc<dyn ResourceHandler>> {
        vec![Arc::new(AllNotesResource {
            store: Arc::clone(&self.store),
        })]
    }

    async fn initialize(&self, config: &Value) -> anyhow::Result<()> {
        if let Some(max) = config.get("max_notes") {
            let max = max.as_u64().context("max_notes must be a non-negative integer")?;
            self.store.max_notes.store(usize::try_from(max)?, Ordering::Relaxed);
        }
        debug!(max_notes = self.store.max_notes.load(Ordering::Relaxed), "notes plugin ready");
        Ok(())
    }

    async fn cleanup(&self) -> anyhow::Result<()> {
        self.store.notes.write().clear();
        Ok(())
    }
}

struct NoteAddTool {
    store: Arc<NoteStore>,
}

#[async_trait]
impl ToolHandler for NoteAddTool {
    fn tool_info(&self) -> ToolInfo {
        ToolInfo {
            name: "note_add".to_string(),
            description: "Store a note".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "title": {"type": "string", "minLength": 1},
                    "body": {"type": "string", "default": ""}
                },
                "required": ["title"]
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> anyhow::Result<ToolCallResponse> {
        let title = arguments
            .get("title")
            .and_then(Value::as_str)
            .context("'title' must be a string")?;
        let body = arguments.get("body").and_then(Value::as_str).unwrap_or_default();
        let note = self.store.add(title.to_string(), body.to_string())?;
        Ok(ToolCallResponse::text(format!("Added note {}", note.id)))
    }
}

struct NoteListTool {
    store: Arc<NoteStore>,
}

#[async_trait]
impl ToolHandler for NoteListTool {
    fn tool_info(&self) -> ToolInfo {
        ToolInfo {
            name: "note_list".to_string(),
            description: "List stored notes".to_string(),
            input_schema: json!({"type": "object", "properties": {}}),
        }
    }

    async fn execute(&self, _arguments: Value) -> anyhow::Result<ToolCallResponse> {
        Ok(ToolCallResponse::json(&serde_json::to_value(self.store.snapshot())?))
    }
}

struct AllNotesResource {
    store: Arc<NoteStore>,
}

#[async_trait]
impl ResourceHandler for AllNotesResource {
    fn resource_info(&self) -> ResourceInfo {
        ResourceInfo {
            uri: ALL_NOTES_URI.to_string(),
            name: "All notes".to_string(),
            description: None,
            mime_type: Some("application/json".to_string()),
        }
    }

    async fn read(&self, uri: &str) -> anyhow::Result<ResourceReadResponse> {
        let body = serde_json::to_string(&self.store.snapshot())?;
        Ok(ResourceReadResponse::text(uri, Some("application/json"), body))
    }
}
