use crate::models::{Task, UserSettings};

pub const EVENT_TASKS_REPLACED: &str = "tasks_replaced";
pub const EVENT_TASK_ADDED: &str = "task_added";
pub const EVENT_TASK_UPDATED: &str = "task_updated";
pub const EVENT_TASK_DELETED: &str = "task_deleted";
pub const EVENT_SETTINGS_UPDATED: &str = "settings_updated";

/// What a committed store mutation changed.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    TasksReplaced { count: usize },
    TaskAdded { id: String },
    TaskUpdated { id: String },
    TaskDeleted { id: String },
    SettingsUpdated,
}

impl StoreEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StoreEvent::TasksReplaced { .. } => EVENT_TASKS_REPLACED,
            StoreEvent::TaskAdded { .. } => EVENT_TASK_ADDED,
            StoreEvent::TaskUpdated { .. } => EVENT_TASK_UPDATED,
            StoreEvent::TaskDeleted { .. } => EVENT_TASK_DELETED,
            StoreEvent::SettingsUpdated => EVENT_SETTINGS_UPDATED,
        }
    }
}

/// Full snapshot of the store after a mutation. `revision` grows by one per
/// committed mutation, so a subscriber can drop a snapshot older than one it
/// already rendered.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StatePayload {
    pub revision: u64,
    pub tasks: Vec<Task>,
    pub settings: UserSettings,
}
