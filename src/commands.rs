use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;

use crate::events::StatePayload;
use crate::gateway::{Gateway, RemoteError};
use crate::locks::KeyedLocks;
use crate::models::{NewTask, SettingsPatch, Task, TaskPatch, UserSettings, ValidationError};
use crate::state::AppState;

#[derive(Debug)]
pub enum CommandError {
    Validation(ValidationError),
    Remote(RemoteError),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Validation(err) => write!(f, "validation error: {err}"),
            CommandError::Remote(err) => write!(f, "remote error: {err}"),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommandError::Validation(err) => Some(err),
            CommandError::Remote(err) => Some(err),
        }
    }
}

impl From<ValidationError> for CommandError {
    fn from(value: ValidationError) -> Self {
        CommandError::Validation(value)
    }
}

impl From<RemoteError> for CommandError {
    fn from(value: RemoteError) -> Self {
        CommandError::Remote(value)
    }
}

/// Envelope handed to the view layer, which only needs a flag and a message.
#[derive(Debug, serde::Serialize)]
pub struct CommandResult<T> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> From<Result<T, CommandError>> for CommandResult<T> {
    fn from(value: Result<T, CommandError>) -> Self {
        match value {
            Ok(data) => CommandResult {
                ok: true,
                data: Some(data),
                error: None,
            },
            Err(error) => CommandResult {
                ok: false,
                data: None,
                error: Some(error.to_string()),
            },
        }
    }
}

/// Write-through entry points used by the views.
///
/// Every operation calls the gateway first and touches the store only after the
/// backend confirmed, using the row the backend returned. A failed call leaves
/// the store exactly as it was. Updates and deletes of the same task are
/// serialized in issue order; settings writes share a single lock.
pub struct TaskCommands {
    gateway: Arc<dyn Gateway>,
    state: AppState,
    task_locks: KeyedLocks,
    settings_lock: AsyncMutex<()>,
}

impl TaskCommands {
    pub fn new(gateway: Arc<dyn Gateway>, state: AppState) -> Self {
        Self {
            gateway,
            state,
            task_locks: KeyedLocks::new(),
            settings_lock: AsyncMutex::new(()),
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Initial fetch of tasks and settings. Nothing is applied unless both succeed;
    /// a user without a settings row gets the default settings.
    pub async fn load_state(&self) -> Result<StatePayload, CommandError> {
        let (tasks, settings) =
            tokio::join!(self.gateway.list_tasks(), self.gateway.get_settings());
        let tasks = tasks?;
        let settings = settings?;

        log::info!("commands: loaded tasks={}", tasks.len());
        self.state.set_tasks(tasks);
        match settings {
            Some(settings) => self.state.replace_settings(settings),
            None => {
                log::info!("commands: no settings row, applying defaults");
                self.state.replace_settings(UserSettings::default());
            }
        }
        Ok(self.state.snapshot())
    }

    pub async fn refresh_tasks(&self) -> Result<Vec<Task>, CommandError> {
        let tasks = self.gateway.list_tasks().await?;
        self.state.set_tasks(tasks.clone());
        Ok(tasks)
    }

    /// Creates the task remotely and stores the server-issued record.
    pub async fn create_task(&self, task: NewTask) -> Result<Task, CommandError> {
        task.validate()?;
        let created = self.gateway.create_task(&task).await?;
        self.state.insert_task(created.clone());
        Ok(created)
    }

    pub async fn update_task(&self, task_id: &str, patch: TaskPatch) -> Result<Task, CommandError> {
        patch.validate()?;
        let _guard = self.task_locks.acquire(task_id).await;
        let updated = self.gateway.update_task(task_id, &patch).await?;
        if updated.id != task_id {
            log::warn!(
                "commands: update of id={task_id} returned id={}",
                updated.id
            );
            return Err(CommandError::Remote(RemoteError::Decode(format!(
                "update of task {task_id} returned task {}",
                updated.id
            ))));
        }
        self.state.insert_task(updated.clone());
        Ok(updated)
    }

    pub async fn delete_task(&self, task_id: &str) -> Result<(), CommandError> {
        let _guard = self.task_locks.acquire(task_id).await;
        self.gateway.delete_task(task_id).await?;
        if !self.state.delete_task(task_id) {
            log::debug!("commands: deleted id={task_id} was not in the local store");
        }
        Ok(())
    }

    pub async fn update_settings(&self, patch: SettingsPatch) -> Result<UserSettings, CommandError> {
        let _guard = self.settings_lock.lock().await;
        let merged = self.gateway.upsert_settings(&patch).await?;
        self.state.replace_settings(merged.clone());
        Ok(merged)
    }
}
