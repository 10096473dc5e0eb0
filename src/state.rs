use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use crate::calendar;
use crate::events::{StatePayload, StoreEvent};
use crate::models::{NewTask, SettingsPatch, Task, TaskPatch, Timestamp, UserSettings};

pub type Listener = Arc<dyn Fn(&StoreEvent, &StatePayload) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// In-memory store of the current tasks and settings, shared by every view.
///
/// Each mutation runs to completion under one lock; subscribers are called after
/// the lock is released with the committed snapshot, so they never observe a
/// half-applied change and may read the store from inside the callback.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<Mutex<AppData>>,
    listeners: Arc<Mutex<Listeners>>,
}

impl AppState {
    pub fn new(tasks: Vec<Task>, settings: UserSettings) -> Self {
        Self {
            inner: Arc::new(Mutex::new(AppData {
                tasks: dedupe_by_id(tasks),
                settings,
                revision: 0,
                last_local_created_at: None,
            })),
            listeners: Arc::new(Mutex::new(Listeners::default())),
        }
    }

    pub fn snapshot(&self) -> StatePayload {
        let guard = self.inner.lock().expect("state poisoned");
        guard.payload()
    }

    pub fn revision(&self) -> u64 {
        let guard = self.inner.lock().expect("state poisoned");
        guard.revision
    }

    pub fn tasks(&self) -> Vec<Task> {
        let guard = self.inner.lock().expect("state poisoned");
        guard.tasks.clone()
    }

    pub fn task(&self, task_id: &str) -> Option<Task> {
        let guard = self.inner.lock().expect("state poisoned");
        guard.tasks.iter().find(|t| t.id == task_id).cloned()
    }

    /// Tasks whose deadline falls on `date` in the user's configured timezone.
    pub fn tasks_on(&self, date: NaiveDate) -> Vec<Task> {
        let guard = self.inner.lock().expect("state poisoned");
        let tz = calendar::resolve_timezone(&guard.settings.timezone);
        calendar::tasks_on(&guard.tasks, date, tz)
    }

    pub fn settings(&self) -> UserSettings {
        let guard = self.inner.lock().expect("state poisoned");
        guard.settings.clone()
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&StoreEvent, &StatePayload) + Send + Sync + 'static,
    {
        let mut guard = self.listeners.lock().expect("listeners poisoned");
        guard.next_id += 1;
        let id = SubscriptionId(guard.next_id);
        guard.entries.push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut guard = self.listeners.lock().expect("listeners poisoned");
        let before = guard.entries.len();
        guard.entries.retain(|(entry_id, _)| *entry_id != id);
        guard.entries.len() != before
    }

    /// Replaces the whole task list (after a bulk fetch). Later duplicates of an id are dropped.
    pub fn set_tasks(&self, tasks: Vec<Task>) {
        self.commit(|data| {
            data.tasks = dedupe_by_id(tasks);
            let count = data.tasks.len();
            ((), Some(StoreEvent::TasksReplaced { count }))
        })
    }

    /// Appends a task with a locally generated id and creation time.
    ///
    /// Creation times never go backwards across successive calls, even if the
    /// system clock does.
    pub fn add_task(&self, task: NewTask) -> Task {
        self.commit(|data| {
            let mut created_at = Utc::now();
            if let Some(last) = data.last_local_created_at {
                if created_at < last {
                    created_at = last;
                }
            }
            data.last_local_created_at = Some(created_at);
            let mut id = Uuid::new_v4().to_string();
            while data.tasks.iter().any(|t| t.id == id) {
                id = Uuid::new_v4().to_string();
            }
            let task = task.into_task(id, created_at);
            data.tasks.push(task.clone());
            let event = StoreEvent::TaskAdded {
                id: task.id.clone(),
            };
            (task, Some(event))
        })
    }

    /// Stores a task that already carries its identifier (normally issued by the
    /// backend). An existing task with the same id is replaced in place.
    pub fn insert_task(&self, task: Task) {
        self.commit(|data| {
            let id = task.id.clone();
            match data.tasks.iter_mut().find(|t| t.id == id) {
                Some(existing) => {
                    *existing = task;
                    ((), Some(StoreEvent::TaskUpdated { id }))
                }
                None => {
                    data.tasks.push(task);
                    ((), Some(StoreEvent::TaskAdded { id }))
                }
            }
        })
    }

    /// Merges `patch` into the task with `task_id`. Unknown ids are a no-op.
    pub fn update_task(&self, task_id: &str, patch: &TaskPatch) -> Option<Task> {
        self.commit(|data| match data.tasks.iter_mut().find(|t| t.id == task_id) {
            Some(task) => {
                patch.apply_to(task);
                let event = StoreEvent::TaskUpdated {
                    id: task_id.to_string(),
                };
                (Some(task.clone()), Some(event))
            }
            None => (None, None),
        })
    }

    /// Removes the task with `task_id`; returns whether anything was removed.
    pub fn delete_task(&self, task_id: &str) -> bool {
        self.commit(|data| {
            let before = data.tasks.len();
            data.tasks.retain(|task| task.id != task_id);
            if data.tasks.len() == before {
                return (false, None);
            }
            let event = StoreEvent::TaskDeleted {
                id: task_id.to_string(),
            };
            (true, Some(event))
        })
    }

    pub fn update_settings(&self, patch: &SettingsPatch) -> UserSettings {
        self.commit(|data| {
            patch.apply_to(&mut data.settings);
            (data.settings.clone(), Some(StoreEvent::SettingsUpdated))
        })
    }

    pub fn replace_settings(&self, settings: UserSettings) {
        self.commit(|data| {
            data.settings = settings;
            ((), Some(StoreEvent::SettingsUpdated))
        })
    }

    /// Runs `mutate` under the lock. A `None` event means nothing changed: no
    /// revision bump and no notification.
    fn commit<R>(&self, mutate: impl FnOnce(&mut AppData) -> (R, Option<StoreEvent>)) -> R {
        let (out, committed) = {
            let mut guard = self.inner.lock().expect("state poisoned");
            let (out, event) = mutate(&mut *guard);
            let committed = event.map(|event| {
                guard.revision += 1;
                (event, guard.payload())
            });
            (out, committed)
        };
        if let Some((event, payload)) = committed {
            log::debug!(
                "state: event={} revision={} tasks={}",
                event.name(),
                payload.revision,
                payload.tasks.len()
            );
            self.notify(&event, &payload);
        }
        out
    }

    fn notify(&self, event: &StoreEvent, payload: &StatePayload) {
        let listeners: Vec<Listener> = {
            let guard = self.listeners.lock().expect("listeners poisoned");
            guard.entries.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        for listener in listeners {
            listener(event, payload);
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(Vec::new(), UserSettings::default())
    }
}

#[derive(Debug)]
struct AppData {
    tasks: Vec<Task>,
    settings: UserSettings,
    revision: u64,
    last_local_created_at: Option<Timestamp>,
}

impl AppData {
    fn payload(&self) -> StatePayload {
        StatePayload {
            revision: self.revision,
            tasks: self.tasks.clone(),
            settings: self.settings.clone(),
        }
    }
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(SubscriptionId, Listener)>,
}

fn dedupe_by_id(tasks: Vec<Task>) -> Vec<Task> {
    let mut seen = HashSet::new();
    let total = tasks.len();
    let out: Vec<Task> = tasks
        .into_iter()
        .filter(|task| seen.insert(task.id.clone()))
        .collect();
    if out.len() != total {
        log::warn!(
            "state: dropped {} task(s) with duplicate ids",
            total - out.len()
        );
    }
    out
}
