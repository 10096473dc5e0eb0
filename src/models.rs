use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

pub type Timestamp = DateTime<Utc>;

/// Border color the task form preselects.
pub const DEFAULT_TASK_COLOR: &str = "#6366f1";
pub const DEFAULT_USER_NAME: &str = "User";
pub const DEFAULT_LANGUAGE: &str = "en";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: TaskStatus,
    pub created_at: Timestamp,
    #[serde(default)]
    pub deadline: Option<Timestamp>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl Task {
    pub fn is_done(&self) -> bool {
        self.status == TaskStatus::Done
    }

    /// Calendar day of the deadline as seen from `tz`.
    pub fn deadline_date(&self, tz: Tz) -> Option<NaiveDate> {
        self.deadline
            .map(|deadline| deadline.with_timezone(&tz).date_naive())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    EmptyTitle,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::EmptyTitle => write!(f, "task title must not be empty"),
        }
    }
}

impl std::error::Error for ValidationError {}

fn validate_title(title: &str) -> Result<(), ValidationError> {
    if title.trim().is_empty() {
        return Err(ValidationError::EmptyTitle);
    }
    Ok(())
}

/// A task as submitted by the task form: no identifier, creation time, or owner yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct NewTask {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl NewTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            status: TaskStatus::Todo,
            deadline: None,
            color: Some(DEFAULT_TASK_COLOR.to_string()),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_deadline(mut self, deadline: Timestamp) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_color(mut self, color: Option<String>) -> Self {
        self.color = color;
        self
    }

    /// Seeds the deadline with midnight of `date` in `tz`, the way a click on a
    /// calendar cell pre-fills the form.
    pub fn due_on(mut self, date: NaiveDate, tz: Tz) -> Self {
        let midnight = date.and_time(NaiveTime::MIN);
        self.deadline = tz
            .from_local_datetime(&midnight)
            .earliest()
            .map(|local| local.with_timezone(&Utc));
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_title(&self.title)
    }

    pub fn into_task(self, id: String, created_at: Timestamp) -> Task {
        Task {
            id,
            title: self.title,
            description: self.description,
            status: self.status,
            created_at,
            deadline: self.deadline,
            color: self.color,
            user_id: None,
        }
    }
}

/// Field-scoped partial update of a task.
///
/// `id`, `created_at` and `user_id` cannot be expressed here, so they never change
/// through an update. Clearable fields use a nested option: `Some(None)` clears the
/// field (serialized as `null`), `None` leaves it alone (not serialized at all).
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<Option<Timestamp>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<Option<String>>,
}

impl TaskPatch {
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = Some(description);
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Timestamp>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_color(mut self, color: Option<String>) -> Self {
        self.color = Some(color);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.deadline.is_none()
            && self.color.is_none()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match &self.title {
            Some(title) => validate_title(title),
            None => Ok(()),
        }
    }

    pub fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(description) = &self.description {
            task.description = description.clone();
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(deadline) = self.deadline {
            task.deadline = deadline;
        }
        if let Some(color) = &self.color {
            task.color = color.clone();
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
    Blackout,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
            Theme::Blackout => "blackout",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "light" => Some(Theme::Light),
            "dark" => Some(Theme::Dark),
            "blackout" => Some(Theme::Blackout),
            _ => None,
        }
    }

    /// Narrows a stored theme name to a supported theme; unknown names become `Light`.
    pub fn narrow(value: Option<&str>) -> Self {
        match value {
            None => Theme::default(),
            Some(raw) => Theme::parse(raw).unwrap_or_else(|| {
                log::warn!("settings: unknown theme={raw:?}, falling back to light");
                Theme::default()
            }),
        }
    }

    pub fn is_dark(&self) -> bool {
        matches!(self, Theme::Dark | Theme::Blackout)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Privacy {
    #[default]
    Public,
    Private,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct UserSettings {
    #[serde(default)]
    pub theme: Theme,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub notifications: bool,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub privacy: Option<Privacy>,
    #[serde(default)]
    pub backup: bool,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            theme: Theme::Light,
            timezone: default_timezone(),
            name: default_name(),
            avatar: None,
            notifications: false,
            language: None,
            privacy: None,
            backup: false,
        }
    }
}

impl UserSettings {
    /// Configured language, else the system locale's language, else English.
    pub fn language_or_default(&self) -> String {
        self.language
            .clone()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(system_language)
    }

    pub fn privacy_or_default(&self) -> Privacy {
        self.privacy.unwrap_or_default()
    }
}

pub(crate) fn default_timezone() -> String {
    crate::calendar::system_timezone_name()
}

fn default_name() -> String {
    DEFAULT_USER_NAME.to_string()
}

fn system_language() -> String {
    sys_locale::get_locale()
        .and_then(|locale| {
            locale
                .split(['-', '_'])
                .next()
                .map(|lang| lang.to_ascii_lowercase())
        })
        .filter(|lang| !lang.is_empty())
        .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string())
}

/// Field-scoped partial update of the settings row.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct SettingsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme: Option<Theme>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// An empty string clears the avatar.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notifications: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub privacy: Option<Privacy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<bool>,
}

impl SettingsPatch {
    pub fn with_theme(mut self, theme: Theme) -> Self {
        self.theme = Some(theme);
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = Some(avatar.into());
        self
    }

    pub fn with_notifications(mut self, enabled: bool) -> Self {
        self.notifications = Some(enabled);
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_privacy(mut self, privacy: Privacy) -> Self {
        self.privacy = Some(privacy);
        self
    }

    pub fn with_backup(mut self, enabled: bool) -> Self {
        self.backup = Some(enabled);
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &SettingsPatch::default()
    }

    pub fn apply_to(&self, settings: &mut UserSettings) {
        if let Some(theme) = self.theme {
            settings.theme = theme;
        }
        if let Some(timezone) = &self.timezone {
            settings.timezone = timezone.clone();
        }
        if let Some(name) = &self.name {
            settings.name = name.clone();
        }
        if let Some(avatar) = &self.avatar {
            settings.avatar = Some(avatar.clone()).filter(|value| !value.is_empty());
        }
        if let Some(notifications) = self.notifications {
            settings.notifications = notifications;
        }
        if let Some(language) = &self.language {
            settings.language = Some(language.clone());
        }
        if let Some(privacy) = self.privacy {
            settings.privacy = Some(privacy);
        }
        if let Some(backup) = self.backup {
            settings.backup = backup;
        }
    }
}
