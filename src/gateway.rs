//! Persistence gateway: one remote call per domain operation.
//!
//! `RestGateway` speaks the PostgREST dialect of the hosted backend (`/rest/v1/<table>`)
//! and normalizes its rows into `Task` / `UserSettings`. It keeps no state between calls,
//! never retries, never caches.

use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::config::Config;
use crate::models::{
    NewTask, Privacy, SettingsPatch, Task, TaskPatch, TaskStatus, Theme, Timestamp, UserSettings,
};

const TASKS_TABLE: &str = "tasks";
const SETTINGS_TABLE: &str = "user_settings";
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";
const PREFER: &str = "Prefer";
const PREFER_RETURN: &str = "return=representation";
const PREFER_UPSERT: &str = "resolution=merge-duplicates,return=representation";

/// Error code the backend uses for "single row requested, zero rows found".
pub const NO_ROWS_CODE: &str = "PGRST116";

/// Error body reported by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    pub status: u16,
    pub code: Option<String>,
    pub message: String,
    pub details: Option<String>,
    pub hint: Option<String>,
}

impl ApiError {
    /// Row count from a cardinality error's details, e.g. "The result contains 2 rows".
    pub fn reported_rows(&self) -> Option<u64> {
        self.details
            .as_deref()?
            .split(|c: char| !c.is_ascii_digit())
            .find(|token| !token.is_empty())?
            .parse()
            .ok()
    }

    fn from_response(status: StatusCode, body: &str) -> Self {
        #[derive(Deserialize)]
        struct Body {
            code: Option<String>,
            message: Option<String>,
            details: Option<String>,
            hint: Option<String>,
        }

        match serde_json::from_str::<Body>(body) {
            Ok(parsed) => ApiError {
                status: status.as_u16(),
                code: parsed.code,
                message: parsed
                    .message
                    .unwrap_or_else(|| status.canonical_reason().unwrap_or("").to_string()),
                details: parsed.details,
                hint: parsed.hint,
            },
            Err(_) => ApiError {
                status: status.as_u16(),
                code: None,
                message: if body.trim().is_empty() {
                    status.canonical_reason().unwrap_or("").to_string()
                } else {
                    body.trim().to_string()
                },
                details: None,
                hint: None,
            },
        }
    }
}

#[derive(Debug)]
pub enum RemoteError {
    /// The request never produced a response (DNS, TLS, connection reset...).
    Transport(reqwest::Error),
    Timeout,
    /// The backend answered with a non-success status.
    Api(ApiError),
    /// The response body is malformed or a row violates the domain model.
    Decode(String),
    /// The gateway could not be built from the given configuration.
    Config(String),
}

impl RemoteError {
    /// True when the backend reported that a single-row request matched nothing.
    ///
    /// The same code is used when the request matched several rows; only a
    /// reported count of zero counts as "no rows".
    pub fn is_no_rows(&self) -> bool {
        matches!(
            self,
            RemoteError::Api(api)
                if api.code.as_deref() == Some(NO_ROWS_CODE) && api.reported_rows() == Some(0)
        )
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Api(api) => Some(api.status),
            RemoteError::Transport(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteError::Transport(err) => write!(f, "request failed: {err}"),
            RemoteError::Timeout => write!(f, "request timed out"),
            RemoteError::Api(api) => {
                write!(f, "backend http {}", api.status)?;
                if let Some(code) = &api.code {
                    write!(f, " [{code}]")?;
                }
                write!(f, ": {}", api.message)
            }
            RemoteError::Decode(message) => write!(f, "invalid backend response: {message}"),
            RemoteError::Config(message) => write!(f, "gateway config error: {message}"),
        }
    }
}

impl std::error::Error for RemoteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RemoteError::Transport(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            RemoteError::Timeout
        } else {
            RemoteError::Transport(value)
        }
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(value: serde_json::Error) -> Self {
        RemoteError::Decode(value.to_string())
    }
}

/// Remote CRUD surface for tasks and the per-user settings row.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// All tasks, newest-created first.
    async fn list_tasks(&self) -> Result<Vec<Task>, RemoteError>;

    /// Persists a new task; the result carries the server-issued `id` and `created_at`.
    async fn create_task(&self, task: &NewTask) -> Result<Task, RemoteError>;

    async fn update_task(&self, task_id: &str, patch: &TaskPatch) -> Result<Task, RemoteError>;

    async fn delete_task(&self, task_id: &str) -> Result<(), RemoteError>;

    /// The user's settings row, or `None` when the user has none yet.
    async fn get_settings(&self) -> Result<Option<UserSettings>, RemoteError>;

    /// Merges `patch` into the settings row (creating it if needed).
    async fn upsert_settings(&self, patch: &SettingsPatch) -> Result<UserSettings, RemoteError>;
}

pub struct RestGateway {
    client: Client,
    rest_url: String,
    user_id: Option<String>,
}

impl RestGateway {
    pub fn new(config: &Config) -> Result<Self, RemoteError> {
        let rest_url = config.rest_url();
        Url::parse(&rest_url)
            .map_err(|err| RemoteError::Config(format!("invalid url {rest_url:?}: {err}")))?;

        let mut headers = HeaderMap::new();
        let mut api_key = HeaderValue::from_str(&config.anon_key)
            .map_err(|err| RemoteError::Config(format!("invalid api key: {err}")))?;
        api_key.set_sensitive(true);
        headers.insert("apikey", api_key);
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", config.bearer_token()))
            .map_err(|err| RemoteError::Config(format!("invalid access token: {err}")))?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);

        let client = Client::builder()
            .timeout(config.request_timeout())
            .default_headers(headers)
            .build()
            .map_err(|err| RemoteError::Config(format!("failed to build http client: {err}")))?;

        Ok(Self {
            client,
            rest_url,
            user_id: config.user_id.clone(),
        })
    }

    fn table(&self, name: &str) -> String {
        format!("{}/{name}", self.rest_url)
    }

    /// Sends the request and returns the body of a successful response.
    async fn send(&self, op: &'static str, request: RequestBuilder) -> Result<String, RemoteError> {
        let started = Instant::now();
        let response = request.send().await.map_err(|err| {
            let err = RemoteError::from(err);
            log::warn!("gateway: op={op} status=failed error={err}");
            err
        })?;
        let status = response.status();
        let body = response.text().await.map_err(RemoteError::from)?;
        let elapsed_ms = started.elapsed().as_millis();

        if !status.is_success() {
            let err = RemoteError::Api(ApiError::from_response(status, &body));
            if err.is_no_rows() {
                log::debug!("gateway: op={op} status={status} no_rows elapsed_ms={elapsed_ms}");
            } else {
                log::warn!("gateway: op={op} status={status} elapsed_ms={elapsed_ms} error={err}");
            }
            return Err(err);
        }
        log::debug!("gateway: op={op} status={status} elapsed_ms={elapsed_ms}");
        Ok(body)
    }

    fn owner(&self) -> Option<&str> {
        self.user_id.as_deref().filter(|id| !id.is_empty())
    }
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, RemoteError> {
    Ok(serde_json::from_str(body)?)
}

#[async_trait]
impl Gateway for RestGateway {
    async fn list_tasks(&self) -> Result<Vec<Task>, RemoteError> {
        let request = self
            .client
            .get(self.table(TASKS_TABLE))
            .query(&[("select", "*"), ("order", "created_at.desc")]);
        let body = self.send("list_tasks", request).await?;
        let rows: Vec<TaskRow> = decode(&body)?;
        rows.into_iter().map(Task::try_from).collect()
    }

    async fn create_task(&self, task: &NewTask) -> Result<Task, RemoteError> {
        let payload = TaskInsert {
            task,
            user_id: self.owner(),
        };
        let request = self
            .client
            .post(self.table(TASKS_TABLE))
            .query(&[("select", "*")])
            .header(PREFER, PREFER_RETURN)
            .header(ACCEPT, SINGLE_OBJECT)
            .json(&payload);
        let body = self.send("create_task", request).await?;
        let created = Task::try_from(decode::<TaskRow>(&body)?)?;
        log::info!("gateway: created task id={}", created.id);
        Ok(created)
    }

    async fn update_task(&self, task_id: &str, patch: &TaskPatch) -> Result<Task, RemoteError> {
        let filter = format!("eq.{task_id}");
        let request = self
            .client
            .patch(self.table(TASKS_TABLE))
            .query(&[("id", filter.as_str()), ("select", "*")])
            .header(PREFER, PREFER_RETURN)
            .header(ACCEPT, SINGLE_OBJECT)
            .json(patch);
        let body = self.send("update_task", request).await?;
        Task::try_from(decode::<TaskRow>(&body)?)
    }

    async fn delete_task(&self, task_id: &str) -> Result<(), RemoteError> {
        let filter = format!("eq.{task_id}");
        let request = self
            .client
            .delete(self.table(TASKS_TABLE))
            .query(&[("id", filter.as_str())]);
        self.send("delete_task", request).await?;
        log::info!("gateway: deleted task id={task_id}");
        Ok(())
    }

    async fn get_settings(&self) -> Result<Option<UserSettings>, RemoteError> {
        let mut query = vec![("select".to_string(), "*".to_string())];
        if let Some(owner) = self.owner() {
            query.push(("user_id".to_string(), format!("eq.{owner}")));
        }
        let request = self
            .client
            .get(self.table(SETTINGS_TABLE))
            .query(&query)
            .header(ACCEPT, SINGLE_OBJECT);
        match self.send("get_settings", request).await {
            Ok(body) => Ok(Some(decode::<SettingsRow>(&body)?.into_settings())),
            Err(err) if err.is_no_rows() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn upsert_settings(&self, patch: &SettingsPatch) -> Result<UserSettings, RemoteError> {
        let owner = self.owner();
        let mut query = vec![("select", "*")];
        if owner.is_some() {
            query.push(("on_conflict", "user_id"));
        }
        let payload = SettingsUpsert {
            patch,
            user_id: owner,
        };
        let request = self
            .client
            .post(self.table(SETTINGS_TABLE))
            .query(&query)
            .header(PREFER, PREFER_UPSERT)
            .header(ACCEPT, SINGLE_OBJECT)
            .json(&payload);
        let body = self.send("upsert_settings", request).await?;
        Ok(decode::<SettingsRow>(&body)?.into_settings())
    }
}

#[derive(Serialize)]
struct TaskInsert<'a> {
    #[serde(flatten)]
    task: &'a NewTask,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<&'a str>,
}

#[derive(Serialize)]
struct SettingsUpsert<'a> {
    #[serde(flatten)]
    patch: &'a SettingsPatch,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<&'a str>,
}

/// Row shape of the `tasks` table.
#[derive(Debug, Deserialize)]
struct TaskRow {
    #[serde(deserialize_with = "deserialize_id")]
    id: String,
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    status: TaskStatus,
    #[serde(deserialize_with = "deserialize_timestamp")]
    created_at: Timestamp,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    deadline: Option<Timestamp>,
    #[serde(default)]
    color: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    user_id: Option<String>,
}

impl TryFrom<TaskRow> for Task {
    type Error = RemoteError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        if row.id.trim().is_empty() {
            return Err(RemoteError::Decode("task row without id".to_string()));
        }
        let title = row
            .title
            .filter(|title| !title.trim().is_empty())
            .ok_or_else(|| RemoteError::Decode(format!("task {} has an empty title", row.id)))?;
        Ok(Task {
            id: row.id,
            title,
            description: row.description,
            status: row.status,
            created_at: row.created_at,
            deadline: row.deadline,
            color: row.color,
            user_id: row.user_id,
        })
    }
}

/// Row shape of the `user_settings` table. Every column may be null.
#[derive(Debug, Default, Deserialize)]
struct SettingsRow {
    theme: Option<String>,
    timezone: Option<String>,
    name: Option<String>,
    avatar: Option<String>,
    notifications: Option<bool>,
    language: Option<String>,
    privacy: Option<Privacy>,
    backup: Option<bool>,
}

impl SettingsRow {
    fn into_settings(self) -> UserSettings {
        let defaults = UserSettings::default();
        UserSettings {
            theme: Theme::narrow(self.theme.as_deref()),
            timezone: self
                .timezone
                .filter(|tz| !tz.trim().is_empty())
                .unwrap_or(defaults.timezone),
            name: self
                .name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or(defaults.name),
            avatar: self.avatar.filter(|avatar| !avatar.is_empty()),
            notifications: self.notifications.unwrap_or(defaults.notifications),
            language: self.language.filter(|lang| !lang.trim().is_empty()),
            privacy: self.privacy,
            backup: self.backup.unwrap_or(defaults.backup),
        }
    }
}

fn id_from_value(value: serde_json::Value) -> Result<Option<String>, String> {
    use serde_json::Value;

    match value {
        Value::Null => Ok(None),
        Value::String(id) => Ok(Some(id)),
        Value::Number(id) => Ok(Some(id.to_string())),
        other => Err(format!("unsupported id value: {other}")),
    }
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    id_from_value(value)
        .map_err(serde::de::Error::custom)?
        .ok_or_else(|| serde::de::Error::custom("id is null"))
}

fn deserialize_optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    id_from_value(value).map_err(serde::de::Error::custom)
}

/// Accepts RFC 3339 (`timestamptz`) and zone-less (`timestamp`) columns; the latter are UTC.
fn parse_timestamp(raw: &str) -> Option<Timestamp> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Timestamp, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp {raw:?}")))
}

fn deserialize_optional_timestamp<'de, D>(deserializer: D) -> Result<Option<Timestamp>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp {raw:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_row_normalizes_remote_shape() {
        let row: TaskRow = serde_json::from_value(serde_json::json!({
            "id": 42,
            "title": "Write report",
            "description": null,
            "status": "in-progress",
            "created_at": "2024-03-01T09:00:00.123456+00:00",
            "deadline": "2024-03-15T10:00:00",
            "color": "#6366f1",
            "user_id": "8f14e45f-ceea-467f-a8f5-0b8f2a0f7d3e"
        }))
        .unwrap();
        let task = Task::try_from(row).unwrap();
        assert_eq!(task.id, "42");
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(
            task.deadline,
            Some(Utc.with_ymd_and_hms(2024, 3, 15, 10, 0, 0).unwrap())
        );
        assert_eq!(
            task.user_id.as_deref(),
            Some("8f14e45f-ceea-467f-a8f5-0b8f2a0f7d3e")
        );
    }

    #[test]
    fn task_row_with_blank_title_is_rejected() {
        let row: TaskRow = serde_json::from_value(serde_json::json!({
            "id": "t1",
            "title": " ",
            "status": "todo",
            "created_at": "2024-03-01T09:00:00Z"
        }))
        .unwrap();
        assert!(matches!(Task::try_from(row), Err(RemoteError::Decode(_))));
    }

    #[test]
    fn task_row_with_unknown_status_fails_to_decode() {
        let result: Result<TaskRow, _> = serde_json::from_value(serde_json::json!({
            "id": "t1",
            "title": "x",
            "status": "blocked",
            "created_at": "2024-03-01T09:00:00Z"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn settings_row_fills_defaults_and_narrows_theme() {
        let row: SettingsRow = serde_json::from_value(serde_json::json!({
            "user_id": "u1",
            "theme": "solarized",
            "timezone": null,
            "name": "Alice",
            "avatar": "",
            "notifications": true,
            "privacy": "private"
        }))
        .unwrap();
        let settings = row.into_settings();
        assert_eq!(settings.theme, Theme::Light);
        assert_eq!(settings.name, "Alice");
        assert!(!settings.timezone.is_empty());
        assert!(settings.avatar.is_none());
        assert!(settings.notifications);
        assert!(!settings.backup);
        assert_eq!(settings.privacy, Some(Privacy::Private));
    }

    #[test]
    fn api_error_parses_backend_body_or_falls_back_to_text() {
        let err = ApiError::from_response(
            StatusCode::NOT_ACCEPTABLE,
            r#"{"code":"PGRST116","details":"The result contains 0 rows","hint":null,"message":"JSON object requested, multiple (or no) rows returned"}"#,
        );
        assert_eq!(err.status, 406);
        assert_eq!(err.code.as_deref(), Some(NO_ROWS_CODE));
        assert!(RemoteError::Api(err).is_no_rows());

        let err = ApiError::from_response(
            StatusCode::NOT_ACCEPTABLE,
            r#"{"code":"PGRST116","details":"The result contains 2 rows","message":"JSON object requested, multiple (or no) rows returned"}"#,
        );
        assert_eq!(err.reported_rows(), Some(2));
        assert!(!RemoteError::Api(err).is_no_rows());

        let err = ApiError::from_response(StatusCode::BAD_GATEWAY, "upstream down");
        assert_eq!(err.message, "upstream down");
        assert!(err.code.is_none());
        let remote = RemoteError::Api(err);
        assert!(!remote.is_no_rows());
        assert_eq!(remote.status(), Some(502));
        assert_eq!(remote.to_string(), "backend http 502: upstream down");
    }

    #[test]
    fn insert_payload_flattens_task_and_owner() {
        let task = NewTask::new("Write report");
        let value = serde_json::to_value(TaskInsert {
            task: &task,
            user_id: Some("u1"),
        })
        .unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "title": "Write report",
                "status": "todo",
                "color": "#6366f1",
                "user_id": "u1"
            })
        );
    }

    #[test]
    fn new_rejects_unusable_configuration() {
        let config = Config {
            url: "https://x.example.co".to_string(),
            anon_key: "bad\nkey".to_string(),
            ..Config::default()
        };
        assert!(matches!(
            RestGateway::new(&config),
            Err(RemoteError::Config(_))
        ));
    }
}
