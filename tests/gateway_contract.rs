//! HTTP contract tests for `RestGateway` against a mock backend.

use std::sync::Arc;

use serde_json::json;
use taskflow_lib::{
    AppState, Config, Gateway, NewTask, RemoteError, RestGateway, SettingsPatch, TaskCommands,
    TaskPatch, TaskStatus, Theme,
};
use wiremock::matchers::{body_json, body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> Config {
    Config {
        url: server.uri(),
        anon_key: "anon-key".to_string(),
        access_token: Some("user-jwt".to_string()),
        user_id: Some("user-1".to_string()),
        request_timeout_secs: 2,
    }
}

fn gateway_for(server: &MockServer) -> RestGateway {
    RestGateway::new(&config_for(server)).expect("gateway builds")
}

fn task_row(id: &str, title: &str, created_at: &str) -> serde_json::Value {
    json!({
        "id": id,
        "title": title,
        "description": null,
        "status": "todo",
        "created_at": created_at,
        "deadline": null,
        "color": "#6366f1",
        "user_id": "user-1"
    })
}

#[tokio::test]
async fn list_tasks_requests_newest_first_with_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/tasks"))
        .and(query_param("select", "*"))
        .and(query_param("order", "created_at.desc"))
        .and(header("apikey", "anon-key"))
        .and(header("authorization", "Bearer user-jwt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            task_row("b", "Newer", "2024-03-02T09:00:00+00:00"),
            task_row("a", "Older", "2024-03-01T09:00:00+00:00"),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let tasks = gateway_for(&server).list_tasks().await.unwrap();
    let ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["b", "a"]);
    assert_eq!(tasks[0].title, "Newer");
}

#[tokio::test]
async fn create_task_returns_server_assigned_identity() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/tasks"))
        .and(header("prefer", "return=representation"))
        .and(header("accept", "application/vnd.pgrst.object+json"))
        .and(body_partial_json(json!({
            "title": "Write report",
            "status": "todo",
            "user_id": "user-1"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(task_row(
            "5b0e7a52-1d0b-4c53-9f57-8f1f2f6a0c11",
            "Write report",
            "2024-03-01T09:00:00.5+00:00",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let created = gateway_for(&server)
        .create_task(&NewTask::new("Write report").with_status(TaskStatus::Todo))
        .await
        .unwrap();
    assert_eq!(created.id, "5b0e7a52-1d0b-4c53-9f57-8f1f2f6a0c11");
    assert_eq!(created.user_id.as_deref(), Some("user-1"));

    // Storing the returned task makes it retrievable by the server id.
    let state = AppState::default();
    state.insert_task(created.clone());
    assert_eq!(state.task(&created.id), Some(created));
}

#[tokio::test]
async fn create_task_surfaces_backend_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/tasks"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "code": "23514",
            "message": "new row violates check constraint \"tasks_title_check\"",
            "details": null,
            "hint": null
        })))
        .mount(&server)
        .await;

    let err = gateway_for(&server)
        .create_task(&NewTask::new("x"))
        .await
        .unwrap_err();
    match err {
        RemoteError::Api(api) => {
            assert_eq!(api.status, 400);
            assert_eq!(api.code.as_deref(), Some("23514"));
            assert!(api.message.contains("check constraint"));
        }
        other => panic!("expected api error, got {other:?}"),
    }
}

#[tokio::test]
async fn update_task_patches_only_the_given_fields() {
    let server = MockServer::start().await;
    let mut row = task_row("t1", "Write report", "2024-03-01T09:00:00Z");
    row["status"] = json!("done");
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/tasks"))
        .and(query_param("id", "eq.t1"))
        .and(body_json(json!({ "status": "done" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(row))
        .expect(1)
        .mount(&server)
        .await;

    let updated = gateway_for(&server)
        .update_task("t1", &TaskPatch::default().with_status(TaskStatus::Done))
        .await
        .unwrap();
    assert_eq!(updated.status, TaskStatus::Done);
    assert_eq!(updated.title, "Write report");
}

#[tokio::test]
async fn delete_task_filters_by_id() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/tasks"))
        .and(query_param("id", "eq.t1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    gateway_for(&server).delete_task("t1").await.unwrap();
}

#[tokio::test]
async fn missing_settings_row_is_absent_not_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/user_settings"))
        .and(query_param("user_id", "eq.user-1"))
        .respond_with(ResponseTemplate::new(406).set_body_json(json!({
            "code": "PGRST116",
            "details": "The result contains 0 rows",
            "hint": null,
            "message": "JSON object requested, multiple (or no) rows returned"
        })))
        .mount(&server)
        .await;

    let settings = gateway_for(&server).get_settings().await.unwrap();
    assert!(settings.is_none());
}

#[tokio::test]
async fn duplicate_settings_rows_are_an_error_not_absent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/user_settings"))
        .respond_with(ResponseTemplate::new(406).set_body_json(json!({
            "code": "PGRST116",
            "details": "The result contains 2 rows",
            "hint": null,
            "message": "JSON object requested, multiple (or no) rows returned"
        })))
        .mount(&server)
        .await;

    let err = gateway_for(&server).get_settings().await.unwrap_err();
    assert!(!err.is_no_rows());
    match err {
        RemoteError::Api(api) => {
            assert_eq!(api.status, 406);
            assert_eq!(api.reported_rows(), Some(2));
        }
        other => panic!("expected api error, got {other:?}"),
    }

    // The initial load must not replace the user's settings with defaults.
    let state = AppState::default();
    state.update_settings(&SettingsPatch::default().with_name("Alice"));
    let commands = TaskCommands::new(Arc::new(gateway_for(&server)), state);
    assert!(commands.load_state().await.is_err());
    assert_eq!(commands.state().settings().name, "Alice");
}

#[tokio::test]
async fn settings_failure_other_than_no_rows_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/user_settings"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "code": "PGRST301",
            "message": "JWT expired"
        })))
        .mount(&server)
        .await;

    let err = gateway_for(&server).get_settings().await.unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert!(!err.is_no_rows());
}

#[tokio::test]
async fn existing_settings_row_is_normalized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/user_settings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "user_id": "user-1",
            "theme": "blackout",
            "timezone": "Europe/Berlin",
            "name": "Alice",
            "notifications": true
        })))
        .mount(&server)
        .await;

    let settings = gateway_for(&server).get_settings().await.unwrap().unwrap();
    assert_eq!(settings.theme, Theme::Blackout);
    assert_eq!(settings.timezone, "Europe/Berlin");
    assert_eq!(settings.name, "Alice");
    assert!(settings.notifications);
    assert!(!settings.backup);
}

#[tokio::test]
async fn upsert_settings_merges_on_the_owner_row() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/user_settings"))
        .and(query_param("on_conflict", "user_id"))
        .and(header(
            "prefer",
            "resolution=merge-duplicates,return=representation",
        ))
        .and(body_json(json!({ "theme": "dark", "user_id": "user-1" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "user_id": "user-1",
            "theme": "dark",
            "timezone": "UTC",
            "name": "Alice"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let merged = gateway_for(&server)
        .upsert_settings(&SettingsPatch::default().with_theme(Theme::Dark))
        .await
        .unwrap();
    assert_eq!(merged.theme, Theme::Dark);
    assert_eq!(merged.name, "Alice");
}

#[tokio::test]
async fn slow_backend_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/tasks"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(std::time::Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let mut config = config_for(&server);
    config.request_timeout_secs = 1;
    let gateway = RestGateway::new(&config).unwrap();
    let err = gateway.list_tasks().await.unwrap_err();
    assert!(matches!(err, RemoteError::Timeout), "got {err:?}");
}

#[tokio::test]
async fn unreachable_backend_is_a_transport_error() {
    let server = MockServer::start().await;
    let config = config_for(&server);
    drop(server);

    let gateway = RestGateway::new(&config).unwrap();
    let err = gateway.list_tasks().await.unwrap_err();
    assert!(matches!(err, RemoteError::Transport(_)), "got {err:?}");
}

#[tokio::test]
async fn load_state_through_rest_applies_default_settings() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/tasks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([task_row(
            "t1",
            "Write report",
            "2024-03-01T09:00:00Z"
        )])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/user_settings"))
        .respond_with(ResponseTemplate::new(406).set_body_json(json!({
            "code": "PGRST116",
            "details": "The result contains 0 rows",
            "message": "JSON object requested, multiple (or no) rows returned"
        })))
        .mount(&server)
        .await;

    let commands = TaskCommands::new(Arc::new(gateway_for(&server)), AppState::default());
    let payload = commands.load_state().await.unwrap();
    assert_eq!(payload.tasks.len(), 1);
    assert_eq!(payload.settings.theme, Theme::Light);
    assert!(commands.state().task("t1").is_some());
}
