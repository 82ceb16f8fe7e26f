use std::io::Write;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{json, Value};

use labtrace_api::app::{build_app, build_services, Backend};
use labtrace_jobs::{JobQueueService, RetryPolicy, WorkerConfig};

struct TestServer {
    base_url: String,
    server: tokio::task::JoinHandle<()>,
    // Owns the worker pool; dropping it stops the workers.
    _service: JobQueueService,
}

impl TestServer {
    async fn spawn() -> Self {
        let worker = WorkerConfig {
            concurrency: 2,
            poll_interval: Duration::from_millis(10),
            retry: RetryPolicy::fixed(3, Duration::from_millis(0)),
        };
        let (services, mut service) = build_services(Backend::InMemory, worker)
            .await
            .expect("in-memory wiring cannot fail");
        service.start().await.expect("failed to start workers");

        // Same router as prod, bound to an ephemeral port.
        let app = build_app(services);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            server,
            _service: service,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.abort();
    }
}

fn staged_file() -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        f,
        r#"{{"Solution Label": "STD 1", "Type": "Std", "Act Wgt": 1.0, "Act Vol": 1.0, "DF": 1.0, "Cu": 50.0}}"#
    )
    .unwrap();
    writeln!(
        f,
        r#"{{"Solution Label": "S-001", "Type": "Samp", "Act Wgt": 2.0, "Act Vol": 1.0, "DF": 1.0, "Cu": 12.5}}"#
    )
    .unwrap();
    writeln!(
        f,
        r#"{{"Solution Label": "STD 2", "Type": "Std", "Act Wgt": 1.0, "Act Vol": 1.0, "DF": 1.0, "Cu": 55.0}}"#
    )
    .unwrap();
    f
}

async fn wait_for_terminal(client: &reqwest::Client, base_url: &str, job_id: &str) -> Value {
    // Jobs run on background workers; poll until the record goes terminal.
    for _ in 0..200 {
        let res = client
            .get(format!("{}/jobs/{}", base_url, job_id))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let body: Value = res.json().await.unwrap();
        let state = body["state"].as_str().unwrap();
        if state == "completed" || state == "failed" || state == "cancelled" {
            return body;
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    panic!("job {job_id} did not reach a terminal state within timeout");
}

async fn submit_import(
    client: &reqwest::Client,
    base_url: &str,
    path: &str,
    body_extra: Option<&str>,
) -> Value {
    let mut body = json!({
        "project_name": "Run 7",
        "temp_input_path": path,
    });
    if let Some(op) = body_extra {
        body["operation_id"] = json!(op);
    }

    let res = client
        .post(format!("{}/jobs/imports", base_url))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert!(res.status() == StatusCode::ACCEPTED || res.status() == StatusCode::OK);
    res.json().await.unwrap()
}

/// Import a staged file and wait for the project it creates.
async fn import_project(client: &reqwest::Client, base_url: &str, path: &str) -> String {
    let submitted = submit_import(client, base_url, path, None).await;
    let job_id = submitted["job"]["job_id"].as_str().unwrap().to_string();
    let done = wait_for_terminal(client, base_url, &job_id).await;
    assert_eq!(done["state"], "completed", "import failed: {done}");
    done["result_project_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_returns_ok() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/health", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn import_round_trip_creates_a_project() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let file = staged_file();

    let project_id =
        import_project(&client, &server.base_url, &file.path().display().to_string()).await;

    let res = client
        .get(format!("{}/projects/{}/active", server.base_url, project_id))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let active: Value = res.json().await.unwrap();
    assert_eq!(active["processing_type"], "import");
    assert_eq!(active["version_number"], 1);
    assert_eq!(active["is_active"], true);
    assert_eq!(active["data"]["rows"].as_array().unwrap().len(), 3);

    let history: Value = client
        .get(format!("{}/projects/{}/history", server.base_url, project_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn duplicate_operation_id_returns_the_same_job() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let file = staged_file();
    let path = file.path().display().to_string();
    let op = uuid_string();

    let first = submit_import(&client, &server.base_url, &path, Some(&op)).await;
    let second = submit_import(&client, &server.base_url, &path, Some(&op)).await;

    assert_eq!(first["created"], true);
    assert_eq!(second["created"], false);
    assert_eq!(first["job"]["job_id"], second["job"]["job_id"]);
}

#[tokio::test]
async fn correction_appends_a_snapshot_with_corrected_values() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let file = staged_file();

    let project_id =
        import_project(&client, &server.base_url, &file.path().display().to_string()).await;

    let res = client
        .post(format!(
            "{}/projects/{}/corrections",
            server.base_url, project_id
        ))
        .json(&json!({
            "project_name": "Run 7",
            "processing_type": "weight_correction",
            "params": { "solution_label": "S-001", "new_weight": 4.0 },
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    let submitted: Value = res.json().await.unwrap();
    let job_id = submitted["job"]["job_id"].as_str().unwrap();
    let done = wait_for_terminal(&client, &server.base_url, job_id).await;
    assert_eq!(done["state"], "completed", "correction failed: {done}");

    let active: Value = client
        .get(format!("{}/projects/{}/active", server.base_url, project_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(active["processing_type"], "weight_correction");
    assert_eq!(active["version_number"], 2);
    // Old weight 2.0 rescaled to 4.0 halves the sample concentration.
    assert_eq!(active["data"]["rows"][1]["Cu"], json!(6.25));

    let history: Value = client
        .get(format!("{}/projects/{}/history", server.base_url, project_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn unknown_processing_type_is_rejected() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let file = staged_file();

    let project_id =
        import_project(&client, &server.base_url, &file.path().display().to_string()).await;

    let res = client
        .post(format!(
            "{}/projects/{}/corrections",
            server.base_url, project_id
        ))
        .json(&json!({
            "project_name": "Run 7",
            "processing_type": "bogus",
            "params": {},
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_processing_type");
}

#[tokio::test]
async fn missing_staged_file_is_rejected() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/jobs/imports", server.base_url))
        .json(&json!({
            "project_name": "Run 7",
            "temp_input_path": "/nonexistent/run7.jsonl",
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn unknown_job_is_a_404() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/jobs/{}", server.base_url, uuid_string()))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .get(format!("{}/jobs/not-a-uuid", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cancelling_a_finished_job_conflicts() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let file = staged_file();

    let submitted = submit_import(
        &client,
        &server.base_url,
        &file.path().display().to_string(),
        None,
    )
    .await;
    let job_id = submitted["job"]["job_id"].as_str().unwrap().to_string();
    wait_for_terminal(&client, &server.base_url, &job_id).await;

    let res = client
        .post(format!("{}/jobs/{}/cancel", server.base_url, job_id))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "already_terminal");
}

#[tokio::test]
async fn checkout_moves_the_active_pointer() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let file = staged_file();

    let project_id =
        import_project(&client, &server.base_url, &file.path().display().to_string()).await;

    let active: Value = client
        .get(format!("{}/projects/{}/active", server.base_url, project_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let root_state_id = active["state_id"].as_i64().unwrap();

    // Unknown state id misses.
    let res = client
        .post(format!("{}/projects/{}/checkout", server.base_url, project_id))
        .json(&json!({ "state_id": root_state_id + 999 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    // Checking out the root again is a no-op but succeeds.
    let res = client
        .post(format!("{}/projects/{}/checkout", server.base_url, project_id))
        .json(&json!({ "state_id": root_state_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["state_id"].as_i64().unwrap(), root_state_id);
    assert_eq!(body["is_active"], true);
}

fn uuid_string() -> String {
    labtrace_core::OperationId::new().to_string()
}
