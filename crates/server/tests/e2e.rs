//! End-to-end tests: a real listener, a real SQLite file, real SSE
//! streams, driven over HTTP with the deterministic fake agent and the
//! embedded ACP runtime.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use hub_domain::config::{AgentConfig, AgentKind, Config};
use hub_providers::fake::FakeAgent;
use hub_providers::{AgentStreamer, ProviderError};
use hub_server::runtime::agent_cache::{AgentFactory, ThreadAgentCache};
use hub_server::runtime::controller::TurnController;
use hub_server::runtime::permission::PermissionBridge;
use hub_server::state::AppState;
use hub_server::{api, bootstrap};
use hub_storage::Storage;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct TestHub {
    base: String,
    http: reqwest::Client,
    state: AppState,
    server: tokio::task::JoinHandle<()>,
}

impl TestHub {
    async fn start(config: Config) -> Self {
        let state = bootstrap::build_app_state(Arc::new(config)).expect("boot");
        Self::serve(state).await
    }

    /// Boot with a custom agent factory (e.g. a fake that raises
    /// permission requests).
    async fn start_with_factory(config: Config, factory: AgentFactory) -> Self {
        let config = Arc::new(config);
        let storage =
            Arc::new(Storage::open(&config.storage.resolved_db_path()).expect("open db"));
        let state = AppState {
            controller: Arc::new(TurnController::new()),
            permissions: Arc::new(PermissionBridge::new(Duration::from_millis(
                config.turn.permission_timeout_ms,
            ))),
            agents: Arc::new(ThreadAgentCache::new(
                factory,
                Duration::from_secs(config.cache.idle_ttl_secs),
            )),
            api_token_hash: None,
            storage,
            config,
        };
        Self::serve(state).await
    }

    async fn serve(state: AppState) -> Self {
        let app = api::router(state.clone()).with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            base: format!("http://{addr}"),
            http: reqwest::Client::new(),
            state,
            server,
        }
    }

    fn stop(&self) {
        self.server.abort();
    }

    async fn post(&self, client_id: &str, path: &str, body: Value) -> (u16, Value) {
        let resp = self
            .http
            .post(format!("{}{path}", self.base))
            .header("X-Client-ID", client_id)
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        (status, body)
    }

    async fn get(&self, client_id: &str, path: &str) -> (u16, Value) {
        let resp = self
            .http
            .get(format!("{}{path}", self.base))
            .header("X-Client-ID", client_id)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        (status, body)
    }

    async fn create_thread(&self, client_id: &str, agent: &str) -> String {
        let (status, body) = self
            .post(
                client_id,
                "/v1/threads",
                json!({ "agent": agent, "cwd": "/tmp/proj" }),
            )
            .await;
        assert_eq!(status, 200, "create thread failed: {body}");
        body["threadId"].as_str().unwrap().to_owned()
    }

    /// Run a streaming turn to completion and return the parsed frames.
    async fn run_turn(&self, client_id: &str, thread_id: &str, input: &str) -> Vec<(String, Value)> {
        let resp = self
            .http
            .post(format!("{}/v1/threads/{thread_id}/turns", self.base))
            .header("X-Client-ID", client_id)
            .json(&json!({ "input": input, "stream": true }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        assert!(resp
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));
        let text = resp.text().await.unwrap();
        parse_sse(&text)
    }
}

fn base_config(dir: &tempfile::TempDir) -> Config {
    let mut config = Config::default();
    config.storage.db_path = Some(dir.path().join("hub.db"));
    config.agents.push(agent("codex", AgentKind::Fake));
    config.agents.push(agent("embedded", AgentKind::Embedded));
    config
}

fn agent(id: &str, kind: AgentKind) -> AgentConfig {
    AgentConfig {
        id: id.into(),
        name: None,
        kind,
        command: String::new(),
        args: Vec::new(),
        env: Default::default(),
    }
}

fn parse_sse(text: &str) -> Vec<(String, Value)> {
    let mut frames = Vec::new();
    for block in text.split("\n\n") {
        let mut event = None;
        let mut data = None;
        for line in block.lines() {
            if let Some(rest) = line.strip_prefix("event: ") {
                event = Some(rest.to_owned());
            } else if let Some(rest) = line.strip_prefix("data: ") {
                data = Some(rest.to_owned());
            }
        }
        if let (Some(event), Some(data)) = (event, data) {
            frames.push((event, serde_json::from_str(&data).unwrap_or(Value::Null)));
        }
    }
    frames
}

fn deltas_concat(frames: &[(String, Value)]) -> String {
    frames
        .iter()
        .filter(|(event, _)| event == "message_delta")
        .map(|(_, data)| data["delta"].as_str().unwrap_or("").to_owned())
        .collect()
}

/// Incremental SSE reader over a live response body.
struct SseReader {
    resp: reqwest::Response,
    buf: String,
}

impl SseReader {
    fn new(resp: reqwest::Response) -> Self {
        Self {
            resp,
            buf: String::new(),
        }
    }

    /// Read frames until `event` arrives (or the stream ends).
    async fn read_until(&mut self, event: &str) -> Option<(String, Value)> {
        loop {
            if let Some(pos) = self.buf.find("\n\n") {
                let block: String = self.buf.drain(..pos + 2).collect();
                if let Some(frame) = parse_sse(&block).into_iter().next() {
                    if frame.0 == event {
                        return Some(frame);
                    }
                }
                continue;
            }
            match self.resp.chunk().await {
                Ok(Some(chunk)) => self.buf.push_str(std::str::from_utf8(&chunk).ok()?),
                _ => return None,
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Happy path SSE + event log integrity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn happy_path_streaming_turn() {
    let dir = tempfile::tempdir().unwrap();
    let hub = TestHub::start(base_config(&dir)).await;

    let thread_id = hub.create_thread("c1", "codex").await;
    let frames = hub.run_turn("c1", &thread_id, "hello streaming world").await;

    assert_eq!(frames.first().unwrap().0, "turn_started");
    assert!(frames.first().unwrap().1["turnId"].is_string());
    let delta_count = frames.iter().filter(|(e, _)| e == "message_delta").count();
    assert!(delta_count >= 3, "expected >= 3 deltas, got {delta_count}");
    assert_eq!(deltas_concat(&frames), "hello streaming world");
    let (last_event, last_data) = frames.last().unwrap();
    assert_eq!(last_event, "turn_completed");
    assert_eq!(last_data["stopReason"], "end_turn");

    // History: one turn, delta round-trip, contiguous event seq.
    let (status, body) = hub
        .get("c1", &format!("/v1/threads/{thread_id}/history?includeEvents=true"))
        .await;
    assert_eq!(status, 200);
    let turns = body["turns"].as_array().unwrap();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0]["responseText"], "hello streaming world");
    assert_eq!(turns[0]["status"], "completed");
    let events = turns[0]["events"].as_array().unwrap();
    assert!(events.len() >= 5);
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event["seq"].as_i64().unwrap(), i as i64 + 1);
    }

    hub.stop();
}

#[tokio::test]
async fn embedded_agent_full_acp_turn() {
    let dir = tempfile::tempdir().unwrap();
    let hub = TestHub::start(base_config(&dir)).await;

    let thread_id = hub.create_thread("c1", "embedded").await;
    let frames = hub.run_turn("c1", &thread_id, "over the in-memory bus").await;

    assert_eq!(deltas_concat(&frames), "over the in-memory bus");
    assert_eq!(frames.last().unwrap().1["stopReason"], "end_turn");
    hub.stop();
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conflict + cancel
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn second_turn_conflicts_and_cancel_stops_the_first() {
    let dir = tempfile::tempdir().unwrap();
    let hub = TestHub::start(base_config(&dir)).await;
    let thread_id = hub.create_thread("c1", "codex").await;

    // Long turn: ~200 chunks at 10ms each.
    let long_input = "x".repeat(600);
    let resp = hub
        .http
        .post(format!("{}/v1/threads/{thread_id}/turns", hub.base))
        .header("X-Client-ID", "c1")
        .json(&json!({ "input": long_input, "stream": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let mut reader = SseReader::new(resp);
    let started = reader.read_until("turn_started").await.unwrap();
    let turn_id = started.1["turnId"].as_str().unwrap().to_owned();

    // Concurrent turn on the same thread → 409 CONFLICT.
    let (status, body) = hub
        .post(
            "c1",
            &format!("/v1/threads/{thread_id}/turns"),
            json!({ "input": "me too", "stream": true }),
        )
        .await;
    assert_eq!(status, 409);
    assert_eq!(body["error"]["code"], "CONFLICT");

    // Cancel the running turn.
    let (status, body) = hub
        .post("c1", &format!("/v1/turns/{turn_id}/cancel"), json!({}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "cancelling");

    let completed = reader.read_until("turn_completed").await.unwrap();
    assert_eq!(completed.1["stopReason"], "cancelled");

    // Cancel of a no-longer-active turn → 409.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let (status, body) = hub
        .post("c1", &format!("/v1/turns/{turn_id}/cancel"), json!({}))
        .await;
    assert_eq!(status, 409);
    assert_eq!(body["error"]["code"], "CONFLICT");

    let turn = hub.state.storage.get_turn(&turn_id).unwrap();
    assert_eq!(turn.status, "cancelled");
    assert_eq!(turn.stop_reason, "cancelled");
    hub.stop();
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Permissions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn permission_approved_over_the_acp_bridge() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(&dir);
    config.agents.clear();
    config.agents.push(agent("embedded", AgentKind::Embedded));

    // Embedded runtime that raises session/request_permission mid-prompt.
    let factory: AgentFactory = Arc::new(|thread| {
        Ok(Arc::new(hub_providers::embedded::EmbeddedAcpAgent::new(
            "embedded".into(),
            Arc::new(
                hub_providers::embedded::LocalEchoRuntime::default().with_permission_request(),
            ),
            thread.cwd.clone(),
            hub_providers::AcpTimeouts::from_turn_config(
                &hub_domain::config::TurnConfig::default(),
            ),
        )) as Arc<dyn AgentStreamer>)
    });
    let hub = TestHub::start_with_factory(config, factory).await;
    let thread_id = hub.create_thread("c1", "embedded").await;

    let input = "first half and second half";
    let resp = hub
        .http
        .post(format!("{}/v1/threads/{thread_id}/turns", hub.base))
        .header("X-Client-ID", "c1")
        .json(&json!({ "input": input, "stream": true }))
        .send()
        .await
        .unwrap();
    let mut reader = SseReader::new(resp);

    let required = reader.read_until("permission_required").await.unwrap();
    let permission_id = required.1["permissionId"].as_str().unwrap().to_owned();
    assert!(!permission_id.is_empty());
    assert_eq!(required.1["approval"], "command");
    assert_eq!(required.1["command"], "echo x");

    let (status, body) = hub
        .post(
            "c1",
            &format!("/v1/permissions/{permission_id}"),
            json!({ "outcome": "approved" }),
        )
        .await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["status"], "recorded");

    // A second resolution attempt is a conflict (or, if the turn already
    // drained the pending entry, a 404).
    let (status, _) = hub
        .post(
            "c1",
            &format!("/v1/permissions/{permission_id}"),
            json!({ "outcome": "declined" }),
        )
        .await;
    assert!(status == 409 || status == 404, "got {status}");

    let completed = reader.read_until("turn_completed").await.unwrap();
    assert_eq!(completed.1["stopReason"], "end_turn");

    // The post-permission fragment made it into the durable response.
    let (_, body) = hub
        .get("c1", &format!("/v1/threads/{thread_id}/history"))
        .await;
    let response_text = body["turns"][0]["responseText"].as_str().unwrap();
    assert_eq!(response_text, input);
    hub.stop();
}

fn permission_fake_factory() -> AgentFactory {
    Arc::new(|_thread| {
        Ok(
            Arc::new(FakeAgent::new("fake".into(), 3, 10).with_permission_before_chunk(2))
                as Arc<dyn AgentStreamer>,
        )
    })
}

#[tokio::test]
async fn permission_timeout_fails_closed() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(&dir);
    config.turn.permission_timeout_ms = 250;
    let hub = TestHub::start_with_factory(config, permission_fake_factory()).await;
    let thread_id = hub.create_thread("c1", "codex").await;

    let frames = hub.run_turn("c1", &thread_id, "needs approval to finish").await;
    assert!(frames.iter().any(|(e, _)| e == "permission_required"));
    assert_eq!(frames.last().unwrap().1["stopReason"], "cancelled");

    let (_, body) = hub
        .get("c1", &format!("/v1/threads/{thread_id}/history"))
        .await;
    assert_eq!(body["turns"][0]["status"], "cancelled");
    assert_eq!(body["turns"][0]["stopReason"], "cancelled");
    hub.stop();
}

#[tokio::test]
async fn disconnect_during_pending_permission_converges_to_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let hub = TestHub::start_with_factory(base_config(&dir), permission_fake_factory()).await;
    let thread_id = hub.create_thread("c1", "codex").await;

    let resp = hub
        .http
        .post(format!("{}/v1/threads/{thread_id}/turns", hub.base))
        .header("X-Client-ID", "c1")
        .json(&json!({ "input": "abcdefghij", "stream": true }))
        .send()
        .await
        .unwrap();
    let mut reader = SseReader::new(resp);
    reader.read_until("permission_required").await.unwrap();

    // Hang up while the permission is pending.
    drop(reader);

    // Storage converges to cancelled well within the 4 s bound.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(4);
    loop {
        let (_, body) = hub
            .get("c1", &format!("/v1/threads/{thread_id}/history"))
            .await;
        if body["turns"][0]["status"] == "cancelled" {
            assert_eq!(body["turns"][0]["stopReason"], "cancelled");
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "turn never converged: {body}"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    hub.stop();
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Restart continuity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn restart_injects_prior_turns_into_the_prompt() {
    let dir = tempfile::tempdir().unwrap();

    let hub = TestHub::start(base_config(&dir)).await;
    let thread_id = hub.create_thread("c1", "codex").await;
    hub.run_turn("c1", &thread_id, "pre-restart message").await;
    hub.stop();
    drop(hub);

    // New process, same database.
    let hub = TestHub::start(base_config(&dir)).await;
    hub.run_turn("c1", &thread_id, "post-restart message").await;

    let (_, body) = hub
        .get("c1", &format!("/v1/threads/{thread_id}/history"))
        .await;
    let turns = body["turns"].as_array().unwrap();
    assert_eq!(turns.len(), 2);
    let second_request = turns[1]["requestText"].as_str().unwrap();
    assert!(
        second_request.contains("User: pre-restart message"),
        "injected prompt missing prior turn: {second_request}"
    );
    assert!(second_request.contains("[Current User Input]\npost-restart message"));
    hub.stop();
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compact
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn compact_writes_summary_and_hides_internal_turn() {
    let dir = tempfile::tempdir().unwrap();
    let hub = TestHub::start(base_config(&dir)).await;
    let thread_id = hub.create_thread("c1", "codex").await;
    hub.run_turn("c1", &thread_id, "remember the parser rewrite").await;

    let (status, body) = hub
        .post(
            "c1",
            &format!("/v1/threads/{thread_id}/compact"),
            json!({ "maxSummaryChars": 80 }),
        )
        .await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["status"], "completed");
    assert_eq!(body["stopReason"], "end_turn");
    let summary = body["summary"].as_str().unwrap();
    assert!(!summary.is_empty());
    assert!(body["summaryChars"].as_u64().unwrap() <= 80);

    // The summary is durable on the thread.
    let (_, thread) = hub.get("c1", &format!("/v1/threads/{thread_id}")).await;
    assert_eq!(thread["thread"]["summary"], *summary);

    // Internal turn hidden by default, visible with includeInternal.
    let (_, history) = hub
        .get("c1", &format!("/v1/threads/{thread_id}/history"))
        .await;
    assert_eq!(history["turns"].as_array().unwrap().len(), 1);
    let (_, history) = hub
        .get(
            "c1",
            &format!("/v1/threads/{thread_id}/history?includeInternal=true"),
        )
        .await;
    let turns = history["turns"].as_array().unwrap();
    assert_eq!(turns.len(), 2);
    assert!(turns.iter().any(|t| t["isInternal"] == true));
    hub.stop();
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation, tenancy, auth
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn validation_and_error_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let hub = TestHub::start(base_config(&dir)).await;

    // healthz is public.
    let resp = hub.http.get(format!("{}/healthz", hub.base)).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.json::<Value>().await.unwrap()["ok"], true);

    // Missing X-Client-ID.
    let resp = hub
        .http
        .get(format!("{}/v1/threads", hub.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    assert_eq!(
        resp.json::<Value>().await.unwrap()["error"]["code"],
        "INVALID_ARGUMENT"
    );

    // Non-allowlisted agent.
    let (status, body) = hub
        .post("c1", "/v1/threads", json!({ "agent": "nope", "cwd": "/tmp" }))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "INVALID_ARGUMENT");

    // Relative cwd.
    let (status, _) = hub
        .post("c1", "/v1/threads", json!({ "agent": "codex", "cwd": "./proj" }))
        .await;
    assert_eq!(status, 400);

    // Non-object agentOptions.
    let (status, _) = hub
        .post(
            "c1",
            "/v1/threads",
            json!({ "agent": "codex", "cwd": "/tmp", "agentOptions": [1, 2] }),
        )
        .await;
    assert_eq!(status, 400);

    // stream != true.
    let thread_id = hub.create_thread("c1", "codex").await;
    let (status, body) = hub
        .post(
            "c1",
            &format!("/v1/threads/{thread_id}/turns"),
            json!({ "input": "hi", "stream": false }),
        )
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "INVALID_ARGUMENT");

    // Invalid permission outcome.
    let (status, _) = hub
        .post("c1", "/v1/permissions/perm_x_1", json!({ "outcome": "maybe" }))
        .await;
    assert_eq!(status, 400);

    // Unknown permission id.
    let (status, body) = hub
        .post("c1", "/v1/permissions/perm_x_1", json!({ "outcome": "approved" }))
        .await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    hub.stop();
}

#[tokio::test]
async fn cross_client_reads_are_indistinguishable_from_missing() {
    let dir = tempfile::tempdir().unwrap();
    let hub = TestHub::start(base_config(&dir)).await;
    let thread_id = hub.create_thread("owner", "codex").await;

    let (owner_status, _) = hub.get("owner", &format!("/v1/threads/{thread_id}")).await;
    assert_eq!(owner_status, 200);

    for path in [
        format!("/v1/threads/{thread_id}"),
        format!("/v1/threads/{thread_id}/history"),
        "/v1/threads/th_missing".to_owned(),
    ] {
        let (status, body) = hub.get("intruder", &path).await;
        assert_eq!(status, 404, "{path}");
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    // Intruder's thread list does not include the owner's thread.
    let (_, body) = hub.get("intruder", "/v1/threads").await;
    assert!(body["threads"].as_array().unwrap().is_empty());

    // Turn endpoints are tenancy-checked too.
    let (status, _) = hub
        .post(
            "intruder",
            &format!("/v1/threads/{thread_id}/turns"),
            json!({ "input": "hi", "stream": true }),
        )
        .await;
    assert_eq!(status, 404);
    hub.stop();
}

#[tokio::test]
async fn bearer_token_guards_v1_routes() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(&dir);
    config.server.api_token = Some("sekrit".into());
    let hub = TestHub::start(config).await;

    let resp = hub
        .http
        .get(format!("{}/v1/agents", hub.base))
        .header("X-Client-ID", "c1")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 401);
    assert_eq!(
        resp.json::<Value>().await.unwrap()["error"]["code"],
        "UNAUTHORIZED"
    );

    let resp = hub
        .http
        .get(format!("{}/v1/agents", hub.base))
        .header("X-Client-ID", "c1")
        .header("Authorization", "Bearer sekrit")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let agents = resp.json::<Value>().await.unwrap();
    assert!(agents["agents"]
        .as_array()
        .unwrap()
        .iter()
        .any(|a| a["id"] == "codex" && a["status"] == "available"));

    // healthz stays public even with auth on.
    let resp = hub.http.get(format!("{}/healthz", hub.base)).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    hub.stop();
}

#[tokio::test]
async fn first_turn_input_passes_through_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let hub = TestHub::start(base_config(&dir)).await;
    let thread_id = hub.create_thread("c1", "codex").await;

    hub.run_turn("c1", &thread_id, "/mcp call something --flag").await;

    let (_, body) = hub
        .get("c1", &format!("/v1/threads/{thread_id}/history"))
        .await;
    // The injected prompt IS the raw input on a first turn.
    assert_eq!(body["turns"][0]["requestText"], "/mcp call something --flag");
    hub.stop();
}

#[tokio::test]
async fn upstream_unavailable_when_factory_fails() {
    let dir = tempfile::tempdir().unwrap();
    let factory: AgentFactory =
        Arc::new(|_| Err(ProviderError::Unavailable("agent binary missing".into())));
    let hub = TestHub::start_with_factory(base_config(&dir), factory).await;
    let thread_id = hub.create_thread("c1", "codex").await;

    let (status, body) = hub
        .post(
            "c1",
            &format!("/v1/threads/{thread_id}/turns"),
            json!({ "input": "hi", "stream": true }),
        )
        .await;
    assert_eq!(status, 503);
    assert_eq!(body["error"]["code"], "UPSTREAM_UNAVAILABLE");
    hub.stop();
}
