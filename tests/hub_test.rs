//! End-to-end tests for the hub: real Unix sockets, real client
//! connections, fake container runtime.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use swarmhub::runtime::container_name;
use swarmhub::{
    Address, Breadth, ContainerRuntime, Event, HelperConnection, Hub, HubError, HubOptions,
    MessageLog, Request, Status,
};

/// In-memory runtime standing in for podman/docker.
#[derive(Default)]
struct FakeRuntime {
    started: Mutex<Vec<Address>>,
    stopped: Mutex<Vec<String>>,
}

impl ContainerRuntime for FakeRuntime {
    fn start(
        &self,
        helper_num: Address,
        _model: Option<&str>,
        _helpers_dir: Option<&str>,
    ) -> anyhow::Result<String> {
        self.started.lock().unwrap().push(helper_num);
        Ok(container_name("proj", helper_num))
    }

    fn stop(&self, name: &str) -> anyhow::Result<bool> {
        let mut stopped = self.stopped.lock().unwrap();
        let first_time = !stopped.contains(&name.to_string());
        stopped.push(name.to_string());
        Ok(first_time)
    }

    fn is_running(&self, name: &str) -> anyhow::Result<bool> {
        let started = self.started.lock().unwrap();
        let stopped = self.stopped.lock().unwrap();
        Ok(started
            .iter()
            .any(|num| container_name("proj", *num) == name)
            && !stopped.contains(&name.to_string()))
    }
}

struct TestHub {
    hub: Hub,
    runtime: Arc<FakeRuntime>,
    _tmp: TempDir,
}

fn start_hub(breadth: i64, message_log: Option<MessageLog>) -> TestHub {
    let tmp = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::default());
    let hub = Hub::start(HubOptions {
        socket_path: tmp.path().join("hub.sock"),
        breadth: Breadth::from_raw(breadth).unwrap(),
        spawn_depth: -1,
        runtime: Arc::clone(&runtime) as Arc<dyn ContainerRuntime>,
        message_log,
    })
    .unwrap();
    TestHub {
        hub,
        runtime,
        _tmp: tmp,
    }
}

// Scenario: a registered parent may spawn inside its child range and
// nowhere else.
#[tokio::test]
async fn spawn_is_limited_to_the_callers_child_range() {
    let t = start_hub(2, None);

    let conn = HelperConnection::connect(t.hub.socket_path(), Some(1))
        .await
        .unwrap();

    // children_of(1, 2) == (3, 4)
    let ok = conn.spawn(3, Some("sonnet"), None).await.unwrap();
    assert_eq!(ok.status, Status::Ok);
    assert_eq!(ok.container_name.as_deref(), Some("proj-helper-3"));

    let rejected = conn.spawn(7, None, None).await.unwrap();
    assert_eq!(rejected.status, Status::Error);
    assert!(rejected.message.unwrap().contains("outside child range"));

    assert_eq!(t.runtime.started.lock().unwrap().as_slice(), &[3]);
    t.hub.shutdown().await;
}

// Scenario: payloads route between two registered agents; recv before any
// send times out rather than erroring.
#[tokio::test]
async fn send_reaches_target_and_recv_timeout_is_clean() {
    let t = start_hub(-1, None);

    let one = HelperConnection::connect(t.hub.socket_path(), Some(1))
        .await
        .unwrap();
    let two = HelperConnection::connect(t.hub.socket_path(), Some(2))
        .await
        .unwrap();

    // Nothing sent yet: a short recv returns empty-handed.
    let nothing = two.recv(Some(Duration::from_millis(100))).await.unwrap();
    assert!(nothing.is_none());

    let resp = one.send(2, json!({"text": "hi"})).await.unwrap();
    assert!(resp.is_ok());

    match two.recv(Some(Duration::from_secs(2))).await.unwrap() {
        Some(Event::Message { from, payload }) => {
            assert_eq!(from, 1);
            assert_eq!(payload, json!({"text": "hi"}));
        }
        other => panic!("Expected the routed payload, got: {other:?}"),
    }

    t.hub.shutdown().await;
}

// Scenario: once an agent disconnects, routing to it fails with the
// documented message.
#[tokio::test]
async fn send_to_disconnected_agent_is_a_routing_error() {
    let t = start_hub(-1, None);

    let one = HelperConnection::connect(t.hub.socket_path(), Some(1))
        .await
        .unwrap();
    let two = HelperConnection::connect(t.hub.socket_path(), Some(2))
        .await
        .unwrap();

    one.close();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let resp = two.send(1, json!({"text": "ping"})).await.unwrap();
        if resp.status == Status::Error {
            assert_eq!(
                resp.message.as_deref(),
                Some("unknown or disconnected target")
            );
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "hub kept routing to a closed session"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    t.hub.shutdown().await;
}

// Scenario: a one-shot request against a socket path nobody listens on
// fails fast with a connection error.
#[tokio::test]
async fn one_shot_against_missing_socket_fails_within_bound() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("absent.sock");

    let started = std::time::Instant::now();
    let result = swarmhub::send_request(&missing, &Request::Stop {
        container_name: "proj-helper-1".to_string(),
    })
    .await;

    assert!(matches!(result, Err(HubError::Connection(_))));
    assert!(started.elapsed() < Duration::from_secs(5));
}

// Idempotence: stopping an already-stopped container reports an error
// response the second time instead of blowing up.
#[tokio::test]
async fn double_stop_reports_not_running() {
    let t = start_hub(4, None);

    let director = HelperConnection::connect(t.hub.socket_path(), Some(0))
        .await
        .unwrap();
    let spawned = director.spawn(1, None, None).await.unwrap();
    let name = spawned.container_name.unwrap();

    assert!(director.stop(&name).await.unwrap().is_ok());

    let again = director.stop(&name).await.unwrap();
    assert_eq!(again.status, Status::Error);
    assert!(again.message.unwrap().contains("was not running"));

    t.hub.shutdown().await;
}

// The one-shot path is anonymous and acts as the director: it may spawn
// the director's children without registering first.
#[tokio::test]
async fn anonymous_one_shot_spawn_acts_as_director() {
    let t = start_hub(2, None);

    let resp = swarmhub::send_request(
        t.hub.socket_path(),
        &Request::Spawn {
            helper_num: 2,
            model: None,
            helpers_dir: None,
        },
    )
    .await
    .unwrap();
    assert!(resp.is_ok());

    // Address 3 belongs to agent 1, not the director.
    let outside = swarmhub::send_request(
        t.hub.socket_path(),
        &Request::Spawn {
            helper_num: 3,
            model: None,
            helpers_dir: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(outside.status, Status::Error);

    t.hub.shutdown().await;
}

// Full tree flow: director spawns a child slot, the "container" comes up
// and registers under that address, then parent and child exchange
// messages both ways.
#[tokio::test]
async fn spawned_helper_registers_and_talks_to_its_parent() {
    let t = start_hub(4, None);

    let director = HelperConnection::connect(t.hub.socket_path(), Some(0))
        .await
        .unwrap();
    let spawned = director.spawn(1, None, None).await.unwrap();
    assert!(spawned.is_ok());

    // The spawned process connects and registers as its assigned address.
    let helper = HelperConnection::connect(t.hub.socket_path(), Some(1))
        .await
        .unwrap();

    assert!(director
        .send(1, json!({"text": "work on the parser"}))
        .await
        .unwrap()
        .is_ok());
    match helper.recv(Some(Duration::from_secs(2))).await.unwrap() {
        Some(Event::Message { from: 0, payload }) => {
            assert_eq!(payload["text"], "work on the parser");
        }
        other => panic!("Expected the task message, got: {other:?}"),
    }

    assert!(helper
        .send(0, json!({"text": "done"}))
        .await
        .unwrap()
        .is_ok());
    match director.recv(Some(Duration::from_secs(2))).await.unwrap() {
        Some(Event::Message { from: 1, payload }) => {
            assert_eq!(payload["text"], "done");
        }
        other => panic!("Expected the reply, got: {other:?}"),
    }

    t.hub.shutdown().await;
}

// A released address may be taken again by a new connection after the
// previous holder disconnects.
#[tokio::test]
async fn address_is_reusable_after_disconnect() {
    let t = start_hub(-1, None);

    let first = HelperConnection::connect(t.hub.socket_path(), Some(5))
        .await
        .unwrap();
    first.close();

    // Retry until the hub has processed the disconnect.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        match HelperConnection::connect(t.hub.socket_path(), Some(5)).await {
            Ok(_conn) => break,
            Err(HubError::Registration(_)) => {
                assert!(
                    tokio::time::Instant::now() < deadline,
                    "address 5 never became reusable"
                );
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Err(other) => panic!("Unexpected error: {other}"),
        }
    }

    t.hub.shutdown().await;
}

// The message log records traffic and control events as JSONL.
#[tokio::test]
async fn message_log_records_traffic() {
    let tmp = TempDir::new().unwrap();
    let log_path = tmp.path().join("messages.jsonl");
    let t = start_hub(-1, Some(MessageLog::open(&log_path).unwrap()));

    let one = HelperConnection::connect(t.hub.socket_path(), Some(1))
        .await
        .unwrap();
    let _two = HelperConnection::connect(t.hub.socket_path(), Some(2))
        .await
        .unwrap();
    one.send(2, json!({"text": "logged"})).await.unwrap();
    one.broadcast(json!({"text": "to all"})).await.unwrap();

    t.hub.shutdown().await;

    let content = std::fs::read_to_string(&log_path).unwrap();
    let entries: Vec<serde_json::Value> = content
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    assert!(entries
        .iter()
        .any(|e| e["type"] == "control" && e["event"] == "register" && e["helper"] == 1));
    assert!(entries
        .iter()
        .any(|e| e["type"] == "message" && e["to"] == 2 && e["payload"]["text"] == "logged"));
    assert!(entries
        .iter()
        .any(|e| e["type"] == "message" && e["to"] == "all"));
}
