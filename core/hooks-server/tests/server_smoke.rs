use serde_json::{json, Value};
use std::net::TcpListener;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tempfile::TempDir;

struct ServerGuard {
    child: Child,
}

impl Drop for ServerGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("bind ephemeral port")
        .local_addr()
        .expect("local addr")
        .port()
}

fn spawn_server(home: &Path, port: u16, owner_pid: Option<u32>) -> ServerGuard {
    let mut command = Command::new(env!("CARGO_BIN_EXE_cc-hooks-server"));
    command
        .args(["--session-id", "smoke-session", "--host", "127.0.0.1"])
        .arg("--port")
        .arg(port.to_string())
        .env("CC_HOOKS_HOME", home)
        .env("SILENT_ANNOUNCEMENTS", "true")
        .env("SILENT_EFFECTS", "true")
        .env_remove("DB_PATH")
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    if let Some(pid) = owner_pid {
        command.arg("--owner-pid").arg(pid.to_string());
    }
    ServerGuard {
        child: command.spawn().expect("Failed to spawn cc-hooks-server"),
    }
}

fn base(port: u16) -> String {
    format!("http://127.0.0.1:{}", port)
}

fn wait_for_health(client: &reqwest::blocking::Client, port: u16) -> Value {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if let Ok(response) = client.get(format!("{}/health", base(port))).send() {
            if response.status().is_success() {
                return response.json().expect("health json");
            }
        }
        sleep(Duration::from_millis(50));
    }
    panic!("Timed out waiting for server health on port {}", port);
}

fn wait_for_exit(guard: &mut ServerGuard, timeout: Duration) -> std::process::ExitStatus {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Some(status) = guard.child.try_wait().expect("try_wait") {
            return status;
        }
        sleep(Duration::from_millis(25));
    }
    panic!("Server did not exit within {:?}", timeout);
}

fn client() -> reqwest::blocking::Client {
    reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .expect("client")
}

#[test]
fn server_queues_processes_and_shuts_down() {
    let home = TempDir::new().expect("Failed to create temp home");
    let port = free_port();
    let mut guard = spawn_server(home.path(), port, None);
    let client = client();

    let health = wait_for_health(&client, port);
    assert_eq!(health["status"], "ok");
    assert_eq!(health["port"], port);
    assert_eq!(health["session_id"], "smoke-session");
    let instance_id = health["instance_id"]
        .as_str()
        .expect("instance id")
        .to_string();

    let tracking = home.path().join("run").join("smoke-session.json");
    assert!(tracking.exists(), "tracking file missing");

    let submit = |body: Value| {
        client
            .post(format!("{}/events", base(port)))
            .json(&body)
            .send()
            .expect("submit event")
    };

    let accepted = submit(json!({
        "data": {"session_id": "smoke-session", "hook_event_name": "Stop"},
        "instance_id": instance_id,
    }));
    assert_eq!(accepted.status().as_u16(), 200);
    let accepted: Value = accepted.json().expect("submit json");
    let event_id = accepted["event_id"].as_i64().expect("event id");

    let missing = submit(json!({"data": {"hook_event_name": "Stop"}, "instance_id": instance_id}));
    assert_eq!(missing.status().as_u16(), 400);

    let foreign = submit(json!({
        "data": {"session_id": "smoke-session", "hook_event_name": "Stop"},
        "instance_id": format!("1:{}", port),
    }));
    assert_eq!(foreign.status().as_u16(), 409);

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let status: Value = client
            .get(format!("{}/events/status", base(port)))
            .send()
            .expect("status")
            .json()
            .expect("status json");
        if status["counts"]["completed"] == 1 {
            assert_eq!(status["recent"][0]["id"], event_id);
            break;
        }
        assert!(Instant::now() < deadline, "event never completed: {}", status);
        sleep(Duration::from_millis(50));
    }

    let last: Value = client
        .get(format!("{}/instances/{}/last-event", base(port), instance_id))
        .send()
        .expect("last event")
        .json()
        .expect("last event json");
    assert_eq!(last["last_event_status"], "completed");
    assert_eq!(last["has_pending"], false);

    let migrations: Value = client
        .get(format!("{}/migrations/status", base(port)))
        .send()
        .expect("migrations")
        .json()
        .expect("migrations json");
    assert_eq!(migrations["current_version"], migrations["latest_version"]);

    let ack = client
        .post(format!("{}/shutdown", base(port)))
        .send()
        .expect("shutdown");
    assert!(ack.status().is_success());

    let status = wait_for_exit(&mut guard, Duration::from_secs(10));
    assert!(status.success(), "server exited with {}", status);
    assert!(!tracking.exists(), "tracking file left behind");
}

#[cfg(unix)]
#[test]
fn server_exits_when_owner_dies() {
    let home = TempDir::new().expect("Failed to create temp home");
    std::fs::write(
        home.path().join("config.toml"),
        "[server]\nowner_check_interval_ms = 100\n",
    )
    .expect("write config");

    let mut owner = Command::new("sleep")
        .arg("30")
        .spawn()
        .expect("spawn owner");
    let port = free_port();
    let mut guard = spawn_server(home.path(), port, Some(owner.id()));
    wait_for_health(&client(), port);

    owner.kill().expect("kill owner");
    owner.wait().expect("reap owner");

    let status = wait_for_exit(&mut guard, Duration::from_secs(10));
    assert!(status.success(), "server exited with {}", status);
}

#[test]
fn occupied_port_fails_startup() {
    let home = TempDir::new().expect("Failed to create temp home");
    let occupied = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = occupied.local_addr().expect("addr").port();

    let mut guard = spawn_server(home.path(), port, None);
    let status = wait_for_exit(&mut guard, Duration::from_secs(10));
    assert!(!status.success());
}
