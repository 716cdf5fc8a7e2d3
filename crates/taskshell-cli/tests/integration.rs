use anyhow::{Context, Result};
use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use futures_util::{SinkExt, StreamExt};
use predicates::prelude::*;
use serde_json::{Value, json};
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener};
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

/// Canned HTTP reply of the mock queue.
enum Reply {
    Json(Value),
    Redirect(String),
    NotFound,
}

/// Serve every request with `route` and record the requested paths.
fn spawn_mock_queue<F>(route: F) -> Result<(String, Arc<Mutex<Vec<String>>>)>
where
    F: Fn(&str) -> Reply + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").context("failed to bind mock queue")?;
    let addr = listener.local_addr()?;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else {
                return;
            };
            let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
            let Ok(read_half) = stream.try_clone() else {
                continue;
            };
            let mut reader = BufReader::new(read_half);

            let mut request_line = String::new();
            if reader.read_line(&mut request_line).unwrap_or(0) == 0 {
                continue;
            }
            let mut header = String::new();
            while reader.read_line(&mut header).unwrap_or(0) > 2 {
                header.clear();
            }

            let path = request_line
                .split_whitespace()
                .nth(1)
                .unwrap_or("/")
                .to_string();
            log.lock().unwrap().push(path.clone());

            let (status, extra, body) = match route(&path) {
                Reply::Json(body) => (
                    "200 OK",
                    "Content-Type: application/json\r\n".to_string(),
                    body.to_string(),
                ),
                Reply::Redirect(location) => {
                    ("303 See Other", format!("Location: {location}\r\n"), String::new())
                }
                Reply::NotFound => ("404 Not Found", String::new(), String::new()),
            };
            let mut writer = stream;
            let _ = write!(
                writer,
                "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n{extra}\r\n{body}",
                body.len()
            );
            let _ = writer.flush();
        }
    });

    Ok((format!("http://{addr}"), seen))
}

fn cli_bin(config_home: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("taskshell");
    cmd.env("XDG_CONFIG_HOME", config_home)
        .env_remove("TASKCLUSTER_ROOT_URL")
        .env_remove("TASKCLUSTER_CLIENT_ID")
        .env_remove("TASKCLUSTER_ACCESS_TOKEN")
        .env_remove("TASKCLUSTER_CERTIFICATE")
        .env_remove("RUST_LOG")
        .timeout(Duration::from_secs(30));
    cmd
}

fn running_status() -> Value {
    json!({ "status": { "runs": [{ "state": "running" }] } })
}

#[test]
fn non_interactive_task_is_rejected_without_dialing() -> Result<()> {
    let temp = tempfile::tempdir().context("failed to create tempdir")?;
    let (root, seen) = spawn_mock_queue(|path| {
        if path.ends_with("/status") {
            Reply::Json(running_status())
        } else if path.contains("/artifacts/") {
            Reply::Redirect("https://tools.example.com/shell/?v=1&socketUrl=ws%3A%2F%2F127.0.0.1%3A1%2F".into())
        } else {
            Reply::Json(json!({ "payload": { "image": "ubuntu" } }))
        }
    })?;

    cli_bin(temp.path())
        .arg("--root-url")
        .arg(&root)
        .arg("T1")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("error: task T1"))
        .stderr(predicate::str::contains("features.interactive"));

    let seen = seen.lock().unwrap();
    assert!(
        seen.iter().all(|path| !path.contains("/artifacts/")),
        "shell artifact requested: {seen:?}"
    );
    Ok(())
}

#[test]
fn unknown_protocol_version_is_reported() -> Result<()> {
    let temp = tempfile::tempdir().context("failed to create tempdir")?;
    let (root, _) = spawn_mock_queue(|path| {
        if path.ends_with("/status") {
            Reply::Json(running_status())
        } else if path.contains("/artifacts/") {
            Reply::Redirect("https://tools.example.com/shell/?v=9&socketUrl=ws%3A%2F%2F127.0.0.1%3A1%2F".into())
        } else {
            Reply::Json(json!({ "payload": { "features": { "interactive": true } } }))
        }
    })?;

    cli_bin(temp.path())
        .env("TASKCLUSTER_ROOT_URL", &root)
        .arg("T9")
        .assert()
        .failure()
        .stderr(predicate::str::contains("task T9"))
        .stderr(predicate::str::contains("unknown shell version \"9\""));
    Ok(())
}

#[test]
fn unknown_task_fails_with_the_task_id() -> Result<()> {
    let temp = tempfile::tempdir().context("failed to create tempdir")?;
    let (root, _) = spawn_mock_queue(|_| Reply::NotFound)?;

    cli_bin(temp.path())
        .arg("--root-url")
        .arg(&root)
        .arg("nope")
        .assert()
        .failure()
        .stderr(predicate::str::contains("task nope could not be fetched"));
    Ok(())
}

#[test]
fn root_url_is_read_from_the_config_file() -> Result<()> {
    let temp = tempfile::tempdir().context("failed to create tempdir")?;
    let (root, seen) = spawn_mock_queue(|_| Reply::NotFound)?;
    let config = temp.path().join("custom.toml");
    std::fs::write(&config, format!("root_url = \"{root}\"\n"))?;

    cli_bin(temp.path())
        .arg("--config")
        .arg(&config)
        .arg("abc")
        .assert()
        .failure();

    assert_eq!(
        seen.lock().unwrap().first().map(String::as_str),
        Some("/api/queue/v1/task/abc")
    );
    Ok(())
}

#[test]
fn missing_root_url_is_a_config_error() -> Result<()> {
    let temp = tempfile::tempdir().context("failed to create tempdir")?;
    cli_bin(temp.path())
        .arg("T1")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("no root url configured"));
    Ok(())
}

#[test]
fn task_id_is_required() {
    let temp = tempfile::tempdir().unwrap();
    cli_bin(temp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("<TASK_ID>"));
}

/// Mock queue for an interactive, running task whose shell artifact
/// redirects to a v1 socket at `socket`.
fn spawn_v1_shell_queue(socket: SocketAddr) -> Result<String> {
    let location = format!(
        "https://tools.example.com/shell/?v=1&socketUrl=ws%3A%2F%2F{}%3A{}%2Fshell",
        socket.ip(),
        socket.port()
    );
    let (root, _) = spawn_mock_queue(move |path| {
        if path.ends_with("/status") {
            Reply::Json(running_status())
        } else if path.contains("/artifacts/") {
            Reply::Redirect(location.clone())
        } else {
            Reply::Json(json!({ "payload": { "features": { "interactive": true } } }))
        }
    })?;
    Ok(root)
}

/// Spawn the binary with every stdio piped; stdin stays open until the
/// caller drops it.
fn spawn_taskshell(config_home: &Path, root: &str, task_id: &str) -> Result<tokio::process::Child> {
    tokio::process::Command::new(assert_cmd::cargo::cargo_bin!("taskshell"))
        .env("XDG_CONFIG_HOME", config_home)
        .env_remove("TASKCLUSTER_ROOT_URL")
        .env_remove("TASKCLUSTER_CLIENT_ID")
        .env_remove("TASKCLUSTER_ACCESS_TOKEN")
        .env_remove("TASKCLUSTER_CERTIFICATE")
        .env_remove("RUST_LOG")
        .arg("--root-url")
        .arg(root)
        .arg(task_id)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .context("failed to spawn taskshell")
}

#[tokio::test]
async fn v1_session_runs_the_bootstrap_and_exits_zero_with_stdin_open() -> Result<()> {
    let temp = tempfile::tempdir().context("failed to create tempdir")?;
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let socket = listener.local_addr()?;
    let (query_tx, query_rx) = oneshot::channel();

    let shell = tokio::spawn(async move {
        let (stream, _) = listener.accept().await?;
        let callback =
            move |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
                let _ = query_tx.send(req.uri().query().unwrap_or_default().to_string());
                Ok(resp)
            };
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback).await?;
        ws.send(Message::Binary(b"\x01hello from remote\n".to_vec())).await?;
        ws.send(Message::Binary(b"\x02err line\n".to_vec())).await?;
        ws.send(Message::Binary(vec![100, 0])).await?;
        let _ = ws.next().await;
        anyhow::Ok(())
    });

    let root = spawn_v1_shell_queue(socket)?;
    let mut child = spawn_taskshell(temp.path(), &root, "T2")?;
    let stdin = child.stdin.take();

    let output = timeout(Duration::from_secs(20), child.wait_with_output())
        .await
        .context("taskshell did not exit after the remote shell stopped")??;
    drop(stdin);

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "taskshell failed: {stderr}");
    assert_eq!(String::from_utf8_lossy(&output.stdout), "hello from remote\n");
    assert!(stderr.contains("err line\n"), "stderr: {stderr}");

    let query = query_rx.await.context("shell socket saw no handshake")?;
    assert!(
        query.starts_with("tty=false&command=sh&command=-c&command=if+%5B+-f"),
        "unexpected query: {query}"
    );
    shell.await??;
    Ok(())
}

#[tokio::test]
async fn sigterm_mid_session_exits_with_an_error() -> Result<()> {
    let temp = tempfile::tempdir().context("failed to create tempdir")?;
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let socket = listener.local_addr()?;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await?;
        let mut ws = tokio_tungstenite::accept_async(stream).await?;
        ws.send(Message::Binary(b"\x01prompt$ ".to_vec())).await?;
        // Never report the command as stopped.
        while let Some(Ok(_)) = ws.next().await {}
        anyhow::Ok(())
    });

    let root = spawn_v1_shell_queue(socket)?;
    let mut child = spawn_taskshell(temp.path(), &root, "T3")?;
    let _stdin = child.stdin.take();
    let mut stdout = child.stdout.take().context("no stdout pipe")?;
    let mut stderr = child.stderr.take().context("no stderr pipe")?;

    let mut prompt = [0u8; 8];
    timeout(Duration::from_secs(20), stdout.read_exact(&mut prompt))
        .await
        .context("session never started streaming")??;
    assert_eq!(&prompt, b"prompt$ ");

    let pid = child.id().context("taskshell exited early")?;
    let killed = std::process::Command::new("kill")
        .arg("-TERM")
        .arg(pid.to_string())
        .status()
        .context("failed to run kill")?;
    assert!(killed.success());

    let status = timeout(Duration::from_secs(20), child.wait())
        .await
        .context("taskshell ignored SIGTERM")??;
    assert_eq!(status.code(), Some(1));

    let mut message = String::new();
    stderr.read_to_string(&mut message).await?;
    assert!(
        message.contains("error: shell session of task T3 terminated"),
        "stderr: {message}"
    );
    Ok(())
}
