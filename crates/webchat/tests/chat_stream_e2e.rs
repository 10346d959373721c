use axum::{extract::State, routing::post, Json, Router};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

type Seen = Arc<Mutex<Vec<serde_json::Value>>>;

/// Streaming `/api/chat` stand-in that always answers "Hi there".
async fn fake_ollama() -> (SocketAddr, Seen) {
    let seen: Seen = Arc::default();
    let app = Router::new()
        .route(
            "/api/chat",
            post(
                |State(seen): State<Seen>, Json(v): Json<serde_json::Value>| async move {
                    seen.lock().unwrap().push(v);
                    [
                        r#"{"message":{"role":"assistant","content":"Hi "},"done":false}"#,
                        r#"{"message":{"role":"assistant","content":"there"},"done":false}"#,
                        r#"{"message":{"role":"assistant","content":""},"done":true}"#,
                    ]
                    .join("\n")
                },
            ),
        )
        .with_state(seen.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, seen)
}

fn webchat(addr: SocketAddr, cfg: &std::path::Path) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(assert_cmd::cargo::cargo_bin!("webchat"));
    cmd.env_remove("WEBCHAT_ENV_FILE")
        .env_remove("WEBCHAT_AGENT_MODE")
        .env_remove("WEBCHAT_SEARXNG_URL")
        .env("WEBCHAT_CONFIG", cfg)
        .env("WEBCHAT_OLLAMA_HOST", format!("http://{addr}"))
        .env("WEBCHAT_CHAT_MODEL", "tiny");
    cmd
}

#[tokio::test]
async fn ask_streams_reply_without_search() {
    let (addr, seen) = fake_ollama().await;
    let tmp = tempfile::tempdir().unwrap();
    let cfg = tmp.path().join("config.toml");
    std::fs::write(&cfg, "[chat]\nsystem_message = \"be brief\"\n").unwrap();

    let out = webchat(addr, &cfg)
        .args(["ask", "--no-search", "say", "hi"])
        .output()
        .await
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "Hi there");

    let reqs = seen.lock().unwrap().clone();
    assert_eq!(reqs.len(), 1);
    assert_eq!(reqs[0]["stream"], true);
    assert_eq!(
        reqs[0]["messages"],
        serde_json::json!([
            {"role": "system", "content": "be brief"},
            {"role": "user", "content": "say hi"}
        ])
    );
}

#[tokio::test]
async fn chat_loop_keeps_history_until_reset() {
    use tokio::io::AsyncWriteExt;

    let (addr, seen) = fake_ollama().await;
    let tmp = tempfile::tempdir().unwrap();
    let cfg = tmp.path().join("config.toml");
    std::fs::write(&cfg, "[agent]\nenabled = false\n").unwrap();

    let mut child = webchat(addr, &cfg)
        .arg("chat")
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .unwrap();
    let mut stdin = child.stdin.take().unwrap();
    stdin
        .write_all(b"hello\nagain\n/reset\nthird\nexit\n")
        .await
        .unwrap();
    drop(stdin);
    let out = child.wait_with_output().await.unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.starts_with("[>] User: "));
    assert_eq!(stdout.matches("[#] Assistant: Hi there").count(), 3);
    assert!(stdout.contains("[#] History cleared."));
    assert!(!stdout.contains("Web search context from"));

    let lens: Vec<usize> = seen
        .lock()
        .unwrap()
        .iter()
        .map(|r| r["messages"].as_array().map(Vec::len).unwrap_or(0))
        .collect();
    assert_eq!(lens, vec![2, 4, 2]);
}
