use axum::{extract::State, routing::post, Json, Router};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Fake Ollama: the classifier says "True" only for weather prompts and the
/// query generator echoes a quoted query. Every request body is recorded.
async fn fake_ollama() -> (SocketAddr, Arc<Mutex<Vec<serde_json::Value>>>) {
    let seen: Arc<Mutex<Vec<serde_json::Value>>> = Arc::default();
    let app = Router::new()
        .route(
            "/api/chat",
            post(
                |State(seen): State<Arc<Mutex<Vec<serde_json::Value>>>>,
                 Json(v): Json<serde_json::Value>| async move {
                    seen.lock().unwrap().push(v.clone());
                    let system = v["messages"][0]["content"].as_str().unwrap_or("");
                    let user = v["messages"][1]["content"].as_str().unwrap_or("");
                    let content = if system.contains("True if") {
                        if user.contains("weather") { "True" } else { "False" }
                    } else {
                        "\"lisbon weather today\""
                    };
                    Json(serde_json::json!({
                        "message": {"role": "assistant", "content": content},
                        "done": true
                    }))
                },
            ),
        )
        .with_state(seen.clone());
    (serve(app).await, seen)
}

async fn run_eval(addr: SocketAddr, dir: &Path, args: &[&str]) -> serde_json::Value {
    let cfg = dir.join("config.toml");
    std::fs::write(&cfg, "[agent.decide_to_search]\nmodel = \"judge\"\n").unwrap();

    let bin = assert_cmd::cargo::cargo_bin!("webchat");
    let out = tokio::process::Command::new(bin)
        .arg("eval")
        .args(args)
        .env_remove("WEBCHAT_ENV_FILE")
        .env_remove("WEBCHAT_AGENT_MODE")
        .env("WEBCHAT_CONFIG", &cfg)
        .env("WEBCHAT_OLLAMA_HOST", format!("http://{addr}"))
        .env("WEBCHAT_CHAT_MODEL", "tiny")
        .output()
        .await
        .expect("run webchat eval");
    assert!(
        out.status.success(),
        "webchat eval failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    serde_json::from_slice(&out.stdout).expect("eval prints json")
}

#[tokio::test]
async fn decide_eval_reports_accuracy_latency_and_consistency() {
    let (addr, seen) = fake_ollama().await;
    let tmp = tempfile::tempdir().unwrap();
    let cases = tmp.path().join("decide.json");
    std::fs::write(
        &cases,
        r#"{"schema_version":1,"kind":"webchat_eval_cases","cases":[
            {"prompt":"What's the weather today?","category":"current","expected":true},
            {"prompt":"Current price of Bitcoin","category":"current","expected":true},
            {"prompt":"Explain photosynthesis","category":"timeless","expected":false}
        ]}"#,
    )
    .unwrap();
    let artifact = tmp.path().join("out/decide-summary.json");

    let v = run_eval(
        addr,
        tmp.path(),
        &[
            "decide",
            "--cases",
            cases.to_str().unwrap(),
            "--epochs",
            "3",
            "--out",
            artifact.to_str().unwrap(),
        ],
    )
    .await;

    assert_eq!(v["schema_version"], 1);
    assert_eq!(v["kind"], "webchat_eval");
    assert_eq!(v["stage"], "decide");
    assert_eq!(v["model"], "judge");
    assert_eq!(v["epochs"], 3);
    assert_eq!(v["case_count"], 3);
    assert_eq!(v["accuracy"]["overall"]["correct"], 6);
    assert_eq!(v["accuracy"]["overall"]["total"], 9);
    assert_eq!(v["accuracy"]["by_category"]["current"]["correct"], 3);
    assert_eq!(v["accuracy"]["by_category"]["timeless"]["correct"], 3);
    assert_eq!(v["consistency"]["rate"], 1.0);
    assert_eq!(v["per_epoch"].as_array().map(Vec::len), Some(3));
    let lat = &v["latency_ms"];
    assert_eq!(lat["count"], 9);
    for k in ["mean_ms", "median_ms", "std_ms", "min_ms", "max_ms"] {
        assert!(lat[k].as_f64().is_some(), "missing latency field {k}");
    }
    assert!(lat["min_ms"].as_f64() <= lat["max_ms"].as_f64());

    // The classifier ran under the configured stage model and instruction.
    let requests = seen.lock().unwrap().clone();
    assert_eq!(requests.len(), 9);
    assert!(requests.iter().all(|r| r["model"] == "judge" && r["stream"] == false));

    let on_disk: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&artifact).unwrap()).unwrap();
    assert_eq!(on_disk["accuracy"], v["accuracy"]);
}

#[tokio::test]
async fn query_eval_reads_plain_prompt_files() {
    let (addr, seen) = fake_ollama().await;
    let tmp = tempfile::tempdir().unwrap();
    let cases = tmp.path().join("prompts.txt");
    std::fs::write(&cases, "# one prompt per line\nIs it going to rain in Lisbon?\n").unwrap();

    let v = run_eval(
        addr,
        tmp.path(),
        &["query", "--cases", cases.to_str().unwrap(), "--epochs", "2"],
    )
    .await;

    assert_eq!(v["stage"], "query");
    assert_eq!(v["model"], "tiny");
    assert!(v["accuracy"].is_null());
    assert_eq!(
        v["cases"][0]["outputs"],
        serde_json::json!(["lisbon weather today", "lisbon weather today"])
    );
    assert_eq!(v["query_words"]["mean"], 3.0);
    assert_eq!(v["consistency"]["correct"], 1);
    let user = seen.lock().unwrap()[0]["messages"][1]["content"]
        .as_str()
        .unwrap_or("")
        .to_string();
    assert!(user.ends_with("Is it going to rain in Lisbon?"));
}

#[test]
fn decide_eval_rejects_unlabelled_cases() {
    let tmp = tempfile::tempdir().unwrap();
    let cases = tmp.path().join("prompts.txt");
    std::fs::write(&cases, "weather today\n").unwrap();
    let cfg = tmp.path().join("config.toml");
    std::fs::write(&cfg, "").unwrap();
    assert_cmd::Command::new(assert_cmd::cargo::cargo_bin!("webchat"))
        .args(["eval", "decide", "--cases", cases.to_str().unwrap()])
        .env_remove("WEBCHAT_ENV_FILE")
        .env("WEBCHAT_CONFIG", &cfg)
        .assert()
        .failure()
        .stderr(predicates::str::contains("expected"));
}
