//! Operator control surface: line-delimited JSON over a local TCP port.
//!
//! Thin by design — every op maps onto one engine, sandbox, or gateway
//! call and returns `{"ok": true, ...}` or `{"ok": false, "error": ...}`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::{Map, Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use mcbot_core::agent::Engine;
use mcbot_core::agent::gateway::Gateway;

pub async fn serve(listen: String, engine: Arc<Engine>, gateway: Arc<dyn Gateway>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("bind control port {listen}"))?;
    info!("control listening on {listen}");

    loop {
        let (stream, peer) = listener.accept().await.context("control accept")?;
        let engine = engine.clone();
        let gateway = gateway.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_conn(stream, engine, gateway).await {
                warn!("control connection {peer} ended: {e:#}");
            }
        });
    }
}

async fn handle_conn(
    stream: TcpStream,
    engine: Arc<Engine>,
    gateway: Arc<dyn Gateway>,
) -> anyhow::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let mut line = String::new();

    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(());
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<Value>(trimmed) {
            Ok(req) => dispatch(&req, &engine, &gateway).await,
            Err(e) => json!({ "ok": false, "error": format!("invalid json: {e}") }),
        };
        write.write_all(format!("{reply}\n").as_bytes()).await?;
    }
}

async fn dispatch(req: &Value, engine: &Arc<Engine>, gateway: &Arc<dyn Gateway>) -> Value {
    let op = req.get("op").and_then(Value::as_str).unwrap_or("");
    match op {
        "agent_status" => match serde_json::to_value(engine.status()) {
            Ok(status) => json!({ "ok": true, "status": status }),
            Err(e) => error_reply(e.to_string()),
        },
        "agent_start" => {
            engine.start().await;
            json!({ "ok": true, "status": "started" })
        }
        "agent_stop" => {
            engine.stop().await;
            json!({ "ok": true, "status": "stopped" })
        }
        "agent_tick" => {
            engine.force_tick().await;
            json!({ "ok": true, "status": "tick completed" })
        }
        "script_execute" => {
            let Some(code) = req.get("code").and_then(Value::as_str) else {
                return error_reply("script_execute needs 'code'");
            };
            let timeout = req
                .get("timeout")
                .and_then(Value::as_f64)
                .map(Duration::from_secs_f64);
            let result = engine.sandbox().execute(code, timeout).await;
            json!({ "ok": true, "result": result.to_json() })
        }
        "bot_status" => relay(gateway.status().await),
        "bot_connect" => relay(gateway.connect().await),
        "bot_disconnect" => relay(gateway.disconnect().await),
        "bot_observation" => relay(gateway.observe().await),
        "bot_action" => {
            let Some(action) = req.get("action").and_then(Value::as_str) else {
                return error_reply("bot_action needs 'action'");
            };
            let parameters = req
                .get("parameters")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_else(Map::new);
            relay(gateway.execute_action(action, parameters).await)
        }
        other => error_reply(format!("unknown op '{other}'")),
    }
}

fn relay<T: serde::Serialize>(res: anyhow::Result<T>) -> Value {
    match res {
        Ok(value) => match serde_json::to_value(value) {
            Ok(v) => json!({ "ok": true, "result": v }),
            Err(e) => error_reply(e.to_string()),
        },
        Err(e) => error_reply(format!("{e:#}")),
    }
}

fn error_reply(message: impl Into<String>) -> Value {
    json!({ "ok": false, "error": message.into() })
}
