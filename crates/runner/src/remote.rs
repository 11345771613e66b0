//! Line-delimited-JSON client for the game gateway service.
//!
//! One connection carries request/response pairs (`{"op": ...}` in,
//! `{"ok": ...}` back); a second connection subscribes to pushed events
//! (chat, for now) and feeds them into an mpsc the dispatcher drains.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use anyhow::Context;
use serde_json::{Map, Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, tcp::OwnedReadHalf, tcp::OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc};
use tracing::{info, warn};

use mcbot_core::agent::action::ActionResult;
use mcbot_core::agent::gateway::{Gateway, GatewayEvent, GatewayStatus};
use mcbot_core::agent::observation::Observation;

struct GatewayConn {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

pub struct RemoteGateway {
    conn: Mutex<GatewayConn>,
}

impl RemoteGateway {
    pub async fn connect(addr: &str) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("connect gateway {addr}"))?;
        let (read, write) = stream.into_split();
        Ok(Self {
            conn: Mutex::new(GatewayConn {
                reader: BufReader::new(read),
                writer: write,
            }),
        })
    }

    async fn request_json(&self, req: Value) -> anyhow::Result<Value> {
        let line = format!("{req}\n");
        let mut conn = self.conn.lock().await;
        conn.writer
            .write_all(line.as_bytes())
            .await
            .context("gateway write")?;
        conn.writer.flush().await.ok();

        let mut resp_line = String::new();
        let n = conn
            .reader
            .read_line(&mut resp_line)
            .await
            .context("gateway read")?;
        if n == 0 {
            anyhow::bail!("gateway connection closed");
        }
        let v: Value =
            serde_json::from_str(resp_line.trim()).context("invalid gateway json response")?;
        if v.get("ok").and_then(Value::as_bool) != Some(true) {
            anyhow::bail!("gateway rejected request: {v}");
        }
        Ok(v)
    }

    fn field<T: serde::de::DeserializeOwned>(v: &Value, key: &str) -> anyhow::Result<T> {
        let inner = v
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("missing '{key}' in gateway response"))?;
        serde_json::from_value(inner).with_context(|| format!("decode gateway '{key}'"))
    }
}

impl Gateway for RemoteGateway {
    fn status<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<GatewayStatus>> + Send + 'a>> {
        Box::pin(async move {
            let v = self.request_json(json!({ "op": "status" })).await?;
            Self::field(&v, "status")
        })
    }

    fn observe<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Observation>> + Send + 'a>> {
        Box::pin(async move {
            let v = self.request_json(json!({ "op": "observation" })).await?;
            Self::field(&v, "observation")
        })
    }

    fn execute_action<'a>(
        &'a self,
        action: &'a str,
        parameters: Map<String, Value>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ActionResult>> + Send + 'a>> {
        Box::pin(async move {
            let v = self
                .request_json(json!({
                    "op": "action",
                    "action": action,
                    "parameters": parameters,
                }))
                .await?;
            Self::field(&v, "result")
        })
    }

    fn connect<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<GatewayStatus>> + Send + 'a>> {
        Box::pin(async move {
            let v = self.request_json(json!({ "op": "connect" })).await?;
            Self::field(&v, "status")
        })
    }

    fn disconnect<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<GatewayStatus>> + Send + 'a>> {
        Box::pin(async move {
            let v = self.request_json(json!({ "op": "disconnect" })).await?;
            Self::field(&v, "status")
        })
    }
}

/// Subscribes to the gateway's event stream and forwards decoded events.
/// Reconnects forever: 2 s after a clean close, 5 s after an error.
pub async fn pump_events(addr: String, tx: mpsc::Sender<GatewayEvent>) {
    loop {
        match TcpStream::connect(&addr).await {
            Ok(stream) => {
                info!("event stream connected to {addr}");
                let mut reader = BufReader::new(stream);
                let mut line = String::new();
                loop {
                    line.clear();
                    match reader.read_line(&mut line).await {
                        Ok(0) => {
                            warn!("event stream closed; reconnecting");
                            tokio::time::sleep(Duration::from_secs(2)).await;
                            break;
                        }
                        Ok(_) => {
                            let trimmed = line.trim();
                            if trimmed.is_empty() {
                                continue;
                            }
                            match serde_json::from_str::<GatewayEvent>(trimmed) {
                                Ok(event) => {
                                    if tx.send(event).await.is_err() {
                                        return;
                                    }
                                }
                                // Unknown event kinds are fine; only chat is
                                // interesting here.
                                Err(_) => continue,
                            }
                        }
                        Err(e) => {
                            warn!("event stream error: {e}; reconnecting");
                            tokio::time::sleep(Duration::from_secs(5)).await;
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                warn!("event stream connect failed: {e}; retrying");
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn serve_one(listener: TcpListener, reply: Value) -> String {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 4096];
        let n = sock.read(&mut buf).await.unwrap();
        let received = String::from_utf8_lossy(&buf[..n]).to_string();
        sock.write_all(format!("{reply}\n").as_bytes())
            .await
            .unwrap();
        received
    }

    #[tokio::test]
    async fn action_request_round_trips() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(serve_one(
            listener,
            json!({"ok": true, "result": {"success": true, "message": "jumped"}}),
        ));

        let gw = RemoteGateway::connect(&addr).await.unwrap();
        let res = gw.execute_action("jump", Map::new()).await.unwrap();
        assert!(res.success);
        assert_eq!(res.message, "jumped");

        let received = server.await.unwrap();
        let req: Value = serde_json::from_str(received.trim()).unwrap();
        assert_eq!(req.get("op"), Some(&json!("action")));
        assert_eq!(req.get("action"), Some(&json!("jump")));
    }

    #[tokio::test]
    async fn rejected_request_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(serve_one(
            listener,
            json!({"ok": false, "error": "not connected"}),
        ));

        let gw = RemoteGateway::connect(&addr).await.unwrap();
        let err = gw.observe().await.unwrap_err();
        assert!(err.to_string().contains("rejected"));
    }

    #[tokio::test]
    async fn event_pump_decodes_chat_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(
                b"{\"type\":\"chat\",\"username\":\"steve\",\"message\":\"hi\"}\n\
                  {\"type\":\"mystery\"}\n",
            )
            .await
            .unwrap();
            // Hold the socket open so the pump doesn't enter reconnect.
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let (tx, mut rx) = mpsc::channel(8);
        tokio::spawn(pump_events(addr, tx));
        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            GatewayEvent::Chat {
                username: "steve".to_string(),
                message: "hi".to_string()
            }
        );
    }
}
