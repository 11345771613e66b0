use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::action::ActionResult;
use super::observation::Observation;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
pub struct GatewayStatus {
    pub connected: bool,
    #[serde(default)]
    pub username: Option<String>,
}

/// Events pushed by the gateway between ticks. Chat is the only kind the
/// core reacts to; unknown kinds are dropped at the transport layer.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    Chat { username: String, message: String },
}

/// Boundary to the remote game-control service.
///
/// The runner implements this over its wire transport; tests implement it
/// with queued fakes. All world simulation lives behind this trait.
pub trait Gateway: Send + Sync {
    fn status<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<GatewayStatus>> + Send + 'a>>;

    fn observe<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Observation>> + Send + 'a>>;

    fn execute_action<'a>(
        &'a self,
        action: &'a str,
        parameters: Map<String, Value>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ActionResult>> + Send + 'a>>;

    fn connect<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<GatewayStatus>> + Send + 'a>>;

    fn disconnect<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<GatewayStatus>> + Send + 'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_event_decodes_from_tagged_json() {
        let raw = r#"{"type":"chat","username":"alex","message":"%help"}"#;
        let ev: GatewayEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(
            ev,
            GatewayEvent::Chat {
                username: "alex".to_string(),
                message: "%help".to_string()
            }
        );
    }
}
