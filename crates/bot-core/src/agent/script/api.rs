//! The capability surface scripts run against.
//!
//! Every side effect a script can cause flows through one of the named
//! methods on [`Capabilities`], and every such call is recorded into the
//! shared [`TraceLog`] the moment its result is known — a timeout or crash
//! later in the program cannot lose the entries already made. The set of
//! operations is the closed [`ScriptOp`] enum; there is no call-by-name
//! escape hatch.

use std::sync::{Arc, Mutex};

use serde_json::{Map, Value, json};

use crate::agent::action::{ActionResult, ActionTrace};
use crate::agent::gateway::Gateway;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptOp {
    // movement
    GoTo,
    FollowPlayer,
    StopMoving,
    Jump,
    LookAt,
    // world / inventory
    Attack,
    CollectBlock,
    PlaceBlock,
    EquipItem,
    DropItem,
    Eat,
    UseItem,
    ActivateBlock,
    ViewInventory,
    // querying
    FindBlock,
    ScanEntities,
    GetBlockAt,
    GetPosition,
    GetHealth,
    // chat / waiting / logging
    Chat,
    Wait,
    Log,
    // skill library
    UseSkill,
}

/// Declared argument of an op: script-side key, gateway-side key, and
/// whether the parser must see it.
pub struct ArgSpec {
    pub key: &'static str,
    pub wire: &'static str,
    pub required: bool,
}

const fn arg(key: &'static str, wire: &'static str, required: bool) -> ArgSpec {
    ArgSpec { key, wire, required }
}

const NO_ARGS: &[ArgSpec] = &[];
const XYZ_ARGS: &[ArgSpec] = &[arg("x", "x", true), arg("y", "y", true), arg("z", "z", true)];
const FOLLOW_ARGS: &[ArgSpec] = &[arg("player", "playerName", true)];
const ATTACK_ARGS: &[ArgSpec] = &[arg("entity", "entityType", true)];
const COLLECT_ARGS: &[ArgSpec] = &[arg("block", "blockType", true)];
const PLACE_ARGS: &[ArgSpec] = &[
    arg("block", "blockName", true),
    arg("x", "x", true),
    arg("y", "y", true),
    arg("z", "z", true),
];
const EQUIP_ARGS: &[ArgSpec] = &[arg("item", "itemName", true)];
const DROP_ARGS: &[ArgSpec] = &[arg("item", "itemName", true), arg("count", "count", false)];
const EAT_ARGS: &[ArgSpec] = &[arg("food", "foodName", false)];
const FIND_BLOCK_ARGS: &[ArgSpec] = &[
    arg("block", "blockType", true),
    arg("range", "maxDistance", false),
];
const SCAN_ARGS: &[ArgSpec] = &[
    arg("range", "range", false),
    arg("entity", "entityType", false),
];
const MESSAGE_ARGS: &[ArgSpec] = &[arg("message", "message", true)];
const WAIT_ARGS: &[ArgSpec] = &[arg("seconds", "seconds", true)];
const SKILL_ARGS: &[ArgSpec] = &[arg("name", "name", true)];

impl ScriptOp {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "go_to" => Self::GoTo,
            "follow_player" => Self::FollowPlayer,
            "stop_moving" => Self::StopMoving,
            "jump" => Self::Jump,
            "look_at" => Self::LookAt,
            "attack" => Self::Attack,
            "collect_block" => Self::CollectBlock,
            "place_block" => Self::PlaceBlock,
            "equip_item" => Self::EquipItem,
            "drop_item" => Self::DropItem,
            "eat" => Self::Eat,
            "use_item" => Self::UseItem,
            "activate_block" => Self::ActivateBlock,
            "view_inventory" => Self::ViewInventory,
            "find_block" => Self::FindBlock,
            "scan_entities" => Self::ScanEntities,
            "get_block_at" => Self::GetBlockAt,
            "get_position" => Self::GetPosition,
            "get_health" => Self::GetHealth,
            "chat" => Self::Chat,
            "wait" => Self::Wait,
            "log" => Self::Log,
            "use_skill" => Self::UseSkill,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::GoTo => "go_to",
            Self::FollowPlayer => "follow_player",
            Self::StopMoving => "stop_moving",
            Self::Jump => "jump",
            Self::LookAt => "look_at",
            Self::Attack => "attack",
            Self::CollectBlock => "collect_block",
            Self::PlaceBlock => "place_block",
            Self::EquipItem => "equip_item",
            Self::DropItem => "drop_item",
            Self::Eat => "eat",
            Self::UseItem => "use_item",
            Self::ActivateBlock => "activate_block",
            Self::ViewInventory => "view_inventory",
            Self::FindBlock => "find_block",
            Self::ScanEntities => "scan_entities",
            Self::GetBlockAt => "get_block_at",
            Self::GetPosition => "get_position",
            Self::GetHealth => "get_health",
            Self::Chat => "chat",
            Self::Wait => "wait",
            Self::Log => "log",
            Self::UseSkill => "use_skill",
        }
    }

    pub fn arg_specs(self) -> &'static [ArgSpec] {
        match self {
            Self::GoTo | Self::LookAt | Self::GetBlockAt | Self::ActivateBlock => XYZ_ARGS,
            Self::FollowPlayer => FOLLOW_ARGS,
            Self::StopMoving
            | Self::Jump
            | Self::UseItem
            | Self::ViewInventory
            | Self::GetPosition
            | Self::GetHealth => NO_ARGS,
            Self::Attack => ATTACK_ARGS,
            Self::CollectBlock => COLLECT_ARGS,
            Self::PlaceBlock => PLACE_ARGS,
            Self::EquipItem => EQUIP_ARGS,
            Self::DropItem => DROP_ARGS,
            Self::Eat => EAT_ARGS,
            Self::FindBlock => FIND_BLOCK_ARGS,
            Self::ScanEntities => SCAN_ARGS,
            Self::Chat | Self::Log => MESSAGE_ARGS,
            Self::Wait => WAIT_ARGS,
            Self::UseSkill => SKILL_ARGS,
        }
    }

    /// `use_skill` forwards everything beyond `name` to the skill.
    pub fn allows_extra_args(self) -> bool {
        matches!(self, Self::UseSkill)
    }
}

#[derive(Debug, Clone)]
pub struct CapabilityError(pub String);

impl std::fmt::Display for CapabilityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for CapabilityError {}

/// Trace and log storage shared with the sandbox. Kept behind its own `Arc`
/// so the partial record survives cancellation of the interpreter future.
#[derive(Debug, Default)]
pub struct TraceLog {
    actions: Mutex<Vec<ActionTrace>>,
    logs: Mutex<Vec<String>>,
}

impl TraceLog {
    pub fn record(&self, action: &str, result: ActionResult) {
        self.actions
            .lock()
            .expect("trace lock poisoned")
            .push(ActionTrace {
                action: action.to_string(),
                result,
            });
    }

    pub fn log(&self, message: String) {
        self.logs.lock().expect("trace lock poisoned").push(message);
    }

    pub fn actions(&self) -> Vec<ActionTrace> {
        self.actions.lock().expect("trace lock poisoned").clone()
    }

    pub fn logs(&self) -> Vec<String> {
        self.logs.lock().expect("trace lock poisoned").clone()
    }

    pub fn action_count(&self) -> usize {
        self.actions.lock().expect("trace lock poisoned").len()
    }
}

/// The object handed to a running program. Named method per allowed
/// operation; each returns the action result as a plain JSON value so
/// script variables can address the payload fields.
pub struct Capabilities {
    gateway: Arc<dyn Gateway>,
    trace: Arc<TraceLog>,
}

impl Capabilities {
    pub fn new(gateway: Arc<dyn Gateway>, trace: Arc<TraceLog>) -> Self {
        Self { gateway, trace }
    }

    pub fn trace(&self) -> &Arc<TraceLog> {
        &self.trace
    }

    /// Forwards one action to the gateway and records the trace entry.
    /// An unreachable gateway is an error; an action the gateway reports as
    /// failed is a normal value the script can inspect.
    async fn gateway_call(
        &self,
        action: &str,
        params: Map<String, Value>,
    ) -> Result<Value, CapabilityError> {
        let result = self
            .gateway
            .execute_action(action, params)
            .await
            .map_err(|e| CapabilityError(format!("{action}: {e:#}")))?;
        self.trace.record(action, result.clone());
        serde_json::to_value(result).map_err(|e| CapabilityError(format!("{action}: {e}")))
    }

    fn record_query(&self, action: &str, message: &str, data: Map<String, Value>) {
        self.trace
            .record(action, ActionResult::ok(message).with_data(data));
    }

    pub async fn go_to(&self, x: f64, y: f64, z: f64) -> Result<Value, CapabilityError> {
        self.gateway_call("goTo", params(&[("x", json!(x)), ("y", json!(y)), ("z", json!(z))]))
            .await
    }

    pub async fn follow_player(&self, player: &str) -> Result<Value, CapabilityError> {
        self.gateway_call("followPlayer", params(&[("playerName", json!(player))]))
            .await
    }

    pub async fn stop_moving(&self) -> Result<Value, CapabilityError> {
        self.gateway_call("stopMoving", Map::new()).await
    }

    pub async fn jump(&self) -> Result<Value, CapabilityError> {
        self.gateway_call("jump", Map::new()).await
    }

    pub async fn look_at(&self, x: f64, y: f64, z: f64) -> Result<Value, CapabilityError> {
        self.gateway_call("lookAt", params(&[("x", json!(x)), ("y", json!(y)), ("z", json!(z))]))
            .await
    }

    pub async fn attack(&self, entity: &str) -> Result<Value, CapabilityError> {
        self.gateway_call("attack", params(&[("entityType", json!(entity))]))
            .await
    }

    pub async fn collect_block(&self, block: &str) -> Result<Value, CapabilityError> {
        self.gateway_call("collectBlock", params(&[("blockType", json!(block))]))
            .await
    }

    pub async fn place_block(
        &self,
        block: &str,
        x: f64,
        y: f64,
        z: f64,
    ) -> Result<Value, CapabilityError> {
        self.gateway_call(
            "placeBlock",
            params(&[
                ("blockName", json!(block)),
                ("x", json!(x)),
                ("y", json!(y)),
                ("z", json!(z)),
            ]),
        )
        .await
    }

    pub async fn equip_item(&self, item: &str) -> Result<Value, CapabilityError> {
        self.gateway_call("equipItem", params(&[("itemName", json!(item))]))
            .await
    }

    pub async fn drop_item(&self, item: &str, count: Option<f64>) -> Result<Value, CapabilityError> {
        let mut p = params(&[("itemName", json!(item))]);
        if let Some(count) = count {
            p.insert("count".to_string(), json!(count));
        }
        self.gateway_call("dropItem", p).await
    }

    pub async fn eat(&self, food: Option<&str>) -> Result<Value, CapabilityError> {
        let mut p = Map::new();
        if let Some(food) = food {
            p.insert("foodName".to_string(), json!(food));
        }
        self.gateway_call("eat", p).await
    }

    pub async fn use_item(&self) -> Result<Value, CapabilityError> {
        self.gateway_call("useItem", Map::new()).await
    }

    pub async fn activate_block(&self, x: f64, y: f64, z: f64) -> Result<Value, CapabilityError> {
        self.gateway_call(
            "activateBlock",
            params(&[("x", json!(x)), ("y", json!(y)), ("z", json!(z))]),
        )
        .await
    }

    pub async fn view_inventory(&self) -> Result<Value, CapabilityError> {
        self.gateway_call("viewInventory", Map::new()).await
    }

    pub async fn find_block(
        &self,
        block: &str,
        range: Option<f64>,
    ) -> Result<Value, CapabilityError> {
        let mut p = params(&[("blockType", json!(block))]);
        if let Some(range) = range {
            p.insert("maxDistance".to_string(), json!(range));
        }
        self.gateway_call("findBlock", p).await
    }

    pub async fn scan_entities(
        &self,
        range: Option<f64>,
        entity: Option<&str>,
    ) -> Result<Value, CapabilityError> {
        let mut p = Map::new();
        if let Some(range) = range {
            p.insert("range".to_string(), json!(range));
        }
        if let Some(entity) = entity {
            p.insert("entityType".to_string(), json!(entity));
        }
        self.gateway_call("scanEntities", p).await
    }

    pub async fn get_block_at(&self, x: f64, y: f64, z: f64) -> Result<Value, CapabilityError> {
        self.gateway_call(
            "getBlockAt",
            params(&[("x", json!(x)), ("y", json!(y)), ("z", json!(z))]),
        )
        .await
    }

    /// Reads the bot position from a fresh observation. Traced like any
    /// other capability call, with the coordinates as the payload.
    pub async fn get_position(&self) -> Result<Value, CapabilityError> {
        let obs = self
            .gateway
            .observe()
            .await
            .map_err(|e| CapabilityError(format!("get_position: {e:#}")))?;
        let pos = obs.position.unwrap_or_default();
        let data = params(&[("x", json!(pos.x)), ("y", json!(pos.y)), ("z", json!(pos.z))]);
        self.record_query("getPosition", "position", data.clone());
        Ok(Value::Object(data))
    }

    pub async fn get_health(&self) -> Result<Value, CapabilityError> {
        let obs = self
            .gateway
            .observe()
            .await
            .map_err(|e| CapabilityError(format!("get_health: {e:#}")))?;
        let (health, food) = obs.health.map(|h| (h.health, h.food)).unwrap_or((20.0, 20.0));
        let data = params(&[("health", json!(health)), ("food", json!(food))]);
        self.record_query("getHealth", "health", data.clone());
        Ok(Value::Object(data))
    }

    pub async fn chat(&self, message: &str) -> Result<Value, CapabilityError> {
        self.gateway_call("chat", params(&[("message", json!(message))]))
            .await
    }

    pub async fn wait(&self, seconds: f64) -> Result<Value, CapabilityError> {
        self.gateway_call("wait", params(&[("seconds", json!(seconds))]))
            .await
    }

    /// Log lines go to the operator and the script's log list, never to the
    /// action trace.
    pub fn log(&self, message: &str) {
        tracing::info!(target: "script", "{message}");
        self.trace.log(message.to_string());
    }

    /// Records the outcome of a nested skill invocation as a single trace
    /// entry (the skill's own calls are already in the trace).
    pub fn record_skill(&self, name: &str, success: bool, message: impl Into<String>) {
        let result = if success {
            ActionResult::ok(message)
        } else {
            ActionResult::failure(message)
        };
        self.trace.record(&format!("useSkill:{name}"), result);
    }
}

fn params(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_names_round_trip() {
        for name in [
            "go_to",
            "follow_player",
            "stop_moving",
            "jump",
            "look_at",
            "attack",
            "collect_block",
            "place_block",
            "equip_item",
            "drop_item",
            "eat",
            "use_item",
            "activate_block",
            "view_inventory",
            "find_block",
            "scan_entities",
            "get_block_at",
            "get_position",
            "get_health",
            "chat",
            "wait",
            "log",
            "use_skill",
        ] {
            let op = ScriptOp::parse(name).unwrap();
            assert_eq!(op.name(), name);
        }
        assert!(ScriptOp::parse("eval").is_none());
        assert!(ScriptOp::parse("import").is_none());
    }

    #[test]
    fn trace_log_preserves_order() {
        let trace = TraceLog::default();
        trace.record("jump", ActionResult::ok("jumped"));
        trace.record("chat", ActionResult::ok("said hi"));
        let actions = trace.actions();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].action, "jump");
        assert_eq!(actions[1].action, "chat");
        assert_eq!(trace.action_count(), 2);
    }
}
