use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Action name that routes a decision into the script sandbox instead of the
/// gateway.
pub const SCRIPT_ACTION: &str = "executeScript";

/// Outcome of one gateway action or one whole script run.
///
/// Gateway payloads are open-ended (`found`, `position`, `inventory`, ...);
/// the flattened `data` map keeps those fields addressable at the top level
/// of the serialized object so script variables can reach them directly.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ActionResult {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ActionTrace>,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl ActionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            logs: Vec::new(),
            actions: Vec::new(),
            data: Map::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            logs: Vec::new(),
            actions: Vec::new(),
            data: Map::new(),
        }
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }
}

/// One capability call recorded during a script run, in execution order.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ActionTrace {
    pub action: String,
    pub result: ActionResult,
}

/// Catalog entry for one atomic action the model may choose.
#[derive(Debug, Clone, Serialize)]
pub struct ActionSpec {
    pub name: &'static str,
    pub description: &'static str,
    /// `(parameter, type-and-meaning)` pairs rendered into the prompt.
    pub parameters: &'static [(&'static str, &'static str)],
}

/// The atomic actions surfaced to the model. Complex behavior goes through
/// `executeScript` rather than growing this list.
pub const ACTIONS: &[ActionSpec] = &[
    ActionSpec {
        name: "chat",
        description: "Send a chat message",
        parameters: &[("message", "string - text to say")],
    },
    ActionSpec {
        name: "wait",
        description: "Wait for a number of seconds",
        parameters: &[("seconds", "number - how long to wait")],
    },
    ActionSpec {
        name: "goTo",
        description: "Walk to a coordinate",
        parameters: &[("x", "number"), ("y", "number"), ("z", "number")],
    },
    ActionSpec {
        name: "stopMoving",
        description: "Stop moving or following",
        parameters: &[],
    },
    ActionSpec {
        name: "jump",
        description: "Jump once",
        parameters: &[],
    },
    ActionSpec {
        name: "lookAt",
        description: "Look at a coordinate",
        parameters: &[("x", "number"), ("y", "number"), ("z", "number")],
    },
    ActionSpec {
        name: "followPlayer",
        description: "Follow a player until stopMoving",
        parameters: &[("playerName", "string - player to follow")],
    },
    ActionSpec {
        name: "attack",
        description: "Attack the nearest entity of a type once",
        parameters: &[("entityType", "string - e.g. zombie, skeleton, pig")],
    },
    ActionSpec {
        name: "collectBlock",
        description: "Mine and collect the nearest block of a type",
        parameters: &[("blockType", "string - e.g. oak_log, stone")],
    },
    ActionSpec {
        name: "placeBlock",
        description: "Place a block at a coordinate",
        parameters: &[
            ("blockName", "string"),
            ("x", "number"),
            ("y", "number"),
            ("z", "number"),
        ],
    },
    ActionSpec {
        name: "equipItem",
        description: "Equip an item into the hand",
        parameters: &[("itemName", "string - e.g. diamond_sword")],
    },
    ActionSpec {
        name: "dropItem",
        description: "Drop an item",
        parameters: &[
            ("itemName", "string"),
            ("count", "number - optional, defaults to all"),
        ],
    },
    ActionSpec {
        name: "eat",
        description: "Eat food to restore hunger",
        parameters: &[("foodName", "string - optional, auto-picks if absent")],
    },
    ActionSpec {
        name: "useItem",
        description: "Use the held item (bow, potion, pearl, ...)",
        parameters: &[],
    },
    ActionSpec {
        name: "activateBlock",
        description: "Right-click a block (door, button, lever, bed, ...)",
        parameters: &[("x", "number"), ("y", "number"), ("z", "number")],
    },
    ActionSpec {
        name: "viewInventory",
        description: "List inventory contents",
        parameters: &[],
    },
    ActionSpec {
        name: "findBlock",
        description: "Find the nearest block of a type",
        parameters: &[
            ("blockType", "string"),
            ("maxDistance", "number - optional, defaults to 32"),
        ],
    },
    ActionSpec {
        name: "scanEntities",
        description: "Scan nearby entities",
        parameters: &[
            ("range", "number - optional, defaults to 16"),
            ("entityType", "string - optional filter"),
        ],
    },
    ActionSpec {
        name: SCRIPT_ACTION,
        description: "Run a bot script for multi-step tasks; see the script \
                      reference in the system prompt",
        parameters: &[
            ("script", "string - script source"),
            ("description", "string - what the script does"),
            ("timeout", "number - seconds, defaults to 300"),
        ],
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_round_trips_open_payload_at_top_level() {
        let raw = r#"{"success":true,"message":"found","found":true,"distance":4.5}"#;
        let res: ActionResult = serde_json::from_str(raw).unwrap();
        assert!(res.success);
        assert_eq!(res.data.get("found"), Some(&Value::Bool(true)));

        let back = serde_json::to_value(&res).unwrap();
        assert_eq!(back.get("found"), Some(&Value::Bool(true)));
        assert!(back.get("data").is_none());
    }

    #[test]
    fn catalog_contains_script_action() {
        assert!(ACTIONS.iter().any(|a| a.name == SCRIPT_ACTION));
    }
}
