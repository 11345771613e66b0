use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Health and hunger as the gateway reports them (both on a 0..=20 scale).
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct Health {
    pub health: f64,
    pub food: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct EntitySummary {
    pub name: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub position: Option<Position>,
    #[serde(default)]
    pub distance: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct InventoryItem {
    pub name: String,
    pub count: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ChatMessage {
    pub username: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GameTime {
    pub time_of_day: u32,
    pub is_day: bool,
}

/// One frame of world state as produced by the gateway.
///
/// Field names follow the gateway's JSON (camelCase). The core never mutates
/// an observation except to merge in chat that arrived between ticks.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    #[serde(default)]
    pub position: Option<Position>,
    #[serde(default)]
    pub health: Option<Health>,
    #[serde(default)]
    pub nearby_entities: Vec<EntitySummary>,
    #[serde(default)]
    pub inventory: Vec<InventoryItem>,
    #[serde(default)]
    pub chat_messages: Vec<ChatMessage>,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub time: Option<GameTime>,
}

impl Observation {
    pub fn has_chat(&self) -> bool {
        !self.chat_messages.is_empty()
    }

    pub fn has_events(&self) -> bool {
        !self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_gateway_camel_case_fields() {
        let raw = r#"{
            "position": {"x": 1.0, "y": 64.0, "z": -3.5},
            "health": {"health": 18.0, "food": 20.0},
            "nearbyEntities": [{"name": "zombie", "kind": "hostile", "distance": 6.2}],
            "inventory": [{"name": "oak_log", "count": 12}],
            "chatMessages": [{"username": "steve", "message": "hi"}],
            "events": ["took_damage: Bot took damage"]
        }"#;
        let obs: Observation = serde_json::from_str(raw).unwrap();
        assert_eq!(obs.nearby_entities.len(), 1);
        assert_eq!(obs.inventory[0].count, 12);
        assert!(obs.has_chat());
        assert!(obs.has_events());
        assert_eq!(obs.chat_messages[0].username, "steve");
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let obs: Observation = serde_json::from_str("{}").unwrap();
        assert!(obs.position.is_none());
        assert!(!obs.has_chat());
        assert!(!obs.has_events());
    }
}
