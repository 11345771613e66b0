use serde_json::json;

use super::action::{ACTIONS, ActionResult};
use super::observation::Observation;
use super::skills::SkillSpec;

/// Prompt assembly knobs. Persona text is configuration, not core logic;
/// the default keeps the structural contract intact without any character
/// flavor.
#[derive(Debug, Clone)]
pub struct PromptConfig {
    pub persona: String,
    pub response_contract: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            persona: "You are a survivor in a Minecraft world. Stay alive, react to chat, \
                      and help players when asked."
                .to_string(),
            response_contract: "Respond with a single JSON object and nothing else:\n\
                                {\n  \"thought\": \"short reasoning\",\n  \"action\": \"action name\",\n  \"parameters\": { }\n}\n\
                                Any output outside the JSON cannot be understood."
                .to_string(),
        }
    }
}

fn action_catalog() -> String {
    let mut lines = Vec::new();
    for spec in ACTIONS {
        lines.push(format!("  - {}: {}", spec.name, spec.description));
        let params = if spec.parameters.is_empty() {
            "none".to_string()
        } else {
            spec.parameters
                .iter()
                .map(|(k, v)| format!("{k}: {v}"))
                .collect::<Vec<_>>()
                .join(", ")
        };
        lines.push(format!("    Parameters: {params}"));
    }
    lines.join("\n")
}

fn skill_catalog(skills: &[SkillSpec]) -> String {
    if skills.is_empty() {
        return "  (no skills installed)".to_string();
    }
    skills
        .iter()
        .map(|s| {
            let params = s
                .parameters
                .iter()
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            format!("  - {} ({}): {}", s.name, params, s.description)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

const SCRIPT_REFERENCE: &str = r#"Scripts are small command programs:

main:
    let spot = find_block block="oak_log" range=32
    if spot.found:
        go_to x=spot.position.x y=spot.position.y z=spot.position.z
        collect_block block="oak_log"
    else:
        chat message="no trees nearby"
    end
    return "done"
end

Statements: let NAME = <call>, bare calls, if/else/end, repeat N:/end,
return, # comments. Calls take key=value arguments; values are literals or
dotted paths into earlier results.
Ops: go_to, follow_player, stop_moving, jump, look_at, attack,
collect_block, place_block, equip_item, drop_item, eat, use_item,
activate_block, view_inventory, find_block, scan_entities, get_block_at,
get_position, get_health, chat, wait, log, use_skill.
Prefer use_skill name="..." for anything the skill library already covers."#;

/// Builds the system prompt: persona, capabilities, response contract, and a
/// compact snapshot of the bot's own state.
pub fn build_system_prompt(cfg: &PromptConfig, obs: &Observation, skills: &[SkillSpec]) -> String {
    let state = json!({
        "position": obs.position,
        "health": obs.health,
        "time": obs.time,
    });
    let state_json = serde_json::to_string_pretty(&state).unwrap_or_else(|_| "{}".to_string());

    format!(
        "{persona}\n\n# Actions\n{actions}\n\n# Scripts\n{script_ref}\n\n# Skills\n{skills}\n\n# Response format\n{contract}\n\n# Current state\n{state_json}\n",
        persona = cfg.persona,
        actions = action_catalog(),
        script_ref = SCRIPT_REFERENCE,
        skills = skill_catalog(skills),
        contract = cfg.response_contract,
    )
}

/// Renders the observation as the user message, teletype style. Caps keep
/// the prompt stable when the world is busy.
pub fn format_observation(obs: &Observation) -> String {
    let mut lines = vec!["Current observation:".to_string()];

    if let Some(pos) = &obs.position {
        lines.push(format!(
            "Position: ({:.1}, {:.1}, {:.1})",
            pos.x, pos.y, pos.z
        ));
    }
    if let Some(h) = &obs.health {
        lines.push(format!("Health: {}/20, Food: {}/20", h.health, h.food));
    }
    if !obs.nearby_entities.is_empty() {
        lines.push("Nearby entities:".to_string());
        for e in obs.nearby_entities.iter().take(5) {
            let kind = e.kind.as_deref().unwrap_or("?");
            let dist = e
                .distance
                .map(|d| format!(" {d:.1}m away"))
                .unwrap_or_default();
            lines.push(format!("  - {} ({kind}){dist}", e.name));
        }
    }
    if !obs.inventory.is_empty() {
        let items = obs
            .inventory
            .iter()
            .take(10)
            .map(|i| format!("{}x{}", i.name, i.count))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("Inventory: {items}"));
    }
    if !obs.chat_messages.is_empty() {
        lines.push("Recent chat messages:".to_string());
        let skip = obs.chat_messages.len().saturating_sub(5);
        for m in obs.chat_messages.iter().skip(skip) {
            lines.push(format!("  <{}> {}", m.username, m.message));
        }
    }
    if !obs.events.is_empty() {
        let skip = obs.events.len().saturating_sub(3);
        lines.push(format!(
            "Recent events: {}",
            obs.events[skip..].join(", ")
        ));
    }

    lines.join("\n")
}

/// User message = rendered observation plus the previous action's outcome,
/// so the model can self-correct across cycles.
pub fn build_user_message(obs: &Observation, last_result: Option<&ActionResult>) -> String {
    let mut msg = format_observation(obs);
    if let Some(res) = last_result {
        let tag = if res.success { "ok" } else { "failed" };
        msg.push_str(&format!(
            "\nLast action result ({tag}): {}",
            res.message
        ));
    }
    msg
}
