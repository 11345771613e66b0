use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use mcbot_core::agent::skills::{Skill, SkillParam, SkillSpec};

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub skills: Vec<SkillEntry>,
}

#[derive(Debug, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_tick_secs")]
    pub tick_secs: f64,
    /// Optional persona paragraph prepended to the system prompt.
    #[serde(default)]
    pub persona: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_addr")]
    pub addr: String,
    #[serde(default = "default_event_addr")]
    pub event_addr: String,
}

#[derive(Debug, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the API key; the key itself
    /// never lives in the config file.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

#[derive(Debug, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_control_listen")]
    pub listen: String,
}

/// One skill in the config file; body is a sandbox program.
#[derive(Debug, Deserialize)]
pub struct SkillEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<String>,
    pub body: String,
}

impl SkillEntry {
    pub fn into_skill(self) -> Skill {
        Skill {
            spec: SkillSpec {
                name: self.name,
                description: self.description,
                parameters: self
                    .parameters
                    .into_iter()
                    .map(|name| SkillParam {
                        name,
                        description: String::new(),
                    })
                    .collect(),
            },
            body: self.body,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            persona: None,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            addr: default_gateway_addr(),
            event_addr: default_event_addr(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            listen: default_control_listen(),
        }
    }
}

fn default_tick_secs() -> f64 {
    3.0
}

fn default_gateway_addr() -> String {
    "127.0.0.1:3100".to_string()
}

fn default_event_addr() -> String {
    "127.0.0.1:3101".to_string()
}

fn default_llm_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_api_key_env() -> String {
    "MCBOT_LLM_API_KEY".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_control_listen() -> String {
    "127.0.0.1:3200".to_string()
}

impl Config {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(self.agent.tick_secs.max(0.1))
    }

    /// Loads `config.toml`.
    ///
    /// Search order:
    /// 1) `MCBOT_CONFIG_DIR/<relative_path>`
    /// 2) `./<relative_path>`
    /// 3) `<repo_root>/config/<relative_path>`
    ///
    /// A missing file yields the defaults (model name aside, everything has
    /// a workable default for local development).
    pub fn load(relative_path: &str) -> anyhow::Result<Config> {
        match Self::resolve_path(relative_path) {
            Some(path) => {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read config at {}", path.display()))?;
                Self::parse(&text)
            }
            None => Ok(Self::parse("")?),
        }
    }

    pub fn parse(text: &str) -> anyhow::Result<Config> {
        toml::from_str(text).context("failed to parse config TOML")
    }

    fn resolve_path(relative_path: &str) -> Option<PathBuf> {
        let rel = Path::new(relative_path);

        if let Some(root) = env::var_os("MCBOT_CONFIG_DIR") {
            let candidate = PathBuf::from(root).join(rel);
            if candidate.is_file() {
                return Some(candidate);
            }
        }

        if let Ok(cwd) = env::current_dir() {
            let candidate = cwd.join(rel);
            if candidate.is_file() {
                return Some(candidate);
            }
        }

        // Repo convenience: <repo_root>/config/<relative_path>; this crate
        // lives at <repo_root>/crates/runner.
        let candidate = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .ancestors()
            .nth(2)?
            .join("config")
            .join(rel);
        candidate.is_file().then_some(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = Config::parse("").unwrap();
        assert_eq!(cfg.agent.tick_secs, 3.0);
        assert_eq!(cfg.control.listen, "127.0.0.1:3200");
        assert!(cfg.skills.is_empty());
    }

    #[test]
    fn skills_parse_into_registry_entries() {
        let cfg = Config::parse(
            r#"
[llm]
model = "test-model"

[[skills]]
name = "gather_wood"
description = "chop the nearest logs"
parameters = ["count"]
body = """
main:
    collect_block block="oak_log"
end
"""
"#,
        )
        .unwrap();
        assert_eq!(cfg.skills.len(), 1);
        let skill = cfg.skills.into_iter().next().unwrap().into_skill();
        assert_eq!(skill.spec.name, "gather_wood");
        assert_eq!(skill.spec.parameters[0].name, "count");
        assert!(skill.body.contains("collect_block"));
    }

    #[test]
    fn tick_interval_has_a_floor() {
        let cfg = Config::parse("[agent]\ntick_secs = 0.0\n").unwrap();
        assert_eq!(cfg.tick_interval(), Duration::from_millis(100));
    }
}
