//! Chat-driven control commands.
//!
//! `%test` runs one skill interactively while the autonomous loop is held
//! off; `%stop` cancels it. Everything that is not a `%` command is queued
//! for the next tick's observation. The mutual exclusion exists so a
//! human-driven skill test never races the decision loop over the same
//! body.

use std::sync::{Arc, Mutex as StdMutex};

use serde_json::{Map, Value, json};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::engine::SharedState;
use super::gateway::{Gateway, GatewayEvent};
use super::observation::ChatMessage;
use super::script::{ScriptOutcome, ScriptResult, ScriptSandbox};
use super::skills::SkillRegistry;

const USAGE: &str = "Commands: %test <skill>(key=value, ...) runs a skill test, \
                     %stop cancels it, %skills lists skills, %help shows this.";

/// One live skill test. At most one exists at a time.
struct TestSession {
    skill_name: String,
    cancelled: bool,
    handle: JoinHandle<()>,
}

pub struct CommandDispatcher {
    gateway: Arc<dyn Gateway>,
    skills: Arc<dyn SkillRegistry>,
    sandbox: Arc<ScriptSandbox>,
    shared: Arc<StdMutex<SharedState>>,
    session: Arc<StdMutex<Option<TestSession>>>,
}

impl CommandDispatcher {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        skills: Arc<dyn SkillRegistry>,
        sandbox: Arc<ScriptSandbox>,
        shared: Arc<StdMutex<SharedState>>,
    ) -> Self {
        Self {
            gateway,
            skills,
            sandbox,
            shared,
            session: Arc::new(StdMutex::new(None)),
        }
    }

    pub async fn handle_event(&self, event: GatewayEvent) {
        match event {
            GatewayEvent::Chat { username, message } => self.handle_chat(&username, &message).await,
        }
    }

    pub async fn handle_chat(&self, username: &str, message: &str) {
        let trimmed = message.trim();
        if !trimmed.starts_with('%') {
            self.shared
                .lock()
                .expect("shared state lock poisoned")
                .pending_chat
                .push(ChatMessage {
                    username: username.to_string(),
                    message: message.to_string(),
                });
            return;
        }

        let (cmd, rest) = trimmed
            .split_once(char::is_whitespace)
            .unwrap_or((trimmed, ""));
        match cmd {
            "%help" => self.say(USAGE).await,
            "%skills" => self.say(&self.skill_listing()).await,
            "%stop" => self.stop_test().await,
            "%test" => self.start_test(rest).await,
            other => {
                self.say(&format!("Unknown command '{other}'; try %help"))
                    .await
            }
        }
    }

    /// Cancels all outstanding work. Called on shutdown so no test task
    /// outlives the process's orderly exit.
    pub async fn shutdown(&self) {
        let live = {
            let mut slot = self.session.lock().expect("session lock poisoned");
            slot.take()
        };
        if let Some(session) = live {
            session.handle.abort();
            self.shared
                .lock()
                .expect("shared state lock poisoned")
                .skill_testing = false;
        }
    }

    fn skill_listing(&self) -> String {
        let specs = self.skills.list();
        if specs.is_empty() {
            return "No skills installed.".to_string();
        }
        let entries = specs
            .iter()
            .map(|s| {
                let params = s
                    .parameters
                    .iter()
                    .map(|p| p.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{}({params})", s.name)
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("Skills: {entries}")
    }

    async fn start_test(&self, spec: &str) {
        let (name, args) = match parse_test_spec(spec) {
            Ok(parsed) => parsed,
            Err(reason) => {
                self.say(&reason).await;
                return;
            }
        };

        let busy = {
            let slot = self.session.lock().expect("session lock poisoned");
            slot.as_ref()
                .map(|s| !s.cancelled && !s.handle.is_finished())
                .unwrap_or(false)
        };
        if busy {
            self.say(&format!(
                "A skill test is already running; %stop it before starting '{name}'."
            ))
            .await;
            return;
        }

        let Some(skill) = self.skills.lookup(&name) else {
            let available = self
                .skills
                .list()
                .into_iter()
                .map(|s| s.name)
                .collect::<Vec<_>>()
                .join(", ");
            let available = if available.is_empty() {
                "(none)".to_string()
            } else {
                available
            };
            self.say(&format!("Unknown skill '{name}'. Available: {available}"))
                .await;
            return;
        };

        info!(skill = %name, "starting skill test");
        self.shared
            .lock()
            .expect("shared state lock poisoned")
            .skill_testing = true;

        let gateway = self.gateway.clone();
        let sandbox = self.sandbox.clone();
        let shared = self.shared.clone();
        let session_slot = self.session.clone();
        let skill_name = name.clone();
        let handle = tokio::spawn(async move {
            let res = sandbox.run_skill(&skill, args, None).await;
            let line = outcome_line(&skill_name, &res);

            shared
                .lock()
                .expect("shared state lock poisoned")
                .skill_testing = false;
            let was_cancelled = {
                let mut slot = session_slot.lock().expect("session lock poisoned");
                let cancelled = slot.as_ref().map(|s| s.cancelled).unwrap_or(false);
                *slot = None;
                cancelled
            };
            if !was_cancelled {
                info!(skill = %skill_name, "skill test finished: {line}");
                let mut params = Map::new();
                params.insert("message".to_string(), json!(line));
                if let Err(e) = gateway.execute_action("chat", params).await {
                    warn!("could not report skill test outcome: {e:#}");
                }
            }
        });

        *self.session.lock().expect("session lock poisoned") = Some(TestSession {
            skill_name: name,
            cancelled: false,
            handle,
        });
    }

    async fn stop_test(&self) {
        let active = {
            let mut slot = self.session.lock().expect("session lock poisoned");
            match slot.as_mut() {
                Some(s) if !s.handle.is_finished() => {
                    s.cancelled = true;
                    s.handle.abort();
                    let name = s.skill_name.clone();
                    *slot = None;
                    Some(name)
                }
                _ => {
                    *slot = None;
                    None
                }
            }
        };

        match active {
            Some(name) => {
                self.shared
                    .lock()
                    .expect("shared state lock poisoned")
                    .skill_testing = false;
                // Compensating action: whatever the skill had the body doing,
                // make sure it is not still walking somewhere.
                let _ = self.gateway.execute_action("stopMoving", Map::new()).await;
                info!(skill = %name, "skill test cancelled");
                self.say(&format!("Skill test '{name}' cancelled.")).await;
            }
            None => self.say("No skill test is running.").await,
        }
    }

    async fn say(&self, message: &str) {
        let mut params = Map::new();
        params.insert("message".to_string(), json!(message));
        if let Err(e) = self.gateway.execute_action("chat", params).await {
            warn!("chat reply failed: {e:#}");
        }
    }
}

fn outcome_line(name: &str, res: &ScriptResult) -> String {
    match &res.outcome {
        ScriptOutcome::Completed { .. } => match res.result_value() {
            Some(value) => format!("Skill '{name}' finished: {value}"),
            None => format!(
                "Skill '{name}' finished ok ({} actions).",
                res.action_count()
            ),
        },
        ScriptOutcome::SyntaxError { message } => {
            format!("Skill '{name}' failed: syntax error: {message}")
        }
        ScriptOutcome::RuntimeError { message, .. } => format!("Skill '{name}' failed: {message}"),
        ScriptOutcome::TimedOut { limit } => {
            format!("Skill '{name}' timed out after {}s.", limit.as_secs())
        }
    }
}

/// Parses `<skill>` or `<skill>(key=value, ...)`. Numeric values coerce to
/// integers or floats; quoted or bare words stay text.
fn parse_test_spec(spec: &str) -> Result<(String, Map<String, Value>), String> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err("Usage: %test <skill>(key=value, ...)".to_string());
    }

    let (name, arg_src) = match spec.find('(') {
        Some(idx) => {
            let tail = spec[idx + 1..].trim_end();
            let Some(inner) = tail.strip_suffix(')') else {
                return Err("Missing ')' in %test arguments.".to_string());
            };
            (spec[..idx].trim(), Some(inner))
        }
        None => (spec, None),
    };

    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(format!("'{spec}' is not a skill name."));
    }

    let mut args = Map::new();
    if let Some(src) = arg_src {
        for part in src.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let Some((key, raw)) = part.split_once('=') else {
                return Err(format!("Argument '{part}' is not key=value."));
            };
            args.insert(key.trim().to_string(), coerce_value(raw.trim()));
        }
    }

    Ok((name.to_string(), args))
}

fn coerce_value(raw: &str) -> Value {
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        return Value::String(raw[1..raw.len() - 1].to_string());
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Value::from(f);
    }
    Value::String(raw.to_string())
}
