//! The agent engine: one perceive-decide-act cycle on a fixed period.
//!
//! Nothing in the tick path is allowed to kill the loop. Connectivity
//! problems skip the tick silently, malformed model output is fed back as a
//! failed action result so the model can correct itself, and any other
//! failure is absorbed into `last_action_result` and logged with a cap on
//! repeated identical messages.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::llm::LlmClient;

use super::action::{ActionResult, SCRIPT_ACTION};
use super::commands::CommandDispatcher;
use super::gateway::Gateway;
use super::observation::ChatMessage;
use super::prompt::{PromptConfig, build_system_prompt, build_user_message};
use super::script::{ScriptResult, ScriptSandbox};
use super::skills::SkillRegistry;
use super::wire::{Decision, parse_decision};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub tick_interval: Duration,
    pub prompt: PromptConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(3),
            prompt: PromptConfig::default(),
        }
    }
}

/// State shared between the tick loop and the command dispatcher. One lock,
/// never held across an await.
#[derive(Debug, Default)]
pub struct SharedState {
    pub skill_testing: bool,
    pub pending_chat: Vec<ChatMessage>,
    pub last_decision: Option<Decision>,
    pub last_action_result: Option<ActionResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub is_running: bool,
    pub skill_testing: bool,
    pub last_decision: Option<Decision>,
    pub last_action_result: Option<ActionResult>,
    pub pending_chat_count: usize,
}

#[derive(Debug, Default)]
struct ErrorStreak {
    last: Option<String>,
    count: u32,
}

pub struct Engine {
    gateway: Arc<dyn Gateway>,
    llm: Arc<dyn LlmClient>,
    skills: Arc<dyn SkillRegistry>,
    sandbox: Arc<ScriptSandbox>,
    config: EngineConfig,
    shared: Arc<StdMutex<SharedState>>,
    running: AtomicBool,
    loop_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    error_streak: StdMutex<ErrorStreak>,
    /// Handle to ourselves for the loop task; set once in [`Engine::new`].
    self_ref: std::sync::Weak<Engine>,
}

impl Engine {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        llm: Arc<dyn LlmClient>,
        skills: Arc<dyn SkillRegistry>,
        config: EngineConfig,
    ) -> Arc<Self> {
        let sandbox = Arc::new(ScriptSandbox::new(gateway.clone(), skills.clone()));
        Arc::new_cyclic(|self_ref| Self {
            gateway,
            llm,
            skills,
            sandbox,
            config,
            shared: Arc::new(StdMutex::new(SharedState::default())),
            running: AtomicBool::new(false),
            loop_task: tokio::sync::Mutex::new(None),
            error_streak: StdMutex::new(ErrorStreak::default()),
            self_ref: self_ref.clone(),
        })
    }

    pub fn sandbox(&self) -> Arc<ScriptSandbox> {
        self.sandbox.clone()
    }

    /// Builds a dispatcher wired to this engine's shared state and sandbox.
    pub fn command_dispatcher(&self) -> CommandDispatcher {
        CommandDispatcher::new(
            self.gateway.clone(),
            self.skills.clone(),
            self.sandbox.clone(),
            self.shared.clone(),
        )
    }

    /// Starts the periodic loop. A second call while the loop is alive is a
    /// no-op and spawns nothing.
    pub async fn start(&self) {
        let mut guard = self.loop_task.lock().await;
        if guard.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            debug!("agent loop already running");
            return;
        }
        let Some(engine) = self.self_ref.upgrade() else {
            return;
        };

        info!(interval = ?self.config.tick_interval, "starting agent loop");
        self.running.store(true, Ordering::SeqCst);

        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.config.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                engine.tick().await;
            }
        }));
    }

    /// Stops the loop and waits for any in-flight tick to unwind. Safe to
    /// call when already stopped.
    pub async fn stop(&self) {
        let mut guard = self.loop_task.lock().await;
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = guard.take() {
            info!("stopping agent loop");
            handle.abort();
            let _ = handle.await;
        }
    }

    /// Runs one cycle immediately without disturbing the periodic schedule.
    pub async fn force_tick(&self) {
        self.tick().await;
    }

    pub fn status(&self) -> EngineStatus {
        let shared = self.shared.lock().expect("engine state lock poisoned");
        EngineStatus {
            is_running: self.running.load(Ordering::SeqCst),
            skill_testing: shared.skill_testing,
            last_decision: shared.last_decision.clone(),
            last_action_result: shared.last_action_result.clone(),
            pending_chat_count: shared.pending_chat.len(),
        }
    }

    /// One perceive-decide-act cycle. Never returns an error: everything is
    /// absorbed here so the loop can keep going indefinitely.
    pub async fn tick(&self) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        if self
            .shared
            .lock()
            .expect("engine state lock poisoned")
            .skill_testing
        {
            return;
        }

        // Connectivity gate: a gateway that is down or unreachable is not an
        // error, the loop just waits for it to come back.
        match self.gateway.status().await {
            Ok(status) if status.connected => {}
            _ => return,
        }

        match self.decide_and_act().await {
            Ok(()) => {
                let mut streak = self.error_streak.lock().expect("streak lock poisoned");
                *streak = ErrorStreak::default();
            }
            Err(e) => {
                let msg = format!("{e:#}");
                self.report_tick_error(&msg);
                self.shared
                    .lock()
                    .expect("engine state lock poisoned")
                    .last_action_result = Some(ActionResult::failure(msg));
            }
        }
    }

    async fn decide_and_act(&self) -> anyhow::Result<()> {
        let mut obs = self.gateway.observe().await?;

        // Drain chat that arrived between ticks into this observation.
        let last_result;
        {
            let mut shared = self.shared.lock().expect("engine state lock poisoned");
            obs.chat_messages.append(&mut shared.pending_chat);
            last_result = shared.last_action_result.clone();
        }

        // Idle suppression: nothing new and the last decision was to wait,
        // so a model call would only produce another wait.
        if !obs.has_chat() && !obs.has_events() && self.last_action_was_wait() {
            return Ok(());
        }

        let skills = self.skills.list();
        let system_prompt = build_system_prompt(&self.config.prompt, &obs, &skills);
        let user_message = build_user_message(&obs, last_result.as_ref());

        debug!("requesting decision");
        let raw = self.llm.complete(system_prompt, user_message).await?;

        let decision = match parse_decision(&raw) {
            Ok(d) => d,
            Err(e) => {
                warn!("unparsable model response: {e}");
                self.shared
                    .lock()
                    .expect("engine state lock poisoned")
                    .last_action_result = Some(ActionResult::failure(
                    "Could not parse your response. Respond with a single JSON object: \
                     {\"thought\": ..., \"action\": ..., \"parameters\": {...}}",
                ));
                return Ok(());
            }
        };

        let Some(action) = decision.action.clone() else {
            debug!("decision carried no action");
            return Ok(());
        };

        info!(
            action = %action,
            thought = decision.thought.as_deref().unwrap_or("-"),
            "executing decision"
        );

        let parameters = decision.parameters.clone();
        self.shared
            .lock()
            .expect("engine state lock poisoned")
            .last_decision = Some(decision);

        let result = if action == SCRIPT_ACTION {
            self.run_decision_script(&parameters).await
        } else {
            self.gateway.execute_action(&action, parameters).await?
        };

        debug!(success = result.success, "action result: {}", result.message);
        self.shared
            .lock()
            .expect("engine state lock poisoned")
            .last_action_result = Some(result);
        Ok(())
    }

    async fn run_decision_script(
        &self,
        parameters: &serde_json::Map<String, Value>,
    ) -> ActionResult {
        let script = parameters
            .get("script")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if script.is_empty() {
            return ActionResult::failure("No script provided");
        }
        let description = parameters
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("Unnamed script");
        let timeout = parameters
            .get("timeout")
            .and_then(Value::as_f64)
            .map(Duration::from_secs_f64);

        info!("executing script: {description}");
        let res = self.sandbox.execute(script, timeout).await;
        summarize_script(&res)
    }

    fn last_action_was_wait(&self) -> bool {
        self.shared
            .lock()
            .expect("engine state lock poisoned")
            .last_decision
            .as_ref()
            .and_then(|d| d.action.as_deref())
            == Some("wait")
    }

    /// Full detail for the first few identical failures, then one
    /// suppression notice. The schedule itself is never affected.
    fn report_tick_error(&self, msg: &str) {
        let mut streak = self.error_streak.lock().expect("streak lock poisoned");
        if streak.last.as_deref() == Some(msg) {
            streak.count += 1;
        } else {
            streak.last = Some(msg.to_string());
            streak.count = 1;
        }
        if streak.count <= 3 {
            warn!("tick failed: {msg}");
        } else if streak.count == 4 {
            warn!("further identical tick failures will not be logged");
        }
    }
}

/// Folds a script run into the ActionResult shape the next prompt sees.
fn summarize_script(res: &ScriptResult) -> ActionResult {
    if !res.success() {
        let error = res
            .error_message()
            .unwrap_or_else(|| "Unknown error".to_string());
        let mut out = ActionResult::failure(format!("Script failed: {error}"));
        out.logs = res.logs.clone();
        out.actions = res.actions.clone();
        return out;
    }

    let count = res.action_count();
    let message = if let Some(value) = res.result_value() {
        format!("Script result: {value}")
    } else if count == 0 {
        "Executed 0 actions: No actions executed".to_string()
    } else {
        let shown = res.actions.iter().rev().take(5).rev();
        let mut parts = Vec::new();
        for trace in shown {
            let mark = if trace.result.success { "✓" } else { "✗" };
            let msg: String = trace.result.message.chars().take(50).collect();
            parts.push(format!("{mark}{}: {msg}", trace.action));
        }
        let mut summary = parts.join("; ");
        if count > 5 {
            summary = format!("...and {} more; {summary}", count - 5);
        }
        format!("Executed {count} actions: {summary}")
    };

    let mut out = ActionResult::ok(message);
    out.logs = res.logs.clone();
    out.actions = res.actions.clone();
    out.data.insert("action_count".to_string(), json!(count));
    out.data.insert(
        "execution_time".to_string(),
        json!(res.execution_time.as_secs_f64()),
    );
    out
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use serde_json::Map;

    use super::*;
    use crate::agent::action::ActionTrace;
    use crate::agent::gateway::GatewayStatus;
    use crate::agent::observation::Observation;
    use crate::agent::skills::StaticSkillRegistry;

    #[derive(Default)]
    struct FakeGateway {
        connected: std::sync::atomic::AtomicBool,
        status_calls: AtomicUsize,
        observations: Mutex<VecDeque<Observation>>,
        executed: Mutex<Vec<(String, Map<String, Value>)>>,
    }

    impl FakeGateway {
        fn online() -> Self {
            let gw = Self::default();
            gw.connected.store(true, Ordering::SeqCst);
            gw
        }

        fn push_observation(&self, obs: Observation) {
            self.observations.lock().unwrap().push_back(obs);
        }

        fn executed(&self) -> Vec<(String, Map<String, Value>)> {
            self.executed.lock().unwrap().clone()
        }
    }

    impl Gateway for FakeGateway {
        fn status<'a>(
            &'a self,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<GatewayStatus>> + Send + 'a>> {
            Box::pin(async {
                self.status_calls.fetch_add(1, Ordering::SeqCst);
                Ok(GatewayStatus {
                    connected: self.connected.load(Ordering::SeqCst),
                    username: None,
                })
            })
        }

        fn observe<'a>(
            &'a self,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<Observation>> + Send + 'a>> {
            Box::pin(async {
                Ok(self
                    .observations
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or_default())
            })
        }

        fn execute_action<'a>(
            &'a self,
            action: &'a str,
            parameters: Map<String, Value>,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<ActionResult>> + Send + 'a>> {
            Box::pin(async move {
                self.executed
                    .lock()
                    .unwrap()
                    .push((action.to_string(), parameters));
                Ok(ActionResult::ok(format!("{action} done")))
            })
        }

        fn connect<'a>(
            &'a self,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<GatewayStatus>> + Send + 'a>> {
            self.status()
        }

        fn disconnect<'a>(
            &'a self,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<GatewayStatus>> + Send + 'a>> {
            self.status()
        }
    }

    #[derive(Default)]
    struct FakeLlm {
        responses: Mutex<VecDeque<String>>,
        prompts: Mutex<Vec<(String, String)>>,
    }

    impl FakeLlm {
        fn push_response(&self, raw: impl Into<String>) {
            self.responses.lock().unwrap().push_back(raw.into());
        }

        fn prompt_count(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }

        fn prompts(&self) -> Vec<(String, String)> {
            self.prompts.lock().unwrap().clone()
        }
    }

    impl LlmClient for FakeLlm {
        fn complete<'a>(
            &'a self,
            system_prompt: String,
            user_message: String,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
            Box::pin(async move {
                self.prompts
                    .lock()
                    .unwrap()
                    .push((system_prompt, user_message));
                self.responses
                    .lock()
                    .unwrap()
                    .pop_front()
                    .ok_or_else(|| anyhow::anyhow!("no llm response queued"))
            })
        }
    }

    fn engine_with(gw: Arc<FakeGateway>, llm: Arc<FakeLlm>) -> Arc<Engine> {
        Engine::new(
            gw,
            llm,
            Arc::new(StaticSkillRegistry::default()),
            EngineConfig {
                tick_interval: Duration::from_secs(10),
                prompt: PromptConfig::default(),
            },
        )
    }

    fn wait_decision() -> &'static str {
        r#"{"thought":"quiet","action":"wait","parameters":{"seconds":2}}"#
    }

    #[tokio::test]
    async fn disconnected_gateway_skips_decision_and_action() {
        let gw = Arc::new(FakeGateway::default());
        let llm = Arc::new(FakeLlm::default());
        let engine = engine_with(gw.clone(), llm.clone());

        engine.start().await;
        engine.force_tick().await;
        engine.stop().await;

        assert!(gw.status_calls.load(Ordering::SeqCst) > 0);
        assert_eq!(llm.prompt_count(), 0);
        assert!(gw.executed().is_empty());
    }

    #[tokio::test]
    async fn tick_is_a_noop_when_not_started() {
        let gw = Arc::new(FakeGateway::online());
        let llm = Arc::new(FakeLlm::default());
        let engine = engine_with(gw.clone(), llm.clone());

        engine.force_tick().await;
        assert_eq!(llm.prompt_count(), 0);
    }

    #[tokio::test]
    async fn idle_suppression_skips_the_second_model_call() {
        let gw = Arc::new(FakeGateway::online());
        let llm = Arc::new(FakeLlm::default());
        let engine = engine_with(gw.clone(), llm.clone());
        llm.push_response(wait_decision());

        engine.start().await;
        // The loop's first interval tick fires immediately; give it a moment.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(llm.prompt_count(), 1);

        // Nothing new in the world and the last decision was "wait".
        engine.force_tick().await;
        engine.force_tick().await;
        assert_eq!(llm.prompt_count(), 1);

        engine.stop().await;
    }

    #[tokio::test]
    async fn chat_breaks_idle_suppression_and_reaches_the_prompt() {
        let gw = Arc::new(FakeGateway::online());
        let llm = Arc::new(FakeLlm::default());
        let engine = engine_with(gw.clone(), llm.clone());
        llm.push_response(wait_decision());
        llm.push_response(wait_decision());

        engine.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(llm.prompt_count(), 1);

        engine
            .shared
            .lock()
            .unwrap()
            .pending_chat
            .push(ChatMessage {
                username: "steve".to_string(),
                message: "hello bot".to_string(),
            });
        engine.force_tick().await;
        assert_eq!(llm.prompt_count(), 2);
        let (_, user) = &llm.prompts()[1];
        assert!(user.contains("<steve> hello bot"));

        // Queue drained exactly once.
        assert_eq!(engine.status().pending_chat_count, 0);
        engine.stop().await;
    }

    #[tokio::test]
    async fn unparsable_response_feeds_format_reminder_back() {
        let gw = Arc::new(FakeGateway::online());
        let llm = Arc::new(FakeLlm::default());
        let engine = engine_with(gw.clone(), llm.clone());
        llm.push_response("I shall ponder the horizon.");
        llm.push_response(wait_decision());

        engine.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let status = engine.status();
        let last = status.last_action_result.expect("result recorded");
        assert!(!last.success);
        assert!(last.message.contains("single JSON object"));

        // Next tick carries the failure into the user message.
        engine.force_tick().await;
        let (_, user) = llm.prompts().last().cloned().unwrap();
        assert!(user.contains("Last action result (failed)"));
        engine.stop().await;
    }

    #[tokio::test]
    async fn decision_without_action_executes_nothing() {
        let gw = Arc::new(FakeGateway::online());
        let llm = Arc::new(FakeLlm::default());
        let engine = engine_with(gw.clone(), llm.clone());
        llm.push_response(r#"{"thought":"just watching"}"#);

        engine.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.stop().await;

        assert!(gw.executed().is_empty());
        assert!(engine.status().last_action_result.is_none());
    }

    #[tokio::test]
    async fn plain_actions_forward_verbatim_to_the_gateway() {
        let gw = Arc::new(FakeGateway::online());
        let llm = Arc::new(FakeLlm::default());
        let engine = engine_with(gw.clone(), llm.clone());
        llm.push_response(
            r#"{"thought":"say hi","action":"chat","parameters":{"message":"hello!"}}"#,
        );

        engine.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.stop().await;

        let executed = gw.executed();
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].0, "chat");
        assert_eq!(executed[0].1.get("message"), Some(&json!("hello!")));
    }

    #[tokio::test]
    async fn script_decision_routes_through_the_sandbox() {
        let gw = Arc::new(FakeGateway::online());
        let llm = Arc::new(FakeLlm::default());
        let engine = engine_with(gw.clone(), llm.clone());
        llm.push_response(
            r#"{"thought":"hop","action":"executeScript","parameters":{"script":"main:\n    jump\n    jump\nend\n","description":"two hops"}}"#,
        );

        engine.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.stop().await;

        let executed = gw.executed();
        assert_eq!(executed.len(), 2);
        assert!(executed.iter().all(|(a, _)| a == "jump"));

        let last = engine.status().last_action_result.unwrap();
        assert!(last.success);
        assert!(last.message.starts_with("Executed 2 actions"));
        assert_eq!(last.actions.len(), 2);
    }

    #[tokio::test]
    async fn start_twice_spawns_one_loop_and_stop_twice_is_quiet() {
        let gw = Arc::new(FakeGateway::online());
        let llm = Arc::new(FakeLlm::default());
        let engine = engine_with(gw.clone(), llm.clone());
        llm.push_response(wait_decision());
        llm.push_response(wait_decision());

        engine.start().await;
        engine.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        // One immediate tick, not two: the second start was a no-op.
        assert_eq!(llm.prompt_count(), 1);
        assert!(engine.status().is_running);

        engine.stop().await;
        engine.stop().await;
        assert!(!engine.status().is_running);
    }

    #[tokio::test]
    async fn skill_testing_pauses_the_decision_path() {
        let gw = Arc::new(FakeGateway::online());
        let llm = Arc::new(FakeLlm::default());
        let engine = engine_with(gw.clone(), llm.clone());

        engine.shared.lock().unwrap().skill_testing = true;
        engine.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.force_tick().await;
        engine.stop().await;

        assert_eq!(llm.prompt_count(), 0);
        assert!(gw.executed().is_empty());
    }

    #[test]
    fn script_summary_shows_last_five_with_overflow_marker() {
        let actions: Vec<ActionTrace> = (0..7)
            .map(|i| ActionTrace {
                action: format!("a{i}"),
                result: ActionResult::ok(format!("m{i}")),
            })
            .collect();
        let res = ScriptResult {
            outcome: crate::agent::script::ScriptOutcome::Completed {
                result: Value::Null,
            },
            logs: vec![],
            actions,
            execution_time: Duration::from_millis(10),
        };
        let out = summarize_script(&res);
        assert!(out.success);
        assert!(out.message.contains("Executed 7 actions"));
        assert!(out.message.contains("...and 2 more;"));
        assert!(out.message.contains("✓a6: m6"));
        assert!(!out.message.contains("a1:"));
    }

    #[test]
    fn script_summary_prefers_the_return_value() {
        let res = ScriptResult {
            outcome: crate::agent::script::ScriptOutcome::Completed {
                result: json!("mined 3 diamonds"),
            },
            logs: vec![],
            actions: vec![],
            execution_time: Duration::ZERO,
        };
        let out = summarize_script(&res);
        assert_eq!(out.message, "Script result: \"mined 3 diamonds\"");
    }
}
