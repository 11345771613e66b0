//! Sandboxed execution of model-written scripts.
//!
//! A script is parsed up front ([`program`]), then interpreted against the
//! enumerated capability surface ([`api`]) under a wall-clock timeout. The
//! trace and log storage live outside the interpreter future, so a timeout
//! or crash mid-program still yields everything recorded up to that point.

pub mod api;
pub mod program;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value, json};
use tokio::time::Instant;

use super::action::ActionTrace;
use super::gateway::Gateway;
use super::skills::{Skill, SkillRegistry};
use api::{Capabilities, ScriptOp, TraceLog};
use program::{Call, Expr, Program, Stmt};

pub const DEFAULT_SCRIPT_TIMEOUT: Duration = Duration::from_secs(300);

/// Hard bound on executed statements; keeps `repeat` bodies from spinning
/// a script forever inside its timeout window.
const MAX_STEPS: u32 = 10_000;
const MAX_SKILL_DEPTH: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptOutcome {
    Completed { result: Value },
    SyntaxError { message: String },
    RuntimeError { message: String, detail: String },
    TimedOut { limit: Duration },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptResult {
    pub outcome: ScriptOutcome,
    pub logs: Vec<String>,
    pub actions: Vec<ActionTrace>,
    pub execution_time: Duration,
}

impl ScriptResult {
    pub fn success(&self) -> bool {
        matches!(self.outcome, ScriptOutcome::Completed { .. })
    }

    pub fn action_count(&self) -> usize {
        self.actions.len()
    }

    pub fn result_value(&self) -> Option<&Value> {
        match &self.outcome {
            ScriptOutcome::Completed { result } if !result.is_null() => Some(result),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<String> {
        match &self.outcome {
            ScriptOutcome::Completed { .. } => None,
            ScriptOutcome::SyntaxError { message } => Some(format!("Syntax error: {message}")),
            ScriptOutcome::RuntimeError { message, .. } => {
                Some(format!("Execution error: {message}"))
            }
            ScriptOutcome::TimedOut { limit } => Some(format!(
                "Script execution timed out after {} seconds",
                limit.as_secs()
            )),
        }
    }

    /// Control-surface shape: flat object with `success`, `result`/`error`,
    /// logs, actions, and timing.
    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("success".to_string(), json!(self.success()));
        match &self.outcome {
            ScriptOutcome::Completed { result } => {
                obj.insert("result".to_string(), result.clone());
            }
            other => {
                if let Some(msg) = self.error_message() {
                    obj.insert("error".to_string(), json!(msg));
                }
                if let ScriptOutcome::RuntimeError { detail, .. } = other {
                    obj.insert("detail".to_string(), json!(detail));
                }
            }
        }
        obj.insert("logs".to_string(), json!(self.logs));
        obj.insert("actions".to_string(), json!(self.actions));
        obj.insert("action_count".to_string(), json!(self.action_count()));
        obj.insert(
            "execution_time".to_string(),
            json!(self.execution_time.as_secs_f64()),
        );
        Value::Object(obj)
    }

    fn syntax_error(message: String) -> Self {
        Self {
            outcome: ScriptOutcome::SyntaxError { message },
            logs: Vec::new(),
            actions: Vec::new(),
            execution_time: Duration::ZERO,
        }
    }
}

#[derive(Debug)]
struct RuntimeError {
    message: String,
    detail: String,
}

impl RuntimeError {
    fn at(line: usize, message: impl Into<String>) -> Self {
        let message = message.into();
        let detail = format!("line {line}: {message}");
        Self { message, detail }
    }

    fn in_skill(self, name: &str) -> Self {
        Self {
            message: format!("skill '{name}': {}", self.message),
            detail: format!("in skill '{name}': {}", self.detail),
        }
    }
}

enum Flow {
    Normal,
    Return(Value),
}

/// Executes untrusted programs against the capability surface.
pub struct ScriptSandbox {
    gateway: Arc<dyn Gateway>,
    skills: Arc<dyn SkillRegistry>,
    default_timeout: Duration,
}

impl ScriptSandbox {
    pub fn new(gateway: Arc<dyn Gateway>, skills: Arc<dyn SkillRegistry>) -> Self {
        Self {
            gateway,
            skills,
            default_timeout: DEFAULT_SCRIPT_TIMEOUT,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Parses and runs a program. A program that fails to parse never
    /// touches the gateway and reports a syntax outcome with an empty trace.
    pub async fn execute(&self, code: &str, timeout: Option<Duration>) -> ScriptResult {
        let program = match Program::parse(code) {
            Ok(p) => p,
            Err(e) => return ScriptResult::syntax_error(e.to_string()),
        };
        self.run(program, HashMap::new(), timeout).await
    }

    /// Runs a skill body with the caller's arguments bound as `args`.
    pub async fn run_skill(
        &self,
        skill: &Skill,
        args: Map<String, Value>,
        timeout: Option<Duration>,
    ) -> ScriptResult {
        let program = match Program::parse(&skill.body) {
            Ok(p) => p,
            Err(e) => {
                return ScriptResult::syntax_error(format!(
                    "skill '{}': {e}",
                    skill.spec.name
                ));
            }
        };
        let mut scope = HashMap::new();
        scope.insert("args".to_string(), Value::Object(args));
        self.run(program, scope, timeout).await
    }

    async fn run(
        &self,
        program: Program,
        scope: HashMap<String, Value>,
        timeout: Option<Duration>,
    ) -> ScriptResult {
        let limit = timeout.unwrap_or(self.default_timeout);
        let start = Instant::now();
        let trace = Arc::new(TraceLog::default());
        let mut interp = Interp {
            caps: Capabilities::new(self.gateway.clone(), trace.clone()),
            skills: self.skills.clone(),
            steps: 0,
        };

        let mut scope = scope;
        let outcome = match tokio::time::timeout(
            limit,
            interp.exec_block(&program.body, &mut scope, 0),
        )
        .await
        {
            Ok(Ok(Flow::Return(value))) => ScriptOutcome::Completed { result: value },
            Ok(Ok(Flow::Normal)) => ScriptOutcome::Completed {
                result: Value::Null,
            },
            Ok(Err(e)) => ScriptOutcome::RuntimeError {
                message: e.message,
                detail: e.detail,
            },
            Err(_) => ScriptOutcome::TimedOut { limit },
        };

        ScriptResult {
            outcome,
            logs: trace.logs(),
            actions: trace.actions(),
            execution_time: start.elapsed(),
        }
    }
}

// ---------------------------------------------------------------------------
// Interpreter
// ---------------------------------------------------------------------------

struct Interp {
    caps: Capabilities,
    skills: Arc<dyn SkillRegistry>,
    steps: u32,
}

impl Interp {
    fn exec_block<'a>(
        &'a mut self,
        stmts: &'a [Stmt],
        scope: &'a mut HashMap<String, Value>,
        depth: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Flow, RuntimeError>> + Send + 'a>> {
        Box::pin(async move {
            for stmt in stmts {
                self.steps += 1;
                if self.steps > MAX_STEPS {
                    let line = stmt_line(stmt);
                    return Err(RuntimeError::at(line, "script step limit exceeded"));
                }
                match stmt {
                    Stmt::Let { name, value, line } => {
                        let v = self.eval(value, scope, depth, *line).await?;
                        scope.insert(name.clone(), v);
                    }
                    Stmt::Call { call, line } => {
                        self.exec_call(call, scope, depth, *line).await?;
                    }
                    Stmt::If {
                        cond,
                        then_body,
                        else_body,
                        line,
                    } => {
                        let branch = if truthy(&self.eval(cond, scope, depth, *line).await?) {
                            then_body
                        } else {
                            else_body
                        };
                        if let Flow::Return(v) = self.exec_block(branch, scope, depth).await? {
                            return Ok(Flow::Return(v));
                        }
                    }
                    Stmt::Repeat { count, body, .. } => {
                        for _ in 0..*count {
                            if let Flow::Return(v) = self.exec_block(body, scope, depth).await? {
                                return Ok(Flow::Return(v));
                            }
                        }
                    }
                    Stmt::Return { value, line } => {
                        let v = match value {
                            Some(expr) => self.eval(expr, scope, depth, *line).await?,
                            None => Value::Null,
                        };
                        return Ok(Flow::Return(v));
                    }
                }
            }
            Ok(Flow::Normal)
        })
    }

    fn eval<'a>(
        &'a mut self,
        expr: &'a Expr,
        scope: &'a mut HashMap<String, Value>,
        depth: usize,
        line: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Value, RuntimeError>> + Send + 'a>> {
        Box::pin(async move {
            match expr {
                Expr::Literal(v) => Ok(v.clone()),
                Expr::Path(segments) => {
                    let root = scope.get(&segments[0]).ok_or_else(|| {
                        RuntimeError::at(line, format!("unknown variable '{}'", segments[0]))
                    })?;
                    // Missing fields resolve to null so scripts can probe
                    // optional payload fields without crashing.
                    let mut value = root.clone();
                    for seg in &segments[1..] {
                        value = value.get(seg).cloned().unwrap_or(Value::Null);
                    }
                    Ok(value)
                }
                Expr::Not(inner) => {
                    let v = self.eval(inner, scope, depth, line).await?;
                    Ok(Value::Bool(!truthy(&v)))
                }
                Expr::Eq(a, b) => {
                    let a = self.eval(a, scope, depth, line).await?;
                    let b = self.eval(b, scope, depth, line).await?;
                    Ok(Value::Bool(value_eq(&a, &b)))
                }
                Expr::Ne(a, b) => {
                    let a = self.eval(a, scope, depth, line).await?;
                    let b = self.eval(b, scope, depth, line).await?;
                    Ok(Value::Bool(!value_eq(&a, &b)))
                }
                Expr::Call(call) => self.exec_call(call, scope, depth, line).await,
            }
        })
    }

    async fn exec_call(
        &mut self,
        call: &Call,
        scope: &mut HashMap<String, Value>,
        depth: usize,
        line: usize,
    ) -> Result<Value, RuntimeError> {
        let mut args: Map<String, Value> = Map::new();
        for (key, expr) in &call.args {
            let v = self.eval(expr, scope, depth, line).await?;
            args.insert(key.clone(), v);
        }

        let op = call.op;
        if op == ScriptOp::UseSkill {
            return self.exec_skill(args, scope, depth, line).await;
        }
        if op == ScriptOp::Log {
            self.caps.log(&str_arg(&args, "message", op, line)?);
            return Ok(Value::Null);
        }

        let caps = &self.caps;
        let result = match op {
            ScriptOp::GoTo => {
                caps.go_to(
                    num_arg(&args, "x", op, line)?,
                    num_arg(&args, "y", op, line)?,
                    num_arg(&args, "z", op, line)?,
                )
                .await
            }
            ScriptOp::FollowPlayer => caps.follow_player(&str_arg(&args, "player", op, line)?).await,
            ScriptOp::StopMoving => caps.stop_moving().await,
            ScriptOp::Jump => caps.jump().await,
            ScriptOp::LookAt => {
                caps.look_at(
                    num_arg(&args, "x", op, line)?,
                    num_arg(&args, "y", op, line)?,
                    num_arg(&args, "z", op, line)?,
                )
                .await
            }
            ScriptOp::Attack => caps.attack(&str_arg(&args, "entity", op, line)?).await,
            ScriptOp::CollectBlock => caps.collect_block(&str_arg(&args, "block", op, line)?).await,
            ScriptOp::PlaceBlock => {
                caps.place_block(
                    &str_arg(&args, "block", op, line)?,
                    num_arg(&args, "x", op, line)?,
                    num_arg(&args, "y", op, line)?,
                    num_arg(&args, "z", op, line)?,
                )
                .await
            }
            ScriptOp::EquipItem => caps.equip_item(&str_arg(&args, "item", op, line)?).await,
            ScriptOp::DropItem => {
                caps.drop_item(
                    &str_arg(&args, "item", op, line)?,
                    opt_num_arg(&args, "count", op, line)?,
                )
                .await
            }
            ScriptOp::Eat => {
                let food = opt_str_arg(&args, "food", op, line)?;
                caps.eat(food.as_deref()).await
            }
            ScriptOp::UseItem => caps.use_item().await,
            ScriptOp::ActivateBlock => {
                caps.activate_block(
                    num_arg(&args, "x", op, line)?,
                    num_arg(&args, "y", op, line)?,
                    num_arg(&args, "z", op, line)?,
                )
                .await
            }
            ScriptOp::ViewInventory => caps.view_inventory().await,
            ScriptOp::FindBlock => {
                caps.find_block(
                    &str_arg(&args, "block", op, line)?,
                    opt_num_arg(&args, "range", op, line)?,
                )
                .await
            }
            ScriptOp::ScanEntities => {
                let entity = opt_str_arg(&args, "entity", op, line)?;
                caps.scan_entities(
                    opt_num_arg(&args, "range", op, line)?,
                    entity.as_deref(),
                )
                .await
            }
            ScriptOp::GetBlockAt => {
                caps.get_block_at(
                    num_arg(&args, "x", op, line)?,
                    num_arg(&args, "y", op, line)?,
                    num_arg(&args, "z", op, line)?,
                )
                .await
            }
            ScriptOp::GetPosition => caps.get_position().await,
            ScriptOp::GetHealth => caps.get_health().await,
            ScriptOp::Chat => caps.chat(&str_arg(&args, "message", op, line)?).await,
            ScriptOp::Wait => caps.wait(num_arg(&args, "seconds", op, line)?).await,
            ScriptOp::Log | ScriptOp::UseSkill => unreachable!("handled above"),
        };

        result.map_err(|e| RuntimeError::at(line, e.to_string()))
    }

    async fn exec_skill(
        &mut self,
        mut args: Map<String, Value>,
        _scope: &mut HashMap<String, Value>,
        depth: usize,
        line: usize,
    ) -> Result<Value, RuntimeError> {
        let name = match args.remove("name") {
            Some(Value::String(s)) => s,
            _ => return Err(RuntimeError::at(line, "use_skill needs a string 'name'")),
        };
        if depth + 1 > MAX_SKILL_DEPTH {
            return Err(RuntimeError::at(
                line,
                format!("skill nesting deeper than {MAX_SKILL_DEPTH} ('{name}')"),
            ));
        }
        let Some(skill) = self.skills.lookup(&name) else {
            return Err(RuntimeError::at(line, format!("unknown skill '{name}'")));
        };
        let program = Program::parse(&skill.body).map_err(|e| {
            RuntimeError::at(line, format!("skill '{name}' has a syntax error: {e}"))
        })?;

        let mut skill_scope = HashMap::new();
        skill_scope.insert("args".to_string(), Value::Object(args));

        match self.exec_block(&program.body, &mut skill_scope, depth + 1).await {
            Ok(flow) => {
                self.caps
                    .record_skill(&name, true, format!("skill '{name}' completed"));
                Ok(match flow {
                    Flow::Return(v) => v,
                    Flow::Normal => Value::Null,
                })
            }
            Err(e) => {
                self.caps
                    .record_skill(&name, false, format!("skill '{name}' failed: {}", e.message));
                Err(e.in_skill(&name))
            }
        }
    }
}

fn stmt_line(stmt: &Stmt) -> usize {
    match stmt {
        Stmt::Let { line, .. }
        | Stmt::Call { line, .. }
        | Stmt::If { line, .. }
        | Stmt::Repeat { line, .. }
        | Stmt::Return { line, .. } => *line,
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn value_eq(a: &Value, b: &Value) -> bool {
    // Compare numbers numerically so `1 == 1.0` holds.
    if let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) {
        return a == b;
    }
    a == b
}

fn num_arg(
    args: &Map<String, Value>,
    key: &str,
    op: ScriptOp,
    line: usize,
) -> Result<f64, RuntimeError> {
    opt_num_arg(args, key, op, line)?.ok_or_else(|| {
        RuntimeError::at(line, format!("'{}' needs a numeric '{key}'", op.name()))
    })
}

fn opt_num_arg(
    args: &Map<String, Value>,
    key: &str,
    op: ScriptOp,
    line: usize,
) -> Result<Option<f64>, RuntimeError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(other) => Err(RuntimeError::at(
            line,
            format!(
                "argument '{key}' of '{}' must be a number, got {other}",
                op.name()
            ),
        )),
    }
}

fn str_arg(
    args: &Map<String, Value>,
    key: &str,
    op: ScriptOp,
    line: usize,
) -> Result<String, RuntimeError> {
    opt_str_arg(args, key, op, line)?.ok_or_else(|| {
        RuntimeError::at(line, format!("'{}' needs a string '{key}'", op.name()))
    })
}

fn opt_str_arg(
    args: &Map<String, Value>,
    key: &str,
    op: ScriptOp,
    line: usize,
) -> Result<Option<String>, RuntimeError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(RuntimeError::at(
            line,
            format!(
                "argument '{key}' of '{}' must be a string, got {other}",
                op.name()
            ),
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap as StdHashMap;
    use std::sync::Mutex;

    use super::*;
    use crate::agent::action::ActionResult;
    use crate::agent::gateway::GatewayStatus;
    use crate::agent::observation::Observation;
    use crate::agent::skills::{SkillSpec, StaticSkillRegistry};

    #[derive(Default)]
    struct FakeGateway {
        responses: Mutex<StdHashMap<String, ActionResult>>,
        calls: Mutex<Vec<(String, Map<String, Value>)>>,
        sleep_on_wait: bool,
    }

    impl FakeGateway {
        fn respond(&self, action: &str, result: ActionResult) {
            self.responses
                .lock()
                .unwrap()
                .insert(action.to_string(), result);
        }

        fn calls(&self) -> Vec<(String, Map<String, Value>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Gateway for FakeGateway {
        fn status<'a>(
            &'a self,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<GatewayStatus>> + Send + 'a>> {
            Box::pin(async {
                Ok(GatewayStatus {
                    connected: true,
                    username: None,
                })
            })
        }

        fn observe<'a>(
            &'a self,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<Observation>> + Send + 'a>> {
            Box::pin(async { Ok(Observation::default()) })
        }

        fn execute_action<'a>(
            &'a self,
            action: &'a str,
            parameters: Map<String, Value>,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<ActionResult>> + Send + 'a>> {
            Box::pin(async move {
                self.calls
                    .lock()
                    .unwrap()
                    .push((action.to_string(), parameters.clone()));
                if action == "wait" && self.sleep_on_wait {
                    let secs = parameters
                        .get("seconds")
                        .and_then(Value::as_f64)
                        .unwrap_or(0.0);
                    tokio::time::sleep(Duration::from_secs_f64(secs)).await;
                }
                let canned = self.responses.lock().unwrap().get(action).cloned();
                Ok(canned.unwrap_or_else(|| ActionResult::ok(format!("{action} done"))))
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

    fn sandbox_with(gateway: Arc<FakeGateway>, skills: StaticSkillRegistry) -> ScriptSandbox {
        ScriptSandbox::new(gateway, Arc::new(skills))
    }

    #[tokio::test]
    async fn three_calls_and_a_return_value() {
        let gw = Arc::new(FakeGateway::default());
        let sandbox = sandbox_with(gw.clone(), StaticSkillRegistry::default());
        let res = sandbox
            .execute(
                "main:\n    jump\n    chat message=\"hi\"\n    stop_moving\n    return \"all done\"\nend\n",
                None,
            )
            .await;
        assert!(res.success());
        assert_eq!(res.action_count(), 3);
        assert_eq!(res.result_value(), Some(&json!("all done")));
        assert_eq!(gw.calls().len(), 3);
    }

    #[tokio::test]
    async fn disallowed_capability_never_reaches_the_gateway() {
        let gw = Arc::new(FakeGateway::default());
        let sandbox = sandbox_with(gw.clone(), StaticSkillRegistry::default());
        let res = sandbox
            .execute("main:\n    jump\n    spawn_process cmd=\"sh\"\nend\n", None)
            .await;
        assert!(matches!(res.outcome, ScriptOutcome::SyntaxError { .. }));
        assert_eq!(res.action_count(), 0);
        assert!(gw.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_preserves_partial_trace() {
        let gw = Arc::new(FakeGateway {
            sleep_on_wait: true,
            ..FakeGateway::default()
        });
        let sandbox = sandbox_with(gw.clone(), StaticSkillRegistry::default());
        let res = sandbox
            .execute(
                "main:\n    jump\n    chat message=\"starting\"\n    wait seconds=60\n    jump\nend\n",
                Some(Duration::from_secs(1)),
            )
            .await;
        assert!(matches!(res.outcome, ScriptOutcome::TimedOut { .. }));
        assert_eq!(res.action_count(), 2);
        assert_eq!(res.actions[0].action, "jump");
        assert_eq!(res.actions[1].action, "chat");
    }

    #[tokio::test]
    async fn branches_on_gateway_payload_fields() {
        let gw = Arc::new(FakeGateway::default());
        let mut found = Map::new();
        found.insert("found".to_string(), json!(true));
        found.insert(
            "position".to_string(),
            json!({"x": 5.0, "y": 64.0, "z": -2.0}),
        );
        gw.respond("findBlock", ActionResult::ok("found").with_data(found));

        let sandbox = sandbox_with(gw.clone(), StaticSkillRegistry::default());
        let src = r#"
main:
    let spot = find_block block="oak_log" range=16
    if spot.found:
        go_to x=spot.position.x y=spot.position.y z=spot.position.z
    else:
        chat message="nothing"
    end
end
"#;
        let res = sandbox.execute(src, None).await;
        assert!(res.success());
        let calls = gw.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].0, "goTo");
        assert_eq!(calls[1].1.get("x"), Some(&json!(5.0)));
        assert_eq!(calls[1].1.get("z"), Some(&json!(-2.0)));
    }

    #[tokio::test]
    async fn else_branch_runs_when_probe_fails() {
        let gw = Arc::new(FakeGateway::default());
        let mut not_found = Map::new();
        not_found.insert("found".to_string(), json!(false));
        gw.respond(
            "findBlock",
            ActionResult::ok("nothing nearby").with_data(not_found),
        );

        let sandbox = sandbox_with(gw.clone(), StaticSkillRegistry::default());
        let src = "main:\n    let spot = find_block block=\"diamond_ore\"\n    if spot.found:\n        collect_block block=\"diamond_ore\"\n    else:\n        chat message=\"no luck\"\n    end\nend\n";
        let res = sandbox.execute(src, None).await;
        assert!(res.success());
        assert_eq!(gw.calls()[1].0, "chat");
    }

    #[tokio::test]
    async fn unknown_variable_is_a_runtime_error_with_partial_trace() {
        let gw = Arc::new(FakeGateway::default());
        let sandbox = sandbox_with(gw.clone(), StaticSkillRegistry::default());
        let res = sandbox
            .execute("main:\n    jump\n    go_to x=spot.x y=1 z=1\nend\n", None)
            .await;
        match &res.outcome {
            ScriptOutcome::RuntimeError { message, detail } => {
                assert!(message.contains("unknown variable 'spot'"));
                assert!(detail.contains("line 3"));
            }
            other => panic!("expected runtime error, got {other:?}"),
        }
        assert_eq!(res.action_count(), 1);
    }

    #[tokio::test]
    async fn repeat_runs_the_body_n_times() {
        let gw = Arc::new(FakeGateway::default());
        let sandbox = sandbox_with(gw.clone(), StaticSkillRegistry::default());
        let res = sandbox
            .execute("main:\n    repeat 3:\n        jump\n    end\nend\n", None)
            .await;
        assert!(res.success());
        assert_eq!(res.action_count(), 3);
    }

    #[tokio::test]
    async fn log_lines_stay_out_of_the_trace() {
        let gw = Arc::new(FakeGateway::default());
        let sandbox = sandbox_with(gw.clone(), StaticSkillRegistry::default());
        let res = sandbox
            .execute(
                "main:\n    log message=\"scouting\"\n    jump\nend\n",
                None,
            )
            .await;
        assert!(res.success());
        assert_eq!(res.logs, vec!["scouting".to_string()]);
        assert_eq!(res.action_count(), 1);
    }

    #[tokio::test]
    async fn use_skill_runs_nested_program_into_the_same_trace() {
        let gw = Arc::new(FakeGateway::default());
        let skills = StaticSkillRegistry::new(vec![Skill {
            spec: SkillSpec {
                name: "greet".to_string(),
                description: String::new(),
                parameters: vec![],
            },
            body: "main:\n    chat message=\"hello from skill\"\n    return \"greeted\"\nend\n"
                .to_string(),
        }]);
        let sandbox = sandbox_with(gw.clone(), skills);
        let res = sandbox
            .execute(
                "main:\n    let out = use_skill name=\"greet\"\n    return out\nend\n",
                None,
            )
            .await;
        assert!(res.success());
        assert_eq!(res.result_value(), Some(&json!("greeted")));
        assert_eq!(res.action_count(), 2);
        assert_eq!(res.actions[0].action, "chat");
        assert_eq!(res.actions[1].action, "useSkill:greet");
    }

    #[tokio::test]
    async fn use_skill_binds_args_for_the_skill_body() {
        let gw = Arc::new(FakeGateway::default());
        let skills = StaticSkillRegistry::new(vec![Skill {
            spec: SkillSpec {
                name: "dig".to_string(),
                description: String::new(),
                parameters: vec![],
            },
            body: "main:\n    collect_block block=args.block\nend\n".to_string(),
        }]);
        let sandbox = sandbox_with(gw.clone(), skills);
        let res = sandbox
            .execute(
                "main:\n    use_skill name=\"dig\" block=\"stone\"\nend\n",
                None,
            )
            .await;
        assert!(res.success());
        assert_eq!(gw.calls()[0].0, "collectBlock");
        assert_eq!(gw.calls()[0].1.get("blockType"), Some(&json!("stone")));
    }

    #[tokio::test]
    async fn unknown_skill_is_a_runtime_error() {
        let gw = Arc::new(FakeGateway::default());
        let sandbox = sandbox_with(gw.clone(), StaticSkillRegistry::default());
        let res = sandbox
            .execute("main:\n    use_skill name=\"no_such\"\nend\n", None)
            .await;
        match &res.outcome {
            ScriptOutcome::RuntimeError { message, .. } => {
                assert!(message.contains("unknown skill 'no_such'"));
            }
            other => panic!("expected runtime error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn run_skill_binds_caller_arguments() {
        let gw = Arc::new(FakeGateway::default());
        let skill = Skill {
            spec: SkillSpec {
                name: "say".to_string(),
                description: String::new(),
                parameters: vec![],
            },
            body: "main:\n    chat message=args.text\nend\n".to_string(),
        };
        let sandbox = sandbox_with(gw.clone(), StaticSkillRegistry::default());
        let mut args = Map::new();
        args.insert("text".to_string(), json!("testing 123"));
        let res = sandbox.run_skill(&skill, args, None).await;
        assert!(res.success());
        assert_eq!(gw.calls()[0].1.get("message"), Some(&json!("testing 123")));
    }

    #[tokio::test]
    async fn result_json_carries_count_and_logs() {
        let gw = Arc::new(FakeGateway::default());
        let sandbox = sandbox_with(gw, StaticSkillRegistry::default());
        let res = sandbox
            .execute(
                "main:\n    log message=\"step\"\n    jump\n    return \"fin\"\nend\n",
                None,
            )
            .await;
        let v = res.to_json();
        assert_eq!(v.get("success"), Some(&json!(true)));
        assert_eq!(v.get("result"), Some(&json!("fin")));
        assert_eq!(v.get("action_count"), Some(&json!(1)));
        assert_eq!(v.get("logs"), Some(&json!(["step"])));
    }
}
