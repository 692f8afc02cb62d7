//! Hook pipeline: deny/allow/mutate decisions at the six lifecycle points an
//! agent's loop passes through (`pre_tool_use`, `post_tool_use`, `stop`,
//! `user_prompt_submit`, `agent_start`, `agent_end`).
//!
//! Generalizes the teacher's three-hook `Hooks` (`pre_tool_use`,
//! `post_tool_use`, `user_prompt_submit`, first-non-`None`-wins) into the
//! full declarative-rule pipeline: priority-sorted evaluation, regex tool
//! matchers, and a `script` action whose callback runs in the agent's own
//! sandbox context (represented here as a boxed async closure — the
//! in-process stand-in for "dispatch through the relay into the worker").
//! Native Rust closures (the teacher's original ergonomics) are kept as one
//! kind of rule so `Hooks::new().add_pre_tool_use(...)` still works exactly
//! as before.
//!
//! # Examples
//!
//! ```rust,no_run
//! use open_agent_runtime::hooks::{Hooks, HookDecision, PreToolUseEvent};
//!
//! async fn approve_tool(event: PreToolUseEvent) -> Option<HookDecision> {
//!     if event.tool_name == "delete_file" {
//!         return Some(HookDecision::block("dangerous operation blocked"));
//!     }
//!     None // defer to the next rule
//! }
//! ```

use regex::Regex;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::{Error, Result};

// ============================================================================
// EVENT PAYLOADS
// ============================================================================

/// Event fired before tool execution.
#[derive(Debug, Clone)]
pub struct PreToolUseEvent {
    pub tool_name: String,
    pub tool_input: Value,
    pub tool_use_id: String,
    pub history: Vec<Value>,
}

impl PreToolUseEvent {
    pub fn new(
        tool_name: String,
        tool_input: Value,
        tool_use_id: String,
        history: Vec<Value>,
    ) -> Self {
        Self {
            tool_name,
            tool_input,
            tool_use_id,
            history,
        }
    }
}

/// Event fired after tool execution.
#[derive(Debug, Clone)]
pub struct PostToolUseEvent {
    pub tool_name: String,
    pub tool_input: Value,
    pub tool_use_id: String,
    pub tool_result: Value,
    pub history: Vec<Value>,
}

impl PostToolUseEvent {
    pub fn new(
        tool_name: String,
        tool_input: Value,
        tool_use_id: String,
        tool_result: Value,
        history: Vec<Value>,
    ) -> Self {
        Self {
            tool_name,
            tool_input,
            tool_use_id,
            tool_result,
            history,
        }
    }
}

/// Event fired before processing a user message.
#[derive(Debug, Clone)]
pub struct UserPromptSubmitEvent {
    pub prompt: String,
    pub history: Vec<Value>,
}

impl UserPromptSubmitEvent {
    pub fn new(prompt: String, history: Vec<Value>) -> Self {
        Self { prompt, history }
    }
}

/// Event fired when the loop is about to end a turn without further tool
/// calls. A `deny` here appends `reason` as a new user message and the loop
/// continues; `allow` proceeds to `agent_end` (or exits if none is
/// registered).
#[derive(Debug, Clone)]
pub struct StopEvent {
    pub stop_reason: String,
    pub history: Vec<Value>,
}

/// Event fired once, when an agent transitions `pending -> running`.
#[derive(Debug, Clone)]
pub struct AgentStartEvent {
    pub agent_id: String,
}

/// Event fired once the loop has actually exited (after a `stop` hook
/// allowed it to).
#[derive(Debug, Clone)]
pub struct AgentEndEvent {
    pub agent_id: String,
    pub stop_reason: String,
}

/// The six points in the agent loop a hook can observe or intercept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookType {
    PreToolUse,
    PostToolUse,
    Stop,
    UserPromptSubmit,
    AgentStart,
    AgentEnd,
}

impl HookType {
    fn is_tool_scoped(self) -> bool {
        matches!(self, HookType::PreToolUse | HookType::PostToolUse)
    }
}

pub const HOOK_PRE_TOOL_USE: &str = "pre_tool_use";
pub const HOOK_POST_TOOL_USE: &str = "post_tool_use";
pub const HOOK_STOP: &str = "stop";
pub const HOOK_USER_PROMPT_SUBMIT: &str = "user_prompt_submit";
pub const HOOK_AGENT_START: &str = "agent_start";
pub const HOOK_AGENT_END: &str = "agent_end";

// ============================================================================
// DECISIONS
// ============================================================================

/// Decision returned by a hook handler (native closure or script action).
#[derive(Debug, Clone, Default)]
pub struct HookDecision {
    pub continue_execution: bool,
    pub modified_input: Option<Value>,
    pub modified_prompt: Option<String>,
    pub reason: Option<String>,
}

impl HookDecision {
    pub fn continue_() -> Self {
        Self {
            continue_execution: true,
            ..Default::default()
        }
    }

    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            continue_execution: false,
            reason: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn modify_input(input: Value, reason: impl Into<String>) -> Self {
        Self {
            continue_execution: true,
            modified_input: Some(input),
            reason: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn modify_prompt(prompt: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            continue_execution: true,
            modified_prompt: Some(prompt.into()),
            reason: Some(reason.into()),
            ..Default::default()
        }
    }
}

/// The final, pipeline-level outcome of evaluating one hook type.
#[derive(Debug, Clone)]
pub enum HookOutcome {
    /// First deny wins; the action is blocked and `reason` is surfaced.
    Deny { reason: String },
    /// Either a short-circuiting modifying allow, or the first-seen allow
    /// after the whole pipeline ran without a deny.
    Allow {
        modified_input: Option<Value>,
        modified_prompt: Option<String>,
    },
    /// No rule fired, or every firing rule was `log`/no-op.
    Default,
}

// ============================================================================
// RULE-SCOPED CONTEXT (what a script action sees)
// ============================================================================

/// Fields available to a `script` hook action, mirroring spec's
/// `{type, agentId, toolName?, toolInput?, toolResult?, prompt?,
/// stopReason?}` context plus `callTool`/`log`.
#[derive(Debug, Clone)]
pub struct HookScriptContext {
    pub hook_type: HookType,
    pub agent_id: String,
    pub tool_name: Option<String>,
    pub tool_input: Option<Value>,
    pub tool_result: Option<Value>,
    pub prompt: Option<String>,
    pub stop_reason: Option<String>,
}

/// What a script action's callback returns, before being folded into a
/// `HookDecision`.
#[derive(Debug, Clone)]
pub struct ScriptDecision {
    pub decision: Option<ScriptVerdict>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptVerdict {
    Deny,
    Allow,
}

/// A script action's callback. Takes the context and a `call_tool` callback
/// it may invoke (itself async, routed back through the relay in a full
/// deployment); returns a best-effort decision.
pub type ScriptCallback = Arc<
    dyn Fn(HookScriptContext) -> Pin<Box<dyn Future<Output = Result<ScriptDecision>> + Send>>
        + Send
        + Sync,
>;

/// Matches a rule against a tool name.
#[derive(Clone)]
pub struct ToolMatcher {
    pattern: Regex,
}

impl ToolMatcher {
    pub fn new(pattern: &str) -> Result<Self> {
        Ok(Self {
            pattern: Regex::new(pattern)
                .map_err(|e| Error::config(format!("invalid hook tool name pattern: {e}")))?,
        })
    }

    pub fn matches(&self, tool_name: &str) -> bool {
        self.pattern.is_match(tool_name)
    }
}

impl std::fmt::Debug for ToolMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ToolMatcher({})", self.pattern.as_str())
    }
}

/// Declarative rule action.
#[derive(Clone)]
pub enum HookAction {
    /// Observational only; never changes the pipeline outcome.
    Log,
    /// Unconditionally denies with a fixed reason.
    Deny { reason: String },
    /// Unconditionally allows, optionally rewriting the tool input.
    Allow { modified_input: Option<Value> },
    /// Runs a script callback; its returned `ScriptDecision` becomes the
    /// rule's decision. On script failure: continues (treated as `Default`)
    /// unless `continue_on_error` is false, in which case it denies with the
    /// error message.
    Script {
        callback: ScriptCallback,
        continue_on_error: bool,
    },
    /// A native Rust closure, the teacher's original ergonomics. Dispatched
    /// with whichever typed event matches this rule's `HookType`.
    Native(NativeHandler),
}

/// Type-erased native closure, keyed by which event shape it expects.
#[derive(Clone)]
pub enum NativeHandler {
    PreToolUse(
        Arc<
            dyn Fn(PreToolUseEvent) -> Pin<Box<dyn Future<Output = Option<HookDecision>> + Send>>
                + Send
                + Sync,
        >,
    ),
    PostToolUse(
        Arc<
            dyn Fn(PostToolUseEvent) -> Pin<Box<dyn Future<Output = Option<HookDecision>> + Send>>
                + Send
                + Sync,
        >,
    ),
    UserPromptSubmit(
        Arc<
            dyn Fn(
                    UserPromptSubmitEvent,
                ) -> Pin<Box<dyn Future<Output = Option<HookDecision>> + Send>>
                + Send
                + Sync,
        >,
    ),
    Stop(
        Arc<
            dyn Fn(StopEvent) -> Pin<Box<dyn Future<Output = Option<HookDecision>> + Send>>
                + Send
                + Sync,
        >,
    ),
    AgentStart(
        Arc<
            dyn Fn(AgentStartEvent) -> Pin<Box<dyn Future<Output = Option<HookDecision>> + Send>>
                + Send
                + Sync,
        >,
    ),
    AgentEnd(
        Arc<
            dyn Fn(AgentEndEvent) -> Pin<Box<dyn Future<Output = Option<HookDecision>> + Send>>
                + Send
                + Sync,
        >,
    ),
}

/// One registered hook: its type, optional priority/matcher, and action.
#[derive(Clone)]
pub struct HookRule {
    pub id: String,
    pub hook_type: HookType,
    pub priority: i32,
    pub matcher: Option<ToolMatcher>,
    pub action: HookAction,
}

impl HookRule {
    fn applies_to(&self, hook_type: HookType, tool_name: Option<&str>) -> bool {
        if self.hook_type != hook_type {
            return false;
        }
        if hook_type.is_tool_scoped() {
            if let Some(matcher) = &self.matcher {
                return tool_name.is_some_and(|name| matcher.matches(name));
            }
        }
        true
    }
}

/// Input matchers for declarative rules (`inputMatchers` in spec.md §4.5):
/// each named field of `toolInput` is matched against a regex. Non-string
/// or missing fields mean the rule does not apply.
#[derive(Debug, Clone, Default)]
pub struct InputMatchers {
    fields: Vec<(String, Regex)>,
}

impl InputMatchers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, pattern: &str) -> Result<Self> {
        let re = Regex::new(pattern)
            .map_err(|e| Error::config(format!("invalid input matcher pattern: {e}")))?;
        self.fields.push((name.into(), re));
        Ok(self)
    }

    pub fn matches(&self, tool_input: &Value) -> bool {
        self.fields.iter().all(|(name, re)| {
            tool_input
                .get(name)
                .and_then(Value::as_str)
                .is_some_and(|s| re.is_match(s))
        })
    }
}

// ============================================================================
// HOOKS REGISTRY
// ============================================================================

/// Full set of registered hooks: declarative rules plus whichever native
/// closures were attached via the `add_*` ergonomic constructors.
#[derive(Clone, Default)]
pub struct Hooks {
    rules: Vec<HookRule>,
    next_id: u64,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_native(mut self, hook_type: HookType, handler: NativeHandler) -> Self {
        let id = format!("native-{}", self.next_id);
        self.next_id += 1;
        self.rules.push(HookRule {
            id,
            hook_type,
            priority: 0,
            matcher: None,
            action: HookAction::Native(handler),
        });
        self
    }

    pub fn add_pre_tool_use<F, Fut>(self, handler: F) -> Self
    where
        F: Fn(PreToolUseEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<HookDecision>> + Send + 'static,
    {
        self.push_native(
            HookType::PreToolUse,
            NativeHandler::PreToolUse(Arc::new(move |e| Box::pin(handler(e)))),
        )
    }

    pub fn add_post_tool_use<F, Fut>(self, handler: F) -> Self
    where
        F: Fn(PostToolUseEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<HookDecision>> + Send + 'static,
    {
        self.push_native(
            HookType::PostToolUse,
            NativeHandler::PostToolUse(Arc::new(move |e| Box::pin(handler(e)))),
        )
    }

    pub fn add_user_prompt_submit<F, Fut>(self, handler: F) -> Self
    where
        F: Fn(UserPromptSubmitEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<HookDecision>> + Send + 'static,
    {
        self.push_native(
            HookType::UserPromptSubmit,
            NativeHandler::UserPromptSubmit(Arc::new(move |e| Box::pin(handler(e)))),
        )
    }

    pub fn add_stop<F, Fut>(self, handler: F) -> Self
    where
        F: Fn(StopEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<HookDecision>> + Send + 'static,
    {
        self.push_native(
            HookType::Stop,
            NativeHandler::Stop(Arc::new(move |e| Box::pin(handler(e)))),
        )
    }

    pub fn add_agent_start<F, Fut>(self, handler: F) -> Self
    where
        F: Fn(AgentStartEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<HookDecision>> + Send + 'static,
    {
        self.push_native(
            HookType::AgentStart,
            NativeHandler::AgentStart(Arc::new(move |e| Box::pin(handler(e)))),
        )
    }

    pub fn add_agent_end<F, Fut>(self, handler: F) -> Self
    where
        F: Fn(AgentEndEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<HookDecision>> + Send + 'static,
    {
        self.push_native(
            HookType::AgentEnd,
            NativeHandler::AgentEnd(Arc::new(move |e| Box::pin(handler(e)))),
        )
    }

    /// Registers a declarative rule (`log`/`deny`/`allow`/`script`).
    pub fn add_rule(mut self, rule: HookRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn is_empty_for(&self, hook_type: HookType) -> bool {
        !self.rules.iter().any(|r| r.hook_type == hook_type)
    }

    async fn evaluate_native(handler: &NativeHandler, ctx: &EvalContext) -> Option<HookDecision> {
        match handler {
            NativeHandler::PreToolUse(f) => {
                let event = PreToolUseEvent::new(
                    ctx.tool_name.clone().unwrap_or_default(),
                    ctx.tool_input.clone().unwrap_or(Value::Null),
                    ctx.tool_use_id.clone().unwrap_or_default(),
                    ctx.history.clone(),
                );
                f(event).await
            }
            NativeHandler::PostToolUse(f) => {
                let event = PostToolUseEvent::new(
                    ctx.tool_name.clone().unwrap_or_default(),
                    ctx.tool_input.clone().unwrap_or(Value::Null),
                    ctx.tool_use_id.clone().unwrap_or_default(),
                    ctx.tool_result.clone().unwrap_or(Value::Null),
                    ctx.history.clone(),
                );
                f(event).await
            }
            NativeHandler::UserPromptSubmit(f) => {
                let event = UserPromptSubmitEvent::new(
                    ctx.prompt.clone().unwrap_or_default(),
                    ctx.history.clone(),
                );
                f(event).await
            }
            NativeHandler::Stop(f) => {
                let event = StopEvent {
                    stop_reason: ctx.stop_reason.clone().unwrap_or_default(),
                    history: ctx.history.clone(),
                };
                f(event).await
            }
            NativeHandler::AgentStart(f) => {
                let event = AgentStartEvent {
                    agent_id: ctx.agent_id.clone(),
                };
                f(event).await
            }
            NativeHandler::AgentEnd(f) => {
                let event = AgentEndEvent {
                    agent_id: ctx.agent_id.clone(),
                    stop_reason: ctx.stop_reason.clone().unwrap_or_default(),
                };
                f(event).await
            }
        }
    }

    /// Runs the full evaluation algorithm (spec.md §4.5) for `hook_type`:
    /// filter by type and tool-name matcher, sort by priority descending,
    /// first deny wins, first modifying-allow short-circuits, otherwise the
    /// first plain allow is remembered and returned if the pipeline finishes
    /// without a deny. Errors from individual rules are logged (here:
    /// via `tracing::warn`) and treated as `Default`.
    pub async fn evaluate(&self, hook_type: HookType, ctx: EvalContext) -> HookOutcome {
        let mut applicable: Vec<&HookRule> = self
            .rules
            .iter()
            .filter(|r| r.applies_to(hook_type, ctx.tool_name.as_deref()))
            .collect();
        applicable.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut first_allow: Option<HookOutcome> = None;

        for rule in applicable {
            let decision = match &rule.action {
                HookAction::Log => None,
                HookAction::Deny { reason } => Some(HookDecision::block(reason.clone())),
                HookAction::Allow { modified_input } => Some(HookDecision {
                    continue_execution: true,
                    modified_input: modified_input.clone(),
                    modified_prompt: None,
                    reason: None,
                }),
                HookAction::Script {
                    callback,
                    continue_on_error,
                } => {
                    let script_ctx = HookScriptContext {
                        hook_type,
                        agent_id: ctx.agent_id.clone(),
                        tool_name: ctx.tool_name.clone(),
                        tool_input: ctx.tool_input.clone(),
                        tool_result: ctx.tool_result.clone(),
                        prompt: ctx.prompt.clone(),
                        stop_reason: ctx.stop_reason.clone(),
                    };
                    match callback(script_ctx).await {
                        Ok(ScriptDecision { decision, reason }) => match decision {
                            Some(ScriptVerdict::Deny) => Some(HookDecision::block(
                                reason.unwrap_or_else(|| "denied by script".into()),
                            )),
                            Some(ScriptVerdict::Allow) => Some(HookDecision {
                                continue_execution: true,
                                modified_input: None,
                                modified_prompt: None,
                                reason,
                            }),
                            None => None,
                        },
                        Err(e) => {
                            tracing::warn!(rule = %rule.id, error = %e, "hook script failed");
                            if *continue_on_error {
                                None
                            } else {
                                Some(HookDecision::block(e.to_string()))
                            }
                        }
                    }
                }
                HookAction::Native(handler) => Self::evaluate_native(handler, &ctx).await,
            };

            let Some(decision) = decision else {
                continue;
            };

            if !decision.continue_execution {
                return HookOutcome::Deny {
                    reason: decision.reason.unwrap_or_default(),
                };
            }

            if decision.modified_input.is_some() || decision.modified_prompt.is_some() {
                return HookOutcome::Allow {
                    modified_input: decision.modified_input,
                    modified_prompt: decision.modified_prompt,
                };
            }

            if first_allow.is_none() {
                first_allow = Some(HookOutcome::Allow {
                    modified_input: None,
                    modified_prompt: None,
                });
            }
        }

        first_allow.unwrap_or(HookOutcome::Default)
    }
}

/// Everything a single `evaluate` call might need, across all six hook
/// shapes; unused fields are simply `None`.
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    pub agent_id: String,
    pub tool_name: Option<String>,
    pub tool_input: Option<Value>,
    pub tool_use_id: Option<String>,
    pub tool_result: Option<Value>,
    pub prompt: Option<String>,
    pub stop_reason: Option<String>,
    pub history: Vec<Value>,
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("rules", &format!("{} rules", self.rules.len()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(tool_name: &str) -> EvalContext {
        EvalContext {
            agent_id: "agent-1".into(),
            tool_name: Some(tool_name.into()),
            tool_input: Some(json!({})),
            tool_use_id: Some("tu1".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn native_pre_tool_use_deny_wins() {
        let hooks = Hooks::new().add_pre_tool_use(|event| async move {
            if event.tool_name == "dangerous" {
                return Some(HookDecision::block("blocked"));
            }
            None
        });

        let outcome = hooks.evaluate(HookType::PreToolUse, ctx("dangerous")).await;
        match outcome {
            HookOutcome::Deny { reason } => assert_eq!(reason, "blocked"),
            _ => panic!("expected deny"),
        }
    }

    #[tokio::test]
    async fn declarative_deny_beats_later_allow_regardless_of_order() {
        let hooks = Hooks::new()
            .add_rule(HookRule {
                id: "allow-all".into(),
                hook_type: HookType::PreToolUse,
                priority: 0,
                matcher: None,
                action: HookAction::Allow { modified_input: None },
            })
            .add_rule(HookRule {
                id: "deny-dangerous".into(),
                hook_type: HookType::PreToolUse,
                priority: 10,
                matcher: Some(ToolMatcher::new("^dangerous$").unwrap()),
                action: HookAction::Deny {
                    reason: "not allowed".into(),
                },
            });

        let outcome = hooks.evaluate(HookType::PreToolUse, ctx("dangerous")).await;
        matches!(outcome, HookOutcome::Deny { .. })
            .then_some(())
            .expect("higher priority deny should win even though allow-all is registered first");
    }

    #[tokio::test]
    async fn matcher_scopes_rule_to_matching_tools_only() {
        let hooks = Hooks::new().add_rule(HookRule {
            id: "r1".into(),
            hook_type: HookType::PreToolUse,
            priority: 0,
            matcher: Some(ToolMatcher::new("^bash$").unwrap()),
            action: HookAction::Deny {
                reason: "no shell".into(),
            },
        });

        assert!(matches!(
            hooks.evaluate(HookType::PreToolUse, ctx("bash")).await,
            HookOutcome::Deny { .. }
        ));
        assert!(matches!(
            hooks.evaluate(HookType::PreToolUse, ctx("search")).await,
            HookOutcome::Default
        ));
    }

    #[tokio::test]
    async fn modifying_allow_short_circuits() {
        let hooks = Hooks::new()
            .add_rule(HookRule {
                id: "mutate".into(),
                hook_type: HookType::PreToolUse,
                priority: 5,
                matcher: None,
                action: HookAction::Allow {
                    modified_input: Some(json!({"patched": true})),
                },
            })
            .add_rule(HookRule {
                id: "deny-later".into(),
                hook_type: HookType::PreToolUse,
                priority: 0,
                matcher: None,
                action: HookAction::Deny {
                    reason: "never reached".into(),
                },
            });

        match hooks.evaluate(HookType::PreToolUse, ctx("search")).await {
            HookOutcome::Allow { modified_input, .. } => {
                assert_eq!(modified_input.unwrap()["patched"], true);
            }
            _ => panic!("expected modifying allow to short-circuit"),
        }
    }

    #[tokio::test]
    async fn log_action_never_changes_outcome() {
        let hooks = Hooks::new().add_rule(HookRule {
            id: "just-log".into(),
            hook_type: HookType::PreToolUse,
            priority: 0,
            matcher: None,
            action: HookAction::Log,
        });
        assert!(matches!(
            hooks.evaluate(HookType::PreToolUse, ctx("anything")).await,
            HookOutcome::Default
        ));
    }

    #[tokio::test]
    async fn script_action_continue_on_error_default_true_swallows_failure() {
        let hooks = Hooks::new().add_rule(HookRule {
            id: "flaky".into(),
            hook_type: HookType::PreToolUse,
            priority: 0,
            matcher: None,
            action: HookAction::Script {
                callback: Arc::new(|_ctx| {
                    Box::pin(async { Err(Error::other("script exploded")) })
                }),
                continue_on_error: true,
            },
        });
        assert!(matches!(
            hooks.evaluate(HookType::PreToolUse, ctx("x")).await,
            HookOutcome::Default
        ));
    }

    #[tokio::test]
    async fn script_action_continue_on_error_false_denies() {
        let hooks = Hooks::new().add_rule(HookRule {
            id: "flaky".into(),
            hook_type: HookType::PreToolUse,
            priority: 0,
            matcher: None,
            action: HookAction::Script {
                callback: Arc::new(|_ctx| {
                    Box::pin(async { Err(Error::other("script exploded")) })
                }),
                continue_on_error: false,
            },
        });
        assert!(matches!(
            hooks.evaluate(HookType::PreToolUse, ctx("x")).await,
            HookOutcome::Deny { .. }
        ));
    }

    #[tokio::test]
    async fn input_matchers_skip_rule_when_field_missing() {
        let matchers = InputMatchers::new().field("path", "^/tmp/").unwrap();
        assert!(!matchers.matches(&json!({"other": "value"})));
        assert!(matchers.matches(&json!({"path": "/tmp/foo"})));
        assert!(!matchers.matches(&json!({"path": "/etc/passwd"})));
    }
}
