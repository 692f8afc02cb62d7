//! Agent runner: the sandboxed agentic loop (spec.md §4.3).
//!
//! Replaces the teacher's request-per-turn `Client`/`auto_execute_loop`
//! (`client.rs`) with the full state machine: `pending -> running <-> paused
//! -> stopped | killed | error`, a bounded external-event queue, the
//! ten-step per-iteration algorithm, iteration/token/cost budget
//! enforcement, and cooperative pause/stop at the two suspension points
//! (between turns, between streamed chunks). The teacher's
//! `Arc<AtomicBool>` interrupt idiom (`client.rs::interrupt`) is kept and
//! extended into a pair of flags (`paused`, `stopped`) polled the same way.
//!
//! Where the browser original moves messages over `postMessage` between a
//! worker and its shell, this in-process realization moves `RunnerInbound`/
//! `RunnerOutbound` values over `tokio::sync::mpsc` channels between the
//! runner's task and whatever hosts it (`container.rs`, or a hub runner).

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, mpsc};

use crate::adapters::{self, ProviderAdapter};
use crate::dispatcher::ToolDispatcher;
use crate::events::{AgentEvent, EventAccumulator, MaterializedBlock, StopReason};
use crate::hooks::{EvalContext, HookOutcome, HookType};
use crate::sse::SseFramer;
use crate::types::{
    AgentOptions, ContentBlock, Message, MessageRole, ToolResultBlock, ToolUseBlock,
};
use crate::{Error, Result};

/// Hard cap on loop iterations regardless of budget configuration, matching
/// spec.md §4.3 step 1.
pub const MAX_ITERATIONS: u32 = 200;

/// Capacity of the external event queue drained between turns (spec.md §3).
pub const EVENT_QUEUE_CAPACITY: usize = 100;

/// `pending -> running <-> paused -> stopped | killed | error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Pending,
    Running,
    Paused,
    Stopped,
    Killed,
    Error,
}

impl AgentState {
    /// `killed`/`error` are terminal; nothing else (including `restart`)
    /// moves the agent out of them. `stopped` is resumable via restart.
    pub fn is_terminal(self) -> bool {
        matches!(self, AgentState::Killed | AgentState::Error)
    }
}

/// Why the loop stopped enforcing budgets and exited early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetReason {
    IterationLimit,
    TokenLimit,
    CostLimit,
}

/// Messages the runner's task accepts, mirroring spec.md §6's worker-inbound
/// vocabulary (`start`, `user_message`, `pause`, `resume`, `stop_agent`,
/// `config_update`). DOM/page events fold down to `ExternalEvent`, the
/// bounded-queue entry spec.md §3 calls the "event queue."
#[derive(Debug, Clone)]
pub enum RunnerInbound {
    Start { user_message: Option<String> },
    UserMessage { content: String },
    Pause,
    Resume,
    StopAgent,
    /// External DOM/page/worker notification folded into a user-visible
    /// string; queued between turns if the loop is running, consumed
    /// immediately otherwise.
    ExternalEvent { text: String },
}

/// Messages the runner emits outward, mirroring spec.md §6's `event`
/// outbound shape plus loop lifecycle markers.
#[derive(Debug, Clone)]
pub enum RunnerOutbound {
    AgentEvent(AgentEvent),
    ToolDispatched { tool_use_id: String, tool_name: String },
    ToolResult { tool_use_id: String, is_error: bool },
    BudgetExceeded { reason: BudgetReason },
    LoopComplete,
    StateChanged { state: AgentState },
}

/// Cumulative token/cost counters compared against `AgentOptions`'s budget
/// fields (spec.md §4.3, "Budget semantics").
#[derive(Debug, Clone, Copy, Default)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
    cost_usd: f64,
}

/// The sandboxed per-agent agentic loop.
pub struct AgentRunner {
    id: String,
    options: AgentOptions,
    adapter: Mutex<Box<dyn ProviderAdapter>>,
    dispatcher: Arc<ToolDispatcher>,
    http: reqwest::Client,
    history: Arc<Mutex<Vec<Message>>>,
    state: Arc<Mutex<AgentState>>,
    paused: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    event_queue: Arc<Mutex<VecDeque<String>>>,
    usage: Arc<Mutex<Usage>>,
    outbound: mpsc::UnboundedSender<RunnerOutbound>,
}

impl AgentRunner {
    /// Builds a runner for one agent. `outbound` is the channel the
    /// embedding container (or hub runner) reads canonical events and
    /// lifecycle notifications from.
    pub fn new(
        id: impl Into<String>,
        options: AgentOptions,
        dispatcher: Arc<ToolDispatcher>,
        outbound: mpsc::UnboundedSender<RunnerOutbound>,
    ) -> Self {
        let adapter = adapters::for_provider(options.provider());
        Self {
            id: id.into(),
            http: reqwest::Client::new(),
            adapter: Mutex::new(adapter),
            dispatcher,
            history: Arc::new(Mutex::new(Vec::new())),
            state: Arc::new(Mutex::new(AgentState::Pending)),
            paused: Arc::new(AtomicBool::new(false)),
            stopped: Arc::new(AtomicBool::new(false)),
            event_queue: Arc::new(Mutex::new(VecDeque::new())),
            usage: Arc::new(Mutex::new(Usage::default())),
            options,
            outbound,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn state(&self) -> AgentState {
        *self.state.lock().await
    }

    async fn set_state(&self, state: AgentState) {
        *self.state.lock().await = state;
        let _ = self.outbound.send(RunnerOutbound::StateChanged { state });
    }

    /// Cooperative pause: takes effect at the next suspension point (between
    /// turns, or between streamed chunks).
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Soft cancel. Idempotent; also clears `paused` so a paused loop exits
    /// immediately rather than waiting to be resumed first (spec.md §5).
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Appends an external event. If the loop is currently running it is
    /// queued (dropped silently past `EVENT_QUEUE_CAPACITY`, per spec.md
    /// §3/§5's documented backpressure); callers that want it consumed as
    /// the very next turn should call this before `run`.
    pub async fn push_external_event(&self, text: impl Into<String>) {
        let mut queue = self.event_queue.lock().await;
        if queue.len() >= EVENT_QUEUE_CAPACITY {
            tracing::warn!(agent_id = %self.id, "event queue full, dropping external event");
            return;
        }
        queue.push_back(text.into());
    }

    /// Runs the agentic loop to completion: `start` through however many
    /// turns it takes to reach a natural stop, a budget exceedance, or an
    /// external `stop_agent`. One call drains the queued user/external
    /// input that accumulates between turns (spec.md §4.3 step 10).
    pub async fn run(&self, initial_user_message: Option<String>) -> Result<()> {
        self.set_state(AgentState::Running).await;
        self.run_hook_agent_start().await;

        if let Some(text) = initial_user_message {
            self.append_user_message(text).await;
        }

        let mut iterations: u32 = 0;
        let mut final_stop_reason = String::from("end_turn");

        'outer: loop {
            loop {
                if self.stopped.load(Ordering::SeqCst) {
                    self.set_state(AgentState::Stopped).await;
                    break 'outer;
                }
                if self.paused.load(Ordering::SeqCst) {
                    self.set_state(AgentState::Paused).await;
                    tokio::time::sleep(Duration::from_millis(25)).await;
                    continue;
                }
                self.set_state(AgentState::Running).await;
                break;
            }

            iterations += 1;
            if iterations > MAX_ITERATIONS {
                let _ = self.outbound.send(RunnerOutbound::BudgetExceeded {
                    reason: BudgetReason::IterationLimit,
                });
                break;
            }

            let materialized = match self.run_one_turn().await {
                Ok(Some(m)) => m,
                Ok(None) => break, // budget exceeded mid-turn; already reported
                Err(e) => {
                    self.set_state(AgentState::Error).await;
                    return Err(e);
                }
            };

            let TurnResult {
                mut blocks,
                mut stop_reason,
            } = materialized;

            // Step 6: text-as-tool-call fallback.
            let declared_tools: Vec<String> =
                self.options.tools().iter().map(|t| t.name().to_string()).collect();
            if stop_reason == StopReason::EndTurn
                && !blocks.iter().any(|b| matches!(b, MaterializedBlock::ToolUse { .. }))
            {
                if let Some(recovered_index) = blocks.iter().position(|b| {
                    matches!(b, MaterializedBlock::Text { text } if !text.is_empty())
                }) {
                    if let MaterializedBlock::Text { text } = &blocks[recovered_index] {
                        if let Some((tool_use, remaining)) =
                            crate::adapters::text_fallback::recover_tool_call(text, &declared_tools)
                        {
                            if remaining.is_empty() {
                                blocks.remove(recovered_index);
                            } else if let MaterializedBlock::Text { text } =
                                &mut blocks[recovered_index]
                            {
                                *text = remaining;
                            }
                            blocks.push(tool_use);
                            stop_reason = StopReason::RecoveredToolUse;
                        }
                    }
                }
            }

            // Step 7/8: build the assistant message, collect tool calls.
            let mut assistant_content = Vec::new();
            let mut tool_calls: Vec<ToolUseBlock> = Vec::new();
            for block in blocks {
                match block {
                    MaterializedBlock::Text { text } => {
                        assistant_content.push(ContentBlock::Text(crate::types::TextBlock::new(text)));
                    }
                    MaterializedBlock::ToolUse { id, name, input, truncated, thought_signature } => {
                        let mut tu = ToolUseBlock::new(id, name, input).with_truncated(truncated);
                        if let Some(sig) = thought_signature {
                            tu = tu.with_thought_signature(sig);
                        }
                        assistant_content.push(ContentBlock::ToolUse(tu.clone()));
                        tool_calls.push(tu);
                    }
                }
            }
            if !assistant_content.is_empty() {
                self.history
                    .lock()
                    .await
                    .push(Message::new(MessageRole::Assistant, assistant_content));
            }

            final_stop_reason = match stop_reason {
                StopReason::EndTurn => "end_turn",
                StopReason::ToolUse | StopReason::RecoveredToolUse => "tool_use",
                StopReason::MaxTokens => "max_tokens",
            }
            .to_string();

            if !tool_calls.is_empty() {
                let mut results = Vec::with_capacity(tool_calls.len());
                for call in tool_calls {
                    if self.stopped.load(Ordering::SeqCst) {
                        break;
                    }
                    results.push(self.dispatch_one_tool_call(call).await);
                }
                if !results.is_empty() {
                    self.history
                        .lock()
                        .await
                        .push(Message::new(MessageRole::User, results));
                }
                // Loop continues into the next turn automatically.
                continue;
            }

            // No tool calls: run the `stop` hook.
            let stop_ctx = EvalContext {
                agent_id: self.id.clone(),
                stop_reason: Some(final_stop_reason.clone()),
                history: Vec::new(),
                ..Default::default()
            };
            match self.options.hooks().evaluate(HookType::Stop, stop_ctx).await {
                HookOutcome::Deny { reason } => {
                    self.append_user_message(reason).await;
                    continue;
                }
                _ => {
                    self.run_hook_agent_end(&final_stop_reason).await;
                    break;
                }
            }
        }

        let _ = self.outbound.send(RunnerOutbound::LoopComplete);

        // Step 10: if external events queued up while we ran, and the agent
        // is still in a runnable state, re-enter with the next one.
        if !self.stopped.load(Ordering::SeqCst) {
            let next = self.event_queue.lock().await.pop_front();
            if let Some(text) = next {
                return Box::pin(self.run(Some(text))).await;
            }
        }

        Ok(())
    }

    async fn run_hook_agent_start(&self) {
        let ctx = EvalContext {
            agent_id: self.id.clone(),
            ..Default::default()
        };
        let _ = self.options.hooks().evaluate(HookType::AgentStart, ctx).await;
    }

    async fn run_hook_agent_end(&self, stop_reason: &str) {
        let ctx = EvalContext {
            agent_id: self.id.clone(),
            stop_reason: Some(stop_reason.to_string()),
            ..Default::default()
        };
        let _ = self.options.hooks().evaluate(HookType::AgentEnd, ctx).await;
    }

    async fn append_user_message(&self, text: String) {
        let ctx = EvalContext {
            agent_id: self.id.clone(),
            prompt: Some(text.clone()),
            history: Vec::new(),
            ..Default::default()
        };
        let prompt = match self
            .options
            .hooks()
            .evaluate(HookType::UserPromptSubmit, ctx)
            .await
        {
            HookOutcome::Deny { .. } => return,
            HookOutcome::Allow { modified_prompt: Some(p), .. } => p,
            _ => text,
        };
        self.history
            .lock()
            .await
            .push(Message::user(prompt));
    }

    /// Runs one request/stream cycle: build the request, stream the
    /// response through the SSE framer and adapter, feed events into an
    /// accumulator, and check budgets after every `Usage` event. Returns
    /// `Ok(None)` if a budget was exceeded mid-stream (already reported via
    /// `outbound`).
    async fn run_one_turn(&self) -> Result<Option<TurnResult>> {
        let history_snapshot = self.history.lock().await.clone();
        let request_body = {
            let adapter = self.adapter.lock().await;
            adapter.build_request(
                self.options.model(),
                self.options.system_prompt(),
                &history_snapshot,
                self.options.tools(),
                self.options.max_tokens(),
                self.options.temperature(),
            )?
        };

        let request = self.http.post(self.endpoint());
        let request = match self.options.provider() {
            crate::types::ProviderKind::OpenAiChat => request.bearer_auth(self.options.api_key()),
            crate::types::ProviderKind::Anthropic => request
                .header("x-api-key", self.options.api_key())
                .header("anthropic-version", "2023-06-01"),
            // Gemini takes its key as a `?key=` query parameter, not a header.
            crate::types::ProviderKind::Gemini => {
                request.query(&[("key", self.options.api_key())])
            }
        };
        let response = request.json(&request_body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let _ = self.outbound.send(RunnerOutbound::AgentEvent(AgentEvent::Error {
                message: format!("upstream returned {status}: {body}"),
                retryable: status.is_server_error(),
            }));
            return Err(Error::api(format!("upstream returned {status}")));
        }

        let mut framer = SseFramer::new();
        let mut accumulator = EventAccumulator::new();
        let mut stream = response.bytes_stream();
        let mut stop_reason = StopReason::EndTurn;
        let mut turn_usage = (0u32, 0u32);

        use futures::StreamExt;
        while let Some(chunk) = stream.next().await {
            if self.stopped.load(Ordering::SeqCst) {
                // Let the in-flight stream drain into /dev/null (spec.md §5).
                break;
            }
            while self.paused.load(Ordering::SeqCst) && !self.stopped.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }

            let bytes = chunk?;
            for sse_event in framer.feed(&bytes) {
                for event in self.adapter_parse(&sse_event.data).await? {
                    if let AgentEvent::Usage { input_tokens, output_tokens, .. } = &event {
                        turn_usage = (*input_tokens, *output_tokens);
                    }
                    if let AgentEvent::TurnEnd { reason } = &event {
                        stop_reason = *reason;
                    }
                    accumulator.feed(&event);
                    let _ = self.outbound.send(RunnerOutbound::AgentEvent(event));
                }
            }
        }

        if let Some(sse_event) = framer.finish() {
            for event in self.adapter_parse(&sse_event.data).await? {
                accumulator.feed(&event);
                let _ = self.outbound.send(RunnerOutbound::AgentEvent(event));
            }
        }

        let estimated_cost = self
            .adapter
            .lock()
            .await
            .estimate_cost(self.options.model(), turn_usage.0, turn_usage.1);
        if let Some(cost) = estimated_cost {
            let mut usage = self.usage.lock().await;
            usage.input_tokens += turn_usage.0 as u64;
            usage.output_tokens += turn_usage.1 as u64;
            usage.cost_usd += cost;
        } else {
            let mut usage = self.usage.lock().await;
            usage.input_tokens += turn_usage.0 as u64;
            usage.output_tokens += turn_usage.1 as u64;
        }

        if let Some(reason) = self.check_budget().await {
            let _ = self.outbound.send(RunnerOutbound::BudgetExceeded { reason });
            return Ok(None);
        }

        let mut blocks = accumulator.drain();
        if stop_reason == StopReason::MaxTokens {
            for block in &mut blocks {
                if let MaterializedBlock::ToolUse { truncated, .. } = block {
                    *truncated = true;
                }
            }
        }

        Ok(Some(TurnResult { blocks, stop_reason }))
    }

    async fn adapter_parse(&self, payload: &str) -> Result<Vec<AgentEvent>> {
        self.adapter.lock().await.parse_sse_payload(payload)
    }

    async fn check_budget(&self) -> Option<BudgetReason> {
        let usage = *self.usage.lock().await;
        if let Some(max_tokens) = self.options.max_total_tokens() {
            if usage.input_tokens + usage.output_tokens > max_tokens {
                return Some(BudgetReason::TokenLimit);
            }
        }
        if let Some(max_cost) = self.options.max_cost_usd() {
            if usage.cost_usd > max_cost {
                return Some(BudgetReason::CostLimit);
            }
        }
        None
    }

    /// Appends the provider-specific path to `base_url` (spec.md §6): OpenAI-
    /// compatible servers expect `/chat/completions`, Anthropic expects
    /// `/v1/messages`-shaped bases to gain `/messages`, and Gemini's path
    /// embeds the model name and a streaming query flag. Mirrors the
    /// teacher's `format!("{}/chat/completions", options.base_url)`
    /// (`client.rs::send`), generalized to the other two providers.
    fn endpoint(&self) -> String {
        let base = self.options.base_url().trim_end_matches('/');
        match self.options.provider() {
            crate::types::ProviderKind::OpenAiChat => format!("{base}/chat/completions"),
            crate::types::ProviderKind::Anthropic => format!("{base}/messages"),
            crate::types::ProviderKind::Gemini => {
                format!("{base}/models/{}:streamGenerateContent?alt=sse", self.options.model())
            }
        }
    }

    async fn dispatch_one_tool_call(&self, call: ToolUseBlock) -> ContentBlock {
        let _ = self.outbound.send(RunnerOutbound::ToolDispatched {
            tool_use_id: call.id.clone(),
            tool_name: call.name.clone(),
        });

        if call.truncated {
            let result = ToolResultBlock::error(
                call.id.clone(),
                Value::String("tool call truncated by max_tokens before it finished".into()),
            );
            let _ = self.outbound.send(RunnerOutbound::ToolResult {
                tool_use_id: call.id,
                is_error: true,
            });
            return ContentBlock::ToolResult(result);
        }

        let pre_ctx = EvalContext {
            agent_id: self.id.clone(),
            tool_name: Some(call.name.clone()),
            tool_input: Some(call.input.clone()),
            tool_use_id: Some(call.id.clone()),
            history: Vec::new(),
            ..Default::default()
        };
        let input = match self.options.hooks().evaluate(HookType::PreToolUse, pre_ctx).await {
            HookOutcome::Deny { reason } => {
                let _ = self.outbound.send(RunnerOutbound::ToolResult {
                    tool_use_id: call.id.clone(),
                    is_error: true,
                });
                return ContentBlock::ToolResult(ToolResultBlock::error(
                    call.id,
                    Value::String(reason),
                ));
            }
            HookOutcome::Allow { modified_input: Some(input), .. } => input,
            _ => call.input,
        };

        let outcome = self.dispatcher.dispatch(&call.name, input.clone()).await;
        let (content, is_error) = match outcome {
            Ok(value) => (value, false),
            Err(e) => (Value::String(e.to_string()), true),
        };

        let post_ctx = EvalContext {
            agent_id: self.id.clone(),
            tool_name: Some(call.name.clone()),
            tool_input: Some(input),
            tool_use_id: Some(call.id.clone()),
            tool_result: Some(content.clone()),
            history: Vec::new(),
            ..Default::default()
        };
        let _ = self.options.hooks().evaluate(HookType::PostToolUse, post_ctx).await;

        let _ = self.outbound.send(RunnerOutbound::ToolResult {
            tool_use_id: call.id.clone(),
            is_error,
        });

        let result = if is_error {
            ToolResultBlock::error(call.id, content)
        } else {
            ToolResultBlock::new(call.id, content)
        };
        ContentBlock::ToolResult(result)
    }
}

struct TurnResult {
    blocks: Vec<MaterializedBlock>,
    stop_reason: StopReason,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::Hooks;
    use crate::types::ProviderKind;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct NoopHost;

    #[async_trait]
    impl crate::dispatcher::CapabilityHost for NoopHost {
        async fn runjs(&self, _code: &str) -> Result<Value> {
            Ok(Value::Null)
        }
        async fn dom(&self, _input: Value) -> Result<Value> {
            Ok(Value::Null)
        }
        async fn fetch(&self, _input: Value) -> Result<Value> {
            Ok(Value::Null)
        }
        async fn storage(&self, _input: Value) -> Result<Value> {
            Ok(Value::Null)
        }
        async fn files(&self, _path: &str, _input: Value) -> Result<Value> {
            Ok(Value::Null)
        }
        async fn capabilities(&self) -> Result<Value> {
            Ok(Value::Null)
        }
        async fn state(&self, _input: Value) -> Result<Value> {
            Ok(Value::Null)
        }
        async fn view_state(&self, _input: Value) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    fn opts() -> AgentOptions {
        AgentOptions::builder()
            .model("gpt-4o-mini")
            .base_url("http://localhost:1234/v1")
            .provider(ProviderKind::OpenAiChat)
            .max_total_tokens(1000)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn budget_exceeded_emits_token_limit_without_new_dispatch() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(ToolDispatcher::new(Vec::new()).with_host(Arc::new(NoopHost)));
        let runner = AgentRunner::new("agent-1", opts(), dispatcher, tx);

        *runner.usage.lock().await = Usage {
            input_tokens: 900,
            output_tokens: 200,
            cost_usd: 0.0,
        };

        let reason = runner.check_budget().await;
        assert_eq!(reason, Some(BudgetReason::TokenLimit));
        drop(rx.try_recv());
    }

    #[tokio::test]
    async fn pause_then_stop_clears_paused_flag() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(ToolDispatcher::new(Vec::new()));
        let runner = AgentRunner::new("agent-1", opts(), dispatcher, tx);
        runner.pause();
        assert!(runner.paused.load(Ordering::SeqCst));
        runner.stop();
        assert!(!runner.paused.load(Ordering::SeqCst));
        assert!(runner.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn event_queue_drops_silently_past_capacity() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(ToolDispatcher::new(Vec::new()));
        let runner = AgentRunner::new("agent-1", opts(), dispatcher, tx);
        for i in 0..(EVENT_QUEUE_CAPACITY + 5) {
            runner.push_external_event(format!("event-{i}")).await;
        }
        assert_eq!(runner.event_queue.lock().await.len(), EVENT_QUEUE_CAPACITY);
    }

    #[tokio::test]
    async fn truncated_tool_call_short_circuits_to_error_result() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(ToolDispatcher::new(Vec::new()));
        let runner = AgentRunner::new("agent-1", opts(), dispatcher, tx);
        let call = ToolUseBlock::new("tu1", "search", Value::Null).with_truncated(true);
        match runner.dispatch_one_tool_call(call).await {
            ContentBlock::ToolResult(result) => assert_eq!(result.is_error, Some(true)),
            _ => panic!("expected tool result"),
        }
    }

    #[tokio::test]
    async fn pre_tool_use_deny_short_circuits_dispatch() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let hooks = Hooks::new().add_pre_tool_use(|event| async move {
            if event.tool_name == "bash" {
                return Some(crate::hooks::HookDecision::block("no shell"));
            }
            None
        });
        let options = AgentOptions::builder()
            .model("gpt-4o-mini")
            .base_url("http://localhost:1234/v1")
            .hooks(hooks)
            .build()
            .unwrap();
        let dispatcher = Arc::new(ToolDispatcher::new(Vec::new()));
        let runner = AgentRunner::new("agent-1", options, dispatcher, tx);
        let call = ToolUseBlock::new("tu1", "bash", Value::Null);
        match runner.dispatch_one_tool_call(call).await {
            ContentBlock::ToolResult(result) => assert_eq!(result.is_error, Some(true)),
            _ => panic!("expected tool result"),
        }
    }

    #[test]
    fn terminal_states_are_killed_and_error_only() {
        assert!(AgentState::Killed.is_terminal());
        assert!(AgentState::Error.is_terminal());
        assert!(!AgentState::Stopped.is_terminal());
        assert!(!AgentState::Paused.is_terminal());
    }

    #[allow(dead_code)]
    fn _assert_send_sync() {
        fn assert_send<T: Send>() {}
        assert_send::<AgentRunner>();
        let _ = AtomicUsize::new(0);
    }
}
