//! End-to-end integration test: a container drives a runner through two
//! turns against a mocked OpenAI-compatible endpoint — a tool call in the
//! first turn, the final answer in the second — exercising the adapter,
//! the runner's SSE consumption loop, and the tool dispatcher together
//! (spec.md §8, scenario 1, generalized from Anthropic to OpenAI-Chat wire
//! shape since that is the adapter this mocks).

use std::sync::Arc;

use open_agent_runtime::{
    AgentContainer, AgentEvent, AgentOptions, BlockDelta, ProviderKind, RunnerOutbound,
    ToolDispatcher, tool,
};
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FIRST_TURN_SSE: &str = concat!(
    "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"tu1\",\"function\":{\"name\":\"add\",\"arguments\":\"\"}}]}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{\\\"a\\\":2,\\\"b\\\":2}\"}}]}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
    "data: [DONE]\n\n",
);

const SECOND_TURN_SSE: &str = concat!(
    "data: {\"choices\":[{\"delta\":{\"content\":\"The answer is 4.\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
    "data: [DONE]\n\n",
);

#[tokio::test]
async fn two_turn_tool_round_trip_dispatches_and_resumes() {
    let server = MockServer::start().await;

    // The second request carries the tool_result as a `role: tool` message
    // with a `tool_call_id`, which the first request cannot contain yet —
    // that distinguishes the two turns without a stateful mock.
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("tool_call_id"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(SECOND_TURN_SSE),
        )
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(FIRST_TURN_SSE),
        )
        .mount(&server)
        .await;

    let add_tool = tool("add", "Add two numbers")
        .param("a", "number")
        .param("b", "number")
        .build(|args| async move {
            let a = args["a"].as_f64().unwrap_or(0.0);
            let b = args["b"].as_f64().unwrap_or(0.0);
            Ok(json!({ "result": a + b }))
        });

    let options = AgentOptions::builder()
        .model("gpt-test")
        .base_url(server.uri())
        .provider(ProviderKind::OpenAiChat)
        .tool(add_tool)
        .build()
        .unwrap();

    let dispatcher = Arc::new(ToolDispatcher::new(options.tools().to_vec()));
    let container = AgentContainer::new("agent-1", options, dispatcher, None);
    let mut events = container.subscribe_events().await;
    container.start(Some("What is 2+2?".to_string())).await.unwrap();

    let mut saw_tool_dispatch = false;
    let mut saw_tool_result_ok = false;
    let mut final_text = String::new();

    loop {
        match events.recv().await {
            Some(RunnerOutbound::ToolDispatched { tool_name, .. }) => {
                assert_eq!(tool_name, "add");
                saw_tool_dispatch = true;
            }
            Some(RunnerOutbound::ToolResult { is_error, .. }) => {
                saw_tool_result_ok = !is_error;
            }
            Some(RunnerOutbound::AgentEvent(AgentEvent::BlockDelta {
                delta: BlockDelta::TextDelta { text },
                ..
            })) => {
                final_text.push_str(&text);
            }
            Some(RunnerOutbound::LoopComplete) => break,
            Some(_) => {}
            None => break,
        }
    }

    assert!(saw_tool_dispatch, "expected the add tool to be dispatched");
    assert!(saw_tool_result_ok, "expected the tool result to be reported as success");
    assert_eq!(final_text, "The answer is 4.");
}
