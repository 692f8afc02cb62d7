//! Calculator with Tools Demo
//!
//! Demonstrates registering local tools with a `ToolDispatcher`, wiring them
//! into an `AgentContainer`, and watching the canonical event stream as the
//! loop dispatches tool calls and resumes with their results.
//!
//! Run a local OpenAI-compatible server (e.g. `ollama serve`) before
//! running this demo, or point `--base-url` somewhere else.

use std::sync::Arc;

use open_agent_runtime::{AgentContainer, AgentOptions, RunnerOutbound, ToolDispatcher, tool};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let add_tool = tool("add", "Add two numbers")
        .param("a", "number")
        .param("b", "number")
        .build(|args| async move {
            let a = args["a"].as_f64().unwrap_or(0.0);
            let b = args["b"].as_f64().unwrap_or(0.0);
            Ok(json!({ "result": a + b }))
        });

    let subtract_tool = tool("subtract", "Subtract two numbers")
        .param("a", "number")
        .param("b", "number")
        .build(|args| async move {
            let a = args["a"].as_f64().unwrap_or(0.0);
            let b = args["b"].as_f64().unwrap_or(0.0);
            Ok(json!({ "result": a - b }))
        });

    let multiply_tool = tool("multiply", "Multiply two numbers")
        .param("a", "number")
        .param("b", "number")
        .build(|args| async move {
            let a = args["a"].as_f64().unwrap_or(0.0);
            let b = args["b"].as_f64().unwrap_or(0.0);
            Ok(json!({ "result": a * b }))
        });

    let divide_tool = tool("divide", "Divide two numbers")
        .param("a", "number")
        .param("b", "number")
        .build(|args| async move {
            let a = args["a"].as_f64().unwrap_or(0.0);
            let b = args["b"].as_f64().unwrap_or(0.0);
            if b == 0.0 {
                return Ok(json!({ "error": "Cannot divide by zero" }));
            }
            Ok(json!({ "result": a / b }))
        });

    let options = AgentOptions::builder()
        .system_prompt(
            "You are a helpful calculator assistant. \
             Use the provided tools to perform calculations. \
             Always show your work and explain the result.",
        )
        .model("qwen3:8b")
        .base_url("http://localhost:11434/v1")
        .tools(vec![add_tool, subtract_tool, multiply_tool, divide_tool])
        .max_turns(5)
        .temperature(0.1)
        .build()?;

    // The dispatcher owns the same tools the loop declares to the provider;
    // with no `CapabilityHost` attached, tagged tool names (`dom`, `fetch`, ...)
    // would fail, but this demo only needs the plugin registry path.
    let dispatcher = Arc::new(ToolDispatcher::new(options.tools().to_vec()));
    let container = AgentContainer::new("calculator-demo", options, dispatcher, None);
    let mut events = container.subscribe_events().await;

    println!("{}", "=".repeat(70));
    println!("CALCULATOR TOOLS DEMO");
    println!("{}", "=".repeat(70));

    let queries = [
        "What is 25 plus 17?",
        "Calculate 144 divided by 12",
        "What's 7 times 8, then add 5?",
    ];

    for query in queries {
        println!("\nUser: {query}");
        println!("{}", "-".repeat(50));
        container.start(Some(query.to_string())).await?;

        loop {
            match events.recv().await {
                Some(RunnerOutbound::AgentEvent(event)) => {
                    print_event(&event);
                }
                Some(RunnerOutbound::ToolDispatched { tool_use_id, tool_name }) => {
                    println!("  dispatching {tool_name} ({tool_use_id})");
                }
                Some(RunnerOutbound::ToolResult { tool_use_id, is_error }) => {
                    println!("  result for {tool_use_id} (error={is_error})");
                }
                Some(RunnerOutbound::LoopComplete) => break,
                Some(RunnerOutbound::BudgetExceeded { reason }) => {
                    println!("  budget exceeded: {reason:?}");
                    break;
                }
                Some(RunnerOutbound::StateChanged { .. }) => {}
                None => break,
            }
        }
    }

    println!("\n{}", "=".repeat(70));
    println!("Demo complete!");
    Ok(())
}

fn print_event(event: &open_agent_runtime::AgentEvent) {
    use open_agent_runtime::{AgentEvent, BlockDelta};
    match event {
        AgentEvent::BlockDelta { delta: BlockDelta::TextDelta { text }, .. } => {
            print!("{text}");
        }
        AgentEvent::TurnEnd { reason } => {
            println!("\n  [turn end: {reason:?}]");
        }
        _ => {}
    }
}
