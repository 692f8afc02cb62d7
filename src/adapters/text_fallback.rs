//! Text-as-tool-call recovery (spec.md §4.2, closing paragraph).
//!
//! Some models, when they mean to call a tool, emit prose of the form
//! `<toolName>\n{...json...}` instead of a structured tool call. After a
//! turn ends with zero structured tool calls but non-empty text, each text
//! block is scanned against the set of declared tool names; on the first
//! balanced JSON object following `<toolName>\n` the block is re-synthesized
//! into a `tool_use`, the text is excised (so replay doesn't double-execute
//! it), and the runner re-classifies the turn's stop reason as recovered
//! tool use. Detection is bounded by the declared tool name set and uses a
//! hand-rolled balanced-brace scanner that respects string escapes, the same
//! discipline the teacher's `ToolCallAggregator` uses when accumulating
//! partial JSON.

use crate::events::MaterializedBlock;
use uuid::Uuid;

/// Scans `text` for `<toolName>\n{...}` where `toolName` is one of
/// `declared_tools`, and the `{...}` is the first balanced JSON object
/// immediately following the newline. Returns the recovered `ToolUse` block
/// and the remaining text with the match excised, or `None` if no declared
/// tool name matches this shape.
pub fn recover_tool_call(
    text: &str,
    declared_tools: &[String],
) -> Option<(MaterializedBlock, String)> {
    for tool_name in declared_tools {
        let prefix = format!("{tool_name}\n");
        let Some(start) = text.find(&prefix) else {
            continue;
        };
        let json_start = start + prefix.len();
        let Some((obj_start, obj_end)) = find_balanced_object(&text[json_start..]) else {
            continue;
        };
        let abs_start = json_start + obj_start;
        let abs_end = json_start + obj_end;
        let candidate = &text[abs_start..abs_end];
        let Ok(input) = serde_json::from_str::<serde_json::Value>(candidate) else {
            continue;
        };

        let remaining = format!("{}{}", &text[..start], &text[abs_end..]);
        let id = format!("recovered_{}", Uuid::new_v4());
        return Some((
            MaterializedBlock::ToolUse {
                id,
                name: tool_name.clone(),
                input,
                truncated: false,
                thought_signature: None,
            },
            remaining,
        ));
    }
    None
}

/// Finds the byte range of the first top-level balanced `{...}` substring
/// in `text`, respecting string literals and escapes so braces inside
/// strings don't confuse the scan. Returns `None` if `text` doesn't open
/// with a `{` or never balances.
fn find_balanced_object(text: &str) -> Option<(usize, usize)> {
    let bytes = text.as_bytes();
    if bytes.first() != Some(&b'{') {
        return None;
    }

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some((0, offset + 1));
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools() -> Vec<String> {
        vec!["dom".to_string(), "bash".to_string()]
    }

    #[test]
    fn recovers_declared_tool_call_shape() {
        let text = "dom\n{\"action\":\"create\",\"html\":\"<p>hi</p>\"}";
        let (block, remaining) = recover_tool_call(text, &tools()).expect("recovered");
        match block {
            MaterializedBlock::ToolUse { name, input, .. } => {
                assert_eq!(name, "dom");
                assert_eq!(input["action"], "create");
            }
            _ => panic!("expected tool use"),
        }
        assert_eq!(remaining, "");
    }

    #[test]
    fn ignores_tool_names_not_declared() {
        let text = "search\n{\"query\":\"x\"}";
        assert!(recover_tool_call(text, &tools()).is_none());
    }

    #[test]
    fn requires_newline_directly_before_json() {
        let text = "dom {\"action\":\"create\"}";
        assert!(recover_tool_call(text, &tools()).is_none());
    }

    #[test]
    fn plain_text_with_no_tool_name_prefix_returns_none() {
        assert!(recover_tool_call("just a normal reply", &tools()).is_none());
    }

    #[test]
    fn braces_inside_strings_do_not_break_balance_scan() {
        let text = "bash\n{\"cmd\": \"echo '{ not a brace }'\"}";
        let (block, _) = recover_tool_call(text, &tools()).expect("recovered");
        match block {
            MaterializedBlock::ToolUse { name, .. } => assert_eq!(name, "bash"),
            _ => panic!("expected tool use"),
        }
    }

    #[test]
    fn preserves_surrounding_text_outside_the_match() {
        let text = "Sure, I'll do that.\ndom\n{\"action\":\"noop\"}\nDone.";
        let (_, remaining) = recover_tool_call(text, &tools()).expect("recovered");
        assert_eq!(remaining, "Sure, I'll do that.\n\nDone.");
    }
}
