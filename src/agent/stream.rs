//! Parsing and rendering of the streaming agent's stream-json output.
//!
//! Each stdout line is one JSON event. Events are rendered into plain
//! transcript lines with color-coded markers — cyan for tool invocations,
//! green/red for the terminal result — and appended to the log sink in
//! arrival order.

use console::style;
use serde::Deserialize;
use serde_json::Value;

/// Events from the agent CLI's stream-json output format.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "assistant")]
    Assistant {
        message: AssistantMessage,
        #[serde(default)]
        session_id: String,
    },

    #[serde(rename = "user")]
    User {},

    #[serde(rename = "result")]
    Result {
        subtype: String,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: bool,
    },

    #[serde(rename = "system")]
    System { subtype: String },
}

#[derive(Debug, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "tool_use")]
    ToolUse {
        name: String,
        input: Value,
        #[serde(default)]
        id: String,
    },

    #[serde(rename = "text")]
    Text { text: String },
}

/// Render one event into transcript text. Returns an empty string for
/// events with nothing operator-visible (system init, tool results).
pub fn render_event(event: &StreamEvent) -> String {
    match event {
        StreamEvent::Assistant { message, .. } => {
            let mut out = String::new();
            for block in &message.content {
                match block {
                    ContentBlock::Text { text } => {
                        out.push_str(text);
                        if !text.ends_with('\n') {
                            out.push('\n');
                        }
                    }
                    ContentBlock::ToolUse { name, input, .. } => {
                        out.push_str(&format!(
                            "{} {}\n",
                            style("»").cyan(),
                            style(describe_tool_use(name, input)).cyan()
                        ));
                    }
                }
            }
            out
        }
        StreamEvent::Result {
            result, is_error, ..
        } => {
            let text = result.as_deref().unwrap_or("");
            if *is_error {
                format!("{} {}\n", style("✗").red(), style(text).red())
            } else {
                format!("{} {}\n", style("✓").green(), text)
            }
        }
        StreamEvent::User {} | StreamEvent::System { .. } => String::new(),
    }
}

/// Extract a human-readable description from a tool-use event.
pub fn describe_tool_use(name: &str, input: &Value) -> String {
    match name {
        "Read" | "Write" | "Edit" => {
            let path = input
                .get("file_path")
                .and_then(|v| v.as_str())
                .map(shorten_path)
                .unwrap_or_else(|| "file".to_string());
            let verb = match name {
                "Read" => "Reading",
                "Write" => "Creating",
                _ => "Editing",
            };
            format!("{}: {}", verb, path)
        }
        "Bash" => {
            let cmd = input
                .get("command")
                .and_then(|v| v.as_str())
                .map(|s| truncate_str(s, 60))
                .unwrap_or_else(|| "command".to_string());
            format!("Running: {}", cmd)
        }
        "Glob" | "Grep" => {
            let pattern = input
                .get("pattern")
                .and_then(|v| v.as_str())
                .map(|s| truncate_str(s, 40))
                .unwrap_or_else(|| "pattern".to_string());
            format!("Searching: {}", pattern)
        }
        _ => name.to_string(),
    }
}

/// Shorten a file path to its last two components.
fn shorten_path(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() <= 2 {
        path.to_string()
    } else {
        parts[parts.len() - 2..].join("/")
    }
}

fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
