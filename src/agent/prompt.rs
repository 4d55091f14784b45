//! The fixed per-iteration prompt handed to the agent.

use super::{AgentConfig, DONE_MARKER};

/// Build the iteration prompt. The template is deliberately fixed: the agent
/// picks its own unit of work from the task list, so the supervisor never
/// needs to serialize task details into the prompt.
pub fn build_prompt(config: &AgentConfig) -> String {
    let mut prompt = format!(
        "You are working through the sprint task list of this repository.\n\
         \n\
         1. Read TASKS.md for the task list and PROGRESS.md for the progress log.\n\
         2. Choose the single highest-priority incomplete unit of work. Do only that one.\n\
         3. Implement it, then verify your work with type-checking and the test suite\n\
            (or the project-appropriate build and test commands).\n\
         4. Update TASKS.md with the outcome of your work.\n\
         5. Append a short dated note to PROGRESS.md describing what you did.\n\
         6. Make exactly one git commit with a clear message. Never push.\n\
         \n\
         If every task in TASKS.md is already complete, make no changes and output\n\
         <done>{}</done> on its own line.\n",
        DONE_MARKER
    );

    if let Some(style) = &config.coding_style {
        if !style.trim().is_empty() {
            prompt.push_str("\nProject coding style guidance:\n");
            prompt.push_str(style);
            prompt.push('\n');
        }
    }

    prompt
}
