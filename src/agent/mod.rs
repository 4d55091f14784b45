//! Agent adapter — one contract over heterogeneous coding-agent backends.
//!
//! ## Overview
//!
//! The supervisor invokes exactly one agent per iteration through the
//! `AgentRunner` trait and gets back a `{output, exit_code}` pair:
//!
//! | Exit code | Meaning                                    |
//! |-----------|--------------------------------------------|
//! | 0         | Task attempt succeeded                     |
//! | 1         | Generic failure — task goes to review      |
//! | 2         | Rate-limited — halt the run, retry later   |
//!
//! Backends are selected by name through `create_agent`; an unknown name
//! fails at construction, before any run record is touched.
//!
//! | Module   | Backend                                              |
//! |----------|------------------------------------------------------|
//! | `claude` | Streaming CLI, stream-json output drained into the log sink |
//! | `codex`  | Plain subprocess, combined output, 30-minute timeout |
//!
//! The distinction between exit 1 and exit 2 is load-bearing: callers back
//! off and retry on 2, but move on to the next task on 1. Classification is
//! a case-insensitive phrase match on the error text and transcript, with
//! the phrase list extensible through project settings because a different
//! vendor's throttling message is a known false-negative risk.

pub mod claude;
pub mod codex;
pub mod prompt;
pub mod stream;

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;

use crate::errors::AgentError;
use crate::logsink::LogSink;
use crate::models::{AgentSettings, PermissionMode};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_RATE_LIMITED: i32 = 2;

/// Sentinel the prompt instructs the agent to emit when the task list has
/// no remaining work.
pub const DONE_MARKER: &str = "ALL_TASKS_COMPLETE";

/// Throttling vocabulary observed across agent vendors. Matched
/// case-insensitively against error text and the accumulated transcript.
pub const DEFAULT_RATE_LIMIT_PHRASES: &[&str] = &[
    "usage limit",
    "rate limit",
    "rate exceeded",
    "too many requests",
    "429",
    "resets ",
    "overloaded",
];

/// Supported agent backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    Claude,
    Codex,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
        }
    }

    fn default_binary(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude" => Ok(Self::Claude),
            "codex" => Ok(Self::Codex),
            _ => Err(AgentError::UnsupportedAgent {
                name: s.to_string(),
            }),
        }
    }
}

/// Validated agent configuration, derived from project settings at run
/// setup. Construction fails on an unknown agent name.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub kind: AgentKind,
    pub binary: String,
    pub model: Option<String>,
    pub extra_args: Vec<String>,
    pub coding_style: Option<String>,
    pub permission_mode: PermissionMode,
    pub rate_limit_phrases: Vec<String>,
}

impl AgentConfig {
    pub fn from_settings(
        agent: &AgentSettings,
        coding_style: Option<String>,
    ) -> Result<Self, AgentError> {
        let kind: AgentKind = agent.name.parse()?;
        let binary = match kind {
            AgentKind::Claude => std::env::var("CLAUDE_CMD"),
            AgentKind::Codex => std::env::var("CODEX_CMD"),
        }
        .unwrap_or_else(|_| kind.default_binary().to_string());

        let mut rate_limit_phrases: Vec<String> = DEFAULT_RATE_LIMIT_PHRASES
            .iter()
            .map(|p| p.to_string())
            .collect();
        rate_limit_phrases.extend(agent.rate_limit_phrases.iter().cloned());

        Ok(Self {
            kind,
            binary,
            model: agent.model.clone(),
            extra_args: agent.extra_args.clone(),
            coding_style,
            permission_mode: agent.permission_mode.unwrap_or_default(),
            rate_limit_phrases,
        })
    }
}

/// Everything one invocation needs: where to work, where to log, and which
/// iteration this is (1-based, for log annotation).
pub struct AgentContext<'a> {
    pub sandbox_dir: &'a Path,
    pub sink: &'a mut dyn LogSink,
    pub iteration: u32,
}

/// Result of one agent invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentOutcome {
    /// Full captured transcript of the interaction.
    pub output: String,
    pub exit_code: i32,
}

impl AgentOutcome {
    pub fn is_success(&self) -> bool {
        self.exit_code == EXIT_SUCCESS
    }

    pub fn is_rate_limited(&self) -> bool {
        self.exit_code == EXIT_RATE_LIMITED
    }

    /// The agent announced there is nothing left on the task list.
    pub fn signals_no_more_work(&self) -> bool {
        self.output.contains(DONE_MARKER)
    }
}

/// Uniform interface over the agent backends. One invocation per iteration;
/// all file mutation happens inside the external agent process, never here.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(&self, ctx: AgentContext<'_>) -> Result<AgentOutcome, AgentError>;
}

/// Factory keyed on the validated agent kind.
pub fn create_agent(config: &AgentConfig) -> Result<Box<dyn AgentRunner>, AgentError> {
    match config.kind {
        AgentKind::Claude => Ok(Box::new(claude::ClaudeAgent::new(config.clone()))),
        AgentKind::Codex => Ok(Box::new(codex::CodexAgent::new(config.clone()))),
    }
}

/// Case-insensitive throttling-phrase match over error text and transcript.
pub fn matches_rate_limit(text: &str, phrases: &[String]) -> bool {
    let haystack = text.to_lowercase();
    phrases
        .iter()
        .any(|p| !p.is_empty() && haystack.contains(&p.to_lowercase()))
}

/// Classify a failed invocation: rate-limited (2) when the error message or
/// the transcript matches the throttling vocabulary, generic failure (1)
/// otherwise.
pub fn classify_failure(error_text: &str, transcript: &str, phrases: &[String]) -> i32 {
    if matches_rate_limit(error_text, phrases) || matches_rate_limit(transcript, phrases) {
        EXIT_RATE_LIMITED
    } else {
        EXIT_FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AgentSettings;

    fn phrases() -> Vec<String> {
        DEFAULT_RATE_LIMIT_PHRASES
            .iter()
            .map(|p| p.to_string())
            .collect()
    }

    fn settings(name: &str) -> AgentSettings {
        AgentSettings {
            name: name.to_string(),
            model: None,
            permission_mode: None,
            extra_args: vec![],
            rate_limit_phrases: vec![],
        }
    }

    #[test]
    fn test_agent_kind_parses_known_names() {
        assert_eq!("claude".parse::<AgentKind>().unwrap(), AgentKind::Claude);
        assert_eq!("codex".parse::<AgentKind>().unwrap(), AgentKind::Codex);
    }

    #[test]
    fn test_agent_kind_rejects_unknown_name() {
        let err = "gemini".parse::<AgentKind>().unwrap_err();
        assert!(matches!(err, AgentError::UnsupportedAgent { name } if name == "gemini"));
    }

    #[test]
    fn test_config_from_settings_rejects_unknown_agent() {
        assert!(AgentConfig::from_settings(&settings("cursor"), None).is_err());
    }

    #[test]
    fn test_config_from_settings_merges_extra_phrases() {
        let mut s = settings("claude");
        s.rate_limit_phrases = vec!["quota exhausted".to_string()];
        let config = AgentConfig::from_settings(&s, None).unwrap();
        assert!(config
            .rate_limit_phrases
            .iter()
            .any(|p| p == "quota exhausted"));
        assert!(config.rate_limit_phrases.iter().any(|p| p == "usage limit"));
    }

    #[test]
    fn test_classify_rate_exceeded_as_backoff() {
        assert_eq!(
            classify_failure("Rate Exceeded", "", &phrases()),
            EXIT_RATE_LIMITED
        );
    }

    #[test]
    fn test_classify_429_as_backoff() {
        assert_eq!(
            classify_failure("HTTP 429 from upstream", "", &phrases()),
            EXIT_RATE_LIMITED
        );
    }

    #[test]
    fn test_classify_usage_limit_in_transcript() {
        assert_eq!(
            classify_failure(
                "process exited with code 1",
                "You have hit your Usage Limit for today",
                &phrases()
            ),
            EXIT_RATE_LIMITED
        );
    }

    #[test]
    fn test_classify_resets_phrase() {
        assert_eq!(
            classify_failure("limit reached, resets 3am", "", &phrases()),
            EXIT_RATE_LIMITED
        );
    }

    #[test]
    fn test_classify_other_errors_as_generic_failure() {
        assert_eq!(
            classify_failure("segmentation fault", "compile error in main.rs", &phrases()),
            EXIT_FAILURE
        );
    }

    #[test]
    fn test_classify_uses_configured_extra_phrase() {
        let mut p = phrases();
        p.push("quota exhausted".to_string());
        assert_eq!(
            classify_failure("Quota Exhausted, try later", "", &p),
            EXIT_RATE_LIMITED
        );
    }

    #[test]
    fn test_outcome_helpers() {
        let ok = AgentOutcome {
            output: "done".into(),
            exit_code: EXIT_SUCCESS,
        };
        assert!(ok.is_success());
        assert!(!ok.is_rate_limited());

        let limited = AgentOutcome {
            output: String::new(),
            exit_code: EXIT_RATE_LIMITED,
        };
        assert!(limited.is_rate_limited());
    }

    #[test]
    fn test_outcome_detects_done_marker() {
        let outcome = AgentOutcome {
            output: format!("checked everything\n<done>{}</done>\n", DONE_MARKER),
            exit_code: EXIT_SUCCESS,
        };
        assert!(outcome.signals_no_more_work());
    }

    #[test]
    fn test_create_agent_for_both_kinds() {
        for name in &["claude", "codex"] {
            let config = AgentConfig::from_settings(&settings(name), None).unwrap();
            assert!(create_agent(&config).is_ok());
        }
    }
}
