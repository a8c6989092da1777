//! Natural language in, one shell command out.
//!
//! The translator only builds the prompt, calls the backend and cleans up the
//! answer. It never runs anything; the answer passes the safety policy before
//! it is returned.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::OsFamily;
use crate::error::TranslateError;
use crate::history::HistoryEntry;
use crate::llm::CompletionBackend;
use crate::safety::SafetyPolicy;

/// Answer the model gives when a request has no sensible command.
const UNSUPPORTED_SENTINEL: &str = "UNSUPPORTED";

#[derive(Debug, Clone)]
pub struct TranslationRequest {
    pub text: String,
    pub current_directory: PathBuf,
    pub os_family: OsFamily,
    pub history: Vec<HistoryEntry>,
}

impl TranslationRequest {
    pub fn new(text: &str, current_directory: PathBuf, os_family: OsFamily) -> Self {
        Self {
            text: text.to_string(),
            current_directory,
            os_family,
            history: Vec::new(),
        }
    }

    pub fn with_history(mut self, history: Vec<HistoryEntry>) -> Self {
        self.history = history;
        self
    }
}

pub struct Translator {
    backend: Arc<dyn CompletionBackend>,
    policy: Arc<dyn SafetyPolicy>,
}

impl Translator {
    pub fn new(backend: Arc<dyn CompletionBackend>, policy: Arc<dyn SafetyPolicy>) -> Self {
        Self { backend, policy }
    }

    pub async fn translate(&self, request: &TranslationRequest) -> Result<String, TranslateError> {
        let text = request.text.trim();
        if text.is_empty() {
            return Err(TranslateError::EmptyInput);
        }

        let system = system_prompt(request.os_family);
        let user = user_prompt(request);
        let raw = self.backend.complete(&system, &user).await?;
        debug!(raw = %raw, "backend answered");

        let command = clean_response(&raw)?;
        if let Some(rule) = self.policy.check(&command) {
            warn!(command = %command, rule = %rule, "refusing unsafe command");
            return Err(TranslateError::UnsafeCommand { command, rule });
        }
        Ok(command)
    }
}

fn system_prompt(os: OsFamily) -> String {
    let shell = match os {
        OsFamily::Windows => "cmd.exe",
        _ => "a POSIX sh",
    };
    format!(
        "You translate requests written in plain language into a single shell command.\n\
         The command runs on {os} under {shell}.\n\
         Reply with exactly one line containing only the command: no explanation, \
         no markdown, no surrounding quotes.\n\
         To change directory reply with a bare `cd <path>` and nothing else.\n\
         Prefer commands that only read unless the request clearly asks to modify something.\n\
         If the request cannot be done with a shell command, reply with {UNSUPPORTED_SENTINEL}."
    )
}

fn user_prompt(request: &TranslationRequest) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "OS: {}", request.os_family);
    let _ = writeln!(
        prompt,
        "Current directory: {}",
        request.current_directory.display()
    );
    if !request.history.is_empty() {
        let _ = writeln!(prompt, "Recent commands (oldest first):");
        for entry in &request.history {
            let _ = writeln!(prompt, "- {:?} -> {}", entry.request, entry.command);
        }
    }
    let _ = write!(prompt, "Request: {}", request.text.trim());
    prompt
}

/// Strips markdown fences, inline backticks and prompt markers, and insists
/// on exactly one remaining line.
pub fn clean_response(raw: &str) -> Result<String, TranslateError> {
    let body = fenced_body(raw).unwrap_or(raw);

    let lines: Vec<&str> = body
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    let line = match lines.as_slice() {
        [] => {
            return Err(TranslateError::MalformedResponse(
                "backend returned no command".into(),
            ))
        }
        [line] => *line,
        more => {
            return Err(TranslateError::MalformedResponse(format!(
                "expected a single command, got {} lines",
                more.len()
            )))
        }
    };

    let line = line
        .strip_prefix('`')
        .and_then(|l| l.strip_suffix('`'))
        .unwrap_or(line);
    let line = line.strip_prefix("$ ").unwrap_or(line).trim();

    if line.is_empty() {
        return Err(TranslateError::MalformedResponse(
            "backend returned no command".into(),
        ));
    }
    if line == UNSUPPORTED_SENTINEL {
        return Err(TranslateError::MalformedResponse(
            "request cannot be expressed as a shell command".into(),
        ));
    }
    Ok(line.to_string())
}

/// Language tags models put after an opening fence.
const FENCE_LANGUAGES: &[&str] = &[
    "bash", "sh", "shell", "zsh", "console", "cmd", "bat", "powershell", "ps1",
];

/// Contents of the first ``` block, without the fence markers.
fn fenced_body(raw: &str) -> Option<&str> {
    let open = raw.find("```")?;
    let after_open = &raw[open + 3..];
    let end = after_open.find("```").unwrap_or(after_open.len());
    let inner = &after_open[..end];
    match inner.find('\n') {
        // Skip the info string (`bash`, `sh`, ...) up to the end of the fence line.
        Some(newline) => Some(&inner[newline + 1..]),
        // ```ls -la``` or ```bash ls``` on a single line
        None => Some(strip_language_tag(inner)),
    }
}

fn strip_language_tag(line: &str) -> &str {
    let line = line.trim();
    let (first, rest) = line
        .split_once(char::is_whitespace)
        .unwrap_or((line, ""));
    if FENCE_LANGUAGES.contains(&first.to_lowercase().as_str()) {
        rest.trim()
    } else {
        line
    }
}
