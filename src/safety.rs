//! Minimal gate against obviously destructive commands.
//!
//! This is not a sandbox. It only catches the handful of patterns that wipe a
//! disk or a home directory in one line, before they reach the executor.

use regex::Regex;

use crate::bash_parser::{split_on_separators, BashParser};

/// Decides whether a translated command may be handed to the executor.
pub trait SafetyPolicy: Send + Sync {
    /// Name of the first rule `command` violates, or `None` when it may run.
    fn check(&self, command: &str) -> Option<String>;
}

/// A rule fires when every one of its expressions matches the same text.
struct Rule {
    name: String,
    all_of: Vec<Regex>,
}

impl Rule {
    fn new(name: &str, patterns: &[&str]) -> Result<Self, regex::Error> {
        let all_of = patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            name: name.to_string(),
            all_of,
        })
    }

    fn matches(&self, text: &str) -> bool {
        self.all_of.iter().all(|re| re.is_match(text))
    }
}

const ROOT_TARGET: &str = r#"(?:^|\s)["']?(?:/+\.?/*\*?|~/?\*?|\$\{?HOME\}?/?\*?)["']?(?:\s|$)"#;
/// Wrappers that still run the command after them, then the command word itself.
const RM_COMMAND: &str =
    r"^\s*(?:(?:sudo(?:\s+-\S+)*|doas|command|nohup|env(?:\s+\S+=\S*)*)\s+)*(?:\S*/)?rm\s";
const BLOCK_DEVICE: &str = r"/dev/(?:sd|hd|nvme|vd|xvd|disk|mmcblk)";

fn builtin_rules() -> Result<Vec<Rule>, regex::Error> {
    Ok(vec![
        Rule::new(
            "recursive delete of root or home",
            &[
                RM_COMMAND,
                r"(?:^|\s)(?:-[A-Za-z]*[rR][A-Za-z]*|--recursive)(?:\s|$)",
                ROOT_TARGET,
            ],
        )?,
        Rule::new(
            "recursive permission change on root",
            &[
                r"^\s*(?:sudo\s+)?ch(?:mod|own|grp)\s",
                r"(?:^|\s)(?:-[A-Za-z]*R[A-Za-z]*|--recursive)(?:\s|$)",
                r"\s/(?:\s|$)",
            ],
        )?,
        Rule::new("filesystem format", &[r"^\s*(?:sudo\s+)?mkfs(?:\.\w+)?\b"])?,
        Rule::new(
            "raw write to block device",
            &[format!(r"^\s*(?:sudo\s+)?dd\s.*\bof={BLOCK_DEVICE}").as_str()],
        )?,
        Rule::new(
            "redirect onto block device",
            &[format!(r">\s*{BLOCK_DEVICE}").as_str()],
        )?,
        Rule::new(
            "fork bomb",
            &[r":\s*\(\s*\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:"],
        )?,
        Rule::new("drive format", &[r"(?i)^\s*format\s+[a-z]:"])?,
        Rule::new(
            "recursive delete of a drive root",
            &[r"(?i)^\s*(?:rd|rmdir|del)\s+.*/s\b.*\b[a-z]:\\?\s*$"],
        )?,
    ])
}

/// Default policy: built-in destructive patterns plus any configured extras.
pub struct PatternPolicy {
    rules: Vec<Rule>,
}

impl PatternPolicy {
    pub fn new(extra_patterns: &[String]) -> Result<Self, regex::Error> {
        let mut rules = builtin_rules()?;
        for pattern in extra_patterns {
            rules.push(Rule::new(&format!("custom pattern `{pattern}`"), &[pattern.as_str()])?);
        }
        Ok(Self { rules })
    }

    fn first_match(&self, text: &str) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.matches(text))
    }
}

impl SafetyPolicy for PatternPolicy {
    fn check(&self, command: &str) -> Option<String> {
        if let Some(rule) = self.first_match(command) {
            return Some(rule.name.clone());
        }

        let statements = match BashParser::new() {
            Ok(mut parser) => parser.statements(command),
            Err(_) => split_on_separators(command),
        };
        statements
            .iter()
            .find_map(|stmt| self.first_match(stmt))
            .map(|rule| rule.name.clone())
    }
}
