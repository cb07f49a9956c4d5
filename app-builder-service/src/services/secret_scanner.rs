//! Scans generated files for credentials before they are pushed to a public
//! repository.

use regex::Regex;
use std::collections::BTreeMap;

pub const EMAIL_ADDRESS: &str = "Email Address";

const REDACTED: &str = "[REDACTED]";

const PATTERNS: &[(&str, &str)] = &[
    (r"AKIA[0-9A-Z]{16}", "AWS Access Key"),
    (
        r#"(?i)github[_-]?token[_-]?[:\s=]+["']?([a-zA-Z0-9_-]{40})["']?"#,
        "GitHub Token",
    ),
    (r"ghp_[a-zA-Z0-9]{36}", "GitHub Personal Access Token"),
    (r"sk-[a-zA-Z0-9]{48}", "OpenAI API Key"),
    (r"sk-ant-[a-zA-Z0-9_-]{95}", "Anthropic API Key"),
    (r"AIza[0-9A-Za-z_-]{35}", "Google API Key"),
    (
        r#"(?i)api[_-]?key[_-]?[:\s=]+["']?([a-zA-Z0-9_-]{20,})["']?"#,
        "Generic API Key",
    ),
    (
        r#"(?i)secret[_-]?key[_-]?[:\s=]+["']?([a-zA-Z0-9_-]{20,})["']?"#,
        "Secret Key",
    ),
    (
        r#"(?i)password[_-]?[:\s=]+["']?([a-zA-Z0-9_-]{8,})["']?"#,
        "Password",
    ),
    (
        r#"(?i)token[_-]?[:\s=]+["']?([a-zA-Z0-9_-]{20,})["']?"#,
        "Generic Token",
    ),
    (
        r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}",
        EMAIL_ADDRESS,
    ),
];

const PLACEHOLDER_INDICATORS: &[&str] = &[
    "example",
    "placeholder",
    "your",
    "xxx",
    "***",
    "dummy",
    "fake",
    "test",
    "sample",
    "demo",
    "todo",
    "fixme",
    "change_me",
    "replace",
    "sk-...",
    "ghp_...",
    "your_",
    "my_",
];

/// A suspected secret in one line of one file.
#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub kind: &'static str,
    pub matched: String,
    /// 1-based.
    pub line: usize,
    pub file: String,
    pub context: String,
}

impl Finding {
    /// Email addresses are reported but are not credentials.
    pub fn is_credential(&self) -> bool {
        self.kind != EMAIL_ADDRESS
    }
}

pub type Findings = BTreeMap<String, Vec<Finding>>;

pub struct SecretScanner {
    patterns: Vec<(Regex, &'static str)>,
}

impl Default for SecretScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretScanner {
    pub fn new() -> Self {
        let patterns = PATTERNS
            .iter()
            .map(|(pattern, name)| {
                (
                    Regex::new(pattern).expect("secret pattern table is valid"),
                    *name,
                )
            })
            .collect();
        Self { patterns }
    }

    pub fn scan_content(&self, content: &str, filename: &str) -> Vec<Finding> {
        let mut findings = Vec::new();

        for (index, line) in content.lines().enumerate() {
            for (regex, name) in &self.patterns {
                for m in regex.find_iter(line) {
                    let matched = m.as_str();
                    if is_likely_placeholder(matched, line) {
                        continue;
                    }

                    findings.push(Finding {
                        kind: name,
                        matched: matched.to_string(),
                        line: index + 1,
                        file: filename.to_string(),
                        context: line.trim().chars().take(100).collect(),
                    });
                }
            }
        }

        findings
    }

    /// Only files with at least one finding appear in the result.
    pub fn scan_files(&self, files: &BTreeMap<String, String>) -> Findings {
        files
            .iter()
            .filter_map(|(filename, content)| {
                let findings = self.scan_content(content, filename);
                (!findings.is_empty()).then(|| (filename.clone(), findings))
            })
            .collect()
    }

    pub fn has_secrets(&self, files: &BTreeMap<String, String>) -> bool {
        !self.scan_files(files).is_empty()
    }
}

fn is_likely_placeholder(text: &str, context: &str) -> bool {
    let text_lower = text.to_lowercase();
    let context_lower = context.to_lowercase();

    if PLACEHOLDER_INDICATORS
        .iter()
        .any(|indicator| text_lower.contains(indicator) || context_lower.contains(indicator))
    {
        return true;
    }

    // Repeated characters, e.g. xxxx or aaaa
    let mut distinct: Vec<char> = text.chars().filter(|c| *c != '-' && *c != '_').collect();
    distinct.sort_unstable();
    distinct.dedup();
    distinct.len() <= 3
}

/// Human-readable report for logs.
pub fn format_findings(findings: &Findings) -> String {
    if findings.is_empty() {
        return "No secrets detected".to_string();
    }

    let mut output = vec!["Potential secrets detected:".to_string()];
    for (filename, file_findings) in findings {
        output.push(format!("  File: {}", filename));
        for finding in file_findings {
            let preview: String = finding.matched.chars().take(50).collect();
            output.push(format!("    Line {}: {}", finding.line, finding.kind));
            output.push(format!("      Match: {}...", preview));
            output.push(format!("      Context: {}", finding.context));
        }
    }

    output.join("\n")
}

/// Replace every credential match with `[REDACTED]`. Returns how many
/// distinct matches were replaced.
pub fn redact(files: &mut BTreeMap<String, String>, findings: &Findings) -> usize {
    let mut redacted = 0;
    for (filename, file_findings) in findings {
        let Some(content) = files.get_mut(filename) else {
            continue;
        };
        for finding in file_findings.iter().filter(|f| f.is_credential()) {
            if content.contains(&finding.matched) {
                *content = content.replace(&finding.matched, REDACTED);
                redacted += 1;
            }
        }
    }
    redacted
}
