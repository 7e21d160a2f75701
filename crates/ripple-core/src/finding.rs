//! Finding records consumed from external analyzers.
//!
//! A [`Finding`] is the closed, validated shape of one analyzer result:
//! where a query lives, what it says, and any issues detected on it.
//! [`GraphLink`] records carry the file dependencies and method calls that
//! analyzers report alongside their findings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Severity of a finding or issue.
///
/// Variants are ordered most severe first so sorted collections list
/// critical issues before informational ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }

    pub fn all() -> [Severity; 5] {
        [
            Severity::Critical,
            Severity::High,
            Severity::Medium,
            Severity::Low,
            Severity::Info,
        ]
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            "info" | "informational" => Ok(Self::Info),
            other => Err(CoreError::malformed(format!("unknown severity '{}'", other))),
        }
    }
}

impl TryFrom<String> for Severity {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Severity> for String {
    fn from(value: Severity) -> Self {
        value.as_str().to_string()
    }
}

/// An additional issue attached to a finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FindingIssue {
    pub kind: String,
    pub severity: Severity,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// One normalized record describing a detected query and its issues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Finding {
    pub source_location: String,
    pub query_text: String,
    pub severity: Severity,
    #[serde(default)]
    pub issue_kind: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub related_issues: Vec<FindingIssue>,
}

impl Finding {
    /// Create a finding with no issue attached.
    pub fn new(
        source_location: impl Into<String>,
        query_text: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            source_location: source_location.into(),
            query_text: query_text.into(),
            severity,
            issue_kind: None,
            confidence: None,
            message: None,
            related_issues: Vec::new(),
        }
    }

    /// Attach the primary issue kind.
    pub fn with_issue(mut self, kind: impl Into<String>) -> Self {
        self.issue_kind = Some(kind.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_related_issue(mut self, issue: FindingIssue) -> Self {
        self.related_issues.push(issue);
        self
    }

    /// Parse a finding from a JSON value, rejecting unknown fields.
    pub fn from_json(value: &serde_json::Value) -> CoreResult<Self> {
        let finding: Finding = Finding::deserialize(value)?;
        finding.validate()?;
        Ok(finding)
    }

    /// Check the field-level invariants serde cannot express.
    pub fn validate(&self) -> CoreResult<()> {
        if self.source_location.trim().is_empty() {
            return Err(CoreError::malformed("source_location is empty"));
        }
        if self.query_text.trim().is_empty() {
            return Err(CoreError::malformed("query_text is empty"));
        }
        check_confidence(self.confidence)?;
        for issue in &self.related_issues {
            if issue.kind.trim().is_empty() {
                return Err(CoreError::malformed("related issue has an empty kind"));
            }
            check_confidence(issue.confidence)?;
        }
        Ok(())
    }

    /// All issues carried by this finding, primary issue first.
    pub fn issues(&self) -> Vec<FindingIssue> {
        let mut issues = Vec::with_capacity(self.related_issues.len() + 1);
        if let Some(kind) = self.issue_kind.as_deref().filter(|k| !k.trim().is_empty()) {
            issues.push(FindingIssue {
                kind: kind.to_string(),
                severity: self.severity,
                message: self.message.clone(),
                confidence: self.confidence,
            });
        }
        issues.extend(self.related_issues.iter().cloned());
        issues
    }
}

fn check_confidence(confidence: Option<f64>) -> CoreResult<()> {
    match confidence {
        Some(c) if !(0.0..=1.0).contains(&c) => Err(CoreError::malformed(format!(
            "confidence {} is outside [0, 1]",
            c
        ))),
        _ => Ok(()),
    }
}

/// A structural link reported next to findings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum GraphLink {
    /// `from` file depends on `to` file (both file paths).
    DependsOn { from: String, to: String },
    /// Method at `from` calls method at `to` (both source locations).
    Calls { from: String, to: String },
}

impl GraphLink {
    pub fn depends_on(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::DependsOn {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn calls(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::Calls {
            from: from.into(),
            to: to.into(),
        }
    }
}
