//! Risk scoring shared by the impact queries.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Risk band, decided by the number of affected files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Band lower bounds are inclusive: 50+ critical, 20+ high, 5+ medium,
    /// 1+ low, otherwise minimal.
    pub fn from_affected_files(files: usize) -> Self {
        match files {
            50.. => RiskLevel::Critical,
            20..=49 => RiskLevel::High,
            5..=19 => RiskLevel::Medium,
            1..=4 => RiskLevel::Low,
            0 => RiskLevel::Minimal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Minimal => "MINIMAL",
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Band plus normalized score for a blast radius.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    /// `min((files + 0.5 * classes + 0.2 * methods) / 100, 1.0)`
    pub score: f64,
}

impl RiskAssessment {
    pub fn assess(files: usize, classes: usize, methods: usize) -> Self {
        let raw = files as f64 * 1.0 + classes as f64 * 0.5 + methods as f64 * 0.2;
        Self {
            level: RiskLevel::from_affected_files(files),
            score: (raw / 100.0).min(1.0),
        }
    }

    pub fn minimal() -> Self {
        Self {
            level: RiskLevel::Minimal,
            score: 0.0,
        }
    }
}
