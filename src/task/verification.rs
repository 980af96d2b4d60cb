//! Verification outcome types recorded by the Evaluate stage.

use serde::{Deserialize, Serialize};

/// Tri-state verification result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    #[default]
    Unknown,
    Passed,
    Failed,
}

impl VerificationStatus {
    pub fn from_passed(passed: bool) -> Self {
        if passed {
            Self::Passed
        } else {
            Self::Failed
        }
    }

    /// `true` / `false` / `null` at the run boundary.
    pub fn as_option(self) -> Option<bool> {
        match self {
            Self::Unknown => None,
            Self::Passed => Some(true),
            Self::Failed => Some(false),
        }
    }
}

/// What happened to one verification target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckOutcome {
    /// The target ran to completion.
    Executed {
        command: String,
        exit_code: Option<i32>,
        output: String,
    },
    /// The target is not a supported script type; does not affect the verdict.
    Skipped { reason: String },
    /// The target could not be run (timeout, sandbox violation, spawn failure).
    Errored { command: String, error: String },
}

/// Per-target record in the verification log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRecord {
    pub target: String,
    #[serde(flatten)]
    pub outcome: CheckOutcome,
}

impl CheckRecord {
    /// `None` for skipped targets, otherwise whether the target succeeded.
    pub fn passed(&self) -> Option<bool> {
        match &self.outcome {
            CheckOutcome::Executed { exit_code, .. } => Some(*exit_code == Some(0)),
            CheckOutcome::Skipped { .. } => None,
            CheckOutcome::Errored { .. } => Some(false),
        }
    }
}

/// Structured record of the most recent Evaluate execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "checks", rename_all = "snake_case")]
pub enum VerificationLog {
    /// Evaluate has not run yet.
    #[default]
    NotRun,
    /// Evaluate ran with no targets.
    NoTestsRequested,
    Checks(Vec<CheckRecord>),
}

impl VerificationLog {
    /// Logical AND over every executed (non-skipped) check.
    pub fn all_passed(&self) -> bool {
        match self {
            Self::NotRun | Self::NoTestsRequested => true,
            Self::Checks(records) => records.iter().filter_map(CheckRecord::passed).all(|p| p),
        }
    }

    /// Failing records, for feeding back into a regeneration attempt.
    pub fn failures(&self) -> Vec<&CheckRecord> {
        match self {
            Self::Checks(records) => records
                .iter()
                .filter(|r| r.passed() == Some(false))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Human-readable rendering used in prompts and reviews.
    pub fn render(&self) -> String {
        match self {
            Self::NotRun => "verification not run".to_string(),
            Self::NoTestsRequested => "no tests requested".to_string(),
            Self::Checks(records) => records
                .iter()
                .map(|record| match &record.outcome {
                    CheckOutcome::Executed {
                        command,
                        exit_code,
                        output,
                    } => format!(
                        "[{}] `{}` exit={}\n{}",
                        record.target,
                        command,
                        exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
                        output.trim_end()
                    ),
                    CheckOutcome::Skipped { reason } => {
                        format!("[{}] skipped: {}", record.target, reason)
                    }
                    CheckOutcome::Errored { command, error } => {
                        format!("[{}] `{}` error: {}", record.target, command, error)
                    }
                })
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executed(target: &str, code: i32) -> CheckRecord {
        CheckRecord {
            target: target.to_string(),
            outcome: CheckOutcome::Executed {
                command: format!("python3 {target}"),
                exit_code: Some(code),
                output: String::new(),
            },
        }
    }

    #[test]
    fn test_skipped_targets_do_not_affect_verdict() {
        let log = VerificationLog::Checks(vec![
            executed("validate.py", 0),
            CheckRecord {
                target: "index.html".into(),
                outcome: CheckOutcome::Skipped {
                    reason: "unsupported target type".into(),
                },
            },
        ]);
        assert!(log.all_passed());
        assert!(log.failures().is_empty());
    }

    #[test]
    fn test_any_failure_fails_verdict() {
        let log = VerificationLog::Checks(vec![executed("a.py", 0), executed("b.py", 1)]);
        assert!(!log.all_passed());
        assert_eq!(log.failures()[0].target, "b.py");
        assert!(log.render().contains("[b.py] `python3 b.py` exit=1"));
    }

    #[test]
    fn test_status_as_option() {
        assert_eq!(VerificationStatus::Unknown.as_option(), None);
        assert_eq!(VerificationStatus::from_passed(true).as_option(), Some(true));
        assert_eq!(VerificationStatus::from_passed(false).as_option(), Some(false));
    }

    #[test]
    fn test_log_serialization_shape() {
        let json = serde_json::to_value(VerificationLog::Checks(vec![executed("a.py", 0)])).unwrap();
        assert_eq!(json["kind"], "checks");
        assert_eq!(json["checks"][0]["target"], "a.py");
        assert_eq!(json["checks"][0]["status"], "executed");
        assert_eq!(json["checks"][0]["exit_code"], 0);
    }
}
