use serde::{Deserialize, Serialize};

pub const EXIT_BIT_COPIED: i32 = 1;
pub const EXIT_BIT_EXTRAS: i32 = 2;
pub const EXIT_BIT_MISMATCHES: i32 = 4;
pub const EXIT_BIT_FAILURES: i32 = 8;
pub const EXIT_BIT_FATAL: i32 = 16;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Success,
    Warning,
    Error,
    Fatal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExitClassification {
    pub severity: Severity,
    pub should_retry: bool,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClassifyOptions {
    /// Treat "extras present" as a warning rather than success.
    pub strict_extras: bool,
    /// Treat "mismatches present" as an error rather than a warning.
    pub strict_mismatches: bool,
}

/// Interpret the copy tool's bitmask exit code.
///
/// The tool ORs together: 1 files copied, 2 extras detected, 4 mismatches,
/// 8 copy failures, 16 serious error. Higher severities dominate when
/// several bits are set; only the failure bit (8) is retryable.
pub fn classify_exit_code(code: i32, options: ClassifyOptions) -> ExitClassification {
    if code < 0 || code & EXIT_BIT_FATAL != 0 {
        return ExitClassification {
            severity: Severity::Fatal,
            should_retry: false,
            message: if code < 0 {
                format!("worker terminated abnormally (exit code {})", code)
            } else {
                format!("serious error, no files copied (exit code {})", code)
            },
        };
    }

    if code & EXIT_BIT_FAILURES != 0 {
        return ExitClassification {
            severity: Severity::Error,
            should_retry: true,
            message: format!(
                "some files or directories could not be copied (exit code {})",
                code
            ),
        };
    }

    let mismatch_severity = if code & EXIT_BIT_MISMATCHES != 0 {
        Some(if options.strict_mismatches {
            Severity::Error
        } else {
            Severity::Warning
        })
    } else {
        None
    };

    let extras_severity = if code & EXIT_BIT_EXTRAS != 0 {
        Some(if options.strict_extras {
            Severity::Warning
        } else {
            Severity::Success
        })
    } else {
        None
    };

    let severity = [mismatch_severity, extras_severity]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(Severity::Success);

    let message = match (severity, code & EXIT_BIT_COPIED != 0) {
        (Severity::Error, _) => format!("mismatched files or directories (exit code {})", code),
        (Severity::Warning, _) => format!(
            "completed with warnings: {}(exit code {})",
            describe_warning_bits(code),
            code
        ),
        (_, true) => format!("files copied successfully (exit code {})", code),
        (_, false) => format!("nothing to copy (exit code {})", code),
    };

    ExitClassification {
        severity,
        // Mismatches escalated to Error are content disagreements, not
        // transient conditions; retrying cannot fix them.
        should_retry: false,
        message,
    }
}

fn describe_warning_bits(code: i32) -> String {
    let mut parts = Vec::new();
    if code & EXIT_BIT_MISMATCHES != 0 {
        parts.push("mismatches present ");
    }
    if code & EXIT_BIT_EXTRAS != 0 {
        parts.push("extra files present ");
    }
    parts.concat()
}
