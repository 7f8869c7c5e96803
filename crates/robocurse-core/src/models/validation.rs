use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreflightResult {
    pub profile: String,
    pub checks: Vec<ValidationCheck>,
    pub overall_pass: bool,
}

impl PreflightResult {
    pub fn failed_check(&self, check_type: CheckType) -> Option<&ValidationCheck> {
        self.checks
            .iter()
            .find(|c| c.check_type == check_type && !c.passed)
    }

    pub fn failure_summary(&self) -> String {
        self.checks
            .iter()
            .filter(|c| !c.passed && c.severity == CheckSeverity::Error)
            .map(|c| c.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationCheck {
    pub check_type: CheckType,
    pub passed: bool,
    pub message: String,
    pub severity: CheckSeverity,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CheckType {
    CopyToolInstalled,
    SourceExists,
    DestinationWritable,
    DiskSpace,
    SnapshotPrivilege,
    SnapshotHardCap,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CheckSeverity {
    Error,
    Warning,
}
