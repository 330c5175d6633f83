// SPDX-License-Identifier: AGPL-3.0

//! Per-input and overall results, as printed and written to `--json-output`

use ovmt_transpiler::TranspilationResult;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Process exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exitcode {
    Success = 0,
    TranspilationFailed = 1,
    InvalidInput = 2,
}

/// Outcome for one input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputResult {
    pub name: String,
    pub input_size: usize,
    #[serde(flatten)]
    pub result: TranspilationResult,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
}

impl InputResult {
    pub fn succeeded(&self) -> bool {
        self.result.is_success()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MainResult {
    pub exitcode: i32,
    pub total_succeeded: usize,
    pub total_failed: usize,
    pub total_found: usize,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    #[serde(default)]
    pub results: Vec<InputResult>,
}

impl MainResult {
    pub fn empty() -> Self {
        Self {
            exitcode: Exitcode::Success as i32,
            total_succeeded: 0,
            total_failed: 0,
            total_found: 0,
            duration: Duration::from_secs(0),
            results: Vec::new(),
        }
    }

    pub fn from_results(results: Vec<InputResult>, duration: Duration) -> Self {
        let total_succeeded = results.iter().filter(|r| r.succeeded()).count();
        let total_failed = results.len() - total_succeeded;
        let exitcode = if total_failed > 0 {
            Exitcode::TranspilationFailed
        } else {
            Exitcode::Success
        };
        Self {
            exitcode: exitcode as i32,
            total_succeeded,
            total_failed,
            total_found: results.len(),
            duration,
            results,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.total_failed > 0
    }
}
