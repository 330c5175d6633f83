// SPDX-License-Identifier: AGPL-3.0

//! Logging and diagnostic utilities
//!
//! Library crates emit structured events through `tracing`. The command line
//! installs a subscriber with [`init`] and prints user-facing, colored
//! diagnostics through the helpers below.

use colored::*;
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use tracing_subscriber::EnvFilter;

/// Diagnostics base URL
pub const DIAGNOSTICS_BASE_URL: &str = "https://github.com/ovmt/ovmt/wiki/diagnostics";

/// Diagnostic codes attached to warnings, one per transpilation error kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    UnsupportedOpcode,
    OpcodeNotWhitelisted,
    InvalidBytesConsumed,
    MissingDeployedBytecode,
    MissingConstant,
    DetectedConstantOob,
}

impl ErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorCode::UnsupportedOpcode => "unsupported-opcode",
            ErrorCode::OpcodeNotWhitelisted => "opcode-not-whitelisted",
            ErrorCode::InvalidBytesConsumed => "invalid-bytes-consumed",
            ErrorCode::MissingDeployedBytecode => "missing-deployed-bytecode",
            ErrorCode::MissingConstant => "missing-constant",
            ErrorCode::DetectedConstantOob => "detected-constant-oob",
        }
    }

    pub fn url(&self) -> String {
        format!("{}#{}", DIAGNOSTICS_BASE_URL, self.code())
    }
}

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence; otherwise verbosity 0 logs warnings, 1 debug
/// events and 2 or more trace events. Calling this twice is harmless.
pub fn init(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Logger state for tracking unique messages
static UNIQUE_MESSAGES: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

fn messages() -> MutexGuard<'static, HashSet<String>> {
    UNIQUE_MESSAGES
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Check if a message has been logged (for unique logging)
fn is_logged(message: &str) -> bool {
    messages().contains(message)
}

/// Mark a message as logged
fn mark_logged(message: &str) {
    messages().insert(message.to_string());
}

fn emit(text: &str, allow_duplicate: bool, print: impl FnOnce(&str)) {
    if allow_duplicate || !is_logged(text) {
        print(text);
        if !allow_duplicate {
            mark_logged(text);
        }
    }
}

/// Log a warning message
pub fn warn(text: &str, allow_duplicate: bool) {
    emit(text, allow_duplicate, |t| eprintln!("{}", t.yellow()));
}

/// Log an error message
pub fn error(text: &str, allow_duplicate: bool) {
    emit(text, allow_duplicate, |t| eprintln!("{}", t.red()));
}

/// Log a warning with a diagnostic code
pub fn warn_code(error_code: ErrorCode, msg: &str, allow_duplicate: bool) {
    let full_msg = format!("{}\n(see {})", msg, error_code.url());
    warn(&full_msg, allow_duplicate);
}

#[cfg(test)]
fn clear_logged_messages() {
    messages().clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_url() {
        let code = ErrorCode::OpcodeNotWhitelisted;
        assert_eq!(code.code(), "opcode-not-whitelisted");
        assert!(code.url().starts_with(DIAGNOSTICS_BASE_URL));
        assert!(code.url().ends_with("#opcode-not-whitelisted"));
    }

    #[test]
    fn test_all_error_codes() {
        let codes = [
            ErrorCode::UnsupportedOpcode,
            ErrorCode::OpcodeNotWhitelisted,
            ErrorCode::InvalidBytesConsumed,
            ErrorCode::MissingDeployedBytecode,
            ErrorCode::MissingConstant,
            ErrorCode::DetectedConstantOob,
        ];

        for code in codes {
            assert!(!code.code().is_empty());
            assert!(code.url().contains(code.code()));
        }
    }

    // Shared global state: keep every assertion about it in one test.
    #[test]
    fn test_unique_logging() {
        clear_logged_messages();

        let msg = "ovmt unique message";
        assert!(!is_logged(msg));
        warn(msg, false);
        assert!(is_logged(msg));
        warn(msg, false);
        assert!(is_logged(msg));

        let dup = "ovmt duplicate message";
        error(dup, true);
        assert!(!is_logged(dup));
        error(dup, false);
        assert!(is_logged(dup));

        warn_code(ErrorCode::MissingConstant, "ovmt coded", false);
        assert!(is_logged(&format!("ovmt coded\n(see {})", ErrorCode::MissingConstant.url())));

        clear_logged_messages();
        assert!(!is_logged(msg));
    }

    #[test]
    fn test_init_is_idempotent() {
        init(0);
        init(2);
    }
}
