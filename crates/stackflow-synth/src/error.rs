//! Synthesis error types

use crate::verify::Violation;
use stackflow_core::StackError;
use thiserror::Error;

/// Synthesis errors
#[derive(Error, Debug)]
pub enum SynthError {
    #[error(transparent)]
    Stack(#[from] StackError),

    #[error("Plan verification failed with {} violation(s):\n{}", .0.len(), format_violations(.0))]
    Verification(Vec<Violation>),

    #[error("Duplicate logical id: {0}")]
    DuplicateLogicalId(String),

    #[error("Manifest store error: {0}")]
    StoreError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| format!("  - {}", v))
        .collect::<Vec<_>>()
        .join("\n")
}

pub type Result<T> = std::result::Result<T, SynthError>;
