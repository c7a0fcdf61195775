//! StackFlow Synth
//!
//! Verifies a composed [`Stack`](stackflow_core::Stack) against the
//! plan-level rules, synthesizes it into a deterministic deployment
//! manifest, and plans changes against the previously stored manifest.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 stackflow CLI                 │
//! │          (stack synth / validate / diff)      │
//! └──────────────────────┬───────────────────────┘
//!                        │ Stack
//! ┌──────────────────────▼───────────────────────┐
//! │                stackflow-synth                │
//! │  ┌──────────┐   ┌───────────┐   ┌─────────┐  │
//! │  │  verify  │──▶│ synthesize│──▶│  Plan   │  │
//! │  └──────────┘   └─────┬─────┘   └────▲────┘  │
//! │                       │ Manifest     │       │
//! │                 ┌─────▼──────────────┴─┐     │
//! │                 │    ManifestStore     │     │
//! │                 └──────────────────────┘     │
//! └──────────────────────────────────────────────┘
//! ```

pub mod action;
pub mod error;
pub mod manifest;
pub mod store;
pub mod synth;
pub mod verify;

#[cfg(test)]
mod test_support;

// Re-exports
pub use action::{Action, ActionType, Plan, PlanSummary};
pub use error::{Result, SynthError};
pub use manifest::{Manifest, Output, Resource};
pub use store::{ManifestStore, StoredManifest};
pub use synth::synthesize;
pub use verify::{Rule, Violation, verify};
