//! Best-effort conversion of model output into a JSON object.
//!
//! The pipeline tries progressively more invasive recoveries and stops at the
//! first strict parse:
//! 1. fast path for text that already looks like JSON
//! 2. locating an embedded object (brace slice, code fences, balanced span)
//! 3. cumulative correction stages, re-parsing after each one
//! 4. template recovery of the known arrays from otherwise broken text
//! 5. a minimal skeleton with an error note
//!
//! [`JsonRepairer::repair`] never fails and always yields an object.

pub mod locate;
pub mod scanner;
pub mod stages;
pub mod template;

pub use stages::{CORRECTION_STAGES, RepairStage};

use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairMethod {
    FastPath,
    Extracted,
    Corrected,
    Template,
    Skeleton,
}

#[derive(Debug, Clone)]
pub struct RepairOutcome {
    pub value: Value,
    pub method: RepairMethod,
    /// Correction stages that changed the text, in application order
    pub stages: Vec<RepairStage>,
}

impl RepairOutcome {
    /// False only when nothing in the text could be recovered.
    pub fn recovered(&self) -> bool {
        self.method != RepairMethod::Skeleton
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRepairer;

impl JsonRepairer {
    pub fn new() -> Self {
        Self
    }

    pub fn repair(&self, raw: &str) -> RepairOutcome {
        if let Some(value) = locate::fast_path(raw) {
            return Self::finish(value, RepairMethod::FastPath, Vec::new());
        }

        if let Some(value) = locate::candidates(raw)
            .iter()
            .find_map(|candidate| locate::parse_structured(candidate))
        {
            return Self::finish(value, RepairMethod::Extracted, Vec::new());
        }

        let mut current = locate::best_candidate(raw);
        let mut applied = Vec::new();

        for stage in CORRECTION_STAGES {
            let next = stage.apply(&current);
            if next != current {
                applied.push(stage);
            }
            if let Some(value) = locate::parse_structured(&next) {
                return Self::finish(value, RepairMethod::Corrected, applied);
            }
            current = next;
        }

        if let Some(value) = template::recover(raw) {
            return Self::finish(value, RepairMethod::Template, applied);
        }

        debug!(raw_len = raw.len(), "No recoverable structure in response");
        Self::finish(
            json!({
                "entities": [],
                "error": format!("unrecoverable response ({} bytes)", raw.len()),
            }),
            RepairMethod::Skeleton,
            applied,
        )
    }

    fn finish(value: Value, method: RepairMethod, stages: Vec<RepairStage>) -> RepairOutcome {
        debug!(
            method = ?method,
            stages = ?stages.iter().map(|s| s.name()).collect::<Vec<_>>(),
            "Response repaired"
        );
        RepairOutcome {
            value,
            method,
            stages,
        }
    }
}
