//! Read-side view over batch progress counters.

use serde::Serialize;

use crate::tracking::task::BatchProgress;

/// Derived progress figures for display.
///
/// Built from the counters the reducer maintains, never by scanning the task
/// map.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressView {
    pub total: u32,
    pub processed: u32,
    pub success: u32,
    pub failed: u32,
    /// `round(processed / total * 100)`, or 0 for an empty batch.
    pub percentage: u8,
}

impl ProgressView {
    pub fn remaining(&self) -> u32 {
        self.total.saturating_sub(self.processed)
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.processed >= self.total
    }
}

impl From<&BatchProgress> for ProgressView {
    fn from(progress: &BatchProgress) -> Self {
        let percentage = if progress.total > 0 {
            let ratio = f64::from(progress.processed) / f64::from(progress.total);
            (ratio * 100.0).round().min(100.0) as u8
        } else {
            0
        };

        Self {
            total: progress.total,
            processed: progress.processed,
            success: progress.success,
            failed: progress.failed,
            percentage,
        }
    }
}

impl std::fmt::Display for ProgressView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} processed ({}%), {} succeeded, {} failed",
            self.processed, self.total, self.percentage, self.success, self.failed
        )
    }
}
