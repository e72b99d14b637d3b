//! Row ingestion: turns a validated row set and a batch-start response into
//! the initial set of tracked tasks.
//!
//! When the server returns an explicit `rowNumber -> taskId` table it is used
//! as-is. Otherwise rows are correlated to task ids by their natural key
//! (the roll number), which the server embeds in each task id; see
//! [`correlate`].

use std::collections::{HashMap, HashSet};

use log::{debug, warn};
use serde::Serialize;

use crate::api::{BatchStartResponse, CsvRow};
use crate::tracking::task::{BatchProgress, TaskRecord};

/// Non-fatal problem found while ingesting a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IngestDiagnostic {
    /// No assigned task id matched the row; the row is not tracked.
    UnmatchedRow { row_number: u32, roll_no: String },
    /// The row has no natural key to correlate on.
    EmptyKey { row_number: u32 },
    /// The correlation table points at an id the server did not list.
    UnknownAssignment { row_number: u32, task_id: String },
    /// The server listed the same task id twice.
    DuplicateTaskId { task_id: String },
    /// An assigned id no row was matched to.
    UnusedTaskId { task_id: String },
}

impl std::fmt::Display for IngestDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestDiagnostic::UnmatchedRow {
                row_number,
                roll_no,
            } => write!(
                f,
                "row {} (roll no '{}') has no matching task id",
                row_number, roll_no
            ),
            IngestDiagnostic::EmptyKey { row_number } => {
                write!(f, "row {} has an empty roll number", row_number)
            }
            IngestDiagnostic::UnknownAssignment {
                row_number,
                task_id,
            } => write!(
                f,
                "row {} is assigned to unknown task id '{}'",
                row_number, task_id
            ),
            IngestDiagnostic::DuplicateTaskId { task_id } => {
                write!(f, "task id '{}' was assigned more than once", task_id)
            }
            IngestDiagnostic::UnusedTaskId { task_id } => {
                write!(f, "task id '{}' did not match any row", task_id)
            }
        }
    }
}

/// Result of ingesting one batch.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub batch_id: String,
    /// Tracked tasks keyed by task id, all in the `Queued` state.
    pub tasks: HashMap<String, TaskRecord>,
    /// Fresh counters; `total` is the number of tracked tasks.
    pub progress: BatchProgress,
    /// Distinct task ids the server returned, matched or not.
    pub accepted: usize,
    pub diagnostics: Vec<IngestDiagnostic>,
}

/// A row matched to the task id the server assigned it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correlation {
    /// Index into the row slice.
    pub row_index: usize,
    pub task_id: String,
}

/// Builds the tracked task map for a started batch.
pub fn ingest(rows: &[CsvRow], response: &BatchStartResponse) -> IngestOutcome {
    let mut diagnostics = Vec::new();
    let task_ids = dedup_task_ids(&response.task_ids, &mut diagnostics);

    let (matches, mut match_diagnostics) = match &response.assignments {
        Some(table) => correlate_with_table(rows, &task_ids, table),
        None => correlate(rows, &task_ids),
    };
    diagnostics.append(&mut match_diagnostics);

    let mut tasks = HashMap::with_capacity(matches.len());
    for Correlation { row_index, task_id } in matches {
        let record = TaskRecord::queued(&task_id, &response.batch_id, &rows[row_index]);
        tasks.insert(task_id, record);
    }

    for diagnostic in &diagnostics {
        warn!("Batch {}: {}", response.batch_id, diagnostic);
    }
    debug!(
        "Batch {} ingested: {} rows, {} task ids, {} tracked",
        response.batch_id,
        rows.len(),
        task_ids.len(),
        tasks.len()
    );

    IngestOutcome {
        batch_id: response.batch_id.clone(),
        progress: BatchProgress::started(tasks.len() as u32),
        accepted: task_ids.len(),
        tasks,
        diagnostics,
    }
}

/// Correlates rows to task ids by natural key.
///
/// Each row is matched to the best unused id, ranked by:
/// 1. the id equals the key, or ends with it at a non-alphanumeric boundary
///    (`batch1-R001` for `R001`);
/// 2. the key occurs inside the id between non-alphanumeric boundaries;
/// 3. the key occurs anywhere inside the id.
///
/// Ties go to the earliest id. Each id is consumed at most once and rows are
/// processed in input order, so the result is deterministic.
pub fn correlate(
    rows: &[CsvRow],
    task_ids: &[String],
) -> (Vec<Correlation>, Vec<IngestDiagnostic>) {
    let mut used = vec![false; task_ids.len()];
    let mut matches = Vec::new();
    let mut diagnostics = Vec::new();

    for (row_index, row) in rows.iter().enumerate() {
        let key = row.natural_key();
        if key.is_empty() {
            diagnostics.push(IngestDiagnostic::EmptyKey {
                row_number: row.row_number,
            });
            continue;
        }

        let best = task_ids
            .iter()
            .enumerate()
            .filter(|(i, _)| !used[*i])
            .filter_map(|(i, id)| match_rank(id, key).map(|rank| (rank, i)))
            .min();

        match best {
            Some((_, i)) => {
                used[i] = true;
                matches.push(Correlation {
                    row_index,
                    task_id: task_ids[i].clone(),
                });
            }
            None => diagnostics.push(IngestDiagnostic::UnmatchedRow {
                row_number: row.row_number,
                roll_no: key.to_string(),
            }),
        }
    }

    push_unused(task_ids, &used, &mut diagnostics);
    (matches, diagnostics)
}

fn correlate_with_table(
    rows: &[CsvRow],
    task_ids: &[String],
    table: &std::collections::BTreeMap<u32, String>,
) -> (Vec<Correlation>, Vec<IngestDiagnostic>) {
    let index: HashMap<&str, usize> = task_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();
    let mut used = vec![false; task_ids.len()];
    let mut matches = Vec::new();
    let mut diagnostics = Vec::new();

    for (row_index, row) in rows.iter().enumerate() {
        let Some(task_id) = table.get(&row.row_number) else {
            diagnostics.push(IngestDiagnostic::UnmatchedRow {
                row_number: row.row_number,
                roll_no: row.natural_key().to_string(),
            });
            continue;
        };

        match index.get(task_id.as_str()) {
            Some(&i) if !used[i] => {
                used[i] = true;
                matches.push(Correlation {
                    row_index,
                    task_id: task_id.clone(),
                });
            }
            Some(_) => diagnostics.push(IngestDiagnostic::DuplicateTaskId {
                task_id: task_id.clone(),
            }),
            None => diagnostics.push(IngestDiagnostic::UnknownAssignment {
                row_number: row.row_number,
                task_id: task_id.clone(),
            }),
        }
    }

    push_unused(task_ids, &used, &mut diagnostics);
    (matches, diagnostics)
}

fn dedup_task_ids(task_ids: &[String], diagnostics: &mut Vec<IngestDiagnostic>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(task_ids.len());
    let mut unique = Vec::with_capacity(task_ids.len());
    for id in task_ids {
        if seen.insert(id.as_str()) {
            unique.push(id.clone());
        } else {
            diagnostics.push(IngestDiagnostic::DuplicateTaskId {
                task_id: id.clone(),
            });
        }
    }
    unique
}

fn push_unused(task_ids: &[String], used: &[bool], diagnostics: &mut Vec<IngestDiagnostic>) {
    for (id, _) in task_ids.iter().zip(used).filter(|(_, used)| !**used) {
        diagnostics.push(IngestDiagnostic::UnusedTaskId {
            task_id: id.clone(),
        });
    }
}

/// Lower is better; `None` means the id does not embed the key.
fn match_rank(task_id: &str, key: &str) -> Option<u8> {
    if task_id == key {
        return Some(0);
    }
    if task_id.ends_with(key) && boundary_before(task_id, task_id.len() - key.len()) {
        return Some(0);
    }

    let mut contained = false;
    for (start, _) in task_id.match_indices(key) {
        contained = true;
        if boundary_before(task_id, start) && boundary_after(task_id, start + key.len()) {
            return Some(1);
        }
    }
    contained.then_some(2)
}

fn boundary_before(s: &str, idx: usize) -> bool {
    s[..idx]
        .chars()
        .next_back()
        .is_none_or(|c| !c.is_alphanumeric())
}

fn boundary_after(s: &str, idx: usize) -> bool {
    s[idx..].chars().next().is_none_or(|c| !c.is_alphanumeric())
}
