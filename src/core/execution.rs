//! Dependency-aware parallel recipe execution.
//!
//! Recipes form a conflict graph: an edge runs from an earlier recipe to a
//! later one whenever their file sets overlap, plus any explicitly declared
//! dependency. Execution proceeds in topological batches; within a batch no
//! two recipes share a file, so chunks of `max_workers` recipes run
//! concurrently. Every mutating recipe is snapshotted first, and snapshots
//! restore in reverse execution order on rollback.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::errors::{OdavlError, Result};
use crate::core::recipes::FixDiff;
use crate::core::scoring::SelectedRecipe;

/// Default per-recipe wall-clock budget.
pub const DEFAULT_RECIPE_TIMEOUT_SECS: u64 = 300;

/// Terminal status of one recipe within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecipeStatus {
    /// Mutation applied and kept
    Executed,
    /// Never attempted (policy, cancellation, failed sibling batch)
    Skipped,
    /// Attempted and failed
    Failed,
    /// Applied, then reverted from snapshots
    RolledBack,
}

/// Evidence of what a recipe changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvidence {
    /// Files whose bytes changed
    pub files_modified: Vec<String>,
    /// Lines changed across all files
    pub loc_changed: u32,
    /// Wall-clock execution time in milliseconds
    pub execution_time_ms: u64,
    /// Per-file diffs
    pub diffs: Vec<FixDiff>,
}

/// Verification delta recorded per executed recipe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InsightRevalidation {
    /// Issues on the touched files before execution
    pub before_issues: usize,
    /// Issues on the touched files after execution
    pub after_issues: usize,
    /// Aggregate severity score improvement
    pub severity_improvement: f64,
    /// Issues present after that were absent before
    pub new_issues_introduced: usize,
}

/// Outcome record for one selected recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeExecutionResult {
    /// Recipe id
    pub recipe_id: String,
    /// Terminal status
    pub status: RecipeStatus,
    /// Change evidence
    pub evidence: ExecutionEvidence,
    /// Verification delta, filled in by the session controller
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insight_revalidation: Option<InsightRevalidation>,
    /// Errors encountered, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

impl RecipeExecutionResult {
    fn skipped(recipe_id: &str, reason: &str) -> Self {
        Self {
            recipe_id: recipe_id.to_string(),
            status: RecipeStatus::Skipped,
            evidence: ExecutionEvidence::default(),
            insight_revalidation: None,
            errors: Some(vec![reason.to_string()]),
        }
    }
}

/// Exact bytes of one file before mutation; `None` when the file did not
/// exist.
#[derive(Debug, Clone)]
struct FileSnapshot {
    path: String,
    content: Option<Vec<u8>>,
}

/// Snapshots of every file a recipe touches, keyed in the session log by
/// recipe id.
#[derive(Debug, Clone, Default)]
pub struct SnapshotSet {
    files: Vec<FileSnapshot>,
}

impl SnapshotSet {
    /// Capture the exact bytes of each file before mutation.
    pub fn capture<'a>(
        root: &Path,
        files: impl IntoIterator<Item = &'a String>,
    ) -> Result<Self> {
        let mut snapshots = Vec::new();
        for file in files {
            let path = root.join(file);
            let content = match fs::read(&path) {
                Ok(bytes) => Some(bytes),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => {
                    return Err(OdavlError::io(
                        format!("Failed to snapshot {}", path.display()),
                        e,
                    ))
                }
            };
            snapshots.push(FileSnapshot {
                path: file.clone(),
                content,
            });
        }
        Ok(Self { files: snapshots })
    }

    /// Restore the captured bytes. Idempotent: restoring twice leaves file
    /// bytes identical to a single restore.
    pub fn restore(&self, root: &Path) -> Result<Vec<String>> {
        let mut reverted = Vec::new();
        for snapshot in &self.files {
            let path = root.join(&snapshot.path);
            match &snapshot.content {
                Some(bytes) => {
                    fs::write(&path, bytes).map_err(|e| {
                        OdavlError::io(format!("Failed to restore {}", path.display()), e)
                    })?;
                }
                None => {
                    if path.exists() {
                        fs::remove_file(&path).map_err(|e| {
                            OdavlError::io(format!("Failed to remove {}", path.display()), e)
                        })?;
                    }
                }
            }
            reverted.push(snapshot.path.clone());
        }
        Ok(reverted)
    }
}

/// Session-wide cancellation flag.
///
/// Cancelling unblocks pending batches: running recipes finish or time out;
/// queued batches are marked skipped.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancellationFlag {
    /// Fresh, uncancelled flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Executor configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Concurrent recipes per chunk
    pub max_workers: usize,
    /// Per-recipe wall-clock budget in seconds
    pub recipe_timeout_secs: u64,
    /// Skip mutation and fabricate results from declared files
    pub dry_run: bool,
    /// On first failure, roll back everything executed so far and stop
    pub fail_fast: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            recipe_timeout_secs: DEFAULT_RECIPE_TIMEOUT_SECS,
            dry_run: false,
            fail_fast: false,
        }
    }
}

/// Default worker count: `max(1, cpu/2)`.
pub fn default_max_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() / 2)
        .unwrap_or(1)
        .max(1)
}

/// Full outcome of one executor run.
#[derive(Debug)]
pub struct ExecutionOutcome {
    /// Per-recipe results, in input order
    pub results: Vec<RecipeExecutionResult>,
    /// Snapshots keyed by recipe id (empty in dry runs)
    pub snapshots: HashMap<String, SnapshotSet>,
    /// Batch plan as recipe ids
    pub batches: Vec<Vec<String>>,
}

/// Dependency-aware executor over a workspace.
pub struct ParallelExecutor {
    workspace_root: PathBuf,
    config: ExecutorConfig,
}

impl ParallelExecutor {
    /// Create an executor rooted at the workspace.
    pub fn new(workspace_root: impl Into<PathBuf>, config: ExecutorConfig) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            config,
        }
    }

    /// Compute the batch plan without executing anything.
    pub fn plan(&self, recipes: &[SelectedRecipe]) -> Result<Vec<Vec<String>>> {
        let batches = compute_batches(recipes)?;
        Ok(batches
            .iter()
            .map(|batch| {
                batch
                    .iter()
                    .map(|&idx| recipes[idx].recipe_id.clone())
                    .collect()
            })
            .collect())
    }

    /// Execute the selected recipes with maximum safe parallelism.
    pub async fn execute(
        &self,
        recipes: &[SelectedRecipe],
        cancel: &CancellationFlag,
    ) -> Result<ExecutionOutcome> {
        let batches = compute_batches(recipes)?;
        let batch_ids: Vec<Vec<String>> = batches
            .iter()
            .map(|batch| {
                batch
                    .iter()
                    .map(|&idx| recipes[idx].recipe_id.clone())
                    .collect()
            })
            .collect();

        info!(
            recipes = recipes.len(),
            batches = batches.len(),
            dry_run = self.config.dry_run,
            "executing recipe plan"
        );

        let mut results: Vec<Option<RecipeExecutionResult>> = vec![None; recipes.len()];
        let mut snapshots: HashMap<String, SnapshotSet> = HashMap::new();
        // Execution order across all batches, for total reverse rollback.
        let mut executed_so_far: Vec<usize> = Vec::new();
        let mut halted = false;

        for batch in &batches {
            if halted {
                for &idx in batch {
                    results[idx] = Some(RecipeExecutionResult::skipped(
                        &recipes[idx].recipe_id,
                        "skipped after failed batch",
                    ));
                }
                continue;
            }
            if cancel.is_cancelled() {
                for &idx in batch {
                    results[idx] = Some(RecipeExecutionResult::skipped(
                        &recipes[idx].recipe_id,
                        "session cancelled",
                    ));
                }
                continue;
            }

            // Snapshot before mutating anything in the batch.
            if !self.config.dry_run {
                for &idx in batch {
                    let recipe = &recipes[idx];
                    let files = recipe.recipe.files_affected();
                    let snapshot = SnapshotSet::capture(&self.workspace_root, files.iter())?;
                    snapshots.insert(recipe.recipe_id.clone(), snapshot);
                }
            }

            let mut batch_failed = false;

            for chunk in batch.chunks(self.config.max_workers.max(1)) {
                if cancel.is_cancelled() {
                    for &idx in chunk {
                        results[idx] = Some(RecipeExecutionResult::skipped(
                            &recipes[idx].recipe_id,
                            "session cancelled",
                        ));
                    }
                    continue;
                }

                let futures = chunk.iter().map(|&idx| {
                    let recipe = recipes[idx].clone();
                    let root = self.workspace_root.clone();
                    let config = self.config;
                    async move { (idx, run_recipe(recipe, root, config).await) }
                });

                for (idx, result) in join_all(futures).await {
                    match result.status {
                        RecipeStatus::Executed => executed_so_far.push(idx),
                        RecipeStatus::Failed => {
                            batch_failed = true;
                            // A failed recipe may have mutated some of its
                            // files before erroring; its own snapshot is
                            // always restored.
                            if let Some(snapshot) =
                                snapshots.get(&recipes[idx].recipe_id)
                            {
                                snapshot.restore(&self.workspace_root)?;
                            }
                        }
                        _ => {}
                    }
                    results[idx] = Some(result);
                }
            }

            if batch_failed && self.config.fail_fast {
                // Total rollback: every recipe executed so far, in any
                // batch, is restored in reverse execution order.
                warn!(
                    executed = executed_so_far.len(),
                    "failure with fail_fast; rolling back all executed recipes"
                );
                for &idx in executed_so_far.iter().rev() {
                    let recipe_id = &recipes[idx].recipe_id;
                    if let Some(snapshot) = snapshots.get(recipe_id) {
                        snapshot.restore(&self.workspace_root)?;
                    }
                    if let Some(result) = &mut results[idx] {
                        result.status = RecipeStatus::RolledBack;
                        result
                            .errors
                            .get_or_insert_with(Vec::new)
                            .push("rolled back after batch failure".to_string());
                    }
                }
                halted = true;
            }
        }

        let results: Vec<RecipeExecutionResult> = results
            .into_iter()
            .enumerate()
            .map(|(idx, result)| {
                result.unwrap_or_else(|| {
                    RecipeExecutionResult::skipped(&recipes[idx].recipe_id, "not scheduled")
                })
            })
            .collect();

        Ok(ExecutionOutcome {
            results,
            snapshots,
            batches: batch_ids,
        })
    }
}

/// Run one recipe to completion, honoring the dry-run flag and the
/// wall-clock budget.
async fn run_recipe(
    recipe: SelectedRecipe,
    root: PathBuf,
    config: ExecutorConfig,
) -> RecipeExecutionResult {
    let recipe_id = recipe.recipe_id.clone();
    let started = Instant::now();

    if config.dry_run {
        // Fabricate the result from declared action files; used for the
        // execution plan visualization.
        let files: Vec<String> = recipe.recipe.files_affected().into_iter().collect();
        return RecipeExecutionResult {
            recipe_id,
            status: RecipeStatus::Executed,
            evidence: ExecutionEvidence {
                files_modified: files,
                loc_changed: 0,
                execution_time_ms: started.elapsed().as_millis() as u64,
                diffs: Vec::new(),
            },
            insight_revalidation: None,
            errors: None,
        };
    }

    let timeout = Duration::from_secs(config.recipe_timeout_secs);
    let apply_recipe = recipe.recipe.clone();
    let apply_root = root.clone();
    let applied = tokio::time::timeout(
        timeout,
        tokio::task::spawn_blocking(move || apply_recipe.apply(&apply_root)),
    )
    .await;

    let execution_time_ms = started.elapsed().as_millis() as u64;

    match applied {
        Err(_) => {
            warn!(recipe = %recipe_id, "recipe timed out");
            RecipeExecutionResult {
                recipe_id,
                status: RecipeStatus::Failed,
                evidence: ExecutionEvidence {
                    execution_time_ms,
                    ..ExecutionEvidence::default()
                },
                insight_revalidation: None,
                errors: Some(vec!["Timeout".to_string()]),
            }
        }
        Ok(Err(join_error)) => RecipeExecutionResult {
            recipe_id,
            status: RecipeStatus::Failed,
            evidence: ExecutionEvidence {
                execution_time_ms,
                ..ExecutionEvidence::default()
            },
            insight_revalidation: None,
            errors: Some(vec![format!("recipe task aborted: {join_error}")]),
        },
        Ok(Ok(Err(apply_error))) => RecipeExecutionResult {
            recipe_id,
            status: RecipeStatus::Failed,
            evidence: ExecutionEvidence {
                execution_time_ms,
                ..ExecutionEvidence::default()
            },
            insight_revalidation: None,
            errors: Some(vec![apply_error.to_string()]),
        },
        Ok(Ok(Ok(changes))) => {
            debug!(
                recipe = %recipe_id,
                files = changes.files_modified.len(),
                "recipe executed"
            );
            RecipeExecutionResult {
                recipe_id,
                status: RecipeStatus::Executed,
                evidence: ExecutionEvidence {
                    files_modified: changes.files_modified,
                    loc_changed: changes.loc_changed,
                    execution_time_ms,
                    diffs: changes.diffs,
                },
                insight_revalidation: None,
                errors: None,
            }
        }
    }
}

/// Build the conflict graph and collect topological batches.
///
/// Nodes follow input order. An edge runs from an earlier recipe to a later
/// one whenever their file sets intersect, and for every declared
/// dependency. A round that collects no node while work remains means the
/// declared dependencies form a cycle, which is fatal for the session.
fn compute_batches(recipes: &[SelectedRecipe]) -> Result<Vec<Vec<usize>>> {
    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let nodes: Vec<NodeIndex> = (0..recipes.len()).map(|idx| graph.add_node(idx)).collect();

    let file_sets: Vec<_> = recipes
        .iter()
        .map(|recipe| recipe.recipe.files_affected())
        .collect();

    for later in 0..recipes.len() {
        for earlier in 0..later {
            if !file_sets[earlier].is_disjoint(&file_sets[later]) {
                graph.add_edge(nodes[earlier], nodes[later], ());
            }
        }

        for dependency in &recipes[later].depends_on {
            let dep_idx = recipes
                .iter()
                .position(|candidate| &candidate.recipe_id == dependency)
                .ok_or_else(|| {
                    OdavlError::validation(format!(
                        "recipe '{}' depends on unknown recipe '{dependency}'",
                        recipes[later].recipe_id
                    ))
                })?;
            if dep_idx != later {
                graph.add_edge(nodes[dep_idx], nodes[later], ());
            }
        }
    }

    let mut remaining: Vec<usize> = (0..recipes.len()).collect();
    let mut done: Vec<bool> = vec![false; recipes.len()];
    let mut batches: Vec<Vec<usize>> = Vec::new();

    while !remaining.is_empty() {
        let ready: Vec<usize> = remaining
            .iter()
            .copied()
            .filter(|&idx| {
                graph
                    .neighbors_directed(nodes[idx], Direction::Incoming)
                    .all(|neighbor| done[graph[neighbor]])
            })
            .collect();

        if ready.is_empty() {
            let stuck: Vec<&str> = remaining
                .iter()
                .map(|&idx| recipes[idx].recipe_id.as_str())
                .collect();
            return Err(OdavlError::circular_dependency(format!(
                "no progress possible among [{}]",
                stuck.join(", ")
            )));
        }

        for &idx in &ready {
            done[idx] = true;
        }
        remaining.retain(|idx| !done[*idx]);
        batches.push(ready);
    }

    Ok(batches)
}

#[cfg(test)]
#[path = "execution_tests.rs"]
mod tests;
