//! Self-heal session controller.
//!
//! One session is a full Observe → Decide → Act → Verify → Learn cycle over
//! a file set. The controller owns the state machine, enforces the blast
//! radius and protected path constraints before anything executes, rolls
//! back recipes that introduce new critical issues, and updates trust
//! exactly once after completion.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::config::AutopilotSettings;
use crate::core::errors::{OdavlError, Result};
use crate::core::execution::{
    CancellationFlag, ExecutorConfig, InsightRevalidation, ParallelExecutor,
    RecipeExecutionResult, RecipeStatus,
};
use crate::core::findings::{Finding, Severity};
use crate::core::fingerprint::generate_fingerprint;
use crate::core::intake::IntakeEngine;
use crate::core::policy::PolicyEngine;
use crate::core::recipes::RecipeRegistry;
use crate::core::scoring::{RecipeScorer, SelectedRecipe};
use crate::core::trust::{TrustOutcome, TrustStore};
use crate::detectors::executor::{DetectorExecutor, ExecutionMode};
use crate::detectors::{Detector, FileSet};
use crate::io::reports::{
    BrainConfidence, DetectedIssues, FinalOutcomeSection, GuardianResult, IntelligenceSection,
    ReportWriter, RollbackSection, SelectedRecipeSummary, SessionReport, SessionSection,
    REPORT_SCHEMA, REPORT_VERSION,
};
use crate::io::state::StateDir;
use crate::io::telemetry::{Product, TelemetryEvent, TelemetryStream};

/// States of the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// Session allocated, nothing observed yet
    Init,
    /// Detectors running
    Observing,
    /// Intake and scoring
    Deciding,
    /// Recipes executing
    Acting,
    /// Re-running detectors over modified files
    Verifying,
    /// Trust and telemetry updates
    Learning,
    /// Terminal: completed
    Done,
    /// Terminal: everything executed was reverted
    RolledBack,
    /// Terminal: unhandled failure
    Failed,
}

impl SessionState {
    /// Whether `next` is a legal successor of `self`.
    fn allows(self, next: Self) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Init, Observing)
                | (Observing, Deciding)
                | (Deciding, Acting)
                | (Deciding, Done)
                | (Acting, Verifying)
                | (Verifying, Learning)
                | (Learning, Done)
                | (Learning, RolledBack)
                | (Learning, Failed)
        )
    }

    /// Canonical label used in reports.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Observing => "OBSERVING",
            Self::Deciding => "DECIDING",
            Self::Acting => "ACTING",
            Self::Verifying => "VERIFYING",
            Self::Learning => "LEARNING",
            Self::Done => "DONE",
            Self::RolledBack => "ROLLED_BACK",
            Self::Failed => "FAILED",
        }
    }
}

/// Final outcome of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionOutcome {
    /// Every attempted recipe verified clean (or nothing needed doing)
    Success,
    /// Some recipes survived, some failed or were reverted
    Partial,
    /// Nothing survived and nothing was reverted
    Failed,
    /// Everything that executed was reverted
    RolledBack,
}

impl SessionOutcome {
    /// Outcome label used in reports and telemetry.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::RolledBack => "rolled-back",
        }
    }

    /// Process exit code for the autopilot command.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Success | Self::Partial => 0,
            Self::Failed => 1,
            Self::RolledBack => 4,
        }
    }
}

/// Persistent record of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfHealSession {
    /// Session id (`heal-<unix-millis>` unless propagated from the
    /// environment)
    pub session_id: String,
    /// Session start time
    pub timestamp: DateTime<Utc>,
    /// Recipes selected for execution
    pub selected_recipes: Vec<SelectedRecipe>,
    /// Per-recipe results; always the same length as `selected_recipes`
    pub execution_results: Vec<RecipeExecutionResult>,
    /// Final outcome
    pub final_outcome: SessionOutcome,
}

/// Everything a completed session hands back to the caller.
#[derive(Debug)]
pub struct SessionRunOutput {
    /// The session record
    pub session: SelfHealSession,
    /// Where the attested report landed
    pub report_path: PathBuf,
    /// Attestation hash of the report
    pub content_hash: String,
    /// Findings observed at session start
    pub findings: Vec<Finding>,
}

/// The session controller.
pub struct SessionController {
    workspace_root: PathBuf,
    settings: AutopilotSettings,
    detectors: Vec<Arc<dyn Detector>>,
    registry: RecipeRegistry,
    intake: IntakeEngine,
    scorer: RecipeScorer,
    policy: PolicyEngine,
    trust: Arc<TrustStore>,
    state_dir: StateDir,
    cancel: CancellationFlag,
    state: SessionState,
    session_id: String,
}

impl SessionController {
    /// Assemble a controller. The session id comes from
    /// `ODAVL_SESSION_ID` when set, otherwise `heal-<unix-millis>`.
    pub fn new(
        workspace_root: impl Into<PathBuf>,
        settings: AutopilotSettings,
        detectors: Vec<Arc<dyn Detector>>,
        policy: PolicyEngine,
        trust: Arc<TrustStore>,
        state_dir: StateDir,
    ) -> Self {
        let session_id = crate::core::config::session_id_from_env()
            .unwrap_or_else(|| format!("heal-{}", Utc::now().timestamp_millis()));
        let scorer = RecipeScorer::new(Arc::clone(&trust), settings.scoring);

        Self {
            workspace_root: workspace_root.into(),
            settings,
            detectors,
            registry: RecipeRegistry::standard(),
            intake: IntakeEngine::standard(),
            scorer,
            policy,
            trust,
            state_dir,
            cancel: CancellationFlag::new(),
            state: SessionState::Init,
            session_id,
        }
    }

    /// Replace the standard recipe registry (extension point for embedders
    /// shipping their own recipes).
    pub fn with_registry(mut self, registry: RecipeRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Session id allocated for this run.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Cancellation handle for this session.
    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    /// Current state (observable for diagnostics).
    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) -> Result<()> {
        if !self.state.allows(next) {
            return Err(OdavlError::internal(format!(
                "illegal session transition {} -> {}",
                self.state.as_str(),
                next.as_str()
            )));
        }
        debug!(from = self.state.as_str(), to = next.as_str(), "session transition");
        self.state = next;
        Ok(())
    }

    /// Run one full self-heal cycle over the given file set.
    pub async fn run(mut self, files: FileSet) -> Result<SessionRunOutput> {
        let started = Instant::now();
        let started_at = Utc::now();
        info!(session = %self.session_id, files = files.files().len(), "session started");

        // Observe.
        self.transition(SessionState::Observing)?;
        let mode = if self.settings.max_workers <= 1 {
            ExecutionMode::Sequential
        } else {
            ExecutionMode::file_parallel_for(files.files().len())
        };
        let findings = DetectorExecutor::new(mode).run(&self.detectors, &files).await;

        // Decide.
        self.transition(SessionState::Deciding)?;
        let actionable: Vec<Finding> = findings
            .iter()
            .filter(|finding| finding.severity > Severity::Info)
            .cloned()
            .collect();
        let candidates = self.intake.candidates(&actionable, &self.registry);
        let selected = self.scorer.select(&candidates, &self.registry)?;

        if selected.is_empty() {
            // Nothing to do is a success.
            self.transition(SessionState::Done)?;
            return self.finish(
                started_at,
                started.elapsed().as_millis() as u64,
                findings,
                Vec::new(),
                Vec::new(),
                None,
                SessionOutcome::Success,
                Vec::new(),
                vec!["no recipes above thresholds".to_string()],
            );
        }

        // Constraint checks before anything executes.
        let mut pre_skipped: Vec<Option<RecipeExecutionResult>> = Vec::new();
        let mut eligible: Vec<SelectedRecipe> = Vec::new();
        for recipe in &selected {
            match self.constraint_error(recipe)? {
                Some(reason) => {
                    warn!(recipe = %recipe.recipe_id, reason = %reason, "recipe skipped by constraints");
                    pre_skipped.push(Some(RecipeExecutionResult {
                        recipe_id: recipe.recipe_id.clone(),
                        status: RecipeStatus::Skipped,
                        evidence: Default::default(),
                        insight_revalidation: None,
                        errors: Some(vec![reason]),
                    }));
                }
                None => {
                    pre_skipped.push(None);
                    eligible.push(recipe.clone());
                }
            }
        }

        // Act.
        self.transition(SessionState::Acting)?;
        let executor = ParallelExecutor::new(
            &self.workspace_root,
            ExecutorConfig {
                max_workers: self.settings.max_workers,
                recipe_timeout_secs: self.settings.recipe_timeout_secs,
                dry_run: self.settings.dry_run,
                fail_fast: self.settings.fail_fast,
            },
        );
        let outcome = executor.execute(&eligible, &self.cancel).await?;

        // Merge pre-skipped and executed results back into selection order.
        let mut executed_iter = outcome.results.into_iter();
        let mut results: Vec<RecipeExecutionResult> = pre_skipped
            .into_iter()
            .map(|skipped| match skipped {
                Some(result) => result,
                None => executed_iter
                    .next()
                    .expect("executor returns one result per eligible recipe"),
            })
            .collect();

        // Verify.
        self.transition(SessionState::Verifying)?;
        let (guardian, reverted_files) = if self.settings.dry_run {
            (None, Vec::new())
        } else {
            self.verify(&files, &findings, &mut results, &outcome.snapshots)
                .await?
        };

        // Learn.
        self.transition(SessionState::Learning)?;
        let observations: Vec<(String, TrustOutcome)> = results
            .iter()
            .map(|result| {
                let outcome = match result.status {
                    RecipeStatus::Executed => TrustOutcome::Success,
                    RecipeStatus::Failed | RecipeStatus::RolledBack => TrustOutcome::Failure,
                    RecipeStatus::Skipped => TrustOutcome::Skipped,
                };
                (result.recipe_id.clone(), outcome)
            })
            .collect();
        self.trust.apply_session(&observations);
        self.trust.persist()?;

        let final_outcome = decide_outcome(&results);
        self.transition(match final_outcome {
            SessionOutcome::Success | SessionOutcome::Partial => SessionState::Done,
            SessionOutcome::RolledBack => SessionState::RolledBack,
            SessionOutcome::Failed => SessionState::Failed,
        })?;

        let reasoning = outcome_reasoning(&results, guardian.as_ref());
        let output = self.finish(
            started_at,
            started.elapsed().as_millis() as u64,
            findings,
            selected,
            results,
            guardian,
            final_outcome,
            reverted_files,
            reasoning,
        )?;

        info!(
            session = %self.session_id,
            outcome = final_outcome.as_str(),
            "session complete"
        );
        Ok(output)
    }

    /// Pre-execution constraint check; returns the skip reason, if any.
    fn constraint_error(&self, recipe: &SelectedRecipe) -> Result<Option<String>> {
        if recipe.estimated_impact.files_affected > self.settings.max_files {
            return Ok(Some(format!(
                "exceeds max files ({} > {})",
                recipe.estimated_impact.files_affected, self.settings.max_files
            )));
        }
        if recipe.estimated_impact.loc_changed > self.settings.max_loc {
            return Ok(Some(format!(
                "exceeds max LOC ({} > {})",
                recipe.estimated_impact.loc_changed, self.settings.max_loc
            )));
        }
        for file in recipe.recipe.files_affected() {
            if self.policy.is_protected(&file) {
                return Ok(Some("protected path".to_string()));
            }
        }

        let decision = self.policy.evaluate(&format!("recipe:{}", recipe.recipe_id))?;
        if !decision.approved {
            return Ok(Some("policy denied".to_string()));
        }
        Ok(None)
    }

    /// Re-run detectors over modified files and fill in per-recipe
    /// revalidation. Recipes that introduced a new critical issue are rolled
    /// back from their snapshots.
    async fn verify(
        &self,
        files: &FileSet,
        before: &[Finding],
        results: &mut [RecipeExecutionResult],
        snapshots: &std::collections::HashMap<String, crate::core::execution::SnapshotSet>,
    ) -> Result<(Option<GuardianResult>, Vec<String>)> {
        let modified: Vec<String> = results
            .iter()
            .filter(|result| result.status == RecipeStatus::Executed)
            .flat_map(|result| result.evidence.files_modified.iter().cloned())
            .collect();

        if modified.is_empty() {
            return Ok((
                Some(GuardianResult {
                    verified: true,
                    new_critical_issues: 0,
                }),
                Vec::new(),
            ));
        }

        let verification_set = FileSet::new(files.root(), modified);
        let after = DetectorExecutor::new(ExecutionMode::Sequential)
            .run(&self.detectors, &verification_set)
            .await;

        let before_fingerprints: HashSet<String> =
            before.iter().map(generate_fingerprint).collect();

        let mut total_new_critical = 0;
        let mut reverted_files = Vec::new();

        for result in results.iter_mut() {
            if result.status != RecipeStatus::Executed {
                continue;
            }

            let recipe_files: HashSet<&str> = result
                .evidence
                .files_modified
                .iter()
                .map(String::as_str)
                .collect();

            let before_issues: Vec<&Finding> = before
                .iter()
                .filter(|f| recipe_files.contains(f.normalized_file().as_str()))
                .collect();
            let after_issues: Vec<&Finding> = after
                .iter()
                .filter(|f| recipe_files.contains(f.normalized_file().as_str()))
                .collect();

            let new_issues: Vec<&&Finding> = after_issues
                .iter()
                .filter(|f| !before_fingerprints.contains(&generate_fingerprint(f)))
                .collect();
            let new_critical = new_issues
                .iter()
                .filter(|f| f.severity == Severity::Critical)
                .count();

            let severity_improvement: f64 = before_issues
                .iter()
                .map(|f| f.severity.score())
                .sum::<f64>()
                - after_issues.iter().map(|f| f.severity.score()).sum::<f64>();

            result.insight_revalidation = Some(InsightRevalidation {
                before_issues: before_issues.len(),
                after_issues: after_issues.len(),
                severity_improvement,
                new_issues_introduced: new_issues.len(),
            });

            if new_critical > 0 {
                warn!(
                    recipe = %result.recipe_id,
                    new_critical,
                    "verification found new critical issues; rolling back"
                );
                total_new_critical += new_critical;
                if let Some(snapshot) = snapshots.get(&result.recipe_id) {
                    reverted_files.extend(snapshot.restore(&self.workspace_root)?);
                }
                result.status = RecipeStatus::RolledBack;
                result
                    .errors
                    .get_or_insert_with(Vec::new)
                    .push("verification found new critical issue".to_string());
            }
        }

        Ok((
            Some(GuardianResult {
                verified: total_new_critical == 0,
                new_critical_issues: total_new_critical,
            }),
            reverted_files,
        ))
    }

    fn average_trust(&self, selected: &[SelectedRecipe]) -> f64 {
        if selected.is_empty() {
            return 0.0;
        }
        selected
            .iter()
            .map(|recipe| self.trust.trust_for(&recipe.recipe_id))
            .sum::<f64>()
            / selected.len() as f64
    }

    /// Build and write the attested report, emit telemetry, and assemble
    /// the session record.
    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        started_at: DateTime<Utc>,
        duration_ms: u64,
        findings: Vec<Finding>,
        selected: Vec<SelectedRecipe>,
        results: Vec<RecipeExecutionResult>,
        guardian: Option<GuardianResult>,
        final_outcome: SessionOutcome,
        reverted_files: Vec<String>,
        reasoning: Vec<String>,
    ) -> Result<SessionRunOutput> {
        let intelligence = if selected.is_empty() {
            IntelligenceSection::default()
        } else {
            let n = selected.len() as f64;
            IntelligenceSection {
                avg_ml_score: selected.iter().map(|r| r.score.ml_score).sum::<f64>() / n,
                avg_trust_score: selected.iter().map(|r| r.score.trust_score).sum::<f64>() / n,
                avg_fusion_score: selected.iter().map(|r| r.score.fusion_score).sum::<f64>() / n,
                avg_final_score: selected.iter().map(|r| r.score.final_score).sum::<f64>() / n,
            }
        };

        let trust_after = self.average_trust(&selected);
        let trust_before = intelligence.avg_trust_score;
        let auto_reverted = results
            .iter()
            .any(|result| result.status == RecipeStatus::RolledBack);

        let fix_diffs = results
            .iter()
            .filter(|result| result.status == RecipeStatus::Executed)
            .flat_map(|result| result.evidence.diffs.iter().cloned())
            .collect();

        let report = SessionReport {
            version: REPORT_VERSION.to_string(),
            schema: REPORT_SCHEMA.to_string(),
            timestamp: Utc::now(),
            session_id: self.session_id.clone(),
            session: SessionSection {
                state: self.state.as_str().to_string(),
                final_outcome: final_outcome.as_str().to_string(),
                duration_ms,
            },
            detected_issues: DetectedIssues::from_findings(&findings),
            selected_recipes: selected
                .iter()
                .map(|recipe| SelectedRecipeSummary {
                    recipe_id: recipe.recipe_id.clone(),
                    final_score: recipe.score.final_score,
                    safety_class: recipe.score.safety_class,
                    files: recipe.recipe.files_affected().into_iter().collect(),
                })
                .collect(),
            execution: results.clone(),
            intelligence,
            fix_diffs,
            guardian_result: guardian,
            brain_confidence: BrainConfidence {
                before: trust_before,
                after: trust_after,
                improvement: trust_after - trust_before,
            },
            final_outcome: FinalOutcomeSection {
                decision: final_outcome.as_str().to_string(),
                reasoning,
                auto_reverted,
            },
            rollback: if reverted_files.is_empty() {
                None
            } else {
                Some(RollbackSection {
                    reason: "verification found new critical issue".to_string(),
                    files_reverted: reverted_files,
                })
            },
            content_hash: None,
        };

        let (report_path, content_hash) = ReportWriter::new(self.state_dir.clone()).write(&report)?;

        let telemetry = TelemetryStream::new(
            self.state_dir.telemetry_events_path(Product::Autopilot.as_str()),
        );
        telemetry.append(&TelemetryEvent {
            timestamp: Utc::now(),
            session_id: self.session_id.clone(),
            product: Product::Autopilot,
            outcome: final_outcome.as_str().to_string(),
            findings: findings.len(),
            recipes_selected: selected.len(),
            recipes_executed: results
                .iter()
                .filter(|r| r.status == RecipeStatus::Executed)
                .count(),
            recipes_failed: results
                .iter()
                .filter(|r| {
                    matches!(r.status, RecipeStatus::Failed | RecipeStatus::RolledBack)
                })
                .count(),
            duration_ms,
        })?;

        Ok(SessionRunOutput {
            session: SelfHealSession {
                session_id: self.session_id.clone(),
                timestamp: started_at,
                selected_recipes: selected,
                execution_results: results,
                final_outcome,
            },
            report_path,
            content_hash,
            findings,
        })
    }
}

/// Outcome rule over the merged result set.
///
/// `success` requires every attempted recipe to have executed with zero new
/// issues introduced; recipes that survived verification but dragged in new
/// non-critical findings degrade the session to `partial`.
fn decide_outcome(results: &[RecipeExecutionResult]) -> SessionOutcome {
    let attempted: Vec<&RecipeExecutionResult> = results
        .iter()
        .filter(|result| result.status != RecipeStatus::Skipped)
        .collect();
    if attempted.is_empty() {
        return SessionOutcome::Success;
    }

    let executed = attempted
        .iter()
        .filter(|result| result.status == RecipeStatus::Executed)
        .count();
    let clean = attempted
        .iter()
        .filter(|result| {
            result.status == RecipeStatus::Executed
                && result
                    .insight_revalidation
                    .map_or(true, |v| v.new_issues_introduced == 0)
        })
        .count();
    let reverted = attempted
        .iter()
        .filter(|result| result.status == RecipeStatus::RolledBack)
        .count();

    if executed == attempted.len() && clean == executed {
        SessionOutcome::Success
    } else if executed > 0 {
        SessionOutcome::Partial
    } else if reverted > 0 {
        SessionOutcome::RolledBack
    } else {
        SessionOutcome::Failed
    }
}

fn outcome_reasoning(
    results: &[RecipeExecutionResult],
    guardian: Option<&GuardianResult>,
) -> Vec<String> {
    let mut reasoning = Vec::new();
    let executed = results
        .iter()
        .filter(|r| r.status == RecipeStatus::Executed)
        .count();
    let skipped = results
        .iter()
        .filter(|r| r.status == RecipeStatus::Skipped)
        .count();
    let failed = results
        .iter()
        .filter(|r| r.status == RecipeStatus::Failed)
        .count();
    let reverted = results
        .iter()
        .filter(|r| r.status == RecipeStatus::RolledBack)
        .count();

    reasoning.push(format!(
        "{executed} executed, {skipped} skipped, {failed} failed, {reverted} rolled back"
    ));
    if let Some(guardian) = guardian {
        if guardian.verified {
            reasoning.push("verification clean".to_string());
        } else {
            reasoning.push(format!(
                "verification found {} new critical issue(s)",
                guardian.new_critical_issues
            ));
        }
    }
    reasoning
}
