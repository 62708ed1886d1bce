//! End-to-end self-heal session scenarios.

use std::sync::Arc;

use indexmap::IndexMap;
use tempfile::TempDir;

use odavl_rs::core::config::AutopilotSettings;
use odavl_rs::core::execution::RecipeStatus;
use odavl_rs::core::policy::{AuditLog, PolicyConfig, PolicyEngine};
use odavl_rs::core::recipes::{ActionKind, Recipe, RecipeAction, RecipeRegistry};
use odavl_rs::core::session::{SessionController, SessionOutcome, SessionRunOutput};
use odavl_rs::core::trust::TrustStore;
use odavl_rs::detectors::{DetectorRegistry, FileSet};
use odavl_rs::io::reports::SessionReport;
use odavl_rs::io::state::StateDir;
use odavl_rs::io::telemetry::TelemetryStream;
use odavl_rs::IssueCategory;

struct Harness {
    workspace: TempDir,
    state: StateDir,
    trust: Arc<TrustStore>,
}

impl Harness {
    fn new() -> Self {
        let workspace = TempDir::new().unwrap();
        let state = StateDir::for_workspace(workspace.path());
        state.ensure().unwrap();
        let trust = Arc::new(
            TrustStore::open(state.trust_store_path(), &state.adaptive_state_path()).unwrap(),
        );
        Self {
            workspace,
            state,
            trust,
        }
    }

    fn write(&self, rel: &str, content: &str) {
        let path = self.workspace.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.workspace.path().join(rel)).unwrap()
    }

    fn controller(&self) -> SessionController {
        let policy = PolicyEngine::new(PolicyConfig::default())
            .unwrap()
            .with_audit(AuditLog::new(self.state.audit_log_path(), "test-session"));

        SessionController::new(
            self.workspace.path(),
            AutopilotSettings {
                max_workers: 1,
                ..AutopilotSettings::default()
            },
            DetectorRegistry::with_bundled().all(),
            policy,
            Arc::clone(&self.trust),
            self.state.clone(),
        )
    }

    async fn run(&self, files: &[&str]) -> SessionRunOutput {
        self.run_with(self.controller(), files).await
    }

    async fn run_with(&self, controller: SessionController, files: &[&str]) -> SessionRunOutput {
        let file_set = FileSet::new(
            self.workspace.path(),
            files.iter().map(|f| f.to_string()).collect(),
        );
        controller.run(file_set).await.unwrap()
    }

    fn load_report(&self, output: &SessionRunOutput) -> SessionReport {
        let content = std::fs::read_to_string(&output.report_path).unwrap();
        serde_json::from_str(&content).unwrap()
    }
}

#[tokio::test]
async fn empty_project_session_succeeds() {
    let harness = Harness::new();

    let output = harness.run(&[]).await;

    assert_eq!(output.session.final_outcome, SessionOutcome::Success);
    assert!(output.session.selected_recipes.is_empty());
    assert!(output.session.execution_results.is_empty());
    assert!(output.findings.is_empty());

    // The report still lands, attested, with no diffs.
    let report = harness.load_report(&output);
    assert!(report.verify_content_hash().unwrap());
    assert!(report.fix_diffs.is_empty());
    assert_eq!(report.session.final_outcome, "success");

    // Telemetry recorded an (empty) session event.
    let stream = TelemetryStream::new(harness.state.telemetry_events_path("autopilot"));
    let events = stream.read_last(10).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].recipes_selected, 0);
    assert_eq!(events[0].findings, 0);
}

#[tokio::test]
async fn protected_path_recipe_is_skipped() {
    let harness = Harness::new();
    harness.write("security/auth.ts", "console.log(\"auth\");\nexport const ok = 1;\n");

    let output = harness.run(&["security/auth.ts"]).await;

    assert_eq!(output.session.execution_results.len(), 1);
    let result = &output.session.execution_results[0];
    assert_eq!(result.status, RecipeStatus::Skipped);
    assert!(result
        .errors
        .as_ref()
        .unwrap()
        .iter()
        .any(|error| error == "protected path"));

    // Trust is untouched by skipped recipes.
    assert!(harness.trust.record(&result.recipe_id).is_none());

    // The protected file was never mutated.
    assert!(harness.read("security/auth.ts").contains("console.log"));
    assert_eq!(output.session.final_outcome, SessionOutcome::Success);
}

#[tokio::test]
async fn heal_session_strips_debug_logging() {
    let harness = Harness::new();
    harness.write(
        "src/app.ts",
        "const a = 1;\nconsole.log(a);\nconsole.debug(a);\nexport default a;\n",
    );

    let output = harness.run(&["src/app.ts"]).await;

    assert_eq!(output.session.final_outcome, SessionOutcome::Success);
    assert_eq!(
        output.session.execution_results.len(),
        output.session.selected_recipes.len()
    );

    let result = &output.session.execution_results[0];
    assert_eq!(result.status, RecipeStatus::Executed);
    assert_eq!(result.evidence.files_modified, vec!["src/app.ts".to_string()]);

    let revalidation = result.insight_revalidation.unwrap();
    assert_eq!(revalidation.new_issues_introduced, 0);
    assert!(revalidation.after_issues < revalidation.before_issues);
    assert!(revalidation.severity_improvement > 0.0);

    // The mutation stuck.
    let healed = harness.read("src/app.ts");
    assert!(!healed.contains("console.log"));
    assert!(healed.contains("export default a;"));

    // Verification success fed trust.
    let record = harness.trust.record("strip-debug-logging").unwrap();
    assert_eq!(record.success_count, 1);
    assert!(record.trust > 0.5);

    // Attested report with diffs.
    let report = harness.load_report(&output);
    assert!(report.verify_content_hash().unwrap());
    assert!(!report.fix_diffs.is_empty());
    assert_eq!(report.guardian_result.as_ref().unwrap().new_critical_issues, 0);
    assert!(output.session.session_id.starts_with("heal-"));
}

#[tokio::test]
async fn regression_introducing_critical_rolls_back() {
    let harness = Harness::new();
    let original = "console.log(1);\nexport const ok = true;\n";
    harness.write("src/app.ts", original);

    // A recipe that "fixes" debug logging by introducing a hard-coded
    // credential, which secret-scan reports as a new critical issue.
    let mut params = IndexMap::new();
    params.insert("find".to_string(), serde_json::json!("console.log(1);"));
    params.insert(
        "replace".to_string(),
        serde_json::json!("const password = \"oops\";"),
    );
    let mut registry = RecipeRegistry::default();
    registry.register(
        Recipe {
            id: "sabotage-fix".to_string(),
            name: "Sabotage fix".to_string(),
            actions: vec![RecipeAction {
                kind: ActionKind::PatchFile,
                files: Vec::new(),
                params,
            }],
        },
        &[IssueCategory::Performance],
    );

    let controller = harness.controller().with_registry(registry);
    let output = harness.run_with(controller, &["src/app.ts"]).await;

    let result = &output.session.execution_results[0];
    assert_eq!(result.recipe_id, "sabotage-fix");
    assert_eq!(result.status, RecipeStatus::RolledBack);
    assert!(result.insight_revalidation.unwrap().new_issues_introduced >= 1);

    // Snapshot restored the original bytes.
    assert_eq!(harness.read("src/app.ts"), original);

    // The only executed recipe was reverted.
    assert_eq!(output.session.final_outcome, SessionOutcome::RolledBack);
    assert_eq!(output.session.final_outcome.exit_code(), 4);

    // Failure counted against the recipe.
    let record = harness.trust.record("sabotage-fix").unwrap();
    assert_eq!(record.failure_count, 1);
    assert!(record.trust < 0.5);

    let report = harness.load_report(&output);
    assert!(report.final_outcome.auto_reverted);
    let rollback = report.rollback.unwrap();
    assert!(rollback
        .files_reverted
        .contains(&"src/app.ts".to_string()));
    assert!(!report.guardian_result.unwrap().verified);
}

#[tokio::test]
async fn audit_trail_records_recipe_evaluations() {
    let harness = Harness::new();
    harness.write("src/app.ts", "console.log(1);\n");

    harness.run(&["src/app.ts"]).await;

    let audit = std::fs::read_to_string(harness.state.audit_log_path()).unwrap();
    let lines: Vec<&str> = audit.lines().collect();
    assert!(!lines.is_empty());
    for line in lines {
        let entry: serde_json::Value = serde_json::from_str(line).unwrap();
        assert!(entry["command"]
            .as_str()
            .unwrap()
            .starts_with("recipe:"));
        assert_eq!(entry["session_id"], "test-session");
    }
}
