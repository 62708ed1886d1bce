//! Tests for the dependency-aware parallel executor.

use std::collections::BTreeSet;

use tempfile::TempDir;

use super::*;
use crate::core::recipes::RecipeRegistry;
use crate::core::scoring::{EstimatedImpact, RecipeScore, SafetyClass, SelectedRecipe};

fn selected(recipe_id: &str, template: &str, files: &[&str]) -> SelectedRecipe {
    let registry = RecipeRegistry::standard();
    let mut recipe = registry
        .instantiate(template, files.iter().map(|f| f.to_string()).collect())
        .unwrap();
    recipe.id = recipe_id.to_string();

    SelectedRecipe {
        recipe_id: recipe_id.to_string(),
        score: RecipeScore {
            recipe_id: recipe_id.to_string(),
            ml_score: 0.5,
            trust_score: 0.5,
            fusion_score: 0.5,
            final_score: 0.5,
            safety_class: SafetyClass::Review,
            justification: Vec::new(),
        },
        target_candidates: Vec::new(),
        estimated_impact: EstimatedImpact {
            files_affected: files.len(),
            loc_changed: 0,
            risk_reduction: 0.0,
        },
        recipe,
        depends_on: Vec::new(),
    }
}

fn config(max_workers: usize) -> ExecutorConfig {
    ExecutorConfig {
        max_workers,
        recipe_timeout_secs: 30,
        dry_run: false,
        fail_fast: false,
    }
}

#[test]
fn test_plan_serializes_conflicts() {
    // A and B both claim src/a.ts; C claims src/b.ts. Expected batches:
    // [[A, C], [B]] given input order A, B, C.
    let recipes = vec![
        selected("recipe-a", "strip-debug-logging", &["src/a.ts"]),
        selected("recipe-b", "organize-imports", &["src/a.ts"]),
        selected("recipe-c", "strip-debug-logging", &["src/b.ts"]),
    ];

    let executor = ParallelExecutor::new("/tmp/unused", config(2));
    let plan = executor.plan(&recipes).unwrap();

    assert_eq!(
        plan,
        vec![
            vec!["recipe-a".to_string(), "recipe-c".to_string()],
            vec!["recipe-b".to_string()],
        ]
    );
}

#[test]
fn test_plan_batches_are_file_disjoint() {
    let recipes = vec![
        selected("r1", "strip-debug-logging", &["src/a.ts", "src/b.ts"]),
        selected("r2", "organize-imports", &["src/b.ts"]),
        selected("r3", "strip-debug-logging", &["src/c.ts"]),
        selected("r4", "organize-imports", &["src/a.ts", "src/c.ts"]),
    ];

    let executor = ParallelExecutor::new("/tmp/unused", config(4));
    let plan = executor.plan(&recipes).unwrap();

    for batch in &plan {
        let mut seen: BTreeSet<String> = BTreeSet::new();
        for recipe_id in batch {
            let recipe = recipes.iter().find(|r| &r.recipe_id == recipe_id).unwrap();
            for file in recipe.recipe.files_affected() {
                assert!(seen.insert(file), "file shared within batch {batch:?}");
            }
        }
    }
}

#[test]
fn test_circular_dependency_is_fatal() {
    let mut a = selected("recipe-a", "strip-debug-logging", &["src/a.ts"]);
    let mut b = selected("recipe-b", "organize-imports", &["src/b.ts"]);
    a.depends_on = vec!["recipe-b".to_string()];
    b.depends_on = vec!["recipe-a".to_string()];

    let executor = ParallelExecutor::new("/tmp/unused", config(2));
    let err = executor.plan(&[a, b]).unwrap_err();
    assert!(matches!(err, OdavlError::CircularDependency { .. }));
}

#[test]
fn test_unknown_dependency_rejected() {
    let mut a = selected("recipe-a", "strip-debug-logging", &["src/a.ts"]);
    a.depends_on = vec!["no-such-recipe".to_string()];

    let executor = ParallelExecutor::new("/tmp/unused", config(2));
    let err = executor.plan(&[a]).unwrap_err();
    assert!(matches!(err, OdavlError::Validation { .. }));
}

#[tokio::test]
async fn test_dry_run_fabricates_results() {
    let dir = TempDir::new().unwrap();
    let recipes = vec![selected("recipe-a", "strip-debug-logging", &["src/a.ts"])];

    let executor = ParallelExecutor::new(
        dir.path(),
        ExecutorConfig {
            dry_run: true,
            ..config(1)
        },
    );
    let outcome = executor.execute(&recipes, &CancellationFlag::new()).await.unwrap();

    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].status, RecipeStatus::Executed);
    assert_eq!(
        outcome.results[0].evidence.files_modified,
        vec!["src/a.ts".to_string()]
    );
    assert!(outcome.snapshots.is_empty());
    // Dry run never touches the workspace.
    assert!(!dir.path().join("src/a.ts").exists());
}

#[tokio::test]
async fn test_execute_mutates_and_snapshots() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    let original = "const a = 1;\nconsole.log(a);\n";
    std::fs::write(dir.path().join("src/a.ts"), original).unwrap();

    let recipes = vec![selected("recipe-a", "strip-debug-logging", &["src/a.ts"])];
    let executor = ParallelExecutor::new(dir.path(), config(1));
    let outcome = executor.execute(&recipes, &CancellationFlag::new()).await.unwrap();

    assert_eq!(outcome.results[0].status, RecipeStatus::Executed);
    assert_eq!(
        outcome.results[0].evidence.files_modified,
        vec!["src/a.ts".to_string()]
    );

    let mutated = std::fs::read_to_string(dir.path().join("src/a.ts")).unwrap();
    assert!(!mutated.contains("console.log"));

    // The snapshot restores the original bytes, idempotently.
    let snapshot = outcome.snapshots.get("recipe-a").unwrap();
    snapshot.restore(dir.path()).unwrap();
    let restored = std::fs::read_to_string(dir.path().join("src/a.ts")).unwrap();
    assert_eq!(restored, original);

    snapshot.restore(dir.path()).unwrap();
    let restored_again = std::fs::read_to_string(dir.path().join("src/a.ts")).unwrap();
    assert_eq!(restored_again, original);
}

#[tokio::test]
async fn test_fail_fast_rolls_back_batch_and_skips_rest() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    let original = "const a = 1;\nconsole.log(a);\n";
    std::fs::write(dir.path().join("src/a.ts"), original).unwrap();

    // recipe-a mutates src/a.ts; recipe-b reads a missing file and fails;
    // recipe-c conflicts with recipe-a, landing in the second batch.
    let recipes = vec![
        selected("recipe-a", "strip-debug-logging", &["src/a.ts"]),
        selected("recipe-b", "strip-debug-logging", &["src/missing.ts"]),
        selected("recipe-c", "organize-imports", &["src/a.ts"]),
    ];

    let executor = ParallelExecutor::new(
        dir.path(),
        ExecutorConfig {
            fail_fast: true,
            ..config(2)
        },
    );
    let outcome = executor.execute(&recipes, &CancellationFlag::new()).await.unwrap();

    assert_eq!(outcome.results[0].status, RecipeStatus::RolledBack);
    assert_eq!(outcome.results[1].status, RecipeStatus::Failed);
    assert_eq!(outcome.results[2].status, RecipeStatus::Skipped);

    // Rolled-back recipe left the file at its original bytes.
    let content = std::fs::read_to_string(dir.path().join("src/a.ts")).unwrap();
    assert_eq!(content, original);
}

#[tokio::test]
async fn test_fail_fast_rolls_back_earlier_batches() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    let original_a = "const a = 1;\nconsole.log(a);\n";
    let original_b = "const b = 2;\nconsole.log(b);\n";
    std::fs::write(dir.path().join("src/a.ts"), original_a).unwrap();
    std::fs::write(dir.path().join("src/b.ts"), original_b).unwrap();

    // Batch 1: recipe-first and recipe-third execute and mutate their
    // files. Batch 2: recipe-second conflicts with recipe-first on
    // src/a.ts and fails on a missing file. Total rollback must restore
    // batch 1's work too, not just the failing batch.
    let recipes = vec![
        selected("recipe-first", "strip-debug-logging", &["src/a.ts"]),
        selected(
            "recipe-second",
            "strip-debug-logging",
            &["src/missing.ts", "src/a.ts"],
        ),
        selected("recipe-third", "strip-debug-logging", &["src/b.ts"]),
    ];

    let executor = ParallelExecutor::new(
        dir.path(),
        ExecutorConfig {
            fail_fast: true,
            ..config(2)
        },
    );
    let plan = executor.plan(&recipes).unwrap();
    assert_eq!(
        plan,
        vec![
            vec!["recipe-first".to_string(), "recipe-third".to_string()],
            vec!["recipe-second".to_string()],
        ]
    );

    let outcome = executor.execute(&recipes, &CancellationFlag::new()).await.unwrap();

    assert_eq!(outcome.results[0].status, RecipeStatus::RolledBack);
    assert_eq!(outcome.results[1].status, RecipeStatus::Failed);
    assert_eq!(outcome.results[2].status, RecipeStatus::RolledBack);

    // Both batch-1 files are back at their original bytes.
    assert_eq!(
        std::fs::read_to_string(dir.path().join("src/a.ts")).unwrap(),
        original_a
    );
    assert_eq!(
        std::fs::read_to_string(dir.path().join("src/b.ts")).unwrap(),
        original_b
    );
}

#[tokio::test]
async fn test_failure_without_fail_fast_continues() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(dir.path().join("src/a.ts"), "console.log(1);\n").unwrap();

    let recipes = vec![
        selected("recipe-bad", "strip-debug-logging", &["src/missing.ts"]),
        selected("recipe-good", "strip-debug-logging", &["src/a.ts"]),
    ];

    let executor = ParallelExecutor::new(dir.path(), config(2));
    let outcome = executor.execute(&recipes, &CancellationFlag::new()).await.unwrap();

    assert_eq!(outcome.results[0].status, RecipeStatus::Failed);
    assert_eq!(outcome.results[1].status, RecipeStatus::Executed);
}

#[tokio::test]
async fn test_cancellation_skips_queued_batches() {
    let dir = TempDir::new().unwrap();
    let recipes = vec![
        selected("recipe-a", "strip-debug-logging", &["src/a.ts"]),
        selected("recipe-b", "organize-imports", &["src/a.ts"]),
    ];

    let cancel = CancellationFlag::new();
    cancel.cancel();

    let executor = ParallelExecutor::new(dir.path(), config(1));
    let outcome = executor.execute(&recipes, &cancel).await.unwrap();

    for result in &outcome.results {
        assert_eq!(result.status, RecipeStatus::Skipped);
        assert_eq!(
            result.errors.as_ref().unwrap(),
            &vec!["session cancelled".to_string()]
        );
    }
}

#[tokio::test]
async fn test_status_counts_cover_all_recipes() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(dir.path().join("src/a.ts"), "console.log(1);\n").unwrap();

    let recipes = vec![
        selected("recipe-a", "strip-debug-logging", &["src/a.ts"]),
        selected("recipe-b", "strip-debug-logging", &["src/missing.ts"]),
        selected("recipe-c", "organize-imports", &["src/a.ts"]),
    ];

    let executor = ParallelExecutor::new(dir.path(), config(2));
    let outcome = executor.execute(&recipes, &CancellationFlag::new()).await.unwrap();

    assert_eq!(outcome.results.len(), recipes.len());
    let terminal = outcome.results.iter().filter(|result| {
        matches!(
            result.status,
            RecipeStatus::Executed
                | RecipeStatus::Skipped
                | RecipeStatus::Failed
                | RecipeStatus::RolledBack
        )
    });
    assert_eq!(terminal.count(), recipes.len());
}

#[test]
fn test_status_serde_labels() {
    assert_eq!(
        serde_json::to_string(&RecipeStatus::RolledBack).unwrap(),
        "\"rolled-back\""
    );
    assert_eq!(
        serde_json::to_string(&RecipeStatus::Executed).unwrap(),
        "\"executed\""
    );
}
