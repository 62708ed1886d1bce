//! Command implementations for the odavl binary.

use std::path::PathBuf;

use serde_json::json;
use tracing::{debug, error};

use odavl_rs::core::baseline::BaselineStore;
use odavl_rs::core::config::{detect_ci, insight_version_from_env, OdavlConfig};
use odavl_rs::core::errors::Result;
use odavl_rs::core::policy::PolicyConfig;
use odavl_rs::detectors::DetectorRegistry;
use odavl_rs::io::state::StateDir;
use odavl_rs::OdavlEngine;

use super::args::{AnalyzeArgs, AutopilotRunArgs, CiArgs};

fn load_config(config_path: Option<&PathBuf>) -> Result<OdavlConfig> {
    match config_path {
        Some(path) => OdavlConfig::from_yaml_file(path),
        None => Ok(OdavlConfig::default()),
    }
}

/// `odavl analyze`
pub async fn analyze_command(args: AnalyzeArgs, json: bool, config_path: Option<PathBuf>) -> i32 {
    match run_analyze(args, json, config_path).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            eprintln!("analyze failed: {e}");
            e.exit_code()
        }
    }
}

async fn run_analyze(
    args: AnalyzeArgs,
    json: bool,
    config_path: Option<PathBuf>,
) -> Result<i32> {
    let mut config = load_config(config_path.as_ref())?;
    config.analysis.changed_only |= args.changed_only;
    config.analysis.ci |= args.ci;
    if let Some(detectors) = args.detectors {
        config.analysis.detectors = detectors;
    }
    if let Some(baseline) = args.baseline {
        config.analysis.baseline = baseline;
    }

    let engine = OdavlEngine::new(&args.path, config)?;
    let outcome = engine.analyze().await?;

    if json {
        let payload = json!({
            "findings": outcome.findings,
            "comparison": outcome.comparison,
            "baseline_created": outcome.baseline_created,
            "exit_code": outcome.exit_code,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        match &outcome.comparison {
            Some(comparison) => println!(
                "analysis complete: {} findings ({} new, {} resolved, {} unchanged){}",
                outcome.findings.len(),
                comparison.summary.new,
                comparison.summary.resolved,
                comparison.summary.unchanged,
                if outcome.baseline_created {
                    " [baseline auto-created]"
                } else {
                    ""
                },
            ),
            None => println!(
                "analysis complete: {} findings (no baseline for delta)",
                outcome.findings.len()
            ),
        }
    }

    Ok(outcome.exit_code)
}

/// `odavl autopilot run`
pub async fn autopilot_run_command(
    args: AutopilotRunArgs,
    json: bool,
    config_path: Option<PathBuf>,
) -> i32 {
    match run_autopilot(args, json, config_path).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            eprintln!("autopilot failed: {e}");
            e.exit_code()
        }
    }
}

async fn run_autopilot(
    args: AutopilotRunArgs,
    json: bool,
    config_path: Option<PathBuf>,
) -> Result<i32> {
    let mut config = load_config(config_path.as_ref())?;
    if let Some(max_files) = args.max_files {
        config.autopilot.max_files = max_files;
    }
    if let Some(max_loc) = args.max_loc {
        config.autopilot.max_loc = max_loc;
    }
    config.autopilot.dry_run |= args.dry_run;
    if args.non_interactive {
        // Sessions never prompt; the flag exists for CI invocation parity.
        debug!("non-interactive run");
    }
    config.validate()?;

    let engine = OdavlEngine::new(&args.path, config)?;
    let output = engine.autopilot().await?;
    let outcome = output.session.final_outcome;

    if json {
        let payload = json!({
            "session": output.session,
            "report_path": output.report_path,
            "content_hash": output.content_hash,
            "exit_code": outcome.exit_code(),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!(
            "session {} finished: {} ({} recipes) -> {}",
            output.session.session_id,
            outcome.as_str(),
            output.session.selected_recipes.len(),
            output.report_path.display()
        );
    }

    Ok(outcome.exit_code())
}

/// `odavl ci verify`
pub async fn ci_verify_command(args: CiArgs, json: bool, config_path: Option<PathBuf>) -> i32 {
    let config = match load_config(config_path.as_ref()).and_then(|config| {
        config.validate()?;
        Ok(config)
    }) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration invalid: {e}");
            return 3;
        }
    };

    if let Some(policy_path) = &config.policy_path {
        if let Err(e) = PolicyConfig::from_yaml_file(policy_path) {
            eprintln!("policy invalid: {e}");
            return 3;
        }
    }

    let state = match &config.state_dir {
        Some(dir) => StateDir::at(dir.clone()),
        None => StateDir::for_workspace(&args.path),
    };
    let store = BaselineStore::new(state.baselines_dir());
    let baseline_ok = store.exists(&config.analysis.baseline);

    if json {
        println!(
            "{}",
            json!({
                "config_valid": true,
                "baseline_present": baseline_ok,
                "baseline": config.analysis.baseline,
            })
        );
    } else if baseline_ok {
        println!("CI configuration valid; baseline '{}' present", config.analysis.baseline);
    } else {
        eprintln!(
            "baseline '{}' missing; run analyze once to bootstrap it",
            config.analysis.baseline
        );
    }

    if baseline_ok {
        0
    } else {
        1
    }
}

/// `odavl ci doctor`
pub async fn ci_doctor_command(args: CiArgs, json: bool, config_path: Option<PathBuf>) -> i32 {
    let config = match load_config(config_path.as_ref()).and_then(|config| {
        config.validate()?;
        Ok(config)
    }) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration invalid: {e}");
            return 3;
        }
    };

    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();
    let mut notes: Vec<String> = Vec::new();

    let state = match &config.state_dir {
        Some(dir) => StateDir::at(dir.clone()),
        None => StateDir::for_workspace(&args.path),
    };
    if let Err(e) = state.ensure() {
        errors.push(format!("state directory not writable: {e}"));
    }

    let registry = DetectorRegistry::with_bundled();
    if let Err(e) = registry.resolve(&config.analysis.detectors) {
        errors.push(format!("detector configuration: {e}"));
    }

    if let Some(policy_path) = &config.policy_path {
        if let Err(e) = PolicyConfig::from_yaml_file(policy_path) {
            errors.push(format!("policy file: {e}"));
        }
    }

    let store = BaselineStore::new(state.baselines_dir());
    if !store.exists(&config.analysis.baseline) {
        warnings.push(format!(
            "baseline '{}' missing; first PR run will auto-create it",
            config.analysis.baseline
        ));
    }

    if detect_ci() {
        notes.push("CI environment detected".to_string());
    } else {
        notes.push("no CI environment detected".to_string());
    }
    match insight_version_from_env() {
        Some(version) => notes.push(format!("INSIGHT_VERSION={version}")),
        None => notes.push("INSIGHT_VERSION not set".to_string()),
    }

    let exit_code = if !errors.is_empty() {
        1
    } else if !warnings.is_empty() {
        2
    } else {
        0
    };

    if json {
        println!(
            "{}",
            json!({
                "errors": errors,
                "warnings": warnings,
                "notes": notes,
                "exit_code": exit_code,
            })
        );
    } else {
        for error in &errors {
            eprintln!("error: {error}");
        }
        for warning in &warnings {
            eprintln!("warning: {warning}");
        }
        for note in &notes {
            println!("{note}");
        }
        if exit_code == 0 {
            println!("environment healthy");
        }
    }

    exit_code
}
