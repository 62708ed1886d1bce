//! ODAVL CLI - delta-first analysis and autonomous code repair.

use clap::Parser;

mod cli;

use cli::{AutopilotCommands, CiCommands, Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let exit_code = match cli.command {
        Commands::Analyze(args) => cli::analyze_command(args, cli.json, cli.config).await,
        Commands::Autopilot(AutopilotCommands::Run(args)) => {
            cli::autopilot_run_command(args, cli.json, cli.config).await
        }
        Commands::Ci(CiCommands::Verify(args)) => {
            cli::ci_verify_command(args, cli.json, cli.config).await
        }
        Commands::Ci(CiCommands::Doctor(args)) => {
            cli::ci_doctor_command(args, cli.json, cli.config).await
        }
    };

    std::process::exit(exit_code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_cli_parsing_analyze_default() {
        let cli = Cli::parse_from(["odavl", "analyze"]);
        assert!(!cli.verbose);
        assert!(!cli.json);

        match cli.command {
            Commands::Analyze(args) => {
                assert_eq!(args.path, PathBuf::from("."));
                assert!(!args.changed_only);
                assert!(!args.ci);
                assert!(args.detectors.is_none());
                assert!(args.baseline.is_none());
            }
            _ => panic!("Expected Analyze command"),
        }
    }

    #[test]
    fn test_cli_parsing_analyze_with_options() {
        let cli = Cli::parse_from([
            "odavl",
            "analyze",
            "--changed-only",
            "--ci",
            "--detectors",
            "secret-scan,debug-logging",
            "--baseline",
            "release",
            "src/",
        ]);

        match cli.command {
            Commands::Analyze(args) => {
                assert_eq!(args.path, PathBuf::from("src/"));
                assert!(args.changed_only);
                assert!(args.ci);
                assert_eq!(
                    args.detectors,
                    Some(vec!["secret-scan".to_string(), "debug-logging".to_string()])
                );
                assert_eq!(args.baseline.as_deref(), Some("release"));
            }
            _ => panic!("Expected Analyze command"),
        }
    }

    #[test]
    fn test_cli_parsing_autopilot_run() {
        let cli = Cli::parse_from([
            "odavl",
            "autopilot",
            "run",
            "--max-files",
            "5",
            "--max-loc",
            "20",
            "--dry-run",
            "--non-interactive",
        ]);

        match cli.command {
            Commands::Autopilot(AutopilotCommands::Run(args)) => {
                assert_eq!(args.max_files, Some(5));
                assert_eq!(args.max_loc, Some(20));
                assert!(args.dry_run);
                assert!(args.non_interactive);
            }
            _ => panic!("Expected Autopilot Run command"),
        }
    }

    #[test]
    fn test_cli_parsing_ci_commands() {
        let cli = Cli::parse_from(["odavl", "ci", "verify"]);
        assert!(matches!(cli.command, Commands::Ci(CiCommands::Verify(_))));

        let cli = Cli::parse_from(["odavl", "ci", "doctor"]);
        assert!(matches!(cli.command, Commands::Ci(CiCommands::Doctor(_))));
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::parse_from(["odavl", "--verbose", "--json", "analyze"]);
        assert!(cli.verbose);
        assert!(cli.json);
    }
}
