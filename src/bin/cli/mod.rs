//! CLI surface for the odavl binary.

pub mod args;
pub mod commands;

pub use args::{AutopilotCommands, CiCommands, Cli, Commands};
pub use commands::{analyze_command, autopilot_run_command, ci_doctor_command, ci_verify_command};
