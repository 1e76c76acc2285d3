//! Command-line front end for the bytecode verifier.
//!
//! Reads one or more JSON-encoded modules, verifies each, and prints the
//! findings either as human-readable lines or as a JSON report. The process
//! exits 0 only when every module is accepted.
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use verifier_core::{VerificationOutcome, Verifier, VerifierConfig};
use verifier_types::{Diagnostic, Module, Severity};

#[derive(Debug, Copy, Clone, ValueEnum)]
enum UnreachablePolicy {
    /// Report unreachable code without rejecting the module.
    Warn,
    /// Reject modules that contain unreachable code.
    Error,
}

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// JSON module file. Can be provided multiple times.
    #[arg(value_name = "PATH", required = true)]
    modules: Vec<PathBuf>,

    /// How to treat unreachable code.
    #[arg(long, value_enum, default_value_t = UnreachablePolicy::Warn)]
    unreachable: UnreachablePolicy,

    /// Wall-clock budget per module, in milliseconds.
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Emit a JSON report instead of human-readable lines.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Serialize)]
struct ModuleReport {
    path: String,
    module: String,
    accepted: bool,
    findings: Vec<Diagnostic>,
}

fn verify_one(verifier: &Verifier, args: &Args, path: &PathBuf) -> Result<VerificationOutcome> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let module: Module =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    let outcome = match args.timeout_ms {
        Some(ms) => verifier.verify_module_with_timeout(&module, Duration::from_millis(ms)),
        None => verifier.verify_module(&module),
    };
    Ok(outcome)
}

fn run(args: &Args) -> Result<bool> {
    let config = VerifierConfig {
        unreachable_severity: match args.unreachable {
            UnreachablePolicy::Warn => Severity::Advisory,
            UnreachablePolicy::Error => Severity::Rejection,
        },
    };
    let verifier = Verifier::new(config);

    let mut reports = Vec::with_capacity(args.modules.len());
    for path in &args.modules {
        let outcome = verify_one(&verifier, args, path)?;
        reports.push(ModuleReport {
            path: path.display().to_string(),
            module: outcome.module.clone(),
            accepted: outcome.accepted(),
            findings: outcome.diagnostics,
        });
    }
    let all_accepted = reports.iter().all(|r| r.accepted);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            let verdict = if report.accepted { "accepted" } else { "rejected" };
            println!("{}: {} ({})", report.path, verdict, report.module);
            for finding in &report.findings {
                let tag = match finding.severity {
                    Severity::Advisory => "warning",
                    Severity::Rejection => "error",
                };
                println!("  {}: {}", tag, finding);
            }
        }
    }
    Ok(all_accepted)
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
