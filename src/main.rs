//! Flowgate CLI Entry Point
//!
//! Runs workflow templates against simulated step operations.
//!
//! # Usage
//!
//! ```bash
//! # Run the default template
//! flowgate
//!
//! # Run a built-in template, approving any manual gates
//! flowgate release --approve
//!
//! # Load user templates and list the registry
//! flowgate --templates my-templates.yaml --list
//!
//! # Fail the build step and roll back to a checkpoint
//! flowgate ci-pipeline --fail build --rollback-to init
//!
//! # Run every registered template in batches
//! flowgate --all --skip-approvals
//! ```

use std::env;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};

use flowgate::execution::{
    run_in_batches, CompensatedStep, Orchestrator, SimulatedOperations, DEFAULT_WINDOW,
};
use flowgate::monitoring::ExecutionTimeline;
use flowgate::workflow::{
    ExecutionContext, RunState, StepKind, StepStatus, TemplateRegistry, WorkflowRun,
    WorkflowTemplate,
};
use flowgate::{APP_NAME, VERSION};

/// Template run when none is specified.
const DEFAULT_TEMPLATE: &str = "code-review";

/// Default simulated quality score.
const DEFAULT_SCORE: f64 = 85.0;

/// What to do when a step waits for manual approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApprovalMode {
    Stop,
    Approve,
    Skip,
}

/// Command-line configuration parsed from arguments.
#[derive(Debug)]
struct Config {
    template: String,
    templates_file: Option<PathBuf>,
    list: bool,
    all: bool,
    approvals: ApprovalMode,
    score: f64,
    security_issues: u64,
    fail_tests: bool,
    fail: Vec<StepKind>,
    delay_ms: u64,
    rollback_to: Option<String>,
    json: bool,
    verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
            templates_file: None,
            list: false,
            all: false,
            approvals: ApprovalMode::Stop,
            score: DEFAULT_SCORE,
            security_issues: 0,
            fail_tests: false,
            fail: Vec::new(),
            delay_ms: 0,
            rollback_to: None,
            json: false,
            verbose: false,
        }
    }
}

/// Finished (or suspended) run with what was observed along the way.
struct RunReport {
    run: WorkflowRun,
    timeline: ExecutionTimeline,
    compensated: Vec<CompensatedStep>,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME, VERSION);
    println!("Workflow Orchestration Engine");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: flowgate [OPTIONS] [TEMPLATE]");
    println!();
    println!("Arguments:");
    println!("  [TEMPLATE]             Template to run (default: {})", DEFAULT_TEMPLATE);
    println!();
    println!("Options:");
    println!("  --templates FILE       Load user templates from a YAML file");
    println!("  --list                 List registered templates and exit");
    println!(
        "  --all                  Run every registered template ({} at a time)",
        DEFAULT_WINDOW
    );
    println!("  --approve              Approve manual approval gates");
    println!("  --skip-approvals       Skip steps gated on manual approval");
    println!("  --score N              Simulated quality score (default: {})", DEFAULT_SCORE);
    println!("  --security-issues N    Simulated security issue count (default: 0)");
    println!("  --fail-tests           Simulate a failing test suite");
    println!("  --fail STEP_KIND       Make a step kind's operation fail (repeatable)");
    println!("  --delay-ms N           Simulated latency per step");
    println!("  --rollback-to STEP     Roll back to this checkpoint if the run fails");
    println!("  --json                 Print the final run snapshot as JSON");
    println!("  --verbose              Enable debug logging");
    println!("  --help                 Show this help message");
    println!("  --version              Show version information");
    println!();
    println!("Step kinds:");
    for kind in StepKind::ALL {
        println!("  {:18} {}", kind.slug(), kind.label());
    }
    println!();
    println!("Examples:");
    println!("  flowgate release --approve");
    println!("  flowgate ci-pipeline --fail build --rollback-to init");
    println!("  flowgate --all --skip-approvals --delay-ms 50");
}

/// Returns the value following a flag.
fn flag_value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{} requires an argument", flag))
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut positional_index = 0;
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--list" => {
                config.list = true;
            }
            "--all" => {
                config.all = true;
            }
            "--approve" => {
                config.approvals = ApprovalMode::Approve;
            }
            "--skip-approvals" => {
                config.approvals = ApprovalMode::Skip;
            }
            "--fail-tests" => {
                config.fail_tests = true;
            }
            "--json" => {
                config.json = true;
            }
            "--templates" => {
                let value = flag_value(args, &mut i, arg)?;
                config.templates_file = Some(PathBuf::from(value));
            }
            "--score" => {
                let value = flag_value(args, &mut i, arg)?;
                config.score = value
                    .parse()
                    .map_err(|_| format!("Invalid score: {}", value))?;
            }
            "--security-issues" => {
                let value = flag_value(args, &mut i, arg)?;
                config.security_issues = value
                    .parse()
                    .map_err(|_| format!("Invalid issue count: {}", value))?;
            }
            "--fail" => {
                let value = flag_value(args, &mut i, arg)?;
                config.fail.push(value.parse()?);
            }
            "--delay-ms" => {
                let value = flag_value(args, &mut i, arg)?;
                config.delay_ms = value
                    .parse()
                    .map_err(|_| format!("Invalid delay: {}", value))?;
            }
            "--rollback-to" => {
                let value = flag_value(args, &mut i, arg)?;
                config.rollback_to = Some(value.to_string());
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                match positional_index {
                    0 => config.template = arg.clone(),
                    _ => return Err(format!("Unexpected argument: {}", arg)),
                }
                positional_index += 1;
            }
        }
        i += 1;
    }

    if config.all && positional_index > 0 {
        return Err("--all cannot be combined with a template name".to_string());
    }

    Ok(config)
}

/// Builds the simulated operation table from the configuration.
fn simulation(config: &Config) -> SimulatedOperations {
    let mut sim = SimulatedOperations::new()
        .with_score(config.score)
        .with_security_issues(config.security_issues)
        .with_tests_passing(!config.fail_tests)
        .with_delay(Duration::from_millis(config.delay_ms));

    for kind in &config.fail {
        sim = sim.failing(*kind);
    }
    sim
}

/// Prints the registered templates.
fn print_templates(registry: &TemplateRegistry) {
    println!("Registered templates:");
    println!();
    for template in registry.list() {
        println!(
            "  {:14} {:2} steps  ~{:4}s  rollback: {:10} {}",
            template.name,
            template.len(),
            template.estimated_duration_secs(),
            template.rollback.to_string(),
            template.description
        );
    }
}

/// Runs one template to a resting state and records its timeline.
async fn execute(
    template: Arc<WorkflowTemplate>,
    sim: &SimulatedOperations,
    config: &Config,
) -> Result<RunReport, Box<dyn Error>> {
    let mut orchestrator = Orchestrator::new(sim.table());
    let mut events = orchestrator.subscribe();

    let recorder = tokio::spawn(async move {
        let mut timeline = ExecutionTimeline::new();
        while let Some(event) = events.recv().await {
            timeline.record(&event);
        }
        timeline
    });

    let mut state = orchestrator
        .start_run(template, ExecutionContext::new())
        .await?;

    while state == RunState::AwaitingApproval {
        state = match config.approvals {
            ApprovalMode::Approve => orchestrator.approve_waiting_step().await?,
            ApprovalMode::Skip => orchestrator.skip_waiting_step().await?,
            ApprovalMode::Stop => {
                warn!(
                    "Run is waiting for approval; pass --approve or --skip-approvals to continue"
                );
                break;
            }
        };
    }

    let mut compensated = Vec::new();
    if state == RunState::Failed {
        let targets = orchestrator.rollback_targets();
        match &config.rollback_to {
            Some(target) => compensated = orchestrator.request_rollback(target).await?,
            None if !targets.is_empty() => {
                info!(
                    "Rerun with --rollback-to <STEP> to roll back to one of: {}",
                    targets.join(", ")
                );
            }
            None => {}
        }
    }

    let run = orchestrator.run().clone();
    // Closes the event stream so the recorder finishes
    drop(orchestrator);
    let timeline = recorder.await?;

    Ok(RunReport {
        run,
        timeline,
        compensated,
    })
}

/// Prints the outcome of a single run.
fn print_report(report: &RunReport) {
    let run = &report.run;

    println!();
    print!("{}", report.timeline.summary());
    print!("{}", report.timeline.gantt_chart());
    println!();

    for step in run.steps() {
        let detail = match step.status {
            StepStatus::Failed => step.error.clone().unwrap_or_default(),
            _ => step.output.clone().unwrap_or_default(),
        };
        println!("  {:18} {:12} {}", step.step_id, step.status.to_string(), detail);
    }

    if !report.compensated.is_empty() {
        println!();
        println!("Rolled back:");
        for step in &report.compensated {
            match &step.error {
                Some(e) => println!("  {} (compensation failed: {})", step.step_id, e),
                None => println!("  {}", step.step_id),
            }
        }
    }

    println!();
    println!("Workflow '{}' is {}", run.template().name, run.state());
}

/// Main application entry point.
async fn run() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(config.verbose);

    if !config.json {
        print_banner();
    }

    let registry = TemplateRegistry::with_builtins();
    if let Some(path) = &config.templates_file {
        let count = registry.import_file(path).map_err(|e| {
            error!("Failed to load templates: {}", e);
            e
        })?;
        info!("Loaded {} template(s) from {}", count, path.display());
    }

    if config.list {
        print_templates(&registry);
        return Ok(());
    }

    let sim = simulation(&config);

    if config.all {
        let templates = registry.list();
        info!("Running {} templates, {} at a time", templates.len(), DEFAULT_WINDOW);

        let results = run_in_batches(templates, DEFAULT_WINDOW, |template| {
            let name = template.name.clone();
            let sim = &sim;
            let config = &config;
            async move { (name, execute(template, sim, config).await) }
        })
        .await;

        let mut runs = Vec::new();
        let mut failures = 0;
        for (name, result) in results {
            match result {
                Ok(report) => {
                    if report.run.state() == RunState::Failed {
                        failures += 1;
                    }
                    if !config.json {
                        println!(
                            "  {:14} {:18} {} completed, {} skipped",
                            name,
                            report.run.state().to_string(),
                            report.run.count(StepStatus::Completed),
                            report.run.count(StepStatus::Skipped)
                        );
                    }
                    runs.push(report.run);
                }
                Err(e) => {
                    failures += 1;
                    error!("Template '{}' could not run: {}", name, e);
                }
            }
        }

        if config.json {
            println!("{}", serde_json::to_string_pretty(&runs)?);
        }
        if failures > 0 {
            return Err(format!("{} template run(s) failed", failures).into());
        }
        return Ok(());
    }

    let template = registry.get(&config.template)?;
    info!(
        "Template '{}': {} steps, rollback strategy '{}'",
        template.name,
        template.len(),
        template.rollback
    );

    let report = execute(template, &sim, &config).await?;

    if config.json {
        println!("{}", serde_json::to_string_pretty(&report.run)?);
    } else {
        print_report(&report);
    }

    if report.run.state() == RunState::Failed {
        return Err(format!("Workflow '{}' failed", report.run.template().name).into());
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("flowgate")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = parse_arguments(&args(&[])).unwrap();
        assert_eq!(config.template, DEFAULT_TEMPLATE);
        assert_eq!(config.approvals, ApprovalMode::Stop);
        assert_eq!(config.score, DEFAULT_SCORE);
        assert!(!config.all);
    }

    #[test]
    fn test_simulation_flags() {
        let config = parse_arguments(&args(&[
            "release",
            "--approve",
            "--score",
            "42.5",
            "--fail",
            "build",
            "--fail",
            "notify",
            "--fail-tests",
            "--rollback-to",
            "init",
        ]))
        .unwrap();

        assert_eq!(config.template, "release");
        assert_eq!(config.approvals, ApprovalMode::Approve);
        assert_eq!(config.score, 42.5);
        assert_eq!(config.fail, vec![StepKind::Build, StepKind::Notify]);
        assert_eq!(config.rollback_to.as_deref(), Some("init"));

        let sim = simulation(&config);
        assert!(!sim.tests_pass);
        assert!(sim.failing.contains(&StepKind::Build));
    }

    #[test]
    fn test_invalid_arguments() {
        assert!(parse_arguments(&args(&["--score"])).is_err());
        assert!(parse_arguments(&args(&["--score", "high"])).is_err());
        assert!(parse_arguments(&args(&["--fail", "teleport"])).is_err());
        assert!(parse_arguments(&args(&["--bogus"])).is_err());
        assert!(parse_arguments(&args(&["a", "b"])).is_err());
        assert!(parse_arguments(&args(&["--all", "release"])).is_err());
    }

    #[tokio::test]
    async fn test_execute_builtin_with_rollback() {
        let config = parse_arguments(&args(&[
            "ci-pipeline",
            "--fail",
            "notify",
            "--rollback-to",
            "init",
        ]))
        .unwrap();
        let registry = TemplateRegistry::with_builtins();
        let template = registry.get("ci-pipeline").unwrap();

        let report = execute(template, &simulation(&config), &config).await.unwrap();

        assert_eq!(report.run.state(), RunState::Failed);
        assert_eq!(report.compensated.len(), 2);
        assert_eq!(report.run.status_of("init"), Some(StepStatus::Completed));
        assert_eq!(
            report.timeline.last_event("notify").map(|e| format!("{:?}", e)),
            Some("Failed".to_string())
        );
    }
}
