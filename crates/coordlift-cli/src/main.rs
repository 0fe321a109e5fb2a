//! coordlift - coordination classification and restructuring CLI
//!
//! ## Commands
//!
//! - `analyze`: classify every effect of one or more operation specs
//! - `decompose`: print the lifting fraction and the two partitions
//! - `restructure`: plan towards a target lifting fraction and emit the
//!   protocol descriptor
//! - `catalog`: list the restructuring catalog
//!
//! Exit codes: 0 on success or an achieved plan, 1 on parse, config or I/O
//! errors, 2 when a plan is partial or infeasible.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{debug, Level};

use coordlift_core::{
    Analysis, CostVector, Engine, EngineConfig, FaultModel, PlanResult, ProtocolDescriptor,
    Restructuring, StopReason, METRICS,
};

#[derive(Parser)]
#[command(name = "coordlift")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(
    about = "Classify distributed operations into merge-routed and consensus-routed effects",
    long_about = None
)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// TOML configuration file
    #[arg(long, global = true, env = "COORDLIFT_CONFIG")]
    config: Option<PathBuf>,

    /// Fault model: crash or byzantine
    #[arg(long, global = true)]
    fault_model: Option<String>,

    /// Number of replicas
    #[arg(long, global = true)]
    replicas: Option<usize>,

    /// Report format on stdout
    #[arg(long, global = true, value_enum, default_value_t = Format::Text)]
    format: Format,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and classify; print per-effect verdicts
    Analyze {
        /// Operation spec files (JSON, YAML or TOML)
        #[arg(required = true)]
        specs: Vec<PathBuf>,
    },

    /// Classify and decompose; print the lifting fraction and partitions
    Decompose {
        #[arg(required = true)]
        specs: Vec<PathBuf>,
    },

    /// Plan a restructuring and emit the protocol descriptor
    Restructure {
        spec: PathBuf,

        /// Target lifting fraction in [0, 1]
        #[arg(long = "target-l", visible_alias = "target-L")]
        target_l: f64,

        /// Cost budget: `unlimited`, a number, or `dim=value,...`
        #[arg(long, default_value = "unlimited")]
        budget: String,

        /// Maximum number of transformation steps
        #[arg(long, default_value = "16")]
        max_steps: usize,

        /// Write the descriptor as JSON to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the restructuring catalog
    Catalog,
}

fn build_engine(cli: &Cli) -> Result<Engine> {
    let mut config = EngineConfig::load(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(model) = &cli.fault_model {
        config.fault_model = model.parse::<FaultModel>()?;
    }
    if let Some(n) = cli.replicas {
        config.replicas = n;
    }
    Ok(Engine::new(config)?)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Analyse every file; the first failure is reported after the others.
async fn analyze_all(engine: &Engine, specs: &[PathBuf]) -> Result<Vec<Analysis>> {
    let results = engine.analyze_many(specs).await?;
    let mut analyses = Vec::with_capacity(results.len());
    let mut first_err = None;
    for (path, result) in specs.iter().zip(results) {
        match result {
            Ok(a) => analyses.push(a),
            Err(e) => {
                eprintln!("{}: {}", path.display(), e);
                first_err.get_or_insert(
                    anyhow::Error::new(e).context(format!("Failed to analyse {}", path.display())),
                );
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(analyses),
    }
}

async fn cmd_analyze(engine: &Engine, specs: &[PathBuf], format: Format) -> Result<ExitCode> {
    let analyses = analyze_all(engine, specs).await?;
    if format == Format::Json {
        print_json(&analyses)?;
        return Ok(ExitCode::SUCCESS);
    }
    for a in &analyses {
        println!("operation {} ({})", a.operation, &a.digest[..12.min(a.digest.len())]);
        for c in &a.effects {
            println!(
                "  {:<20} {:<12} {}",
                c.effect.id,
                c.verdict.label(),
                c.verdict.basis()
            );
        }
        let uncertain = a.uncertain().count();
        if uncertain > 0 {
            println!("  {} effect(s) left unclassified, routed to consensus", uncertain);
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[derive(Serialize)]
struct DecompositionReport<'a> {
    operation: &'a str,
    lifting_fraction: f64,
    existential_part: Vec<&'a str>,
    universal_part: Vec<&'a str>,
}

async fn cmd_decompose(engine: &Engine, specs: &[PathBuf], format: Format) -> Result<ExitCode> {
    let analyses = analyze_all(engine, specs).await?;
    let decompositions: Vec<_> = analyses.iter().map(|a| a.decomposition()).collect();
    let reports: Vec<DecompositionReport<'_>> = analyses
        .iter()
        .zip(&decompositions)
        .map(|(a, d)| DecompositionReport {
            operation: &a.operation,
            lifting_fraction: d.lifting_fraction(),
            existential_part: d.existential_part().iter().map(|c| c.effect.id.as_str()).collect(),
            universal_part: d.universal_part().iter().map(|c| c.effect.id.as_str()).collect(),
        })
        .collect();

    if format == Format::Json {
        print_json(&reports)?;
        return Ok(ExitCode::SUCCESS);
    }
    for r in &reports {
        println!("operation {}: L = {:.3}", r.operation, r.lifting_fraction);
        println!("  existential: {}", r.existential_part.join(", "));
        println!("  universal:   {}", r.universal_part.join(", "));
    }
    Ok(ExitCode::SUCCESS)
}

fn write_descriptor(path: &Path, descriptor: &ProtocolDescriptor) -> Result<()> {
    let json = serde_json::to_string_pretty(descriptor)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write descriptor to {}", path.display()))?;
    debug!(path = %path.display(), "descriptor written");
    Ok(())
}

fn print_restructuring(out: &Restructuring) {
    let plan = out.result.plan();
    println!(
        "outcome: {} (L {:.3} -> {:.3})",
        out.result.label(),
        plan.initial_lifting_fraction,
        plan.lifting_fraction()
    );
    for (i, step) in plan.steps.iter().enumerate() {
        println!(
            "  {}. {:<20} on {:<20} L {:.3} -> {:.3}",
            i + 1,
            step.transform,
            step.target,
            step.lifting_before,
            step.lifting_after
        );
    }
    println!("cost: {}", plan.cost);
    match &out.result {
        PlanResult::Partial {
            stop, remaining, ..
        } => {
            let why = match stop {
                StopReason::MaxSteps => "step limit reached",
                StopReason::IterationLimit => "iteration budget exhausted",
                StopReason::Deadline => "deadline reached",
                StopReason::NoAffordableStep => "no affordable step left",
            };
            println!("stopped: {} (budget left: {})", why, remaining);
        }
        PlanResult::Infeasible { blocked, .. } => {
            for b in blocked {
                println!("  blocked {:<20} {}", b.transform, b.reason);
            }
        }
        PlanResult::Achieved { .. } => {}
    }
    println!("descriptor:");
    for e in &out.descriptor.effects {
        let detail = match (&e.merge_hint, &e.agreement) {
            (Some(h), _) => h.to_string(),
            (None, Some(a)) => a.to_string(),
            (None, None) => String::new(),
        };
        println!("  {:<20} {:<10} {}", e.effect_ref, e.mode, detail);
    }
}

fn cmd_restructure(
    engine: &Engine,
    spec: &Path,
    target_l: f64,
    budget: &str,
    max_steps: usize,
    output: Option<&Path>,
    format: Format,
) -> Result<ExitCode> {
    let budget = CostVector::parse(budget)?;
    let op = engine
        .load(spec)
        .with_context(|| format!("Failed to load {}", spec.display()))?;
    let out = engine.restructure(&op, target_l, &budget, max_steps)?;

    if let Some(path) = output {
        write_descriptor(path, &out.descriptor)?;
    }
    match format {
        Format::Json => print_json(&out)?,
        Format::Text => print_restructuring(&out),
    }
    Ok(if out.result.is_achieved() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

fn cmd_catalog(format: Format) -> Result<ExitCode> {
    let infos: Vec<_> = coordlift_core::catalog().iter().map(|t| t.info()).collect();
    if format == Format::Json {
        print_json(&infos)?;
        return Ok(ExitCode::SUCCESS);
    }
    for t in &infos {
        println!("{:<20} dL={:<5} cost {:<28} {}", t.id, t.delta_l, t.cost, t.summary);
    }
    Ok(ExitCode::SUCCESS)
}

async fn run(cli: Cli) -> Result<ExitCode> {
    if let Commands::Catalog = cli.command {
        return cmd_catalog(cli.format);
    }
    let engine = build_engine(&cli)?;
    let code = match &cli.command {
        Commands::Analyze { specs } => cmd_analyze(&engine, specs, cli.format).await?,
        Commands::Decompose { specs } => cmd_decompose(&engine, specs, cli.format).await?,
        Commands::Restructure {
            spec,
            target_l,
            budget,
            max_steps,
            output,
        } => cmd_restructure(
            &engine,
            spec,
            *target_l,
            budget,
            *max_steps,
            output.as_deref(),
            cli.format,
        )?,
        Commands::Catalog => cmd_catalog(cli.format)?,
    };
    METRICS.flush();
    Ok(code)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let usage_error = e.use_stderr();
            let _ = e.print();
            return if usage_error {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    coordlift_core::init_tracing(cli.json, level);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(1)
        }
    }
}
