use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use nppes_pubmatch::config::PipelineConfig;
use nppes_pubmatch::logging::init_logging;
use nppes_pubmatch::pipeline::{self, plan_enrichment, EnrichmentPlan, PipelineState};
use nppes_pubmatch::prelude::*;
use tracing::warn;

#[derive(Parser)]
#[command(name = "pubmatch", version)]
#[command(about = "Enrich NPPES provider extracts with NUCC taxonomy data and count each doctor's PubMed publications", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Configuration file (TOML); defaults to the platform config directory
    #[arg(short, long, global = true, env = "PUBMATCH_CONFIG")]
    config: Option<PathBuf>,
    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Disable progress bars
    #[arg(long, global = true)]
    no_progress: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Enrich if needed, then match publications
    Run(RunArgs),
    /// Build the enriched table from the provider extract and taxonomy table
    Enrich(EnrichArgs),
    /// Match publications for every doctor in the enriched table
    Match(MatchArgs),
    /// Show the recorded pipeline state
    Status(StatusArgs),
    /// Write a configuration file with the default settings
    InitConfig(InitConfigArgs),
}

#[derive(Args)]
struct PathArgs {
    /// Enriched table written by `enrich` and read by `match`
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Pipeline state file
    #[arg(long)]
    state_file: Option<PathBuf>,
}

#[derive(Args)]
struct EnrichOptions {
    /// NPPES provider extract (npidata_pfile_*.csv)
    #[arg(long)]
    provider_extract: Option<PathBuf>,
    /// NUCC taxonomy table (nucc_taxonomy_*.csv)
    #[arg(long)]
    taxonomy: Option<PathBuf>,
    /// Read at most this many provider rows
    #[arg(long)]
    read_limit: Option<usize>,
    /// Write at most this many enriched rows
    #[arg(long)]
    output_limit: Option<usize>,
    /// Skip unparseable provider rows instead of failing
    #[arg(long)]
    skip_invalid: bool,
}

#[derive(Args)]
struct MatchOptions {
    /// Author scores must exceed this (0-100)
    #[arg(long)]
    threshold: Option<f64>,
    /// Added when the practice city appears in the affiliations
    #[arg(long)]
    city_bonus: Option<f64>,
    /// Maximum identifiers requested per search
    #[arg(long)]
    max_results: Option<usize>,
    /// Doctors processed at once
    #[arg(long)]
    concurrency: Option<usize>,
    /// Also save match results to this file
    #[arg(long)]
    results: Option<PathBuf>,
    /// Format for printed and saved results
    #[arg(long, value_enum)]
    format: Option<FormatOpt>,
    /// Contact email sent with E-utilities requests
    #[arg(long, env = "PUBMATCH_EMAIL")]
    email: Option<String>,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    paths: PathArgs,
    #[command(flatten)]
    enrich: EnrichOptions,
    #[command(flatten)]
    matching: MatchOptions,
    /// Rebuild the enriched table even if it is current
    #[arg(long)]
    force_enrich: bool,
}

#[derive(Args)]
struct EnrichArgs {
    #[command(flatten)]
    paths: PathArgs,
    #[command(flatten)]
    enrich: EnrichOptions,
}

#[derive(Args)]
struct MatchArgs {
    #[command(flatten)]
    paths: PathArgs,
    #[command(flatten)]
    matching: MatchOptions,
}

#[derive(Args)]
struct StatusArgs {
    #[command(flatten)]
    paths: PathArgs,
    #[command(flatten)]
    enrich: EnrichOptions,
}

#[derive(Args)]
struct InitConfigArgs {
    /// Destination; defaults to the platform config directory
    path: Option<PathBuf>,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum FormatOpt {
    Json,
    JsonLines,
    Csv,
}

impl From<FormatOpt> for ExportFormat {
    fn from(opt: FormatOpt) -> Self {
        match opt {
            FormatOpt::Json => ExportFormat::Json,
            FormatOpt::JsonLines => ExportFormat::JsonLines,
            FormatOpt::Csv => ExportFormat::Csv,
        }
    }
}

impl PathArgs {
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(output) = &self.output {
            config.paths.enriched_output = output.clone();
        }
        if let Some(state_file) = &self.state_file {
            config.paths.state_file = state_file.clone();
        }
    }
}

impl EnrichOptions {
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(path) = &self.provider_extract {
            config.paths.provider_extract = Some(path.clone());
        }
        if let Some(path) = &self.taxonomy {
            config.paths.taxonomy = Some(path.clone());
        }
        if self.read_limit.is_some() {
            config.enrichment.read_limit = self.read_limit;
        }
        if self.output_limit.is_some() {
            config.enrichment.output_limit = self.output_limit;
        }
        if self.skip_invalid {
            config.enrichment.skip_invalid_records = true;
        }
    }
}

impl MatchOptions {
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(threshold) = self.threshold {
            config.matcher.threshold = threshold;
        }
        if let Some(bonus) = self.city_bonus {
            config.matcher.city_bonus = bonus;
        }
        if let Some(max_results) = self.max_results {
            config.matcher.max_results = max_results;
        }
        if let Some(concurrency) = self.concurrency {
            config.matcher.concurrency = concurrency;
        }
        if let Some(results) = &self.results {
            config.paths.match_results = Some(results.clone());
        }
        if let Some(format) = self.format {
            config.output.format = format.into();
        }
        if let Some(email) = &self.email {
            config.matcher.email = Some(email.clone());
        }
    }
}

fn friendly(err: PubMatchError) -> anyhow::Error {
    anyhow::anyhow!(err.user_message())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Commands::InitConfig(args) = &cli.command {
        return cmd_init_config(args);
    }

    let mut config = PipelineConfig::load(cli.config.as_deref()).map_err(friendly)?;
    if cli.no_progress {
        config.output.progress = false;
    }

    match &cli.command {
        Commands::Run(args) => {
            args.paths.apply(&mut config);
            args.enrich.apply(&mut config);
            args.matching.apply(&mut config);
            config.validate().map_err(friendly)?;
            cmd_run(&config, args.force_enrich).await
        }
        Commands::Enrich(args) => {
            args.paths.apply(&mut config);
            args.enrich.apply(&mut config);
            cmd_enrich(&config)
        }
        Commands::Match(args) => {
            args.paths.apply(&mut config);
            args.matching.apply(&mut config);
            config.validate().map_err(friendly)?;
            cmd_match(&config).await
        }
        Commands::Status(args) => {
            args.paths.apply(&mut config);
            args.enrich.apply(&mut config);
            cmd_status(&config)
        }
        Commands::InitConfig(_) => Ok(()),
    }
}

/// Flag set by Ctrl-C; the batch stops starting new doctors once it is set
fn cancellation_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handle = Arc::clone(&flag);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing doctors in flight");
            handle.store(true, Ordering::SeqCst);
        }
    });
    flag
}

fn print_results(config: &PipelineConfig, outcome: &BatchOutcome) -> anyhow::Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    exporter_for(config.output.format, config.output.pretty)
        .write_to(&outcome.results, &mut out)
        .map_err(friendly)?;
    out.flush()?;
    Ok(())
}

async fn cmd_run(config: &PipelineConfig, force_enrich: bool) -> anyhow::Result<()> {
    let client = EntrezClient::from_config(&config.matcher).map_err(friendly)?;
    let outcome = pipeline::run(config, client, force_enrich, cancellation_flag())
        .await
        .map_err(friendly)?;
    print_results(config, &outcome)?;
    if outcome.interrupted {
        std::process::exit(130);
    }
    Ok(())
}

fn cmd_enrich(config: &PipelineConfig) -> anyhow::Result<()> {
    let summary = pipeline::enrich_stage(config).map_err(friendly)?;
    println!("Rows read:            {}", summary.rows_read);
    if summary.invalid_rows > 0 {
        println!("Invalid rows skipped: {}", summary.invalid_rows);
    }
    println!("Individuals:          {}", summary.individuals);
    println!("Others dropped:       {}", summary.non_individuals_dropped);
    println!("Rows written:         {}", summary.rows_written);
    for slot in &summary.slots {
        println!(
            "Taxonomy slot {}:      {} matched, {} unmatched, {} empty",
            slot.slot, slot.matched, slot.unmatched, slot.empty
        );
    }
    println!("Output:               {}", summary.output.display());
    Ok(())
}

async fn cmd_match(config: &PipelineConfig) -> anyhow::Result<()> {
    let client = EntrezClient::from_config(&config.matcher).map_err(friendly)?;
    let outcome = pipeline::match_stage(config, client, cancellation_flag())
        .await
        .map_err(friendly)?;
    print_results(config, &outcome)?;
    if outcome.interrupted {
        std::process::exit(130);
    }
    Ok(())
}

fn cmd_status(config: &PipelineConfig) -> anyhow::Result<()> {
    match PipelineState::load(&config.paths.state_file).map_err(friendly)? {
        Some(state) => {
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        None => println!("No pipeline state recorded at {}", config.paths.state_file.display()),
    }

    match plan_enrichment(config, false).map_err(friendly)? {
        EnrichmentPlan::Enrich { reason } => println!("Next run enriches: {}", reason),
        EnrichmentPlan::Reuse(_) => println!("Next run reuses {}", config.paths.enriched_output.display()),
        EnrichmentPlan::UseExisting => println!(
            "Next run uses {} without a state record",
            config.paths.enriched_output.display()
        ),
    }
    Ok(())
}

fn cmd_init_config(args: &InitConfigArgs) -> anyhow::Result<()> {
    let path = match &args.path {
        Some(path) => path.clone(),
        None => PipelineConfig::default_config_path()
            .context("could not determine a configuration directory; pass a path")?,
    };
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    PipelineConfig::default().save(&path).map_err(friendly)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}
