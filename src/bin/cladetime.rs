use std::process::ExitCode;

use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;

use cladetime::as_of::{AsOf, SystemClock};
use cladetime::cladetime::CladeTime;
use cladetime::clades::{self, CladeListOptions};
use cladetime::config::{Config, ConfigLoader};
use cladetime::error::CladeTimeError;
use cladetime::ncbi::NcbiHttpClient;
use cladetime::output::{
    CladeListResult, InfoResult, JsonOutput, OutputMode, ResolveResult, TextOutput, TextProgress,
};
use cladetime::pipeline::{AssignRequest, Pipeline, RUN_TIME_FORMAT};
use cladetime::s3::{self, S3Client};
use cladetime::session::HttpSession;
use cladetime::store::Store;
use cladetime::telemetry::{self, LogConfig, LogFormat};
use cladetime::tools::SystemTools;

#[derive(Parser)]
#[command(name = "cladetime")]
#[command(about = "Work with Nextstrain SARS-CoV-2 sequence data and clade assignments as of a point in time")]
#[command(version, author)]
struct Cli {
    /// Path to a cladetime.json config file.
    #[arg(long, global = true)]
    config: Option<String>,

    /// Print results as JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Auto)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Assign GenBank sequences to clades and merge them with sequence metadata")]
    Assign(AssignArgs),
    #[command(about = "List the clades to model from Nextstrain genome metadata")]
    Clades(CladesArgs),
    #[command(about = "Resolve the version of an object as of a point in time")]
    Resolve(ResolveArgs),
    #[command(about = "Show the data URLs for a pair of as-of dates")]
    Info(InfoArgs),
}

#[derive(Args)]
struct AssignArgs {
    /// Include sequences released on or after this date (YYYY-MM-DD).
    #[arg(long, value_parser = parse_date)]
    sequence_released_since_date: NaiveDate,

    /// Reference tree date used for clade assignments (YYYY-MM-DD).
    #[arg(long, value_parser = parse_date)]
    reference_tree_date: NaiveDate,

    /// Directory for downloads and the assignment file. Default: ~/covid_variant/<run time>
    #[arg(long)]
    data_dir: Option<String>,
}

#[derive(Args)]
struct CladesArgs {
    /// Use genome metadata as of this date (YYYY-MM-DD). Default: latest.
    #[arg(long, value_parser = parse_date)]
    as_of: Option<NaiveDate>,

    #[arg(long)]
    data_dir: Option<String>,

    /// Reuse an already downloaded metadata file.
    #[arg(long)]
    use_existing: bool,

    #[arg(long, default_value_t = 0.01)]
    threshold: f64,

    #[arg(long, default_value_t = 3)]
    threshold_weeks: u32,

    #[arg(long, default_value_t = 9)]
    max_clades: usize,
}

#[derive(Args)]
struct ResolveArgs {
    /// Object key, e.g. files/ncov/open/metadata.tsv.zst
    key: String,

    /// YYYY-MM-DD or an RFC 3339 timestamp. Default: now.
    #[arg(long)]
    as_of: Option<AsOf>,

    /// Bucket to query. Default: the configured Nextstrain bucket.
    #[arg(long)]
    bucket: Option<String>,
}

#[derive(Args)]
struct InfoArgs {
    #[arg(long)]
    sequence_as_of: Option<AsOf>,

    #[arg(long)]
    tree_as_of: Option<AsOf>,

    /// Also fetch the ncov pipeline metadata document.
    #[arg(long)]
    ncov_metadata: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<CladeTimeError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &CladeTimeError) -> u8 {
    match error {
        CladeTimeError::InvalidDate(_)
        | CladeTimeError::InvalidUrl(_)
        | CladeTimeError::InvalidParameter(_)
        | CladeTimeError::ConfigRead(_)
        | CladeTimeError::ConfigParse(_) => 2,
        CladeTimeError::VersionNotFound { .. }
        | CladeTimeError::TransportFailure { .. }
        | CladeTimeError::Http(_)
        | CladeTimeError::ToolInvocation { .. }
        | CladeTimeError::MissingTool(_) => 3,
        CladeTimeError::DataIntegrity(_) => 4,
        _ => 1,
    }
}

fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|err| format!("{value}: {err} (expected YYYY-MM-DD)"))
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    telemetry::init(&LogConfig {
        format: cli.log_format,
        ..LogConfig::default()
    });

    let output_mode = if cli.json {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Assign(args) => run_assign(args, config, output_mode),
        Commands::Clades(args) => run_clades(args, config, output_mode),
        Commands::Resolve(args) => run_resolve(args, config, output_mode),
        Commands::Info(args) => run_info(args, config, output_mode),
    }
}

fn run_assign(args: AssignArgs, config: Config, output_mode: OutputMode) -> miette::Result<()> {
    let ncbi = NcbiHttpClient::new(&config.ncbi, &config.http)?;
    let pipeline = Pipeline::new(config, ncbi, SystemTools::new());
    let request = AssignRequest {
        sequence_released_since: args.sequence_released_since_date,
        reference_tree_date: args.reference_tree_date,
        data_dir: args.data_dir,
        run_time: Local::now().naive_local(),
    };

    match output_mode {
        OutputMode::NonInteractive => {
            let result = pipeline.assign(&request, &JsonOutput)?;
            JsonOutput::print_assign(&result).into_diagnostic()
        }
        OutputMode::Interactive => {
            let result = pipeline.assign(&request, &TextProgress)?;
            TextOutput::print_assign(&result).into_diagnostic()
        }
    }
}

fn run_clades(args: CladesArgs, config: Config, output_mode: OutputMode) -> miette::Result<()> {
    let Some(key) = config.nextstrain.genome_metadata_key.clone() else {
        return Err(CladeTimeError::InvalidUrl("no genome metadata key configured".to_string()).into());
    };
    let data_dir = match args.data_dir {
        Some(dir) => dir.into(),
        None => {
            let run_time = Local::now().format(RUN_TIME_FORMAT).to_string();
            Store::new(None, &run_time)?.root().as_std_path().to_path_buf()
        }
    };
    let http = HttpSession::new(&config.http)?;
    let lister = S3Client::new(&config.nextstrain)?;

    let mut options = CladeListOptions::new(data_dir);
    options.as_of = args.as_of;
    options.use_existing = args.use_existing;
    options.threshold = args.threshold;
    options.threshold_weeks = args.threshold_weeks;
    options.max_clades = args.max_clades;

    let clades = clades::get_clade_list(&http, &lister, &config.nextstrain.bucket, &key, &options)?;
    let result = CladeListResult {
        as_of: args.as_of.map(|date| date.to_string()),
        clades,
    };
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_clades(&result).into_diagnostic(),
        OutputMode::Interactive => TextOutput::print_clades(&result).into_diagnostic(),
    }
}

fn run_resolve(args: ResolveArgs, config: Config, output_mode: OutputMode) -> miette::Result<()> {
    let as_of = match args.as_of {
        Some(as_of) => as_of.to_utc()?,
        None => chrono::Utc::now(),
    };
    let lister = S3Client::new(&config.nextstrain)?;
    let bucket = args.bucket.unwrap_or(config.nextstrain.bucket);
    let resolved = s3::resolve_object(&lister, &bucket, &args.key, &as_of)?;
    let result = ResolveResult {
        bucket,
        as_of: as_of.to_rfc3339(),
        version: resolved.version,
        url: resolved.url,
    };
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_resolve(&result).into_diagnostic(),
        OutputMode::Interactive => TextOutput::print_resolve(&result).into_diagnostic(),
    }
}

fn run_info(args: InfoArgs, config: Config, output_mode: OutputMode) -> miette::Result<()> {
    let http = HttpSession::new(&config.http)?;
    let lister = S3Client::new(&config.nextstrain)?;
    let clade_time = CladeTime::with_parts(
        config,
        http,
        &lister,
        &SystemClock,
        args.sequence_as_of.as_ref(),
        args.tree_as_of.as_ref(),
    )?;
    let ncov_metadata = if args.ncov_metadata {
        clade_time.fetch_ncov_metadata()
    } else {
        serde_json::Value::Null
    };
    let result = InfoResult {
        clade_time: clade_time.summary(),
        ncov_metadata,
        tools: SystemTools::new().tool_info(),
    };
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_info(&result).into_diagnostic(),
        OutputMode::Interactive => TextOutput::print_info(&clade_time.to_string(), &result).into_diagnostic(),
    }
}
