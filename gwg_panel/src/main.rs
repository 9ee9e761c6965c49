use clap::{CommandFactory, Parser, Subcommand};
use gwg_panel::simulate::{write_wide_csv, SIMULATED_VARIABLES};
use gwg_panel::{
    correlation_matrix, simulate, LagPolicy, LagSpec, Manifest, PanelBuilder, SimulationConfig,
    SortOrder, SourceSpec,
};
use std::error::Error;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    build_args: BuildArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a gap-filled panel from wide-format sources
    Build(BuildArgs),
    /// Write synthetic wide-format CSV sources
    Simulate(SimulateArgs),
}

#[derive(Parser, Debug)]
struct BuildArgs {
    /// A source as NAME=PATH; repeat in merge order
    #[arg(short, long = "source")]
    sources: Vec<String>,

    /// JSON manifest listing sources and options (overrides --source; other flags override it)
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Row order of the panel [choices: time-entity, entity-time] [default: time-entity, or the manifest's]
    #[arg(long)]
    sort: Option<String>,

    /// Variable to derive a per-entity lag from
    #[arg(long)]
    lag: Option<String>,

    /// How many periods to lag by
    #[arg(long, default_value_t = 1)]
    lag_periods: usize,

    /// Name of the lag column (defaults to <VAR>_LAG<N>)
    #[arg(long)]
    lag_name: Option<String>,

    /// Leading-gap handling for the lag column [choices: fill, leave-missing]
    #[arg(long, default_value = "fill")]
    lag_policy: String,

    /// A comma-separated list of variables to replace with z-scores
    #[arg(long, value_delimiter = ',')]
    standardize: Option<Vec<String>>,

    /// Print the correlation matrix of the filled panel
    #[arg(long)]
    correlate: bool,

    /// Number of rows to preview
    #[arg(long, default_value_t = 10)]
    preview: usize,

    /// Path to export the filled panel as CSV
    #[arg(long)]
    output_csv: Option<PathBuf>,

    /// Path to export the run summary as JSON
    #[arg(long)]
    output_json: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct SimulateArgs {
    /// Directory to write one CSV per variable into
    #[arg(short, long)]
    out_dir: PathBuf,

    /// Number of simulated countries
    #[arg(long, default_value_t = 20)]
    entities: usize,

    #[arg(long, default_value_t = 2000)]
    start_year: i32,

    #[arg(long, default_value_t = 2024)]
    end_year: i32,

    /// RNG seed
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Probability of leaving a cell blank
    #[arg(long, default_value_t = 0.0)]
    missing_rate: f64,
}

fn parse_sort(value: &str) -> Result<SortOrder, Box<dyn Error>> {
    match value {
        "time-entity" => Ok(SortOrder::TimeEntity),
        "entity-time" => Ok(SortOrder::EntityTime),
        _ => Err(format!("Invalid sort order: {}", value).into()),
    }
}

fn parse_lag_policy(value: &str) -> Result<LagPolicy, Box<dyn Error>> {
    match value {
        "fill" => Ok(LagPolicy::Fill),
        "leave-missing" => Ok(LagPolicy::LeaveMissing),
        _ => Err(format!("Invalid lag policy: {}", value).into()),
    }
}

fn run_build(args: BuildArgs) -> Result<(), Box<dyn Error>> {
    let (mut builder, mut output_csv, mut output_json) = if let Some(path) = &args.manifest {
        let manifest = Manifest::from_path(path)?;
        info!(path = %path.display(), sources = manifest.sources.len(), "loaded manifest");
        (
            PanelBuilder::from_manifest(&manifest),
            manifest.output_csv,
            manifest.output_json,
        )
    } else {
        if args.sources.is_empty() {
            return Err("No sources given; pass --source NAME=PATH or --manifest FILE".into());
        }
        let sources = args
            .sources
            .iter()
            .map(|s| SourceSpec::parse_pair(s))
            .collect::<Result<Vec<_>, _>>()?;
        (PanelBuilder::new(sources), None, None)
    };

    if let Some(sort) = &args.sort {
        builder.sort_order(parse_sort(sort)?);
    }
    if let Some(source) = &args.lag {
        let mut spec = LagSpec::new(source)
            .periods(args.lag_periods)
            .policy(parse_lag_policy(&args.lag_policy)?);
        if let Some(name) = &args.lag_name {
            spec = spec.name(name);
        }
        builder.lag(spec);
    }
    if let Some(vars) = &args.standardize {
        builder.standardize(vars);
    }
    if args.output_csv.is_some() {
        output_csv = args.output_csv;
    }
    if args.output_json.is_some() {
        output_json = args.output_json;
    }

    let results = builder.run()?;
    results.summary();

    let filled = results.filled().panel();
    println!("\nPreview (first {} rows)", args.preview.min(filled.len()));
    println!("{}", filled.preview(args.preview));

    if args.correlate {
        let corr = correlation_matrix(filled, filled.variables())?;
        println!("\nCorrelation Matrix");
        println!("{}", corr.to_table());
    }
    if let Some(path) = output_csv {
        filled.write_csv(&path)?;
        println!("Filled panel written to: {}", path.display());
    }
    if let Some(path) = output_json {
        let json = results
            .to_json()
            .map_err(|e| format!("Failed to serialize to JSON: {}", e))?;
        std::fs::write(&path, json)?;
        println!("Summary written to: {}", path.display());
    }
    Ok(())
}

fn run_simulate(args: SimulateArgs) -> Result<(), Box<dyn Error>> {
    let config = SimulationConfig {
        entities: args.entities,
        start_year: args.start_year,
        end_year: args.end_year,
        seed: args.seed,
        missing_rate: args.missing_rate,
    };
    let tables = simulate(&config)?;
    std::fs::create_dir_all(&args.out_dir)?;

    let mut pairs = Vec::with_capacity(tables.len());
    for table in &tables {
        let path = args.out_dir.join(format!("{}.csv", table.variable));
        write_wide_csv(table, &path)?;
        pairs.push(format!("--source {}={}", table.variable, path.display()));
    }
    println!(
        "Simulated {} variables ({}) for {} countries, {}-{}",
        SIMULATED_VARIABLES.len(),
        tables
            .iter()
            .map(|t| t.variable.as_str())
            .collect::<Vec<_>>()
            .join(", "),
        config.entities,
        config.start_year,
        config.end_year
    );
    println!("Build with: gwg-panel build {}", pairs.join(" "));
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Some(Commands::Build(args)) => run_build(args),
        Some(Commands::Simulate(args)) => run_simulate(args),
        None => run_build(cli.build_args),
    };
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        let mut cmd = Cli::command();
        let _ = cmd.print_help();
        std::process::exit(1);
    }
}
