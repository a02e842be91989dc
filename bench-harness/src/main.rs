//! Benchmark response generation CLI

use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bench_harness::{
    cases::{requires_credentials, Corpus},
    config::{Config, ConfigSource, DEFAULT_CONFIG_PATHS},
    generate::{generate_with_progress, GenerationRequest},
    planner::Selection,
    providers::ProviderRegistry,
    reporting::print_console_report,
    runner::{ConsoleProgress, NoOpProgress, ProgressCallback},
};

#[derive(Parser)]
#[command(name = "bench-harness")]
#[command(about = "Generate model responses for function-calling benchmark cases")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate responses for the selected cases
    Generate {
        /// Model names as registered in the configuration
        #[arg(long, num_args = 1.., required = true)]
        model: Vec<String>,

        /// Categories, category groups, or `all`
        #[arg(long, num_args = 1.., default_value = "all")]
        test_category: Vec<String>,

        /// Run only the ids listed in the subset request file
        #[arg(long)]
        run_ids: bool,

        /// Number of cases in flight at once
        #[arg(long)]
        num_threads: Option<usize>,

        /// Regenerate cases that already have results
        #[arg(short = 'o', long)]
        allow_overwrite: bool,

        /// Directory for result files
        #[arg(long)]
        result_dir: Option<PathBuf>,

        /// Save the exact provider input next to each result
        #[arg(long)]
        include_input_log: bool,

        /// Leave environment state snapshots out of the input log
        #[arg(long)]
        exclude_state_log: bool,

        /// Seed for the catalog shuffle
        #[arg(long)]
        seed: Option<u64>,

        /// Print per-case progress
        #[arg(long)]
        progress: bool,
    },

    /// List categories and category groups
    ListCategories,

    /// Generate sample configuration
    InitConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config/harness.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let (mut config, source) = match &cli.config {
        Some(path) => (Config::from_file(path)?, ConfigSource::File(path.clone())),
        None => Config::load_first(&DEFAULT_CONFIG_PATHS)?,
    };

    match cli.command {
        Commands::Generate {
            model,
            test_category,
            run_ids,
            num_threads,
            allow_overwrite,
            result_dir,
            include_input_log,
            exclude_state_log,
            seed,
            progress,
        } => {
            if let Some(n) = num_threads {
                config.execution.num_threads = n;
            }
            if let Some(dir) = result_dir {
                config.execution.result_dir = dir;
            }
            config.execution.include_input_log |= include_input_log;
            config.execution.exclude_state_log |= exclude_state_log;

            init_logging(cli.verbose, Some(&config), &source)?;

            let selection = if run_ids {
                Selection::IdFile
            } else {
                Selection::Categories(test_category)
            };
            let request = GenerationRequest {
                models: model,
                selection,
                allow_overwrite,
                seed,
            };
            let progress: Arc<dyn ProgressCallback> = if progress {
                Arc::new(ConsoleProgress)
            } else {
                Arc::new(NoOpProgress)
            };

            let registry = ProviderRegistry::from_config(&config);
            let report = generate_with_progress(&config, &registry, &request, progress).await?;
            print_console_report(&report);

            let summary_path = config.execution.result_dir.join("generation_summary.json");
            report.write_to_file(&summary_path)?;
            println!("Summary written to: {}", summary_path.display());
        }

        Commands::ListCategories => {
            init_logging(cli.verbose, None, &source)?;
            list_categories(&config);
        }

        Commands::InitConfig { output } => {
            init_logging(cli.verbose, None, &source)?;
            init_config(output)?;
        }
    }

    Ok(())
}

/// Console logging, plus a `results.log` file in the result directory when
/// generating
fn init_logging(
    verbose: bool,
    config: Option<&Config>,
    source: &ConfigSource,
) -> Result<(), Box<dyn std::error::Error>> {
    let filter = if verbose {
        EnvFilter::new("bench_harness=debug,info")
    } else {
        EnvFilter::new("bench_harness=info,warn")
    };

    let file_layer = match config {
        Some(config) => {
            fs::create_dir_all(&config.execution.result_dir)?;
            let file = File::create(config.execution.result_dir.join("results.log"))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    tracing::info!("Loaded configuration from {}", source);
    Ok(())
}

fn list_categories(config: &Config) {
    let corpus = Corpus::new(config.corpus.clone());

    println!("Categories:");
    for category in corpus.categories() {
        let note = if requires_credentials(category) {
            " (requires API credentials)"
        } else {
            ""
        };
        println!("  {}{}", category, note);
    }

    println!("\nGroups:");
    for (group, members) in &config.corpus.groups {
        println!("  {}: {}", group, members.join(", "));
    }
    println!("  all: every category");
}

fn init_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();

    // Ensure parent directory exists
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }

    config.save_toml(&output)?;
    println!("Configuration written to: {}", output.display());
    Ok(())
}
