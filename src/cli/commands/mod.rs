//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod detect;
mod train;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use nerctl::config::Config;
use nerctl::models::InputFormat;

#[derive(Parser)]
#[command(name = "nerctl")]
#[command(about = "Train, deploy and run custom entity recognizers")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

/// Document layout of an input set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum FormatArg {
    /// Every line is a document
    #[default]
    Line,
    /// Every file is a document
    File,
}

impl From<FormatArg> for InputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Line => InputFormat::OneDocumentPerLine,
            FormatArg::File => InputFormat::OneDocumentPerFile,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Validate an annotation table and show its labels
    Labels {
        /// Annotation table (CSV)
        annotations: PathBuf,
        /// Documents the annotations refer to (enables span checks)
        #[arg(short, long)]
        documents: Option<PathBuf>,
    },

    /// Upload training data and start training a recognizer
    Train {
        /// Recognizer name
        name: String,
        /// Version name
        #[arg(long)]
        version: Option<String>,
        /// Training documents
        #[arg(short, long)]
        documents: PathBuf,
        /// Training annotations (CSV)
        #[arg(short, long)]
        annotations: PathBuf,
        /// Test documents
        #[arg(long, requires = "test_annotations")]
        test_documents: Option<PathBuf>,
        /// Test annotations (CSV)
        #[arg(long, requires = "test_documents")]
        test_annotations: Option<PathBuf>,
        /// Document layout
        #[arg(short, long, value_enum, default_value = "line")]
        format: FormatArg,
        /// Wait until training finishes
        #[arg(short, long)]
        wait: bool,
    },

    /// Show the status of a training job
    Status {
        /// Recognizer identifier (ARN)
        model: String,
        /// Poll until training finishes
        #[arg(short, long)]
        wait: bool,
    },

    /// Stop a training job (or a batch detection job with --detection)
    Stop {
        /// Recognizer identifier (ARN), or detection job id with --detection
        id: String,
        /// Stop a batch detection job instead
        #[arg(long)]
        detection: bool,
    },

    /// Deploy a trained recognizer to a real-time endpoint
    Deploy {
        /// Recognizer identifier (ARN)
        model: String,
        /// Endpoint name
        #[arg(short, long)]
        name: String,
        /// Inference units to provision
        #[arg(short, long, default_value = "1")]
        units: u32,
        /// Wait until the endpoint is in service
        #[arg(short, long)]
        wait: bool,
    },

    /// Detect entities in a piece of text using a deployed endpoint
    Detect {
        /// Endpoint identifier (ARN)
        endpoint: String,
        /// Text to analyse
        text: String,
    },

    /// Start a batch detection job
    Batch {
        /// Recognizer identifier (ARN)
        model: String,
        /// Input location (s3://bucket/key)
        #[arg(short, long)]
        input: String,
        /// Output prefix (defaults to the configured bucket and prefix)
        #[arg(short, long)]
        output: Option<String>,
        /// Job name
        #[arg(short, long)]
        name: Option<String>,
        /// Document layout
        #[arg(short, long, value_enum, default_value = "line")]
        format: FormatArg,
        /// Wait for the job and print its results
        #[arg(short, long)]
        wait: bool,
    },

    /// Print the entities in batch detection output
    Results {
        /// Local file or stored object (s3://bucket/key)
        location: String,
    },
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => Config::load_from_path(path)
            .await
            .map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))?,
        None => Config::load().await,
    };

    match cli.command {
        Commands::Labels {
            annotations,
            documents,
        } => train::cmd_labels(&config, &annotations, documents.as_deref()),
        Commands::Train {
            name,
            version,
            documents,
            annotations,
            test_documents,
            test_annotations,
            format,
            wait,
        } => {
            let data = nerctl::services::TrainingData {
                train_documents: documents,
                train_annotations: annotations,
                test_documents,
                test_annotations,
                format: format.into(),
            };
            train::cmd_train(config, &name, version.as_deref(), &data, wait).await
        }
        Commands::Status { model, wait } => train::cmd_status(config, &model, wait).await,
        Commands::Stop { id, detection } => {
            if detection {
                detect::cmd_stop(config, &id).await
            } else {
                train::cmd_stop(config, &id).await
            }
        }
        Commands::Deploy {
            model,
            name,
            units,
            wait,
        } => detect::cmd_deploy(config, &model, &name, units, wait).await,
        Commands::Detect { endpoint, text } => detect::cmd_detect(config, &endpoint, &text).await,
        Commands::Batch {
            model,
            input,
            output,
            name,
            format,
            wait,
        } => {
            detect::cmd_batch(
                config,
                &model,
                &input,
                output.as_deref(),
                name.as_deref(),
                format.into(),
                wait,
            )
            .await
        }
        Commands::Results { location } => detect::cmd_results(config, &location).await,
    }
}
