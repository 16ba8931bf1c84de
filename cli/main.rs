#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use brca_prs::cohort::{OmicsKind, Status};
use brca_prs::config::Settings;
use brca_prs::omics::Orientation;
use brca_prs::pipeline::{self, PrsError, RunPlan};
use brca_prs::prompt::{OMICS_QUESTION, STATUS_QUESTION, ask_until_valid};
use clap::Parser;
use std::io;
use std::path::PathBuf;
use std::process;

#[derive(Parser, Debug)]
#[command(
    name = "brca-prs",
    version,
    about = "Compute omics risk scores for breast cancer samples with pretrained models",
    long_about = "Loads the biological variables and pretrained LightGBM model for the chosen \
                  status and omics type, aligns the input omics table to the model's features \
                  and writes one risk score per sample."
)]
struct Cli {
    /// Clinical status the model was trained for (asked interactively when omitted)
    #[arg(long, value_enum)]
    status: Option<Status>,

    /// Omics data type of the input table (asked interactively when omitted)
    #[arg(long, value_enum)]
    omics: Option<OmicsKind>,

    /// TOML settings file providing the artifact layout and reading options
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory the artifact layout is resolved against
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Biological variable list to use instead of the conventional one
    #[arg(long, value_name = "FILE")]
    variables: Option<PathBuf>,

    /// LightGBM text model to use instead of the conventional one
    #[arg(long, value_name = "FILE")]
    model: Option<PathBuf>,

    /// Omics table to score
    #[arg(long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// Where to write the scores
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Layout of the omics table
    #[arg(long, value_enum)]
    orientation: Option<Orientation>,

    /// Field separator of the omics table
    #[arg(long)]
    separator: Option<char>,

    /// Skip the memory-footprint reduction pass
    #[arg(long)]
    no_downcast: bool,

    /// Also write the class probabilities of classifier models
    #[arg(long)]
    probabilities: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn settings_from(cli: &Cli) -> Result<Settings, PrsError> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if let Some(root) = &cli.root {
        settings.root = root.clone();
    }
    if let Some(orientation) = cli.orientation {
        settings.orientation = orientation;
    }
    if let Some(separator) = cli.separator {
        settings.separator = separator;
    }
    if cli.no_downcast {
        settings.downcast = false;
    }
    if cli.probabilities {
        settings.probabilities = true;
    }
    Ok(settings)
}

fn run(cli: Cli) -> Result<(), PrsError> {
    let settings = settings_from(&cli)?;

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut terminal = io::stdout();
    let status = match cli.status {
        Some(status) => status,
        None => ask_until_valid(&mut input, &mut terminal, &STATUS_QUESTION)?,
    };
    let omics = match cli.omics {
        Some(omics) => omics,
        None => ask_until_valid(&mut input, &mut terminal, &OMICS_QUESTION)?,
    };

    let mut plan = RunPlan::from_settings(&settings, status, omics)?;
    if let Some(path) = cli.variables {
        plan.paths.variables = path;
    }
    if let Some(path) = cli.model {
        plan.paths.model = path;
    }
    if let Some(path) = cli.input {
        plan.paths.input = path;
    }
    if let Some(path) = cli.output {
        plan.paths.output = path;
    }

    let summary = pipeline::run(&plan)?;
    println!("{}", summary.scores.to_frame()?);
    if summary.duplicates_removed > 0 {
        println!(
            "{} repeated biological variables were found in the input and collapsed.",
            summary.duplicates_removed
        );
    }
    println!(
        "Scored {} samples on {} biological variables.",
        summary.samples, summary.variables
    );
    println!("The PRS file is generated at: {}", summary.output.display());
    Ok(())
}
