use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use dili_cellpaint::acquire::AcquireSettings;
use dili_cellpaint::app::{App, ImagesResult};
use dili_cellpaint::chembl::{ChemblApi, ChemblClient};
use dili_cellpaint::config::{ConfigLoader, ResolvedConfig};
use dili_cellpaint::domain::InchiKey;
use dili_cellpaint::embeddings::{DEFAULT_FEATURE_COUNT, HttpEmbeddingModel};
use dili_cellpaint::error::DiliError;
use dili_cellpaint::http::ApiHttpClient;
use dili_cellpaint::image_array::ImageArray;
use dili_cellpaint::imaging::{
    HttpImageSource, HttpLocationIndex, ImageSource, LocationIndex, WellLocation,
};
use dili_cellpaint::output::{JsonOutput, OutputMode};
use dili_cellpaint::paginate::FetchOutcome;
use dili_cellpaint::progress::ConsoleProgress;
use dili_cellpaint::store::Store;

#[derive(Parser)]
#[command(name = "dili-cp")]
#[command(about = "DILIrank compounds, their Cell Painting images and per-well embeddings")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Search ChEMBL for every reference compound and store the merged table")]
    Compounds,
    #[command(about = "Fetch bioactivities for the stored ChEMBL ids")]
    Activities,
    #[command(about = "Download compound and negative-control images")]
    Images(ImagesArgs),
    #[command(about = "Download negative controls for the plates listed in a meta.csv")]
    Controls(ControlsArgs),
    #[command(about = "Compute per-well embeddings for downloaded images")]
    Embed(EmbedArgs),
}

#[derive(Args)]
struct ImagesArgs {
    #[arg(long)]
    compounds: Option<Utf8PathBuf>,

    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Args)]
struct ControlsArgs {
    #[arg(long)]
    meta: Utf8PathBuf,
}

#[derive(Args)]
struct EmbedArgs {
    dir: Utf8PathBuf,

    #[arg(long)]
    output: Option<Utf8PathBuf>,

    #[arg(long)]
    model_url: Option<String>,

    #[arg(long, default_value_t = DEFAULT_FEATURE_COUNT)]
    features: usize,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<DiliError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &DiliError) -> u8 {
    match error {
        DiliError::InputNotFound(_)
        | DiliError::ReferenceNotFound(_)
        | DiliError::ConfigRead(_) => 2,
        DiliError::ChemblHttp(_)
        | DiliError::ImagingHttp(_)
        | DiliError::ImagingStatus { .. }
        | DiliError::ModelHttp(_)
        | DiliError::ModelStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let store = Store::new(config.data_dir.clone());
    let chembl = ChemblClient::new(
        ApiHttpClient::new()?,
        config.chembl.base_url.clone(),
        config.chembl.page_size,
    );

    match cli.command {
        Commands::Compounds => {
            let app = App::new(store, chembl, NopLocationIndex, NopImageSource);
            run_compounds(&app, &config, output_mode)
        }
        Commands::Activities => {
            let app = App::new(store, chembl, NopLocationIndex, NopImageSource);
            run_activities(&app, output_mode)
        }
        Commands::Images(args) => {
            let (index, images) = imaging_clients(&config)?;
            let app = App::new(store, chembl, index, images);
            run_images(&app, &config, args, output_mode)
        }
        Commands::Controls(args) => {
            let (index, images) = imaging_clients(&config)?;
            let app = App::new(store, chembl, index, images);
            run_controls(&app, &config, args, output_mode)
        }
        Commands::Embed(args) => {
            let app = App::new(store, chembl, NopLocationIndex, NopImageSource);
            run_embed(&app, &config, args, output_mode)
        }
    }
}

fn imaging_clients(
    config: &ResolvedConfig,
) -> Result<(HttpLocationIndex<ApiHttpClient>, HttpImageSource), DiliError> {
    let index_url = config.imaging.index_url.clone().ok_or_else(|| {
        DiliError::InvalidConfig("imaging.index_url is not set".to_string())
    })?;
    let image_url = config.imaging.image_url.clone().ok_or_else(|| {
        DiliError::InvalidConfig("imaging.image_url is not set".to_string())
    })?;
    let index = HttpLocationIndex::new(ApiHttpClient::new()?, index_url, config.chembl.page_size);
    Ok((index, HttpImageSource::new(image_url)?))
}

fn run_compounds<C: ChemblApi, L: LocationIndex, S: ImageSource>(
    app: &App<C, L, S>,
    config: &ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.collect_compounds(
                &config.reference_path,
                &config.reference_sheet,
                &JsonOutput,
            )?;
            JsonOutput::print_compounds(&result).into_diagnostic()?;
        }
        OutputMode::Interactive => {
            let progress = ConsoleProgress::new();
            let result = app.collect_compounds(
                &config.reference_path,
                &config.reference_sheet,
                &progress,
            )?;
            progress.finish();
            print_header("compounds");
            print_line(GREEN, &format!("reference rows: {}", result.reference_rows));
            print_line(GREEN, &format!("molecules: {}", result.collection.molecules));
            print_line(GREEN, &format!("rows written: {}", result.collection.rows_written));
            print_names(YELLOW, "no match", &result.collection.unmatched);
            print_names(RED, "interrupted", &result.collection.interrupted);
            print_line(CYAN, &format!("database: {}", result.database));
            print_line(CYAN, &format!("csv: {}", result.csv));
        }
    }
    Ok(())
}

fn run_activities<C: ChemblApi, L: LocationIndex, S: ImageSource>(
    app: &App<C, L, S>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.collect_activities(&JsonOutput)?;
            JsonOutput::print_activities(&result).into_diagnostic()?;
        }
        OutputMode::Interactive => {
            let progress = ConsoleProgress::new();
            let result = app.collect_activities(&progress)?;
            progress.finish();
            print_header("activities");
            print_line(GREEN, &format!("compounds: {}", result.collection.compounds));
            print_line(GREEN, &format!("activities: {}", result.collection.activities));
            print_names(RED, "interrupted", &result.collection.interrupted);
            print_line(
                CYAN,
                &format!("database: {} ({} rows)", result.database, result.stored_rows),
            );
        }
    }
    Ok(())
}

fn run_images<C: ChemblApi, L: LocationIndex, S: ImageSource>(
    app: &App<C, L, S>,
    config: &ResolvedConfig,
    args: ImagesArgs,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let settings = AcquireSettings::from(&config.imaging);
    let compounds = args.compounds.as_deref();
    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.acquire_images(compounds, args.limit, settings, &JsonOutput)?;
            JsonOutput::print_images(&result).into_diagnostic()?;
        }
        OutputMode::Interactive => {
            let progress = ConsoleProgress::new();
            let result = app.acquire_images(compounds, args.limit, settings, &progress)?;
            progress.finish();
            print_images_summary(&result);
        }
    }
    Ok(())
}

fn run_controls<C: ChemblApi, L: LocationIndex, S: ImageSource>(
    app: &App<C, L, S>,
    config: &ResolvedConfig,
    args: ControlsArgs,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let settings = AcquireSettings::from(&config.imaging);
    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.acquire_controls(&args.meta, settings, &JsonOutput)?;
            JsonOutput::print_images(&result).into_diagnostic()?;
        }
        OutputMode::Interactive => {
            let progress = ConsoleProgress::new();
            let result = app.acquire_controls(&args.meta, settings, &progress)?;
            progress.finish();
            print_images_summary(&result);
        }
    }
    Ok(())
}

fn run_embed<C: ChemblApi, L: LocationIndex, S: ImageSource>(
    app: &App<C, L, S>,
    config: &ResolvedConfig,
    args: EmbedArgs,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let model_url = args
        .model_url
        .or_else(|| config.model_url.clone())
        .ok_or_else(|| DiliError::InvalidConfig("embedding.model_url is not set".to_string()))?;
    let model = HttpEmbeddingModel::new(model_url, args.features)?;
    let output = args.output.as_deref();
    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.embed(&args.dir, output, &model, &JsonOutput)?;
            JsonOutput::print_embed(&result).into_diagnostic()?;
        }
        OutputMode::Interactive => {
            let progress = ConsoleProgress::new();
            let result = app.embed(&args.dir, output, &model, &progress)?;
            progress.finish();
            print_header("embeddings");
            for item in &result.outputs {
                print_line(
                    GREEN,
                    &format!("{} -> {} ({} wells)", item.directory, item.output, item.wells),
                );
            }
        }
    }
    Ok(())
}

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

fn print_header(stage: &str) {
    println!("{CYAN}dili-cp {stage} summary{RESET}");
}

fn print_line(color: &str, text: &str) {
    println!("{color}  {text}{RESET}");
}

fn print_names(color: &str, label: &str, names: &[String]) {
    if !names.is_empty() {
        print_line(color, &format!("{label} ({}): {}", names.len(), names.join(", ")));
    }
}

fn print_images_summary(result: &ImagesResult) {
    print_header("images");
    for report in result.compounds.iter().chain(&result.controls) {
        let color = if report.action == "skipped" {
            YELLOW
        } else if report.is_interrupted() || report.failed > 0 || report.rejected > 0 {
            RED
        } else {
            GREEN
        };
        print_line(
            color,
            &format!(
                "{} ({}): {} saved, {} rejected, {} failed",
                report.target, report.action, report.saved, report.rejected, report.failed
            ),
        );
    }
    print_names(YELLOW, "invalid InChI keys", &result.skipped_keys);
}

struct NopLocationIndex;
struct NopImageSource;

impl LocationIndex for NopLocationIndex {
    fn locations_for_compound(
        &self,
        _inchi_key: &InchiKey,
    ) -> Result<FetchOutcome<WellLocation>, DiliError> {
        Err(DiliError::InvalidConfig(
            "location index not configured".to_string(),
        ))
    }

    fn negative_controls(
        &self,
        _source: &str,
        _plate: &str,
    ) -> Result<FetchOutcome<WellLocation>, DiliError> {
        Err(DiliError::InvalidConfig(
            "location index not configured".to_string(),
        ))
    }
}

impl ImageSource for NopImageSource {
    fn fetch_image(
        &self,
        _location: &WellLocation,
        _site: &str,
        _channel: &str,
    ) -> Result<ImageArray, DiliError> {
        Err(DiliError::InvalidConfig(
            "image source not configured".to_string(),
        ))
    }
}
