use std::path::PathBuf;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use biograph::adapters::chipseq::DEFAULT_MODIFICATION_TYPE;
use biograph::adapters::{
    AssemblySource, ChipSeqOptions, GenomeOptions, SingleCellOptions, chipseq, genome, single_cell,
};
use biograph::annotation::EnsemblHttpClient;
use biograph::app::App;
use biograph::config::ConfigLoader;
use biograph::domain::{AdapterKind, Modality, Species, TaxonId};
use biograph::emitter::DEFAULT_BATCH_SIZE;
use biograph::error::GraphError;
use biograph::output::{JsonOutput, LogProgress, OutputMode};
use biograph::service::{GraphServiceHttpClient, ServiceConfig};
use biograph::store::{DEFAULT_OUTPUT_DIR, OutputStore};

#[derive(Parser)]
#[command(name = "biograph")]
#[command(about = "Convert genomes, ChIP-seq peaks and single-cell matrices into graph node/edge streams")]
#[command(version, author)]
struct Cli {
    /// Suppress progress events on stderr.
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run every adapter listed in biograph.json")]
    Run(RunArgs),
    #[command(about = "Emit genome interval tiles and GTF annotation")]
    Genome(GenomeArgs),
    #[command(about = "Emit a ChIP-seq assay and its narrowPeak calls")]
    Chipseq(ChipSeqArgs),
    #[command(about = "Emit a single-cell RNA or ATAC experiment")]
    SingleCell(SingleCellArgs),
    #[command(about = "Print the schema description of an adapter")]
    Schema(SchemaArgs),
    #[command(about = "Upload the streams of a finished run to the graph service")]
    Push(PushArgs),
    #[command(about = "List objects related to an object in the graph service")]
    Related(RelatedArgs),
}

#[derive(Args)]
struct OutputArgs {
    /// Output root; defaults to ./graph-out, or the config's output_dir for `run`.
    #[arg(long)]
    output: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct RunArgs {
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args)]
struct GenomeArgs {
    /// Scientific name, e.g. "homo sapiens".
    species: String,

    #[arg(long)]
    taxon: Option<String>,

    /// Saved Ensembl `info/assembly` JSON instead of a REST lookup.
    #[arg(long)]
    assembly_file: Option<PathBuf>,

    #[arg(long)]
    gtf: Option<PathBuf>,

    #[arg(long)]
    primary_assembly_only: bool,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args)]
struct ChipSeqArgs {
    name: String,

    #[arg(long)]
    bed: PathBuf,

    #[arg(long)]
    protein_id: String,

    #[arg(long)]
    sample_id: String,

    #[arg(long)]
    taxon: String,

    #[arg(long, default_value = DEFAULT_MODIFICATION_TYPE)]
    modification_type: String,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args)]
struct SingleCellArgs {
    #[arg(long, value_enum)]
    modality: Modality,

    #[arg(long)]
    matrix: PathBuf,

    #[arg(long)]
    features: PathBuf,

    #[arg(long)]
    cells: PathBuf,

    #[arg(long, default_value = "barcode")]
    barcode_column: String,

    #[arg(long, default_value = "library_uuid")]
    library_column: String,

    #[arg(long)]
    sample_column: Option<String>,

    #[arg(long)]
    cell_type_column: Option<String>,

    #[arg(long = "experiment-column")]
    experiment_columns: Vec<String>,

    #[arg(long = "sample-column-property")]
    sample_columns: Vec<String>,

    #[arg(long)]
    taxon: Option<String>,

    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args)]
struct SchemaArgs {
    #[arg(value_enum)]
    kind: AdapterKind,

    #[arg(long, default_value = "homo sapiens")]
    species: String,

    #[arg(long, default_value = "assay")]
    name: String,

    #[arg(long, value_enum, default_value_t = Modality::Rna)]
    modality: Modality,
}

#[derive(Args)]
struct PushArgs {
    /// Adapter key, i.e. the directory name under the output root.
    key: String,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args)]
struct RelatedArgs {
    object_id: String,

    #[arg(long)]
    relationship: String,

    #[arg(long, default_value_t = 100)]
    limit: usize,

    #[arg(long, default_value_t = 4)]
    workers: usize,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<GraphError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &GraphError) -> u8 {
    match error {
        GraphError::MissingConfig | GraphError::ConfigRead(_) | GraphError::ConfigParse(_) => 2,
        GraphError::UpstreamHttp(_)
        | GraphError::UpstreamStatus { .. }
        | GraphError::AnnotationLookup(_) => 3,
        GraphError::EmptyResult { .. } => 4,
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
    let mode = if cli.quiet {
        OutputMode::Quiet
    } else {
        OutputMode::Verbose
    };
    let sink = LogProgress::new(mode);

    match cli.command {
        Commands::Run(args) => {
            let config = ConfigLoader::resolve(args.config.as_deref())?;
            let root = args.output.output.unwrap_or_else(|| config.output_dir.clone());
            let app = App::new(OutputStore::new(root));
            let client = EnsemblHttpClient::new()?;
            let summary = app.run_config(&config, client, &sink)?;
            JsonOutput::print_summary(&summary).into_diagnostic()?;
        }
        Commands::Genome(args) => {
            let species: Species = args.species.parse()?;
            let options = GenomeOptions {
                taxon: args.taxon.as_deref().map(str::parse::<TaxonId>).transpose()?,
                assembly: args
                    .assembly_file
                    .map(AssemblySource::File)
                    .unwrap_or(AssemblySource::Lookup),
                gtf: args.gtf,
                primary_assembly_only: args.primary_assembly_only,
                ..GenomeOptions::new(species)
            };
            let app = App::new(store(args.output.output));
            let mut adapter = app.genome_adapter(EnsemblHttpClient::new()?, options);
            JsonOutput::print_run(&app.run(&mut adapter, &sink)?).into_diagnostic()?;
        }
        Commands::Chipseq(args) => {
            let options = ChipSeqOptions {
                name: args.name,
                protein_id: args.protein_id,
                modification_type: args.modification_type,
                sample_id: args.sample_id,
                bed: args.bed,
                taxon: args.taxon.parse()?,
            };
            let app = App::new(store(args.output.output));
            let mut adapter = app.chipseq_adapter(options);
            JsonOutput::print_run(&app.run(&mut adapter, &sink)?).into_diagnostic()?;
        }
        Commands::SingleCell(args) => {
            let mut options = SingleCellOptions::new(args.modality, args.matrix, args.features, args.cells);
            options.barcode_column = args.barcode_column;
            options.library_column = args.library_column;
            options.sample_column = args.sample_column;
            options.cell_type_column = args.cell_type_column;
            options.experiment_columns = args.experiment_columns;
            options.sample_columns = args.sample_columns;
            options.taxon = args.taxon.as_deref().map(str::parse::<TaxonId>).transpose()?;
            options.batch_size = args.batch_size;
            let app = App::new(store(args.output.output));
            let mut adapter = app.single_cell_adapter(options);
            JsonOutput::print_run(&app.run(&mut adapter, &sink)?).into_diagnostic()?;
        }
        Commands::Schema(args) => {
            let schema = match args.kind {
                AdapterKind::Genome => genome::schema(&genome::datapack_info(&args.species.parse()?)),
                AdapterKind::Chipseq => chipseq::schema(&chipseq::datapack_info(&args.name)),
                AdapterKind::SingleCell => {
                    single_cell::schema(&single_cell::datapack_info(args.modality), args.modality)
                }
            };
            JsonOutput::print_schema(&schema).into_diagnostic()?;
        }
        Commands::Push(args) => {
            let client = GraphServiceHttpClient::new(&service_config()?)?;
            let app = App::new(store(args.output.output));
            JsonOutput::print_push(&app.push(&client, &args.key, &sink)?).into_diagnostic()?;
        }
        Commands::Related(args) => {
            let client = GraphServiceHttpClient::new(&service_config()?)?;
            let app = App::new(store(None));
            let result = app.related(&client, &args.object_id, &args.relationship, args.limit, args.workers)?;
            JsonOutput::print_related(&result).into_diagnostic()?;
        }
    }
    Ok(())
}

fn store(output: Option<Utf8PathBuf>) -> OutputStore {
    OutputStore::new(output.unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_OUTPUT_DIR)))
}

/// Service credentials from biograph.json when present, else the environment.
fn service_config() -> miette::Result<ServiceConfig> {
    if let Ok(config) = ConfigLoader::resolve(None) {
        if let Some(service) = config.service {
            return Ok(service);
        }
    }
    ServiceConfig::from_env().ok_or_else(|| {
        miette::Report::msg("graph service credentials missing (set BIOBOX_API_URL, BIOBOX_ORGID, BIOBOX_TOKEN)")
    })
}
