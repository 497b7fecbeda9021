//! Command line front end: plans, reads and copies JSON-lines datasets
//! through the partitioned read and write paths.
#![deny(unsafe_code)]

use std::error::Error;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::Value;

use docbag::{
    connection::{ConnectionCache, ConnectionConfig},
    graph::{ComputeOptions, LocalExecutor},
    io::{read_collection, write_collection},
    logging::init_logging,
    partition::{plan, PartitionBounds},
    store::{memory::DEFAULT_HOST, Collection, MemoryConnector},
    types::{into_document, Document},
    BridgeConfig, ReadOptions, WriteOptions,
};

#[derive(Parser, Debug)]
#[command(
    name = "docbag",
    version,
    about = "Partitioned reads and writes over document collections",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(long, global = true, value_name = "FILE", help = "Settings file")]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        default_value = "warn",
        env = "DOCBAG_LOG",
        help = "Log filter directive, e.g. info or docbag=debug"
    )]
    log_level: String,

    #[arg(long, global = true, help = "Named connection from the settings file")]
    connection: Option<String>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the partition bounds a read would use.
    Plan(SourceArgs),
    /// Print documents, one JSON object per line.
    Read {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long, help = "Only print this partition")]
        partition: Option<usize>,
    },
    /// Read every partition and write it into a second collection.
    Copy {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long, value_name = "FILE", help = "Write the copied collection here")]
        output: PathBuf,
        #[arg(long, help = "Destination collection (default: <collection>_copy)")]
        target: Option<String>,
        #[arg(long, help = "Executor worker threads")]
        workers: Option<usize>,
    },
}

#[derive(Args, Debug)]
struct SourceArgs {
    #[arg(long, value_name = "FILE", help = "JSON-lines file loaded as the source collection")]
    input: PathBuf,

    #[arg(long, default_value = "docbag")]
    database: String,

    #[arg(long, default_value = "input")]
    collection: String,

    #[arg(long, help = "Documents per partition")]
    chunk_size: Option<usize>,

    #[arg(long, value_name = "JSON", help = "Match filter")]
    filter: Option<String>,

    #[arg(long, help = "Size the plan from the collection estimate")]
    estimated_count: bool,

    #[arg(long, help = "Cut partitions by scanning ids")]
    paginate: bool,

    #[arg(long, help = "Show progress while paginating")]
    progress: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

struct Session {
    connector: Arc<MemoryConnector>,
    cache: Arc<ConnectionCache>,
    connection: ConnectionConfig,
    settings: BridgeConfig,
}

impl Session {
    fn open(cli: &Cli) -> Result<Self, Box<dyn Error>> {
        let settings = BridgeConfig::load(cli.config.clone())?;
        let connection = settings.connection(cli.connection.as_deref())?;
        let connector = Arc::new(MemoryConnector::new());
        let cache = Arc::new(ConnectionCache::with_capacity(
            connector.clone(),
            settings.defaults.cache_capacity,
        ));
        Ok(Self {
            connector,
            cache,
            connection,
            settings,
        })
    }

    fn host(&self) -> &str {
        self.connection
            .get("host")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_HOST)
    }

    fn load(&self, source: &SourceArgs) -> Result<usize, Box<dyn Error>> {
        let mut docs = read_jsonl(&source.input)?;
        if docs.is_empty() {
            return Ok(0);
        }
        let collection = self
            .connector
            .collection(self.host(), &source.database, &source.collection);
        Ok(collection.insert_many(&mut docs)?.inserted_ids.len())
    }

    fn read_options(&self, source: &SourceArgs) -> Result<ReadOptions, Box<dyn Error>> {
        let chunk_size = source
            .chunk_size
            .unwrap_or(self.settings.defaults.chunk_size);
        let mut options = ReadOptions::new(&source.database, &source.collection, chunk_size)
            .connection(self.connection.clone())
            .estimated_count(source.estimated_count)
            .paginate(source.paginate)
            .show_progress(source.progress);
        if let Some(text) = &source.filter {
            options = options.filter(into_document(serde_json::from_str(text)?)?);
        }
        Ok(options)
    }
}

#[derive(Serialize)]
struct CopyReport {
    source: String,
    target: String,
    partitions: usize,
    documents: usize,
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;
    let session = Session::open(&cli)?;

    match &cli.command {
        Command::Plan(source) => {
            session.load(source)?;
            let options = session.read_options(source)?;
            let handle = session.cache.get(&options.connection)?;
            let collection = handle.collection(&options.database, &options.collection)?;
            let bounds = plan(
                collection.as_ref(),
                &options.filter,
                options.chunk_size,
                &options.plan_options(),
            )?;
            emit(cli.format, &bounds, |bounds| print_plan_text(bounds))?;
        }
        Command::Read { source, partition } => {
            session.load(source)?;
            let options = session.read_options(source)?;
            let bag = read_collection(&session.cache, &options)?;
            let executor = LocalExecutor::new(Arc::clone(&session.cache));
            let compute = session.settings.defaults.compute_options();
            let docs = match partition {
                Some(index) => bag.compute_partition(&executor, *index, &compute)?,
                None => bag.compute(&executor, &compute)?,
            };
            let stdout = std::io::stdout();
            let mut out = BufWriter::new(stdout.lock());
            for doc in &docs {
                serde_json::to_writer(&mut out, doc)?;
                out.write_all(b"\n")?;
            }
            out.flush()?;
        }
        Command::Copy {
            source,
            output,
            target,
            workers,
        } => {
            session.load(source)?;
            let options = session.read_options(source)?;
            let bag = read_collection(&session.cache, &options)?;
            let target = target
                .clone()
                .unwrap_or_else(|| format!("{}_copy", source.collection));
            let compute = workers
                .map(ComputeOptions::with_workers)
                .unwrap_or_else(|| session.settings.defaults.compute_options());
            let executor = LocalExecutor::new(Arc::clone(&session.cache));
            let write = WriteOptions::new(&source.database, &target)
                .connection(session.connection.clone())
                .compute_options(compute);
            write_collection(&bag, &write, &executor)?;

            let copied = session
                .connector
                .collection(session.host(), &source.database, &target)
                .documents();
            write_jsonl(output, &copied)?;
            let report = CopyReport {
                source: format!("{}.{}", source.database, source.collection),
                target: format!("{}.{}", source.database, target),
                partitions: bag.npartitions(),
                documents: copied.len(),
            };
            emit(cli.format, &report, |report| {
                println!(
                    "copied {} documents from {} to {} in {} partitions",
                    report.documents, report.source, report.target, report.partitions
                );
            })?;
        }
    }
    Ok(())
}

fn read_jsonl(path: &Path) -> Result<Vec<Document>, Box<dyn Error>> {
    let reader = BufReader::new(File::open(path)?);
    let mut docs = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(&line)
            .map_err(|err| format!("{}:{}: {err}", path.display(), lineno + 1))?;
        docs.push(into_document(value)?);
    }
    Ok(docs)
}

fn write_jsonl(path: &Path, docs: &[Document]) -> Result<(), Box<dyn Error>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut out = BufWriter::new(File::create(path)?);
    for doc in docs {
        serde_json::to_writer(&mut out, doc)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: Serialize,
    F: Fn(&T),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(value),
    }
    Ok(())
}

fn print_plan_text(bounds: &[PartitionBounds]) {
    if bounds.is_empty() {
        println!("no documents matched; 0 partitions");
        return;
    }
    let last = bounds.len() - 1;
    for b in bounds {
        let close = if b.ordinal == last { ']' } else { ')' };
        println!("{:>4}  [{}, {}{close}", b.ordinal, b.min, b.max);
    }
}
