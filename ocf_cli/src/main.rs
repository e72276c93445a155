use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use xxhash_rust::xxh3::Xxh3;

use ocf_codecs::codec_by_name;
use ocf_core::keyvalue::{self, KEY_FIELD, VALUE_FIELD};
use ocf_core::{
    ContainerReader, Datum, FileSplit, FsOpener, KeyValueRecordReader, ReaderConfig, Schema,
    SeekableFile,
};

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "ocf",
    about = "Inspect object container files and read them one split at a time",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print header metadata and, optionally, the block layout
    Inspect {
        /// Container file to inspect
        file: PathBuf,
        /// Walk the file and print every block
        #[arg(long)]
        blocks: bool,
    },
    /// Print every record of the file as a JSON line
    Cat {
        /// Container file
        file: PathBuf,
        /// Stop after this many records
        #[arg(short, long)]
        limit: Option<u64>,
    },
    /// Read one split with the key/value reader and print its records
    Read {
        /// Container file
        file: PathBuf,
        /// First byte of the split
        #[arg(short, long, default_value_t = 0)]
        start: u64,
        /// Split length in bytes (default: to end of file)
        #[arg(short, long)]
        length: Option<u64>,
        #[command(flatten)]
        schemas: SchemaArgs,
    },
    /// Cut the file into fixed-size splits, read each one, and check that
    /// together they return exactly the records of the whole file
    Splits {
        /// Container file
        file: PathBuf,
        /// Bytes per split
        #[arg(short = 'n', long)]
        split_size: u64,
        #[command(flatten)]
        schemas: SchemaArgs,
    },
}

/// Where the key/value schemas come from. Defaults to the file's own.
#[derive(Args)]
struct SchemaArgs {
    /// JSON reader configuration (key_schema, value_schema, buffer_size)
    #[arg(long, conflicts_with_all = ["key_schema", "value_schema"])]
    config: Option<PathBuf>,
    /// Key schema as JSON, e.g. '"string"'
    #[arg(long)]
    key_schema: Option<String>,
    /// Value schema as JSON, e.g. '{"type":"int"}'
    #[arg(long)]
    value_schema: Option<String>,
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", v, UNITS[unit])
    }
}

fn open_container(file: &Path) -> anyhow::Result<ContainerReader> {
    let source = SeekableFile::open(file).with_context(|| format!("opening {:?}", file))?;
    let reader = ContainerReader::open(Box::new(source), &codec_by_name)
        .with_context(|| format!("reading header of {:?}", file))?;
    Ok(reader)
}

fn path_str(file: &Path) -> anyhow::Result<&str> {
    file.to_str()
        .with_context(|| format!("path {:?} is not valid UTF-8", file))
}

/// Build the reader configuration from the command line, falling back to the
/// key and value schemas embedded in the file.
fn reader_config(file: &Path, args: &SchemaArgs) -> anyhow::Result<ReaderConfig> {
    if let Some(path) = &args.config {
        return ReaderConfig::from_path(path).with_context(|| format!("loading config {:?}", path));
    }

    let embedded = open_container(file)?.header().schema.clone();
    let field = |name: &str| -> anyhow::Result<Schema> {
        embedded
            .record_fields()
            .and_then(|fields| fields.iter().find(|f| f.name == name))
            .map(|f| f.schema.clone())
            .with_context(|| format!("file schema has no '{}' field: {}", name, embedded))
    };
    let key = match &args.key_schema {
        Some(json) => Schema::parse_str(json).context("parsing --key-schema")?,
        None => field(KEY_FIELD)?,
    };
    let value = match &args.value_schema {
        Some(json) => Schema::parse_str(json).context("parsing --value-schema")?,
        None => field(VALUE_FIELD)?,
    };
    Ok(ReaderConfig::key_value(key, value))
}

fn pair_json(key: &Datum, value: &Datum) -> serde_json::Value {
    serde_json::json!({ "key": key.to_json(), "value": value.to_json() })
}

/// Read one split, handing each rendered record to `emit`. Returns the record
/// count and the final progress value.
fn read_split(
    split: &FileSplit,
    config: &ReaderConfig,
    mut emit: impl FnMut(&serde_json::Value) -> anyhow::Result<()>,
) -> anyhow::Result<(u64, f32)> {
    let mut reader: KeyValueRecordReader<Datum, Datum> = KeyValueRecordReader::new(Arc::new(codec_by_name));
    reader
        .initialize(split, config, &FsOpener)
        .with_context(|| format!("initializing split {}+{}", split.start, split.length))?;

    let mut count = 0u64;
    while reader.advance()? {
        emit(&pair_json(reader.current_key()?, reader.current_value()?))?;
        count += 1;
    }
    let progress = reader.progress();
    reader.close()?;
    Ok((count, progress))
}

// ── Subcommand implementations ─────────────────────────────────────────────

fn run_inspect(file: PathBuf, show_blocks: bool) -> anyhow::Result<()> {
    let mut reader = open_container(&file)?;
    let header = reader.header().clone();

    println!("=== Object container file: {:?} ===", file);
    println!();
    println!("  codec          : {}", header.codec);
    println!("  sync marker    : {}", hex(&header.sync));
    println!("  data start     : {}", header.data_start);
    println!("  file on disk   : {}", human_bytes(reader.length()));
    println!("  schema         : {}", header.schema);
    for (key, value) in header.user_metadata() {
        println!("  meta {:<10}: {}", key, String::from_utf8_lossy(value));
    }

    if show_blocks {
        println!();
        println!(
            "  {:>8}  {:>14}  {:>10}  {:>12}  {:>12}",
            "block", "file offset", "records", "compressed", "raw"
        );
        println!("  {}", "-".repeat(64));
        let mut idx = 0u64;
        let mut total_records = 0u64;
        while let Some(block) = reader.read_next_block()? {
            println!(
                "  {:>8}  {:>14}  {:>10}  {:>12}  {:>12}",
                idx,
                block.offset,
                block.record_count,
                human_bytes(block.end - block.offset),
                human_bytes(block.raw_len() as u64)
            );
            idx += 1;
            total_records += block.record_count;
        }
        println!();
        println!("  {} blocks, {} records", idx, total_records);
    }

    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn run_cat(file: PathBuf, limit: Option<u64>) -> anyhow::Result<()> {
    let mut reader = open_container(&file)?;
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    let mut count = 0u64;
    for record in reader.records() {
        if limit.map_or(false, |l| count >= l) {
            break;
        }
        let record = record.with_context(|| format!("decoding record {}", count))?;
        writeln!(out, "{}", record.to_json())?;
        count += 1;
    }
    out.flush()?;
    eprintln!("  records     : {}", count);
    Ok(())
}

fn run_read(
    file: PathBuf,
    start: u64,
    length: Option<u64>,
    schemas: SchemaArgs,
) -> anyhow::Result<()> {
    let config = reader_config(&file, &schemas)?;
    let length = match length {
        Some(l) => l,
        None => std::fs::metadata(&file)?.len().saturating_sub(start),
    };
    let split = FileSplit::new(path_str(&file)?, start, length);

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let t0 = Instant::now();
    let (count, progress) = read_split(&split, &config, |json| {
        writeln!(out, "{}", json)?;
        Ok(())
    })?;
    out.flush()?;

    eprintln!("  split       : [{}, {})", split.start, split.end());
    eprintln!("  records     : {}", count);
    eprintln!("  progress    : {:.3}", progress);
    eprintln!("  elapsed     : {:.3}s", t0.elapsed().as_secs_f64());
    Ok(())
}

fn run_splits(file: PathBuf, split_size: u64, schemas: SchemaArgs) -> anyhow::Result<()> {
    if split_size == 0 {
        bail!("--split-size must be positive");
    }
    let config = reader_config(&file, &schemas)?;
    let path = path_str(&file)?;
    let file_len = std::fs::metadata(&file)?.len();

    // Reference sequence: every record of the file, read without split limits.
    let mut whole = Xxh3::new();
    let mut whole_count = 0u64;
    let mut reader = open_container(&file)?;
    for record in reader.records() {
        let (key, value) = keyvalue::split(record?)?;
        whole.update(pair_json(&key, &value).to_string().as_bytes());
        whole_count += 1;
    }

    let mut union = Xxh3::new();
    let mut union_count = 0u64;
    println!("  {:>6}  {:>14}  {:>14}  {:>10}", "split", "start", "length", "records");
    let mut start = 0u64;
    let mut idx = 0u64;
    while start < file_len {
        let length = split_size.min(file_len - start);
        let split = FileSplit::new(path, start, length);
        let (count, _) = read_split(&split, &config, |json| {
            union.update(json.to_string().as_bytes());
            Ok(())
        })?;
        println!("  {:>6}  {:>14}  {:>14}  {:>10}", idx, start, length, count);
        union_count += count;
        start += length;
        idx += 1;
    }

    let (whole_digest, union_digest) = (whole.digest(), union.digest());
    println!();
    println!("  whole file  : {} records, xxh3 {:016x}", whole_count, whole_digest);
    println!("  all splits  : {} records, xxh3 {:016x}", union_count, union_digest);
    if whole_count != union_count || whole_digest != union_digest {
        bail!("splits do not reproduce the whole-file record sequence");
    }
    println!("  splits partition the file exactly");
    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Inspect { file, blocks } => run_inspect(file, blocks),
        Commands::Cat { file, limit } => run_cat(file, limit),
        Commands::Read {
            file,
            start,
            length,
            schemas,
        } => run_read(file, start, length, schemas),
        Commands::Splits {
            file,
            split_size,
            schemas,
        } => run_splits(file, split_size, schemas),
    }
}
