use clap::{Parser, Subcommand};
use partfile::segment::{FileSegment, SegmentOptions, WriteOutcome};
use partfile::transform::{MacBinaryDecoder, TransformRegistry};
use partfile::{SegmentReader, SuffixRenamePolicy};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Upper bound for `--chunk-size`: 64 MiB.
const MAX_CHUNK_KIB: u64 = 64 * 1024;

#[derive(Parser)]
#[command(name = "partfile", about = "Materialize upload file parts onto disk")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Treat one input (file or stdin) as a single file part and write it out
    Write {
        /// Directory to write into, or exact destination file
        target: PathBuf,
        /// Part body; stdin when omitted
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Form field name
        #[arg(short, long, default_value = "file")]
        field: String,
        /// Declared file name (defaults to the input's name; none for stdin)
        #[arg(short = 'n', long)]
        filename: Option<String>,
        /// Declared client-side path
        #[arg(long)]
        path: Option<String>,
        #[arg(short = 't', long, default_value = "application/octet-stream")]
        content_type: String,
        /// Pick a free `name-N.ext` instead of overwriting
        #[arg(short, long)]
        rename: bool,
        /// Copy chunk size in KiB (1 to 65536)
        #[arg(long, default_value = "8", value_parser = clap::value_parser!(u64).range(1..=MAX_CHUNK_KIB))]
        chunk_size: u64,
        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// Unwrap the data fork of a MacBinary file
    DecodeMacbinary {
        input:  PathBuf,
        output: PathBuf,
    },
    /// List content types that trigger a transform
    Transforms,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    match Cli::parse().command {

        // ── Write ────────────────────────────────────────────────────────────
        Commands::Write { target, input, field, filename, path, content_type, rename, chunk_size, json } => {
            let filename = filename.or_else(|| {
                input.as_ref()
                    .and_then(|p| p.file_name())
                    .map(|s| s.to_string_lossy().into_owned())
            });
            let body: Box<dyn Read> = match &input {
                Some(p) => Box::new(BufReader::new(File::open(p)?)),
                None    => Box::new(io::stdin().lock()),
            };
            let opts = SegmentOptions {
                chunk_size: (chunk_size * 1024) as usize,
                ..Default::default()
            };

            let mut seg = FileSegment::with_options(
                field, SegmentReader::new(body), content_type, filename, path, opts,
            );
            if rename {
                seg.set_renamer(Arc::new(SuffixRenamePolicy::default()));
            }
            let outcome = seg.write_to_path(&target)?;
            report(&outcome, json)?;
        }

        // ── DecodeMacbinary ──────────────────────────────────────────────────
        Commands::DecodeMacbinary { input, output } => {
            let mut src = BufReader::new(File::open(&input)?);
            let mut dec = MacBinaryDecoder::new(BufWriter::new(File::create(&output)?));
            let read = io::copy(&mut src, &mut dec)?;
            dec.flush()?;
            match dec.data_fork_len() {
                Some(len) => println!("Decoded {} → {} (data fork {len} B, envelope {read} B)",
                                      input.display(), output.display()),
                None      => println!("{}: shorter than a MacBinary header, nothing written", input.display()),
            }
        }

        // ── Transforms ───────────────────────────────────────────────────────
        Commands::Transforms => {
            for ct in TransformRegistry::builtin().content_types() {
                println!("{ct}");
            }
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn report(outcome: &WriteOutcome, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }
    match &outcome.path {
        Some(p) => println!("Wrote {} B → {}", outcome.bytes, p.display()),
        None    => println!("No file in part, nothing written"),
    }
    Ok(())
}
