use std::{fs::File, io::BufReader, path::PathBuf};

use clap::Parser;

use gpsd_dispatch::{
    error::GpsdError,
    protocol::{SentenceDecode, v3::SentenceKind},
};
use tracing_subscriber::EnvFilter;

/// Decodes a recorded gpsd JSON log and prints one summary line per record
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path of the log, one JSON sentence per line
    path: PathBuf,
    /// Only print records of this class (e.g. GST)
    #[arg(short, long)]
    class: Option<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let filter = args.class.as_deref().map(|class| {
        SentenceKind::from_class(class).unwrap_or_else(|| {
            eprintln!("unsupported class {class}");
            std::process::exit(2);
        })
    });

    let mut reader = BufReader::new(File::open(&args.path).unwrap());
    let mut buf = String::new();
    let (mut decoded, mut skipped) = (0usize, 0usize);

    loop {
        match reader.read_record(&mut buf) {
            Ok(Some(record)) => {
                decoded += 1;
                if filter.is_none_or(|kind| kind == record.kind()) {
                    println!("{}", serde_json::to_string(&record).unwrap());
                }
            }
            Ok(None) => break,
            Err(GpsdError::Decode(e)) => {
                skipped += 1;
                tracing::warn!(error = %e, line = buf.trim_end(), "skipping line");
            }
            Err(e) => {
                eprintln!("Error reading log: {e}");
                return;
            }
        }
    }

    eprintln!("{decoded} records decoded, {skipped} lines skipped");
}
