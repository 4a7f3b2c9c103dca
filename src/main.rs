use std::process::ExitCode;

use clap::{Parser, Subcommand};
use epics_dbr::{
    ArrayPolicy, ByteOrder, Codec, HostValue,
    dbr::{DbrType, ParseDbrTypeError},
};
use serde_json::json;
use tracing::{debug, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(version, about = "Inspect and build EPICS CA DBR records")]
struct Options {
    #[clap(subcommand)]
    command: Command,
    /// Show debug output
    #[clap(short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// List every DBR kind, with its tag and layout
    Types,
    /// Decode a hex-encoded record and print it as JSON
    Decode {
        /// DBR kind, by name (e.g. TIME_DOUBLE) or tag
        #[clap(value_parser = parse_dbr_type, id = "TYPE")]
        dbr_type: DbrType,
        /// The raw record, as hex
        hex: String,
        /// Element count. Defaults to as many as the buffer holds
        #[clap(short, long)]
        count: Option<usize>,
        /// Decode numeric arrays into packed native arrays
        #[clap(long)]
        packed: bool,
        /// Byte order of the record
        #[clap(long)]
        byte_order: Option<ByteOrder>,
    },
    /// Encode a JSON value as a write payload
    Encode {
        /// DBR kind to write, by name or tag
        #[clap(value_parser = parse_dbr_type, id = "TYPE")]
        dbr_type: DbrType,
        /// The value to write, as JSON
        json: String,
        /// Requested element count
        #[clap(short, long)]
        count: Option<usize>,
        /// Element count of the destination channel
        #[clap(long)]
        limit: Option<usize>,
        /// Byte order to write
        #[clap(long)]
        byte_order: Option<ByteOrder>,
    },
}

fn parse_dbr_type(value: &str) -> Result<DbrType, String> {
    if let Ok(tag) = value.parse::<u16>() {
        return DbrType::try_from(tag).map_err(|e| e.to_string());
    }
    value
        .parse()
        .map_err(|e: ParseDbrTypeError| e.to_string())
}

fn run(opts: Options) -> Result<(), String> {
    let mut codec = Codec::from_env();
    match opts.command {
        Command::Types => {
            for dbr_type in DbrType::all() {
                let layout = dbr_type.layout();
                println!(
                    "{:>2}  {:<20} header {:>3}  element {:>2}",
                    u16::from(dbr_type),
                    dbr_type.to_string(),
                    layout.header_size,
                    layout.unit_size
                );
            }
        }
        Command::Decode {
            dbr_type,
            hex,
            count,
            packed,
            byte_order,
        } => {
            if let Some(byte_order) = byte_order {
                codec = codec.with_byte_order(byte_order);
            }
            if packed {
                codec = codec.with_array_policy(ArrayPolicy::Packed);
            }
            let data = hex::decode(hex.trim()).map_err(|e| format!("Invalid hex: {e}"))?;
            let layout = dbr_type.layout();
            let count = count.unwrap_or_else(|| {
                data.len().saturating_sub(layout.header_size) / layout.unit_size
            });
            debug!("Decoding {} bytes as {count} x {dbr_type}", data.len());
            let record = codec
                .decode(dbr_type, count, &data)
                .map_err(|e| e.to_string())?;
            println!(
                "{}",
                serde_json::to_string_pretty(&record).map_err(|e| e.to_string())?
            );
        }
        Command::Encode {
            dbr_type,
            json,
            count,
            limit,
            byte_order,
        } => {
            if let Some(byte_order) = byte_order {
                codec = codec.with_byte_order(byte_order);
            }
            let value: serde_json::Value =
                serde_json::from_str(&json).map_err(|e| format!("Invalid JSON: {e}"))?;
            let put = codec
                .encode(dbr_type, count, &HostValue::from(value), limit)
                .map_err(|e| e.to_string())?;
            let out = json!({
                "type": put.dbr_type,
                "tag": u16::from(put.dbr_type),
                "count": put.count,
                "data": hex::encode(&put.data),
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&out).map_err(|e| e.to_string())?
            );
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let opts = Options::parse();

    let filter = EnvFilter::builder()
        .with_default_directive(
            match opts.verbose {
                0 => LevelFilter::INFO,
                1 => LevelFilter::DEBUG,
                2.. => LevelFilter::TRACE,
            }
            .into(),
        )
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(opts) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
