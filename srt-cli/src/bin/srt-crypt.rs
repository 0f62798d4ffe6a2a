//! SRT Crypt - encrypt or decrypt a stream through an SRT crypto context
//!
//! Reads from stdin or a file and writes length-prefixed packet records
//! (standalone framing, keying material inline) or the recovered plaintext.

use anyhow::Context;
use clap::{Parser, Subcommand};
use srt_cli::{display_crypto_stats, read_record, write_record, CipherName, CryptConfig};
use srt_crypto::{Direction, RxOutput, SessionContext, MAX_TX_SEGMENTS};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "srt-crypt")]
#[command(about = "SRT packet encryption tool", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encrypt a byte stream into packet records
    Encrypt(StreamArgs),
    /// Decrypt packet records back into the byte stream
    Decrypt(StreamArgs),
    /// Print an example configuration file
    ExampleConfig,
}

#[derive(clap::Args, Debug)]
struct StreamArgs {
    /// Input: file path or '-' for stdin
    #[arg(short, long, default_value = "-")]
    input: String,

    /// Output: file path or '-' for stdout
    #[arg(short, long, default_value = "-")]
    output: String,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Passphrase (overrides the configuration file)
    #[arg(short, long)]
    passphrase: Option<String>,

    /// Cipher (ctr, cbc, gcm; overrides the configuration file)
    #[arg(long)]
    cipher: Option<String>,

    /// Skip the statistics summary on exit
    #[arg(long)]
    no_stats: bool,
}

fn load_config(args: &StreamArgs) -> anyhow::Result<CryptConfig> {
    let mut config = match &args.config {
        Some(path) => CryptConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => CryptConfig::default(),
    };

    if let Some(passphrase) = &args.passphrase {
        config.passphrase = Some(passphrase.clone());
        config.preshared_key = None;
    }
    if let Some(cipher) = &args.cipher {
        config.cipher = match cipher.to_ascii_lowercase().as_str() {
            "ctr" => CipherName::Ctr,
            "cbc" => CipherName::Cbc,
            "gcm" => CipherName::Gcm,
            other => anyhow::bail!("Unknown cipher '{}' (expected ctr, cbc or gcm)", other),
        };
    }
    Ok(config)
}

fn create_input_reader(input: &str) -> anyhow::Result<Box<dyn Read>> {
    if input == "-" {
        tracing::debug!("Reading from stdin");
        Ok(Box::new(BufReader::new(io::stdin())))
    } else {
        tracing::debug!("Reading from {}", input);
        Ok(Box::new(BufReader::new(File::open(input)?)))
    }
}

fn create_output_writer(output: &str) -> anyhow::Result<Box<dyn Write>> {
    if output == "-" {
        Ok(Box::new(BufWriter::new(io::stdout())))
    } else {
        tracing::debug!("Writing to {}", output);
        Ok(Box::new(BufWriter::new(File::create(output)?)))
    }
}

/// Fill `buf` from `reader`, stopping early only at end of input
fn read_chunk<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn encrypt(args: &StreamArgs) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let session = config.to_session_config(Direction::Tx)?;
    let mut tx = SessionContext::new(session)?;

    let mut reader = create_input_reader(&args.input)?;
    let mut writer = create_output_writer(&args.output)?;
    let mut chunk = vec![0u8; config.payload_size];
    let start = Instant::now();

    loop {
        let n = read_chunk(&mut reader, &mut chunk)?;
        if n == 0 {
            tracing::info!("End of input reached");
            break;
        }

        let now = Instant::now();
        for km in tx.tx_manage_keys(now)? {
            tracing::debug!(
                "Writing KM for {:?} key generation {}",
                km.parity,
                km.generation
            );
            write_record(&mut writer, &km.to_bytes())?;
        }

        let segments = tx.tx_process(&chunk[..n], now, MAX_TX_SEGMENTS)?;
        for segment in segments.iter() {
            write_record(&mut writer, segment)?;
        }
    }
    writer.flush()?;

    let stats = tx.close();
    tracing::info!(
        "Encrypted {} packets ({} bytes)",
        stats.packets_encrypted,
        stats.bytes_encrypted
    );
    if !args.no_stats {
        display_crypto_stats("SRT CRYPT - ENCRYPT", &stats, start.elapsed());
    }
    Ok(())
}

fn decrypt(args: &StreamArgs) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let session = config.to_session_config(Direction::Rx)?;
    let mut rx = SessionContext::new(session)?;

    let mut reader = create_input_reader(&args.input)?;
    let mut writer = create_output_writer(&args.output)?;
    let mut record = Vec::new();
    let start = Instant::now();

    while read_record(&mut reader, &mut record)? {
        match rx.rx_process(&mut record) {
            Ok(RxOutput::Payload(plain)) => writer.write_all(plain)?,
            Ok(RxOutput::KeyingMaterial(installed)) => {
                tracing::debug!("Keying material: {:?}", installed);
            }
            Err(e) if e.is_fatal() => return Err(e).context("decrypting stream"),
            Err(e) => tracing::warn!("Dropping packet: {}", e),
        }
    }
    writer.flush()?;

    let stats = rx.close();
    tracing::info!(
        "Decrypted {} packets ({} bytes), dropped {}",
        stats.packets_decrypted,
        stats.bytes_decrypted,
        stats.packets_dropped()
    );
    if !args.no_stats {
        display_crypto_stats("SRT CRYPT - DECRYPT", &stats, start.elapsed());
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    match &args.command {
        Command::Encrypt(stream) => encrypt(stream),
        Command::Decrypt(stream) => decrypt(stream),
        Command::ExampleConfig => {
            let example = toml::to_string_pretty(&CryptConfig::example())?;
            print!("{}", example);
            Ok(())
        }
    }
}
