//! # Main — CLI Wrapper Around the Sieve Drivers
//!
//! Thin diagnostic front end: parse a hex starting value, pick the search
//! type and table tier, run the selected driver for `--count` survivors, and
//! report the stream plus summary statistics (elapsed time, skipped ratio,
//! SHA-512 digest of the big-endian survivor stream). The real consumers of
//! this crate call [`simdsieve::drive`] in-process and feed survivors to
//! their own probable-prime test; nothing here is needed for that.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use rug::Integer;
use serde::Serialize;
use sha2::{Digest, Sha512};
use std::time::Instant;

use simdsieve::{drive, Mode, PrimeType, State, TableTier};

#[derive(Parser)]
#[command(name = "simdsieve", about = "Trial-division sieve for primality search")]
struct Cli {
    /// Starting value in hex ('0x' prefix optional); must be odd.
    start: String,

    /// Search type: candidates alone, twin pairs (Q, Q+2), or safe-prime
    /// pairs (Q, 2Q+1).
    #[arg(long, value_enum, default_value = "plain")]
    mode: SearchKind,

    /// Number of small primes to trial-divide against (576, 1856, or 3456).
    #[arg(long, env = "PRIMES", default_value_t = 3456)]
    primes: u32,

    /// How many survivors to collect before stopping.
    #[arg(long, default_value_t = 1000)]
    count: usize,

    /// Emit a JSON report instead of text output.
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SearchKind {
    Plain,
    Twin,
    Safe,
}

impl From<SearchKind> for PrimeType {
    fn from(kind: SearchKind) -> Self {
        match kind {
            SearchKind::Plain => PrimeType::Plain,
            SearchKind::Twin => PrimeType::Twin,
            SearchKind::Safe => PrimeType::Safe,
        }
    }
}

#[derive(Serialize)]
struct Report {
    start: String,
    mode: &'static str,
    primes: usize,
    survivors: Vec<String>,
    elapsed_ms: f64,
    sha512: String,
    skipped_ratio: Option<f64>,
    skipped_ppm: Option<u64>,
}

fn tier_for(primes: u32) -> Result<TableTier> {
    Ok(match primes {
        576 => TableTier::S,
        1856 => TableTier::M,
        3456 => TableTier::L,
        other => bail!("unsupported prime count {other} (use 576, 1856, or 3456)"),
    })
}

fn parse_start(text: &str) -> Result<Integer> {
    let hex = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .or_else(|| text.strip_prefix('x'))
        .or_else(|| text.strip_prefix('X'))
        .unwrap_or(text);
    Integer::from_str_radix(hex, 16).with_context(|| format!("bad hex value {text:?}"))
}

/// SHA-512 over the survivors serialized as big-endian 64-bit words.
fn digest_stream(survivors: &[u64]) -> String {
    let mut hasher = Sha512::new();
    for &lsb in survivors {
        hasher.update(lsb.to_be_bytes());
    }
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn main() -> Result<()> {
    // Structured logging: LOG_FORMAT=json for machines, human-readable
    // on stderr otherwise.
    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt().json().with_target(false).init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    let cli = Cli::parse();
    let tier = tier_for(cli.primes)?;
    let q = parse_start(&cli.start)?;
    let mode = Mode::new(cli.mode.into(), tier);

    let mut state = State::new(&q, mode)?;
    tracing::info!(
        start_bits = q.significant_bits(),
        primes = tier.primes(),
        kind = PrimeType::from(cli.mode).name(),
        "starting search"
    );

    let mut survivors = vec![0u64; cli.count];
    let started = Instant::now();
    let last = drive(&mut state, &mut survivors);
    let elapsed = started.elapsed();
    tracing::info!(
        count = cli.count,
        last = format_args!("{last:#018x}"),
        elapsed_ms = elapsed.as_secs_f64() * 1e3,
        "search finished"
    );

    // Distance actually covered vs. the 6-per-candidate minimum; ignores the
    // lead-in before the first survivor, irrelevant for long streams.
    let stats = match (survivors.first(), survivors.last()) {
        (Some(&first), Some(&stop)) if stop > first && cli.count > 1 => {
            let span = stop - first;
            let ratio = span as f64 / (6.0 * cli.count as f64);
            let ppm = 1_000_000u64.saturating_sub(6_000_000 * cli.count as u64 / span);
            Some((ratio, ppm))
        }
        _ => None,
    };

    let digest = digest_stream(&survivors);

    if cli.json {
        let report = Report {
            start: q.to_string_radix(16),
            mode: PrimeType::from(cli.mode).name(),
            primes: tier.primes(),
            survivors: survivors.iter().map(|s| format!("{s:016x}")).collect(),
            elapsed_ms: elapsed.as_secs_f64() * 1e3,
            sha512: digest,
            skipped_ratio: stats.map(|(ratio, _)| ratio),
            skipped_ppm: stats.map(|(_, ppm)| ppm),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for (i, lsb) in survivors.iter().enumerate() {
            println!("adv[{i}]=x{lsb:016x}");
        }
        if let Some((ratio, ppm)) = stats {
            println!("## SKIPPED.RATIO=1:{ratio:.2}");
            println!("## SKIPPED.PPM={ppm}");
        }
        println!("## SHA512={digest}");
    }

    Ok(())
}
