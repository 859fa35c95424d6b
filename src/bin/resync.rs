//! One-shot mirror resync.
//!
//! Usage:
//!   cargo run --bin resync -- --force          full resync, ignoring the debounce
//!   cargo run --bin resync -- --backfill       pull markets missing from the mirror
//!   cargo run --bin resync -- --market 12      refresh one market (fallback RPC on error)
//!
//! With no flags a regular full resync runs. Prints the result as JSON.

use anyhow::{bail, Context, Result};
use ledgersync::runtime;

enum Mode {
    Full { force: bool },
    Backfill,
    Market(u64),
}

fn parse_args(args: &[String]) -> Result<Mode> {
    let mut mode = Mode::Full { force: false };
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--force" => mode = Mode::Full { force: true },
            "--backfill" => mode = Mode::Backfill,
            "--market" => {
                let raw = iter.next().context("--market needs an id")?;
                let id = raw
                    .parse()
                    .with_context(|| format!("invalid market id: {raw}"))?;
                mode = Mode::Market(id);
            }
            other => bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mode = parse_args(&args)?;

    let config = runtime::load_config()?;
    runtime::init_logging(&config.logging);

    let primary = runtime::connect_transport(&config).await?;
    let sync = runtime::build_sync(&config, primary).await?;

    let output = match mode {
        Mode::Full { force } => match sync.full_resync(force).await? {
            Some(report) => serde_json::to_value(report)?,
            None => serde_json::json!({ "skipped": "debounced" }),
        },
        Mode::Backfill => serde_json::to_value(sync.backfill_from_mirror().await?)?,
        Mode::Market(id) => serde_json::to_value(sync.single_market_resync(id).await?)?,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
