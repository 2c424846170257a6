//! `gobake SOURCE DEST`: bake a Go `js/wasm` module so it starts at
//! `main.main`, writing the rewritten module, its JavaScript glue and an
//! optional JSON report.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use gobake::{BakeOptions, BakeReport, Baker};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "gobake")]
#[command(about = "Pre-run a Go js/wasm module up to main.main and snapshot it.", long_about = None)]
struct Cli {
    /// Module to bake.
    source: PathBuf,
    /// Where to write the baked module.
    dest: PathBuf,
    /// Program argument, repeatable. The first is the program name; defaults
    /// to DEST.
    #[arg(long = "arg", value_name = "ARG")]
    args: Vec<String>,
    /// Environment entry as NAME=VALUE, repeatable.
    #[arg(long = "env", value_name = "NAME=VALUE")]
    env: Vec<String>,
    /// Write the glue here instead of printing it.
    #[arg(long, value_name = "PATH")]
    glue: Option<PathBuf>,
    /// Write a JSON bake report here.
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,
    /// Log level; RUST_LOG takes precedence.
    #[arg(
        long,
        default_value = "info",
        value_parser = ["error", "warn", "info", "debug", "trace"]
    )]
    log_level: String,
}

fn main() -> Result<()> {
    try_main().map_err(|err| {
        eprintln!("{err:#}");
        err
    })
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);
    let started = Instant::now();

    let original = fs::read(&cli.source)
        .with_context(|| format!("failed to read {}", cli.source.display()))?;
    let module = gobake_codec::decode(&original)
        .with_context(|| format!("failed to decode {}", cli.source.display()))?;

    let baker = Baker::new(options(&cli));
    let baked = baker.bake(module).context("bake failed")?;
    let baked_bytes = baked.encode().context("failed to encode the baked module")?;

    // Bake the result again to measure how much startup work is left.
    let rebaked = gobake_codec::decode(&baked_bytes)
        .map_err(anyhow::Error::from)
        .and_then(|module| Ok(baker.bake(module)?))
        .context("baking the baked module again failed")?;

    let report = BakeReport::new(&baked, original.len(), baked_bytes.len(), started.elapsed())
        .with_rebake(&rebaked);
    tracing::info!(
        target: "gobake",
        original_size = report.original_size,
        baked_size = report.baked_size,
        reduction = %format!("{}%", report.size_reduction_percent),
        instructions_before = report.instructions_before,
        instructions_after = ?report.instructions_after,
        host_calls = report.host_calls,
        folded_pre_calls = report.folded_pre_calls,
        elapsed_ms = report.elapsed_ms,
        "baked"
    );
    for name in &report.initializers_cleared {
        tracing::info!(target: "gobake", %name, "cleared initializer");
    }

    write(&cli.dest, &baked_bytes)?;
    if let Some(path) = &cli.report {
        let json = serde_json::to_string_pretty(&report).context("failed to serialize report")?;
        write(path, json.as_bytes())?;
    }
    let glue = baked.glue();
    match &cli.glue {
        Some(path) => write(path, glue.as_bytes())?,
        None => println!("{glue}"),
    }
    Ok(())
}

fn options(cli: &Cli) -> BakeOptions {
    let args = if cli.args.is_empty() {
        vec![cli.dest.display().to_string()]
    } else {
        cli.args.clone()
    };
    cli.env
        .iter()
        .fold(BakeOptions::new(args), |options, entry| options.with_env_entry(entry))
}

fn write(path: &Path, bytes: &[u8]) -> Result<()> {
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_name_defaults_to_dest() {
        let cli = Cli::parse_from(["gobake", "in.wasm", "out.wasm", "--env", "HOME=/", "--env", "EMPTY"]);
        let options = options(&cli);
        assert_eq!(options.args, vec!["out.wasm"]);
        assert_eq!(options.env.get("HOME").map(String::as_str), Some("/"));
        assert_eq!(options.env.get("EMPTY").map(String::as_str), Some(""));
    }

    #[test]
    fn explicit_args_are_kept_in_order() {
        let cli = Cli::parse_from(["gobake", "in.wasm", "out.wasm", "--arg", "prog", "--arg", "-v"]);
        assert_eq!(options(&cli).args, vec!["prog", "-v"]);
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn unknown_log_levels_are_rejected() {
        assert!(Cli::try_parse_from(["gobake", "a", "b", "--log-level", "loud"]).is_err());
    }
}
