use crate::{
    config::Config,
    engine::Converter,
    format::Format,
    util::{default_output_path, ensure_dir},
};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "filemorph")]
#[command(about = "Convert files between formats with ImageMagick, LibreOffice and Ghostscript")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./filemorph.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Convert one file.
    Convert {
        #[arg(long)]
        input: PathBuf,
        /// Source format; defaults to the input extension.
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: String,
        /// Defaults to `paths.out_dir/{stem}.{ext}`.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// List supported conversions.
    List {},
    /// Probe external tools.
    Doctor {},
}

/// Returns whether the command succeeded.
pub fn dispatch(args: Args) -> Result<bool> {
    let cfg_path = resolve_config_path(args.config.as_deref());
    let cfg = Config::load(&cfg_path)?;
    let _guard = init_logging(&args, &cfg)?;

    let converter = Converter::new(cfg.clone()).map_err(|e| anyhow!("{e}"))?;

    match &args.cmd {
        Command::Convert {
            input,
            from,
            to,
            output,
        } => convert(&cfg, &converter, input, from.as_deref(), to, output.as_deref()),
        Command::List {} => {
            let pairs: Vec<_> = converter
                .list_supported_conversions()
                .into_iter()
                .map(|p| serde_json::json!({"source": p.source, "target": p.target}))
                .collect();
            println!("{}", serde_json::to_string_pretty(&pairs)?);
            Ok(true)
        }
        Command::Doctor {} => {
            let entries = converter.doctor();
            println!("{}", serde_json::to_string_pretty(&entries)?);
            Ok(entries.iter().all(|e| e.available))
        }
    }
}

fn convert(
    cfg: &Config,
    converter: &Converter,
    input: &Path,
    from: Option<&str>,
    to: &str,
    output: Option<&Path>,
) -> Result<bool> {
    let source = match from {
        Some(f) => f.to_string(),
        None => Format::from_path(input)
            .map(|f| f.to_string())
            .ok_or_else(|| {
                anyhow!("cannot infer source format of {}; pass --from", input.display())
            })?,
    };
    let target = Format::parse(to).ok_or_else(|| anyhow!("unknown target format: {to}"))?;

    let output = match output {
        Some(p) => p.to_path_buf(),
        None => {
            let out_dir = PathBuf::from(&cfg.paths.out_dir);
            ensure_dir(&out_dir)?;
            default_output_path(&out_dir, input, target)
        }
    };

    let outcome = converter.convert(input, &source, to, &output);
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(outcome.succeeded)
}

fn resolve_config_path(user: Option<&Path>) -> PathBuf {
    if let Some(p) = user {
        return p.to_path_buf();
    }
    let default = PathBuf::from("filemorph.toml");
    if default.exists() {
        default
    } else {
        PathBuf::from("filemorph.example.toml")
    }
}

fn init_logging(args: &Args, cfg: &Config) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries command results; logs go to stderr.
    let console_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = match resolve_log_path(cfg) {
        Some(path) => {
            let parent = path.parent().unwrap_or_else(|| Path::new("."));
            ensure_dir(parent)?;
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("open log file: {}", path.display()))?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn resolve_log_path(cfg: &Config) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }
    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }
    Some(PathBuf::from(&cfg.paths.out_dir).join("filemorph.log"))
}
