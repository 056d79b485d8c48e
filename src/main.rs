//! tomo-operators - run operator scripts from the command line
//!
//! Runs one operator over a synthetic volume through the pipeline runner
//! and prints whatever the operator hands back to the main thread.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use crossbeam_channel::{bounded, select};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tomo_operators::{
    config::{default_config_path, CoreConfig},
    data::ImageData,
    scripting::builtins,
    DataHandle, Interpreter, Operator, PipelineEvent, PipelineRunner, PipelineSink,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Run and check tomographic operator scripts
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (TOML or JSON); defaults to the platform config dir
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, value_name = "FILE", global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an operator over a synthetic ramp volume
    Run {
        /// Operator script file
        #[arg(short, long, value_name = "FILE", conflicts_with = "builtin")]
        script: Option<PathBuf>,

        /// Built-in operator label (see `builtins`)
        #[arg(short, long)]
        builtin: Option<String>,

        /// Descriptor JSON file
        #[arg(short, long, value_name = "FILE")]
        descriptor: Option<PathBuf>,

        /// Volume dimensions as x,y,z
        #[arg(long, default_value = "16,16,16", value_parser = parse_dims)]
        dims: [usize; 3],

        /// Operator label
        #[arg(short, long, default_value = "Operator")]
        label: String,
    },

    /// Compile and bind a script without running it
    Check {
        /// Operator script file
        #[arg(short, long, value_name = "FILE")]
        script: PathBuf,
    },

    /// List the built-in operators
    Builtins,

    /// Print the effective configuration, optionally saving it
    Config {
        /// Write the configuration to this path
        #[arg(long, value_name = "FILE")]
        save: Option<PathBuf>,
    },
}

fn parse_dims(s: &str) -> Result<[usize; 3], String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    let &[x, y, z] = parts.as_slice() else {
        return Err(format!("expected x,y,z, got '{}'", s));
    };
    let parse = |v: &str| {
        v.parse::<usize>()
            .map_err(|e| format!("invalid dimension '{}': {}", v, e))
    };
    Ok([parse(x)?, parse(y)?, parse(z)?])
}

/// Prints attached outputs.
struct PrintSink;

impl PipelineSink for PrintSink {
    fn attach_result(&mut self, name: &str, data: DataHandle) {
        println!("result '{}': {}", name, data);
    }

    fn attach_child_dataset(&mut self, label: &str, data: DataHandle) {
        println!("child dataset '{}': {}", label, data);
    }
}

fn init_logging(
    log_file: Option<&Path>,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = || {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,tomo_operators=debug"))
    };

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|d| !d.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let name = path.file_name().context("log file path has no file name")?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(filter()))
        .with(file_layer)
        .init();

    Ok(guard)
}

fn ramp_volume(dims: [usize; 3]) -> anyhow::Result<DataHandle> {
    let mut image = ImageData::new(dims)?;
    for (i, v) in image.scalars_mut().iter_mut().enumerate() {
        *v = i as f64;
    }
    Ok(DataHandle::from_image(image))
}

fn run(config: &CoreConfig, mut operator: Operator, dims: [usize; 3]) -> anyhow::Result<()> {
    let (wake_tx, wake_rx) = bounded::<()>(1);
    operator.set_waker(Some(Arc::new(move || {
        let _ = wake_tx.try_send(());
    })));

    let input = ramp_volume(dims)?;
    tracing::info!("Running '{}' over {}", operator.label(), input);

    let runner = PipelineRunner::new(config.pipeline.clone());
    let handle = runner.run(vec![operator.transformer()], input)?;
    let mut sink = PrintSink;

    loop {
        select! {
            recv(handle.events()) -> event => match event {
                Ok(PipelineEvent::Progress { value, maximum, .. }) if maximum > 0 => {
                    tracing::debug!("progress {}/{}", value, maximum);
                }
                Ok(PipelineEvent::Progress { .. }) => {}
                Ok(event) => tracing::info!("{:?}", event),
                Err(_) => break,
            },
            recv(wake_rx) -> _ => {
                operator.process_deliveries(&mut sink)?;
            }
        }
    }

    let summary = handle.wait()?;
    operator.process_deliveries(&mut sink)?;
    println!("output: {}", summary.output);

    if let Some(failure) = summary.failures.first() {
        bail!("{}", failure);
    }
    if summary.canceled {
        bail!("run canceled");
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.log_file.as_deref())?;

    let config = CoreConfig::load_or_default(cli.config.as_deref());
    Interpreter::init_global(&config.interpreter);

    match cli.command {
        Commands::Run {
            script,
            builtin,
            descriptor,
            dims,
            label,
        } => {
            let mut operator = Operator::new(label);
            let (source, builtin_descriptor) = match (script, builtin) {
                (Some(path), _) => (
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?,
                    None,
                ),
                (None, Some(name)) => {
                    let Some(found) = builtins::find(&name) else {
                        bail!("no built-in operator named '{}'", name);
                    };
                    operator.set_label(found.label);
                    (found.script.to_string(), Some(found.descriptor))
                }
                (None, None) => bail!("either --script or --builtin is required"),
            };

            let descriptor = match descriptor {
                Some(path) => Some(
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?,
                ),
                None => builtin_descriptor.map(str::to_string),
            };
            if let Some(text) = descriptor {
                operator.set_json_description(text)?;
            }
            operator.set_script(source)?;

            run(&config, operator, dims)?;
        }
        Commands::Check { script } => {
            let source = std::fs::read_to_string(&script)
                .with_context(|| format!("failed to read {}", script.display()))?;
            let mut operator = Operator::new(script.display().to_string());
            operator.set_script(source)?;
            println!(
                "ok: bound, {}",
                if operator.supports_cancel() {
                    "cancelable"
                } else {
                    "not cancelable"
                }
            );
        }
        Commands::Builtins => {
            for builtin in builtins::all() {
                println!("{}", builtin.label);
            }
        }
        Commands::Config { save } => {
            print!("{}", toml::to_string_pretty(&config)?);
            if let Some(path) = save {
                config.save(&path)?;
                println!("# saved to {}", path.display());
            } else if let Some(path) = default_config_path() {
                println!("# default location: {}", path.display());
            }
        }
    }

    Ok(())
}
