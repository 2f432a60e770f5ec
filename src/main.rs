use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn, Level};
use zlmfit::pipeline;
use zlmfit::prelude::*;
use zlmfit::store::StoreError;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// TOML file describing the waves, binning and fit phases
    #[arg(long, default_value = "zlmfit.toml")]
    config: PathBuf,

    /// Parquet file of data events
    #[arg(long)]
    data: PathBuf,

    /// Parquet file of accepted Monte Carlo events
    #[arg(long)]
    accmc: PathBuf,

    /// Parquet file of generated Monte Carlo events, binned alongside the data
    #[arg(long)]
    genmc: Option<PathBuf>,

    /// Read the beam four-momentum from the beam columns instead of a polarization vector
    #[arg(long)]
    unpolarized: bool,

    /// Output file (must end in .zlmfit)
    #[arg(short, long, default_value = "fit.zlmfit")]
    output: PathBuf,

    /// Replace an existing output file
    #[arg(long)]
    overwrite: bool,

    /// More logging (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Args {
    fn level(&self) -> Level {
        if self.quiet {
            return Level::ERROR;
        }
        match self.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }
}

/// Loads and validates every input, then clears the previous output when asked to. Nothing is
/// removed unless the run is ready to start.
fn prepare(
    args: &Args,
    token: CancellationToken,
) -> Result<(FitOrchestrator, OutputStore), Error> {
    let config = FitConfig::from_path(&args.config)?;
    let polarized = !args.unpolarized;
    info!("Reading data from {}", args.data.display());
    let data = Arc::new(Dataset::from_parquet(&args.data, polarized)?);
    info!("Reading accepted Monte Carlo from {}", args.accmc.display());
    let accmc = Arc::new(Dataset::from_parquet(&args.accmc, polarized)?);

    let mut orchestrator = FitOrchestrator::new(config, data, accmc)?
        .with_progress(LogProgress)
        .with_token(token);
    if let Some(genmc) = &args.genmc {
        info!("Reading generated Monte Carlo from {}", genmc.display());
        let genmc = Arc::new(Dataset::from_parquet(genmc, polarized)?);
        orchestrator = orchestrator.with_genmc(genmc)?;
        for (bin, acceptance) in orchestrator.acceptance().iter().enumerate() {
            match acceptance {
                Some(acceptance) => info!("Bin {bin}: acceptance {acceptance:.4}"),
                None => warn!("Bin {bin}: no generated events"),
            }
        }
    }

    if args.overwrite {
        if let Err(e) = std::fs::remove_file(&args.output) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(StoreError::from(e).into());
            }
        }
    }
    Ok((orchestrator, OutputStore::new(&args.output)))
}

fn run(args: &Args) -> Result<pipeline::PipelineSummary, Error> {
    let token = CancellationToken::new();
    let handler_token = token.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_token.cancel()) {
        error!("Could not install the Ctrl-C handler: {e}");
    }
    let (orchestrator, store) = prepare(args, token)?;
    pipeline::spawn(Arc::new(orchestrator), Arc::new(store))
        .join()
        .map_err(|_| Error::Panicked)?
}

fn main() -> ExitCode {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(args.level())
        .with_target(false)
        .init();

    if args.output.extension().and_then(|ext| ext.to_str()) != Some("zlmfit") {
        error!("Output file {} must end in .zlmfit", args.output.display());
        return ExitCode::FAILURE;
    }
    if args.output.exists() && !args.overwrite {
        error!(
            "Output file {} exists (pass --overwrite to replace it)",
            args.output.display()
        );
        return ExitCode::FAILURE;
    }
    match run(&args) {
        Ok(summary) => {
            info!(
                "{}/{} bins fitted, bootstrap: {:?}, MCMC: {:?}",
                summary.fitted, summary.n_bins, summary.bootstrapped, summary.sampled
            );
            if summary.cancelled {
                info!("Run was cancelled; completed bins were saved");
                ExitCode::from(130)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const ONE_WAVE: &str = r#"
[waves]
positive = ["0+0+"]
positive_anchor = 0
"#;

    fn args(dir: &std::path::Path) -> Args {
        Args {
            config: dir.join("zlmfit.toml"),
            data: dir.join("data.parquet"),
            accmc: dir.join("accmc.parquet"),
            genmc: None,
            unpolarized: false,
            output: dir.join("fit.zlmfit"),
            overwrite: true,
            verbose: 0,
            quiet: false,
        }
    }

    #[test]
    fn overwrite_keeps_output_when_inputs_fail() {
        let dir = tempdir().unwrap();
        let args = args(dir.path());
        fs::write(&args.output, b"previous results").unwrap();

        let result = prepare(&args, CancellationToken::new());
        assert!(matches!(result, Err(Error::Configuration(_))));
        assert_eq!(fs::read(&args.output).unwrap(), b"previous results");

        fs::write(&args.config, ONE_WAVE).unwrap();
        let result = prepare(&args, CancellationToken::new());
        assert!(matches!(result, Err(Error::Dataset(_))));
        assert_eq!(fs::read(&args.output).unwrap(), b"previous results");
    }

    #[test]
    fn arguments_parse() {
        let args = Args::try_parse_from([
            "zlmfit",
            "--data",
            "d.parquet",
            "--accmc",
            "a.parquet",
            "--genmc",
            "g.parquet",
            "-vv",
        ])
        .unwrap();
        assert_eq!(args.genmc, Some(PathBuf::from("g.parquet")));
        assert_eq!(args.output, PathBuf::from("fit.zlmfit"));
        assert_eq!(args.level(), Level::TRACE);
    }
}
