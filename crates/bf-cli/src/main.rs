//! binfit CLI

use anyhow::{Context, Result};
use bf_inference::{
    ConvergencePolicy, FitSession, PreconditionMode, SeedStrategy, SessionConfig, ToyConfig,
    ToyMode, TrustRegionConfig,
};
use bf_model::{BuildOptions, LikelihoodForm, ModelInput, ShapeEdgePolicy};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "binfit")]
#[command(about = "binfit - binned likelihood fits with toy studies")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit observed data, the Asimov dataset, or a series of toys
    Fit(FitArgs),

    /// Print version information
    Version,
}

#[derive(clap::Args)]
struct FitArgs {
    /// Input model (JSON with `card` and `shapes`)
    #[arg(short, long)]
    input: PathBuf,

    /// Output file for results (pretty JSON). Defaults to stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// -1 fits the Asimov dataset, 0 the observed data, N > 0 runs N toys
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    toys: i64,

    /// Random seed
    #[arg(long, default_value = "123456789")]
    seed: u64,

    /// Starting signal strength (0 only with --freeze-pois)
    #[arg(long, default_value = "1.0")]
    expect_signal: f64,

    /// EDM threshold of the trust-region minimizer
    #[arg(long, default_value = "1e-5")]
    tolerance: f64,

    /// EDM threshold for accepting a fit
    #[arg(long, default_value = "1e-3")]
    edm_tolerance: f64,

    /// Maximum minimizer invocations per fit
    #[arg(long, default_value = "1")]
    max_cycles: usize,

    /// Fluctuate toys around the observed data instead of the expectation
    #[arg(long)]
    bootstrap_data: bool,

    /// Randomize constraint centers for toys
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    toys_frequentist: bool,

    /// Skip the reference fit to data before frequentist toys
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    bypass_frequentist_fit: bool,

    /// Hold signal strengths at their starting value
    #[arg(long)]
    freeze_pois: bool,

    /// When to compute the whitening transform
    #[arg(long, value_enum, default_value = "once")]
    precondition: PreconditionArg,

    /// Handling of empty varied bins in shape templates
    #[arg(long, value_enum, default_value = "sentinel")]
    shape_policy: ShapePolicyArg,

    /// Keep negative nominal yields instead of clamping them to zero
    #[arg(long)]
    allow_negative_expectation: bool,

    /// Drop the nominal-expectation offset from the likelihood
    #[arg(long)]
    plain_likelihood: bool,

    /// Run toys across threads (toy i is seeded with seed + i)
    #[arg(long)]
    parallel: bool,

    /// Threads (0 = auto)
    #[arg(long, default_value = "1")]
    threads: usize,
}

#[derive(Clone, Copy, ValueEnum)]
enum PreconditionArg {
    Disabled,
    Once,
    PerToy,
}

impl From<PreconditionArg> for PreconditionMode {
    fn from(a: PreconditionArg) -> Self {
        match a {
            PreconditionArg::Disabled => PreconditionMode::Disabled,
            PreconditionArg::Once => PreconditionMode::Once,
            PreconditionArg::PerToy => PreconditionMode::PerToy,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ShapePolicyArg {
    Sentinel,
    Zero,
}

impl From<ShapePolicyArg> for ShapeEdgePolicy {
    fn from(a: ShapePolicyArg) -> Self {
        match a {
            ShapePolicyArg::Sentinel => ShapeEdgePolicy::Sentinel,
            ShapePolicyArg::Zero => ShapeEdgePolicy::Zero,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    match cli.command {
        Commands::Fit(args) => cmd_fit(&args),
        Commands::Version => {
            println!("binfit {}", bf_core::VERSION);
            Ok(())
        }
    }
}

fn session_config(args: &FitArgs) -> Result<SessionConfig> {
    if [args.tolerance, args.edm_tolerance].iter().any(|t| t.is_nan() || *t <= 0.0) {
        anyhow::bail!("tolerances must be positive");
    }
    if args.max_cycles == 0 {
        anyhow::bail!("max-cycles must be >= 1");
    }
    let mode = ToyMode::from_count(args.toys);
    Ok(SessionConfig {
        expect_signal: args.expect_signal,
        freeze_pois: args.freeze_pois,
        form: if args.plain_likelihood { LikelihoodForm::Plain } else { LikelihoodForm::Offset },
        precondition: args.precondition.into(),
        policy: ConvergencePolicy {
            max_cycles: args.max_cycles,
            edm_tolerance: args.edm_tolerance,
            ..Default::default()
        },
        trust_region: TrustRegionConfig { edm_tol: args.tolerance, ..Default::default() },
        toys: ToyConfig {
            mode,
            bootstrap_data: args.bootstrap_data,
            frequentist: args.toys_frequentist,
            bypass_frequentist_fit: args.bypass_frequentist_fit,
            seed: args.seed,
            seed_strategy: if args.parallel { SeedStrategy::PerToy } else { SeedStrategy::Shared },
        },
        ..Default::default()
    })
}

fn cmd_fit(args: &FitArgs) -> Result<()> {
    if args.threads > 0 {
        // Best-effort; if a global pool already exists, keep going.
        let _ = rayon::ThreadPoolBuilder::new().num_threads(args.threads).build_global();
    }

    tracing::info!(path = %args.input.display(), "loading model");
    let options = BuildOptions {
        shape_edge_policy: args.shape_policy.into(),
        allow_negative_expectation: args.allow_negative_expectation,
    };
    let json = std::fs::read_to_string(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;
    let model = ModelInput::from_json_str(&json)?.build(&options)?;
    tracing::info!(
        bins = model.nbins(),
        signal_strengths = model.npoi(),
        nuisances = model.nsyst(),
        "model built"
    );

    let config = session_config(args)?;
    let mode = config.toys.mode;
    let session = FitSession::new(&model, config)?;
    let records = if args.parallel { session.run_parallel()? } else { session.run()? };

    let n_converged = records.iter().filter(|r| r.converged).count();
    tracing::info!(fits = records.len(), converged = n_converged, "fits complete");

    let output_json = serde_json::json!({
        "version": bf_core::VERSION,
        "mode": mode,
        "seed": args.seed,
        "parameter_names": {
            "signal_strengths": model.table().pois(),
            "nuisances": model.table().systematics(),
        },
        "reference_point": session.reference_point(),
        "n_converged": n_converged,
        "records": records,
    });

    write_json(args.output.as_ref(), output_json)
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
