//! proppr CLI: compile, ground, train, answer and gradient.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use proppr::config::Config;
use proppr::engine::{Engine, compile_file};

#[derive(Parser)]
#[command(name = "proppr", version, about = "Probabilistic logic engine with random-walk learning")]
struct Cli {
    /// TOML configuration file; flags override its values.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Worker threads.
    #[arg(long, global = true)]
    threads: Option<usize>,

    /// Walk options, e.g. `eps=1e-5:alpha=0.2:depth=10`.
    #[arg(long, global = true)]
    apr: Option<String>,

    /// Rule program and plugin files (`.ppr`, `.wam`, `.cfacts`, `.graph`).
    #[arg(long, global = true, value_delimiter = ':')]
    programs: Vec<PathBuf>,

    /// Prover: dfs, ppr, dpr, idppr, iddpr or qpr.
    #[arg(long, global = true)]
    prover: Option<String>,

    /// Squashing function, e.g. relu or clipExp.
    #[arg(long, global = true)]
    squash: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a `.ppr` rule file to bytecode.
    Compile {
        /// Rule source.
        source: PathBuf,

        /// Bytecode output; defaults to the source with a `.wam` extension.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Ground labelled examples into sparse proof graphs.
    Ground {
        /// Example file: `query<TAB>+pos<TAB>-neg...`.
        #[arg(long)]
        queries: PathBuf,

        /// Grounded output file.
        #[arg(long)]
        grounded: PathBuf,

        /// Parameters weighting the proof walk.
        #[arg(long)]
        params: Option<PathBuf>,

        /// Keep examples without labelled solutions.
        #[arg(long)]
        include_unlabeled: bool,

        /// Log grounded node ids and their states to this file.
        #[arg(long)]
        graph_key: Option<PathBuf>,
    },

    /// Learn feature weights from a grounded file.
    Train {
        #[arg(long)]
        grounded: PathBuf,

        /// Trained parameter output.
        #[arg(long)]
        params: PathBuf,

        /// Start from these parameters instead of fresh ones.
        #[arg(long)]
        init_params: Option<PathBuf>,

        #[arg(long)]
        epochs: Option<usize>,

        /// Learner options, e.g. `mu=0.01:eta=0.5:reg=l1:schedule=lazy`.
        #[arg(long)]
        srw: Option<String>,

        /// Fixed-weight rules, `SPEC[=y|n]:SPEC...`.
        #[arg(long)]
        fixed_weights: Option<String>,

        /// Write per-epoch statistics as JSON.
        #[arg(long)]
        stats: Option<PathBuf>,
    },

    /// Rank the solutions of each query.
    Answer {
        #[arg(long)]
        queries: PathBuf,

        /// Solutions output.
        #[arg(long)]
        solutions: PathBuf,

        #[arg(long)]
        params: Option<PathBuf>,

        /// Keep only the best k solutions.
        #[arg(long)]
        top_k: Option<usize>,

        /// Report raw scores instead of normalising over solutions.
        #[arg(long)]
        unnormalized: bool,
    },

    /// Write the average loss gradient of a grounded file.
    Gradient {
        #[arg(long)]
        grounded: PathBuf,

        /// Gradient output.
        #[arg(long)]
        out: PathBuf,

        /// Parameters to differentiate at.
        #[arg(long)]
        params: Option<PathBuf>,

        #[arg(long)]
        srw: Option<String>,
    },
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = base_config(&cli)?;

    match cli.command {
        Commands::Compile { source, out } => {
            let out = out.unwrap_or_else(|| source.with_extension("wam"));
            let instructions = compile_file(&source, &out)?;
            println!("Compiled {} to {} ({instructions} instructions)", source.display(), out.display());
        }

        Commands::Ground {
            queries,
            grounded,
            params,
            include_unlabeled,
            graph_key,
        } => {
            config.include_unlabeled |= include_unlabeled;
            if graph_key.is_some() {
                config.graph_key = graph_key;
            }
            let mut engine = Engine::new(config)?;
            if let Some(params) = params {
                engine.load_params(&params)?;
            }
            let stats = engine.ground(&queries, &grounded)?;
            println!(
                "Grounded {} of {} examples into {}",
                stats.written,
                stats.examples,
                grounded.display()
            );
            println!(
                "  positives covered: {}/{}, negatives covered: {}/{}",
                stats.covered_pos, stats.total_pos, stats.covered_neg, stats.total_neg
            );
        }

        Commands::Train {
            grounded,
            params,
            init_params,
            epochs,
            srw,
            fixed_weights,
            stats,
        } => {
            if let Some(epochs) = epochs {
                config.epochs = epochs;
            }
            if let Some(srw) = srw {
                config.srw.apply_overrides(&srw)?;
            }
            if fixed_weights.is_some() {
                config.fixed_weights = fixed_weights;
            }
            let mut engine = Engine::new(config)?;
            if let Some(init) = init_params {
                engine.load_params(&init)?;
            }
            let history = engine.train(&grounded)?;
            engine.params().save(&params)?;
            if let Some(path) = stats {
                std::fs::write(&path, history.to_json()?).into_diagnostic()?;
            }
            match history.last() {
                Some(last) => println!(
                    "Trained {} epochs; final average loss {:.6}; {} parameters written to {}",
                    history.epochs.len(),
                    last.average_loss(),
                    engine.params().len(),
                    params.display()
                ),
                None => println!("No epochs ran; {} left untouched", params.display()),
            }
        }

        Commands::Answer {
            queries,
            solutions,
            params,
            top_k,
            unnormalized,
        } => {
            if top_k.is_some() {
                config.top_k = top_k;
            }
            config.normalize &= !unnormalized;
            let mut engine = Engine::new(config)?;
            if let Some(params) = params {
                engine.load_params(&params)?;
            }
            let stats = engine.answer(&queries, &solutions)?;
            println!(
                "Answered {} of {} queries into {}",
                stats.emitted,
                stats.submitted,
                solutions.display()
            );
        }

        Commands::Gradient {
            grounded,
            out,
            params,
            srw,
        } => {
            if let Some(srw) = srw {
                config.srw.apply_overrides(&srw)?;
            }
            let mut engine = Engine::new(config)?;
            if let Some(params) = params {
                engine.load_params(&params)?;
            }
            let stats = engine.gradient(&grounded, &out)?;
            println!("Gradient over {} examples written to {}", stats.emitted, out.display());
        }
    }

    Ok(())
}

/// Defaults, then the TOML file, then the global flags.
fn base_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(threads) = cli.threads {
        config.threads = threads;
    }
    if let Some(apr) = &cli.apr {
        config.apr.apply_overrides(apr)?;
    }
    if !cli.programs.is_empty() {
        config.programs = cli.programs.clone();
    }
    if let Some(prover) = &cli.prover {
        config.prover = prover.clone();
    }
    if let Some(squash) = &cli.squash {
        config.srw.squashing_function = squash.clone();
    }
    Ok(config)
}
