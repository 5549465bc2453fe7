//! Engine facade: top-level API for proppr.
//!
//! The `Engine` owns the loaded rule program, its plugins and the live
//! parameter vector, and runs the grounding, answering, training and
//! gradient stages against them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::answer::QueryAnswerer;
use crate::config::Config;
use crate::error::{ProResult, ProgramError};
use crate::ground::{Grounder, GroundingStats};
use crate::learn::{GradientFinder, ParamVector, Trainer, TrainingStatistics};
use crate::logic::parse_rules;
use crate::pipeline::{Pipeline, PipelineStats};
use crate::plugins::{PluginRegistry, WamPlugin, read_source};
use crate::prove::{Prover, ProverRegistry, Weighter};
use crate::squash::SquashingFunction;
use crate::wam::{WamProgram, compile_rules};

/// The proppr inference and learning engine.
pub struct Engine {
    config: Config,
    program: Arc<WamProgram>,
    plugins: Vec<Arc<dyn WamPlugin>>,
    params: Arc<ParamVector>,
}

impl Engine {
    /// Validate `config` and load every file in `config.programs`.
    pub fn new(config: Config) -> ProResult<Self> {
        config.validate()?;
        let (program, plugins) = load_programs(&config.programs)?;
        tracing::info!(
            instructions = program.len(),
            plugins = plugins.len(),
            prover = %config.prover,
            threads = config.worker_threads(),
            "initializing proppr engine"
        );
        Ok(Self::from_parts(config, program, plugins))
    }

    /// Assemble an engine from an already loaded program.
    pub fn from_parts(config: Config, program: WamProgram, plugins: Vec<Arc<dyn WamPlugin>>) -> Self {
        Self {
            config,
            program: Arc::new(program),
            plugins,
            params: Arc::new(ParamVector::new()),
        }
    }

    /// Replace the live parameters.
    pub fn with_params(mut self, params: ParamVector) -> Self {
        self.params = Arc::new(params);
        self
    }

    /// Load the live parameters from a parameter file.
    pub fn load_params(&mut self, path: &Path) -> ProResult<()> {
        let params = ParamVector::load(path)?;
        tracing::info!(path = %path.display(), features = params.len(), "loaded parameters");
        self.params = Arc::new(params);
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn program(&self) -> &Arc<WamProgram> {
        &self.program
    }

    pub fn plugins(&self) -> &[Arc<dyn WamPlugin>] {
        &self.plugins
    }

    pub fn params(&self) -> &ParamVector {
        &self.params
    }

    /// The configured prover, weighting edges by the live parameters.
    pub fn prover(&self) -> ProResult<Box<dyn Prover>> {
        let squash = SquashingFunction::by_name(&self.config.srw.squashing_function)?;
        ProverRegistry::with_defaults().build(
            &self.config.prover,
            &self.config.apr,
            Weighter::new(Arc::clone(&self.params), squash),
        )
    }

    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(
            self.config.worker_threads(),
            self.config.throttle_limit(),
            self.config.maintain_order,
        )
    }

    /// Ground the examples in `data` into `grounded` (and its `.features` file).
    pub fn ground(&self, data: &Path, grounded: &Path) -> ProResult<GroundingStats> {
        let mut grounder = Grounder::new(Arc::clone(&self.program), self.plugins.clone())
            .with_include_unlabeled(self.config.include_unlabeled);
        if let Some(key) = &self.config.graph_key {
            grounder = grounder.with_graph_key(key)?;
        }
        grounder.ground_file(self.prover()?.as_ref(), &self.pipeline(), data, grounded)?;
        Ok(grounder.statistics().snapshot())
    }

    /// Answer every query in `queries` and write the ranked solutions.
    pub fn answer(&self, queries: &Path, solutions: &Path) -> ProResult<PipelineStats> {
        QueryAnswerer::new(Arc::clone(&self.program), self.plugins.clone())
            .with_normalize(self.config.normalize)
            .with_top_k(self.config.top_k)
            .answer_file(self.prover()?.as_ref(), &self.pipeline(), queries, solutions)
    }

    /// Train the live parameters on a grounded file.
    pub fn train(&self, grounded: &Path) -> ProResult<TrainingStatistics> {
        Trainer::from_config(&self.config)?.train(grounded, &self.params)
    }

    /// Write the average loss gradient of a grounded file at the live parameters.
    pub fn gradient(&self, grounded: &Path, out: &Path) -> ProResult<PipelineStats> {
        GradientFinder::from_config(&self.config)?.write(grounded, &self.params, out)
    }

    pub fn info(&self) -> EngineInfo {
        EngineInfo {
            instructions: self.program.len(),
            plugins: self.plugins.iter().map(|p| p.about()).collect(),
            params: self.params.len(),
            prover: self.config.prover.clone(),
            learner: self.config.srw.learner.clone(),
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("instructions", &self.program.len())
            .field("plugins", &self.plugins.len())
            .field("params", &self.params.len())
            .finish()
    }
}

/// Summary of a loaded engine.
#[derive(Debug, Clone)]
pub struct EngineInfo {
    pub instructions: usize,
    pub plugins: Vec<String>,
    pub params: usize,
    pub prover: String,
    pub learner: String,
}

impl std::fmt::Display for EngineInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "proppr engine")?;
        writeln!(f, "  instructions: {}", self.instructions)?;
        writeln!(f, "  plugins:      {}", self.plugins.join(", "))?;
        writeln!(f, "  parameters:   {}", self.params)?;
        writeln!(f, "  prover:       {}", self.prover)?;
        write!(f, "  learner:      {}", self.learner)
    }
}

// ---------------------------------------------------------------------------
// Program loading
// ---------------------------------------------------------------------------

fn extension(path: &Path) -> &str {
    path.extension().and_then(|e| e.to_str()).unwrap_or_default()
}

/// Split program files into the rule program (`.ppr` or `.wam`, at most one)
/// and everything the plugin registry loads.
pub fn load_programs(paths: &[PathBuf]) -> ProResult<(WamProgram, Vec<Arc<dyn WamPlugin>>)> {
    let mut rules: Option<&PathBuf> = None;
    let mut others = Vec::new();
    for path in paths {
        match extension(path) {
            "ppr" | "wam" => {
                if let Some(first) = rules {
                    return Err(ProgramError::MultiplePrograms {
                        first: first.display().to_string(),
                        second: path.display().to_string(),
                    }
                    .into());
                }
                rules = Some(path);
            }
            _ => others.push(path.clone()),
        }
    }
    let program = match rules {
        Some(path) if extension(path) == "ppr" => compile_rules(&parse_rules(&read_source(path)?)?)?,
        Some(path) => WamProgram::load(path)?,
        None => WamProgram::new(),
    };
    let plugins = PluginRegistry::with_defaults().load(&others)?;
    Ok((program, plugins))
}

/// Compile a `.ppr` rule file to bytecode; returns the instruction count.
pub fn compile_file(source: &Path, out: &Path) -> ProResult<usize> {
    let program = compile_rules(&parse_rules(&read_source(source)?)?)?;
    program.save(out)?;
    tracing::info!(source = %source.display(), out = %out.display(), instructions = program.len(), "compiled");
    Ok(program.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_rule_programs_are_rejected() {
        let paths = [PathBuf::from("a.ppr"), PathBuf::from("b.wam")];
        assert!(load_programs(&paths).is_err());
    }

    #[test]
    fn unknown_extensions_are_rejected() {
        assert!(load_programs(&[PathBuf::from("facts.txt")]).is_err());
    }

    #[test]
    fn empty_engine_reports_itself() {
        let engine = Engine::new(Config::default()).unwrap();
        let info = engine.info();
        assert_eq!(info.instructions, 0);
        assert_eq!(info.prover, "dpr");
        assert!(info.to_string().contains("learner:      srw"));
        assert_eq!(engine.prover().unwrap().name(), "dpr");
    }
}
