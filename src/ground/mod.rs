//! Grounding: prove labelled examples and record their proof graphs.
//!
//! [`Grounder::ground_example`] builds a fresh proof graph for one
//! [`InferenceExample`], runs a prover over it and resolves the labelled
//! solutions to node ids. [`Grounder::ground_file`] does the same for a whole
//! example file on a throttled worker pool, writing one grounded line per
//! usable example plus the shared `.features` index next to the output.

pub mod example;

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{GroundError, ProResult};
use crate::graph::ProofGraph;
use crate::pipeline::{PerWorker, Pipeline, PipelineStats, lock_or_recover};
use crate::plugins::WamPlugin;
use crate::prove::Prover;
use crate::registry::FeatureTable;
use crate::status::StatusLogger;
use crate::wam::WamProgram;

pub use example::InferenceExample;

// ---------------------------------------------------------------------------
// Grounded example
// ---------------------------------------------------------------------------

/// A proved example: its expanded graph and the node ids of its labels.
pub struct GroundedExample {
    pub graph: Box<dyn ProofGraph>,
    /// Node ids of completed states matching a positive label.
    pub pos_ids: Vec<usize>,
    /// Node ids of completed states matching a negative label.
    pub neg_ids: Vec<usize>,
}

impl GroundedExample {
    pub fn example(&self) -> &InferenceExample {
        self.graph.example()
    }

    /// The seed distribution of the walk: all mass on the start node.
    pub fn query_vec(&self) -> [(usize, f64); 1] {
        [(1, 1.0)]
    }

    pub fn node_count(&self) -> usize {
        self.graph.graph().node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.graph().edge_count()
    }

    /// `query \t pos \t neg \t graph`, with feature ids from the shared index.
    pub fn serialize(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}",
            self.example().query,
            join_ids(&self.pos_ids),
            join_ids(&self.neg_ids),
            self.graph.graph().serialize(self.graph.features(), false)
        )
    }
}

impl std::fmt::Debug for GroundedExample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroundedExample")
            .field("query", &self.example().query.to_string())
            .field("nodes", &self.node_count())
            .field("edges", &self.edge_count())
            .field("pos_ids", &self.pos_ids)
            .field("neg_ids", &self.neg_ids)
            .finish()
    }
}

fn join_ids(ids: &[usize]) -> String {
    ids.iter().map(usize::to_string).collect::<Vec<_>>().join(",")
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Coverage counts of one grounding run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroundingStats {
    pub examples: usize,
    pub total_pos: usize,
    pub total_neg: usize,
    pub covered_pos: usize,
    pub covered_neg: usize,
    /// Lowest fraction of labels found in any one example, with that example.
    pub worst: Option<(f64, String)>,
    pub no_pos_neg: usize,
    pub empty_graph: usize,
    pub written: usize,
}

/// Synchronized accumulator shared by every grounding worker.
#[derive(Debug, Default)]
pub struct GroundingStatistics {
    inner: Mutex<GroundingStats>,
}

impl GroundingStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut GroundingStats) -> R) -> R {
        f(&mut lock_or_recover(&self.inner, "grounding statistics"))
    }

    /// Fold one example's label coverage into the totals.
    pub fn update(&self, example: &InferenceExample, covered_pos: usize, covered_neg: usize) {
        let labels = example.label_count();
        let covered = covered_pos + covered_neg;
        self.with(|s| {
            s.examples += 1;
            s.total_pos += example.pos.len();
            s.total_neg += example.neg.len();
            s.covered_pos += covered_pos;
            s.covered_neg += covered_neg;
            if labels > 0 {
                let fraction = covered as f64 / labels as f64;
                if s.worst.as_ref().is_none_or(|(w, _)| fraction < *w) {
                    s.worst = Some((fraction, example.query.to_string()));
                }
            }
        });
    }

    pub fn note_empty_graph(&self) {
        self.with(|s| s.empty_graph += 1);
    }

    pub fn note_no_pos_neg(&self) {
        self.with(|s| s.no_pos_neg += 1);
    }

    pub fn note_written(&self) {
        self.with(|s| s.written += 1);
    }

    pub fn snapshot(&self) -> GroundingStats {
        self.with(|s| s.clone())
    }

    /// Log the totals.
    pub fn report(&self) {
        let s = self.snapshot();
        let pct = |a: usize, b: usize| if b == 0 { 0.0 } else { 100.0 * a as f64 / b as f64 };
        tracing::info!(
            examples = s.examples,
            written = s.written,
            pos_covered = s.covered_pos,
            pos_total = s.total_pos,
            pos_pct = format!("{:.1}", pct(s.covered_pos, s.total_pos)),
            neg_covered = s.covered_neg,
            neg_total = s.total_neg,
            neg_pct = format!("{:.1}", pct(s.covered_neg, s.total_neg)),
            "grounding coverage"
        );
        if let Some((fraction, query)) = &s.worst {
            tracing::info!(fraction, query = %query, "worst-covered example");
        }
        if s.no_pos_neg > 0 {
            tracing::info!(count = s.no_pos_neg, "examples with no labelled solution in the graph");
        }
        if s.empty_graph > 0 {
            tracing::info!(count = s.empty_graph, "examples with an empty graph");
        }
    }
}

// ---------------------------------------------------------------------------
// Grounder
// ---------------------------------------------------------------------------

/// Proves examples against one program and records their graphs.
pub struct Grounder {
    program: Arc<WamProgram>,
    plugins: Vec<Arc<dyn WamPlugin>>,
    features: Arc<FeatureTable>,
    include_unlabeled: bool,
    stats: GroundingStatistics,
    graph_key: Option<Mutex<BufWriter<File>>>,
    status: StatusLogger,
}

impl Grounder {
    pub fn new(program: Arc<WamProgram>, plugins: Vec<Arc<dyn WamPlugin>>) -> Self {
        Self {
            program,
            plugins,
            features: Arc::new(FeatureTable::new()),
            include_unlabeled: false,
            stats: GroundingStatistics::new(),
            graph_key: None,
            status: StatusLogger::new(),
        }
    }

    /// Keep examples whose graph contains no labelled solution.
    pub fn with_include_unlabeled(mut self, include: bool) -> Self {
        self.include_unlabeled = include;
        self
    }

    /// Intern features into an existing table.
    pub fn with_features(mut self, features: Arc<FeatureTable>) -> Self {
        self.features = features;
        self
    }

    /// Log every grounded node as `exampleId \t nodeId \t state` to `path`.
    pub fn with_graph_key(mut self, path: &Path) -> ProResult<Self> {
        let file = File::create(path).map_err(|source| GroundError::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.graph_key = Some(Mutex::new(BufWriter::new(file)));
        Ok(self)
    }

    pub fn features(&self) -> &Arc<FeatureTable> {
        &self.features
    }

    pub fn statistics(&self) -> &GroundingStatistics {
        &self.stats
    }

    /// Prove `example` with `prover` and resolve its labels to node ids.
    pub fn ground_example(&self, prover: &dyn Prover, example: InferenceExample) -> ProResult<GroundedExample> {
        example.validate_labels()?;
        let pos: BTreeSet<String> = example.pos.iter().map(ToString::to_string).collect();
        let neg: BTreeSet<String> = example.neg.iter().map(ToString::to_string).collect();

        let mut graph = prover.make_proof_graph(
            example,
            self.program.clone(),
            self.plugins.clone(),
            self.features.clone(),
        )?;
        let scores = prover.prove(graph.as_mut(), &self.status)?;

        let mut pos_ids = BTreeSet::new();
        let mut neg_ids = BTreeSet::new();
        for state in scores.keys().filter(|s| s.is_completed()) {
            let Some(id) = graph.graph().id_of(state) else {
                continue;
            };
            let filled = graph.fill(state).to_string();
            if pos.contains(&filled) {
                pos_ids.insert(id);
            }
            if neg.contains(&filled) {
                neg_ids.insert(id);
            }
        }

        Ok(GroundedExample {
            graph,
            pos_ids: pos_ids.into_iter().collect(),
            neg_ids: neg_ids.into_iter().collect(),
        })
    }

    /// Ground one example and apply the output policy: `None` for skipped
    /// examples, otherwise the grounded line.
    pub fn ground_to_line(&self, prover: &dyn Prover, id: usize, example: InferenceExample) -> ProResult<Option<String>> {
        let grounded = self.ground_example(prover, example)?;
        let example = grounded.example();
        let covered_pos = example.pos.len().min(grounded.pos_ids.len());
        let covered_neg = example.neg.len().min(grounded.neg_ids.len());
        self.stats.update(example, covered_pos, covered_neg);

        if grounded.edge_count() == 0 {
            tracing::debug!(example = id, query = %example.query, "empty graph; skipping");
            self.stats.note_empty_graph();
            return Ok(None);
        }
        if grounded.pos_ids.is_empty() && grounded.neg_ids.is_empty() {
            self.stats.note_no_pos_neg();
            if !self.include_unlabeled {
                tracing::debug!(example = id, query = %example.query, "no labelled solutions; skipping");
                return Ok(None);
            }
        }
        self.write_graph_key(id, grounded.graph.as_ref())?;
        self.stats.note_written();
        Ok(Some(grounded.serialize()))
    }

    fn write_graph_key(&self, id: usize, pg: &dyn ProofGraph) -> ProResult<()> {
        let Some(key) = &self.graph_key else {
            return Ok(());
        };
        let graph = pg.graph();
        let mut lines = String::new();
        for node in 1..=graph.node_count() {
            if let Some(state) = graph.state(node) {
                let description = if state.is_completed() {
                    pg.fill(state).to_string()
                } else {
                    state.to_string()
                };
                lines.push_str(&format!("{id}\t{node}\t{description}\n"));
            }
        }
        lock_or_recover(key, "graph key")
            .write_all(lines.as_bytes())
            .map_err(|source| GroundError::Io {
                path: "graph key".into(),
                source,
            })?;
        Ok(())
    }

    /// Ground every example of `data` into `grounded`, then write
    /// `<grounded>.features`. Statistics are logged even when examples fail.
    pub fn ground_file(
        &self,
        prover: &dyn Prover,
        pipeline: &Pipeline,
        data: &Path,
        grounded: &Path,
    ) -> ProResult<PipelineStats> {
        let io_err = |path: &Path| {
            let path = path.display().to_string();
            move |source| GroundError::Io { path, source }
        };
        let input = File::open(data).map_err(io_err(data))?;
        let mut out = BufWriter::new(File::create(grounded).map_err(io_err(grounded))?);
        let started = StatusLogger::new();
        let provers = PerWorker::new(pipeline.threads(), || prover.copy());

        let lines = BufReader::new(input).lines().map_while(|line| {
            line.inspect_err(|e| tracing::error!(path = %data.display(), error = %e, "stopped reading examples"))
                .ok()
        });
        let examples = lines.filter(|l| !l.trim().is_empty() && !l.starts_with('#'));

        let result = pipeline.run(
            examples,
            |id, line: String| {
                let example = InferenceExample::parse_line(&line, id)?;
                provers.with(|p| self.ground_to_line(p.as_ref(), id, example))
            },
            |_, line: String| writeln!(out, "{line}").map_err(|e| io_err(grounded)(e).into()),
        );
        self.stats.report();
        let stats = result?;

        out.flush().map_err(io_err(grounded))?;
        if let Some(key) = &self.graph_key {
            lock_or_recover(key, "graph key")
                .flush()
                .map_err(io_err(Path::new("graph key")))?;
        }
        let features = features_path(grounded);
        self.features.save(&features)?;
        tracing::info!(
            grounded = stats.emitted,
            skipped = stats.skipped,
            failed = stats.failed,
            features = self.features.len(),
            msec = started.since_start().as_millis() as u64,
            "grounding finished"
        );
        Ok(stats)
    }
}

/// `<grounded>.features`.
pub fn features_path(grounded: &Path) -> PathBuf {
    let mut name = OsString::from(grounded.as_os_str());
    name.push(".features");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AprOptions;
    use crate::logic::parse_rules;
    use crate::plugins::FactsPlugin;
    use crate::prove::{ProverRegistry, Weighter};
    use crate::squash::SquashingFunction;
    use crate::wam::compile_rules;

    const RULES: &str = "predict(X,Y) :- hasWord(X,W), isLabel(Y), related(W,Y) {r}.\n\
        related(W,Y) :- {w(W,Y)}.";
    const FACTS: &str = "hasWord\tdh\ta\nhasWord\tdh\tpricy\nhasWord\tdh\tdoll\n\
        isLabel\tneg\nisLabel\tpos\n";

    fn grounder() -> Grounder {
        let program = compile_rules(&parse_rules(RULES).unwrap()).unwrap();
        let facts = FactsPlugin::parse("facts", FACTS).unwrap();
        Grounder::new(Arc::new(program), vec![Arc::new(facts)])
    }

    fn prover(name: &str) -> Box<dyn Prover> {
        ProverRegistry::with_defaults()
            .build(name, &AprOptions::default(), Weighter::uniform(SquashingFunction::ReLU))
            .unwrap()
    }

    #[test]
    fn labels_resolve_to_completed_nodes() {
        let g = grounder();
        let example = InferenceExample::parse_line("predict(dh,Y)\t-predict(dh,pos)\t+predict(dh,neg)", 1).unwrap();
        let grounded = g.ground_example(prover("dpr").as_ref(), example).unwrap();
        assert_eq!(grounded.pos_ids.len(), 1);
        assert_eq!(grounded.neg_ids.len(), 1);
        assert_ne!(grounded.pos_ids, grounded.neg_ids);
        for id in grounded.pos_ids.iter().chain(&grounded.neg_ids) {
            assert!(grounded.graph.graph().state(*id).unwrap().is_completed());
        }
        let line = grounded.serialize();
        let fields: Vec<&str> = line.split('\t').collect();
        assert_eq!(fields[0], "predict(dh,Y)");
        assert_eq!(fields[3], grounded.node_count().to_string());
        assert_eq!(fields[4], grounded.edge_count().to_string());
    }

    #[test]
    fn dpr_and_iddpr_ground_alike() {
        // start, hasWord call, 3 words, 6 word/label pairs, 2 merged answers
        let line = "predict(dh,Y)\t-predict(dh,pos)\t+predict(dh,neg)";
        for name in ["dpr", "iddpr"] {
            let grounded = grounder()
                .ground_example(prover(name).as_ref(), InferenceExample::parse_line(line, 1).unwrap())
                .unwrap();
            assert_eq!(grounded.node_count(), 13, "{name}");
            // 16 proof edges, a restart edge per node and a self-loop per answer
            assert_eq!(grounded.edge_count(), 31, "{name}");
            assert_eq!(grounded.query_vec(), [(1, 1.0)], "{name}");
            assert_eq!(grounded.pos_ids.len(), 1, "{name}");
            assert_eq!(grounded.neg_ids.len(), 1, "{name}");

            let serialized = grounded.serialize();
            let fields: Vec<&str> = serialized.split('\t').collect();
            assert_eq!(&fields[3..5], ["13", "31"], "{name}");
        }
    }

    #[test]
    fn unbound_label_is_rejected() {
        let g = grounder();
        let example = InferenceExample::parse_line("predict(dh,Y)\t+predict(dh,Y)", 1).unwrap();
        assert!(g.ground_example(prover("dpr").as_ref(), example).is_err());
    }

    #[test]
    fn unlabelled_examples_are_skipped_unless_requested() {
        let example = || InferenceExample::parse_line("predict(dh,Y)\t+predict(dh,maybe)", 1).unwrap();
        let g = grounder();
        assert!(g.ground_to_line(prover("dpr").as_ref(), 1, example()).unwrap().is_none());
        assert_eq!(g.statistics().snapshot().no_pos_neg, 1);

        let g = grounder().with_include_unlabeled(true);
        assert!(g.ground_to_line(prover("dpr").as_ref(), 1, example()).unwrap().is_some());
    }

    #[test]
    fn coverage_tracks_the_worst_example() {
        let stats = GroundingStatistics::new();
        let full = InferenceExample::parse_line("p(a,X)\t+p(a,b)", 1).unwrap();
        let half = InferenceExample::parse_line("p(c,X)\t+p(c,d)\t-p(c,e)", 2).unwrap();
        stats.update(&full, 1, 0);
        stats.update(&half, 1, 0);
        let s = stats.snapshot();
        assert_eq!(s.examples, 2);
        assert_eq!(s.total_pos, 2);
        assert_eq!(s.total_neg, 1);
        assert_eq!(s.worst, Some((0.5, "p(c,X)".to_string())));
    }

    #[test]
    fn features_file_sits_next_to_output() {
        assert_eq!(
            features_path(Path::new("/tmp/out.grounded")),
            PathBuf::from("/tmp/out.grounded.features")
        );
    }

    #[test]
    fn graph_key_survives_a_poisoned_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.key");
        let g = grounder().with_graph_key(&path).unwrap();
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _held = g.graph_key.as_ref().unwrap().lock().unwrap();
            panic!("worker died holding the graph key");
        }));

        let example = InferenceExample::parse_line("predict(dh,Y)\t+predict(dh,pos)", 7).unwrap();
        assert!(g.ground_to_line(prover("dpr").as_ref(), 7, example).unwrap().is_some());
        lock_or_recover(g.graph_key.as_ref().unwrap(), "graph key").flush().unwrap();

        let key = std::fs::read_to_string(&path).unwrap();
        assert_eq!(key.lines().count(), 13);
        assert!(key.lines().all(|l| l.starts_with("7\t")));
    }
}

