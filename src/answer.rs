//! Query answering: prove each query and rank its solutions.
//!
//! Output per query:
//!
//! ```text
//! # proved <id>\t<query>\t<msec> msec
//! <rank>\t<score>\t<filled query>
//! ```
//!
//! Equal scores share a rank (1, 1, 3, ...). With normalisation the scores
//! of the completed states sum to one.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::error::{GroundError, ProResult};
use crate::ground::InferenceExample;
use crate::pipeline::{PerWorker, Pipeline, PipelineStats};
use crate::plugins::WamPlugin;
use crate::prove::Prover;
use crate::registry::FeatureTable;
use crate::status::StatusLogger;
use crate::wam::WamProgram;

/// One ranked solution.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub rank: usize,
    pub score: f64,
    pub solution: String,
}

/// The ranked solutions of one query.
#[derive(Debug, Clone, PartialEq)]
pub struct Answers {
    pub query: String,
    pub msec: u128,
    pub answers: Vec<Answer>,
}

impl Answers {
    /// The solutions-file block for query number `id`.
    pub fn render(&self, id: usize) -> String {
        let mut out = format!("# proved {id}\t{}\t{} msec\n", self.query, self.msec);
        for a in &self.answers {
            let _ = writeln!(out, "{}\t{}\t{}", a.rank, a.score, a.solution);
        }
        out
    }
}

/// Proves queries and ranks their completed states.
pub struct QueryAnswerer {
    program: Arc<WamProgram>,
    plugins: Vec<Arc<dyn WamPlugin>>,
    features: Arc<FeatureTable>,
    normalize: bool,
    top_k: Option<usize>,
    status: StatusLogger,
}

impl QueryAnswerer {
    pub fn new(program: Arc<WamProgram>, plugins: Vec<Arc<dyn WamPlugin>>) -> Self {
        Self {
            program,
            plugins,
            features: Arc::new(FeatureTable::new()),
            normalize: true,
            top_k: None,
            status: StatusLogger::new(),
        }
    }

    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    pub fn with_top_k(mut self, top_k: Option<usize>) -> Self {
        self.top_k = top_k;
        self
    }

    /// Rank the solutions of `example.query`. Labels are ignored.
    pub fn answer(&self, prover: &dyn Prover, example: InferenceExample) -> ProResult<Answers> {
        let query = example.query.to_string();
        let example = InferenceExample::unlabeled(example.query);
        let mut pg = prover.make_proof_graph(
            example,
            self.program.clone(),
            self.plugins.clone(),
            self.features.clone(),
        )?;
        let started = Instant::now();
        let scores = prover.prove(pg.as_mut(), &self.status)?;
        let msec = started.elapsed().as_millis();

        let mut solutions: BTreeMap<String, f64> = BTreeMap::new();
        for (state, score) in scores.iter().filter(|(s, _)| s.is_completed()) {
            *solutions.entry(pg.fill(state).to_string()).or_insert(0.0) += score;
        }
        if self.normalize {
            let total: f64 = solutions.values().sum();
            if total > 0.0 {
                solutions.values_mut().for_each(|v| *v /= total);
            }
        }
        let mut ranked: Vec<(String, f64)> = solutions.into_iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        Ok(Answers {
            query,
            msec,
            answers: rank(ranked, self.top_k),
        })
    }

    /// Answer every query in `queries` and write the solutions file.
    pub fn answer_file(
        &self,
        prover: &dyn Prover,
        pipeline: &Pipeline,
        queries: &Path,
        solutions: &Path,
    ) -> ProResult<PipelineStats> {
        let io_err = |path: &Path| {
            let path = path.display().to_string();
            move |source| GroundError::Io { path, source }
        };
        let input = File::open(queries).map_err(io_err(queries))?;
        let mut out = BufWriter::new(File::create(solutions).map_err(io_err(solutions))?);
        let provers = PerWorker::new(pipeline.threads(), || prover.copy());

        let lines = BufReader::new(input)
            .lines()
            .map_while(|line| {
                line.inspect_err(|e| tracing::error!(path = %queries.display(), error = %e, "stopped reading queries"))
                    .ok()
            })
            .filter(|l| !l.trim().is_empty() && !l.starts_with('#'));

        let stats = pipeline.run(
            lines,
            |id, line: String| {
                let example = InferenceExample::parse_line(&line, id)?;
                let answers = provers.with(|p| self.answer(p.as_ref(), example))?;
                Ok(Some(answers.render(id)))
            },
            |_, block: String| out.write_all(block.as_bytes()).map_err(|e| io_err(solutions)(e).into()),
        )?;
        out.flush().map_err(io_err(solutions))?;

        let weighter = prover.weighter();
        if let Some(coverage) = weighter.coverage() {
            tracing::info!(
                known = weighter.known(),
                unknown = weighter.unknown(),
                coverage = format!("{:.1}%", coverage * 100.0),
                "feature coverage"
            );
            if coverage < 0.5 {
                tracing::warn!("most features were never trained; check that the parameter file matches the program");
            }
        }
        tracing::info!(answered = stats.emitted, failed = stats.failed, "answering finished");
        Ok(stats)
    }
}

/// Assign competition ranks to solutions sorted by descending score and cut
/// at `top_k`.
fn rank(sorted: Vec<(String, f64)>, top_k: Option<usize>) -> Vec<Answer> {
    let mut out = Vec::with_capacity(sorted.len());
    let mut shown = 0;
    let mut last = None;
    for (i, (solution, score)) in sorted.into_iter().enumerate() {
        if top_k.is_some_and(|k| i >= k) {
            break;
        }
        if last != Some(score) {
            shown = i + 1;
        }
        last = Some(score);
        out.push(Answer {
            rank: shown,
            score,
            solution,
        });
    }
    out
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

    fn answerer() -> QueryAnswerer {
        let rules = "sim(X,Y) :- link(X,Y).\nsim(X,Y) :- link(X,Z), link(Z,Y).";
        let facts = "link\ta\tb\nlink\ta\tc\nlink\tb\tc\n";
        let program = compile_rules(&parse_rules(rules).unwrap()).unwrap();
        let plugin = FactsPlugin::parse("facts", facts).unwrap();
        QueryAnswerer::new(Arc::new(program), vec![Arc::new(plugin)])
    }

    #[test]
    fn ties_share_a_rank() {
        let ranked = rank(
            vec![("a".into(), 0.4), ("b".into(), 0.4), ("c".into(), 0.2)],
            None,
        );
        let ranks: Vec<usize> = ranked.iter().map(|a| a.rank).collect();
        assert_eq!(ranks, [1, 1, 3]);
        assert_eq!(rank(ranked.into_iter().map(|a| (a.solution, a.score)).collect(), Some(2)).len(), 2);
    }

    #[test]
    fn normalised_scores_sum_to_one() {
        let prover = ProverRegistry::with_defaults()
            .build("dpr", &AprOptions::default(), Weighter::uniform(SquashingFunction::ReLU))
            .unwrap();
        let example = InferenceExample::parse_line("sim(a,Y)", 1).unwrap();
        let answers = answerer().answer(prover.as_ref(), example).unwrap();
        let solutions: Vec<&str> = answers.answers.iter().map(|a| a.solution.as_str()).collect();
        assert!(solutions.contains(&"sim(a,b)"));
        assert!(solutions.contains(&"sim(a,c)"));
        let total: f64 = answers.answers.iter().map(|a| a.score).sum();
        assert!((total - 1.0).abs() < 1e-9);
        // Two paths reach c, one reaches b.
        assert_eq!(answers.answers[0].solution, "sim(a,c)");
    }

    #[test]
    fn rendered_block_has_header_and_rows() {
        let answers = Answers {
            query: "sim(a,Y)".into(),
            msec: 3,
            answers: vec![Answer {
                rank: 1,
                score: 0.75,
                solution: "sim(a,c)".into(),
            }],
        };
        assert_eq!(answers.render(4), "# proved 4\tsim(a,Y)\t3 msec\n1\t0.75\tsim(a,c)\n");
    }
}
