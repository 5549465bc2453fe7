//! Benchmarks for the provers and the SRW learner.

use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use proppr::config::{AprOptions, Config};
use proppr::ground::InferenceExample;
use proppr::learn::srw::SrwCore;
use proppr::learn::{LearnerRegistry, ParamVector, PosNegRWExample};
use proppr::logic::parse_rules;
use proppr::plugins::{FactsPlugin, WamPlugin};
use proppr::prove::{ProverRegistry, Weighter};
use proppr::registry::FeatureTable;
use proppr::squash::SquashingFunction;
use proppr::status::StatusLogger;
use proppr::wam::compile_rules;

const RULES: &str = "\
predict(X,Y) :- hasWord(X,W), isLabel(Y), related(W,Y) {r}.
related(W,Y) :- {w(W,Y)}.
";

fn facts() -> String {
    let mut text = String::new();
    for w in 0..40 {
        text.push_str(&format!("hasWord\tdoc\tword{w}\n"));
    }
    for y in 0..5 {
        text.push_str(&format!("isLabel\tlabel{y}\n"));
    }
    text
}

fn bench_provers(c: &mut Criterion) {
    let program = Arc::new(compile_rules(&parse_rules(RULES).unwrap()).unwrap());
    let plugins: Vec<Arc<dyn WamPlugin>> = vec![Arc::new(FactsPlugin::parse("words", &facts()).unwrap())];
    let registry = ProverRegistry::with_defaults();

    for name in ["ppr", "dpr", "iddpr"] {
        let prover = registry
            .build(name, &AprOptions::default(), Weighter::uniform(SquashingFunction::ReLU))
            .unwrap();
        c.bench_function(&format!("prove_{name}_40x5"), |bench| {
            bench.iter(|| {
                let example = InferenceExample::parse_line("predict(doc,Y)", 1).unwrap();
                let mut pg = prover
                    .make_proof_graph(
                        example,
                        Arc::clone(&program),
                        plugins.clone(),
                        Arc::new(FeatureTable::new()),
                    )
                    .unwrap();
                black_box(prover.prove(pg.as_mut(), &StatusLogger::new()).unwrap())
            })
        });
    }
}

/// A layered grounded line: start, `width` middle nodes, `width` answers.
fn layered_example(width: usize) -> String {
    let mut edges = Vec::new();
    for i in 0..width {
        let mid = 2 + i;
        let answer = 2 + width + i;
        edges.push(format!("1->{mid}:1"));
        edges.push(format!("{mid}->{answer}:{}", 2 + i % 8));
        edges.push(format!("{mid}->1:10"));
        edges.push(format!("{answer}->1:10"));
    }
    let nodes = 1 + 2 * width;
    let names: Vec<String> = (0..9)
        .map(|f| format!("f{f}"))
        .chain(["id(restart)".to_string()])
        .collect();
    format!(
        "q\t{}\t{}\t{nodes}\t{}\t{}\t{}\t{}",
        2 + width,
        3 + width,
        edges.len(),
        edges.len(),
        names.join(":"),
        edges.join("\t")
    )
}

fn bench_learners(c: &mut Criterion) {
    let example = PosNegRWExample::parse(&layered_example(50), None).unwrap();
    let params = ParamVector::new();
    let registry = LearnerRegistry::with_defaults();

    for name in ["srw", "dpr"] {
        let learner = registry
            .build(name, SrwCore::from_config(&Config::default()).unwrap())
            .unwrap();
        let transitions = learner.core().load(&params, &example.graph).unwrap();
        c.bench_function(&format!("{name}_load_50"), |bench| {
            bench.iter(|| black_box(learner.core().load(&params, &example.graph).unwrap()))
        });
        c.bench_function(&format!("{name}_inference_50"), |bench| {
            bench.iter(|| black_box(learner.inference(&example, &transitions, &StatusLogger::new()).unwrap()))
        });
    }
}

criterion_group!(benches, bench_provers, bench_learners);
criterion_main!(benches);
