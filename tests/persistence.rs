//! File round-trip tests for proppr.
//!
//! These tests verify that compiled programs, parameter files, grounded
//! files and configurations written by one run are read back unchanged by
//! the next.

use std::path::PathBuf;

use proppr::config::Config;
use proppr::engine::{Engine, compile_file};
use proppr::learn::{ParamVector, PosNegRWExample};
use proppr::registry::FeatureTable;
use proppr::wam::WamProgram;

const RULES: &str = "\
predict(X,Y) :- hasWord(X,W), isLabel(Y), related(W,Y) {r}.
related(W,Y) :- {w(W,Y)}.
";

const FACTS: &str = "hasWord\tdh\tpricy\nhasWord\tdh\tdoll\nisLabel\tneg\nisLabel\tpos\n";

fn setup(dir: &tempfile::TempDir) -> (PathBuf, PathBuf) {
    let rules = dir.path().join("textcat.ppr");
    let facts = dir.path().join("words.cfacts");
    std::fs::write(&rules, RULES).unwrap();
    std::fs::write(&facts, FACTS).unwrap();
    (rules, facts)
}

#[test]
fn compiled_program_answers_like_its_source() {
    let dir = tempfile::TempDir::new().unwrap();
    let (rules, facts) = setup(&dir);
    let wam = dir.path().join("textcat.wam");
    let count = compile_file(&rules, &wam).unwrap();
    let reloaded = WamProgram::load(&wam).unwrap();
    assert_eq!(reloaded.len(), count);

    let queries = dir.path().join("q.queries");
    std::fs::write(&queries, "predict(dh,Y)\n").unwrap();
    let mut outputs = Vec::new();
    for program in [rules, wam] {
        let mut config = Config::default();
        config.programs = vec![program, facts.clone()];
        let out = dir.path().join(format!("{}.solutions", outputs.len()));
        Engine::new(config).unwrap().answer(&queries, &out).unwrap();
        let text = std::fs::read_to_string(&out).unwrap();
        // Drop the timing header.
        outputs.push(text.lines().skip(1).map(str::to_string).collect::<Vec<_>>());
    }
    assert_eq!(outputs[0], outputs[1]);
    assert_eq!(outputs[0].len(), 2);
}

#[test]
fn parameters_survive_save_and_load() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("weights.params");
    let params = ParamVector::new();
    params.set("w(pricy,pos)", 1.0 / 3.0);
    params.set("id(restart)", 1.0);
    params.set("r", -2.5e-7);
    params.save(&path).unwrap();

    let loaded = ParamVector::load(&path).unwrap();
    assert_eq!(loaded.snapshot(), params.snapshot());

    std::fs::write(&path, "# trained\nw\tNaN\n").unwrap();
    assert!(ParamVector::load(&path).is_err());
}

#[test]
fn grounded_lines_parse_with_their_feature_index() {
    let dir = tempfile::TempDir::new().unwrap();
    let (rules, facts) = setup(&dir);
    let examples = dir.path().join("train.examples");
    let grounded = dir.path().join("train.grounded");
    std::fs::write(&examples, "predict(dh,Y)\t+predict(dh,pos)\t-predict(dh,neg)\n").unwrap();

    let mut config = Config::default();
    config.programs = vec![rules, facts];
    config.graph_key = Some(dir.path().join("train.key"));
    let engine = Engine::new(config).unwrap();
    engine.ground(&examples, &grounded).unwrap();

    let index = FeatureTable::load(&dir.path().join("train.grounded.features")).unwrap();
    assert!(index.id("id(restart)").is_some());
    assert!(index.id("w(pricy,pos)").is_some());

    let line = std::fs::read_to_string(&grounded).unwrap();
    let example = PosNegRWExample::parse(line.trim_end(), Some(&index)).unwrap();
    assert_eq!(example.query, "predict(dh,Y)");
    assert_eq!(example.pos.len(), 1);
    assert_eq!(example.neg.len(), 1);
    assert!(example.graph.features().iter().any(|f| f == "r"));

    let key = std::fs::read_to_string(dir.path().join("train.key")).unwrap();
    assert_eq!(key.lines().count(), example.graph.node_count());
    assert!(key.lines().all(|l| l.starts_with("1\t")));
}

#[test]
fn config_round_trips_through_toml() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("proppr.toml");
    let mut config = Config::default();
    config.apr.alpha = 0.2;
    config.srw.regularizer = "l1".into();
    config.srw.schedule = "lazy".into();
    config.fixed_weights = Some("w(a*=n:w*".into());
    config.threads = 4;
    config.save(&path).unwrap();
    assert_eq!(Config::load(&path).unwrap(), config);

    std::fs::write(&path, "prover = \"nope\"\n").unwrap();
    assert!(Config::load(&path).is_err());
}
