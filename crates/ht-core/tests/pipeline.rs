//! End-to-end: config file, parsing, graph build, MCMC output and
//! simulation dumps through real files.

use std::fs::File;
use std::io::BufReader;

use ht_common::StateSpace;
use ht_config::load_config;
use ht_core::output::{write_events, DumpMode, TsvWriter};
use ht_core::{parse_events, simulate, BasicModel, HistoryGraph, Runner};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::TempDir;

const INPUT: &str = "\
# facility unit time patient type
1 1 0 1 0
1 1 0.5 2 0
1 1 1 1 1
1 1 2 3 0
1 1 2.5 2 2
1 1 three 3 1
1 1 4 1 3
1 2 4 1 0
1 1 5 3 1
1 2 6 1 2
1 1 7 2 3
1 1 8 3 3
1 2 9 1 3
";

const CONFIG: &str = r#"{
  "settings": {"iterations": 4, "burn_in": 2, "seed": 7, "state_space": "two_state"},
  "priors": null
}"#;

fn write(dir: &TempDir, name: &str, text: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, text).unwrap();
    path
}

#[test]
fn malformed_record_is_one_diagnostic() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "events.txt", INPUT);
    let parsed = parse_events(BufReader::new(File::open(path).unwrap())).unwrap();
    assert_eq!(parsed.diagnostics.len(), 1);
    assert_eq!(parsed.diagnostics[0].line, 7);
    assert_eq!(parsed.events.len(), 12);
}

#[test]
fn configured_run_writes_table() {
    let dir = TempDir::new().unwrap();
    let config = write(&dir, "config.json", CONFIG);
    let cfg = load_config(Some(&config)).unwrap();
    assert_eq!(cfg.settings.iterations, 4);
    assert!(cfg.snapshot.config_hash.is_some());

    let events = write(&dir, "events.txt", INPUT);
    let parsed = parse_events(BufReader::new(File::open(events).unwrap())).unwrap();
    let model = BasicModel::from_priors(&cfg.priors, &cfg.settings).unwrap();
    let mut runner = Runner::build(parsed.events, model, cfg.settings.clone()).unwrap();

    let out_path = dir.path().join("params.tsv");
    let mut out = TsvWriter::create(&out_path, runner.header()).unwrap();
    let report = runner.run_configured(&mut out).unwrap();
    drop(out);

    assert_eq!(report.rows_written, 4);
    let text = std::fs::read_to_string(&out_path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 5);
    assert!(lines[0].starts_with("imp."));
    assert!(lines[0].ends_with("\tloglike"));
    runner.graph().verify().unwrap();
}

#[test]
fn simulated_dump_parses_back() {
    let dir = TempDir::new().unwrap();
    let events = write(&dir, "events.txt", INPUT);
    let parsed = parse_events(BufReader::new(File::open(events).unwrap())).unwrap();
    let model = BasicModel::with_defaults(StateSpace::TwoState).with_acquisition(0.3, 0.2);
    let mut graph = HistoryGraph::build(parsed.events, &model).unwrap();
    let mut rng = StdRng::seed_from_u64(99);
    let sim = simulate(&mut graph, &model, &mut rng).unwrap();
    assert_eq!(sim.episodes, 4);

    let full_path = dir.path().join("full.txt");
    let observed_path = dir.path().join("observed.txt");
    let full = write_events(&mut File::create(&full_path).unwrap(), &sim.events, DumpMode::Full).unwrap();
    let observed = write_events(
        &mut File::create(&observed_path).unwrap(),
        &sim.events,
        DumpMode::Observed,
    )
    .unwrap();
    assert_eq!(observed, 12);
    assert_eq!(full, observed + sim.shifts);

    let back = parse_events(BufReader::new(File::open(&observed_path).unwrap())).unwrap();
    assert!(back.diagnostics.is_empty());
    assert_eq!(back.events.len(), observed);
    let rebuilt = HistoryGraph::build(back.events, &model).unwrap();
    assert_eq!(rebuilt.episodes().len(), 4);

    let cheat = BasicModel::with_defaults(StateSpace::TwoState).with_cheating(true);
    let replay = parse_events(BufReader::new(File::open(&full_path).unwrap())).unwrap();
    let truth = HistoryGraph::build(replay.events, &cheat).unwrap();
    let shifts: usize = truth
        .episode_ids()
        .map(|id| truth.interior(truth.episode(id)).len())
        .sum();
    assert_eq!(shifts, sim.shifts);
}
