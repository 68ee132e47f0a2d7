//! Reference circuits and a side by side comparison of the three engines.

use fehler::{throw, throws};
use log::{debug, info, warn};
use std::any::Any;
use std::fmt;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::pcb::{Board, Netlist};
use crate::placement::{
    CellularAutomaton, CellularConfig, Genetic, GeneticConfig, Mcts, MctsConfig, PlacementEngine, PlacementResult,
};

const SMALL_COMPONENTS: &[(&str, (f64, f64))] = &[
    ("U1", (10., 8.)),
    ("U2", (8., 6.)),
    ("C1", (3., 2.)),
    ("C2", (3., 2.)),
    ("R1", (2., 1.)),
    ("R2", (2., 1.)),
];
const SMALL_CONNECTIONS: &[(&str, &str, f64)] = &[
    ("U1", "U2", 2.0),
    ("U1", "C1", 1.5),
    ("U2", "C2", 1.5),
    ("U1", "R1", 1.0),
    ("R2", "C2", 1.0),
];

const MEDIUM_COMPONENTS: &[(&str, (f64, f64))] = &[
    ("MCU", (12., 10.)),
    ("USB", (6., 4.)),
    ("POWER", (8., 6.)),
    ("C1", (3., 2.)),
    ("C2", (3., 2.)),
    ("C3", (3., 2.)),
    ("C4", (3., 2.)),
    ("C5", (3., 2.)),
    ("R1", (2., 1.)),
    ("R2", (2., 1.)),
    ("R3", (2., 1.)),
    ("LED1", (3., 3.)),
    ("LED2", (3., 3.)),
    ("SW1", (5., 5.)),
];
const MEDIUM_CONNECTIONS: &[(&str, &str, f64)] = &[
    ("MCU", "USB", 2.0),
    ("MCU", "POWER", 2.5),
    ("MCU", "C1", 1.5),
    ("MCU", "C2", 1.5),
    ("POWER", "C3", 2.0),
    ("POWER", "C4", 2.0),
    ("POWER", "C5", 1.5),
    ("USB", "R1", 1.0),
    ("MCU", "R2", 1.0),
    ("R3", "LED1", 1.0),
    ("MCU", "LED2", 1.0),
    ("SW1", "MCU", 1.5),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Circuit {
    /// Two ICs with decoupling parts, 6 components on 80x60.
    Small,
    /// Microcontroller board, 14 components on 120x90.
    Medium,
    /// Five chained ICs with passives, 25 components on 150x120.
    Large,
}

impl Circuit {
    #[throws(Error)]
    pub fn netlist(&self) -> Netlist {
        match self {
            Circuit::Small => from_tables(Board::new(80., 60.)?, SMALL_COMPONENTS, SMALL_CONNECTIONS)?,
            Circuit::Medium => from_tables(Board::new(120., 90.)?, MEDIUM_COMPONENTS, MEDIUM_CONNECTIONS)?,
            Circuit::Large => {
                let mut netlist = Netlist::new(Board::new(150., 120.)?);
                for i in 1..=5 {
                    netlist.add_component(format!("U{}", i), (10., 8.))?;
                }
                for i in 1..=10 {
                    netlist.add_component(format!("C{}", i), (3., 2.))?;
                }
                for i in 1..=10 {
                    netlist.add_component(format!("R{}", i), (2., 1.))?;
                }
                for i in 1..5 {
                    netlist.add_connection(&format!("U{}", i), &format!("U{}", i + 1), 2.0)?;
                }
                for i in 1..=5 {
                    let u = format!("U{}", i);
                    netlist.add_connection(&u, &format!("C{}", i), 1.5)?;
                    netlist.add_connection(&u, &format!("C{}", i + 5), 1.0)?;
                    netlist.add_connection(&u, &format!("R{}", i), 1.0)?;
                    netlist.add_connection(&u, &format!("R{}", i + 5), 1.0)?;
                }
                netlist
            }
        }
    }
}

impl fmt::Display for Circuit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Circuit::Small => "small",
            Circuit::Medium => "medium",
            Circuit::Large => "large",
        };
        f.write_str(name)
    }
}

#[throws(Error)]
fn from_tables(board: Board, components: &[(&str, (f64, f64))], connections: &[(&str, &str, f64)]) -> Netlist {
    let mut netlist = Netlist::new(board);
    for &(name, size) in components {
        netlist.add_component(name, size)?;
    }
    for &(a, b, weight) in connections {
        netlist.add_connection(a, b, weight)?;
    }
    netlist
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EngineKind {
    Mcts,
    Genetic,
    Cellular,
}

pub const ALL_ENGINES: [EngineKind; 3] = [EngineKind::Mcts, EngineKind::Genetic, EngineKind::Cellular];

impl EngineKind {
    /// Runs the engine with its benchmark settings: 500 MCTS iterations, defaults otherwise.
    pub fn run(&self, netlist: Netlist, seed: u64) -> Result<PlacementResult> {
        match self {
            EngineKind::Mcts => Mcts::with_seed(netlist, seed).optimize(&MctsConfig::default().with_iterations(500)),
            EngineKind::Genetic => Genetic::with_seed(netlist, seed).optimize(&GeneticConfig::default()),
            EngineKind::Cellular => CellularAutomaton::with_seed(netlist, seed).optimize(&CellularConfig::default()),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            EngineKind::Mcts => "MCTS",
            EngineKind::Genetic => "Genetic Algorithm",
            EngineKind::Cellular => "Cellular Automaton",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub struct BenchmarkRun {
    pub engine: EngineKind,
    pub run: u32,
    pub elapsed: Duration,
    pub result: Result<PlacementResult>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSummary {
    pub engine: EngineKind,
    /// Runs that returned a layout.
    pub runs: usize,
    /// Runs that returned an error instead.
    pub errors: usize,
    pub degraded: usize,
    /// Infinite when no run succeeded.
    pub mean_cost: f64,
    /// Population standard deviation.
    pub std_cost: f64,
    pub mean_time: Duration,
}

#[derive(Debug)]
pub struct Benchmark {
    circuit: Circuit,
    netlist: Netlist,
    runs: Vec<BenchmarkRun>,
}

impl Benchmark {
    pub fn circuit(&self) -> Circuit {
        self.circuit
    }

    pub fn netlist(&self) -> &Netlist {
        &self.netlist
    }

    /// Sorted by engine, then run index.
    pub fn runs(&self) -> &[BenchmarkRun] {
        &self.runs
    }

    pub fn summary(&self) -> Vec<EngineSummary> {
        ALL_ENGINES
            .iter()
            .filter_map(|&engine| {
                let runs: Vec<_> = self.runs.iter().filter(|r| r.engine == engine).collect();
                if runs.is_empty() {
                    return None;
                }
                let completed: Vec<_> = runs
                    .iter()
                    .filter_map(|r| r.result.as_ref().ok().map(|result| (result, r.elapsed)))
                    .collect();

                let n = completed.len();
                let (mean_cost, std_cost, mean_time) = if n == 0 {
                    (f64::INFINITY, 0., Duration::default())
                } else {
                    let mean = completed.iter().map(|(r, _)| r.cost).sum::<f64>() / n as f64;
                    let variance = completed.iter().map(|(r, _)| (r.cost - mean).powi(2)).sum::<f64>() / n as f64;
                    let time = completed.iter().map(|&(_, t)| t).sum::<Duration>() / n as u32;
                    (mean, variance.sqrt(), time)
                };

                Some(EngineSummary {
                    engine,
                    runs: n,
                    errors: runs.len() - n,
                    degraded: completed.iter().filter(|(r, _)| r.is_degraded()).count(),
                    mean_cost,
                    std_cost,
                    mean_time,
                })
            })
            .collect()
    }

    /// Engine with the lowest mean cost over its successful runs.
    pub fn best_engine(&self) -> Option<EngineKind> {
        self.summary()
            .into_iter()
            .filter(|s| s.runs > 0)
            .min_by(|a, b| a.mean_cost.total_cmp(&b.mean_cost))
            .map(|s| s.engine)
    }

    /// Single lowest cost layout across all engines.
    pub fn best_run(&self) -> Option<(EngineKind, &PlacementResult)> {
        self.runs
            .iter()
            .filter_map(|r| r.result.as_ref().ok().map(|result| (r.engine, result)))
            .min_by(|a, b| a.1.cost.total_cmp(&b.1.cost))
    }
}

impl fmt::Display for Benchmark {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let rule = "-".repeat(80);
        writeln!(f, "{}", "=".repeat(80))?;
        writeln!(f, "Placement benchmark, {} circuit ({} components)", self.circuit, self.netlist.len())?;
        writeln!(f, "{}", "=".repeat(80))?;
        writeln!(f, "{:<22} {:>12} {:>10} {:>12} {:>6} {:>9} {:>7}", "engine", "mean cost", "std dev", "mean time", "runs", "degraded", "errors")?;
        writeln!(f, "{}", rule)?;
        for s in self.summary() {
            writeln!(
                f,
                "{:<22} {:>12.2} {:>10.2} {:>11.2}s {:>6} {:>9} {:>7}",
                s.engine.to_string(),
                s.mean_cost,
                s.std_cost,
                s.mean_time.as_secs_f64(),
                s.runs,
                s.degraded,
                s.errors
            )?;
        }
        writeln!(f, "{}", rule)?;
        match self.best_engine() {
            Some(engine) => write!(f, "lowest mean cost: {}", engine),
            None => write!(f, "no engine produced a layout"),
        }
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    match payload.downcast_ref::<&str>() {
        Some(reason) => (*reason).to_owned(),
        None => payload.downcast_ref::<String>().cloned().unwrap_or_else(|| "unknown panic".to_owned()),
    }
}

/// Waits for every run in spawn order. A run whose thread panicked becomes an error row.
fn join_runs(handles: Vec<(EngineKind, u32, JoinHandle<BenchmarkRun>)>) -> Vec<BenchmarkRun> {
    handles
        .into_iter()
        .map(|(engine, run, handle)| {
            handle.join().unwrap_or_else(|payload| {
                let reason = panic_reason(payload.as_ref());
                warn!(engine:%, run, reason:%; "Benchmark run panicked");
                BenchmarkRun { engine, run, elapsed: Duration::default(), result: Err(Error::RunPanicked(reason)) }
            })
        })
        .collect()
}

/// Runs every engine `runs` times on `circuit`, each run on its own thread with seed `seed + run`.
#[throws(Error)]
pub fn run_benchmark(circuit: Circuit, runs: u32, seed: u64) -> Benchmark {
    if runs == 0 {
        throw!(Error::InvalidConfig("a benchmark needs at least one run".to_owned()));
    }
    let netlist = circuit.netlist()?;
    info!(circuit:%, runs, components = netlist.len(), connections = netlist.connection_count(); "Starting benchmark");

    let mut handles = Vec::with_capacity(ALL_ENGINES.len() * runs as usize);
    for engine in ALL_ENGINES.iter().copied() {
        for run in 0..runs {
            let netlist = netlist.clone();
            let handle = thread::spawn(move || {
                let start = Instant::now();
                let result = engine.run(netlist, seed.wrapping_add(run as u64));
                BenchmarkRun { engine, run, elapsed: start.elapsed(), result }
            });
            handles.push((engine, run, handle));
        }
    }

    let collected = join_runs(handles);
    for r in &collected {
        match &r.result {
            Ok(result) => debug!(engine:% = r.engine, run = r.run, cost = result.cost, elapsed:? = r.elapsed; "Benchmark run finished"),
            Err(err) => debug!(engine:% = r.engine, run = r.run, err:%; "Benchmark run failed"),
        }
    }

    Benchmark { circuit, netlist, runs: collected }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reference_circuits_match_their_sizes() {
        let sizes: Vec<_> = [Circuit::Small, Circuit::Medium, Circuit::Large]
            .iter()
            .map(|c| {
                let n = c.netlist().unwrap();
                (n.len(), n.connection_count(), n.board().width(), n.board().height())
            })
            .collect();
        assert_eq!(sizes, vec![(6, 5, 80., 60.), (14, 12, 120., 90.), (25, 24, 150., 120.)]);
    }

    #[test]
    fn zero_runs_is_rejected() {
        assert!(matches!(run_benchmark(Circuit::Small, 0, 1), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn small_benchmark_compares_every_engine() {
        let benchmark = run_benchmark(Circuit::Small, 2, 17).unwrap();
        assert_eq!(benchmark.runs().len(), 6);
        assert_eq!(benchmark.runs()[0].engine, EngineKind::Mcts);
        assert_eq!(benchmark.runs()[5].engine, EngineKind::Cellular);

        let summary = benchmark.summary();
        assert_eq!(summary.len(), 3);
        for s in &summary {
            assert_eq!(s.runs + s.errors, 2);
            assert!(s.mean_cost.is_finite());
            assert!(s.std_cost >= 0.);
        }

        let best = benchmark.best_engine().unwrap();
        let lowest = summary.iter().map(|s| s.mean_cost).fold(f64::INFINITY, f64::min);
        assert_eq!(summary.iter().find(|s| s.engine == best).unwrap().mean_cost, lowest);

        let (_, best_run) = benchmark.best_run().unwrap();
        assert!(best_run.cost <= lowest);

        let table = benchmark.to_string();
        assert!(table.contains("Genetic Algorithm"));
        assert!(table.contains("lowest mean cost"));
    }

    #[test]
    fn panicked_runs_become_error_rows() {
        let failed = thread::spawn(|| BenchmarkRun {
            engine: EngineKind::Cellular,
            run: 0,
            elapsed: Duration::from_secs(1),
            result: Err(Error::InvalidConfig("bad grid".to_owned())),
        });
        let crashed = thread::spawn(|| -> BenchmarkRun { panic!("out of cells") });
        let runs = join_runs(vec![(EngineKind::Cellular, 0, failed), (EngineKind::Cellular, 1, crashed)]);

        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].result, Err(Error::InvalidConfig("bad grid".to_owned())));
        assert_eq!(runs[1].run, 1);
        assert_eq!(runs[1].result, Err(Error::RunPanicked("out of cells".to_owned())));

        let benchmark = Benchmark { circuit: Circuit::Small, netlist: Circuit::Small.netlist().unwrap(), runs };
        let summary = benchmark.summary();
        assert_eq!((summary[0].runs, summary[0].errors), (0, 2));
        assert_eq!(benchmark.best_engine(), None);
    }

    #[test]
    fn summary_statistics() {
        let netlist = Circuit::Small.netlist().unwrap();
        let run = |engine, run, cost: f64, secs| {
            let mut result = EngineKind::Cellular.run(netlist.clone(), 0).unwrap();
            result.cost = cost;
            BenchmarkRun { engine, run, elapsed: Duration::from_secs(secs), result: Ok(result) }
        };
        let benchmark = Benchmark {
            circuit: Circuit::Small,
            netlist: netlist.clone(),
            runs: vec![
                run(EngineKind::Genetic, 0, 10., 1),
                run(EngineKind::Genetic, 1, 20., 3),
                BenchmarkRun {
                    engine: EngineKind::Mcts,
                    run: 0,
                    elapsed: Duration::from_secs(1),
                    result: Err(Error::InvalidConfig("boom".to_owned())),
                },
            ],
        };

        let summary = benchmark.summary();
        assert_eq!(summary.len(), 2);
        let mcts = &summary[0];
        assert_eq!((mcts.engine, mcts.runs, mcts.errors), (EngineKind::Mcts, 0, 1));
        assert_eq!(mcts.mean_cost, f64::INFINITY);

        let genetic = &summary[1];
        assert_eq!(genetic.mean_cost, 15.);
        assert_eq!(genetic.std_cost, 5.);
        assert_eq!(genetic.mean_time, Duration::from_secs(2));
        assert_eq!(benchmark.best_engine(), Some(EngineKind::Genetic));
    }
}
