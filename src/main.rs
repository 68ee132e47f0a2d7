use log::{error, info};
use std::process;

use board_placer::benchmark::{run_benchmark, Circuit};
use board_placer::render;

const RUNS: u32 = 3;
const SEED: u64 = 42;

fn run() -> board_placer::Result<()> {
    let circuit = Circuit::Medium;
    let benchmark = run_benchmark(circuit, RUNS, SEED)?;
    println!("{}", benchmark);

    if let Some((engine, result)) = benchmark.best_run() {
        info!(engine:%, cost = result.cost, degraded = result.is_degraded(); "Best layout");
        println!("\nbest layout ({}, cost {:.2}):", engine, result.cost);
        println!("{}", render::ascii(benchmark.netlist(), result, 2.));
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!(runs = RUNS, seed = SEED; "Starting board-placer");

    if let Err(err) = run() {
        error!(err:%; "Benchmark failed");
        process::exit(1);
    }
}
