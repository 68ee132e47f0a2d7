//! Force field cellular automaton on an occupancy grid.
//!
//! Every step builds an attraction field (connected components pull on the cells
//! they cover) and a repulsion field (occupied neighbour count), then lets each
//! component slide one cell towards a stronger average force.

use fehler::{throw, throws};
use log::{debug, info, trace};
use ndarray::{s, Array2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::atomic::AtomicBool;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::{EngineStats, FailureLog, OverlapPolicy, Phase, PlacementEngine, PlacementResult, Run};
use crate::consts::{CELLULAR_LOG_INTERVAL, EXPLORATION_MOVE_PROBABILITY, MIN_ATTRACTION_DISTANCE, PLACEMENT_ATTEMPTS};
use crate::cost::wirelength;
use crate::error::{Error, Result};
use crate::pcb::{CellVector, ComponentId, Netlist, OccupancyGrid, ALL_DIRECTIONS};

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CellularConfig {
    /// Cell edge length in board units.
    pub grid_resolution: f64,
    pub attraction_strength: f64,
    pub repulsion_strength: f64,
    pub iterations: u32,
    pub overlap_policy: OverlapPolicy,
}

impl Default for CellularConfig {
    fn default() -> Self {
        CellularConfig {
            grid_resolution: 1.0,
            attraction_strength: 1.0,
            repulsion_strength: 0.5,
            iterations: 200,
            overlap_policy: OverlapPolicy::default(),
        }
    }
}

impl CellularConfig {
    pub fn with_grid_resolution(mut self, resolution: f64) -> Self {
        self.grid_resolution = resolution;
        self
    }

    pub fn with_attraction_strength(mut self, strength: f64) -> Self {
        self.attraction_strength = strength;
        self
    }

    pub fn with_repulsion_strength(mut self, strength: f64) -> Self {
        self.repulsion_strength = strength;
        self
    }

    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_overlap_policy(mut self, policy: OverlapPolicy) -> Self {
        self.overlap_policy = policy;
        self
    }

    #[throws(Error)]
    pub fn validate(&self) {
        if self.iterations == 0 {
            throw!(Error::InvalidConfig("the automaton needs at least one iteration".to_owned()));
        }
        if !self.grid_resolution.is_finite() || self.grid_resolution <= 0. {
            throw!(Error::InvalidConfig(format!("grid resolution must be positive, got {}", self.grid_resolution)));
        }
        for (name, strength) in &[("attraction", self.attraction_strength), ("repulsion", self.repulsion_strength)] {
            if !strength.is_finite() || *strength < 0. {
                throw!(Error::InvalidConfig(format!("{} strength must be non-negative, got {}", name, strength)));
            }
        }
    }
}

pub struct CellularAutomaton<R = StdRng> {
    netlist: Netlist,
    rng: R,
}

impl CellularAutomaton<StdRng> {
    pub fn with_seed(netlist: Netlist, seed: u64) -> Self {
        CellularAutomaton::new(netlist, StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> CellularAutomaton<R> {
    pub fn new(netlist: Netlist, rng: R) -> Self {
        CellularAutomaton { netlist, rng }
    }

    /// Rejection sampling of block origins. Components that find no room stay off the grid.
    #[throws(Error)]
    fn initialize(&mut self, grid: &mut OccupancyGrid, policy: OverlapPolicy, failures: &mut FailureLog) {
        for id in 0..self.netlist.len() {
            match grid.random_free_origin(id, &mut self.rng, PLACEMENT_ATTEMPTS) {
                Some(at) => grid.place(id, at),
                None => {
                    failures.record(&self.netlist, id, Phase::Initialization);
                    if policy == OverlapPolicy::Strict {
                        throw!(Error::PlacementFailure {
                            component: self.netlist.component(id).name.clone(),
                            phase: Phase::Initialization,
                        });
                    }
                }
            }
        }
    }

    /// `weight / distance` added to every cell of both endpoints of each connection.
    fn attraction(&self, grid: &OccupancyGrid) -> Array2<f64> {
        let mut field = Array2::zeros(grid.dim());
        for c in self.netlist.connections() {
            let (a, b) = match (grid.center(c.a), grid.center(c.b)) {
                (Some(a), Some(b)) => (a, b),
                _ => continue,
            };
            let pull = c.weight / (nalgebra::distance(&a, &b) + MIN_ATTRACTION_DISTANCE);
            for id in [c.a, c.b] {
                if let Some((xs, ys)) = grid.origin(id).and_then(|at| grid.block(id, at)) {
                    field.slice_mut(s![xs, ys]).mapv_inplace(|v| v + pull);
                }
            }
        }
        field
    }

    fn step(&mut self, config: &CellularConfig, grid: &mut OccupancyGrid) {
        let mut force = self.attraction(grid);
        force.mapv_inplace(|v| v * config.attraction_strength);
        force.scaled_add(-config.repulsion_strength, &grid.neighbour_density());

        let mut order: Vec<ComponentId> = (0..self.netlist.len()).filter(|&id| grid.origin(id).is_some()).collect();
        order.shuffle(&mut self.rng);

        for id in order {
            let origin = match grid.origin(id) {
                Some(origin) => origin,
                None => continue,
            };
            let here = match grid.block_mean(&force, id, origin) {
                Some(here) => here,
                None => continue,
            };

            let target = ALL_DIRECTIONS
                .iter()
                .map(|d| d.to_vector())
                .filter(|&delta| grid.is_free(id, origin + delta))
                .filter_map(|delta| grid.block_mean(&force, id, origin + delta).map(|f| (delta, f)))
                .filter(|&(_, f)| f > here)
                .fold(None, |best: Option<(CellVector, f64)>, (delta, f)| match best {
                    Some((_, best_force)) if best_force >= f => best,
                    _ => Some((delta, f)),
                });

            let moved = match target {
                Some((delta, _)) => grid.try_move(id, delta),
                None => false,
            };
            if !moved && self.rng.gen::<f64>() < EXPLORATION_MOVE_PROBABILITY {
                if let Some(direction) = ALL_DIRECTIONS.choose(&mut self.rng) {
                    let explored = grid.try_move(id, direction.to_vector());
                    trace!(component = id, direction:?, explored; "Exploration move");
                }
            }
        }
    }
}

impl<R: Rng> PlacementEngine for CellularAutomaton<R> {
    type Config = CellularConfig;

    fn netlist(&self) -> &Netlist {
        &self.netlist
    }

    fn netlist_mut(&mut self) -> &mut Netlist {
        &mut self.netlist
    }

    fn optimize_until(&mut self, config: &CellularConfig, canceled: &AtomicBool) -> Result<PlacementResult> {
        config.validate()?;
        assert!(!self.netlist.is_empty(), "nothing to place, register components first");

        let mut grid = OccupancyGrid::new(&self.netlist, config.grid_resolution)?;
        let (width, height) = grid.dim();
        info!(
            engine = "cellular", components = self.netlist.len(), width, height,
            iterations = config.iterations; "Starting placement"
        );

        let mut run = Run::default();
        self.initialize(&mut grid, config.overlap_policy, &mut run.failures)?;

        let initial = grid.positions();
        let initial_cost = wirelength(&self.netlist, &initial);
        let mut best = (initial, initial_cost);
        let mut cost_history = vec![initial_cost];
        run.history.push(initial_cost);

        while run.iterations < config.iterations && !run.should_stop(canceled) {
            self.step(config, &mut grid);

            let positions = grid.positions();
            let cost = wirelength(&self.netlist, &positions);
            if cost < best.1 {
                best = (positions, cost);
            }
            cost_history.push(cost);

            run.iterations += 1;
            run.history.push(best.1);
            if run.iterations % CELLULAR_LOG_INTERVAL == 0 {
                debug!(iteration = run.iterations, cost, best_cost = best.1; "CA progress");
            }
        }

        let (positions, cost) = best;
        let stats = EngineStats::Cellular { initial_cost, cost_history };
        let result = run.finish(&self.netlist, &positions, cost, stats);
        info!(engine = "cellular", cost = result.cost, iterations = result.iterations, failures = result.failure_count(); "Placement finished");
        Ok(result)
    }
}
