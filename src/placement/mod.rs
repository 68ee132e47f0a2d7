//! Placement engines and the result they all produce.
//!
//! Every engine owns a [`Netlist`] and a random number generator, and turns the
//! registered components into a [`PlacementResult`] scored by
//! [`crate::cost::wirelength`]. Engines differ only in how they search.

use fnv::FnvHashMap;
use itertools::Itertools;
use log::{trace, warn};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::pcb::{ComponentId, Layout, Netlist, Point};

mod cellular;
mod genetic;
mod mcts;

pub use cellular::{CellularAutomaton, CellularConfig};
pub use genetic::{Genetic, GeneticConfig};
pub use mcts::{Mcts, MctsConfig};

pub trait PlacementEngine {
    type Config;

    fn netlist(&self) -> &Netlist;
    fn netlist_mut(&mut self) -> &mut Netlist;

    fn add_component(&mut self, name: impl Into<String>, size: (f64, f64)) -> Result<ComponentId> {
        self.netlist_mut().add_component(name, size)
    }

    fn add_connection(&mut self, a: &str, b: &str, weight: f64) -> Result<()> {
        self.netlist_mut().add_connection(a, b, weight)
    }

    fn optimize(&mut self, config: &Self::Config) -> Result<PlacementResult> {
        self.optimize_until(config, &AtomicBool::new(false))
    }

    /// Like [`PlacementEngine::optimize`], but stops early once `canceled` is set. The
    /// flag is polled once per iteration.
    ///
    /// # Panics
    ///
    /// Panics if no component has been registered.
    fn optimize_until(&mut self, config: &Self::Config, canceled: &AtomicBool) -> Result<PlacementResult>;
}

/// What to do when a component cannot be placed within its attempt budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum OverlapPolicy {
    /// Fall back to a forced, possibly overlapping position and report it.
    #[default]
    Relax,
    /// Never return an overlapping layout; fail the run if no valid one exists.
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Phase {
    Initialization,
    Rollout,
    Mutation,
    Crossover,
    /// The returned layout itself breaks the bounds or overlap invariant.
    Validation,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Phase::Initialization => "initialization",
            Phase::Rollout => "rollout",
            Phase::Mutation => "mutation",
            Phase::Crossover => "crossover",
            Phase::Validation => "validation",
        };
        f.write_str(name)
    }
}

/// A component exhausted its attempt budget `count` times during `phase`.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacementFailure {
    pub component: String,
    pub phase: Phase,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineStats {
    Mcts {
        tree_visits: u32,
        tree_size: usize,
    },
    Genetic {
        fitness: f64,
        best_fitness_history: Vec<f64>,
        avg_fitness_history: Vec<f64>,
    },
    Cellular {
        initial_cost: f64,
        /// Cost after every iteration, not just the best seen.
        cost_history: Vec<f64>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacementResult {
    pub layout: Layout,
    pub cost: f64,
    /// Best cost seen so far, recorded after every iteration. Never increases.
    pub history: Vec<f64>,
    pub iterations: u32,
    pub canceled: bool,
    pub failures: Vec<PlacementFailure>,
    pub stats: EngineStats,
}

impl PlacementResult {
    /// Some component had to be placed outside the rules at least once.
    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn failure_count(&self) -> u32 {
        self.failures.iter().map(|f| f.count).sum()
    }
}

#[derive(Debug, Default)]
pub(crate) struct FailureLog {
    counts: FnvHashMap<(ComponentId, Phase), u32>,
}

impl FailureLog {
    pub fn record(&mut self, netlist: &Netlist, id: ComponentId, phase: Phase) {
        let count = self.counts.entry((id, phase)).or_insert(0);
        *count += 1;
        let component = netlist.component(id).name.as_str();
        if *count == 1 {
            warn!(component:%, phase:%; "placement attempt budget exhausted");
        } else {
            trace!(component:%, phase:%, count = *count; "placement attempt budget exhausted again");
        }
    }

    /// The failure seen most often, lowest id first on ties.
    pub fn worst(&self) -> Option<(ComponentId, Phase)> {
        self.counts
            .iter()
            .max_by_key(|&(&key, &count)| (count, std::cmp::Reverse(key)))
            .map(|(&key, _)| key)
    }

    fn into_failures(self, netlist: &Netlist) -> Vec<PlacementFailure> {
        self.counts
            .into_iter()
            .sorted_by_key(|&(key, _)| key)
            .map(|((id, phase), count)| PlacementFailure {
                component: netlist.component(id).name.clone(),
                phase,
                count,
            })
            .collect()
    }
}

/// Bookkeeping common to every engine run.
#[derive(Debug, Default)]
pub(crate) struct Run {
    pub history: Vec<f64>,
    pub failures: FailureLog,
    pub iterations: u32,
    pub canceled: bool,
}

impl Run {
    pub fn should_stop(&mut self, canceled: &AtomicBool) -> bool {
        if canceled.load(Ordering::Relaxed) {
            self.canceled = true;
        }
        self.canceled
    }

    pub fn finish(mut self, netlist: &Netlist, best: &[Option<Point>], cost: f64, stats: EngineStats) -> PlacementResult {
        for id in netlist.violations(best) {
            self.failures.record(netlist, id, Phase::Validation);
        }
        PlacementResult {
            layout: netlist.layout(best),
            cost,
            history: self.history,
            iterations: self.iterations,
            canceled: self.canceled,
            failures: self.failures.into_failures(netlist),
            stats,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Seeded rng that raises a cancel flag on its `limit + 1`th draw, so engines
    /// can be stopped at an exact point of a run.
    pub struct CancelAfter<'a> {
        rng: StdRng,
        pub draws: u64,
        limit: u64,
        flag: &'a AtomicBool,
    }

    impl<'a> CancelAfter<'a> {
        pub fn new(seed: u64, limit: u64, flag: &'a AtomicBool) -> Self {
            CancelAfter { rng: StdRng::seed_from_u64(seed), draws: 0, limit, flag }
        }

        fn tick(&mut self) {
            self.draws += 1;
            if self.draws > self.limit {
                self.flag.store(true, Ordering::Relaxed);
            }
        }
    }

    impl RngCore for CancelAfter<'_> {
        fn next_u32(&mut self) -> u32 {
            self.tick();
            self.rng.next_u32()
        }

        fn next_u64(&mut self) -> u64 {
            self.tick();
            self.rng.next_u64()
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            self.tick();
            self.rng.fill_bytes(dest)
        }

        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
            self.tick();
            self.rng.try_fill_bytes(dest)
        }
    }
}
