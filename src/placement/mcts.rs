//! Monte Carlo Tree Search over partial placements.
//!
//! A node's state places a prefix of the components; its actions are a handful of
//! sampled free positions for every component it has not placed yet. Rollouts
//! finish the placement at random and are scored with the shared wirelength.

use fehler::{throw, throws};
use log::{debug, info, trace};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::AtomicBool;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::{EngineStats, FailureLog, OverlapPolicy, Phase, PlacementEngine, PlacementResult, Run};
use crate::consts::{MCTS_LOG_INTERVAL, PLACEMENT_ATTEMPTS, ROLLOUT_FAILURE_COST};
use crate::cost::{fitness, wirelength};
use crate::error::{Error, Result};
use crate::pcb::{ComponentId, Netlist, Point, Positions};

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MctsConfig {
    pub iterations: u32,
    /// `C` in UCB1.
    pub exploration_weight: f64,
    /// Candidate positions sampled per unplaced component when a node is created.
    pub samples_per_component: u32,
    pub overlap_policy: OverlapPolicy,
}

impl Default for MctsConfig {
    fn default() -> Self {
        MctsConfig {
            iterations: 1000,
            exploration_weight: 1.414,
            samples_per_component: 10,
            overlap_policy: OverlapPolicy::default(),
        }
    }
}

impl MctsConfig {
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_exploration_weight(mut self, weight: f64) -> Self {
        self.exploration_weight = weight;
        self
    }

    pub fn with_samples_per_component(mut self, samples: u32) -> Self {
        self.samples_per_component = samples;
        self
    }

    pub fn with_overlap_policy(mut self, policy: OverlapPolicy) -> Self {
        self.overlap_policy = policy;
        self
    }

    #[throws(Error)]
    pub fn validate(&self) {
        if self.iterations == 0 {
            throw!(Error::InvalidConfig("MCTS needs at least one iteration".to_owned()));
        }
        if !self.exploration_weight.is_finite() || self.exploration_weight < 0. {
            throw!(Error::InvalidConfig(format!(
                "exploration weight must be finite and non-negative, got {}",
                self.exploration_weight
            )));
        }
        if self.samples_per_component == 0 {
            throw!(Error::InvalidConfig("samples per component must be positive".to_owned()));
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Action {
    component: ComponentId,
    at: Point,
}

#[derive(Debug)]
struct Node {
    parent: Option<usize>,
    children: Vec<usize>,
    state: Positions,
    untried: Vec<Action>,
    visits: u32,
    value: f64,
}

impl Node {
    fn is_terminal(&self) -> bool {
        self.state.iter().all(Option::is_some)
    }

    fn is_fully_expanded(&self) -> bool {
        self.untried.is_empty()
    }

    fn ucb1(&self, parent_visits: u32, exploration_weight: f64) -> f64 {
        if self.visits == 0 {
            return f64::INFINITY;
        }
        let exploitation = self.value / self.visits as f64;
        if parent_visits == 0 {
            return exploitation;
        }
        exploitation + exploration_weight * ((parent_visits as f64).ln() / self.visits as f64).sqrt()
    }
}

fn placed(state: &[Option<Point>]) -> usize {
    state.iter().filter(|p| p.is_some()).count()
}

/// Walks down from the root along the best UCB1 child until a node can still be expanded.
fn select(tree: &[Node], exploration_weight: f64) -> usize {
    let mut current = 0;
    loop {
        let node = &tree[current];
        if node.is_terminal() || !node.is_fully_expanded() {
            return current;
        }
        let score = |child: usize| tree[child].ucb1(node.visits, exploration_weight);
        match node.children.iter().copied().max_by(|&a, &b| score(a).total_cmp(&score(b))) {
            Some(child) => current = child,
            // every sampled action was exhausted without producing a child
            None => return current,
        }
    }
}

fn backpropagate(tree: &mut [Node], mut index: usize, reward: f64) {
    loop {
        let node = &mut tree[index];
        node.visits += 1;
        node.value += reward;
        match node.parent {
            Some(parent) => index = parent,
            None => break,
        }
    }
}

pub struct Mcts<R = StdRng> {
    netlist: Netlist,
    rng: R,
}

impl Mcts<StdRng> {
    pub fn with_seed(netlist: Netlist, seed: u64) -> Self {
        Mcts::new(netlist, StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> Mcts<R> {
    pub fn new(netlist: Netlist, rng: R) -> Self {
        Mcts { netlist, rng }
    }

    fn new_node(&mut self, parent: Option<usize>, state: Positions, samples: u32) -> Node {
        let mut untried = Vec::new();
        for component in (0..self.netlist.len()).filter(|&id| state[id].is_none()) {
            for _ in 0..samples {
                if let Some(at) = self.netlist.random_free_position(&state, component, &mut self.rng, PLACEMENT_ATTEMPTS) {
                    untried.push(Action { component, at });
                }
            }
        }
        Node { parent, children: Vec::new(), state, untried, visits: 0, value: 0. }
    }

    /// Adds one child for a random untried action of `leaf`. Returns `leaf` itself when
    /// there is nothing left to try.
    fn expand(&mut self, tree: &mut Vec<Node>, leaf: usize, samples: u32) -> usize {
        let node = &mut tree[leaf];
        if node.is_terminal() || node.untried.is_empty() {
            return leaf;
        }
        let action = node.untried.swap_remove(self.rng.gen_range(0, node.untried.len()));
        let mut state = node.state.clone();
        state[action.component] = Some(action.at);

        let child = self.new_node(Some(leaf), state, samples);
        tree.push(child);
        let index = tree.len() - 1;
        tree[leaf].children.push(index);
        index
    }

    /// Places the remaining components at random free spots. On failure the partial
    /// state reached so far is returned as the error.
    fn rollout(&mut self, from: &[Option<Point>], failures: &mut FailureLog) -> Result<Positions, Positions> {
        let mut state = from.to_vec();
        for id in 0..self.netlist.len() {
            if state[id].is_some() {
                continue;
            }
            match self.netlist.random_free_position(&state, id, &mut self.rng, PLACEMENT_ATTEMPTS) {
                Some(at) => state[id] = Some(at),
                None => {
                    failures.record(&self.netlist, id, Phase::Rollout);
                    return Err(state);
                }
            }
        }
        Ok(state)
    }

    /// Result when no rollout ever produced a complete layout.
    #[throws(Error)]
    fn fallback(&mut self, policy: OverlapPolicy, mut partial: Positions, failures: &FailureLog) -> (Positions, f64) {
        match (policy, failures.worst()) {
            (OverlapPolicy::Strict, Some((id, phase))) => throw!(Error::PlacementFailure {
                component: self.netlist.component(id).name.clone(),
                phase,
            }),
            (OverlapPolicy::Relax, Some(_)) => {
                for id in 0..self.netlist.len() {
                    if partial[id].is_none() {
                        partial[id] = Some(self.netlist.random_position(id, &mut self.rng));
                    }
                }
                let cost = wirelength(&self.netlist, &partial);
                (partial, cost)
            }
            // canceled before anything was tried
            (_, None) => {
                let cost = wirelength(&self.netlist, &partial);
                (partial, cost)
            }
        }
    }
}

impl<R: Rng> PlacementEngine for Mcts<R> {
    type Config = MctsConfig;

    fn netlist(&self) -> &Netlist {
        &self.netlist
    }

    fn netlist_mut(&mut self) -> &mut Netlist {
        &mut self.netlist
    }

    fn optimize_until(&mut self, config: &MctsConfig, canceled: &AtomicBool) -> Result<PlacementResult> {
        config.validate()?;
        assert!(!self.netlist.is_empty(), "nothing to place, register components first");
        info!(engine = "mcts", components = self.netlist.len(), iterations = config.iterations; "Starting placement");

        let root = self.new_node(None, vec![None; self.netlist.len()], config.samples_per_component);
        let mut deepest = root.state.clone();
        let mut tree = vec![root];
        let mut run = Run::default();
        let mut best: Option<(Positions, f64)> = None;

        while run.iterations < config.iterations && !run.should_stop(canceled) {
            let leaf = select(&tree, config.exploration_weight);
            let node = self.expand(&mut tree, leaf, config.samples_per_component);

            let reward = match self.rollout(&tree[node].state, &mut run.failures) {
                Ok(complete) => {
                    let cost = wirelength(&self.netlist, &complete);
                    if best.as_ref().map_or(true, |&(_, best_cost)| cost < best_cost) {
                        trace!(iteration = run.iterations, cost; "New best layout");
                        best = Some((complete, cost));
                    }
                    fitness(cost)
                }
                Err(partial) => {
                    if placed(&partial) > placed(&deepest) {
                        deepest = partial;
                    }
                    fitness(ROLLOUT_FAILURE_COST)
                }
            };
            backpropagate(&mut tree, node, reward);

            run.iterations += 1;
            let best_cost = best.as_ref().map_or(f64::INFINITY, |&(_, cost)| cost);
            run.history.push(best_cost);
            if run.iterations % MCTS_LOG_INTERVAL == 0 {
                debug!(iteration = run.iterations, best_cost, tree_size = tree.len(); "MCTS progress");
            }
        }

        let stats = EngineStats::Mcts { tree_visits: tree[0].visits, tree_size: tree.len() };
        let (positions, cost) = match best {
            Some(best) => best,
            None => self.fallback(config.overlap_policy, deepest, &run.failures)?,
        };

        let result = run.finish(&self.netlist, &positions, cost, stats);
        info!(engine = "mcts", cost = result.cost, iterations = result.iterations, failures = result.failure_count(); "Placement finished");
        Ok(result)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pcb::Board;
    use std::sync::atomic::Ordering;

    fn coupled_pair() -> Netlist {
        let mut netlist = Netlist::new(Board::new(100., 80.).unwrap());
        netlist.add_component("A", (10., 10.)).unwrap();
        netlist.add_component("B", (10., 10.)).unwrap();
        netlist.add_connection("A", "B", 1.).unwrap();
        netlist
    }

    fn overcrowded() -> Netlist {
        let mut netlist = Netlist::new(Board::new(20., 20.).unwrap());
        for name in &["A", "B", "C", "D", "E"] {
            netlist.add_component(*name, (10., 10.)).unwrap();
        }
        netlist.add_connection("A", "E", 1.).unwrap();
        netlist
    }

    #[test]
    fn config_is_validated() {
        assert!(MctsConfig::default().validate().is_ok());
        assert!(matches!(MctsConfig::default().with_iterations(0).validate(), Err(Error::InvalidConfig(_))));
        assert!(matches!(MctsConfig::default().with_samples_per_component(0).validate(), Err(Error::InvalidConfig(_))));
        assert!(matches!(
            MctsConfig::default().with_exploration_weight(f64::NAN).validate(),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn unvisited_children_are_tried_first() {
        let node = Node { parent: Some(0), children: vec![], state: vec![], untried: vec![], visits: 0, value: 0. };
        assert_eq!(node.ucb1(10, 1.414), f64::INFINITY);

        let node = Node { visits: 4, value: 2., ..node };
        assert_eq!(node.ucb1(0, 1.414), 0.5);
        assert!(node.ucb1(10, 1.414) > 0.5);
    }

    #[test]
    fn backpropagation_reaches_the_root() {
        let leaf = |parent| Node { parent, children: vec![], state: vec![], untried: vec![], visits: 0, value: 0. };
        let mut tree = vec![leaf(None), leaf(Some(0)), leaf(Some(1))];
        backpropagate(&mut tree, 2, 0.25);
        backpropagate(&mut tree, 1, 0.5);
        assert_eq!((tree[0].visits, tree[0].value), (2, 0.75));
        assert_eq!((tree[1].visits, tree[1].value), (2, 0.75));
        assert_eq!((tree[2].visits, tree[2].value), (1, 0.25));
    }

    #[test]
    fn search_produces_a_valid_layout() {
        let mut mcts = Mcts::with_seed(coupled_pair(), 5);
        let config = MctsConfig::default().with_iterations(200);
        let result = mcts.optimize(&config).unwrap();

        assert_eq!(result.iterations, 200);
        assert_eq!(result.history.len(), 200);
        assert_eq!(result.layout.len(), 2);
        assert!(!result.is_degraded());
        assert_eq!(*result.history.last().unwrap(), result.cost);
        match result.stats {
            EngineStats::Mcts { tree_visits, tree_size } => {
                assert_eq!(tree_visits, 200);
                assert!(tree_size <= 201);
            }
            _ => panic!("wrong stats"),
        }
    }

    #[test]
    fn canceled_run_returns_immediately() {
        let mut mcts = Mcts::with_seed(coupled_pair(), 1);
        let canceled = AtomicBool::new(true);
        let result = mcts.optimize_until(&MctsConfig::default(), &canceled).unwrap();
        assert!(result.canceled);
        assert_eq!(result.iterations, 0);
        assert!(result.layout.is_empty());
        assert_eq!(result.cost, f64::INFINITY);
        assert!(canceled.load(Ordering::Relaxed));
    }

    #[test]
    fn overcrowded_board_is_reported() {
        let config = MctsConfig::default().with_iterations(30);
        let relaxed = Mcts::with_seed(overcrowded(), 2).optimize(&config).unwrap();
        assert!(relaxed.failures.iter().any(|f| f.phase == Phase::Rollout));
        assert!(relaxed.failures.iter().any(|f| f.phase == Phase::Validation));
        assert_eq!(relaxed.layout.len(), 5);

        let strict = config.with_overlap_policy(OverlapPolicy::Strict);
        let err = Mcts::with_seed(overcrowded(), 2).optimize(&strict).unwrap_err();
        assert!(matches!(err, Error::PlacementFailure { phase: Phase::Rollout, .. }));
    }

    #[test]
    fn registration_goes_through_the_engine() {
        let mut mcts = Mcts::with_seed(Netlist::new(Board::new(10., 10.).unwrap()), 0);
        mcts.add_component("A", (1., 1.)).unwrap();
        assert_eq!(mcts.add_component("A", (1., 1.)), Err(Error::DuplicateComponent("A".to_owned())));
        assert_eq!(
            mcts.add_connection("A", "B", 1.),
            Err(Error::UnknownComponentReference("B".to_owned()))
        );
        assert_eq!(mcts.netlist().len(), 1);
    }
}
