//! Generational genetic algorithm over complete placements.

use fehler::{throw, throws};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use std::sync::atomic::AtomicBool;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::{EngineStats, FailureLog, OverlapPolicy, Phase, PlacementEngine, PlacementResult, Run};
use crate::consts::{GENETIC_LOG_INTERVAL, MUTATION_ATTEMPTS, MUTATION_OFFSET, PLACEMENT_ATTEMPTS, TOURNAMENT_SIZE};
use crate::cost::{fitness, wirelength};
use crate::error::{Error, Result};
use crate::pcb::{Netlist, Positions, Vector};

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct GeneticConfig {
    pub population_size: u32,
    /// Per gene probability of a mutation.
    pub mutation_rate: f64,
    /// Per pair probability of a single point crossover.
    pub crossover_rate: f64,
    /// Fraction of each generation copied unchanged into the next.
    pub elitism_rate: f64,
    pub generations: u32,
    pub overlap_policy: OverlapPolicy,
}

impl Default for GeneticConfig {
    fn default() -> Self {
        GeneticConfig {
            population_size: 50,
            mutation_rate: 0.1,
            crossover_rate: 0.8,
            elitism_rate: 0.1,
            generations: 100,
            overlap_policy: OverlapPolicy::default(),
        }
    }
}

fn is_rate(rate: f64) -> bool {
    (0. ..=1.).contains(&rate)
}

impl GeneticConfig {
    pub fn with_population_size(mut self, size: u32) -> Self {
        self.population_size = size;
        self
    }

    pub fn with_mutation_rate(mut self, rate: f64) -> Self {
        self.mutation_rate = rate;
        self
    }

    pub fn with_crossover_rate(mut self, rate: f64) -> Self {
        self.crossover_rate = rate;
        self
    }

    pub fn with_elitism_rate(mut self, rate: f64) -> Self {
        self.elitism_rate = rate;
        self
    }

    pub fn with_generations(mut self, generations: u32) -> Self {
        self.generations = generations;
        self
    }

    pub fn with_overlap_policy(mut self, policy: OverlapPolicy) -> Self {
        self.overlap_policy = policy;
        self
    }

    #[throws(Error)]
    pub fn validate(&self) {
        if self.population_size == 0 {
            throw!(Error::InvalidConfig("population size must be positive".to_owned()));
        }
        if self.generations == 0 {
            throw!(Error::InvalidConfig("the genetic algorithm needs at least one generation".to_owned()));
        }
        for (name, rate) in &[
            ("mutation", self.mutation_rate),
            ("crossover", self.crossover_rate),
            ("elitism", self.elitism_rate),
        ] {
            if !is_rate(*rate) {
                throw!(Error::InvalidConfig(format!("{} rate must be within [0, 1], got {}", name, rate)));
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Individual {
    genes: Positions,
    cost: f64,
    fitness: f64,
}

/// First individual with the highest fitness.
fn fittest(population: &[Individual]) -> &Individual {
    population[1..]
        .iter()
        .fold(&population[0], |best, i| if i.fitness > best.fitness { i } else { best })
}

fn mean_fitness(population: &[Individual]) -> f64 {
    population.iter().map(|i| i.fitness).sum::<f64>() / population.len() as f64
}

pub struct Genetic<R = StdRng> {
    netlist: Netlist,
    rng: R,
}

impl Genetic<StdRng> {
    pub fn with_seed(netlist: Netlist, seed: u64) -> Self {
        Genetic::new(netlist, StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> Genetic<R> {
    pub fn new(netlist: Netlist, rng: R) -> Self {
        Genetic { netlist, rng }
    }

    fn individual(&self, genes: Positions) -> Individual {
        let cost = wirelength(&self.netlist, &genes);
        Individual { genes, cost, fitness: fitness(cost) }
    }

    #[throws(Error)]
    fn random_individual(&mut self, policy: OverlapPolicy, failures: &mut FailureLog) -> Individual {
        let mut genes = vec![None; self.netlist.len()];
        for id in 0..self.netlist.len() {
            let at = match self.netlist.random_free_position(&genes, id, &mut self.rng, PLACEMENT_ATTEMPTS) {
                Some(at) => at,
                None => {
                    failures.record(&self.netlist, id, Phase::Initialization);
                    if policy == OverlapPolicy::Strict {
                        throw!(Error::PlacementFailure {
                            component: self.netlist.component(id).name.clone(),
                            phase: Phase::Initialization,
                        });
                    }
                    self.netlist.random_position(id, &mut self.rng)
                }
            };
            genes[id] = Some(at);
        }
        self.individual(genes)
    }

    /// Index of the fittest of a few individuals drawn without replacement.
    fn tournament(&mut self, population: &[Individual]) -> usize {
        let size = TOURNAMENT_SIZE.min(population.len());
        index::sample(&mut self.rng, population.len(), size)
            .into_iter()
            .max_by(|&a, &b| population[a].fitness.total_cmp(&population[b].fitness))
            .unwrap_or(0)
    }

    /// Re-draws every gene that collides with an earlier one or leaves the board.
    /// Returns false if some gene could not be made legal.
    fn legalise(&mut self, genes: &mut Positions, failures: &mut FailureLog) -> bool {
        let mut legal = true;
        for id in 0..genes.len() {
            let at = match genes[id] {
                Some(at) => at,
                None => continue,
            };
            if self.netlist.is_free(&genes[..id], id, at) {
                continue;
            }
            match self.netlist.random_free_position(&genes[..id], id, &mut self.rng, PLACEMENT_ATTEMPTS) {
                Some(at) => genes[id] = Some(at),
                None => {
                    failures.record(&self.netlist, id, Phase::Crossover);
                    legal = false;
                }
            }
        }
        legal
    }

    fn crossover(
        &mut self, config: &GeneticConfig, first: &Individual, second: &Individual, failures: &mut FailureLog,
    ) -> (Positions, Positions) {
        let len = first.genes.len();
        if len < 2 || self.rng.gen::<f64>() >= config.crossover_rate {
            return (first.genes.clone(), second.genes.clone());
        }

        let point = self.rng.gen_range(1, len);
        let mut a = first.genes.clone();
        let mut b = second.genes.clone();
        a[point..].swap_with_slice(&mut b[point..]);

        let strict = config.overlap_policy == OverlapPolicy::Strict;
        if !self.legalise(&mut a, failures) && strict {
            a = first.genes.clone();
        }
        if !self.legalise(&mut b, failures) && strict {
            b = second.genes.clone();
        }
        (a, b)
    }

    fn mutate(&mut self, config: &GeneticConfig, genes: &mut Positions, failures: &mut FailureLog) {
        for id in 0..genes.len() {
            if self.rng.gen::<f64>() >= config.mutation_rate {
                continue;
            }
            let current = match genes[id] {
                Some(at) => at,
                None => continue,
            };

            let mut moved = None;
            for _ in 0..MUTATION_ATTEMPTS {
                let offset = Vector::new(
                    self.rng.gen_range(-MUTATION_OFFSET, MUTATION_OFFSET),
                    self.rng.gen_range(-MUTATION_OFFSET, MUTATION_OFFSET),
                );
                let at = self.netlist.clamp_to_board(id, current + offset);
                if self.netlist.is_free(genes, id, at) {
                    moved = Some(at);
                    break;
                }
            }

            match moved {
                Some(at) => genes[id] = Some(at),
                None => {
                    failures.record(&self.netlist, id, Phase::Mutation);
                    if config.overlap_policy == OverlapPolicy::Relax {
                        genes[id] = Some(self.netlist.random_position(id, &mut self.rng));
                    }
                }
            }
        }
    }
}

impl<R: Rng> PlacementEngine for Genetic<R> {
    type Config = GeneticConfig;

    fn netlist(&self) -> &Netlist {
        &self.netlist
    }

    fn netlist_mut(&mut self) -> &mut Netlist {
        &mut self.netlist
    }

    fn optimize_until(&mut self, config: &GeneticConfig, canceled: &AtomicBool) -> Result<PlacementResult> {
        config.validate()?;
        assert!(!self.netlist.is_empty(), "nothing to place, register components first");
        info!(
            engine = "genetic", components = self.netlist.len(), population = config.population_size,
            generations = config.generations; "Starting placement"
        );

        let size = config.population_size as usize;
        let elites = (size as f64 * config.elitism_rate) as usize;
        let mut run = Run::default();

        let mut population = Vec::with_capacity(size);
        for _ in 0..size {
            population.push(self.random_individual(config.overlap_policy, &mut run.failures)?);
        }

        let mut best = fittest(&population).clone();
        let mut best_fitness_history = vec![best.fitness];
        let mut avg_fitness_history = vec![mean_fitness(&population)];
        run.history.push(best.cost);
        debug!(generation = 0, best_cost = best.cost; "GA progress");

        while run.iterations < config.generations && !run.should_stop(canceled) {
            population.sort_by(|a, b| b.fitness.total_cmp(&a.fitness));
            let mut next = population[..elites].to_vec();

            while next.len() < size {
                let first = self.tournament(&population);
                let second = self.tournament(&population);
                let (mut a, mut b) = self.crossover(config, &population[first], &population[second], &mut run.failures);
                self.mutate(config, &mut a, &mut run.failures);
                self.mutate(config, &mut b, &mut run.failures);

                next.push(self.individual(a));
                if next.len() < size {
                    next.push(self.individual(b));
                }
            }
            population = next;

            let current = fittest(&population);
            if current.fitness > best.fitness {
                best = current.clone();
            }

            run.iterations += 1;
            run.history.push(best.cost);
            best_fitness_history.push(best.fitness);
            avg_fitness_history.push(mean_fitness(&population));
            if run.iterations % GENETIC_LOG_INTERVAL == 0 {
                debug!(generation = run.iterations, best_cost = best.cost; "GA progress");
            }
        }

        let stats = EngineStats::Genetic { fitness: best.fitness, best_fitness_history, avg_fitness_history };
        let result = run.finish(&self.netlist, &best.genes, best.cost, stats);
        info!(engine = "genetic", cost = result.cost, generations = result.iterations, failures = result.failure_count(); "Placement finished");
        Ok(result)
    }
}
