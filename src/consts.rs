/// Random draws per component before giving up on a non-overlapping spot.
pub const PLACEMENT_ATTEMPTS: u32 = 100;

/// Local perturbation retries per mutated gene.
pub const MUTATION_ATTEMPTS: u32 = 20;

/// Maximum displacement (mm, per axis) of a local mutation.
pub const MUTATION_OFFSET: f64 = 20.0;

pub const TOURNAMENT_SIZE: usize = 3;

/// Cost assigned to a rollout that could not place every component.
pub const ROLLOUT_FAILURE_COST: f64 = 1_000_000.0;

/// Probability of a random single-cell move when no better neighbour exists.
pub const EXPLORATION_MOVE_PROBABILITY: f64 = 0.1;

/// Keeps the attraction field finite when two centers coincide.
pub const MIN_ATTRACTION_DISTANCE: f64 = 1e-6;

/// Largest occupancy grid the automaton will allocate, in cells. Also bounds
/// each grid side, so cell coordinates always fit an `i32`.
pub const MAX_GRID_CELLS: usize = 1 << 22;

/// Tolerance for bounds and overlap tests on continuous coordinates.
pub const EPSILON: f64 = 1e-9;

// progress log cadence
pub const MCTS_LOG_INTERVAL: u32 = 100;
pub const GENETIC_LOG_INTERVAL: u32 = 10;
pub const CELLULAR_LOG_INTERVAL: u32 = 20;
