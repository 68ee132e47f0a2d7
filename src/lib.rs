//! Rectangle placement on a fixed board, minimising weighted wirelength.
//!
//! Register components and connections on a [`Netlist`], hand it to one of the
//! engines in [`placement`] and call [`PlacementEngine::optimize`]:
//!
//! ```
//! use board_placer::{Board, Genetic, GeneticConfig, Netlist, PlacementEngine};
//!
//! let mut netlist = Netlist::new(Board::new(100., 80.)?);
//! netlist.add_component("U1", (10., 8.))?;
//! netlist.add_component("C1", (3., 2.))?;
//! netlist.add_connection("U1", "C1", 1.5)?;
//!
//! let result = Genetic::with_seed(netlist, 42).optimize(&GeneticConfig::default().with_generations(10))?;
//! assert_eq!(result.layout.len(), 2);
//! # Ok::<(), board_placer::Error>(())
//! ```

mod consts;
mod error;

pub mod benchmark;
pub mod cost;
pub mod pcb;
pub mod placement;
pub mod render;

pub use error::{Error, Result};
pub use pcb::{Board, ComponentId, Layout, Netlist, Point};
pub use placement::{
    CellularAutomaton, CellularConfig, EngineStats, Genetic, GeneticConfig, Mcts, MctsConfig, OverlapPolicy,
    Phase, PlacementEngine, PlacementFailure, PlacementResult,
};
