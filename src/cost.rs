//! Wirelength objective shared by all placement engines.

use fehler::throws;

use crate::error::Error;
use crate::pcb::{ComponentId, Layout, Netlist, Point};

/// Total weighted center-to-center distance over every connection.
///
/// Infinite as soon as one connection touches an unplaced component.
pub fn wirelength(netlist: &Netlist, positions: &[Option<Point>]) -> f64 {
    netlist
        .connections()
        .map(|c| {
            let placed = |id: ComponentId| positions.get(id).copied().flatten().map(|at| netlist.component(id).center_at(at));
            match (placed(c.a), placed(c.b)) {
                (Some(a), Some(b)) => c.weight * nalgebra::distance(&a, &b),
                _ => f64::INFINITY,
            }
        })
        .sum()
}

/// [`wirelength`] of a name keyed layout.
#[throws(Error)]
pub fn evaluate(netlist: &Netlist, layout: &Layout) -> f64 {
    wirelength(netlist, &netlist.positions(layout)?)
}

/// Maps a cost onto `(0, 1]`, higher is better. Infinite cost maps to zero.
pub fn fitness(cost: f64) -> f64 {
    1. / (1. + cost)
}
