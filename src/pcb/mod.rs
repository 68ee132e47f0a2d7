//! Board, component and connectivity model shared by every placement engine.
//!
//! Components live in an arena indexed by [`ComponentId`]; names only matter at
//! the API boundary. Connections are the edges of an undirected graph whose node
//! indices coincide with the component ids.

use nalgebra::base::Vector2;
use nalgebra::geometry::Point2;
use fehler::{throw, throws};
use fnv::FnvHashMap;
use itertools::Itertools;
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use rand::Rng;
use std::collections::BTreeMap;

use crate::consts::{EPSILON, MAX_GRID_CELLS};
use crate::error::Error;

mod grid;

pub use grid::{Cell, CellVector, Direction, OccupancyGrid, ALL_DIRECTIONS};

/// Position or extent in board units (mm).
pub type Point = Point2<f64>;
pub type Vector = Vector2<f64>;

/// Dense index of a registered component.
pub type ComponentId = usize;

/// Working copy of a placement, indexed by [`ComponentId`]. `None` is unplaced.
pub type Positions = Vec<Option<Point>>;

/// Final placement keyed by component name. Positions are top left corners.
pub type Layout = BTreeMap<String, Point>;

/// `a` must be top left and `b` must be bottom right
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub a: Point,
    pub b: Point,
}

impl Rect {
    /// Interiors intersect. Rectangles that only share an edge do not overlap.
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.a.x < other.b.x - EPSILON
            && other.a.x < self.b.x - EPSILON
            && self.a.y < other.b.y - EPSILON
            && other.a.y < self.b.y - EPSILON
    }

    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.a.x >= self.a.x - EPSILON
            && other.a.y >= self.a.y - EPSILON
            && other.b.x <= self.b.x + EPSILON
            && other.b.y <= self.b.y + EPSILON
    }
}

fn is_positive(v: f64) -> bool {
    v.is_finite() && v > 0.
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Board {
    size: Vector,
}

impl Board {
    #[throws(Error)]
    pub fn new(width: f64, height: f64) -> Board {
        if !is_positive(width) || !is_positive(height) {
            throw!(Error::InvalidConfig(format!("board size must be positive, got {}x{}", width, height)));
        }
        Board { size: Vector::new(width, height) }
    }

    pub fn width(&self) -> f64 {
        self.size.x
    }

    pub fn height(&self) -> f64 {
        self.size.y
    }

    pub fn size(&self) -> Vector {
        self.size
    }

    pub fn rect(&self) -> Rect {
        Rect { a: Point::origin(), b: Point::from(self.size) }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub name: String,
    pub size: Vector,
}

impl Component {
    pub fn rect_at(&self, at: Point) -> Rect {
        Rect { a: at, b: at + self.size }
    }

    pub fn center_at(&self, at: Point) -> Point {
        at + self.size / 2.
    }

    /// Footprint in whole grid cells, at least one cell per axis.
    /// Footprint in whole cells, rounded up. Blocks wider than any allowed grid
    /// are clamped to one cell past [`MAX_GRID_CELLS`], where they still never fit.
    pub fn grid_size(&self, resolution: f64) -> CellVector {
        let cap = MAX_GRID_CELLS as f64 + 1.;
        let cells = |mm: f64| (mm / resolution).ceil().max(1.).min(cap) as i32;
        CellVector::new(cells(self.size.x), cells(self.size.y))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Connection {
    pub a: ComponentId,
    pub b: ComponentId,
    pub weight: f64,
}

/// Everything registered for one placement problem.
#[derive(Debug, Clone)]
pub struct Netlist {
    board: Board,
    components: Vec<Component>,
    index: FnvHashMap<String, ComponentId>,
    graph: UnGraph<(), f64>,
}

impl Netlist {
    pub fn new(board: Board) -> Netlist {
        Netlist {
            board,
            components: Vec::new(),
            index: FnvHashMap::default(),
            graph: UnGraph::default(),
        }
    }

    #[throws(Error)]
    pub fn add_component(&mut self, name: impl Into<String>, size: (f64, f64)) -> ComponentId {
        let name = name.into();
        let (width, height) = size;
        if !is_positive(width) || !is_positive(height) {
            throw!(Error::InvalidConfig(format!("component `{}` has non-positive size {}x{}", name, width, height)));
        }
        if self.index.contains_key(&name) {
            throw!(Error::DuplicateComponent(name));
        }

        let id = self.components.len();
        let node = self.graph.add_node(());
        debug_assert_eq!(node.index(), id);

        self.index.insert(name.clone(), id);
        self.components.push(Component { name, size: Vector::new(width, height) });
        id
    }

    #[throws(Error)]
    pub fn add_connection(&mut self, a: &str, b: &str, weight: f64) {
        let a = self.lookup(a)?;
        let b = self.lookup(b)?;
        if !is_positive(weight) {
            throw!(Error::InvalidConfig(format!("connection weight must be positive, got {}", weight)));
        }
        self.graph.add_edge(NodeIndex::new(a), NodeIndex::new(b), weight);
    }

    pub fn id(&self, name: &str) -> Option<ComponentId> {
        self.index.get(name).copied()
    }

    #[throws(Error)]
    fn lookup(&self, name: &str) -> ComponentId {
        match self.id(name) {
            Some(id) => id,
            None => throw!(Error::UnknownComponentReference(name.to_owned())),
        }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn component(&self, id: ComponentId) -> &Component {
        &self.components[id]
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn connections(&self) -> impl Iterator<Item = Connection> + '_ {
        self.graph.edge_references().map(|e| Connection {
            a: e.source().index(),
            b: e.target().index(),
            weight: *e.weight(),
        })
    }

    pub fn connection_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn fits_board(&self, id: ComponentId, at: Point) -> bool {
        self.board.rect().contains_rect(&self.component(id).rect_at(at))
    }

    /// `id` may sit at `at` without leaving the board or overlapping any other placed component.
    pub fn is_free(&self, positions: &[Option<Point>], id: ComponentId, at: Point) -> bool {
        if !self.fits_board(id, at) {
            return false;
        }
        let rect = self.component(id).rect_at(at);
        positions
            .iter()
            .enumerate()
            .filter(|&(other, _)| other != id)
            .filter_map(|(other, p)| p.map(|p| self.component(other).rect_at(p)))
            .all(|other| !rect.overlaps(&other))
    }

    /// Uniform draw of a top left corner keeping `id` on the board. Components larger
    /// than the board are pinned to the origin on the offending axis.
    pub fn random_position<R: Rng>(&self, id: ComponentId, rng: &mut R) -> Point {
        let room = self.room(id);
        Point::new(sample_axis(rng, room.x), sample_axis(rng, room.y))
    }

    pub fn random_free_position<R: Rng>(
        &self, positions: &[Option<Point>], id: ComponentId, rng: &mut R, attempts: u32,
    ) -> Option<Point> {
        (0..attempts)
            .map(|_| self.random_position(id, rng))
            .find(|&at| self.is_free(positions, id, at))
    }

    pub fn clamp_to_board(&self, id: ComponentId, at: Point) -> Point {
        let room = self.room(id);
        Point::new(at.x.max(0.).min(room.x.max(0.)), at.y.max(0.).min(room.y.max(0.)))
    }

    fn room(&self, id: ComponentId) -> Vector {
        self.board.size() - self.component(id).size
    }

    /// Placed components that leave the board or overlap another, in id order.
    pub fn violations(&self, positions: &[Option<Point>]) -> Vec<ComponentId> {
        let mut bad = vec![false; self.len()];
        let placed = positions.iter().enumerate().filter_map(|(id, p)| p.map(|p| (id, p)));

        for (id, at) in placed.clone() {
            if !self.fits_board(id, at) {
                bad[id] = true;
            }
        }
        for ((a, pa), (b, pb)) in placed.tuple_combinations() {
            if self.component(a).rect_at(pa).overlaps(&self.component(b).rect_at(pb)) {
                bad[a] = true;
                bad[b] = true;
            }
        }

        bad.iter().enumerate().filter(|&(_, &b)| b).map(|(id, _)| id).collect()
    }

    pub fn layout(&self, positions: &[Option<Point>]) -> Layout {
        positions
            .iter()
            .enumerate()
            .filter_map(|(id, p)| p.map(|p| (self.component(id).name.clone(), p)))
            .collect()
    }

    /// Inverse of [`Netlist::layout`]. Names that are not registered are rejected.
    #[throws(Error)]
    pub fn positions(&self, layout: &Layout) -> Positions {
        let mut positions = vec![None; self.len()];
        for (name, &at) in layout {
            positions[self.lookup(name)?] = Some(at);
        }
        positions
    }
}

fn sample_axis<R: Rng>(rng: &mut R, room: f64) -> f64 {
    if room > 0. {
        rng.gen_range(0., room)
    } else {
        0.
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn netlist() -> Netlist {
        let mut netlist = Netlist::new(Board::new(100., 80.).unwrap());
        netlist.add_component("A", (10., 10.)).unwrap();
        netlist.add_component("B", (10., 10.)).unwrap();
        netlist
    }

    #[test]
    fn board_rejects_non_positive_size() {
        assert!(matches!(Board::new(0., 10.), Err(Error::InvalidConfig(_))));
        assert!(matches!(Board::new(10., -1.), Err(Error::InvalidConfig(_))));
        assert!(matches!(Board::new(f64::NAN, 10.), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn duplicate_component_is_rejected() {
        let mut netlist = netlist();
        assert_eq!(netlist.add_component("A", (1., 1.)), Err(Error::DuplicateComponent("A".to_owned())));
        assert_eq!(netlist.len(), 2);
    }

    #[test]
    fn dangling_connection_is_rejected() {
        let mut netlist = netlist();
        assert_eq!(
            netlist.add_connection("A", "C", 1.),
            Err(Error::UnknownComponentReference("C".to_owned()))
        );
        assert_eq!(netlist.connection_count(), 0);

        netlist.add_connection("A", "B", 2.5).unwrap();
        let connections: Vec<_> = netlist.connections().collect();
        assert_eq!(connections, vec![Connection { a: 0, b: 1, weight: 2.5 }]);
    }

    #[test]
    fn non_positive_weight_is_rejected() {
        let mut netlist = netlist();
        assert!(matches!(netlist.add_connection("A", "B", 0.), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn touching_edges_do_not_overlap() {
        let netlist = netlist();
        let positions = vec![Some(Point::new(0., 0.)), None];
        assert!(netlist.is_free(&positions, 1, Point::new(10., 0.)));
        assert!(netlist.is_free(&positions, 1, Point::new(0., 10.)));
        assert!(!netlist.is_free(&positions, 1, Point::new(9.5, 5.)));
        // off the board
        assert!(!netlist.is_free(&positions, 1, Point::new(95., 0.)));
        // a component never collides with itself
        assert!(netlist.is_free(&positions, 0, Point::new(2., 2.)));
    }

    #[test]
    fn violations_reports_both_sides_of_an_overlap() {
        let mut netlist = netlist();
        netlist.add_component("C", (5., 5.)).unwrap();
        let positions = vec![Some(Point::new(0., 0.)), Some(Point::new(5., 5.)), Some(Point::new(98., 0.))];
        assert_eq!(netlist.violations(&positions), vec![0, 1, 2]);

        let positions = vec![Some(Point::new(0., 0.)), Some(Point::new(10., 0.)), None];
        assert!(netlist.violations(&positions).is_empty());
    }

    #[test]
    fn oversized_component_never_finds_a_spot() {
        let mut netlist = netlist();
        let huge = netlist.add_component("HUGE", (120., 10.)).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let positions = vec![None; netlist.len()];
        assert_eq!(netlist.random_free_position(&positions, huge, &mut rng, 50), None);
        assert_eq!(netlist.random_position(huge, &mut rng).x, 0.);
    }

    #[test]
    fn random_positions_stay_on_the_board() {
        let netlist = netlist();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..200 {
            assert!(netlist.fits_board(0, netlist.random_position(0, &mut rng)));
        }
    }

    #[test]
    fn layout_round_trips_through_names() {
        let netlist = netlist();
        let positions = vec![Some(Point::new(1., 2.)), None];
        let layout = netlist.layout(&positions);
        assert_eq!(layout.len(), 1);
        assert_eq!(netlist.positions(&layout).unwrap(), positions);

        let mut unknown = layout.clone();
        unknown.insert("Z".to_owned(), Point::origin());
        assert_eq!(netlist.positions(&unknown), Err(Error::UnknownComponentReference("Z".to_owned())));
    }
}
