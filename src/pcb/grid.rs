use nalgebra::base::Vector2;
use nalgebra::geometry::Point2;
use ndarray::{s, Array2};
use rand::Rng;
use fehler::{throw, throws};
use std::ops::Range;

use super::*;
use crate::consts::MAX_GRID_CELLS;
use crate::error::Error;

pub type Cell = Point2<i32>;
pub type CellVector = Vector2<i32>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}
pub const ALL_DIRECTIONS: [Direction; 4] = [Direction::Left, Direction::Right, Direction::Up, Direction::Down];
impl Direction {
    pub fn to_vector(&self) -> CellVector {
        match self {
            Direction::Up => CellVector::new(0, -1),
            Direction::Down => CellVector::new(0, 1),
            Direction::Left => CellVector::new(-1, 0),
            Direction::Right => CellVector::new(1, 0),
        }
    }
}

/// Board discretised into square cells; each component covers a block of cells.
#[derive(Debug, Clone)]
pub struct OccupancyGrid {
    resolution: f64,
    grid: Array2<usize>, // contains component id + 1 (zero is none)
    footprints: Vec<CellVector>,
    origins: Vec<Option<Cell>>,
}

impl OccupancyGrid {
    /// Fails if `resolution` asks for more than [`MAX_GRID_CELLS`] cells.
    #[throws(Error)]
    pub fn new(netlist: &Netlist, resolution: f64) -> OccupancyGrid {
        let board = netlist.board();
        let width = (board.width() / resolution).floor();
        let height = (board.height() / resolution).floor();
        let cap = MAX_GRID_CELLS as f64;
        // NaN compares false, so inf * 0 shapes are rejected too
        let fits = width <= cap && height <= cap && width * height <= cap;
        if !fits {
            throw!(Error::InvalidConfig(format!(
                "grid resolution {} needs a {}x{} grid, more than {} cells",
                resolution, width, height, MAX_GRID_CELLS
            )));
        }

        OccupancyGrid {
            resolution,
            grid: Array2::zeros((width as usize, height as usize)),
            footprints: netlist.components().iter().map(|c| c.grid_size(resolution)).collect(),
            origins: vec![None; netlist.len()],
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.grid.dim()
    }

    pub fn footprint(&self, id: ComponentId) -> CellVector {
        self.footprints[id]
    }

    pub fn origin(&self, id: ComponentId) -> Option<Cell> {
        self.origins[id]
    }

    /// Center of the component's block, in cells.
    pub fn center(&self, id: ComponentId) -> Option<Point2<f64>> {
        let origin = self.origins[id]?;
        let footprint = self.footprints[id];
        Some(Point2::new(
            origin.x as f64 + footprint.x as f64 / 2.,
            origin.y as f64 + footprint.y as f64 / 2.,
        ))
    }

    pub fn owner(&self, cell: Cell) -> Option<ComponentId> {
        if cell.x < 0 || cell.y < 0 {
            return None;
        }
        let idx = self.grid.get((cell.x as usize, cell.y as usize))?;
        idx.checked_sub(1)
    }

    /// Cell ranges covered by `id` when its origin is `at`, if that block is on the grid.
    pub fn block(&self, id: ComponentId, at: Cell) -> Option<(Range<usize>, Range<usize>)> {
        let (width, height) = self.dim();
        let end = at + self.footprints[id];
        if at.x < 0 || at.y < 0 || end.x as usize > width || end.y as usize > height {
            return None;
        }
        Some((at.x as usize..end.x as usize, at.y as usize..end.y as usize))
    }

    pub fn is_free(&self, id: ComponentId, at: Cell) -> bool {
        match self.block(id, at) {
            Some((xs, ys)) => self.grid.slice(s![xs, ys]).iter().all(|&v| v == 0 || v == id + 1),
            None => false,
        }
    }

    pub fn place(&mut self, id: ComponentId, at: Cell) {
        assert!(self.origins[id].is_none(), "component {} is already on the grid", id);
        assert!(self.is_free(id, at), "Conflicting components");
        let (xs, ys) = self.block(id, at).expect("checked by is_free");
        self.grid.slice_mut(s![xs, ys]).mapv_inplace(|_| id + 1);
        self.origins[id] = Some(at);
    }

    pub fn remove(&mut self, id: ComponentId) {
        if let Some(at) = self.origins[id].take() {
            if let Some((xs, ys)) = self.block(id, at) {
                self.grid.slice_mut(s![xs, ys]).mapv_inplace(|_| 0);
            }
        }
    }

    /// Shifts a placed component by `delta` if the destination is on the grid and free.
    pub fn try_move(&mut self, id: ComponentId, delta: CellVector) -> bool {
        let target = match self.origins[id] {
            Some(origin) => origin + delta,
            None => return false,
        };
        if !self.is_free(id, target) {
            return false;
        }
        self.remove(id);
        self.place(id, target);
        true
    }

    pub fn random_free_origin<R: Rng>(&self, id: ComponentId, rng: &mut R, attempts: u32) -> Option<Cell> {
        let (width, height) = self.dim();
        let footprint = self.footprints[id];
        if footprint.x as usize > width || footprint.y as usize > height {
            return None;
        }
        let max_x = width - footprint.x as usize;
        let max_y = height - footprint.y as usize;

        (0..attempts)
            .map(|_| Cell::new(rng.gen_range(0, max_x + 1) as i32, rng.gen_range(0, max_y + 1) as i32))
            .find(|&at| self.is_free(id, at))
    }

    /// Number of occupied cells among the 8 neighbours of every cell (zero padded).
    pub fn neighbour_density(&self) -> Array2<f64> {
        let (width, height) = self.dim();
        let mut padded = Array2::<f64>::zeros((width + 2, height + 2));
        padded
            .slice_mut(s![1..width + 1, 1..height + 1])
            .assign(&self.grid.mapv(|v| if v == 0 { 0. } else { 1. }));

        let mut density = Array2::<f64>::zeros((width, height));
        for dx in 0..3 {
            for dy in 0..3 {
                if (dx, dy) == (1, 1) {
                    continue;
                }
                density += &padded.slice(s![dx..dx + width, dy..dy + height]);
            }
        }
        density
    }

    /// Mean of `field` over the block `id` would cover at `at`.
    pub fn block_mean(&self, field: &Array2<f64>, id: ComponentId, at: Cell) -> Option<f64> {
        let (xs, ys) = self.block(id, at)?;
        let cells = (xs.len() * ys.len()) as f64;
        Some(field.slice(s![xs, ys]).sum() / cells)
    }

    /// Current placement converted back to board units.
    pub fn positions(&self) -> Positions {
        self.origins
            .iter()
            .map(|o| o.map(|c| Point::new(c.x as f64 * self.resolution, c.y as f64 * self.resolution)))
            .collect()
    }
}
