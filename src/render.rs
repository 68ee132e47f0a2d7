use std::iter::{self, FromIterator};

use crate::pcb::Netlist;
use crate::placement::PlacementResult;

/// Board outline plus one box per placed component, labelled with the first letter
/// of its name. One character covers `mm_per_char` board units in each direction.
#[must_use]
pub fn ascii(netlist: &Netlist, result: &PlacementResult, mm_per_char: f64) -> String {
    assert!(mm_per_char > 0., "mm_per_char must be positive");
    let board = netlist.board();
    let cols = (board.width() / mm_per_char).ceil() as i32;
    let rows = (board.height() / mm_per_char).ceil() as i32;

    let mut canvas = AsciiCanvas::new(cols + 2, rows + 2);
    canvas.frame(0, 0, cols + 1, rows + 1);

    for (name, &at) in &result.layout {
        let id = match netlist.id(name) {
            Some(id) => id,
            None => continue,
        };
        let rect = netlist.component(id).rect_at(at);
        // +1 for the board outline
        let x0 = (rect.a.x / mm_per_char).floor() as i32 + 1;
        let y0 = (rect.a.y / mm_per_char).floor() as i32 + 1;
        let x1 = ((rect.b.x / mm_per_char).ceil() as i32).max(x0);
        let y1 = ((rect.b.y / mm_per_char).ceil() as i32).max(y0);

        if x1 > x0 && y1 > y0 {
            canvas.frame(x0, y0, x1, y1);
        }
        let label = name.chars().next().map_or('?', |c| c.to_ascii_uppercase());
        canvas.set((x0 + x1) / 2, (y0 + y1) / 2, label);
    }

    canvas.render()
}

struct AsciiCanvas {
    canvas: Vec<Vec<char>>,
}

impl AsciiCanvas {
    fn new(width: i32, height: i32) -> Self {
        let canvas_row: Vec<char> = iter::repeat(' ').take(width.max(0) as usize).collect();
        AsciiCanvas { canvas: iter::repeat(canvas_row).take(height.max(0) as usize).collect() }
    }

    /// Box with corners at `(x0, y0)` and `(x1, y1)`, both inclusive.
    fn frame(&mut self, x0: i32, y0: i32, x1: i32, y1: i32) {
        for x in x0 + 1..x1 {
            self.set(x, y0, '─');
            self.set(x, y1, '─');
        }
        for y in y0 + 1..y1 {
            self.set(x0, y, '│');
            self.set(x1, y, '│');
        }
        self.set(x0, y0, '┌');
        self.set(x1, y0, '┐');
        self.set(x0, y1, '└');
        self.set(x1, y1, '┘');
    }

    /// Out of range writes are dropped.
    fn set(&mut self, x: i32, y: i32, c: char) {
        if x < 0 || y < 0 {
            return;
        }
        if let Some(cell) = self.canvas.get_mut(y as usize).and_then(|row| row.get_mut(x as usize)) {
            *cell = c;
        }
    }

    fn render(&self) -> String {
        self.canvas.iter().map(String::from_iter).collect::<Vec<_>>().join("\n")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pcb::{Board, Point};
    use crate::placement::EngineStats;

    #[test]
    fn draws_board_and_components() {
        let mut netlist = Netlist::new(Board::new(10., 4.).unwrap());
        netlist.add_component("amp", (4., 2.)).unwrap();
        netlist.add_component("b1", (1., 1.)).unwrap();
        let result = PlacementResult {
            layout: vec![("amp".to_owned(), Point::new(0., 0.)), ("b1".to_owned(), Point::new(6., 2.))]
                .into_iter()
                .collect(),
            cost: 0.,
            history: vec![0.],
            iterations: 1,
            canceled: false,
            failures: vec![],
            stats: EngineStats::Cellular { initial_cost: 0., cost_history: vec![0.] },
        };

        let expected = [
            "┌──────────┐",
            "│┌A─┐      │",
            "│└──┘      │",
            "│      B   │",
            "│          │",
            "└──────────┘",
        ]
        .join("\n");
        assert_eq!(ascii(&netlist, &result, 1.), expected);
    }

    #[test]
    fn coarse_scale_shrinks_the_canvas() {
        let netlist = Netlist::new(Board::new(100., 80.).unwrap());
        let result = PlacementResult {
            layout: Default::default(),
            cost: 0.,
            history: vec![],
            iterations: 0,
            canceled: true,
            failures: vec![],
            stats: EngineStats::Mcts { tree_visits: 0, tree_size: 1 },
        };
        let rendered = ascii(&netlist, &result, 10.);
        let lines: Vec<_> = rendered.lines().collect();
        assert_eq!(lines.len(), 10);
        assert!(lines.iter().all(|l| l.chars().count() == 12));
    }
}
