//! Spatial occurrence heat mapping.
//!
//! A heat mapper divides the source frame into a `rows x cols` grid and
//! counts object occurrences per cell, using the same bounding-box
//! test-point convention as the triggers. Attached to a trigger, it is fed
//! on every per-object event and renders its grid during pre-process.

use anyhow::{anyhow, Result};

use crate::display::{ColorPalette, DisplayMeta, RectangleDisplay};
use crate::geometry::BboxTestPoint;
use crate::{FrameMeta, ObjectMeta};

/// Grid accumulator of per-cell occurrence counts.
#[derive(Clone, Debug)]
pub struct OdeHeatMapper {
    name: String,
    cols: usize,
    rows: usize,
    grid_rect_width: u32,
    grid_rect_height: u32,
    bbox_test_point: BboxTestPoint,
    palette: ColorPalette,
    heat_map: Vec<Vec<u64>>,
    total_occurrences: u64,
    most_occurrences: u64,
}

impl OdeHeatMapper {
    /// Grid dimensions must be non-zero and the test point concrete.
    pub fn new(
        name: &str,
        cols: usize,
        rows: usize,
        bbox_test_point: BboxTestPoint,
        palette: ColorPalette,
    ) -> Result<Self> {
        if cols == 0 || rows == 0 {
            return Err(anyhow!("heat mapper '{}' requires a non-empty grid", name));
        }
        if bbox_test_point == BboxTestPoint::Any {
            return Err(anyhow!(
                "heat mapper '{}' requires a concrete bbox test point",
                name
            ));
        }
        Ok(Self {
            name: name.to_string(),
            cols,
            rows,
            grid_rect_width: 0,
            grid_rect_height: 0,
            bbox_test_point,
            palette,
            heat_map: vec![vec![0; cols]; rows],
            total_occurrences: 0,
            most_occurrences: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.cols, self.rows)
    }

    /// (total occurrences observed, highest single-cell count).
    pub fn metrics(&self) -> (u64, u64) {
        (self.total_occurrences, self.most_occurrences)
    }

    pub fn cell(&self, row: usize, col: usize) -> u64 {
        self.heat_map[row][col]
    }

    /// Accumulate one object occurrence.
    ///
    /// Cell dimensions are derived from the first frame seen; remainder
    /// pixels are absorbed by the last column and row.
    pub fn handle_occurrence(&mut self, frame: &FrameMeta, object: &ObjectMeta) {
        if self.grid_rect_width == 0 {
            self.grid_rect_width = frame.source_frame_width / self.cols as u32;
            self.grid_rect_height = frame.source_frame_height / self.rows as u32;
        }

        let coordinate = object
            .rect_params
            .test_point(self.bbox_test_point)
            .expect("heat mapper test point is concrete");

        let col = if self.grid_rect_width == 0 {
            0
        } else {
            ((coordinate.x.max(0.0) as u32 / self.grid_rect_width) as usize).min(self.cols - 1)
        };
        let row = if self.grid_rect_height == 0 {
            0
        } else {
            ((coordinate.y.max(0.0) as u32 / self.grid_rect_height) as usize).min(self.rows - 1)
        };

        self.heat_map[row][col] += 1;
        self.total_occurrences += 1;
        if self.heat_map[row][col] > self.most_occurrences {
            self.most_occurrences = self.heat_map[row][col];
        }
    }

    /// Render one filled rectangle per cell with at least two occurrences,
    /// colored by the cell's share of the hottest cell.
    pub fn add_display_meta(&mut self, display: &mut DisplayMeta) {
        if self.most_occurrences == 0 {
            return;
        }
        for row in 0..self.rows {
            for col in 0..self.cols {
                let count = self.heat_map[row][col];
                if count <= 1 {
                    continue;
                }
                let index = ((count * 10) as f64 / self.most_occurrences as f64).round() as usize;
                self.palette.set_index(index);
                let color = self.palette.current();
                display.add_rectangle(RectangleDisplay {
                    left: (col as u32 * self.grid_rect_width) as f32,
                    top: (row as u32 * self.grid_rect_height) as f32,
                    width: self.grid_rect_width as f32,
                    height: self.grid_rect_height as f32,
                    border_width: 0,
                    border_color: color,
                    has_bg_color: true,
                    bg_color: color,
                });
            }
        }
    }

    /// Zero all cells; dimensions and derived cell size are kept.
    pub fn reset(&mut self) {
        for row in self.heat_map.iter_mut() {
            for cell in row.iter_mut() {
                *cell = 0;
            }
        }
        self.total_occurrences = 0;
        self.most_occurrences = 0;
    }

    /// Fixed-width textual rendering of the grid, one line per row.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for row in &self.heat_map {
            for cell in row {
                out.push_str(&format!("{:>7}", cell));
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rectangle;

    fn frame() -> FrameMeta {
        FrameMeta {
            source_frame_width: 800,
            source_frame_height: 400,
            ..Default::default()
        }
    }

    fn object_at(x: f32, y: f32) -> ObjectMeta {
        // 10x10 box whose center lands on (x, y)
        ObjectMeta {
            rect_params: Rectangle::new(x - 5.0, y - 5.0, 10.0, 10.0),
            ..Default::default()
        }
    }

    fn mapper() -> OdeHeatMapper {
        OdeHeatMapper::new(
            "heat",
            8,
            4,
            BboxTestPoint::Center,
            ColorPalette::spectral(0.4),
        )
        .unwrap()
    }

    #[test]
    fn rejects_invalid_configuration() {
        let palette = ColorPalette::spectral(0.4);
        assert!(OdeHeatMapper::new("h", 0, 4, BboxTestPoint::Center, palette.clone()).is_err());
        assert!(OdeHeatMapper::new("h", 8, 4, BboxTestPoint::Any, palette).is_err());
    }

    #[test]
    fn totals_and_most_track_cells() {
        let mut mapper = mapper();
        let frame = frame();
        // cells are 100x100; (50, 50) -> cell (0, 0), (150, 50) -> (0, 1)
        mapper.handle_occurrence(&frame, &object_at(50.0, 50.0));
        mapper.handle_occurrence(&frame, &object_at(50.0, 50.0));
        mapper.handle_occurrence(&frame, &object_at(150.0, 50.0));

        let (total, most) = mapper.metrics();
        assert_eq!(total, 3);
        assert_eq!(most, 2);
        assert_eq!(mapper.cell(0, 0), 2);
        assert_eq!(mapper.cell(0, 1), 1);

        let sum: u64 = (0..4).flat_map(|r| (0..8).map(move |c| (r, c)))
            .map(|(r, c)| mapper.cell(r, c))
            .sum();
        assert_eq!(sum, total);
    }

    #[test]
    fn bottom_right_edge_clamps_into_grid() {
        let mut mapper = mapper();
        let frame = frame();
        // center exactly on the frame's bottom-right corner
        mapper.handle_occurrence(&frame, &object_at(800.0, 400.0));
        assert_eq!(mapper.cell(3, 7), 1);
    }

    #[test]
    fn display_meta_suppresses_sparse_cells() {
        let mut mapper = mapper();
        let frame = frame();
        mapper.handle_occurrence(&frame, &object_at(50.0, 50.0));
        mapper.handle_occurrence(&frame, &object_at(50.0, 50.0));
        mapper.handle_occurrence(&frame, &object_at(150.0, 50.0)); // count 1, suppressed

        let mut display = DisplayMeta::new();
        mapper.add_display_meta(&mut display);
        assert_eq!(display.rectangles.len(), 1);
        assert_eq!(display.rectangles[0].left, 0.0);
        assert_eq!(display.rectangles[0].width, 100.0);
    }

    #[test]
    fn reset_zeroes_cells_and_keeps_dimensions() {
        let mut mapper = mapper();
        let frame = frame();
        mapper.handle_occurrence(&frame, &object_at(50.0, 50.0));
        mapper.reset();
        assert_eq!(mapper.metrics(), (0, 0));
        assert_eq!(mapper.dimensions(), (8, 4));
        assert_eq!(mapper.cell(0, 0), 0);
    }

    #[test]
    fn dump_is_fixed_width() {
        let mut mapper = mapper();
        mapper.handle_occurrence(&frame(), &object_at(50.0, 50.0));
        let dump = mapper.dump();
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines.iter().all(|line| line.len() == 7 * 8));
    }
}
