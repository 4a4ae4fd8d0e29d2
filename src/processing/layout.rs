use crate::error::Error;

/// Axis-aligned pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub const fn right(&self) -> u32 {
        self.x + self.width
    }

    pub const fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn center(&self) -> (f32, f32) {
        (
            self.x as f32 + self.width as f32 / 2.0,
            self.y as f32 + self.height as f32 / 2.0,
        )
    }
}

/// Layout of an `n × n` grid inside a square view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridGeometry {
    width: u32,
    squares_per_row: u32,
    margin: u32,
    square_dimension: u32,
}

impl GridGeometry {
    pub fn new(width: u32, squares_per_row: u32, margin: u32) -> Result<Self, Error> {
        if squares_per_row == 0 {
            return Err(Error::Geometry(
                "squares per row must be at least one".into(),
            ));
        }
        if width <= margin {
            return Err(Error::Geometry(format!(
                "view width {width} leaves no room for margin {margin}"
            )));
        }
        let square_dimension = (width - margin) / squares_per_row;
        if square_dimension <= margin {
            return Err(Error::Geometry(format!(
                "{squares_per_row} squares per row with margin {margin} do not fit in {width}px"
            )));
        }
        Ok(Self {
            width,
            squares_per_row,
            margin,
            square_dimension,
        })
    }

    pub const fn width(&self) -> u32 {
        self.width
    }

    pub const fn squares_per_row(&self) -> u32 {
        self.squares_per_row
    }

    /// Pitch of one cell, margin included.
    pub const fn square_dimension(&self) -> u32 {
        self.square_dimension
    }

    pub fn tile_count(&self) -> usize {
        (self.squares_per_row as usize).pow(2)
    }

    /// `(column, row)` of a row-major cell index.
    pub fn cell(&self, index: usize) -> (u32, u32) {
        let n = self.squares_per_row as usize;
        ((index % n) as u32, (index / n) as u32)
    }

    /// Where the tile is drawn on the surface.
    pub fn tile_rect(&self, index: usize) -> Rect {
        let (col, row) = self.cell(index);
        let side = self.square_dimension - self.margin;
        Rect::new(
            col * self.square_dimension + self.margin,
            row * self.square_dimension + self.margin,
            side,
            side,
        )
    }

    /// Which part of the scaled source image belongs to the tile.
    pub fn source_region(&self, index: usize) -> Rect {
        let (col, row) = self.cell(index);
        Rect::new(
            col * self.square_dimension,
            row * self.square_dimension,
            self.square_dimension,
            self.square_dimension,
        )
    }
}
