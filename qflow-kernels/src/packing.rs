//! 2-D shelf packing for merged readbacks
//!
//! Readback latency is paid per call, not per byte, so many small result
//! buffers are copied into one destination and read back together. Every
//! call site uses this one placement strategy; power-of-two inputs are just
//! a special case of it.

/// Position of one source buffer inside the packed destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Placement {
    #[inline]
    pub fn contains(&self, x: usize, y: usize) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }

    pub fn overlaps(&self, other: &Placement) -> bool {
        self.x < other.x + other.width
            && other.x < self.x + self.width
            && self.y < other.y + other.height
            && other.y < self.y + self.height
    }
}

/// Destination size plus one placement per source, in source order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackLayout {
    pub width: usize,
    pub height: usize,
    pub placements: Vec<Placement>,
}

impl PackLayout {
    pub fn cell_count(&self) -> usize {
        self.width * self.height
    }
}

/// Place rectangles of the given `(width, height)` sizes on shelves
///
/// Rectangles are placed tallest first, left to right, opening a new shelf
/// when the current one is full. The destination is at least as wide as the
/// widest rectangle and as wide as the power of two covering the square
/// root of the total area.
pub fn pack_shelves(sizes: &[(usize, usize)]) -> PackLayout {
    let area: usize = sizes.iter().map(|&(w, h)| w * h).sum();
    let widest = sizes.iter().map(|&(w, _)| w).max().unwrap_or(0);
    let square_side = ((area as f64).sqrt().ceil() as usize).max(1).next_power_of_two();
    let width = widest.max(square_side);

    let mut order: Vec<usize> = (0..sizes.len()).collect();
    order.sort_by(|&a, &b| {
        let (wa, ha) = sizes[a];
        let (wb, hb) = sizes[b];
        hb.cmp(&ha).then(wb.cmp(&wa)).then(a.cmp(&b))
    });

    let mut placements = vec![
        Placement {
            x: 0,
            y: 0,
            width: 0,
            height: 0,
        };
        sizes.len()
    ];
    let mut cursor_x = 0;
    let mut shelf_y = 0;
    let mut shelf_height = 0;

    for index in order {
        let (w, h) = sizes[index];
        if cursor_x + w > width {
            shelf_y += shelf_height;
            cursor_x = 0;
            shelf_height = 0;
        }
        placements[index] = Placement {
            x: cursor_x,
            y: shelf_y,
            width: w,
            height: h,
        };
        cursor_x += w;
        shelf_height = shelf_height.max(h);
    }

    PackLayout {
        width: width.max(1),
        height: (shelf_y + shelf_height).max(1),
        placements,
    }
}
