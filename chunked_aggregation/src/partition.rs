use core::{fmt, ops::Range};

/// Position of a partition in the enumeration order of its source
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PartitionId(pub usize);

impl PartitionId {
    #[inline]
    pub fn index(&self) -> usize {
        self.0
    }
    #[inline]
    pub fn next(&self) -> Self {
        PartitionId(self.0 + 1)
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A rectangular pixel window within a raster band
///
/// Offsets and sizes are in pixels, rows grow downwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Window {
    pub col_off: usize,
    pub row_off: usize,
    pub width: usize,
    pub height: usize,
}

impl Window {
    pub fn new(col_off: usize, row_off: usize, width: usize, height: usize) -> Self {
        Self {
            col_off,
            row_off,
            width,
            height,
        }
    }

    /// Number of pixels covered by the window
    #[inline]
    pub fn area(&self) -> usize {
        self.width.saturating_mul(self.height)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.area() == 0
    }

    /// One past the last column, `None` if it does not fit in a `usize`
    #[inline]
    pub fn col_end(&self) -> Option<usize> {
        self.col_off.checked_add(self.width)
    }

    /// One past the last row, `None` if it does not fit in a `usize`
    #[inline]
    pub fn row_end(&self) -> Option<usize> {
        self.row_off.checked_add(self.height)
    }

    /// Returns the overlapping part of two windows or `None` if they are disjoint
    pub fn intersection(&self, other: &Window) -> Option<Window> {
        let col_start = self.col_off.max(other.col_off);
        let row_start = self.row_off.max(other.row_off);
        let col_end = self
            .col_off
            .saturating_add(self.width)
            .min(other.col_off.saturating_add(other.width));
        let row_end = self
            .row_off
            .saturating_add(self.height)
            .min(other.row_off.saturating_add(other.height));
        if col_start >= col_end || row_start >= row_end {
            return None;
        }
        Some(Window::new(
            col_start,
            row_start,
            col_end - col_start,
            row_end - row_start,
        ))
    }

    /// Returns true if `(col, row)` falls within the window
    #[inline]
    pub fn contains(&self, col: usize, row: usize) -> bool {
        col >= self.col_off
            && col - self.col_off < self.width
            && row >= self.row_off
            && row - self.row_off < self.height
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Window(col_off={}, row_off={}, width={}, height={})",
            self.col_off, self.row_off, self.width, self.height
        )
    }
}

/// Address of a partition within its dataset
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PartitionKey {
    /// Byte range of a file or object
    ByteRange { offset: u64, len: u64 },
    /// Pixel window of a raster band
    Tile(Window),
    /// Row group of a table together with the rows it spans
    RowGroup { index: usize, rows: Range<usize> },
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PartitionKey::ByteRange { offset, len } => write!(f, "bytes {}+{}", offset, len),
            PartitionKey::Tile(window) => write!(f, "{}", window),
            PartitionKey::RowGroup { index, rows } => {
                write!(f, "row group {} (rows {}..{})", index, rows.start, rows.end)
            }
        }
    }
}

/// An addressable unit of a larger dataset
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Partition {
    pub id: PartitionId,
    pub key: PartitionKey,
}

impl Partition {
    pub fn new(id: PartitionId, key: PartitionKey) -> Self {
        Self { id, key }
    }
    /// Returns the tile window if this partition addresses a raster tile
    pub fn window(&self) -> Option<&Window> {
        match &self.key {
            PartitionKey::Tile(window) => Some(window),
            _ => None,
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "partition {} [{}]", self.id, self.key)
    }
}

/// How a raster band is cut into windows
///
/// Both strategies produce a complete, non-overlapping partitioning.
/// Native boundaries are usually cheaper as each window maps onto exactly one stored block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Chunking {
    /// Follow the block layout the dataset was written with
    #[default]
    Native,
    /// Fixed geometric windows regardless of the stored layout
    Uniform { width: usize, height: usize },
}

/// Lazily walks a `width x height` grid in row-major windows of `tile_width x tile_height`
///
/// Edge windows are clipped to the grid.
#[derive(Debug, Clone)]
pub struct WindowIter {
    width: usize,
    height: usize,
    tile_width: usize,
    tile_height: usize,
    col: usize,
    row: usize,
}

impl WindowIter {
    pub fn new(width: usize, height: usize, tile_width: usize, tile_height: usize) -> Self {
        assert!(
            tile_width > 0 && tile_height > 0,
            "tile dimensions must be non-zero"
        );
        Self {
            width,
            height,
            tile_width,
            tile_height,
            col: 0,
            row: 0,
        }
    }

    /// Total number of windows this iterator yields from the start
    pub fn total(&self) -> usize {
        self.width.div_ceil(self.tile_width) * self.height.div_ceil(self.tile_height)
    }
}

impl Iterator for WindowIter {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        if self.width == 0 || self.row >= self.height {
            return None;
        }
        let width = self.tile_width.min(self.width - self.col);
        let height = self.tile_height.min(self.height - self.row);
        let window = Window::new(self.col, self.row, width, height);

        self.col += self.tile_width;
        if self.col >= self.width {
            self.col = 0;
            self.row += self.tile_height;
        }
        Some(window)
    }
}

/// Lazily splits `0..total` into consecutive ranges of at most `size` elements
#[derive(Debug, Clone)]
pub struct RangeIter {
    total: usize,
    size: usize,
    start: usize,
}

impl RangeIter {
    pub fn new(total: usize, size: usize) -> Self {
        assert!(size > 0, "chunk size must be non-zero");
        Self {
            total,
            size,
            start: 0,
        }
    }
}

impl Iterator for RangeIter {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Range<usize>> {
        if self.start >= self.total {
            return None;
        }
        let end = (self.start + self.size).min(self.total);
        let range = self.start..end;
        self.start = end;
        Some(range)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.total - self.start.min(self.total)).div_ceil(self.size);
        (left, Some(left))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_iter_covers_grid() {
        let iter = WindowIter::new(10, 7, 4, 3);
        assert_eq!(iter.total(), 9);
        let windows: Vec<Window> = iter.collect();
        assert_eq!(windows.len(), 9);
        assert_eq!(windows[0], Window::new(0, 0, 4, 3));
        assert_eq!(windows[2], Window::new(8, 0, 2, 3));
        assert_eq!(windows[8], Window::new(8, 6, 2, 1));

        let covered: usize = windows.iter().map(Window::area).sum();
        assert_eq!(covered, 70);

        // windows never overlap
        for (i, a) in windows.iter().enumerate() {
            for b in windows.iter().skip(i + 1) {
                assert!(a.intersection(b).is_none());
            }
        }
    }

    #[test]
    fn window_iter_empty_grid() {
        assert_eq!(WindowIter::new(0, 5, 2, 2).count(), 0);
        assert_eq!(WindowIter::new(5, 0, 2, 2).count(), 0);
    }

    #[test]
    fn window_intersection() {
        let a = Window::new(0, 0, 4, 4);
        let b = Window::new(2, 3, 4, 4);
        assert_eq!(a.intersection(&b), Some(Window::new(2, 3, 2, 1)));
        assert!(a.intersection(&Window::new(4, 0, 1, 1)).is_none());
        assert!(a.contains(3, 3));
        assert!(!a.contains(4, 0));
    }

    #[test]
    fn window_extents_near_usize_max() {
        let edge = Window::new(usize::MAX - 1, 0, 5, 5);
        assert_eq!(edge.col_end(), None);
        assert_eq!(edge.row_end(), Some(5));
        assert_eq!(
            edge.intersection(&Window::new(usize::MAX - 3, 2, 3, 10)),
            Some(Window::new(usize::MAX - 1, 2, 1, 3))
        );
        assert!(edge.contains(usize::MAX, 4));
        assert!(Window::new(0, 0, usize::MAX, usize::MAX).area() == usize::MAX);
    }

    #[test]
    fn range_iter_splits() {
        let ranges: Vec<_> = RangeIter::new(10, 4).collect();
        assert_eq!(ranges, vec![0..4, 4..8, 8..10]);
        assert_eq!(RangeIter::new(10, 4).size_hint(), (3, Some(3)));
        assert_eq!(RangeIter::new(0, 4).count(), 0);
        assert_eq!(RangeIter::new(3, 100).collect::<Vec<_>>(), vec![0..3]);
    }

    #[test]
    fn display_partition() {
        let partition = Partition::new(
            PartitionId(2),
            PartitionKey::RowGroup {
                index: 2,
                rows: 20..30,
            },
        );
        assert_eq!(
            partition.to_string(),
            "partition #2 [row group 2 (rows 20..30)]"
        );
    }
}
