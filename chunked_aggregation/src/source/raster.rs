use std::{borrow::Borrow, sync::Arc};

use super::{FetchContext, PartitionSource, PayloadSize, SourceError};
use crate::{
    partition::{Chunking, Partition, PartitionId, PartitionKey, Window, WindowIter},
    BoxError,
};

/// A single band of pixels stored row-major with a native block layout
#[derive(Debug, Clone)]
pub struct RasterBand<T> {
    width: usize,
    height: usize,
    block_width: usize,
    block_height: usize,
    data: Arc<[T]>,
}

impl<T: Copy> RasterBand<T> {
    /// Creates a band from row-major pixels
    ///
    /// Panics if `data` does not hold exactly `width * height` pixels or a block dimension is zero.
    pub fn new(
        width: usize,
        height: usize,
        (block_width, block_height): (usize, usize),
        data: impl Into<Arc<[T]>>,
    ) -> Self {
        let data = data.into();
        assert_eq!(data.len(), width * height, "pixel count mismatch");
        assert!(
            block_width > 0 && block_height > 0,
            "block dimensions must be non-zero"
        );
        Self {
            width,
            height,
            block_width,
            block_height,
            data,
        }
    }

    /// Creates a band by evaluating `f(col, row)` for every pixel
    pub fn from_fn(
        width: usize,
        height: usize,
        block_shape: (usize, usize),
        mut f: impl FnMut(usize, usize) -> T,
    ) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for row in 0..height {
            for col in 0..width {
                data.push(f(col, row));
            }
        }
        Self::new(width, height, block_shape, data)
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }
    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }
    /// Native block shape as `(width, height)`
    #[inline]
    pub fn block_shape(&self) -> (usize, usize) {
        (self.block_width, self.block_height)
    }

    pub fn bounds(&self) -> Window {
        Window::new(0, 0, self.width, self.height)
    }

    /// Reads the pixels of `window` row by row
    pub fn read(&self, window: &Window) -> Result<Tile<T>, SourceError> {
        let inside = match (window.col_end(), window.row_end()) {
            (Some(col_end), Some(row_end)) => col_end <= self.width && row_end <= self.height,
            _ => false,
        };
        if !inside {
            return Err(SourceError::OutOfBounds {
                key: PartitionKey::Tile(*window),
            });
        }
        let mut data = Vec::with_capacity(window.area());
        for row in window.row_off..window.row_off + window.height {
            let start = row * self.width + window.col_off;
            data.extend_from_slice(&self.data[start..start + window.width]);
        }
        Ok(Tile {
            window: *window,
            data,
        })
    }

    /// Reads the whole band at once
    pub fn read_full(&self) -> Vec<T> {
        self.data.to_vec()
    }

    /// Windows partitioning this band under `chunking`
    pub fn windows(&self, chunking: Chunking) -> WindowIter {
        let (tile_width, tile_height) = match chunking {
            Chunking::Native => (self.block_width, self.block_height),
            Chunking::Uniform { width, height } => (width, height),
        };
        WindowIter::new(self.width, self.height, tile_width, tile_height)
    }
}

/// Pixels of one window
#[derive(Debug, Clone, PartialEq)]
pub struct Tile<T> {
    pub window: Window,
    pub data: Vec<T>,
}

impl<T> Tile<T> {
    /// Pixel at window-relative `(col, row)`
    pub fn get(&self, col: usize, row: usize) -> Option<&T> {
        if col >= self.window.width || row >= self.window.height {
            return None;
        }
        self.data.get(row * self.window.width + col)
    }

    /// Shape as `(height, width)`
    pub fn shape(&self) -> (usize, usize) {
        (self.window.height, self.window.width)
    }
}

impl<T> Borrow<[T]> for Tile<T> {
    fn borrow(&self) -> &[T] {
        &self.data
    }
}

impl<T> PayloadSize for Tile<T> {
    fn payload_bytes(&self) -> usize {
        self.data.payload_bytes()
    }
}

/// Windowed reads over a [RasterBand]
#[derive(Debug, Clone)]
pub struct RasterSource<T> {
    band: RasterBand<T>,
    chunking: Chunking,
}

impl<T: Copy> RasterSource<T> {
    /// Panics on a zero-sized uniform chunk
    pub fn new(band: RasterBand<T>, chunking: Chunking) -> Self {
        if let Chunking::Uniform { width, height } = chunking {
            assert!(width > 0 && height > 0, "chunk dimensions must be non-zero");
        }
        Self { band, chunking }
    }

    pub fn band(&self) -> &RasterBand<T> {
        &self.band
    }

    pub fn chunking(&self) -> Chunking {
        self.chunking
    }
}

/// Cursor over the windows of a [RasterSource]
#[derive(Debug, Clone)]
pub struct TileCursor {
    windows: WindowIter,
    index: usize,
}

impl Iterator for TileCursor {
    type Item = Partition;

    fn next(&mut self) -> Option<Partition> {
        let window = self.windows.next()?;
        let id = PartitionId(self.index);
        self.index += 1;
        Some(Partition::new(id, PartitionKey::Tile(window)))
    }
}

impl<T: Copy> PartitionSource for RasterSource<T> {
    type Payload = Tile<T>;
    type Cursor = TileCursor;

    fn cursor(&self) -> TileCursor {
        TileCursor {
            windows: self.band.windows(self.chunking),
            index: 0,
        }
    }

    fn fetch(&self, partition: &Partition, ctx: &FetchContext) -> Result<Tile<T>, BoxError> {
        ctx.check()?;
        match &partition.key {
            PartitionKey::Tile(window) => Ok(self.band.read(window)?),
            key => Err(SourceError::unsupported("RasterSource", key).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;

    fn band() -> RasterBand<u16> {
        // pixel value encodes its position
        RasterBand::from_fn(5, 4, (2, 2), |col, row| (row * 10 + col) as u16)
    }

    #[test]
    fn read_window() {
        let band = band();
        let tile = band.read(&Window::new(1, 2, 3, 2)).unwrap();
        assert_eq!(tile.data, vec![21, 22, 23, 31, 32, 33]);
        assert_eq!(tile.shape(), (2, 3));
        assert_eq!(tile.get(2, 1), Some(&33));
        assert_eq!(tile.get(3, 0), None);
        assert_eq!(tile.payload_bytes(), 12);
    }

    #[test]
    fn read_outside_band_fails() {
        let band = band();
        assert!(band.read(&Window::new(4, 0, 2, 1)).is_err());
        assert!(band.read(&Window::new(0, 3, 1, 2)).is_err());
    }

    #[test]
    fn read_with_overflowing_window_fails() {
        let band = band();
        let wide = Window::new(usize::MAX, 0, 2, 1);
        assert!(matches!(
            band.read(&wide),
            Err(SourceError::OutOfBounds { .. })
        ));
        let tall = Window::new(0, 1, 1, usize::MAX);
        assert!(matches!(
            band.read(&tall),
            Err(SourceError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn native_and_uniform_cover_same_pixels() {
        let band = band();
        let ctx = FetchContext::new(1, None, CancellationToken::new());

        for chunking in [
            Chunking::Native,
            Chunking::Uniform {
                width: 3,
                height: 1,
            },
            Chunking::Uniform {
                width: 5,
                height: 4,
            },
        ] {
            let source = RasterSource::new(band.clone(), chunking);
            let mut total = 0u32;
            let mut pixels = 0;
            for partition in source.cursor() {
                let tile = source.fetch(&partition, &ctx).unwrap();
                pixels += tile.data.len();
                total += tile.data.iter().map(|v| *v as u32).sum::<u32>();
            }
            assert_eq!(pixels, 20);
            assert_eq!(
                total,
                band.read_full().iter().map(|v| *v as u32).sum::<u32>()
            );
        }
    }

    #[test]
    fn native_windows_follow_blocks() {
        let source = RasterSource::new(band(), Chunking::Native);
        let windows: Vec<Window> = source
            .cursor()
            .map(|p| *p.window().unwrap())
            .collect();
        assert_eq!(windows.len(), 6);
        assert_eq!(windows[2], Window::new(4, 0, 1, 2));
    }
}
