//! Contrast limited adaptive histogram equalization for 8-bit images.
//!
//! The image is split into a grid of tiles. Each tile gets its own clipped,
//! equalized lookup table, and every output pixel bilinearly interpolates
//! the tables of the four nearest tile centres, so tile borders do not show.

use image::{GrayImage, Luma};

const HIST_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Clahe {
    pub clip_limit: f32,
    /// Tiles along (x, y).
    pub tile_grid: (u32, u32),
}

impl Clahe {
    pub const fn new(clip_limit: f32, tile_grid: (u32, u32)) -> Self {
        Self {
            clip_limit,
            tile_grid,
        }
    }

    pub fn apply(&self, image: &GrayImage) -> GrayImage {
        let (width, height) = image.dimensions();
        let tiles_x = self.tile_grid.0.clamp(1, width.max(1)) as usize;
        let tiles_y = self.tile_grid.1.clamp(1, height.max(1)) as usize;
        if width == 0 || height == 0 {
            return image.clone();
        }

        // Tiles must cover the image exactly; histograms of a ragged edge are
        // taken from a reflect-101 padded extension of the image.
        let padded_width = (width as usize).div_ceil(tiles_x) * tiles_x;
        let padded_height = (height as usize).div_ceil(tiles_y) * tiles_y;
        let tile_width = padded_width / tiles_x;
        let tile_height = padded_height / tiles_y;
        let tile_area = tile_width * tile_height;

        let clip = if self.clip_limit > 0.0 {
            ((self.clip_limit * tile_area as f32 / HIST_SIZE as f32) as usize).max(1)
        } else {
            usize::MAX
        };
        let lut_scale = (HIST_SIZE - 1) as f32 / tile_area as f32;

        let mut luts = vec![[0u8; HIST_SIZE]; tiles_x * tiles_y];
        for ty in 0..tiles_y {
            for tx in 0..tiles_x {
                let mut hist = [0usize; HIST_SIZE];
                for py in ty * tile_height..(ty + 1) * tile_height {
                    let sy = reflect_101(py, height as usize) as u32;
                    for px in tx * tile_width..(tx + 1) * tile_width {
                        let sx = reflect_101(px, width as usize) as u32;
                        hist[image.get_pixel(sx, sy).0[0] as usize] += 1;
                    }
                }
                clip_histogram(&mut hist, clip);
                luts[ty * tiles_x + tx] = build_lut(&hist, lut_scale);
            }
        }

        let inv_tile_width = 1.0 / tile_width as f32;
        let inv_tile_height = 1.0 / tile_height as f32;
        let columns: Vec<Neighbours> = (0..width)
            .map(|x| Neighbours::locate(x, inv_tile_width, tiles_x))
            .collect();

        let mut output = GrayImage::new(width, height);
        for y in 0..height {
            let row = Neighbours::locate(y, inv_tile_height, tiles_y);
            let top = row.low * tiles_x;
            let bottom = row.high * tiles_x;
            for (x, column) in columns.iter().enumerate() {
                let value = image.get_pixel(x as u32, y).0[0] as usize;
                let lut = |index: usize| f32::from(luts[index][value]);
                let upper =
                    lut(top + column.low) * (1.0 - column.weight) + lut(top + column.high) * column.weight;
                let lower = lut(bottom + column.low) * (1.0 - column.weight)
                    + lut(bottom + column.high) * column.weight;
                let result = upper * (1.0 - row.weight) + lower * row.weight;
                output.put_pixel(x as u32, y, Luma([super::saturate_cast(result)]));
            }
        }
        output
    }
}

/// The two tiles whose centres bracket a coordinate, plus the weight of the
/// higher one.
#[derive(Debug, Clone, Copy)]
struct Neighbours {
    low: usize,
    high: usize,
    weight: f32,
}

impl Neighbours {
    fn locate(coordinate: u32, inv_tile_size: f32, tiles: usize) -> Self {
        let position = coordinate as f32 * inv_tile_size - 0.5;
        let floor = position.floor();
        let weight = position - floor;
        let floor = floor as isize;
        Self {
            low: floor.max(0) as usize,
            high: ((floor + 1) as usize).min(tiles - 1),
            weight,
        }
    }
}

fn clip_histogram(hist: &mut [usize; HIST_SIZE], clip: usize) {
    let mut clipped = 0;
    for bin in hist.iter_mut() {
        if *bin > clip {
            clipped += *bin - clip;
            *bin = clip;
        }
    }

    let batch = clipped / HIST_SIZE;
    let mut residual = clipped - batch * HIST_SIZE;
    for bin in hist.iter_mut() {
        *bin += batch;
    }

    if residual != 0 {
        let step = (HIST_SIZE / residual).max(1);
        let mut index = 0;
        while index < HIST_SIZE && residual > 0 {
            hist[index] += 1;
            index += step;
            residual -= 1;
        }
    }
}

fn build_lut(hist: &[usize; HIST_SIZE], scale: f32) -> [u8; HIST_SIZE] {
    let mut lut = [0u8; HIST_SIZE];
    let mut sum = 0usize;
    for (entry, &count) in lut.iter_mut().zip(hist.iter()) {
        sum += count;
        *entry = super::saturate_cast(sum as f32 * scale);
    }
    lut
}

/// Mirrors an index past the end without repeating the edge sample.
fn reflect_101(index: usize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let period = 2 * (len - 1);
    let index = index % period;
    if index < len {
        index
    } else {
        period - index
    }
}
