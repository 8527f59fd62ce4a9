/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use std::collections::HashMap;

use anyhow::Result;

use crate::helpers::err_exit_code;
use crate::multicut_error::ExitCode;

/// rectangular region of an image or mask, in row/column coordinates
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    pub row: usize,
    pub col: usize,
    pub rows: usize,
    pub cols: usize,
}

impl Rect {
    /// rectangle starting at (start_r, start_c), clipped to the given bounds
    pub fn clamped(
        start_r: usize,
        start_c: usize,
        delta_r: usize,
        delta_c: usize,
        max_rows: usize,
        max_cols: usize,
    ) -> Rect {
        Rect {
            row: start_r,
            col: start_c,
            rows: delta_r.min(max_rows - start_r),
            cols: delta_c.min(max_cols - start_c),
        }
    }
}

/// Row-major image of 3-channel 8-bit pixels. The channel order is a
/// convention of the caller; the codec treats all three as opaque bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RasterImage {
    rows: usize,
    cols: usize,
    data: Vec<[u8; 3]>,
}

impl RasterImage {
    pub fn new(rows: usize, cols: usize) -> Self {
        RasterImage {
            rows,
            cols,
            data: vec![[0; 3]; rows * cols],
        }
    }

    pub fn from_pixels(rows: usize, cols: usize, data: Vec<[u8; 3]>) -> Self {
        assert_eq!(data.len(), rows * cols);
        RasterImage { rows, cols, data }
    }

    pub fn from_raw_bytes(rows: usize, cols: usize, bytes: &[u8]) -> Result<Self> {
        if bytes.len() != rows * cols * 3 {
            return err_exit_code(ExitCode::InvalidDimensions, "pixel buffer size mismatch");
        }

        let pixels: &[[u8; 3]] = bytemuck::cast_slice(bytes);
        Ok(RasterImage {
            rows,
            cols,
            data: pixels.to_vec(),
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline(always)]
    pub fn pixel(&self, row: usize, col: usize) -> [u8; 3] {
        self.data[row * self.cols + col]
    }

    #[inline(always)]
    pub fn set_pixel(&mut self, row: usize, col: usize, value: [u8; 3]) {
        self.data[row * self.cols + col] = value;
    }

    pub fn sub_image(&self, roi: &Rect) -> RasterImage {
        let mut result = RasterImage::new(roi.rows, roi.cols);
        for r in 0..roi.rows {
            for c in 0..roi.cols {
                result.set_pixel(r, c, self.pixel(roi.row + r, roi.col + c));
            }
        }
        result
    }

    /// flat byte view of the pixel buffer
    pub fn as_raw_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }
}

/// Row-major region labeling, one signed 32 bit label per pixel. A mask is
/// canonical iff labels are dense integers assigned in raster order of
/// first appearance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mask {
    rows: usize,
    cols: usize,
    data: Vec<i32>,
}

impl Mask {
    pub fn filled(rows: usize, cols: usize, value: i32) -> Self {
        Mask {
            rows,
            cols,
            data: vec![value; rows * cols],
        }
    }

    pub fn from_labels(rows: usize, cols: usize, data: Vec<i32>) -> Self {
        assert_eq!(data.len(), rows * cols);
        Mask { rows, cols, data }
    }

    /// the default starting segmentation: every pixel is its own region
    pub fn one_region_per_pixel(rows: usize, cols: usize) -> Self {
        Mask {
            rows,
            cols,
            data: (0..(rows * cols) as i32).collect(),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline(always)]
    pub fn at(&self, row: usize, col: usize) -> i32 {
        self.data[row * self.cols + col]
    }

    #[inline(always)]
    pub fn set(&mut self, row: usize, col: usize, value: i32) {
        self.data[row * self.cols + col] = value;
    }

    pub fn sub_mask(&self, roi: &Rect) -> Mask {
        let mut result = Mask::filled(roi.rows, roi.cols, 0);
        for r in 0..roi.rows {
            for c in 0..roi.cols {
                result.set(r, c, self.at(roi.row + r, roi.col + c));
            }
        }
        result
    }

    /// rewrites labels to dense integers in raster order of first appearance
    pub fn relabel(&self) -> Mask {
        let mut mapping: HashMap<i32, i32> = HashMap::new();
        let mut result = Mask::filled(self.rows, self.cols, 0);

        for r in 0..self.rows {
            for c in 0..self.cols {
                let old_key = self.at(r, c);
                let next = mapping.len() as i32;
                let new_key = *mapping.entry(old_key).or_insert(next);
                result.set(r, c, new_key);
            }
        }

        result
    }

    /// true iff both masks induce the same pixel partition, labels aside
    pub fn same_partitioning(&self, other: &Mask) -> bool {
        self.rows == other.rows && self.cols == other.cols && self.relabel() == other.relabel()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relabel_produces_raster_order_labels() {
        let mask = Mask::from_labels(2, 3, vec![7, 7, 3, 3, 9, 9]);
        let canonical = mask.relabel();
        assert_eq!(canonical, Mask::from_labels(2, 3, vec![0, 0, 1, 1, 2, 2]));
    }

    #[test]
    fn relabel_is_idempotent() {
        let mask = Mask::from_labels(2, 2, vec![5, 5, 1, 5]);
        let once = mask.relabel();
        assert_eq!(once.relabel(), once);
    }

    #[test]
    fn same_partitioning_ignores_label_names() {
        let a = Mask::from_labels(2, 2, vec![0, 0, 1, 1]);
        let b = Mask::from_labels(2, 2, vec![42, 42, -3, -3]);
        let c = Mask::from_labels(2, 2, vec![0, 1, 1, 1]);

        assert!(a.same_partitioning(&b));
        assert!(!a.same_partitioning(&c));
    }

    #[test]
    fn sub_views_copy_the_region() {
        let img = RasterImage::from_pixels(
            2,
            2,
            vec![[1, 1, 1], [2, 2, 2], [3, 3, 3], [4, 4, 4]],
        );
        let roi = Rect::clamped(0, 1, 5, 5, img.rows(), img.cols());
        assert_eq!(roi, Rect { row: 0, col: 1, rows: 2, cols: 1 });

        let sub = img.sub_image(&roi);
        assert_eq!(sub.pixel(0, 0), [2, 2, 2]);
        assert_eq!(sub.pixel(1, 0), [4, 4, 4]);
    }

    #[test]
    fn raw_byte_round_trip() {
        let img = RasterImage::from_pixels(1, 2, vec![[9, 8, 7], [6, 5, 4]]);
        let bytes = img.as_raw_bytes().to_vec();
        assert_eq!(bytes, vec![9, 8, 7, 6, 5, 4]);

        let restored = RasterImage::from_raw_bytes(1, 2, &bytes).unwrap();
        assert_eq!(restored, img);
    }
}
