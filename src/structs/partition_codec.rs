/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use std::fmt::Display;

use anyhow::Result;

use crate::consts::DIFF_FREQ_PRECISION;
use crate::helpers::err_exit_code;
use crate::multicut_error::ExitCode;
use crate::structs::arithmetic::{decode_sequence, encode_sequence};
use crate::structs::bit_stream::{BitStream, BitStreamReader};
use crate::structs::encoding_result::EncodingResult;
use crate::structs::multicut::{PartitionData, PartitionKey};
use crate::structs::raster_image::RasterImage;

/// bits consumed by one summary color, three 8 bit channels
const COLOR_BITS: i64 = 24;

/// Per-region mean color state with incrementally maintained squared error.
/// The join cost of two regions is computable from their current means and
/// sizes alone, so the optimizer never rescans pixels.
#[derive(Clone, Debug, Default)]
pub struct MeanState {
    key_to_mean_color: Vec<[f32; 3]>,
    key_to_error: Vec<f32>,
}

impl MeanState {
    fn initialize(&mut self, n_partitions: usize) {
        self.key_to_mean_color.clear();
        self.key_to_error.clear();
        self.key_to_mean_color.resize(n_partitions, [0.0; 3]);
        self.key_to_error.resize(n_partitions, 0.0);
    }

    fn init_mean_color(partitions: &[PartitionData], img: &RasterImage, pk: PartitionKey) -> [f32; 3] {
        let mut total = [0.0f64; 3];
        for p in &partitions[pk].points {
            let pixel = img.pixel(p.row as usize, p.col as usize);
            for ch in 0..3 {
                total[ch] += f64::from(pixel[ch]);
            }
        }

        let n = partitions[pk].points.len() as f64;
        [
            (total[0] / n) as f32,
            (total[1] / n) as f32,
            (total[2] / n) as f32,
        ]
    }

    fn init_error(&self, partitions: &[PartitionData], img: &RasterImage, pk: PartitionKey) -> f32 {
        let color = self.key_to_mean_color[pk];
        let mut error = 0.0f32;

        for p in &partitions[pk].points {
            let pixel = img.pixel(p.row as usize, p.col as usize);
            let a = color[0] - f32::from(pixel[0]);
            let b = color[1] - f32::from(pixel[1]);
            let c = color[2] - f32::from(pixel[2]);
            error += a * a + b * b + c * c;
        }

        error
    }

    fn notify_init(&mut self, partitions: &[PartitionData], img: &RasterImage, pk: PartitionKey) {
        self.key_to_mean_color[pk] = Self::init_mean_color(partitions, img, pk);
        self.key_to_error[pk] = self.init_error(partitions, img, pk);
    }

    fn test_encoding(&self, pk: PartitionKey) -> EncodingResult {
        EncodingResult::new(COLOR_BITS, self.key_to_error[pk])
    }

    /// predicted merged mean and error without touching pixel data
    fn merged_mean_and_error(
        &self,
        partitions: &[PartitionData],
        pk1: PartitionKey,
        pk2: PartitionKey,
    ) -> ([f32; 3], f32) {
        let old_mean1 = self.key_to_mean_color[pk1];
        let old_mean2 = self.key_to_mean_color[pk2];

        let n1 = partitions[pk1].points.len() as f32;
        let n2 = partitions[pk2].points.len() as f32;
        let n = n1 + n2;
        let f1 = n1 / n;
        let f2 = n2 / n;

        let new_mean = [
            f1 * old_mean1[0] + f2 * old_mean2[0],
            f1 * old_mean1[1] + f2 * old_mean2[1],
            f1 * old_mean1[2] + f2 * old_mean2[2],
        ];

        // sum-of-squares shift for each side onto the merged mean
        let mut shift1 = 0.0f32;
        let mut shift2 = 0.0f32;
        for ch in 0..3 {
            let d1 = old_mean1[ch] - new_mean[ch];
            let d2 = old_mean2[ch] - new_mean[ch];
            shift1 += d1 * d1;
            shift2 += d2 * d2;
        }
        shift1 *= n1;
        shift2 *= n2;

        let new_err = self.key_to_error[pk1] + self.key_to_error[pk2] + shift1 + shift2;
        (new_mean, new_err)
    }

    fn test_join_encoding(
        &self,
        partitions: &[PartitionData],
        pk1: PartitionKey,
        pk2: PartitionKey,
    ) -> EncodingResult {
        let (_, new_err) = self.merged_mean_and_error(partitions, pk1, pk2);
        EncodingResult::new(COLOR_BITS, new_err)
    }

    fn notify_join(&mut self, partitions: &[PartitionData], pk1: PartitionKey, pk2: PartitionKey) {
        let (new_mean, new_err) = self.merged_mean_and_error(partitions, pk1, pk2);

        // either key may survive the join, keep both slots current
        self.key_to_mean_color[pk1] = new_mean;
        self.key_to_mean_color[pk2] = new_mean;
        self.key_to_error[pk1] = new_err;
        self.key_to_error[pk2] = new_err;
    }

    pub fn error_of(&self, pk: PartitionKey) -> f32 {
        self.key_to_error[pk]
    }
}

fn mean_color_bytes(partitions: &[PartitionData], img: &RasterImage, pk: PartitionKey) -> [u8; 3] {
    let mean = MeanState::init_mean_color(partitions, img, pk);
    [
        mean[0].round() as u8,
        mean[1].round() as u8,
        mean[2].round() as u8,
    ]
}

fn fill_partition(img: &mut RasterImage, partition: &PartitionData, color: [u8; 3]) {
    for p in &partition.points {
        img.set_pixel(p.row as usize, p.col as usize, color);
    }
}

/// Summary-color codecs: both represent a region by its mean color, they
/// differ only in how the color list is serialized. The differential
/// variant codes channel deltas between consecutive regions with a
/// quantized arithmetic alphabet.
#[derive(Clone, Debug)]
pub enum PartitionCodec {
    Mean(MeanState),
    DifferentialMean(MeanState),
}

impl PartitionCodec {
    pub fn mean() -> Self {
        PartitionCodec::Mean(MeanState::default())
    }

    pub fn differential_mean() -> Self {
        PartitionCodec::DifferentialMean(MeanState::default())
    }

    fn state(&self) -> &MeanState {
        match self {
            PartitionCodec::Mean(s) | PartitionCodec::DifferentialMean(s) => s,
        }
    }

    fn state_mut(&mut self) -> &mut MeanState {
        match self {
            PartitionCodec::Mean(s) | PartitionCodec::DifferentialMean(s) => s,
        }
    }

    pub fn initialize(&mut self, partitions: &[PartitionData]) {
        self.state_mut().initialize(partitions.len());
    }

    pub fn notify_init(&mut self, partitions: &[PartitionData], img: &RasterImage, pk: PartitionKey) {
        self.state_mut().notify_init(partitions, img, pk);
    }

    pub fn test_encoding(&self, pk: PartitionKey) -> EncodingResult {
        self.state().test_encoding(pk)
    }

    pub fn test_join_encoding(
        &self,
        partitions: &[PartitionData],
        pk1: PartitionKey,
        pk2: PartitionKey,
    ) -> EncodingResult {
        self.state().test_join_encoding(partitions, pk1, pk2)
    }

    pub fn notify_join(&mut self, partitions: &[PartitionData], pk1: PartitionKey, pk2: PartitionKey) {
        self.state_mut().notify_join(partitions, pk1, pk2);
    }

    pub fn error_of(&self, pk: PartitionKey) -> f32 {
        self.state().error_of(pk)
    }

    pub fn write_encoding(
        &self,
        partitions: &[PartitionData],
        img: &RasterImage,
        bs: &mut BitStream,
    ) -> Result<()> {
        match self {
            PartitionCodec::Mean(_) => {
                for pk in 0..partitions.len() {
                    let color = mean_color_bytes(partitions, img, pk);
                    bs.append(u64::from(color[0]), 8);
                    bs.append(u64::from(color[1]), 8);
                    bs.append(u64::from(color[2]), 8);
                }
                Ok(())
            }
            PartitionCodec::DifferentialMean(_) => {
                write_differential(partitions, img, bs)
            }
        }
    }

    pub fn decode(
        &self,
        partitions: &[PartitionData],
        reader: &mut BitStreamReader<'_>,
        out_img: &mut RasterImage,
    ) -> Result<()> {
        match self {
            PartitionCodec::Mean(_) => {
                for partition in partitions {
                    let b = reader.read8u()?;
                    let g = reader.read8u()?;
                    let r = reader.read8u()?;
                    fill_partition(out_img, partition, [b, g, r]);
                }
                Ok(())
            }
            PartitionCodec::DifferentialMean(_) => decode_differential(partitions, reader, out_img),
        }
    }
}

impl Display for PartitionCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartitionCodec::Mean(_) => write!(f, "MeanCodec"),
            PartitionCodec::DifferentialMean(_) => write!(f, "DifferentialMeanCodec"),
        }
    }
}

/// three delta sequences in raster label order: first channel relative to
/// the previous region, the other two relative to the preceding channel of
/// the same region
fn write_differential(
    partitions: &[PartitionData],
    img: &RasterImage,
    bs: &mut BitStream,
) -> Result<()> {
    let mut db = Vec::with_capacity(partitions.len());
    let mut dg = Vec::with_capacity(partitions.len());
    let mut dr = Vec::with_capacity(partitions.len());

    let first = mean_color_bytes(partitions, img, 0);
    db.push(i32::from(first[0]));
    dg.push(i32::from(first[1]) - i32::from(first[0]));
    dr.push(i32::from(first[2]) - i32::from(first[1]));

    let mut last_b = i32::from(first[0]);

    for pk in 1..partitions.len() {
        let current = mean_color_bytes(partitions, img, pk);
        db.push(i32::from(current[0]) - last_b);
        last_b = i32::from(current[0]);
        dg.push(i32::from(current[1]) - i32::from(current[0]));
        dr.push(i32::from(current[2]) - i32::from(current[1]));
    }

    encode_sequence(&db, -255, 255, DIFF_FREQ_PRECISION, bs)?;
    encode_sequence(&dg, -255, 255, DIFF_FREQ_PRECISION, bs)?;
    encode_sequence(&dr, -255, 255, DIFF_FREQ_PRECISION, bs)?;

    Ok(())
}

fn decode_differential(
    partitions: &[PartitionData],
    reader: &mut BitStreamReader<'_>,
    out_img: &mut RasterImage,
) -> Result<()> {
    let db = decode_sequence(reader, -255, 255, DIFF_FREQ_PRECISION)?;
    let dg = decode_sequence(reader, -255, 255, DIFF_FREQ_PRECISION)?;
    let dr = decode_sequence(reader, -255, 255, DIFF_FREQ_PRECISION)?;

    if db.len() != partitions.len() || dg.len() != partitions.len() || dr.len() != partitions.len()
    {
        return err_exit_code(
            ExitCode::StreamInconsistent,
            "color delta sequence length does not match partition count",
        );
    }

    let mut colors: Vec<[u8; 3]> = Vec::with_capacity(partitions.len());
    colors.push([
        db[0] as u8,
        (dg[0] + db[0]) as u8,
        (dr[0] + dg[0] + db[0]) as u8,
    ]);

    for i in 1..partitions.len() {
        let b = db[i] + i32::from(colors[colors.len() - 1][0]);
        colors.push([b as u8, (dg[i] + b) as u8, (dr[i] + dg[i] + b) as u8]);
    }

    for (partition, &color) in partitions.iter().zip(colors.iter()) {
        fill_partition(out_img, partition, color);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::multicut::Multicut;
    use crate::structs::raster_image::Mask;

    fn gradient_image(rows: usize, cols: usize) -> RasterImage {
        let mut img = RasterImage::new(rows, cols);
        for r in 0..rows {
            for c in 0..cols {
                let v = (r * 31 + c * 7) as u8;
                img.set_pixel(r, c, [v, v.wrapping_add(40), v.wrapping_mul(3)]);
            }
        }
        img
    }

    fn recomputed_error(
        partitions: &[PartitionData],
        img: &RasterImage,
        pk: PartitionKey,
    ) -> f32 {
        let mean = MeanState::init_mean_color(partitions, img, pk);
        let mut error = 0.0f64;
        for p in &partitions[pk].points {
            let pixel = img.pixel(p.row as usize, p.col as usize);
            for ch in 0..3 {
                let d = f64::from(mean[ch]) - f64::from(pixel[ch]);
                error += d * d;
            }
        }
        error as f32
    }

    #[test]
    fn incremental_error_matches_recompute() {
        let img = gradient_image(4, 4);
        let mut mc = Multicut::new(&Mask::one_region_per_pixel(4, 4));

        let mut codec = PartitionCodec::mean();
        codec.initialize(&mc.partitions);
        for pk in 0..mc.partitions.len() {
            codec.notify_init(&mc.partitions, &img, pk);
        }

        // join a fixed sequence of neighboring regions and compare the
        // maintained error against a full recompute after every step
        let joins = [(0usize, 1usize), (0, 4), (2, 3), (0, 2), (8, 12), (0, 8)];
        for &(a, b) in &joins {
            codec.notify_join(&mc.partitions, a, b);
            let survivor = mc.join(a, b);

            let exact = recomputed_error(&mc.partitions, &img, survivor);
            let maintained = codec.error_of(survivor);
            let tolerance = 1e-3 * exact.abs().max(1.0);
            assert!(
                (maintained - exact).abs() <= tolerance,
                "maintained {} vs exact {}",
                maintained,
                exact
            );
        }
    }

    #[test]
    fn join_cost_predicts_commit() {
        let img = gradient_image(2, 2);
        let mc = Multicut::new(&Mask::one_region_per_pixel(2, 2));

        let mut codec = PartitionCodec::mean();
        codec.initialize(&mc.partitions);
        for pk in 0..mc.partitions.len() {
            codec.notify_init(&mc.partitions, &img, pk);
        }

        let predicted = codec.test_join_encoding(&mc.partitions, 0, 1);
        codec.notify_join(&mc.partitions, 0, 1);
        assert_eq!(predicted.bits_used, 24);
        assert_eq!(predicted.encoding_error, codec.error_of(0));
        assert_eq!(codec.error_of(0), codec.error_of(1));
    }

    #[test]
    fn uniform_region_has_zero_error() {
        let mut img = RasterImage::new(2, 2);
        for r in 0..2 {
            for c in 0..2 {
                img.set_pixel(r, c, [9, 9, 9]);
            }
        }

        let mc = Multicut::new(&Mask::filled(2, 2, 0));
        let mut codec = PartitionCodec::mean();
        codec.initialize(&mc.partitions);
        codec.notify_init(&mc.partitions, &img, 0);

        let result = codec.test_encoding(0);
        assert_eq!(result.bits_used, 24);
        assert_eq!(result.encoding_error, 0.0);
    }

    fn mean_write_decode(codec: PartitionCodec, img: &RasterImage, mask: &Mask) -> RasterImage {
        let mc = Multicut::new(mask);
        let mut encoder = codec.clone();
        encoder.initialize(&mc.partitions);

        let mut bs = BitStream::new();
        encoder.write_encoding(&mc.partitions, img, &mut bs).unwrap();

        let mut out = RasterImage::new(img.rows(), img.cols());
        let mut reader = BitStreamReader::new(&bs);
        let mut decoder = codec;
        decoder.initialize(&mc.partitions);
        decoder.decode(&mc.partitions, &mut reader, &mut out).unwrap();
        out
    }

    #[test]
    fn mean_codec_reproduces_uniform_regions() {
        let mut img = RasterImage::new(2, 2);
        img.set_pixel(0, 0, [10, 10, 10]);
        img.set_pixel(0, 1, [10, 10, 10]);
        img.set_pixel(1, 0, [200, 200, 200]);
        img.set_pixel(1, 1, [200, 200, 200]);

        let mask = Mask::from_labels(2, 2, vec![0, 0, 1, 1]);
        let decoded = mean_write_decode(PartitionCodec::mean(), &img, &mask);
        assert_eq!(decoded, img);
    }

    #[test]
    fn differential_codec_matches_mean_codec_output() {
        let img = gradient_image(6, 5);
        let mask = Mask::from_labels(
            6,
            5,
            (0..30).map(|i| (i % 7) as i32).collect::<Vec<_>>(),
        )
        .relabel();

        let plain = mean_write_decode(PartitionCodec::mean(), &img, &mask);
        let differential = mean_write_decode(PartitionCodec::differential_mean(), &img, &mask);
        assert_eq!(plain, differential);
    }
}
