/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use std::io::{Read, Write};

use anyhow::{Context, Result};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::debug;

use crate::consts::{DEFAULT_CELL_SIZE, MAX_DIMENSION};
use crate::helpers::{err_exit_code, here};
use crate::multicut_error::ExitCode;
use crate::structs::bit_stream::{BitStream, BitStreamReader};
use crate::structs::border_codec::BorderCodec;
use crate::structs::ensemble::EnsembleCodec;
use crate::structs::header::Header;
use crate::structs::multicut::Multicut;
use crate::structs::multicut_aware_codec::MulticutAwareCodec;
use crate::structs::multicut_codec::{DefaultMulticutCodec, DynamicHuffmanCodec, MulticutCodec};
use crate::structs::optimizer::{
    GreedyGridOptimizer, GreedyOptimizer, LosslessOptimizer, Optimizer,
};
use crate::structs::partition_codec::PartitionCodec;
use crate::structs::raster_image::{Mask, RasterImage};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MulticutCodecKind {
    Default,
    Huffman,
    Border,
    MulticutAware,
    Ensemble,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartitionCodecKind {
    Mean,
    Differential,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptimizerKind {
    Lossless,
    Greedy,
    GreedyGrid,
}

/// Everything the facade needs to assemble a pipeline. `compression_strength`
/// scales the bit weight of the optimizer objective: larger values price
/// bits higher and therefore merge more aggressively.
#[derive(Clone, Copy, Debug)]
pub struct CodecConfig {
    pub multicut_codec: MulticutCodecKind,
    pub partition_codec: PartitionCodecKind,
    pub optimizer: OptimizerKind,
    pub compression_strength: f32,
    pub cell_size: usize,
    pub entropy_compress: bool,
}

impl Default for CodecConfig {
    fn default() -> Self {
        CodecConfig {
            multicut_codec: MulticutCodecKind::Ensemble,
            partition_codec: PartitionCodecKind::Mean,
            optimizer: OptimizerKind::GreedyGrid,
            compression_strength: 1.0,
            cell_size: DEFAULT_CELL_SIZE,
            entropy_compress: true,
        }
    }
}

/// Assembled pipeline: optimizer, boundary codec, color codec and the
/// optional outer deflate wrap, exposing matching encode and decode
/// operations. Decoding requires a codec configured identically to the one
/// that encoded the stream; no codec tag travels in band.
pub struct Codec {
    optimizer: Optimizer,
    partition_codec: PartitionCodec,
    multicut_codec: MulticutCodec,
    entropy_compress: bool,
}

impl Codec {
    pub fn new(config: &CodecConfig) -> Self {
        let partition_codec = match config.partition_codec {
            PartitionCodecKind::Mean => PartitionCodec::mean(),
            PartitionCodecKind::Differential => PartitionCodec::differential_mean(),
        };

        let multicut_codec = match config.multicut_codec {
            MulticutCodecKind::Default => MulticutCodec::Default(DefaultMulticutCodec),
            MulticutCodecKind::Huffman => MulticutCodec::DynamicHuffman(DynamicHuffmanCodec),
            MulticutCodecKind::Border => MulticutCodec::Border(BorderCodec::default()),
            MulticutCodecKind::MulticutAware => {
                MulticutCodec::MulticutAware(MulticutAwareCodec::row_adaptive_col_adaptive())
            }
            MulticutCodecKind::Ensemble => {
                MulticutCodec::Ensemble(EnsembleCodec::new(config.compression_strength))
            }
        };

        // the strength prices bits against a unit error weight
        let weight_err = 1.0;
        let weight_size = config.compression_strength;

        let optimizer = match config.optimizer {
            OptimizerKind::Lossless => Optimizer::Lossless(LosslessOptimizer),
            OptimizerKind::Greedy => Optimizer::Greedy(GreedyOptimizer::new(
                weight_err,
                weight_size,
                true,
                partition_codec.clone(),
            )),
            OptimizerKind::GreedyGrid => Optimizer::GreedyGrid(GreedyGridOptimizer::new(
                weight_err,
                weight_size,
                config.cell_size,
                partition_codec.clone(),
            )),
        };

        Codec {
            optimizer,
            partition_codec,
            multicut_codec,
            entropy_compress: config.entropy_compress,
        }
    }

    /// runs the configured segmentation strategy on the image
    pub fn optimize(&self, img: &RasterImage) -> Result<Multicut> {
        check_dimensions(img.rows(), img.cols())?;
        let initial = Mask::one_region_per_pixel(img.rows(), img.cols());
        Ok(self.optimizer.optimize(img, &initial))
    }

    pub fn encode(&self, img: &RasterImage) -> Result<BitStream> {
        let multicut = self.optimize(img)?;
        self.encode_from_mask(img, &multicut.mask)
    }

    pub fn encode_from_mask(&self, img: &RasterImage, mask: &Mask) -> Result<BitStream> {
        check_dimensions(img.rows(), img.cols())?;
        if mask.rows() != img.rows() || mask.cols() != img.cols() {
            return err_exit_code(ExitCode::InvalidDimensions, "mask does not match image");
        }

        let multicut = Multicut::new(mask);

        let mut inner = BitStream::new();
        Header::new(img.rows() as u16, img.cols() as u16).encode(&mut inner);

        self.multicut_codec
            .write_encoding(&mut inner, &multicut.mask)
            .context(here!())?;
        debug!("multicut payload ends at bit {}", inner.size());

        let mut partition_codec = self.partition_codec.clone();
        partition_codec.initialize(&multicut.partitions);
        partition_codec
            .write_encoding(&multicut.partitions, img, &mut inner)
            .context(here!())?;
        debug!("inner stream ends at bit {}", inner.size());

        if !self.entropy_compress {
            return Ok(inner);
        }

        inner.pad_to_bytes();
        let raw = inner.as_bytes();

        let mut deflater = ZlibEncoder::new(Vec::new(), Compression::default());
        deflater.write_all(&raw).context(here!())?;
        let compressed = deflater.finish().context(here!())?;

        debug!(
            "deflate wrap {} -> {} bytes",
            raw.len(),
            compressed.len()
        );

        let mut out = BitStream::new();
        out.append(raw.len() as u64, 32);
        out.append_bytes(&compressed);
        Ok(out)
    }

    pub fn decode(&self, stream: &BitStream) -> Result<RasterImage> {
        if self.entropy_compress {
            let mut reader = BitStreamReader::new(stream);
            let raw_len = reader.read32u()? as usize;

            let remaining = stream.size() - reader.head;
            if remaining % 8 != 0 {
                return err_exit_code(
                    ExitCode::StreamInconsistent,
                    "compressed payload is not byte aligned",
                );
            }
            let compressed = reader.read_substream(remaining)?.as_bytes();

            let mut inflater = ZlibDecoder::new(compressed.as_slice());
            let mut raw = Vec::with_capacity(raw_len);
            inflater.read_to_end(&mut raw).context(here!())?;

            if raw.len() != raw_len {
                return err_exit_code(
                    ExitCode::StreamInconsistent,
                    "inflated size does not match the recorded size",
                );
            }

            let mut inner = BitStream::new();
            inner.append_bytes(&raw);
            self.decode_inner(&inner)
        } else {
            self.decode_inner(stream)
        }
    }

    fn decode_inner(&self, stream: &BitStream) -> Result<RasterImage> {
        let mut reader = BitStreamReader::new(stream);

        let header = Header::read(&mut reader).context(here!())?;
        let rows = header.rows as usize;
        let cols = header.cols as usize;
        if rows == 0 || cols == 0 {
            return err_exit_code(ExitCode::InvalidDimensions, "empty image dimensions");
        }

        let mask = self
            .multicut_codec
            .read_mask(&mut reader, rows, cols)
            .context(here!())?;

        let multicut = Multicut::new(&mask);

        let mut img = RasterImage::new(rows, cols);
        let mut partition_codec = self.partition_codec.clone();
        partition_codec.initialize(&multicut.partitions);
        partition_codec
            .decode(&multicut.partitions, &mut reader, &mut img)
            .context(here!())?;

        Ok(img)
    }
}

fn check_dimensions(rows: usize, cols: usize) -> Result<()> {
    if rows == 0 || cols == 0 || rows > MAX_DIMENSION || cols > MAX_DIMENSION {
        return err_exit_code(ExitCode::InvalidDimensions, "image dimensions out of range");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocks_image(rows: usize, cols: usize) -> RasterImage {
        let mut img = RasterImage::new(rows, cols);
        for r in 0..rows {
            for c in 0..cols {
                let color = match (r * 2 / rows, c * 2 / cols) {
                    (0, 0) => [20, 20, 20],
                    (0, _) => [200, 30, 30],
                    (_, 0) => [30, 200, 30],
                    _ => [240, 240, 240],
                };
                img.set_pixel(r, c, color);
            }
        }
        img
    }

    #[test]
    fn lossless_round_trip_without_deflate() {
        let config = CodecConfig {
            multicut_codec: MulticutCodecKind::Default,
            partition_codec: PartitionCodecKind::Mean,
            optimizer: OptimizerKind::Lossless,
            compression_strength: 0.0,
            cell_size: DEFAULT_CELL_SIZE,
            entropy_compress: false,
        };

        let codec = Codec::new(&config);
        let img = blocks_image(8, 8);

        let stream = codec.encode(&img).unwrap();
        let decoded = codec.decode(&stream).unwrap();
        assert_eq!(decoded, img);
    }

    #[test]
    fn lossless_round_trip_with_deflate() {
        let config = CodecConfig {
            multicut_codec: MulticutCodecKind::Huffman,
            partition_codec: PartitionCodecKind::Differential,
            optimizer: OptimizerKind::Lossless,
            compression_strength: 0.0,
            cell_size: DEFAULT_CELL_SIZE,
            entropy_compress: true,
        };

        let codec = Codec::new(&config);
        let img = blocks_image(10, 12);

        let stream = codec.encode(&img).unwrap();
        let decoded = codec.decode(&stream).unwrap();
        assert_eq!(decoded, img);
    }

    #[test]
    fn known_layout_of_a_tiny_uncompressed_stream() {
        let mut img = RasterImage::new(2, 2);
        img.set_pixel(0, 0, [10, 10, 10]);
        img.set_pixel(0, 1, [10, 10, 10]);
        img.set_pixel(1, 0, [200, 200, 200]);
        img.set_pixel(1, 1, [200, 200, 200]);

        let config = CodecConfig {
            multicut_codec: MulticutCodecKind::Default,
            partition_codec: PartitionCodecKind::Mean,
            optimizer: OptimizerKind::Lossless,
            compression_strength: 0.0,
            cell_size: DEFAULT_CELL_SIZE,
            entropy_compress: false,
        };
        let codec = Codec::new(&config);

        let mask = Mask::from_labels(2, 2, vec![0, 0, 1, 1]);
        let stream = codec.encode_from_mask(&img, &mask).unwrap();

        // header | 4 edge bits | two color triples
        assert_eq!(stream.size(), 40 + 4 + 48);

        let mut reader = BitStreamReader::new(&stream);
        Header::read(&mut reader).unwrap();
        assert_eq!(reader.read_bits(4).unwrap(), vec![true, true, false, false]);
        assert_eq!(reader.read8u().unwrap(), 10);
        assert_eq!(reader.read8u().unwrap(), 10);
        assert_eq!(reader.read8u().unwrap(), 10);
        assert_eq!(reader.read8u().unwrap(), 200);

        let decoded = codec.decode(&stream).unwrap();
        assert_eq!(decoded, img);
    }

    #[test]
    fn greedy_pipeline_round_trips_shape() {
        let config = CodecConfig {
            multicut_codec: MulticutCodecKind::Border,
            partition_codec: PartitionCodecKind::Mean,
            optimizer: OptimizerKind::Greedy,
            compression_strength: 1.0,
            cell_size: DEFAULT_CELL_SIZE,
            entropy_compress: true,
        };

        let codec = Codec::new(&config);
        let img = blocks_image(16, 16);

        let stream = codec.encode(&img).unwrap();
        let decoded = codec.decode(&stream).unwrap();

        // four flat quadrants survive any reasonable strength untouched
        assert_eq!(decoded, img);
    }

    #[test]
    fn oversized_dimensions_are_rejected() {
        let codec = Codec::new(&CodecConfig::default());
        let img = RasterImage::new(0, 5);
        assert!(codec.encode(&img).is_err());
    }

    #[test]
    fn mismatched_mask_is_rejected() {
        let codec = Codec::new(&CodecConfig::default());
        let img = blocks_image(4, 4);
        let mask = Mask::one_region_per_pixel(3, 3);
        assert!(codec.encode_from_mask(&img, &mask).is_err());
    }
}
