/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use anyhow::{Context, Result};

use crate::helpers::here;
use crate::structs::bit_stream::{BitStream, BitStreamReader};
use crate::structs::context_encoder::ContextCodecFactory;
use crate::structs::raster_image::Mask;
use crate::structs::union_find::DisjointUnionFind;

/// Emits the same edge set as the default codec but omits every bit that is
/// already implied by earlier bits: a union-find over pixel positions tracks
/// which pairs are known joined and which are known disjoint, and implied
/// edges are skipped on both sides without any signaling.
///
/// Row edges are scanned first, raster by raster; within that scan the
/// right-hand pixel of each edge is always fresh, so nothing can be implied
/// yet and every row edge is coded. The column scan afterwards is where the
/// skips happen. Row and column edges go through independently configured
/// context codecs.
#[derive(Clone, Debug)]
pub struct MulticutAwareCodec {
    pub row_codec_factory: ContextCodecFactory,
    pub col_codec_factory: ContextCodecFactory,
}

impl Default for MulticutAwareCodec {
    fn default() -> Self {
        MulticutAwareCodec {
            row_codec_factory: ContextCodecFactory::naive(),
            col_codec_factory: ContextCodecFactory::naive(),
        }
    }
}

impl MulticutAwareCodec {
    pub fn new(
        row_codec_factory: ContextCodecFactory,
        col_codec_factory: ContextCodecFactory,
    ) -> Self {
        MulticutAwareCodec {
            row_codec_factory,
            col_codec_factory,
        }
    }

    /// the backend pair used by the ensemble: a long high-order window for
    /// row edges, a shorter low-order one for column edges
    pub fn row_adaptive_col_adaptive() -> Self {
        MulticutAwareCodec::new(
            ContextCodecFactory::adaptive_bitwise(4096, 4),
            ContextCodecFactory::adaptive_bitwise(512, 2),
        )
    }

    pub fn write_encoding(&self, bs: &mut BitStream, mask: &Mask) -> Result<()> {
        let rows = mask.rows();
        let cols = mask.cols();

        let n_edges = (rows - 1) * cols + rows * (cols - 1);
        let mut df = DisjointUnionFind::new(rows * cols);

        let make_key = |r: usize, c: usize| -> usize { r * cols + c };

        let mut context: Vec<bool> = Vec::with_capacity(n_edges);

        let mut row_encoder = self.row_codec_factory.make_encoder();
        row_encoder.initialize();

        for r in 0..rows {
            for c in 0..cols - 1 {
                let joined = mask.at(r, c) == mask.at(r, c + 1);
                if joined {
                    df.make_union(make_key(r, c), make_key(r, c + 1));
                } else {
                    df.make_disjoint(make_key(r, c), make_key(r, c + 1));
                }
                row_encoder
                    .encode_bit(bs, joined, &context)
                    .context(here!())?;
                context.push(joined);
            }
        }

        row_encoder.finalize(bs).context(here!())?;

        let mut col_encoder = self.col_codec_factory.make_encoder();
        col_encoder.initialize();

        for c in 0..cols {
            for r in 0..rows - 1 {
                let k1 = make_key(r, c);
                let k2 = make_key(r + 1, c);

                if df.is_disjoint(k1, k2) {
                    context.push(false);
                    continue;
                }
                if df.is_union(k1, k2) {
                    context.push(true);
                    continue;
                }

                let joined = mask.at(r, c) == mask.at(r + 1, c);
                if joined {
                    df.make_union(k1, k2);
                } else {
                    df.make_disjoint(k1, k2);
                }
                col_encoder
                    .encode_bit(bs, joined, &context)
                    .context(here!())?;
                context.push(joined);
            }
        }

        col_encoder.finalize(bs).context(here!())?;

        Ok(())
    }

    pub fn read_mask(
        &self,
        reader: &mut BitStreamReader<'_>,
        rows: usize,
        cols: usize,
    ) -> Result<Mask> {
        let n_edges = (rows - 1) * cols + rows * (cols - 1);
        let mut df = DisjointUnionFind::new(rows * cols);

        let make_key = |r: usize, c: usize| -> usize { r * cols + c };

        let mut context: Vec<bool> = Vec::with_capacity(n_edges);

        let mut row_decoder = self.row_codec_factory.make_decoder();
        row_decoder.initialize(reader).context(here!())?;

        for r in 0..rows {
            for c in 0..cols - 1 {
                let joined = row_decoder.decode_bit(reader, &context).context(here!())?;
                if joined {
                    df.make_union(make_key(r, c), make_key(r, c + 1));
                } else {
                    df.make_disjoint(make_key(r, c), make_key(r, c + 1));
                }
                context.push(joined);
            }
        }

        row_decoder.finalize(reader);

        let mut col_decoder = self.col_codec_factory.make_decoder();
        col_decoder.initialize(reader).context(here!())?;

        for c in 0..cols {
            for r in 0..rows - 1 {
                let k1 = make_key(r, c);
                let k2 = make_key(r + 1, c);

                if df.is_disjoint(k1, k2) {
                    context.push(false);
                    continue;
                }
                if df.is_union(k1, k2) {
                    context.push(true);
                    continue;
                }

                let joined = col_decoder.decode_bit(reader, &context).context(here!())?;
                if joined {
                    df.make_union(k1, k2);
                } else {
                    df.make_disjoint(k1, k2);
                }
                context.push(joined);
            }
        }

        col_decoder.finalize(reader);

        let mut result = Mask::filled(rows, cols, 0);
        for r in 0..rows {
            for c in 0..cols {
                result.set(r, c, df.find(make_key(r, c)) as i32);
            }
        }

        Ok(result.relabel())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(codec: &MulticutAwareCodec, mask: &Mask) {
        let mut bs = BitStream::new();
        codec.write_encoding(&mut bs, mask).unwrap();

        let mut reader = BitStreamReader::new(&bs);
        let decoded = codec.read_mask(&mut reader, mask.rows(), mask.cols()).unwrap();

        assert!(decoded.same_partitioning(mask));
        assert_eq!(decoded, decoded.relabel());
    }

    fn test_masks() -> Vec<Mask> {
        vec![
            Mask::from_labels(2, 2, vec![0, 0, 1, 1]),
            Mask::from_labels(2, 2, vec![0, 0, 1, 0]),
            Mask::from_labels(3, 4, vec![0, 0, 1, 1, 0, 2, 2, 1, 0, 0, 2, 1]),
            Mask::one_region_per_pixel(4, 4),
            Mask::filled(5, 3, 7),
            Mask::from_labels(1, 5, vec![0, 0, 1, 2, 2]),
            Mask::from_labels(5, 1, vec![0, 1, 1, 1, 2]),
        ]
    }

    #[test]
    fn naive_backends_round_trip() {
        let codec = MulticutAwareCodec::default();
        for mask in test_masks() {
            round_trip(&codec, &mask);
        }
    }

    #[test]
    fn block_backends_round_trip() {
        let codec = MulticutAwareCodec::new(
            ContextCodecFactory::block(4, 12),
            ContextCodecFactory::block(4, 12),
        );
        for mask in test_masks() {
            round_trip(&codec, &mask);
        }
    }

    #[test]
    fn adaptive_backends_round_trip() {
        let codec = MulticutAwareCodec::row_adaptive_col_adaptive();
        for mask in test_masks() {
            round_trip(&codec, &mask);
        }
    }

    #[test]
    fn mixed_backends_round_trip() {
        let codec = MulticutAwareCodec::new(
            ContextCodecFactory::block(8, 16),
            ContextCodecFactory::naive(),
        );
        for mask in test_masks() {
            round_trip(&codec, &mask);
        }
    }

    #[test]
    fn implied_edges_are_omitted() {
        // 2x2 checker of two regions: once the row edges and the first
        // column edge are known, the second column edge is implied
        let mask = Mask::from_labels(2, 2, vec![0, 0, 1, 1]);
        let codec = MulticutAwareCodec::default();

        let mut bs = BitStream::new();
        codec.write_encoding(&mut bs, &mask).unwrap();

        // two row edge bits plus a single column edge bit
        assert_eq!(bs.size(), 3);
    }
}
