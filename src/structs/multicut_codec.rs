/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use std::fmt::Display;

use anyhow::{Context, Result};

use crate::consts::BLOCK_FREQ_PRECISION;
use crate::helpers::{err_exit_code, here};
use crate::multicut_error::ExitCode;
use crate::structs::bit_stream::{BitStream, BitStreamReader};
use crate::structs::border_codec::BorderCodec;
use crate::structs::ensemble::EnsembleCodec;
use crate::structs::huffman::{HuffmanCodec, HuffmanToken};
use crate::structs::multicut_aware_codec::MulticutAwareCodec;
use crate::structs::raster_image::Mask;

/// Boundary codecs. Each serializes the edge set of a mask (horizontal and
/// vertical 4-neighbor edges, joined iff both pixels share a label) and
/// reconstructs a canonical mask inducing the same pixel partition.
#[derive(Clone, Debug)]
pub enum MulticutCodec {
    Default(DefaultMulticutCodec),
    DynamicHuffman(DynamicHuffmanCodec),
    Border(BorderCodec),
    MulticutAware(MulticutAwareCodec),
    Ensemble(EnsembleCodec),
}

impl MulticutCodec {
    pub fn write_encoding(&self, bs: &mut BitStream, mask: &Mask) -> Result<()> {
        match self {
            MulticutCodec::Default(c) => c.write_encoding(bs, mask),
            MulticutCodec::DynamicHuffman(c) => c.write_encoding(bs, mask),
            MulticutCodec::Border(c) => c.write_encoding(bs, mask),
            MulticutCodec::MulticutAware(c) => c.write_encoding(bs, mask),
            MulticutCodec::Ensemble(c) => c.write_encoding(bs, mask),
        }
    }

    pub fn read_mask(
        &self,
        reader: &mut BitStreamReader<'_>,
        rows: usize,
        cols: usize,
    ) -> Result<Mask> {
        match self {
            MulticutCodec::Default(c) => c.read_mask(reader, rows, cols),
            MulticutCodec::DynamicHuffman(c) => c.read_mask(reader, rows, cols),
            MulticutCodec::Border(c) => c.read_mask(reader, rows, cols),
            MulticutCodec::MulticutAware(c) => c.read_mask(reader, rows, cols),
            MulticutCodec::Ensemble(c) => c.read_mask(reader, rows, cols),
        }
    }
}

impl Display for MulticutCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MulticutCodec::Default(_) => write!(f, "DefaultMulticutCodec"),
            MulticutCodec::DynamicHuffman(_) => write!(f, "DynamicHuffmanCodec"),
            MulticutCodec::Border(_) => write!(f, "BorderCodec"),
            MulticutCodec::MulticutAware(c) => write!(
                f,
                "MulticutAwareCodec[row={};col={}]",
                c.row_codec_factory, c.col_codec_factory
            ),
            MulticutCodec::Ensemble(_) => write!(f, "EnsembleCodec"),
        }
    }
}

pub fn collect_row_edges(mask: &Mask) -> Vec<bool> {
    let mut row_edges = Vec::with_capacity(mask.rows() * mask.cols().saturating_sub(1));
    for r in 0..mask.rows() {
        for c in 0..mask.cols() - 1 {
            row_edges.push(mask.at(r, c) == mask.at(r, c + 1));
        }
    }
    row_edges
}

pub fn collect_col_edges(mask: &Mask) -> Vec<bool> {
    let mut col_edges = Vec::with_capacity(mask.cols() * mask.rows().saturating_sub(1));
    for c in 0..mask.cols() {
        for r in 0..mask.rows() - 1 {
            col_edges.push(mask.at(r, c) == mask.at(r + 1, c));
        }
    }
    col_edges
}

/// Labels pixels by an iterative 4-connected flood across joined edges
/// only. Scanning for seeds in raster order makes the result canonical.
pub fn mask_from_edges(
    row_edges: &[bool],
    col_edges: &[bool],
    rows: usize,
    cols: usize,
) -> Mask {
    const UNSET: i32 = i32::MAX;
    let mut mask = Mask::filled(rows, cols, UNSET);

    let row_edge_exists = |row: usize, col: usize| -> bool {
        if row >= rows || col >= cols - 1 {
            return false;
        }
        row_edges[row * (cols - 1) + col]
    };

    let col_edge_exists = |row: usize, col: usize| -> bool {
        if row >= rows - 1 || col >= cols {
            return false;
        }
        col_edges[col * (rows - 1) + row]
    };

    let mut index: i32 = -1;
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for r in 0..rows {
        for c in 0..cols {
            if mask.at(r, c) != UNSET {
                continue;
            }

            index += 1;
            mask.set(r, c, index);
            stack.push((r, c));

            while let Some((cr, cc)) = stack.pop() {
                if row_edge_exists(cr, cc) && mask.at(cr, cc + 1) == UNSET {
                    mask.set(cr, cc + 1, index);
                    stack.push((cr, cc + 1));
                }
                if cc > 0 && row_edge_exists(cr, cc - 1) && mask.at(cr, cc - 1) == UNSET {
                    mask.set(cr, cc - 1, index);
                    stack.push((cr, cc - 1));
                }
                if col_edge_exists(cr, cc) && mask.at(cr + 1, cc) == UNSET {
                    mask.set(cr + 1, cc, index);
                    stack.push((cr + 1, cc));
                }
                if cr > 0 && col_edge_exists(cr - 1, cc) && mask.at(cr - 1, cc) == UNSET {
                    mask.set(cr - 1, cc, index);
                    stack.push((cr - 1, cc));
                }
            }
        }
    }

    mask
}

/// Uncompressed baseline: one bit per edge, row edges raster by raster,
/// then column edges column by column.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultMulticutCodec;

impl DefaultMulticutCodec {
    pub fn write_encoding(&self, bs: &mut BitStream, mask: &Mask) -> Result<()> {
        for joined in collect_row_edges(mask) {
            bs.append(joined as u64, 1);
        }
        for joined in collect_col_edges(mask) {
            bs.append(joined as u64, 1);
        }
        Ok(())
    }

    pub fn read_mask(
        &self,
        reader: &mut BitStreamReader<'_>,
        rows: usize,
        cols: usize,
    ) -> Result<Mask> {
        let n_row_edges = (cols - 1) * rows;
        let n_col_edges = cols * (rows - 1);

        let row_edges = reader.read_bits(n_row_edges).context(here!())?;
        let col_edges = reader.read_bits(n_col_edges).context(here!())?;

        Ok(mask_from_edges(&row_edges, &col_edges, rows, cols))
    }
}

/// One 2x2 pixel block's eight edge bits packed into a byte, the token
/// alphabet of the dynamic Huffman codec. Bit order is fixed: the four row
/// edges first, then the four column edges.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct EdgeBlock {
    pub bits: u8,
}

impl EdgeBlock {
    pub fn set(&mut self, idx: usize, value: bool) {
        assert!(idx < 8);
        let clear = !(1u8 << idx);
        self.bits = (self.bits & clear) | ((value as u8) << idx);
    }

    pub fn get(&self, idx: usize) -> bool {
        assert!(idx < 8);
        (self.bits >> idx) & 1 != 0
    }
}

impl HuffmanToken for EdgeBlock {
    fn encode(&self, bs: &mut BitStream) {
        bs.append(u64::from(self.bits), 8);
    }

    fn encode_size(&self) -> usize {
        8
    }

    fn decode(reader: &mut BitStreamReader<'_>) -> Result<Self> {
        Ok(EdgeBlock {
            bits: reader.read8u()?,
        })
    }
}

/// Tiles the edge grid in 2x2 pixel blocks of eight edges each, then
/// Huffman codes the block bytes. The 256 quantized block frequencies are
/// transmitted ahead of the payload so the decoder rebuilds the same tree.
#[derive(Clone, Copy, Debug, Default)]
pub struct DynamicHuffmanCodec;

impl DynamicHuffmanCodec {
    pub fn write_encoding(&self, bs: &mut BitStream, mask: &Mask) -> Result<()> {
        let rows = mask.rows();
        let cols = mask.cols();
        let row_edges = collect_row_edges(mask);
        let col_edges = collect_col_edges(mask);

        let get = |v: &[bool], i: usize| -> bool { i < v.len() && v[i] };

        let edges_per_row = cols - 1;
        let edges_per_col = rows - 1;

        let mut tokens = Vec::new();
        let mut token_freq = [0u32; 256];

        for r in (0..rows).step_by(2) {
            for c in (0..cols).step_by(2) {
                let row_edge_start = r * edges_per_row + c;
                let col_edge_start = c * edges_per_col + r;

                let mut token = EdgeBlock::default();
                token.set(0, get(&row_edges, row_edge_start));
                token.set(1, get(&row_edges, row_edge_start + 1));
                token.set(2, get(&row_edges, row_edge_start + edges_per_row));
                token.set(3, get(&row_edges, row_edge_start + edges_per_row + 1));
                token.set(4, get(&col_edges, col_edge_start));
                token.set(5, get(&col_edges, col_edge_start + 1));
                token.set(6, get(&col_edges, col_edge_start + edges_per_col));
                token.set(7, get(&col_edges, col_edge_start + edges_per_col + 1));

                tokens.push(token);
                token_freq[token.bits as usize] += 1;
            }
        }

        // quantize frequencies, keeping observed tokens away from zero
        let max_encode = (1u32 << BLOCK_FREQ_PRECISION) - 1;
        let max_freq = token_freq.iter().copied().max().unwrap_or(0).max(1);

        let mut quantized = [0u32; 256];
        for i in 0..256 {
            if token_freq[i] > 0 {
                let prob = f64::from(token_freq[i]) / f64::from(max_freq);
                quantized[i] = ((prob * f64::from(max_encode)) as u32).clamp(1, max_encode);
            }
            bs.append(u64::from(quantized[i]), BLOCK_FREQ_PRECISION);
        }

        let token_freqs: Vec<(EdgeBlock, u32)> = (0..256)
            .filter(|&i| quantized[i] > 0)
            .map(|i| (EdgeBlock { bits: i as u8 }, quantized[i]))
            .collect();

        let codec = HuffmanCodec::new(&token_freqs, 0);
        codec.encode_tokens(&tokens, bs).context(here!())?;

        Ok(())
    }

    pub fn read_mask(
        &self,
        reader: &mut BitStreamReader<'_>,
        rows: usize,
        cols: usize,
    ) -> Result<Mask> {
        let mut token_freqs = Vec::new();
        for i in 0..256usize {
            let freq = reader.read(BLOCK_FREQ_PRECISION)? as u32;
            if freq > 0 {
                token_freqs.push((EdgeBlock { bits: i as u8 }, freq));
            }
        }

        if token_freqs.is_empty() {
            return err_exit_code(ExitCode::StreamInconsistent, "all block frequencies are zero");
        }

        let codec = HuffmanCodec::new(&token_freqs, 0);

        let n_row_edges = (cols - 1) * rows;
        let mut row_edges = vec![false; n_row_edges];

        let n_col_edges = cols * (rows - 1);
        let mut col_edges = vec![false; n_col_edges];

        let blocks_per_row = (cols + 1) / 2;
        let blocks_per_col = (rows + 1) / 2;
        let n_blocks = blocks_per_row * blocks_per_col;
        let edges_per_row = cols - 1;
        let edges_per_col = rows - 1;

        let set = |v: &mut [bool], i: usize, value: bool| {
            if i < v.len() {
                v[i] = value;
            }
        };

        for i in 0..n_blocks {
            let token = codec.read_next(reader).context(here!())?;
            let block_r = i / blocks_per_row;
            let block_c = i % blocks_per_row;
            let r = block_r * 2;
            let c = block_c * 2;
            let row_edge_start = r * edges_per_row + c;
            let col_edge_start = c * edges_per_col + r;

            set(&mut row_edges, row_edge_start, token.get(0));
            set(&mut row_edges, row_edge_start + 1, token.get(1));
            set(&mut row_edges, row_edge_start + edges_per_row, token.get(2));
            set(
                &mut row_edges,
                row_edge_start + edges_per_row + 1,
                token.get(3),
            );
            set(&mut col_edges, col_edge_start, token.get(4));
            set(&mut col_edges, col_edge_start + 1, token.get(5));
            set(&mut col_edges, col_edge_start + edges_per_col, token.get(6));
            set(
                &mut col_edges,
                col_edge_start + edges_per_col + 1,
                token.get(7),
            );
        }

        Ok(mask_from_edges(&row_edges, &col_edges, rows, cols))
    }
}
