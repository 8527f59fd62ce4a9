/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result};

use crate::consts::BORDER_FREQ_PRECISION;
use crate::helpers::{err_exit_code, here};
use crate::multicut_error::ExitCode;
use crate::structs::arithmetic::{
    FrequencyTable, WrappedArithmeticDecoder, WrappedArithmeticEncoder,
};
use crate::structs::bit_stream::{BitStream, BitStreamReader};
use crate::structs::multicut_codec::mask_from_edges;
use crate::structs::raster_image::Mask;

/// A pixel corner in the dual grid. Corner (r, c) sits above-left of pixel
/// (r, c); corner coordinates therefore run to rows/cols inclusive.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
struct Corner {
    r: i32,
    c: i32,
}

impl Corner {
    fn offset(&self, dr: i32, dc: i32) -> Corner {
        Corner {
            r: self.r + dr,
            c: self.c + dc,
        }
    }
}

/// unit segment between two adjacent corners; `a` is the corner the walk
/// came from, `b` the one it may continue to
#[derive(Clone, Copy, Debug)]
struct DualEdge {
    a: Corner,
    b: Corner,
}

impl DualEdge {
    /// identity is undirected
    fn key(&self) -> (Corner, Corner) {
        if self.a <= self.b {
            (self.a, self.b)
        } else {
            (self.b, self.a)
        }
    }
}

const DELTA: [(i32, i32); 4] = [(0, 1), (1, 0), (0, -1), (-1, 0)];

/// Shared DFS state of the boundary walk: which dual edges have known bits.
/// Encoder and decoder replay the identical traversal, so the per-step
/// symbol boundaries line up without any framing per step.
struct WalkState {
    known_edges: HashMap<(Corner, Corner), bool>,
    rows: i32,
    cols: i32,
}

impl WalkState {
    fn new(rows: usize, cols: usize) -> Self {
        WalkState {
            known_edges: HashMap::new(),
            rows: rows as i32,
            cols: cols as i32,
        }
    }

    /// interior corners only; corners on the image frame are not valid
    /// traversal anchors by themselves
    fn valid(&self, p: &Corner) -> bool {
        p.r > 0 && p.c > 0 && p.r < self.rows && p.c < self.cols
    }

    /// the still-unknown dual edges around a corner, in fixed enumeration
    /// order; edges lying entirely on the frame are excluded
    fn adjacent(&self, p: &Corner) -> Vec<DualEdge> {
        let mut result = Vec::with_capacity(4);
        for (dr, dc) in DELTA {
            let nb = p.offset(dr, dc);
            if !self.valid(&nb) && !self.valid(p) {
                continue;
            }
            let edge = DualEdge { a: *p, b: nb };
            if self.known_edges.contains_key(&edge.key()) {
                continue;
            }
            result.push(edge);
        }
        result
    }

    /// DFS from a root corner. Each step queries the boundary bits of all
    /// unknown neighbor edges at once (one variable-length symbol) and
    /// recurses along the edges whose bit is set.
    fn iterate(
        &mut self,
        start: Corner,
        read_fn: &mut dyn FnMut(&[DualEdge]) -> Result<Vec<bool>>,
    ) -> Result<()> {
        let mut next = vec![start];

        while let Some(current) = next.pop() {
            let adjacent = self.adjacent(&current);
            if adjacent.is_empty() {
                continue;
            }

            let edge_data = read_fn(&adjacent)?;

            for (edge, &bit) in adjacent.iter().zip(edge_data.iter()) {
                if bit {
                    next.push(edge.b);
                }
                self.known_edges.insert(edge.key(), bit);
            }
        }

        Ok(())
    }
}

/// A DFS step's boundary bits packed MSB-first, at most four of them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct BorderSymbol {
    data: u32,
    len: u32,
}

impl BorderSymbol {
    fn from_bits(bits: &[bool]) -> Self {
        let mut result = BorderSymbol::default();
        for &b in bits {
            result.data = (result.data << 1) | b as u32;
            result.len += 1;
        }
        result
    }

    fn get(&self, i: u32) -> bool {
        (self.data >> (self.len - i - 1)) & 1 != 0
    }

    fn as_bits(&self) -> Vec<bool> {
        (0..self.len).map(|i| self.get(i)).collect()
    }
}

/// One arithmetic frequency table per symbol length. Tables are keyed and
/// serialized in ascending length order.
struct BorderSymbolTable {
    len_to_table: BTreeMap<u32, FrequencyTable>,
    freq_precision: usize,
}

impl BorderSymbolTable {
    fn from_symbols(symbols: &[BorderSymbol], freq_precision: usize) -> Self {
        let mut len_to_counts: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
        for sym in symbols {
            let counts = len_to_counts
                .entry(sym.len)
                .or_insert_with(|| vec![0; 1 << sym.len]);
            counts[sym.data as usize] += 1;
        }

        let max_freq = (1u32 << freq_precision) - 1;

        let mut len_to_table = BTreeMap::new();
        for (len, mut counts) in len_to_counts {
            let max_count = counts.iter().copied().max().unwrap_or(0).max(1);

            for f in counts.iter_mut() {
                if *f > 0 {
                    *f = ((f64::from(*f) / f64::from(max_count) * f64::from(max_freq)) as u32)
                        .clamp(1, max_freq);
                }
            }

            len_to_table.insert(len, FrequencyTable::new(counts));
        }

        BorderSymbolTable {
            len_to_table,
            freq_precision,
        }
    }

    fn read(reader: &mut BitStreamReader<'_>, freq_precision: usize) -> Result<Self> {
        let n_tables = reader.read8u()?;

        let mut len_to_table = BTreeMap::new();
        for _ in 0..n_tables {
            let len = u32::from(reader.read8u()?);
            if len == 0 || len > 4 {
                return err_exit_code(
                    ExitCode::StreamInconsistent,
                    "symbol table length out of range",
                );
            }

            let mut counts = Vec::with_capacity(1 << len);
            for _ in 0..(1 << len) {
                counts.push(reader.read(freq_precision)? as u32);
            }
            len_to_table.insert(len, FrequencyTable::new(counts));
        }

        Ok(BorderSymbolTable {
            len_to_table,
            freq_precision,
        })
    }

    fn encode(&self, bs: &mut BitStream) {
        bs.append(self.len_to_table.len() as u64, 8);
        for (&len, table) in &self.len_to_table {
            bs.append(u64::from(len), 8);
            for i in 0..(1usize << len) {
                bs.append(u64::from(table.get(i)), self.freq_precision);
            }
        }
    }

    fn write_symbol(&self, enc: &mut WrappedArithmeticEncoder, sym: &BorderSymbol) -> Result<()> {
        let table = match self.len_to_table.get(&sym.len) {
            Some(t) => t,
            None => {
                return err_exit_code(
                    ExitCode::AssertionFailure,
                    "no frequency table for symbol length",
                )
            }
        };
        enc.write(table, sym.data as usize)
    }

    fn read_symbol(&self, dec: &mut WrappedArithmeticDecoder, len: u32) -> Result<Vec<bool>> {
        let table = match self.len_to_table.get(&len) {
            Some(t) => t,
            None => {
                return err_exit_code(
                    ExitCode::StreamInconsistent,
                    "no frequency table for symbol length",
                )
            }
        };
        let data = dec.read(table)?;
        Ok(BorderSymbol { data, len }.as_bits())
    }
}

/// Serializes the multicut by walking its inner boundaries in the corner
/// dual graph. Each DFS step emits one symbol of the boundary bits of the
/// corner's unknown edges; roots of the walk are transmitted explicitly.
///
/// With `encode_join_edges` set the bit interpretation flips and the walk
/// follows joined edges instead of cut ones.
#[derive(Clone, Copy, Debug, Default)]
pub struct BorderCodec {
    pub encode_join_edges: bool,
}

impl BorderCodec {
    pub fn new(encode_join_edges: bool) -> Self {
        BorderCodec { encode_join_edges }
    }

    /// boundary bit of a dual edge under the current polarity
    fn read_from_mask(&self, edge: &DualEdge, mask: &Mask) -> bool {
        let a = edge.a;
        let b = edge.b;

        if a.r == b.r {
            // horizontal dual edge separates the pixel rows above and below
            let col = a.c.min(b.c) as usize;
            let row = a.r as usize;
            (mask.at(row - 1, col) == mask.at(row, col)) == self.encode_join_edges
        } else {
            // vertical dual edge separates the pixel columns left and right
            let row = a.r.min(b.r) as usize;
            let col = a.c as usize;
            (mask.at(row, col - 1) == mask.at(row, col)) == self.encode_join_edges
        }
    }

    pub fn write_encoding(&self, bs: &mut BitStream, mask: &Mask) -> Result<()> {
        let rows = mask.rows();
        let cols = mask.cols();

        let mut state = WalkState::new(rows, cols);
        let mut symbols: Vec<BorderSymbol> = Vec::new();
        let mut roots: Vec<Corner> = Vec::new();

        for r in 0..=rows as i32 {
            for c in 0..=cols as i32 {
                let p = Corner { r, c };
                let adjacent = state.adjacent(&p);
                if adjacent.iter().any(|e| self.read_from_mask(e, mask)) {
                    roots.push(p);
                    state.iterate(p, &mut |edges| {
                        let data: Vec<bool> =
                            edges.iter().map(|e| self.read_from_mask(e, mask)).collect();
                        symbols.push(BorderSymbol::from_bits(&data));
                        Ok(data)
                    })?;
                }
            }
        }

        if roots.len() >= 1 << 16 {
            return err_exit_code(ExitCode::AssertionFailure, "too many boundary roots");
        }

        bs.append(roots.len() as u64, 16);
        for p in &roots {
            bs.append(p.r as u64, 16);
            bs.append(p.c as u64, 16);
        }

        let table = BorderSymbolTable::from_symbols(&symbols, BORDER_FREQ_PRECISION);
        table.encode(bs);

        let mut encoder = WrappedArithmeticEncoder::new();
        for sym in &symbols {
            table.write_symbol(&mut encoder, sym).context(here!())?;
        }
        encoder.finish(bs);

        Ok(())
    }

    pub fn read_mask(
        &self,
        reader: &mut BitStreamReader<'_>,
        rows: usize,
        cols: usize,
    ) -> Result<Mask> {
        let n_roots = reader.read16u()?;
        let mut roots = Vec::with_capacity(n_roots as usize);
        for _ in 0..n_roots {
            let r = i32::from(reader.read16u()?);
            let c = i32::from(reader.read16u()?);
            roots.push(Corner { r, c });
        }

        let table = BorderSymbolTable::read(reader, BORDER_FREQ_PRECISION).context(here!())?;
        let mut decoder = WrappedArithmeticDecoder::new(reader).context(here!())?;

        let mut state = WalkState::new(rows, cols);
        for p in roots {
            state.iterate(p, &mut |edges| {
                table.read_symbol(&mut decoder, edges.len() as u32)
            })?;
        }

        // rebuild the pixel edge grid; untouched dual edges are non-boundary
        let mut row_edges = Vec::with_capacity(rows * (cols - 1));
        for r in 0..rows as i32 {
            for c in 0..cols as i32 - 1 {
                let edge = DualEdge {
                    a: Corner { r, c: c + 1 },
                    b: Corner { r: r + 1, c: c + 1 },
                };
                let joined = match state.known_edges.get(&edge.key()) {
                    None => !self.encode_join_edges,
                    Some(&bit) => bit == self.encode_join_edges,
                };
                row_edges.push(joined);
            }
        }

        let mut col_edges = Vec::with_capacity((rows - 1) * cols);
        for c in 0..cols as i32 {
            for r in 0..rows as i32 - 1 {
                let edge = DualEdge {
                    a: Corner { r: r + 1, c },
                    b: Corner { r: r + 1, c: c + 1 },
                };
                let joined = match state.known_edges.get(&edge.key()) {
                    None => !self.encode_join_edges,
                    Some(&bit) => bit == self.encode_join_edges,
                };
                col_edges.push(joined);
            }
        }

        let mask = mask_from_edges(&row_edges, &col_edges, rows, cols);
        Ok(mask.relabel())
    }
}
