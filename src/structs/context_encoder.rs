/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use std::collections::VecDeque;
use std::fmt::Display;

use anyhow::Result;

use crate::consts::DEFAULT_WEIGHT;
use crate::structs::arithmetic::{ArithmeticDecoder, ArithmeticEncoder, FrequencyTable};
use crate::structs::bit_stream::{BitStream, BitStreamReader};

/// Uniform interface over a stream of single bits. The context vector is
/// advisory: callers pass the bits emitted so far, individual encoders are
/// free to ignore it (all of the current ones do).
///
/// Lifecycle is initialize, any number of encode_bit calls, finalize. The
/// buffering variants only touch the output stream on finalize.
pub enum ContextEncoder {
    Naive,
    Block(BlockEncoder),
    AdaptiveBitwise(AdaptiveBitwiseEncoder),
}

impl ContextEncoder {
    pub fn initialize(&mut self) {}

    pub fn encode_bit(
        &mut self,
        bs: &mut BitStream,
        bit: bool,
        _context: &[bool],
    ) -> Result<()> {
        match self {
            ContextEncoder::Naive => {
                bs.append(bit as u64, 1);
                Ok(())
            }
            ContextEncoder::Block(e) => {
                e.push_bit(bit);
                Ok(())
            }
            ContextEncoder::AdaptiveBitwise(e) => e.encode_bit(bit),
        }
    }

    pub fn finalize(&mut self, bs: &mut BitStream) -> Result<()> {
        match self {
            ContextEncoder::Naive => Ok(()),
            ContextEncoder::Block(e) => e.finalize(bs),
            ContextEncoder::AdaptiveBitwise(e) => {
                e.finalize(bs);
                Ok(())
            }
        }
    }
}

pub enum ContextDecoder {
    Naive,
    Block(BlockDecoder),
    AdaptiveBitwise(AdaptiveBitwiseDecoder),
}

impl ContextDecoder {
    pub fn initialize(&mut self, reader: &mut BitStreamReader<'_>) -> Result<()> {
        match self {
            ContextDecoder::Naive => Ok(()),
            ContextDecoder::Block(d) => d.initialize(reader),
            ContextDecoder::AdaptiveBitwise(d) => d.initialize(reader),
        }
    }

    pub fn decode_bit(
        &mut self,
        reader: &mut BitStreamReader<'_>,
        _context: &[bool],
    ) -> Result<bool> {
        match self {
            ContextDecoder::Naive => reader.read_bit(),
            ContextDecoder::Block(d) => d.decode_bit(reader),
            ContextDecoder::AdaptiveBitwise(d) => d.decode_bit(reader),
        }
    }

    pub fn finalize(&mut self, reader: &mut BitStreamReader<'_>) {
        match self {
            ContextDecoder::Naive => {}
            ContextDecoder::Block(d) => d.finalize(reader),
            ContextDecoder::AdaptiveBitwise(d) => d.finalize(reader),
        }
    }
}

/// appends the terminated arithmetic payload behind a 32 bit length prefix,
/// with 32 spare zero bits so the decoder's code word refills stay inside
/// the declared segment
fn splice_arithmetic_segment(mut encoder: ArithmeticEncoder, bs: &mut BitStream) {
    encoder.finish();
    let mut payload = encoder.into_output();
    payload.append(0, 32);
    bs.append(payload.size() as u64, 32);
    bs.append_stream(&payload);
}

/// Buffers incoming bits into fixed-width symbols; on finalize the tail is
/// zero padded, empirical symbol frequencies are quantized and written,
/// then the whole symbol stream is arithmetic coded.
pub struct BlockEncoder {
    block_size: usize,
    freq_precision: usize,
    current_symbol: Vec<bool>,
    symbols: Vec<u64>,
}

impl BlockEncoder {
    pub fn new(block_size: usize, freq_precision: usize) -> Self {
        assert!(block_size > 0 && block_size <= 16);
        assert!(freq_precision > 0 && freq_precision <= 32);

        BlockEncoder {
            block_size,
            freq_precision,
            current_symbol: Vec::new(),
            symbols: Vec::new(),
        }
    }

    fn push_bit(&mut self, bit: bool) {
        self.current_symbol.push(bit);
        if self.current_symbol.len() == self.block_size {
            let mut packed = 0u64;
            for (b, &bit) in self.current_symbol.iter().enumerate() {
                packed |= (bit as u64) << b;
            }
            self.symbols.push(packed);
            self.current_symbol.clear();
        }
    }

    fn finalize(&mut self, bs: &mut BitStream) -> Result<()> {
        while !self.current_symbol.is_empty() {
            self.push_bit(false);
        }

        let n_symbols = 1usize << self.block_size;
        let mut symbol_counts = vec![0u32; n_symbols];
        for &s in &self.symbols {
            symbol_counts[s as usize] += 1;
        }

        let max_freq = symbol_counts.iter().copied().max().unwrap_or(0);
        let max_count = (1u64 << self.freq_precision) - 1;

        let mut encode_counts = Vec::with_capacity(n_symbols);
        for &count in &symbol_counts {
            let encoded = if count > 0 {
                ((f64::from(count) / f64::from(max_freq) * max_count as f64) as u64)
                    .clamp(1, max_count)
            } else {
                0
            };
            encode_counts.push(encoded as u32);
            bs.append(encoded, self.freq_precision);
        }

        let freqs = FrequencyTable::new(encode_counts);
        let mut encoder = ArithmeticEncoder::new();
        for &s in &self.symbols {
            encoder.write(&freqs, s as usize)?;
        }

        splice_arithmetic_segment(encoder, bs);
        Ok(())
    }
}

pub struct BlockDecoder {
    block_size: usize,
    freq_precision: usize,
    freqs: Option<FrequencyTable>,
    decoder: Option<ArithmeticDecoder>,
    end_head: usize,
    current_symbol: Vec<bool>,
}

impl BlockDecoder {
    pub fn new(block_size: usize, freq_precision: usize) -> Self {
        assert!(block_size > 0 && block_size <= 16);
        assert!(freq_precision > 0 && freq_precision <= 32);

        BlockDecoder {
            block_size,
            freq_precision,
            freqs: None,
            decoder: None,
            end_head: 0,
            current_symbol: Vec::new(),
        }
    }

    fn initialize(&mut self, reader: &mut BitStreamReader<'_>) -> Result<()> {
        let n_symbols = 1usize << self.block_size;
        let mut counts = Vec::with_capacity(n_symbols);
        for _ in 0..n_symbols {
            counts.push(reader.read(self.freq_precision)? as u32);
        }
        self.freqs = Some(FrequencyTable::new(counts));

        let declared_bits = reader.read32u()? as usize;
        self.end_head = reader.head + declared_bits;
        self.decoder = Some(ArithmeticDecoder::new(reader, self.end_head));
        Ok(())
    }

    fn decode_bit(&mut self, reader: &mut BitStreamReader<'_>) -> Result<bool> {
        if self.current_symbol.is_empty() {
            let freqs = self.freqs.as_ref().expect("initialize must be called");
            let decoder = self.decoder.as_mut().expect("initialize must be called");
            let packed = decoder.read(freqs, reader, self.end_head)?;

            for b in (0..self.block_size).rev() {
                self.current_symbol.push((packed >> b) & 1 != 0);
            }
        }

        Ok(self.current_symbol.pop().unwrap())
    }

    fn finalize(&mut self, reader: &mut BitStreamReader<'_>) {
        reader.head = self.end_head;
    }
}

/// History of the last `max_window_size` bits with per-context bit counts.
/// Two running context registers make the update O(1): `current_context`
/// holds the newest `context_size` bits, `last_context` the context of the
/// bit about to leave the counted region.
pub struct SlidingWindowHistory {
    max_window_size: usize,
    context_size: usize,
    window: VecDeque<bool>,
    freqs: Vec<[u32; 2]>,
    context_mask: usize,
    current_context: usize,
    last_context: usize,
}

impl SlidingWindowHistory {
    pub fn new(max_window_size: usize, context_size: usize) -> Self {
        assert!(context_size < max_window_size);

        SlidingWindowHistory {
            max_window_size,
            context_size,
            window: VecDeque::with_capacity(max_window_size),
            freqs: vec![[0, 0]; 1 << context_size],
            context_mask: (1 << context_size) - 1,
            current_context: 0,
            last_context: 0,
        }
    }

    pub fn add(&mut self, bit: bool) {
        if self.window.len() >= self.context_size {
            self.freqs[self.current_context][bit as usize] += 1;
        }

        if self.window.len() == self.max_window_size {
            let evicted = self.window[self.max_window_size - self.context_size - 1];
            self.freqs[self.last_context][evicted as usize] -= 1;
            self.last_context = ((self.last_context << 1) & self.context_mask) | evicted as usize;
            self.window.pop_back();
        } else if self.window.len() >= self.max_window_size - self.context_size {
            self.last_context = (self.last_context << 1)
                | self.window[self.max_window_size - self.context_size - 1] as usize;
        }

        self.current_context = ((self.current_context << 1) & self.context_mask) | bit as usize;
        self.window.push_front(bit);
    }

    /// (count of zeros, count of ones) seen after the current context
    pub fn current_context_freqs(&self) -> [u32; 2] {
        self.freqs[self.current_context]
    }
}

/// Laplace-like smoothing of the raw window counts into a two symbol
/// frequency pair that is always codeable.
fn smoothed_bit_freqs(raw: [u32; 2]) -> Vec<u32> {
    if raw[0] == 0 && raw[1] == 0 {
        vec![1, 1]
    } else if raw[0] == 0 {
        vec![1, DEFAULT_WEIGHT]
    } else if raw[1] == 0 {
        vec![DEFAULT_WEIGHT, 1]
    } else {
        vec![raw[0], raw[1]]
    }
}

/// Estimates p(0)/p(1) per preceding-bit context from a sliding window and
/// arithmetic codes each bit against that estimate. Encoder and decoder
/// keep identical window state, so the model never needs to be transmitted.
pub struct AdaptiveBitwiseEncoder {
    window: SlidingWindowHistory,
    encoder: ArithmeticEncoder,
}

impl AdaptiveBitwiseEncoder {
    pub fn new(window_size: usize, order: usize) -> Self {
        AdaptiveBitwiseEncoder {
            window: SlidingWindowHistory::new(window_size, order),
            encoder: ArithmeticEncoder::new(),
        }
    }

    fn encode_bit(&mut self, bit: bool) -> Result<()> {
        let freqs = FrequencyTable::new(smoothed_bit_freqs(self.window.current_context_freqs()));
        self.encoder.write(&freqs, bit as usize)?;
        self.window.add(bit);
        Ok(())
    }

    fn finalize(&mut self, bs: &mut BitStream) {
        let encoder = std::mem::replace(&mut self.encoder, ArithmeticEncoder::new());
        splice_arithmetic_segment(encoder, bs);
    }
}

pub struct AdaptiveBitwiseDecoder {
    window: SlidingWindowHistory,
    decoder: Option<ArithmeticDecoder>,
    end_head: usize,
}

impl AdaptiveBitwiseDecoder {
    pub fn new(window_size: usize, order: usize) -> Self {
        AdaptiveBitwiseDecoder {
            window: SlidingWindowHistory::new(window_size, order),
            decoder: None,
            end_head: 0,
        }
    }

    fn initialize(&mut self, reader: &mut BitStreamReader<'_>) -> Result<()> {
        let declared_bits = reader.read32u()? as usize;
        self.end_head = reader.head + declared_bits;
        self.decoder = Some(ArithmeticDecoder::new(reader, self.end_head));
        Ok(())
    }

    fn decode_bit(&mut self, reader: &mut BitStreamReader<'_>) -> Result<bool> {
        let freqs = FrequencyTable::new(smoothed_bit_freqs(self.window.current_context_freqs()));
        let decoder = self.decoder.as_mut().expect("initialize must be called");
        let bit = decoder.read(&freqs, reader, self.end_head)? != 0;
        self.window.add(bit);
        Ok(bit)
    }

    fn finalize(&mut self, reader: &mut BitStreamReader<'_>) {
        reader.head = self.end_head;
    }
}

/// Describes an encoder/decoder pair; cheap to clone and to stamp fresh
/// codec instances from, which the multicut-aware codec does once per
/// direction per call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContextCodecFactory {
    Naive,
    Block {
        block_size: usize,
        freq_precision: usize,
    },
    AdaptiveBitwise {
        window_size: usize,
        order: usize,
    },
}

impl ContextCodecFactory {
    pub fn naive() -> Self {
        ContextCodecFactory::Naive
    }

    pub fn block(block_size: usize, freq_precision: usize) -> Self {
        assert!(block_size <= 16);
        assert!(freq_precision <= 32);
        ContextCodecFactory::Block {
            block_size,
            freq_precision,
        }
    }

    pub fn adaptive_bitwise(window_size: usize, order: usize) -> Self {
        ContextCodecFactory::AdaptiveBitwise { window_size, order }
    }

    pub fn make_encoder(&self) -> ContextEncoder {
        match *self {
            ContextCodecFactory::Naive => ContextEncoder::Naive,
            ContextCodecFactory::Block {
                block_size,
                freq_precision,
            } => ContextEncoder::Block(BlockEncoder::new(block_size, freq_precision)),
            ContextCodecFactory::AdaptiveBitwise { window_size, order } => {
                ContextEncoder::AdaptiveBitwise(AdaptiveBitwiseEncoder::new(window_size, order))
            }
        }
    }

    pub fn make_decoder(&self) -> ContextDecoder {
        match *self {
            ContextCodecFactory::Naive => ContextDecoder::Naive,
            ContextCodecFactory::Block {
                block_size,
                freq_precision,
            } => ContextDecoder::Block(BlockDecoder::new(block_size, freq_precision)),
            ContextCodecFactory::AdaptiveBitwise { window_size, order } => {
                ContextDecoder::AdaptiveBitwise(AdaptiveBitwiseDecoder::new(window_size, order))
            }
        }
    }
}

impl Display for ContextCodecFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextCodecFactory::Naive => write!(f, "naive"),
            ContextCodecFactory::Block {
                block_size,
                freq_precision,
            } => write!(f, "block({}|{})", block_size, freq_precision),
            ContextCodecFactory::AdaptiveBitwise { window_size, order } => {
                write!(f, "adaptive({}|{})", order, window_size)
            }
        }
    }
}
