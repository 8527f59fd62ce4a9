/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use anyhow::Result;

use crate::helpers::err_exit_code;
use crate::multicut_error::ExitCode;
use crate::structs::bit_stream::{BitStream, BitStreamReader};

const NUM_STATE_BITS: usize = 32;
const FULL_RANGE: u64 = 1 << NUM_STATE_BITS;
const HALF_RANGE: u64 = FULL_RANGE >> 1;
const QUARTER_RANGE: u64 = HALF_RANGE >> 1;
const MAXIMUM_TOTAL: u64 = QUARTER_RANGE + 2;
const STATE_MASK: u64 = FULL_RANGE - 1;

/// Symbol weights plus derived cumulative sums, consumed by the arithmetic
/// coder. Weights are fixed at construction; a symbol with weight zero
/// cannot be coded.
#[derive(Clone, Debug)]
pub struct FrequencyTable {
    frequencies: Vec<u32>,
    cumulative: Vec<u64>,
}

impl FrequencyTable {
    pub fn new(frequencies: Vec<u32>) -> Self {
        let mut cumulative = Vec::with_capacity(frequencies.len() + 1);
        let mut sum = 0u64;
        cumulative.push(0);
        for &f in &frequencies {
            sum += u64::from(f);
            cumulative.push(sum);
        }

        FrequencyTable {
            frequencies,
            cumulative,
        }
    }

    pub fn symbol_limit(&self) -> usize {
        self.frequencies.len()
    }

    pub fn get(&self, symbol: usize) -> u32 {
        self.frequencies[symbol]
    }

    pub fn total(&self) -> u64 {
        self.cumulative[self.frequencies.len()]
    }

    pub fn get_low(&self, symbol: usize) -> u64 {
        self.cumulative[symbol]
    }

    pub fn get_high(&self, symbol: usize) -> u64 {
        self.cumulative[symbol + 1]
    }
}

/// Range encoder with 32 bits of state. Coded bits accumulate in an internal
/// stream which the caller splices into the output, usually behind a length
/// prefix so decoders can skip the segment.
pub struct ArithmeticEncoder {
    low: u64,
    high: u64,
    num_underflow: u64,
    output: BitStream,
}

impl Default for ArithmeticEncoder {
    fn default() -> Self {
        ArithmeticEncoder::new()
    }
}

impl ArithmeticEncoder {
    pub fn new() -> Self {
        ArithmeticEncoder {
            low: 0,
            high: STATE_MASK,
            num_underflow: 0,
            output: BitStream::new(),
        }
    }

    pub fn write(&mut self, freqs: &FrequencyTable, symbol: usize) -> Result<()> {
        if symbol >= freqs.symbol_limit() {
            return err_exit_code(ExitCode::AssertionFailure, "symbol outside of alphabet");
        }

        let total = freqs.total();
        if total == 0 || total > MAXIMUM_TOTAL {
            return err_exit_code(ExitCode::AssertionFailure, "frequency total out of range");
        }

        let sym_low = freqs.get_low(symbol);
        let sym_high = freqs.get_high(symbol);
        if sym_low == sym_high {
            return err_exit_code(
                ExitCode::AssertionFailure,
                "cannot encode a symbol with zero frequency",
            );
        }

        let range = self.high - self.low + 1;
        let new_low = self.low + sym_low * range / total;
        let new_high = self.low + sym_high * range / total - 1;
        self.low = new_low;
        self.high = new_high;

        while ((self.low ^ self.high) & HALF_RANGE) == 0 {
            self.shift();
            self.low = (self.low << 1) & STATE_MASK;
            self.high = ((self.high << 1) & STATE_MASK) | 1;
        }

        while (self.low & !self.high & QUARTER_RANGE) != 0 {
            self.num_underflow += 1;
            self.low = (self.low << 1) ^ HALF_RANGE;
            self.high = ((self.high ^ HALF_RANGE) << 1) | HALF_RANGE | 1;
        }

        Ok(())
    }

    fn shift(&mut self) {
        let bit = self.low >> (NUM_STATE_BITS - 1);
        self.output.append(bit, 1);

        while self.num_underflow > 0 {
            self.output.append(bit ^ 1, 1);
            self.num_underflow -= 1;
        }
    }

    /// terminates the stream so the decoder can resolve the last symbol
    pub fn finish(&mut self) {
        self.output.append(1, 1);
    }

    pub fn into_output(self) -> BitStream {
        self.output
    }
}

/// Range decoder counterpart. The decoder pulls bits from the caller's
/// reader but never consumes past `limit`; beyond it the code word is
/// topped up with zero bits, which is what the encoder's termination
/// convention expects.
pub struct ArithmeticDecoder {
    low: u64,
    high: u64,
    code: u64,
}

impl ArithmeticDecoder {
    pub fn new(reader: &mut BitStreamReader<'_>, limit: usize) -> Self {
        let mut code = 0;
        for _ in 0..NUM_STATE_BITS {
            code = (code << 1) | Self::read_code_bit(reader, limit);
        }

        ArithmeticDecoder {
            low: 0,
            high: STATE_MASK,
            code,
        }
    }

    pub fn read(
        &mut self,
        freqs: &FrequencyTable,
        reader: &mut BitStreamReader<'_>,
        limit: usize,
    ) -> Result<u32> {
        let total = freqs.total();
        if total == 0 {
            return err_exit_code(ExitCode::StreamInconsistent, "frequency table is empty");
        }
        if total > MAXIMUM_TOTAL {
            return err_exit_code(ExitCode::AssertionFailure, "frequency total out of range");
        }

        let range = self.high - self.low + 1;
        let offset = self.code - self.low;
        let value = ((offset + 1) * total - 1) / range;

        let mut start = 0;
        let mut end = freqs.symbol_limit();
        while end - start > 1 {
            let middle = (start + end) >> 1;
            if freqs.get_low(middle) > value {
                end = middle;
            } else {
                start = middle;
            }
        }
        let symbol = start;

        let sym_low = freqs.get_low(symbol);
        let sym_high = freqs.get_high(symbol);
        if sym_low == sym_high {
            return err_exit_code(
                ExitCode::StreamInconsistent,
                "decoded a symbol with zero frequency",
            );
        }

        let new_low = self.low + sym_low * range / total;
        let new_high = self.low + sym_high * range / total - 1;
        self.low = new_low;
        self.high = new_high;

        while ((self.low ^ self.high) & HALF_RANGE) == 0 {
            self.code = ((self.code << 1) & STATE_MASK) | Self::read_code_bit(reader, limit);
            self.low = (self.low << 1) & STATE_MASK;
            self.high = ((self.high << 1) & STATE_MASK) | 1;
        }

        while (self.low & !self.high & QUARTER_RANGE) != 0 {
            self.code = (self.code & HALF_RANGE)
                | ((self.code << 1) & (STATE_MASK >> 1))
                | Self::read_code_bit(reader, limit);
            self.low = (self.low << 1) ^ HALF_RANGE;
            self.high = ((self.high ^ HALF_RANGE) << 1) | HALF_RANGE | 1;
        }

        if !(self.low <= self.code && self.code <= self.high) {
            return err_exit_code(ExitCode::StreamInconsistent, "code out of range");
        }

        Ok(symbol as u32)
    }

    fn read_code_bit(reader: &mut BitStreamReader<'_>, limit: usize) -> u64 {
        if reader.head >= limit || reader.head >= reader.stream().size() {
            return 0;
        }

        let bit = reader.stream().read_at(reader.head, 1);
        reader.head += 1;
        bit
    }
}

/// Framed encoder: on finish, the coded payload is appended behind a 32 bit
/// length prefix so a decoder can locate the segment end.
pub struct WrappedArithmeticEncoder {
    encoder: ArithmeticEncoder,
}

impl Default for WrappedArithmeticEncoder {
    fn default() -> Self {
        WrappedArithmeticEncoder::new()
    }
}

impl WrappedArithmeticEncoder {
    pub fn new() -> Self {
        WrappedArithmeticEncoder {
            encoder: ArithmeticEncoder::new(),
        }
    }

    pub fn write(&mut self, freqs: &FrequencyTable, symbol: usize) -> Result<()> {
        self.encoder.write(freqs, symbol)
    }

    pub fn finish(mut self, out: &mut BitStream) {
        self.encoder.finish();
        let payload = self.encoder.into_output();
        out.append(payload.size() as u64, 32);
        out.append_stream(&payload);
    }
}

/// Framed decoder: reads the length prefix, takes an owned copy of the
/// payload and decodes from it.
pub struct WrappedArithmeticDecoder {
    data: BitStream,
    head: usize,
    decoder: ArithmeticDecoder,
}

impl WrappedArithmeticDecoder {
    pub fn new(reader: &mut BitStreamReader<'_>) -> Result<Self> {
        let n_bits = reader.read32u()? as usize;
        let data = reader.read_substream(n_bits)?;

        let mut payload_reader = BitStreamReader::new(&data);
        let decoder = ArithmeticDecoder::new(&mut payload_reader, n_bits);
        let head = payload_reader.head;

        Ok(WrappedArithmeticDecoder {
            data,
            head,
            decoder,
        })
    }

    pub fn read(&mut self, freqs: &FrequencyTable) -> Result<u32> {
        let limit = self.data.size();
        let mut payload_reader = BitStreamReader::with_head(&self.data, self.head);
        let symbol = self.decoder.read(freqs, &mut payload_reader, limit)?;
        self.head = payload_reader.head;
        Ok(symbol)
    }
}

/// Arithmetic-codes a sequence of integers from the closed alphabet
/// `[vmin, vmax]`. The empirical frequencies are quantized to
/// `freq_bits`-wide entries (non-zero counts clamped away from zero) and
/// written ahead of the framed payload together with the element count.
pub fn encode_sequence(
    data: &[i32],
    vmin: i32,
    vmax: i32,
    freq_bits: usize,
    bs: &mut BitStream,
) -> Result<()> {
    assert!(vmin < vmax);

    let n_tokens = (vmax - vmin + 1) as usize;
    let mut token_freqs = vec![0u32; n_tokens];
    for &v in data {
        if v < vmin || v > vmax {
            return err_exit_code(ExitCode::AssertionFailure, "value outside of alphabet");
        }
        token_freqs[(v - vmin) as usize] += 1;
    }

    let max_freq = token_freqs.iter().copied().max().unwrap_or(0);
    let max_encode_freq = (1u64 << freq_bits) - 1;

    for f in token_freqs.iter_mut() {
        if *f > 0 {
            *f = ((f64::from(*f) / f64::from(max_freq) * max_encode_freq as f64) as u64)
                .clamp(1, max_encode_freq) as u32;
        }
        bs.append(u64::from(*f), freq_bits);
    }

    bs.append(data.len() as u64, 32);

    let mut encoder = WrappedArithmeticEncoder::new();
    let ftable = FrequencyTable::new(token_freqs);
    for &v in data {
        encoder.write(&ftable, (v - vmin) as usize)?;
    }
    encoder.finish(bs);

    Ok(())
}

pub fn decode_sequence(
    reader: &mut BitStreamReader<'_>,
    vmin: i32,
    vmax: i32,
    freq_bits: usize,
) -> Result<Vec<i32>> {
    assert!(vmin < vmax);

    let n_tokens = (vmax - vmin + 1) as usize;
    let mut token_freqs = Vec::with_capacity(n_tokens);
    for _ in 0..n_tokens {
        token_freqs.push(reader.read(freq_bits)? as u32);
    }

    let n_values = reader.read32u()? as usize;
    let ftable = FrequencyTable::new(token_freqs);
    let mut decoder = WrappedArithmeticDecoder::new(reader)?;

    let mut result = Vec::with_capacity(n_values);
    for _ in 0..n_values {
        result.push(decoder.read(&ftable)? as i32 + vmin);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framed_round_trip() {
        let freqs = FrequencyTable::new(vec![5, 1, 1, 8, 2]);
        let symbols = [0usize, 3, 3, 0, 4, 1, 2, 3, 0, 0, 3, 3, 3, 4];

        let mut encoder = WrappedArithmeticEncoder::new();
        for &s in &symbols {
            encoder.write(&freqs, s).unwrap();
        }
        let mut bs = BitStream::new();
        encoder.finish(&mut bs);

        let mut reader = BitStreamReader::new(&bs);
        let mut decoder = WrappedArithmeticDecoder::new(&mut reader).unwrap();
        for &s in &symbols {
            assert_eq!(decoder.read(&freqs).unwrap(), s as u32);
        }
    }

    #[test]
    fn skewed_distribution_round_trip() {
        let freqs = FrequencyTable::new(vec![1000, 1]);
        let mut symbols = vec![0usize; 500];
        symbols.push(1);
        symbols.extend(std::iter::repeat(0).take(500));

        let mut encoder = WrappedArithmeticEncoder::new();
        for &s in &symbols {
            encoder.write(&freqs, s).unwrap();
        }
        let mut bs = BitStream::new();
        encoder.finish(&mut bs);

        // the skew should push the rate well below one bit per symbol
        assert!(bs.size() < 32 + symbols.len() / 2);

        let mut reader = BitStreamReader::new(&bs);
        let mut decoder = WrappedArithmeticDecoder::new(&mut reader).unwrap();
        for &s in &symbols {
            assert_eq!(decoder.read(&freqs).unwrap(), s as u32);
        }
    }

    #[test]
    fn zero_frequency_symbol_is_an_error() {
        let freqs = FrequencyTable::new(vec![1, 0, 1]);
        let mut encoder = WrappedArithmeticEncoder::new();
        assert!(encoder.write(&freqs, 1).is_err());
    }

    #[test]
    fn sequence_round_trip() {
        let data: Vec<i32> = (-255..=255).chain([0, 0, 17, -90, 255, -255]).collect();

        let mut bs = BitStream::new();
        encode_sequence(&data, -255, 255, 16, &mut bs).unwrap();

        let mut reader = BitStreamReader::new(&bs);
        let decoded = decode_sequence(&mut reader, -255, 255, 16).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn foreign_segment_can_be_skipped() {
        let freqs = FrequencyTable::new(vec![1, 1]);
        let mut encoder = WrappedArithmeticEncoder::new();
        for s in [0usize, 1, 1, 0] {
            encoder.write(&freqs, s).unwrap();
        }

        let mut bs = BitStream::new();
        encoder.finish(&mut bs);
        bs.append(0xab, 8); // trailing data after the framed segment

        let mut reader = BitStreamReader::new(&bs);
        let n_bits = reader.read32u().unwrap() as usize;
        reader.read_substream(n_bits).unwrap();
        assert_eq!(reader.read8u().unwrap(), 0xab);
    }
}
