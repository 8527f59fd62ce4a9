/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use std::io::{Read, Write};

use anyhow::{Context, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::helpers::{err_exit_code, here};
use crate::multicut_error::ExitCode;

const WORD_BITS: usize = u64::BITS as usize;

/// Append-only sequence of bits with bit-addressed random reads, used by
/// every codec in the crate to assemble odd-width fields. Bits are stored
/// MSB-first within each 64-bit word so a bit position addresses the same
/// bit on the writer and the reader side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitStream {
    data: Vec<u64>,
    head: usize,
}

impl Default for BitStream {
    fn default() -> Self {
        BitStream::new()
    }
}

impl BitStream {
    pub fn new() -> Self {
        BitStream {
            data: vec![0],
            head: 0,
        }
    }

    /// number of bits appended so far
    pub fn size(&self) -> usize {
        (self.data.len() - 1) * WORD_BITS + self.head
    }

    /// appends the `bits` least significant bits of `value`.
    /// bits above `bits` must be zero.
    pub fn append(&mut self, value: u64, bits: usize) {
        assert!(bits <= WORD_BITS);
        assert!(
            bits == WORD_BITS || (value >> bits) == 0,
            "value has bits set above the requested width"
        );

        if bits == 0 {
            return;
        }

        let remaining = WORD_BITS - self.head;
        let last = self.data.len() - 1;

        if bits < remaining {
            self.data[last] |= value << (remaining - bits);
            self.head += bits;
        } else {
            let overshoot = bits - remaining;
            self.data[last] |= value >> overshoot;
            if overshoot == 0 {
                self.data.push(0);
            } else {
                self.data.push(value << (WORD_BITS - overshoot));
            }
            self.head = overshoot;
        }
    }

    pub fn append_bit(&mut self, bit: bool) {
        self.append(bit as u64, 1);
    }

    pub fn append_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.append(u64::from(b), 8);
        }
    }

    /// splices all bits of `other` onto the end of this stream
    pub fn append_stream(&mut self, other: &BitStream) {
        let mut head = 0;
        let mut remaining = other.size();

        while remaining > WORD_BITS {
            self.append(other.read_at(head, WORD_BITS), WORD_BITS);
            head += WORD_BITS;
            remaining -= WORD_BITS;
        }

        if remaining > 0 {
            self.append(other.read_at(head, remaining), remaining);
        }
    }

    pub fn pad_to_bytes(&mut self) {
        if self.size() % 8 != 0 {
            self.append(0, 8 - (self.size() % 8));
        }
    }

    /// reads `bits` starting at absolute bit position `index`.
    /// the caller is responsible for staying inside `size()`.
    pub fn read_at(&self, index: usize, bits: usize) -> u64 {
        debug_assert!(bits <= WORD_BITS);
        debug_assert!(index + bits <= self.size());

        if bits == 0 {
            return 0;
        }

        let block = index / WORD_BITS;
        let offset = index % WORD_BITS;

        if offset + bits > WORD_BITS {
            let first = WORD_BITS - offset;
            let overshoot = bits - first;
            let high = (self.data[block] << offset) >> (WORD_BITS - first);
            (high << overshoot) | (self.data[block + 1] >> (WORD_BITS - overshoot))
        } else {
            (self.data[block] << offset) >> (WORD_BITS - bits)
        }
    }

    /// byte view of the stream, valid only after padding to a byte boundary
    pub fn as_bytes(&self) -> Vec<u8> {
        assert!(self.size() % 8 == 0, "stream is not byte aligned");

        let mut result = Vec::with_capacity(self.size() / 8);
        let mut head = 0;
        while head < self.size() {
            result.push(self.read_at(head, 8) as u8);
            head += 8;
        }
        result
    }

    /// persisted form: u32 word count, u32 tail bits, then the words in
    /// little endian order
    pub fn write_to(&self, writer: &mut impl Write) -> Result<()> {
        writer.write_u32::<LittleEndian>(self.data.len() as u32)?;
        writer.write_u32::<LittleEndian>(self.head as u32)?;
        for &word in &self.data {
            writer.write_u64::<LittleEndian>(word)?;
        }
        Ok(())
    }

    pub fn read_from(reader: &mut impl Read) -> Result<BitStream> {
        let n_words = reader.read_u32::<LittleEndian>().context(here!())?;
        let head = reader.read_u32::<LittleEndian>().context(here!())? as usize;

        if n_words == 0 || head >= WORD_BITS {
            return err_exit_code(ExitCode::CorruptHeader, "invalid bit stream framing");
        }

        let mut data = Vec::with_capacity(n_words as usize);
        for _ in 0..n_words {
            data.push(reader.read_u64::<LittleEndian>().context(here!())?);
        }

        Ok(BitStream { data, head })
    }
}

/// Keeps track of the read head so the stream can be consumed sequentially.
pub struct BitStreamReader<'a> {
    stream: &'a BitStream,
    pub head: usize,
}

impl<'a> BitStreamReader<'a> {
    pub fn new(stream: &'a BitStream) -> Self {
        BitStreamReader { stream, head: 0 }
    }

    pub fn with_head(stream: &'a BitStream, head: usize) -> Self {
        BitStreamReader { stream, head }
    }

    pub fn stream(&self) -> &'a BitStream {
        self.stream
    }

    pub fn empty(&self) -> bool {
        self.head >= self.stream.size()
    }

    pub fn read(&mut self, bits: usize) -> Result<u64> {
        if self.head + bits > self.stream.size() {
            return err_exit_code(
                ExitCode::ShortRead,
                "attempted to read past the end of the stream",
            );
        }

        let value = self.stream.read_at(self.head, bits);
        self.head += bits;
        return Ok(value);
    }

    pub fn read_bit(&mut self) -> Result<bool> {
        Ok(self.read(1)? != 0)
    }

    pub fn read_bits(&mut self, bits: usize) -> Result<Vec<bool>> {
        let mut result = Vec::with_capacity(bits);
        for _ in 0..bits {
            result.push(self.read_bit()?);
        }
        Ok(result)
    }

    pub fn read8u(&mut self) -> Result<u8> {
        Ok(self.read(8)? as u8)
    }

    pub fn read16u(&mut self) -> Result<u16> {
        Ok(self.read(16)? as u16)
    }

    pub fn read32u(&mut self) -> Result<u32> {
        Ok(self.read(32)? as u32)
    }

    /// copies the next `n_bits` into an owned stream
    pub fn read_substream(&mut self, n_bits: usize) -> Result<BitStream> {
        let mut out = BitStream::new();
        while n_bits - out.size() >= WORD_BITS {
            out.append(self.read(WORD_BITS)?, WORD_BITS);
        }
        if n_bits - out.size() > 0 {
            let remaining = n_bits - out.size();
            out.append(self.read(remaining)?, remaining);
        }
        Ok(out)
    }
}

#[test]
fn append_read_round_trip() {
    let widths = [1, 3, 8, 13, 16, 24, 31, 32, 45, 63, 64, 7, 2];

    let mut bs = BitStream::new();
    let mut expected = Vec::new();

    for (i, &w) in widths.iter().enumerate() {
        let value = if w == 64 {
            0xdead_beef_0bad_f00d
        } else {
            ((i as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15)) & ((1u64 << w) - 1)
        };
        bs.append(value, w);
        expected.push((value, w));
    }

    let mut reader = BitStreamReader::new(&bs);
    for (value, w) in expected {
        assert_eq!(reader.read(w).unwrap(), value);
    }
    assert!(reader.empty());
}

#[test]
fn substream_splicing() {
    let mut inner = BitStream::new();
    inner.append(0b101, 3);
    inner.append(0x1234, 16);
    inner.append(0x0fff_ffff_ffff_ffff, 60);

    let mut outer = BitStream::new();
    outer.append(0x3f, 7); // misalign on purpose
    outer.append_stream(&inner);

    let mut reader = BitStreamReader::new(&outer);
    assert_eq!(reader.read(7).unwrap(), 0x3f);

    let copy = reader.read_substream(inner.size()).unwrap();
    assert_eq!(copy, inner);
}

#[test]
fn pad_to_bytes_aligns() {
    let mut bs = BitStream::new();
    bs.append(0b11, 2);
    bs.pad_to_bytes();
    assert_eq!(bs.size(), 8);
    bs.pad_to_bytes();
    assert_eq!(bs.size(), 8);
    assert_eq!(bs.as_bytes(), vec![0b1100_0000]);
}

#[test]
fn file_round_trip() {
    let mut bs = BitStream::new();
    bs.append(0xabcd, 16);
    bs.append(0x1, 1);
    bs.append(0x12345678, 32);

    let mut buffer = Vec::new();
    bs.write_to(&mut buffer).unwrap();

    let restored = BitStream::read_from(&mut std::io::Cursor::new(buffer)).unwrap();
    assert_eq!(restored, bs);
}

#[test]
fn short_read_is_an_error() {
    let mut bs = BitStream::new();
    bs.append(0x7, 3);

    let mut reader = BitStreamReader::new(&bs);
    assert!(reader.read(4).is_err());
}
