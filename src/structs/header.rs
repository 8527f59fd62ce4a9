/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use anyhow::Result;
use log::warn;

use crate::consts::HEADER_PREAMBLE;
use crate::structs::bit_stream::{BitStream, BitStreamReader};

/// Fixed 40 bit header ahead of every encoded image: one preamble byte and
/// the mask dimensions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub rows: u16,
    pub cols: u16,
}

impl Header {
    pub fn new(rows: u16, cols: u16) -> Self {
        Header { rows, cols }
    }

    pub fn encode(&self, stream: &mut BitStream) {
        stream.append(u64::from(HEADER_PREAMBLE), 8);
        stream.append(u64::from(self.rows), 16);
        stream.append(u64::from(self.cols), 16);
    }

    pub fn read(reader: &mut BitStreamReader<'_>) -> Result<Header> {
        let preamble = reader.read8u()?;
        if preamble != HEADER_PREAMBLE {
            // tolerated for compatibility with older streams, the payload
            // checks catch real corruption
            warn!(
                "preamble {0:#04x} did not match expected value {1:#04x}",
                preamble, HEADER_PREAMBLE
            );
        }

        let rows = reader.read16u()?;
        let cols = reader.read16u()?;

        Ok(Header { rows, cols })
    }
}

#[test]
fn header_round_trip() {
    let mut bs = BitStream::new();
    Header::new(480, 640).encode(&mut bs);
    assert_eq!(bs.size(), 40);

    let mut reader = BitStreamReader::new(&bs);
    let header = Header::read(&mut reader).unwrap();
    assert_eq!(header, Header::new(480, 640));
}

#[test]
fn mismatched_preamble_is_tolerated() {
    let mut bs = BitStream::new();
    bs.append(0x00, 8);
    bs.append(2, 16);
    bs.append(3, 16);

    let mut reader = BitStreamReader::new(&bs);
    let header = Header::read(&mut reader).unwrap();
    assert_eq!(header, Header::new(2, 3));
}
