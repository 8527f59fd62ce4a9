/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

/// first byte of every encoded stream
pub const HEADER_PREAMBLE: u8 = 0xFF;

/// substitute count when one side of an adaptive binary context has never been seen
pub const DEFAULT_WEIGHT: u32 = 10;

/// frequency quantization of the 2x2 block codec table entries
pub const BLOCK_FREQ_PRECISION: usize = 10;

/// frequency quantization of the border codec symbol tables
pub const BORDER_FREQ_PRECISION: usize = 10;

/// frequency quantization of the differential mean color sequences
pub const DIFF_FREQ_PRECISION: usize = 16;

/// the perfect join pass visits partitions in a seeded random order so that
/// repeated runs produce identical masks
pub const PERFECT_JOIN_SEED: u64 = 33;

/// number of pushed moves after which the optimizer heap is rebuilt to
/// drop stale entries
pub const HEAP_REBUILD_INTERVAL: usize = 25_000;

pub const DEFAULT_CELL_SIZE: usize = 128;

/// mask and image dimensions must fit the 16 bit header fields
pub const MAX_DIMENSION: usize = u16::MAX as usize;
