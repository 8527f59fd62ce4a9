/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use std::fmt::Display;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// Outcome of a real or hypothetical encoding action: the bits it consumes
/// and the reconstruction error it incurs. Supports signed arithmetic so
/// differences of outcomes (the gain of a move) use the same type.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EncodingResult {
    pub bits_used: i64,
    pub encoding_error: f32,
}

impl EncodingResult {
    pub fn new(bits_used: i64, encoding_error: f32) -> Self {
        EncodingResult {
            bits_used,
            encoding_error,
        }
    }

    /// scalar cost under the caller's rate/distortion weights
    pub fn cost(&self, weight_bits: f32, weight_err: f32) -> f32 {
        weight_bits * self.bits_used as f32 + weight_err * self.encoding_error
    }
}

impl AddAssign for EncodingResult {
    fn add_assign(&mut self, other: EncodingResult) {
        self.bits_used += other.bits_used;
        self.encoding_error += other.encoding_error;
    }
}

impl Add for EncodingResult {
    type Output = EncodingResult;

    fn add(mut self, other: EncodingResult) -> EncodingResult {
        self += other;
        self
    }
}

impl SubAssign for EncodingResult {
    fn sub_assign(&mut self, other: EncodingResult) {
        self.bits_used -= other.bits_used;
        self.encoding_error -= other.encoding_error;
    }
}

impl Sub for EncodingResult {
    type Output = EncodingResult;

    fn sub(mut self, other: EncodingResult) -> EncodingResult {
        self -= other;
        self
    }
}

impl Display for EncodingResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "EncodingResult(bits_used={0}, encoding_error={1})",
            self.bits_used, self.encoding_error
        )
    }
}

#[test]
fn arithmetic_and_cost() {
    let a = EncodingResult::new(24, 10.0);
    let b = EncodingResult::new(24, 2.5);

    let sum = a + b;
    assert_eq!(sum.bits_used, 48);
    assert_eq!(sum.encoding_error, 12.5);

    let gain = sum - EncodingResult::new(24, 20.0);
    assert_eq!(gain.bits_used, 24);
    assert_eq!(gain.encoding_error, -7.5);

    assert_eq!(gain.cost(1.0, 0.0), 24.0);
    assert_eq!(gain.cost(0.0, 1.0), -7.5);
    assert_eq!(gain.cost(2.0, 1.0), 40.5);
}
