/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::debug;

use crate::helpers::{err_exit_code, here};
use crate::multicut_error::ExitCode;
use crate::structs::bit_stream::{BitStream, BitStreamReader};
use crate::structs::border_codec::BorderCodec;
use crate::structs::multicut_aware_codec::MulticutAwareCodec;
use crate::structs::raster_image::Mask;

/// Mask statistics fed to the codec selector.
#[derive(Clone, Copy, Debug)]
pub struct PartitionFeatures {
    pub pixels: f64,
    pub num_partitions: f64,
    pub avg_partition_size: f64,
}

pub fn make_features(mask: &Mask) -> PartitionFeatures {
    let mut counter: HashMap<i32, u64> = HashMap::new();
    for r in 0..mask.rows() {
        for c in 0..mask.cols() {
            *counter.entry(mask.at(r, c)).or_insert(0) += 1;
        }
    }

    let pixels = (mask.rows() * mask.cols()) as f64;
    let num_partitions = counter.len() as f64;

    PartitionFeatures {
        pixels,
        num_partitions,
        avg_partition_size: pixels / num_partitions,
    }
}

/// Pre-trained model choosing a boundary codec from a feature vector
/// `[avg_partition_size, pixel_count, optimization_level]`. Class 0 selects
/// the border codec, class 1 the multicut-aware codec; anything else is a
/// model bug.
pub trait MulticutClassifier: Send + Sync {
    fn classify(&self, features: &[f64]) -> usize;
}

/// Stand-in model shipped with the crate: coarse segmentations with large
/// average partitions have short boundaries and favor the border walk,
/// fragmented ones favor the adaptive multicut-aware codec.
#[derive(Clone, Copy, Debug)]
pub struct ThresholdClassifier {
    pub avg_partition_size_threshold: f64,
}

impl Default for ThresholdClassifier {
    fn default() -> Self {
        ThresholdClassifier {
            avg_partition_size_threshold: 64.0,
        }
    }
}

impl MulticutClassifier for ThresholdClassifier {
    fn classify(&self, features: &[f64]) -> usize {
        (features[0] < self.avg_partition_size_threshold) as usize
    }
}

/// Chooses between the two strongest boundary codecs per call, recording
/// the choice as a single bit ahead of the delegated payload.
#[derive(Clone)]
pub struct EnsembleCodec {
    optimization_level: f32,
    border: BorderCodec,
    aware: MulticutAwareCodec,
    model: Arc<dyn MulticutClassifier>,
}

impl std::fmt::Debug for EnsembleCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnsembleCodec")
            .field("optimization_level", &self.optimization_level)
            .field("border", &self.border)
            .field("aware", &self.aware)
            .finish()
    }
}

impl EnsembleCodec {
    pub fn new(optimization_level: f32) -> Self {
        EnsembleCodec::with_model(optimization_level, Arc::new(ThresholdClassifier::default()))
    }

    pub fn with_model(optimization_level: f32, model: Arc<dyn MulticutClassifier>) -> Self {
        EnsembleCodec {
            optimization_level,
            border: BorderCodec::default(),
            aware: MulticutAwareCodec::row_adaptive_col_adaptive(),
            model,
        }
    }

    pub fn write_encoding(&self, bs: &mut BitStream, mask: &Mask) -> Result<()> {
        let features = make_features(mask);
        let data = [
            features.avg_partition_size,
            features.pixels,
            f64::from(self.optimization_level),
        ];

        let prediction = self.model.classify(&data);
        if prediction > 1 {
            return err_exit_code(
                ExitCode::BadClassifierLabel,
                "classifier produced an out of range class",
            );
        }

        debug!(
            "ensemble picked class {} for avg partition size {:.1}",
            prediction, features.avg_partition_size
        );

        bs.append(prediction as u64, 1);

        if prediction == 0 {
            self.border.write_encoding(bs, mask).context(here!())
        } else {
            self.aware.write_encoding(bs, mask).context(here!())
        }
    }

    pub fn read_mask(
        &self,
        reader: &mut BitStreamReader<'_>,
        rows: usize,
        cols: usize,
    ) -> Result<Mask> {
        let prediction = reader.read_bit()?;
        if !prediction {
            self.border.read_mask(reader, rows, cols).context(here!())
        } else {
            self.aware.read_mask(reader, rows, cols).context(here!())
        }
    }
}
