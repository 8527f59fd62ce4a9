/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

//! Image compression built on multicut segmentation. An image is partitioned
//! into connected regions by a rate-distortion optimizer, each region is
//! summarized by its mean color, and the partition boundary plus the color
//! summaries are entropy coded into a compact stream.

mod codec;
mod consts;
mod helpers;
mod multicut_error;

pub mod structs;

pub use codec::{Codec, CodecConfig, MulticutCodecKind, OptimizerKind, PartitionCodecKind};
pub use multicut_error::{ExitCode, MulticutError};
