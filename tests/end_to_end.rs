/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use rstest::rstest;

use multicut_image::structs::bit_stream::{BitStream, BitStreamReader};
use multicut_image::structs::border_codec::BorderCodec;
use multicut_image::structs::context_encoder::ContextCodecFactory;
use multicut_image::structs::ensemble::EnsembleCodec;
use multicut_image::structs::multicut_aware_codec::MulticutAwareCodec;
use multicut_image::structs::multicut_codec::{
    DefaultMulticutCodec, DynamicHuffmanCodec, MulticutCodec,
};
use multicut_image::structs::raster_image::{Mask, RasterImage};
use multicut_image::{
    Codec, CodecConfig, MulticutCodecKind, OptimizerKind, PartitionCodecKind,
};

fn quadrant_image(rows: usize, cols: usize) -> RasterImage {
    let mut img = RasterImage::new(rows, cols);
    for r in 0..rows {
        for c in 0..cols {
            let color = match (r * 2 / rows, c * 2 / cols) {
                (0, 0) => [12, 34, 56],
                (0, _) => [200, 10, 10],
                (_, 0) => [10, 200, 10],
                _ => [250, 250, 250],
            };
            img.set_pixel(r, c, color);
        }
    }
    img
}

fn noisy_image(rows: usize, cols: usize) -> RasterImage {
    let mut img = RasterImage::new(rows, cols);
    let mut state = 0xfeed_5eedu32;
    for r in 0..rows {
        for c in 0..cols {
            state = state.wrapping_mul(1664525).wrapping_add(1013904223);
            let base = if c < cols / 2 { 40 } else { 180 };
            let jitter = (state >> 28) as u8;
            img.set_pixel(r, c, [base + jitter, base, base.saturating_sub(jitter)]);
        }
    }
    img
}

fn config(
    multicut_codec: MulticutCodecKind,
    partition_codec: PartitionCodecKind,
    optimizer: OptimizerKind,
    strength: f32,
    entropy_compress: bool,
) -> CodecConfig {
    CodecConfig {
        multicut_codec,
        partition_codec,
        optimizer,
        compression_strength: strength,
        cell_size: 8,
        entropy_compress,
    }
}

#[rstest]
#[case::default_codec(MulticutCodecKind::Default)]
#[case::huffman(MulticutCodecKind::Huffman)]
#[case::border(MulticutCodecKind::Border)]
#[case::aware(MulticutCodecKind::MulticutAware)]
#[case::ensemble(MulticutCodecKind::Ensemble)]
fn lossless_pipeline_reproduces_the_input(#[case] kind: MulticutCodecKind) {
    let cfg = config(
        kind,
        PartitionCodecKind::Mean,
        OptimizerKind::Lossless,
        0.0,
        false,
    );
    let codec = Codec::new(&cfg);
    let img = quadrant_image(12, 10);

    let stream = codec.encode(&img).unwrap();
    let decoded = codec.decode(&stream).unwrap();
    assert_eq!(decoded, img);
}

#[rstest]
#[case::mean(PartitionCodecKind::Mean)]
#[case::differential(PartitionCodecKind::Differential)]
fn deflate_wrap_round_trips(#[case] partition: PartitionCodecKind) {
    let cfg = config(
        MulticutCodecKind::Huffman,
        partition,
        OptimizerKind::Lossless,
        0.0,
        true,
    );
    let codec = Codec::new(&cfg);
    let img = quadrant_image(16, 16);

    let stream = codec.encode(&img).unwrap();
    let decoded = codec.decode(&stream).unwrap();
    assert_eq!(decoded, img);
}

#[rstest]
#[case::greedy(OptimizerKind::Greedy)]
#[case::grid(OptimizerKind::GreedyGrid)]
fn lossy_pipelines_preserve_flat_structure(#[case] optimizer: OptimizerKind) {
    let cfg = config(
        MulticutCodecKind::Ensemble,
        PartitionCodecKind::Mean,
        optimizer,
        1.0,
        true,
    );
    let codec = Codec::new(&cfg);
    let img = quadrant_image(20, 20);

    let stream = codec.encode(&img).unwrap();
    let decoded = codec.decode(&stream).unwrap();

    // flat quadrants of very different colors never merge at this strength
    assert_eq!(decoded, img);
}

#[test]
fn stronger_compression_uses_fewer_bits() {
    let img = noisy_image(32, 32);

    let weak = Codec::new(&config(
        MulticutCodecKind::Huffman,
        PartitionCodecKind::Mean,
        OptimizerKind::Greedy,
        0.5,
        true,
    ));
    let strong = Codec::new(&config(
        MulticutCodecKind::Huffman,
        PartitionCodecKind::Mean,
        OptimizerKind::Greedy,
        200.0,
        true,
    ));

    let weak_stream = weak.encode(&img).unwrap();
    let strong_stream = strong.encode(&img).unwrap();

    assert!(strong_stream.size() < weak_stream.size());

    // both remain decodable to the right shape
    assert_eq!(weak.decode(&weak_stream).unwrap().rows(), 32);
    assert_eq!(strong.decode(&strong_stream).unwrap().cols(), 32);
}

#[test]
fn container_survives_file_persistence() {
    let cfg = config(
        MulticutCodecKind::Border,
        PartitionCodecKind::Mean,
        OptimizerKind::Greedy,
        2.0,
        true,
    );
    let codec = Codec::new(&cfg);
    let img = noisy_image(24, 24);

    let stream = codec.encode(&img).unwrap();

    let mut buffer = Vec::new();
    stream.write_to(&mut buffer).unwrap();
    let restored = BitStream::read_from(&mut std::io::Cursor::new(buffer)).unwrap();
    assert_eq!(restored, stream);

    let from_disk = codec.decode(&restored).unwrap();
    let direct = codec.decode(&stream).unwrap();
    assert_eq!(from_disk, direct);
}

fn boundary_codecs() -> Vec<MulticutCodec> {
    vec![
        MulticutCodec::Default(DefaultMulticutCodec),
        MulticutCodec::DynamicHuffman(DynamicHuffmanCodec),
        MulticutCodec::Border(BorderCodec::default()),
        MulticutCodec::Border(BorderCodec::new(true)),
        MulticutCodec::MulticutAware(MulticutAwareCodec::default()),
        MulticutCodec::MulticutAware(MulticutAwareCodec::new(
            ContextCodecFactory::block(4, 12),
            ContextCodecFactory::block(4, 12),
        )),
        MulticutCodec::MulticutAware(MulticutAwareCodec::new(
            ContextCodecFactory::block(8, 16),
            ContextCodecFactory::naive(),
        )),
        MulticutCodec::MulticutAware(MulticutAwareCodec::row_adaptive_col_adaptive()),
        MulticutCodec::MulticutAware(MulticutAwareCodec::new(
            ContextCodecFactory::adaptive_bitwise(2048, 2),
            ContextCodecFactory::adaptive_bitwise(512, 2),
        )),
        MulticutCodec::Ensemble(EnsembleCodec::new(1.0)),
    ]
}

#[test]
fn every_boundary_codec_canonicalizes_every_mask() {
    // regions must stay 4-connected: the codecs transmit the edge set, so
    // a label reused across disconnected components would split on decode
    let mut nested_box = Mask::filled(6, 6, 0);
    for r in 2..4 {
        for c in 2..5 {
            nested_box.set(r, c, 1);
        }
    }

    let masks = vec![
        Mask::from_labels(2, 2, vec![3, 3, 8, 8]),
        Mask::from_labels(
            6,
            6,
            (0..36)
                .map(|i| {
                    let (r, c) = (i / 6, i % 6);
                    if (r + c) >= 6 {
                        1
                    } else {
                        (c / 2) as i32 + 2
                    }
                })
                .collect::<Vec<_>>(),
        ),
        nested_box,
        Mask::one_region_per_pixel(7, 3),
        Mask::filled(5, 8, 11),
    ];

    for codec in boundary_codecs() {
        for mask in &masks {
            let mut bs = BitStream::new();
            codec.write_encoding(&mut bs, mask).unwrap();

            let mut reader = BitStreamReader::new(&bs);
            let decoded = codec
                .read_mask(&mut reader, mask.rows(), mask.cols())
                .unwrap();

            assert!(
                decoded.same_partitioning(mask),
                "{} changed the partitioning",
                codec
            );
            assert_eq!(decoded, decoded.relabel(), "{} output is not canonical", codec);
        }
    }
}

#[test]
fn multicut_payloads_of_different_codecs_are_interchangeable() {
    // encode with each codec into its own stream, decode with the same
    // codec, and require the identical canonical mask everywhere
    let mask = Mask::from_labels(
        8,
        8,
        (0..64)
            .map(|i| ((i / 8 + i % 8) >= 8) as i32)
            .collect::<Vec<_>>(),
    );

    let mut canonical: Option<Mask> = None;
    for codec in boundary_codecs() {
        let mut bs = BitStream::new();
        codec.write_encoding(&mut bs, &mask).unwrap();

        let mut reader = BitStreamReader::new(&bs);
        let decoded = codec.read_mask(&mut reader, 8, 8).unwrap();

        match &canonical {
            None => canonical = Some(decoded),
            Some(expected) => assert_eq!(&decoded, expected, "{} disagreed", codec),
        }
    }
}
