/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};

use anyhow::{Context, Result};
use log::info;

use multicut_image::structs::bit_stream::BitStream;
use multicut_image::structs::raster_image::RasterImage;
use multicut_image::{
    Codec, CodecConfig, ExitCode, MulticutCodecKind, MulticutError, OptimizerKind,
    PartitionCodecKind,
};

fn print_usage() {
    eprintln!(
        "multicut_image_util [options] <input> <output>

Compresses a binary PPM (P6) image into a multicut container, or expands
a container back into a PPM.

options:
  -d, --decode              expand instead of compress
  -m, --multicut-codec S    default | huffman | border | aware | ensemble
                            (default: ensemble)
  -p, --partition-codec S   mean | differential (default: mean)
  -o, --optimizer S         lossless | greedy | grid (default: grid)
  -s, --strength F          compression strength, 0 is lossless-leaning
  -c, --cell-size N         grid optimizer cell size (default: 128)
      --no-deflate          skip the outer deflate wrap
  -v, --verbose             chatty logging
"
    );
}

fn parse_config(args: &mut pico_args::Arguments) -> Result<CodecConfig> {
    let mut config = CodecConfig::default();

    if let Some(name) = args.opt_value_from_str::<_, String>(["-m", "--multicut-codec"])? {
        config.multicut_codec = match name.as_str() {
            "default" => MulticutCodecKind::Default,
            "huffman" => MulticutCodecKind::Huffman,
            "border" => MulticutCodecKind::Border,
            "aware" => MulticutCodecKind::MulticutAware,
            "ensemble" => MulticutCodecKind::Ensemble,
            other => {
                return Err(MulticutError::new(
                    ExitCode::AssertionFailure,
                    &format!("unknown multicut codec {0}", other),
                )
                .into())
            }
        };
    }

    if let Some(name) = args.opt_value_from_str::<_, String>(["-p", "--partition-codec"])? {
        config.partition_codec = match name.as_str() {
            "mean" => PartitionCodecKind::Mean,
            "differential" => PartitionCodecKind::Differential,
            other => {
                return Err(MulticutError::new(
                    ExitCode::AssertionFailure,
                    &format!("unknown partition codec {0}", other),
                )
                .into())
            }
        };
    }

    if let Some(name) = args.opt_value_from_str::<_, String>(["-o", "--optimizer"])? {
        config.optimizer = match name.as_str() {
            "lossless" => OptimizerKind::Lossless,
            "greedy" => OptimizerKind::Greedy,
            "grid" => OptimizerKind::GreedyGrid,
            other => {
                return Err(MulticutError::new(
                    ExitCode::AssertionFailure,
                    &format!("unknown optimizer {0}", other),
                )
                .into())
            }
        };
    }

    if let Some(strength) = args.opt_value_from_str(["-s", "--strength"])? {
        config.compression_strength = strength;
    }

    if let Some(cell_size) = args.opt_value_from_str(["-c", "--cell-size"])? {
        config.cell_size = cell_size;
    }

    if args.contains("--no-deflate") {
        config.entropy_compress = false;
    }

    Ok(config)
}

/// minimal binary PPM (P6, maxval 255) reader
fn read_ppm(path: &str) -> Result<RasterImage> {
    let mut contents = Vec::new();
    File::open(path)
        .with_context(|| format!("opening {0}", path))?
        .read_to_end(&mut contents)?;

    let mut pos = 0;
    let mut fields: Vec<usize> = Vec::new();

    if contents.len() < 2 || &contents[0..2] != b"P6" {
        return Err(MulticutError::new(ExitCode::CorruptHeader, "not a P6 ppm file").into());
    }
    pos += 2;

    // width, height, maxval separated by whitespace, # starts a comment
    while fields.len() < 3 && pos < contents.len() {
        match contents[pos] {
            b'#' => {
                while pos < contents.len() && contents[pos] != b'\n' {
                    pos += 1;
                }
            }
            c if c.is_ascii_whitespace() => pos += 1,
            c if c.is_ascii_digit() => {
                let mut value = 0usize;
                while pos < contents.len() && contents[pos].is_ascii_digit() {
                    value = value * 10 + (contents[pos] - b'0') as usize;
                    pos += 1;
                }
                fields.push(value);
            }
            _ => {
                return Err(
                    MulticutError::new(ExitCode::CorruptHeader, "malformed ppm header").into(),
                )
            }
        }
    }

    let &[cols, rows, maxval] = &fields[..] else {
        return Err(MulticutError::new(ExitCode::CorruptHeader, "truncated ppm header").into());
    };
    if maxval != 255 {
        return Err(
            MulticutError::new(ExitCode::CorruptHeader, "only 8 bit ppm files supported").into(),
        );
    }

    // single whitespace byte separates the header from the pixel data
    pos += 1;
    let expected = rows * cols * 3;
    if contents.len() < pos + expected {
        return Err(MulticutError::new(ExitCode::ShortRead, "truncated ppm pixel data").into());
    }

    RasterImage::from_raw_bytes(rows, cols, &contents[pos..pos + expected])
}

fn write_ppm(path: &str, img: &RasterImage) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path).with_context(|| format!("creating {0}", path))?);
    write!(writer, "P6\n{0} {1}\n255\n", img.cols(), img.rows())?;
    writer.write_all(img.as_raw_bytes())?;
    Ok(())
}

fn run() -> Result<()> {
    let mut args = pico_args::Arguments::from_env();

    if args.contains(["-h", "--help"]) {
        print_usage();
        return Ok(());
    }

    if args.contains(["-v", "--verbose"]) {
        simple_logger::SimpleLogger::new().init().unwrap();
    }

    let decode = args.contains(["-d", "--decode"]);
    let config = parse_config(&mut args)?;

    let rest = args.finish();
    if rest.len() != 2 {
        print_usage();
        return Err(
            MulticutError::new(ExitCode::AssertionFailure, "expected input and output paths")
                .into(),
        );
    }

    let input = rest[0].to_string_lossy().to_string();
    let output = rest[1].to_string_lossy().to_string();

    let codec = Codec::new(&config);

    if decode {
        let mut reader = BufReader::new(File::open(&input).with_context(|| format!("opening {0}", input))?);
        let stream = BitStream::read_from(&mut reader)?;

        let img = codec.decode(&stream)?;
        write_ppm(&output, &img)?;

        info!("decoded {0} into {1}x{2} pixels", input, img.cols(), img.rows());
    } else {
        let img = read_ppm(&input)?;
        let stream = codec.encode(&img)?;

        let mut writer = BufWriter::new(File::create(&output).with_context(|| format!("creating {0}", output))?);
        stream.write_to(&mut writer)?;

        info!(
            "encoded {0}x{1} pixels into {2} bits",
            img.cols(),
            img.rows(),
            stream.size()
        );
    }

    Ok(())
}

fn main() {
    match run() {
        Ok(()) => {}
        Err(e) => {
            eprintln!("error: {0:?}", e);
            let code = e
                .downcast_ref::<MulticutError>()
                .map(|m| m.exit_code().as_integer_error_code())
                .unwrap_or(1);
            std::process::exit(code);
        }
    }
}
