/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::hash::Hash;

use anyhow::Result;

use crate::helpers::err_exit_code;
use crate::multicut_error::ExitCode;
use crate::structs::bit_stream::{BitStream, BitStreamReader};

/// A token that can be Huffman coded. Besides identity, it must know how to
/// serialize itself raw, which is the fallback taken after the escape code
/// for tokens outside the coded alphabet.
pub trait HuffmanToken: Copy + Eq + Hash {
    fn encode(&self, bs: &mut BitStream);
    fn encode_size(&self) -> usize;
    fn decode(reader: &mut BitStreamReader<'_>) -> Result<Self>;
}

#[derive(Clone, Copy, Debug)]
struct CodeWord {
    code: u64,
    code_bits: usize,
}

impl CodeWord {
    fn write(&self, bs: &mut BitStream) {
        bs.append(self.code, self.code_bits);
    }
}

enum Node<T> {
    /// a leaf without a token is the escape leaf
    Leaf(Option<T>),
    Internal { left: usize, right: usize },
}

/// Huffman codec built from explicit token frequencies. Construction is
/// deterministic (ties broken by insertion order), so an encoder and a
/// decoder fed the same frequency list derive the same tree.
pub struct HuffmanCodec<T: HuffmanToken> {
    codes: HashMap<T, CodeWord>,
    escape: Option<CodeWord>,
    nodes: Vec<Node<T>>,
    root: usize,
}

impl<T: HuffmanToken> HuffmanCodec<T> {
    /// `escape_freq` of zero means no escape leaf; every encoded token must
    /// then be present in `token_freqs`.
    pub fn new(token_freqs: &[(T, u32)], escape_freq: u32) -> Self {
        let mut nodes = Vec::new();
        let mut heap = BinaryHeap::new();

        for &(token, freq) in token_freqs {
            let index = nodes.len();
            nodes.push(Node::Leaf(Some(token)));
            heap.push(Reverse((u64::from(freq), index)));
        }

        if escape_freq > 0 {
            let index = nodes.len();
            nodes.push(Node::Leaf(None));
            heap.push(Reverse((u64::from(escape_freq), index)));
        }

        assert!(!heap.is_empty(), "cannot build a codec without tokens");

        while heap.len() > 1 {
            let Reverse((freq_a, a)) = heap.pop().unwrap();
            let Reverse((freq_b, b)) = heap.pop().unwrap();
            let index = nodes.len();
            nodes.push(Node::Internal { left: a, right: b });
            heap.push(Reverse((freq_a + freq_b, index)));
        }

        let Reverse((_, root)) = heap.pop().unwrap();

        let mut codes = HashMap::new();
        let mut escape = None;

        let mut stack = vec![(root, 0u64, 0usize)];
        while let Some((index, code, depth)) = stack.pop() {
            match &nodes[index] {
                Node::Internal { left, right } => {
                    stack.push((*left, code << 1, depth + 1));
                    stack.push((*right, (code << 1) | 1, depth + 1));
                }
                Node::Leaf(Some(token)) => {
                    codes.insert(
                        *token,
                        CodeWord {
                            code,
                            code_bits: depth,
                        },
                    );
                }
                Node::Leaf(None) => {
                    escape = Some(CodeWord {
                        code,
                        code_bits: depth,
                    });
                }
            }
        }

        HuffmanCodec {
            codes,
            escape,
            nodes,
            root,
        }
    }

    pub fn encode_tokens(&self, tokens: &[T], bs: &mut BitStream) -> Result<()> {
        for token in tokens {
            match self.codes.get(token) {
                Some(code) => code.write(bs),
                None => {
                    let Some(escape) = self.escape else {
                        return err_exit_code(
                            ExitCode::AssertionFailure,
                            "token outside of alphabet and no escape leaf configured",
                        );
                    };
                    escape.write(bs);
                    token.encode(bs);
                }
            }
        }
        Ok(())
    }

    /// number of bits `encode_tokens` would emit
    pub fn encoding_size(&self, tokens: &[T]) -> usize {
        let mut result = 0;
        for token in tokens {
            match self.codes.get(token) {
                Some(code) => result += code.code_bits,
                None => {
                    result += self.escape.expect("escape leaf must exist").code_bits;
                    result += token.encode_size();
                }
            }
        }
        result
    }

    pub fn read_next(&self, reader: &mut BitStreamReader<'_>) -> Result<T> {
        let mut current = self.root;
        loop {
            match &self.nodes[current] {
                Node::Internal { left, right } => {
                    current = if reader.read_bit()? { *right } else { *left };
                }
                Node::Leaf(Some(token)) => return Ok(*token),
                Node::Leaf(None) => return T::decode(reader),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
    struct ByteToken(u8);

    impl HuffmanToken for ByteToken {
        fn encode(&self, bs: &mut BitStream) {
            bs.append(u64::from(self.0), 8);
        }

        fn encode_size(&self) -> usize {
            8
        }

        fn decode(reader: &mut BitStreamReader<'_>) -> Result<Self> {
            Ok(ByteToken(reader.read8u()?))
        }
    }

    #[test]
    fn round_trip_without_escape() {
        let freqs = [
            (ByteToken(1), 10),
            (ByteToken(2), 5),
            (ByteToken(3), 1),
            (ByteToken(4), 1),
        ];
        let codec = HuffmanCodec::new(&freqs, 0);

        let tokens = [
            ByteToken(1),
            ByteToken(1),
            ByteToken(3),
            ByteToken(2),
            ByteToken(4),
            ByteToken(1),
        ];

        let mut bs = BitStream::new();
        codec.encode_tokens(&tokens, &mut bs).unwrap();
        assert_eq!(bs.size(), codec.encoding_size(&tokens));

        let decoder = HuffmanCodec::new(&freqs, 0);
        let mut reader = BitStreamReader::new(&bs);
        for &t in &tokens {
            assert_eq!(decoder.read_next(&mut reader).unwrap(), t);
        }
    }

    #[test]
    fn escape_leaf_covers_unknown_tokens() {
        let freqs = [(ByteToken(0), 8), (ByteToken(1), 4)];
        let codec = HuffmanCodec::new(&freqs, 1);

        let tokens = [ByteToken(0), ByteToken(200), ByteToken(1), ByteToken(77)];

        let mut bs = BitStream::new();
        codec.encode_tokens(&tokens, &mut bs).unwrap();

        let decoder = HuffmanCodec::new(&freqs, 1);
        let mut reader = BitStreamReader::new(&bs);
        for &t in &tokens {
            assert_eq!(decoder.read_next(&mut reader).unwrap(), t);
        }
    }

    #[test]
    fn unknown_token_without_escape_fails() {
        let freqs = [(ByteToken(0), 1), (ByteToken(1), 1)];
        let codec = HuffmanCodec::new(&freqs, 0);

        let mut bs = BitStream::new();
        assert!(codec.encode_tokens(&[ByteToken(9)], &mut bs).is_err());
    }

    #[test]
    fn more_frequent_tokens_get_shorter_codes() {
        let freqs = [(ByteToken(0), 100), (ByteToken(1), 1), (ByteToken(2), 1)];
        let codec = HuffmanCodec::new(&freqs, 0);

        let frequent = codec.encoding_size(&[ByteToken(0)]);
        let rare = codec.encoding_size(&[ByteToken(1)]);
        assert!(frequent < rare);
    }
}
