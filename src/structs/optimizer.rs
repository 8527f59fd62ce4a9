/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use std::collections::{BinaryHeap, HashMap, VecDeque};

use log::debug;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::consts::{HEAP_REBUILD_INTERVAL, PERFECT_JOIN_SEED};
use crate::structs::encoding_result::EncodingResult;
use crate::structs::multicut::{Multicut, PartitionKey};
use crate::structs::partition_codec::PartitionCodec;
use crate::structs::raster_image::{Mask, RasterImage, Rect};

/// Segmentation strategies producing the mask that the codecs serialize.
#[derive(Clone, Debug)]
pub enum Optimizer {
    Lossless(LosslessOptimizer),
    Greedy(GreedyOptimizer),
    GreedyGrid(GreedyGridOptimizer),
}

impl Optimizer {
    pub fn optimize(&self, img: &RasterImage, mask: &Mask) -> Multicut {
        match self {
            Optimizer::Lossless(o) => o.optimize(img, mask),
            Optimizer::Greedy(o) => o.optimize(img, mask),
            Optimizer::GreedyGrid(o) => o.optimize(img, mask),
        }
    }
}

/// Groups equal-colored 4-connected pixels into one region each, so the
/// mean codec reproduces the image exactly.
#[derive(Clone, Copy, Debug, Default)]
pub struct LosslessOptimizer;

impl LosslessOptimizer {
    pub fn optimize(&self, img: &RasterImage, _mask: &Mask) -> Multicut {
        let rows = img.rows();
        let cols = img.cols();

        let mut out_mask = Mask::filled(rows, cols, 0);
        let mut visited = vec![false; rows * cols];
        let mut queue: VecDeque<(usize, usize)> = VecDeque::new();

        const DELTA: [(isize, isize); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];

        let mut k: i32 = 0;

        for r in 0..rows {
            for c in 0..cols {
                if visited[r * cols + c] {
                    continue;
                }

                visited[r * cols + c] = true;
                out_mask.set(r, c, k);
                queue.push_back((r, c));

                while let Some((cr, cc)) = queue.pop_front() {
                    for (dr, dc) in DELTA {
                        let nr = cr as isize + dr;
                        let nc = cc as isize + dc;
                        if nr < 0 || nc < 0 || nr >= rows as isize || nc >= cols as isize {
                            continue;
                        }
                        let (nr, nc) = (nr as usize, nc as usize);
                        if visited[nr * cols + nc] {
                            continue;
                        }
                        if img.pixel(cr, cc) != img.pixel(nr, nc) {
                            continue;
                        }

                        visited[nr * cols + nc] = true;
                        out_mask.set(nr, nc, k);
                        queue.push_back((nr, nc));
                    }
                }

                k += 1;
            }
        }

        Multicut::new(&out_mask)
    }
}

/// Candidate merge waiting in the priority queue, ordered by weighted gain.
/// The age snapshots detect entries invalidated by later joins without any
/// decrease-key machinery.
#[derive(Clone, Copy, Debug)]
struct JoinMove {
    gain: EncodingResult,
    gain_val: f32,
    k1: PartitionKey,
    k2: PartitionKey,
    t1: u32,
    t2: u32,
}

impl PartialEq for JoinMove {
    fn eq(&self, other: &Self) -> bool {
        self.gain_val.total_cmp(&other.gain_val) == std::cmp::Ordering::Equal
    }
}

impl Eq for JoinMove {}

impl PartialOrd for JoinMove {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for JoinMove {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.gain_val.total_cmp(&other.gain_val)
    }
}

/// Set with O(1) insert, delete, and uniformly random peek, used to visit
/// partitions in seeded random order during the perfect join pass.
struct RandomSet {
    elements: Vec<PartitionKey>,
    indices: HashMap<PartitionKey, usize>,
    rng: ChaCha8Rng,
}

impl RandomSet {
    fn with_keys(n_keys: usize) -> Self {
        let mut result = RandomSet {
            elements: Vec::with_capacity(n_keys),
            indices: HashMap::with_capacity(n_keys),
            rng: ChaCha8Rng::seed_from_u64(PERFECT_JOIN_SEED),
        };
        for key in 0..n_keys {
            result.add(key);
        }
        result
    }

    fn add(&mut self, key: PartitionKey) {
        self.indices.insert(key, self.elements.len());
        self.elements.push(key);
    }

    fn delete(&mut self, key: PartitionKey) {
        let index = self.indices[&key];
        let last = *self.elements.last().unwrap();

        self.elements[index] = last;
        self.indices.insert(last, index);

        self.elements.pop();
        self.indices.remove(&key);
    }

    fn get(&mut self) -> PartitionKey {
        self.elements[self.rng.gen_range(0..self.elements.len())]
    }

    fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// Applies all joins that weakly dominate their inputs in both bits and
/// error. For mean coding this groups identically colored neighbors, which
/// removes a large share of trivial work before the main loop runs.
fn apply_perfect_joins(
    partition_cost: &mut [EncodingResult],
    multicut: &mut Multicut,
    partition_codec: &mut PartitionCodec,
) {
    let mut remaining = RandomSet::with_keys(multicut.partitions.len());

    while !remaining.is_empty() {
        let pk = remaining.get();
        let mut changed = false;

        let neighbors: Vec<PartitionKey> = multicut.neighbors_of(pk).iter().copied().collect();
        for pk_nb in neighbors {
            let result = partition_codec.test_join_encoding(&multicut.partitions, pk, pk_nb);
            let gain = partition_cost[pk] + partition_cost[pk_nb] - result;

            if gain.bits_used >= 0 && gain.encoding_error >= 0.0 {
                partition_codec.notify_join(&multicut.partitions, pk, pk_nb);
                let pk_join = multicut.join(pk, pk_nb);
                partition_cost[pk_join] = partition_cost[pk] + partition_cost[pk_nb] - gain;

                if pk_join == pk {
                    remaining.delete(pk_nb);
                } else {
                    remaining.delete(pk);
                }

                changed = true;
                break;
            }
        }

        if !changed {
            remaining.delete(pk);
        }
    }
}

/// Greedy rate-distortion merging: keep taking the adjacent pair whose join
/// improves `weight_size * bits + weight_err * error` the most, until no
/// improving pair remains.
#[derive(Clone, Debug)]
pub struct GreedyOptimizer {
    weight_err: f32,
    weight_size: f32,
    init_perfect_joins: bool,
    partition_codec: PartitionCodec,
}

impl GreedyOptimizer {
    pub fn new(
        weight_err: f32,
        weight_size: f32,
        init_perfect_joins: bool,
        partition_codec: PartitionCodec,
    ) -> Self {
        GreedyOptimizer {
            weight_err,
            weight_size,
            init_perfect_joins,
            partition_codec,
        }
    }

    pub fn optimize(&self, img: &RasterImage, mask: &Mask) -> Multicut {
        let mut multicut = Multicut::new(mask);

        let mut partition_codec = self.partition_codec.clone();
        partition_codec.initialize(&multicut.partitions);

        let n_partitions = multicut.partitions.len();
        let mut partition_cost = vec![EncodingResult::default(); n_partitions];
        let mut total_result = EncodingResult::default();

        for pk in 0..n_partitions {
            partition_codec.notify_init(&multicut.partitions, img, pk);
            let result = partition_codec.test_encoding(pk);
            total_result += result;
            partition_cost[pk] = result;
        }

        if self.init_perfect_joins {
            apply_perfect_joins(&mut partition_cost, &mut multicut, &mut partition_codec);
        }

        // seed the queue with every improving adjacent pair, counted once
        let mut moves: BinaryHeap<JoinMove> = BinaryHeap::new();
        for pk in 0..n_partitions {
            for &pk_nb in multicut.neighbors_of(pk) {
                if pk < pk_nb {
                    let result =
                        partition_codec.test_join_encoding(&multicut.partitions, pk, pk_nb);
                    let gain = (partition_cost[pk] + partition_cost[pk_nb]) - result;
                    let gain_val = gain.cost(self.weight_size, self.weight_err);
                    if gain_val > 0.0 {
                        moves.push(JoinMove {
                            gain,
                            gain_val,
                            k1: pk,
                            k2: pk_nb,
                            t1: multicut.partitions[pk].age,
                            t2: multicut.partitions[pk_nb].age,
                        });
                    }
                }
            }
        }

        let mut new_moves = 0usize;

        while !moves.is_empty() {
            // keeping the queue small beats carrying stale entries around
            if new_moves > HEAP_REBUILD_INTERVAL {
                new_moves = 0;
                moves = moves
                    .into_iter()
                    .filter(|m| multicut.valid_join(m.k1, m.t1, m.k2, m.t2))
                    .collect();
                if moves.is_empty() {
                    break;
                }
            }

            let best_move = *moves.peek().unwrap();

            if !multicut.valid_join(best_move.k1, best_move.t1, best_move.k2, best_move.t2) {
                moves.pop();
                continue;
            }

            partition_codec.notify_join(&multicut.partitions, best_move.k1, best_move.k2);
            let pk_join = multicut.join(best_move.k1, best_move.k2);
            partition_cost[pk_join] =
                partition_cost[best_move.k1] + partition_cost[best_move.k2] - best_move.gain;
            total_result -= best_move.gain;

            moves.pop();

            let neighbors: Vec<PartitionKey> =
                multicut.neighbors_of(pk_join).iter().copied().collect();
            new_moves += neighbors.len();

            for pk_nb in neighbors {
                let old_result = partition_cost[pk_join] + partition_cost[pk_nb];
                let result =
                    partition_codec.test_join_encoding(&multicut.partitions, pk_join, pk_nb);
                let gain = old_result - result;
                let gain_val = gain.cost(self.weight_size, self.weight_err);
                if gain_val > 0.0 {
                    moves.push(JoinMove {
                        gain,
                        gain_val,
                        k1: pk_join,
                        k2: pk_nb,
                        t1: multicut.partitions[pk_join].age,
                        t2: multicut.partitions[pk_nb].age,
                    });
                }
            }
        }

        debug!(
            "greedy optimizer converged at {} with {} initial partitions",
            total_result, n_partitions
        );

        Multicut::new(&multicut.mask)
    }
}

#[cfg(feature = "use_rayon")]
fn for_each_cell<T: Send>(results: &mut [Option<T>], task: impl Fn(usize) -> T + Sync) {
    rayon_core::scope(|scope| {
        for (i, slot) in results.iter_mut().enumerate() {
            let task = &task;
            scope.spawn(move |_| {
                *slot = Some(task(i));
            });
        }
    });
}

#[cfg(not(feature = "use_rayon"))]
fn for_each_cell<T: Send>(results: &mut [Option<T>], task: impl Fn(usize) -> T + Sync) {
    for (i, slot) in results.iter_mut().enumerate() {
        *slot = Some(task(i));
    }
}

/// Tiles the image into cells, optimizes every cell independently (in
/// parallel when built with `use_rayon`), offsets each cell's labels into a
/// globally unique range, then runs a final sequential pass over the whole
/// image to merge regions across cell seams.
#[derive(Clone, Debug)]
pub struct GreedyGridOptimizer {
    weight_err: f32,
    weight_size: f32,
    cell_size: usize,
    partition_codec: PartitionCodec,
}

impl GreedyGridOptimizer {
    pub fn new(
        weight_err: f32,
        weight_size: f32,
        cell_size: usize,
        partition_codec: PartitionCodec,
    ) -> Self {
        assert!(cell_size > 0);
        GreedyGridOptimizer {
            weight_err,
            weight_size,
            cell_size,
            partition_codec,
        }
    }

    pub fn optimize(&self, img: &RasterImage, mask: &Mask) -> Multicut {
        let cells_per_row = (img.cols() - 1) / self.cell_size + 1;
        let cells_per_col = (img.rows() - 1) / self.cell_size + 1;
        let n_cells = cells_per_row * cells_per_col;

        let mut results: Vec<Option<(Rect, Mask)>> = (0..n_cells).map(|_| None).collect();

        for_each_cell(&mut results, |i| {
            let start_c = (i % cells_per_row) * self.cell_size;
            let start_r = (i / cells_per_row) * self.cell_size;
            let rect = Rect::clamped(
                start_r,
                start_c,
                self.cell_size,
                self.cell_size,
                img.rows(),
                img.cols(),
            );

            let cell_optimizer = GreedyOptimizer::new(
                self.weight_err,
                self.weight_size,
                true,
                self.partition_codec.clone(),
            );
            let cell_result =
                cell_optimizer.optimize(&img.sub_image(&rect), &mask.sub_mask(&rect));

            (rect, cell_result.mask)
        });

        // stitch the cell masks back, shifting labels into disjoint ranges
        let mut merged = mask.clone();
        for (i, result) in results.into_iter().enumerate() {
            let (rect, cell_mask) = result.expect("every cell must produce a result");
            let offset = (i * self.cell_size * self.cell_size) as i32;
            for r in 0..rect.rows {
                for c in 0..rect.cols {
                    merged.set(rect.row + r, rect.col + c, cell_mask.at(r, c) + offset);
                }
            }
        }

        let full_optimizer = GreedyOptimizer::new(
            self.weight_err,
            self.weight_size,
            false,
            self.partition_codec.clone(),
        );
        let result = full_optimizer.optimize(img, &merged);

        Multicut::new(&result.mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform_image(rows: usize, cols: usize, color: [u8; 3]) -> RasterImage {
        let mut img = RasterImage::new(rows, cols);
        for r in 0..rows {
            for c in 0..cols {
                img.set_pixel(r, c, color);
            }
        }
        img
    }

    fn two_tone_image(rows: usize, cols: usize) -> RasterImage {
        let mut img = RasterImage::new(rows, cols);
        for r in 0..rows {
            for c in 0..cols {
                let color = if r < rows / 2 { [10, 10, 10] } else { [200, 200, 200] };
                img.set_pixel(r, c, color);
            }
        }
        img
    }

    fn random_image(rows: usize, cols: usize, seed: u64) -> RasterImage {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut img = RasterImage::new(rows, cols);
        for r in 0..rows {
            for c in 0..cols {
                img.set_pixel(r, c, [rng.gen(), rng.gen(), rng.gen()]);
            }
        }
        img
    }

    fn total_cost(result: &Multicut, img: &RasterImage, weight_size: f32, weight_err: f32) -> f32 {
        let mut codec = PartitionCodec::mean();
        codec.initialize(&result.partitions);

        let mut total = EncodingResult::default();
        for pk in 0..result.partitions.len() {
            codec.notify_init(&result.partitions, img, pk);
            total += codec.test_encoding(pk);
        }
        total.cost(weight_size, weight_err)
    }

    #[test]
    fn uniform_image_collapses_to_one_region() {
        let img = uniform_image(4, 4, [128, 64, 32]);
        let optimizer = GreedyOptimizer::new(1.0, 1.0, true, PartitionCodec::mean());

        let result = optimizer.optimize(&img, &Mask::one_region_per_pixel(4, 4));
        assert_eq!(result.partitions.len(), 1);
        assert_eq!(total_cost(&result, &img, 1.0, 1.0), 24.0);
    }

    #[test]
    fn zero_error_weight_merges_everything() {
        let img = random_image(64, 64, 99);
        let optimizer = GreedyOptimizer::new(0.0, 1.0, true, PartitionCodec::mean());

        let result = optimizer.optimize(&img, &Mask::one_region_per_pixel(64, 64));
        assert_eq!(result.partitions.len(), 1);
    }

    #[test]
    fn optimization_never_increases_the_weighted_cost() {
        let (weight_size, weight_err) = (1.0, 0.05);
        let img = random_image(16, 16, 7);

        let initial_mask = Mask::one_region_per_pixel(16, 16);
        let initial = Multicut::new(&initial_mask);
        let initial_cost = total_cost(&initial, &img, weight_size, weight_err);

        let optimizer = GreedyOptimizer::new(weight_err, weight_size, true, PartitionCodec::mean());
        let result = optimizer.optimize(&img, &initial_mask);
        let final_cost = total_cost(&result, &img, weight_size, weight_err);

        assert!(final_cost <= initial_cost);
    }

    #[test]
    fn perfect_joins_group_flat_colors() {
        let img = two_tone_image(6, 6);

        // zero bit weight keeps the main loop idle, so only the perfect
        // join pass contributes merges
        let optimizer = GreedyOptimizer::new(1.0, 0.0, true, PartitionCodec::mean());
        let result = optimizer.optimize(&img, &Mask::one_region_per_pixel(6, 6));

        assert_eq!(result.partitions.len(), 2);
    }

    #[test]
    fn greedy_runs_are_reproducible() {
        let img = random_image(12, 12, 3);
        let optimizer = GreedyOptimizer::new(0.2, 1.0, true, PartitionCodec::mean());

        let first = optimizer.optimize(&img, &Mask::one_region_per_pixel(12, 12));
        let second = optimizer.optimize(&img, &Mask::one_region_per_pixel(12, 12));
        assert_eq!(first.mask, second.mask);
    }

    #[test]
    fn lossless_optimizer_groups_equal_colors() {
        let img = two_tone_image(4, 4);
        let result = LosslessOptimizer.optimize(&img, &Mask::one_region_per_pixel(4, 4));

        assert_eq!(result.partitions.len(), 2);
        assert_eq!(result.mask.at(0, 0), 0);
        assert_eq!(result.mask.at(3, 3), 1);
    }

    #[test]
    fn lossless_optimizer_separates_disconnected_components() {
        // same color in two opposite corners, different elsewhere
        let mut img = uniform_image(3, 3, [5, 5, 5]);
        img.set_pixel(0, 0, [9, 9, 9]);
        img.set_pixel(2, 2, [9, 9, 9]);

        let result = LosslessOptimizer.optimize(&img, &Mask::one_region_per_pixel(3, 3));
        assert_eq!(result.partitions.len(), 3);
        assert_ne!(result.mask.at(0, 0), result.mask.at(2, 2));
    }

    #[test]
    fn grid_optimizer_merges_across_cell_seams() {
        let img = two_tone_image(20, 20);
        let optimizer = GreedyGridOptimizer::new(1.0, 1.0, 8, PartitionCodec::mean());

        let result = optimizer.optimize(&img, &Mask::one_region_per_pixel(20, 20));
        assert_eq!(result.partitions.len(), 2);
        assert!(result.mask.same_partitioning(&Mask::from_labels(
            20,
            20,
            (0..400).map(|i| (i >= 200) as i32).collect::<Vec<_>>(),
        )));
    }

    #[test]
    fn grid_and_plain_greedy_agree_on_uniform_input() {
        let img = uniform_image(10, 10, [77, 77, 77]);
        let mask = Mask::one_region_per_pixel(10, 10);

        let grid = GreedyGridOptimizer::new(1.0, 1.0, 4, PartitionCodec::mean());
        let plain = GreedyOptimizer::new(1.0, 1.0, true, PartitionCodec::mean());

        assert_eq!(
            grid.optimize(&img, &mask).partitions.len(),
            plain.optimize(&img, &mask).partitions.len()
        );
    }
}
