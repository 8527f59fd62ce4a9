/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use std::collections::{BTreeSet, HashMap};

use crate::structs::raster_image::Mask;

pub type PartitionKey = usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Point {
    pub row: u32,
    pub col: u32,
}

impl Point {
    pub fn new(row: usize, col: usize) -> Self {
        Point {
            row: row as u32,
            col: col as u32,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct PartitionData {
    pub points: Vec<Point>,
    /// bumped on every join touching this partition; snapshots of it let the
    /// optimizer detect stale queue entries without touching the mask
    pub age: u32,
}

/// Region structure derived from a mask: per-region pixel lists plus the
/// 4-neighborhood adjacency graph, all indexed by dense partition keys.
/// Neighbor links are stored both ways and rewritten in one sweep on join.
#[derive(Clone, Debug)]
pub struct Multicut {
    pub mask: Mask,
    pub partitions: Vec<PartitionData>,
    pub neighbors: Vec<BTreeSet<PartitionKey>>,
}

impl Multicut {
    /// builds the structure from any mask, relabeling to dense keys in
    /// raster order of first appearance
    pub fn new(mask: &Mask) -> Self {
        let mut result = Multicut {
            mask: mask.clone(),
            partitions: Vec::new(),
            neighbors: Vec::new(),
        };
        result.init_relabeling();
        result.init_neighbors();
        result
    }

    /// skips the relabeling scan; the mask must already be canonical, with
    /// the final raster label naming the last partition
    pub fn without_relabel(mask: &Mask) -> Self {
        let mut result = Multicut {
            mask: mask.clone(),
            partitions: Vec::new(),
            neighbors: Vec::new(),
        };
        result.init_without_relabeling();
        result.init_neighbors();
        result
    }

    fn init_relabeling(&mut self) {
        let mut idx2key: HashMap<i32, PartitionKey> = HashMap::new();

        for r in 0..self.mask.rows() {
            for c in 0..self.mask.cols() {
                let idx = self.mask.at(r, c);

                let new_key = match idx2key.get(&idx) {
                    Some(&key) => {
                        self.partitions[key].points.push(Point::new(r, c));
                        key
                    }
                    None => {
                        let key = self.partitions.len();
                        idx2key.insert(idx, key);
                        self.partitions.push(PartitionData {
                            points: vec![Point::new(r, c)],
                            age: 0,
                        });
                        key
                    }
                };

                self.mask.set(r, c, new_key as i32);
            }
        }
    }

    fn init_without_relabeling(&mut self) {
        let n_partitions = self.mask.at(self.mask.rows() - 1, self.mask.cols() - 1) as usize + 1;
        self.partitions = vec![PartitionData::default(); n_partitions];

        for r in 0..self.mask.rows() {
            for c in 0..self.mask.cols() {
                let pk = self.mask.at(r, c) as usize;
                self.partitions[pk].points.push(Point::new(r, c));
            }
        }
    }

    fn init_neighbors(&mut self) {
        self.neighbors = vec![BTreeSet::new(); self.partitions.len()];

        const DELTA: [(isize, isize); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];

        for r in 0..self.mask.rows() {
            for c in 0..self.mask.cols() {
                let pk = self.mask.at(r, c);
                for (dr, dc) in DELTA {
                    let nr = r as isize + dr;
                    let nc = c as isize + dc;
                    if nr < 0
                        || nc < 0
                        || nr >= self.mask.rows() as isize
                        || nc >= self.mask.cols() as isize
                    {
                        continue;
                    }
                    let nk = self.mask.at(nr as usize, nc as usize);
                    if pk != nk {
                        self.neighbors[pk as usize].insert(nk as usize);
                    }
                }
            }
        }
    }

    /// merges two adjacent partitions, absorbing the larger numbered label
    /// into the smaller one; returns the surviving key
    pub fn join(&mut self, pk1: PartitionKey, pk2: PartitionKey) -> PartitionKey {
        assert_ne!(pk1, pk2);

        // absorbed gets the larger label so surviving keys stay small
        let (absorbed, survivor) = if pk2 > pk1 { (pk2, pk1) } else { (pk1, pk2) };

        self.partitions[absorbed].age += 1;
        self.partitions[survivor].age += 1;

        let absorbed_points = std::mem::take(&mut self.partitions[absorbed].points);
        for p in &absorbed_points {
            self.mask.set(p.row as usize, p.col as usize, survivor as i32);
        }
        self.partitions[survivor].points.extend(absorbed_points);

        let absorbed_neighbors = std::mem::take(&mut self.neighbors[absorbed]);
        for &old_nb in &absorbed_neighbors {
            self.neighbors[old_nb].remove(&absorbed);
            self.neighbors[old_nb].insert(survivor);
        }

        self.neighbors[survivor].extend(absorbed_neighbors);
        self.neighbors[survivor].remove(&absorbed);
        self.neighbors[survivor].remove(&survivor);

        survivor
    }

    /// cheap staleness check: true iff neither partition has been involved
    /// in a join since the ages were snapshotted
    pub fn valid_join(&self, pk1: PartitionKey, age1: u32, pk2: PartitionKey, age2: u32) -> bool {
        self.partitions[pk1].age == age1 && self.partitions[pk2].age == age2
    }

    pub fn neighbors_of(&self, pk: PartitionKey) -> &BTreeSet<PartitionKey> {
        &self.neighbors[pk]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkerboard_2x2() -> Multicut {
        // 0 1
        // 2 3
        Multicut::new(&Mask::from_labels(2, 2, vec![10, 20, 30, 40]))
    }

    #[test]
    fn construction_relabels_in_raster_order() {
        let mc = checkerboard_2x2();
        assert_eq!(mc.mask, Mask::from_labels(2, 2, vec![0, 1, 2, 3]));
        assert_eq!(mc.partitions.len(), 4);
        assert_eq!(mc.partitions[3].points, vec![Point::new(1, 1)]);
    }

    #[test]
    fn neighbor_graph_is_symmetric_4_connected() {
        let mc = checkerboard_2x2();
        assert_eq!(mc.neighbors_of(0).iter().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(mc.neighbors_of(3).iter().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert!(mc.neighbors_of(1).contains(&0));
        assert!(mc.neighbors_of(2).contains(&0));
    }

    #[test]
    fn join_absorbs_larger_key_and_rewrites_edges() {
        let mut mc = checkerboard_2x2();

        let survivor = mc.join(0, 1);
        assert_eq!(survivor, 0);

        assert_eq!(mc.mask, Mask::from_labels(2, 2, vec![0, 0, 2, 3]));
        assert_eq!(mc.partitions[0].points.len(), 2);
        assert!(mc.partitions[1].points.is_empty());
        assert!(mc.neighbors_of(1).is_empty());

        // both former neighbors of 1 now point at 0
        assert!(mc.neighbors_of(3).contains(&0));
        assert!(!mc.neighbors_of(3).contains(&1));
        assert_eq!(mc.neighbors_of(0).iter().copied().collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn ages_bump_on_both_sides_of_a_join() {
        let mut mc = checkerboard_2x2();
        assert!(mc.valid_join(0, 0, 1, 0));

        mc.join(0, 1);
        assert_eq!(mc.partitions[0].age, 1);
        assert_eq!(mc.partitions[1].age, 1);
        assert!(!mc.valid_join(0, 0, 1, 0));
        assert!(mc.valid_join(2, 0, 3, 0));
    }

    #[test]
    fn without_relabel_reuses_canonical_labels() {
        let mask = Mask::from_labels(2, 2, vec![0, 0, 1, 1]);
        let mc = Multicut::without_relabel(&mask);
        assert_eq!(mc.partitions.len(), 2);
        assert_eq!(mc.partitions[0].points.len(), 2);
        assert_eq!(mc.neighbors_of(0).iter().copied().collect::<Vec<_>>(), vec![1]);
    }
}
