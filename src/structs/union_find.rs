/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use std::collections::HashSet;

/// Union-find with an extra "known disjoint" relation between class roots.
/// `is_union` and `is_disjoint` are both O(1) membership queries, which is
/// what lets the multicut-aware codec skip every edge bit that earlier bits
/// already imply.
pub struct DisjointUnionFind {
    parents: Vec<usize>,
    ranks: Vec<u32>,

    /// for each root, the roots of all classes known to be disjoint from it
    root_to_disjoint: Vec<HashSet<usize>>,
}

impl DisjointUnionFind {
    pub fn new(n: usize) -> Self {
        DisjointUnionFind {
            parents: (0..n).collect(),
            ranks: vec![0; n],
            root_to_disjoint: vec![HashSet::new(); n],
        }
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn find(&mut self, key: usize) -> usize {
        let mut root = key;
        while self.parents[root] != root {
            root = self.parents[root];
        }

        // path compression
        let mut current = key;
        while self.parents[current] != root {
            let next = self.parents[current];
            self.parents[current] = root;
            current = next;
        }

        root
    }

    pub fn is_union(&mut self, key1: usize, key2: usize) -> bool {
        self.find(key1) == self.find(key2)
    }

    pub fn is_disjoint(&mut self, key1: usize, key2: usize) -> bool {
        let root1 = self.find(key1);
        let root2 = self.find(key2);
        root1 != root2 && self.root_to_disjoint[root1].contains(&root2)
    }

    pub fn make_disjoint(&mut self, key1: usize, key2: usize) {
        let root1 = self.find(key1);
        let root2 = self.find(key2);
        self.root_to_disjoint[root1].insert(root2);
        self.root_to_disjoint[root2].insert(root1);
    }

    pub fn make_union(&mut self, key1: usize, key2: usize) {
        let root1 = self.find(key1);
        let root2 = self.find(key2);
        if root1 == root2 {
            return;
        }

        // absorb the lower ranked root, relabeling its disjointness records
        // so they point at the survivor
        let (survivor, absorbed) = if self.ranks[root1] >= self.ranks[root2] {
            (root1, root2)
        } else {
            (root2, root1)
        };

        let absorbed_disjoint = std::mem::take(&mut self.root_to_disjoint[absorbed]);
        for &other in &absorbed_disjoint {
            self.root_to_disjoint[other].remove(&absorbed);
            if other != survivor {
                self.root_to_disjoint[other].insert(survivor);
            }
        }
        self.root_to_disjoint[survivor]
            .extend(absorbed_disjoint.into_iter().filter(|&k| k != survivor));

        self.parents[absorbed] = survivor;
        if self.ranks[root1] == self.ranks[root2] {
            self.ranks[survivor] += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_and_disjoint_queries() {
        let mut df = DisjointUnionFind::new(8);

        df.make_union(0, 1);
        df.make_union(2, 3);
        df.make_disjoint(1, 2);

        assert!(df.is_union(0, 1));
        assert!(!df.is_union(0, 2));
        assert!(df.is_disjoint(0, 3));
        assert!(df.is_disjoint(3, 0));
        assert!(!df.is_disjoint(0, 1));
    }

    #[test]
    fn disjointness_survives_merges() {
        let mut df = DisjointUnionFind::new(10);

        df.make_disjoint(0, 5);
        df.make_union(5, 6);
        df.make_union(6, 7);
        df.make_union(0, 1);

        // the recorded pair must follow both classes through the merges
        assert!(df.is_disjoint(1, 7));
        assert!(df.is_disjoint(7, 1));
    }

    #[test]
    fn transitive_closure_agreement() {
        // chain 0-1-2-3 in one class, 4-5 in another, known disjoint
        let mut df = DisjointUnionFind::new(6);
        df.make_union(0, 1);
        df.make_union(1, 2);
        df.make_union(2, 3);
        df.make_union(4, 5);
        df.make_disjoint(3, 4);

        for a in 0..4 {
            for b in 0..4 {
                assert!(df.is_union(a, b));
                assert!(!df.is_disjoint(a, b));
            }
            for b in 4..6 {
                assert!(!df.is_union(a, b));
                assert!(df.is_disjoint(a, b));
            }
        }
    }

    #[test]
    fn union_after_disjoint_keeps_queries_consistent() {
        // contradicting the recorded disjointness is the caller's problem,
        // but both queries must still answer deterministically
        let mut df = DisjointUnionFind::new(4);
        df.make_disjoint(0, 1);
        df.make_union(0, 1);

        assert!(df.is_union(0, 1));
        assert!(!df.is_disjoint(0, 1));
    }
}
