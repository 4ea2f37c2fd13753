// Copyright (c) 2025-2026 brdigetrlol. All rights reserved.
// SPDX-License-Identifier: LicenseRef-Icarus-Proprietary
// See LICENSE in the repository root for full license terms.

//! Deferred-read connections between nodes of a model.
//!
//! Feedback edges are stored by node index, never by reference, so they may
//! close cycles the forward graph forbids. Consumers read a snapshot of the
//! producers' outputs from the previous timestep; the snapshot is committed
//! once the whole timestep has been computed. Producers without a snapshot
//! read as zeros.

use std::collections::{BTreeMap, HashMap};

use nalgebra::DVector;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Default)]
pub struct FeedbackRegistry {
    /// consumer → producers, in the order the edges were added
    links: BTreeMap<usize, Vec<usize>>,
    /// producer → output at t-1
    snapshot: HashMap<usize, DVector<f64>>,
}

impl FeedbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Register `producer` as a feedback source of `consumer`. Adding the
    /// same edge twice is a no-op.
    pub fn add(&mut self, consumer: usize, producer: usize) {
        let producers = self.links.entry(consumer).or_default();
        if !producers.contains(&producer) {
            producers.push(producer);
        }
    }

    pub fn producers_of(&self, consumer: usize) -> &[usize] {
        self.links.get(&consumer).map_or(&[][..], Vec::as_slice)
    }

    /// Consumers with at least one feedback source, ascending.
    pub fn consumers(&self) -> impl Iterator<Item = usize> + '_ {
        self.links.keys().copied()
    }

    /// Total feedback width of `consumer` given each producer's output size.
    pub fn width(
        &self,
        consumer: usize,
        dim_of: impl Fn(usize) -> Option<usize>,
    ) -> Option<usize> {
        self.producers_of(consumer).iter().map(|p| dim_of(*p)).sum()
    }

    /// Previous-step outputs of `consumer`'s producers, concatenated.
    /// `None` when `consumer` has no feedback sources. A producer with no
    /// snapshot and no known width fails with `unknown(producer)`.
    pub fn gather(
        &self,
        consumer: usize,
        dim_of: impl Fn(usize) -> Option<usize>,
        unknown: impl Fn(usize) -> EngineError,
    ) -> Result<Option<DVector<f64>>> {
        let producers = self.producers_of(consumer);
        if producers.is_empty() {
            return Ok(None);
        }
        let mut data = Vec::new();
        for &p in producers {
            match self.snapshot.get(&p) {
                Some(v) => data.extend_from_slice(v.as_slice()),
                None => {
                    let dim = dim_of(p).ok_or_else(|| unknown(p))?;
                    data.resize(data.len() + dim, 0.0);
                }
            }
        }
        Ok(Some(DVector::from_vec(data)))
    }

    /// Replace the snapshot with this timestep's outputs (indexed by node).
    pub fn commit(&mut self, outputs: &[Option<DVector<f64>>]) {
        for producers in self.links.values() {
            for &p in producers {
                if let Some(Some(out)) = outputs.get(p) {
                    self.snapshot.insert(p, out.clone());
                }
            }
        }
    }

    /// Set one producer's snapshot directly.
    pub fn record(&mut self, producer: usize, output: DVector<f64>) {
        self.snapshot.insert(producer, output);
    }

    /// Forget all previous outputs; every consumer reads zeros next step.
    pub fn reset(&mut self) {
        self.snapshot.clear();
    }

    /// Copy of this registry with every index shifted by `offset`.
    pub fn shifted(&self, offset: usize) -> Self {
        Self {
            links: self
                .links
                .iter()
                .map(|(c, ps)| (c + offset, ps.iter().map(|p| p + offset).collect()))
                .collect(),
            snapshot: self
                .snapshot
                .iter()
                .map(|(p, v)| (p + offset, v.clone()))
                .collect(),
        }
    }

    /// Absorb another registry whose indices are already disjoint.
    pub fn extend(&mut self, other: Self) {
        for (c, ps) in other.links {
            for p in ps {
                self.add(c, p);
            }
        }
        self.snapshot.extend(other.snapshot);
    }
}
