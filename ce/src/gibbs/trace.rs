//! Bounded per-sweep diagnostics

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::config::Variances;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepRecord {
    pub sweep: usize,
    pub variances: Variances,
    /// Joint log density of latent paths and observations after the sweep
    pub log_likelihood: f64,
}

/// Ring buffer keeping the most recent `capacity` sweeps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepTrace {
    capacity: usize,
    records: VecDeque<SweepRecord>,
}

impl SweepTrace {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, record: SweepRecord) {
        if self.capacity == 0 {
            return;
        }
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&SweepRecord> {
        self.records.back()
    }

    /// Oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &SweepRecord> {
        self.records.iter()
    }
}
