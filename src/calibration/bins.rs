//! Spatial clustering of observations into bins
//!
//! A bin is a hypothesised light location. Its centroid is fixed when it is
//! created; later observations within the similarity distance only add to
//! its hit count and vote tally.
//!
//! Lookups share a read guard and update tallies with atomic adds. Only an
//! observation that matches no bin takes the write guard, re-scans (another
//! merge may have created the bin in the meantime) and appends. Tallies are
//! never touched while the write guard is held.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;

use super::import::RawCapture;
use super::messages::Point;
use crate::error::{CalibrationError, CalibrationResult};

/// One spatial cluster
#[derive(Debug)]
pub struct Bin {
    location: Point,
    hits: AtomicU32,
    votes: Box<[AtomicI32]>,
}

impl Bin {
    fn new(location: Point, votes: &[i32]) -> Self {
        Self {
            location,
            hits: AtomicU32::new(1),
            votes: votes.iter().map(|&v| AtomicI32::new(v)).collect(),
        }
    }

    fn add(&self, votes: &[i32]) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        for (tally, &vote) in self.votes.iter().zip(votes) {
            tally.fetch_add(vote, Ordering::Relaxed);
        }
    }

    pub fn location(&self) -> Point {
        self.location
    }

    pub fn hits(&self) -> u32 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn vote(&self, light: usize) -> i32 {
        self.votes.get(light).map_or(0, |v| v.load(Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> BinSnapshot {
        BinSnapshot {
            location: self.location,
            hits: self.hits(),
            pixels: self.votes.iter().map(|v| v.load(Ordering::Relaxed)).collect(),
        }
    }
}

/// Serialisable copy of a bin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinSnapshot {
    #[serde(rename = "loc")]
    pub location: Point,
    pub hits: u32,
    /// Vote tally per light
    pub pixels: Vec<i32>,
}

/// A set of bins as written to disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedData {
    pub bins: Vec<BinSnapshot>,
}

impl AggregatedData {
    /// Bins with at least `min_hits` hits
    pub fn filtered(&self, min_hits: u32) -> AggregatedData {
        AggregatedData {
            bins: self
                .bins
                .iter()
                .filter(|b| b.hits >= min_hits)
                .cloned()
                .collect(),
        }
    }
}

/// Whether a merge landed in an existing bin or created one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged,
    Created,
}

/// All bins of one run
#[derive(Debug)]
pub struct BinSet {
    light_count: usize,
    similarity_distance: f64,
    bins: RwLock<Vec<Arc<Bin>>>,
}

impl BinSet {
    pub fn new(light_count: usize, similarity_distance: f64) -> Self {
        Self {
            light_count,
            similarity_distance,
            bins: RwLock::new(Vec::new()),
        }
    }

    fn find(&self, bins: &[Arc<Bin>], location: &Point) -> Option<Arc<Bin>> {
        bins.iter()
            .find(|bin| bin.location.distance(location) < self.similarity_distance)
            .cloned()
    }

    /// Fold one observation into the set
    pub fn merge(&self, location: Point, votes: &[i32]) -> CalibrationResult<MergeOutcome> {
        if votes.len() != self.light_count {
            return Err(CalibrationError::MalformedPayload(format!(
                "vote vector has {} entries, expected {}",
                votes.len(),
                self.light_count
            )));
        }

        let existing = self.find(&self.bins.read(), &location);
        if let Some(bin) = existing {
            bin.add(votes);
            return Ok(MergeOutcome::Merged);
        }

        let raced = {
            let mut bins = self.bins.write();
            let found = self.find(&bins, &location);
            if found.is_none() {
                bins.push(Arc::new(Bin::new(location, votes)));
            }
            found
        };

        match raced {
            Some(bin) => {
                bin.add(votes);
                Ok(MergeOutcome::Merged)
            }
            None => Ok(MergeOutcome::Created),
        }
    }

    pub fn len(&self) -> usize {
        self.bins.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.read().is_empty()
    }

    pub fn light_count(&self) -> usize {
        self.light_count
    }

    /// Copy of every bin in creation order
    pub fn snapshot(&self) -> AggregatedData {
        AggregatedData {
            bins: self.bins.read().iter().map(|b| b.snapshot()).collect(),
        }
    }
}

/// Fold every observation of `captures` into `bins` using up to `workers` threads
pub fn aggregate(captures: &[RawCapture], bins: &BinSet, workers: usize) -> CalibrationResult<()> {
    let observations: Vec<(Point, &[i32])> = captures
        .iter()
        .flat_map(|c| c.locations.iter().map(move |p| (*p, c.pixels.as_slice())))
        .collect();

    if observations.is_empty() {
        return Ok(());
    }

    let chunk_size = observations.len().div_ceil(workers.max(1));
    std::thread::scope(|scope| {
        let handles: Vec<_> = observations
            .chunks(chunk_size)
            .map(|chunk| {
                scope.spawn(move || {
                    chunk
                        .iter()
                        .try_for_each(|(location, votes)| bins.merge(*location, votes).map(|_| ()))
                })
            })
            .collect();

        handles.into_iter().try_for_each(|handle| {
            handle
                .join()
                .map_err(|_| CalibrationError::ImportTask("aggregation worker panicked".to_string()))?
        })
    })
}
