//! Assignment of lights to bins

use serde::{Deserialize, Serialize};

use super::bins::BinSnapshot;
use super::messages::Point;

/// Where one light was found, if anywhere
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LightAssignment {
    pub resolved: bool,
    #[serde(rename = "loc")]
    pub location: Option<Point>,
}

impl LightAssignment {
    pub fn resolved(location: Point) -> Self {
        Self {
            resolved: true,
            location: Some(location),
        }
    }

    pub fn unresolved() -> Self {
        Self {
            resolved: false,
            location: None,
        }
    }
}

/// Result of a run, indexed by light
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Assignment {
    lights: Vec<LightAssignment>,
}

impl Assignment {
    pub fn new(lights: Vec<LightAssignment>) -> Self {
        Self { lights }
    }

    pub fn len(&self) -> usize {
        self.lights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lights.is_empty()
    }

    pub fn get(&self, light: usize) -> Option<&LightAssignment> {
        self.lights.get(light)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LightAssignment> {
        self.lights.iter()
    }

    pub fn resolved_count(&self) -> usize {
        self.lights.iter().filter(|l| l.resolved).count()
    }
}

/// Pick, for every light, the bin with the strictly largest positive vote.
///
/// A light stays unresolved when its best vote is not positive or when two
/// bins share the best vote.
pub fn resolve(bins: &[BinSnapshot], light_count: usize) -> Assignment {
    let lights = (0..light_count)
        .map(|light| {
            let mut best: Option<&BinSnapshot> = None;
            let mut best_vote = i32::MIN;
            let mut tied = false;

            for bin in bins {
                let vote = bin.pixels.get(light).copied().unwrap_or(0);
                if vote > best_vote {
                    best = Some(bin);
                    best_vote = vote;
                    tied = false;
                } else if vote == best_vote {
                    tied = true;
                }
            }

            match best {
                Some(bin) if best_vote > 0 && !tied => LightAssignment::resolved(bin.location),
                _ => LightAssignment::unresolved(),
            }
        })
        .collect();

    Assignment::new(lights)
}
