use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::PropagationPath;
use crate::config::BlastRadiusConfig;

/// How and when a failure first reaches one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceReach {
    pub service_id: String,
    /// 1-3, or `None` when reached only beyond the last threshold.
    pub tier: Option<u8>,
    /// Fewest hops over any path.
    pub hops: usize,
    /// Earliest cumulative propagation time over any path.
    pub earliest_secs: f64,
    /// Highest probability of any path ending here.
    pub probability: f64,
    /// Services on the most probable path ending here, trigger first.
    pub best_path: Vec<String>,
}

impl ServiceReach {
    /// Upstream neighbour on the most probable path.
    pub fn via(&self) -> Option<&str> {
        let n = self.best_path.len();
        if n < 2 {
            return None;
        }
        Some(self.best_path[n - 2].as_str())
    }
}

/// Reached services partitioned by how soon they are affected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlastRadius {
    pub tier1: Vec<String>,
    pub tier2: Vec<String>,
    pub tier3: Vec<String>,
    /// Reached, but only after the tier 3 threshold.
    pub beyond_horizon: Vec<String>,
    /// Per-service detail, ordered by id.
    pub reach: Vec<ServiceReach>,
}

impl BlastRadius {
    pub fn tier_of(&self, service_id: &str) -> Option<u8> {
        self.reach(service_id).and_then(|r| r.tier)
    }

    pub fn reach(&self, service_id: &str) -> Option<&ServiceReach> {
        self.reach.iter().find(|r| r.service_id == service_id)
    }

    /// Services in tiers 1 to 3.
    pub fn tiered(&self) -> impl Iterator<Item = &String> {
        self.tier1.iter().chain(&self.tier2).chain(&self.tier3)
    }
}

/// Partitions propagation into time-bounded tiers.
pub struct BlastRadiusCalculator {
    thresholds: [f64; 3],
}

impl BlastRadiusCalculator {
    pub fn new(config: &BlastRadiusConfig) -> Self {
        Self {
            thresholds: [config.tier1_secs, config.tier2_secs, config.tier3_secs],
        }
    }

    /// Tier of a service reached at hop `hops` after `secs` seconds.
    ///
    /// A service is never placed in an earlier tier than its hop distance, and
    /// never earlier than its arrival time allows. `None` means beyond the
    /// last threshold.
    pub fn tier_for(&self, hops: usize, secs: f64) -> Option<u8> {
        let time_tier = self
            .thresholds
            .iter()
            .position(|threshold| secs <= *threshold)? as u8
            + 1;
        let hop_tier = hops.clamp(1, 3) as u8;
        Some(time_tier.max(hop_tier))
    }

    /// Build the blast radius from every enumerated path.
    ///
    /// Each path contributes its own endpoint. Since every prefix of a path is
    /// itself a path, this visits every service at every position it is reached.
    /// The earliest tier assigned by any path wins.
    pub fn calculate(&self, paths: &[PropagationPath]) -> BlastRadius {
        let mut reach: BTreeMap<&str, ServiceReach> = BTreeMap::new();

        for path in paths {
            let target = path.target();
            if path.hops() == 0 {
                continue;
            }
            let tier = self.tier_for(path.hops(), path.cumulative_secs);

            match reach.get_mut(target) {
                Some(existing) => {
                    existing.tier = earliest_tier(existing.tier, tier);
                    existing.hops = existing.hops.min(path.hops());
                    existing.earliest_secs = existing.earliest_secs.min(path.cumulative_secs);
                    if is_better_path(path, existing) {
                        existing.probability = path.probability;
                        existing.best_path = path.services.clone();
                    }
                }
                None => {
                    reach.insert(
                        target,
                        ServiceReach {
                            service_id: target.to_string(),
                            tier,
                            hops: path.hops(),
                            earliest_secs: path.cumulative_secs,
                            probability: path.probability,
                            best_path: path.services.clone(),
                        },
                    );
                }
            }
        }

        let mut radius = BlastRadius::default();
        for entry in reach.into_values() {
            let bucket = match entry.tier {
                Some(1) => &mut radius.tier1,
                Some(2) => &mut radius.tier2,
                Some(_) => &mut radius.tier3,
                None => &mut radius.beyond_horizon,
            };
            bucket.push(entry.service_id.clone());
            radius.reach.push(entry);
        }
        radius
    }
}

fn earliest_tier(a: Option<u8>, b: Option<u8>) -> Option<u8> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (Some(x), None) | (None, Some(x)) => Some(x),
        (None, None) => None,
    }
}

fn is_better_path(path: &PropagationPath, current: &ServiceReach) -> bool {
    match path.probability.total_cmp(&current.probability) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => path.services < current.best_path,
    }
}
