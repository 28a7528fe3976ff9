//! Correlation ids for scheduled triggers.

use std::collections::HashSet;
use std::ops::Range;

use log::warn;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::model::ScheduledTrigger;

/// Ids are drawn from this range, upper bound exclusive.
pub const ID_RANGE: Range<u32> = 1..100_000;

const MAX_DRAWS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdStrategy {
    /// Redraw until the id is not used by a live trigger.
    #[default]
    Unique,
    /// Single uniform draw. A collision makes the scheduler replace the older
    /// registration while both triggers stay in the store.
    Legacy,
}

pub struct TriggerIdentity {
    strategy: IdStrategy,
}

impl TriggerIdentity {
    pub fn new(strategy: IdStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> IdStrategy {
        self.strategy
    }

    /// Returns a fresh id. `live` are the triggers currently registered.
    pub fn new_id(&self, live: &[ScheduledTrigger]) -> u32 {
        let mut rng = rand::thread_rng();
        match self.strategy {
            IdStrategy::Legacy => rng.gen_range(ID_RANGE),
            IdStrategy::Unique => {
                let taken: HashSet<u32> = live.iter().map(|t| t.id).collect();
                for _ in 0..MAX_DRAWS {
                    let id = rng.gen_range(ID_RANGE);
                    if !taken.contains(&id) {
                        return id;
                    }
                }
                // Only reachable with a crowded range
                (ID_RANGE.start..ID_RANGE.end)
                    .find(|id| !taken.contains(id))
                    .unwrap_or_else(|| {
                        warn!("Trigger id range exhausted, reusing an id");
                        ID_RANGE.start
                    })
            }
        }
    }
}
