//! Workshop registry collaborator boundary.

use crate::StoreResult;
use async_trait::async_trait;
use std::collections::HashSet;

/// Read-only view of workshop records owned by the relational database.
///
/// The storage core only needs one fact: whether a workshop exists and is
/// inside its active window. Everything else about workshops (members,
/// schedules, rosters) lives behind this boundary.
#[async_trait]
pub trait WorkshopRegistry: Send + Sync {
    /// Returns whether the workshop exists and has not ended.
    async fn is_active(&self, workshop_id: u32) -> StoreResult<bool>;
}

/// A fixed in-memory registry, used by the runner's default configuration
/// and by tests.
#[derive(Debug, Default)]
pub struct StaticWorkshopRegistry {
    active: HashSet<u32>,
}

impl StaticWorkshopRegistry {
    pub fn new(active: impl IntoIterator<Item = u32>) -> Self {
        Self {
            active: active.into_iter().collect(),
        }
    }
}

#[async_trait]
impl WorkshopRegistry for StaticWorkshopRegistry {
    async fn is_active(&self, workshop_id: u32) -> StoreResult<bool> {
        Ok(self.active.contains(&workshop_id))
    }
}
