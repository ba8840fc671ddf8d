use crate::algorithm::Family;
use crate::dag::{DagCacheManager, DagSizing};

/// State shared by every device of one mining run.
///
/// Owns the DAG light-cache slots and the nonce counter; device contexts
/// borrow it for the duration of a bind. Share it between device threads
/// behind an `Arc`.
#[derive(Debug, Default)]
pub struct MiningSession {
    dag: DagCacheManager,
}

impl MiningSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> MiningSessionBuilder {
        MiningSessionBuilder::default()
    }

    pub fn dag(&self) -> &DagCacheManager {
        &self.dag
    }
}

#[derive(Debug, Default)]
pub struct MiningSessionBuilder {
    chunk_items: Option<u64>,
    sizing: Vec<(Family, DagSizing)>,
}

impl MiningSessionBuilder {
    /// Items per DAG generation launch.
    pub fn dag_chunk_items(mut self, items: u64) -> Self {
        self.chunk_items = Some(items);
        self
    }

    pub fn dag_sizing(mut self, family: Family, sizing: DagSizing) -> Self {
        self.sizing.push((family, sizing));
        self
    }

    pub fn build(self) -> MiningSession {
        let mut dag = match self.chunk_items {
            Some(items) => DagCacheManager::new(items),
            None => DagCacheManager::default(),
        };
        for (family, sizing) in self.sizing {
            dag.override_sizing(family, sizing);
        }
        MiningSession { dag }
    }
}
