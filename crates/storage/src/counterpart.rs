use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::CounterpartRef;
use crate::traits::CounterpartLookup;

/// A fixed instance-ref → record-id table.
///
/// Stands in for the external inventory in tests and in the CLI, which loads
/// it from a JSON object.
#[derive(Debug, Clone, Default)]
pub struct StaticCounterparts {
    by_instance_ref: HashMap<String, String>,
}

impl StaticCounterparts {
    pub fn new(by_instance_ref: HashMap<String, String>) -> Self {
        Self { by_instance_ref }
    }

    pub fn with(mut self, instance_ref: &str, id: &str) -> Self {
        self.by_instance_ref
            .insert(instance_ref.to_string(), id.to_string());
        self
    }

    pub fn len(&self) -> usize {
        self.by_instance_ref.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_instance_ref.is_empty()
    }
}

#[async_trait]
impl CounterpartLookup for StaticCounterparts {
    async fn find_by_instance_ref(
        &self,
        instance_ref: &str,
    ) -> Result<Option<CounterpartRef>, StorageError> {
        Ok(self
            .by_instance_ref
            .get(instance_ref)
            .map(|id| CounterpartRef {
                id: id.clone(),
                instance_ref: instance_ref.to_string(),
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_hits_and_misses() {
        let lookup = StaticCounterparts::default().with("4233080d", "vm-1");
        let hit = lookup.find_by_instance_ref("4233080d").await.unwrap();
        assert_eq!(hit.map(|c| c.id), Some("vm-1".to_string()));
        assert!(lookup.find_by_instance_ref("nope").await.unwrap().is_none());
    }
}
