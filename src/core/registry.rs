use std::collections::HashMap;

use crate::core::descriptor::{NetworkId, ObjectDescriptor};

/// Authoritative mapping of network identifier to object descriptor.
///
/// Entries live in insertion-ordered slots; `index` maps each id to its slot
/// so removal is O(1). Removed slots are compacted once they make up half
/// of the storage.
#[derive(Debug, Clone, Default)]
pub struct CanonicalRegistry {
    slots: Vec<Option<ObjectDescriptor>>,
    index: HashMap<NetworkId, usize>,
}

impl CanonicalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, network_id: NetworkId) -> bool {
        self.index.contains_key(&network_id)
    }

    pub fn get(&self, network_id: NetworkId) -> Option<&ObjectDescriptor> {
        let slot = *self.index.get(&network_id)?;
        self.slots[slot].as_ref()
    }

    pub fn get_mut(&mut self, network_id: NetworkId) -> Option<&mut ObjectDescriptor> {
        let slot = *self.index.get(&network_id)?;
        self.slots[slot].as_mut()
    }

    /// Inserts or replaces the entry for the descriptor's id.
    /// Descriptors without an id are refused and returned.
    pub fn upsert(&mut self, descriptor: ObjectDescriptor) -> Result<Option<ObjectDescriptor>, ObjectDescriptor> {
        let Some(network_id) = descriptor.network_id else {
            return Err(descriptor);
        };
        if let Some(&slot) = self.index.get(&network_id) {
            return Ok(self.slots[slot].replace(descriptor));
        }
        self.index.insert(network_id, self.slots.len());
        self.slots.push(Some(descriptor));
        Ok(None)
    }

    pub fn remove(&mut self, network_id: NetworkId) -> Option<ObjectDescriptor> {
        let slot = self.index.remove(&network_id)?;
        let removed = self.slots[slot].take();
        if self.slots.len() > 16 && self.index.len() * 2 < self.slots.len() {
            self.compact();
        }
        removed
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
    }

    // Insertion order
    pub fn iter(&self) -> impl Iterator<Item = &ObjectDescriptor> {
        self.slots.iter().flatten()
    }

    pub fn ids(&self) -> Vec<NetworkId> {
        self.iter().filter_map(|d| d.network_id).collect()
    }

    pub fn descriptors(&self) -> Vec<ObjectDescriptor> {
        self.iter().cloned().collect()
    }

    fn compact(&mut self) {
        self.slots.retain(Option::is_some);
        self.index.clear();
        for (slot, descriptor) in self.slots.iter().enumerate() {
            if let Some(id) = descriptor.as_ref().and_then(|d| d.network_id) {
                self.index.insert(id, slot);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::descriptor::Pose;
    use glam::Vec3;

    fn descriptor(type_name: &str, id: NetworkId) -> ObjectDescriptor {
        ObjectDescriptor::new(type_name, Pose::at(Vec3::new(id as f32, 0.0, 0.0)), "test").with_network_id(id)
    }

    #[test]
    fn upsert_replaces_existing_entry() {
        let mut registry = CanonicalRegistry::new();
        assert_eq!(registry.upsert(descriptor("wall", 1)), Ok(None));
        let previous = registry.upsert(descriptor("door", 1)).unwrap();

        assert_eq!(previous.map(|d| d.type_name), Some("wall".to_string()));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(1).unwrap().type_name, "door");
    }

    #[test]
    fn unassigned_descriptor_is_refused() {
        let mut registry = CanonicalRegistry::new();
        let unassigned = ObjectDescriptor::new("wall", Pose::default(), "test");
        assert!(registry.upsert(unassigned).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn iteration_keeps_insertion_order_across_removals() {
        let mut registry = CanonicalRegistry::new();
        for id in [5, 3, 9, 1] {
            registry.upsert(descriptor("wall", id)).unwrap();
        }
        registry.remove(3);
        assert_eq!(registry.ids(), vec![5, 9, 1]);
    }

    #[test]
    fn compaction_keeps_index_consistent() {
        let mut registry = CanonicalRegistry::new();
        for id in 0..40 {
            registry.upsert(descriptor("wall", id)).unwrap();
        }
        for id in 0..30 {
            assert!(registry.remove(id).is_some());
        }
        assert_eq!(registry.len(), 10);
        assert_eq!(registry.ids(), (30..40).collect::<Vec<_>>());
        assert_eq!(registry.get(35).unwrap().network_id, Some(35));
        assert!(registry.remove(35).is_some());
        assert!(!registry.contains(35));
    }
}
