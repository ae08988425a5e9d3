use std::collections::HashMap;

use crate::core::descriptor::ResourceCost;

/// The requester's resource bookkeeping, consulted before a commit.
pub trait Inventory {
    fn can_afford(&self, cost: &ResourceCost) -> bool;

    fn deduct(&mut self, cost: &ResourceCost);
}

/// Plain stockpile of named resources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourcePool {
    stock: HashMap<String, u32>,
}

impl ResourcePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, resource: &str, amount: u32) -> Self {
        self.add(resource, amount);
        self
    }

    pub fn add(&mut self, resource: &str, amount: u32) {
        let entry = self.stock.entry(resource.to_string()).or_insert(0);
        *entry = entry.saturating_add(amount);
    }

    pub fn amount(&self, resource: &str) -> u32 {
        self.stock.get(resource).copied().unwrap_or(0)
    }
}

impl Inventory for ResourcePool {
    fn can_afford(&self, cost: &ResourceCost) -> bool {
        cost.iter().all(|(resource, amount)| self.amount(resource) >= amount)
    }

    fn deduct(&mut self, cost: &ResourceCost) {
        for (resource, amount) in cost.iter() {
            if let Some(entry) = self.stock.get_mut(resource) {
                *entry = entry.saturating_sub(amount);
            }
        }
    }
}

/// Inventory that can afford everything, for peers without an economy.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unlimited;

impl Inventory for Unlimited {
    fn can_afford(&self, _cost: &ResourceCost) -> bool {
        true
    }

    fn deduct(&mut self, _cost: &ResourceCost) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affordability_checks_every_resource() {
        let pool = ResourcePool::new().with("wood", 10).with("stone", 1);
        assert!(pool.can_afford(&ResourceCost::of("wood", 10)));
        assert!(!pool.can_afford(&ResourceCost::of("wood", 5).with("stone", 2)));
        assert!(!pool.can_afford(&ResourceCost::of("iron", 1)));
        assert!(pool.can_afford(&ResourceCost::free()));
    }

    #[test]
    fn deduct_removes_cost() {
        let mut pool = ResourcePool::new().with("wood", 10);
        pool.deduct(&ResourceCost::of("wood", 4));
        assert_eq!(pool.amount("wood"), 6);
    }
}
