//! Ordered collection of size classes

use super::backing::SystemAllocator;
use super::size_class::SizeClass;
use crate::error::{Error, Result};
use std::sync::Arc;
use tracing::info;

/// The size classes of one allocator, sorted by block size
///
/// Every class receives an equal share of the total budget.
#[derive(Debug)]
pub struct Pool {
    class_sizes: Vec<usize>,
    classes: Vec<SizeClass>,
}

impl Pool {
    /// Build one size class per entry of `class_sizes`
    ///
    /// `class_sizes` must be non-empty, strictly ascending and positive.
    pub fn new(
        total_budget: usize,
        class_sizes: &[usize],
        system: Arc<dyn SystemAllocator>,
    ) -> Result<Self> {
        validate_class_sizes(class_sizes)?;
        if total_budget == 0 {
            return Err(Error::Construction("Total budget must be positive".into()));
        }

        let class_budget = total_budget / class_sizes.len();
        let classes = class_sizes
            .iter()
            .map(|&size| SizeClass::new(size, class_budget, system.clone()))
            .collect::<Result<Vec<_>>>()?;

        info!(
            total_budget,
            class_budget,
            classes = class_sizes.len(),
            "Initialized pool with size classes {:?}",
            class_sizes
        );

        Ok(Self {
            class_sizes: class_sizes.to_vec(),
            classes,
        })
    }

    /// Index of the class whose block size is exactly `size`
    pub fn resolve_exact(&self, size: usize) -> Option<usize> {
        self.class_sizes.binary_search(&size).ok()
    }

    /// Smallest configured class size that can hold `size` bytes
    pub fn round_up(&self, size: usize) -> Option<usize> {
        let idx = self.class_sizes.partition_point(|&s| s < size);
        self.class_sizes.get(idx).copied()
    }

    pub fn class_at(&self, index: usize) -> Option<&SizeClass> {
        self.classes.get(index)
    }

    pub fn class_at_mut(&mut self, index: usize) -> Option<&mut SizeClass> {
        self.classes.get_mut(index)
    }

    pub fn size_at(&self, index: usize) -> Option<usize> {
        self.class_sizes.get(index).copied()
    }

    /// Number of size classes
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Check if the pool has no size classes
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn max_class_size(&self) -> usize {
        self.class_sizes.last().copied().unwrap_or(0)
    }

    pub fn class_sizes(&self) -> &[usize] {
        &self.class_sizes
    }

    pub fn iter(&self) -> impl Iterator<Item = &SizeClass> {
        self.classes.iter()
    }

    /// Bytes actually carved into blocks across all classes
    pub fn carved_bytes(&self) -> usize {
        self.classes
            .iter()
            .map(|sc| sc.capacity() * sc.block_size())
            .sum()
    }
}

/// Check that sizes are non-empty, positive and strictly ascending
pub fn validate_class_sizes(class_sizes: &[usize]) -> Result<()> {
    if class_sizes.is_empty() {
        return Err(Error::Construction("At least one size class is required".into()));
    }
    if class_sizes.contains(&0) {
        return Err(Error::Construction("Size classes must be positive".into()));
    }
    if let Some(pair) = class_sizes.windows(2).find(|w| w[0] >= w[1]) {
        return Err(Error::Construction(format!(
            "Size classes must be strictly ascending: {} is followed by {}",
            pair[0], pair[1]
        )));
    }
    Ok(())
}
