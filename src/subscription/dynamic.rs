use smallvec::SmallVec;

/// An ordered collection of waiting consumers keyed by a caller-chosen id.
///
/// The memoizing cache keeps two of these ("awaiting subscription" and
/// "awaiting outcome") and moves consumers between them under one id, so ids
/// come from the owner rather than from the container.
///
/// # Design
///
/// - **SmallVec Optimization**: Uses `SmallVec<[_; 2]>` to avoid heap
///   allocation for the common case of 0-2 waiting consumers.
/// - **Idempotent removal**: removing an id twice is harmless, which is what
///   lets a cancellation race with the delivery loop.
///
/// # Examples
///
/// ```rust
/// use rxsignal::subscription::DynamicSubscribers;
///
/// let mut waiting: DynamicSubscribers<&str> = DynamicSubscribers::default();
/// waiting.insert(7, "first");
/// waiting.insert(9, "second");
///
/// assert_eq!(waiting.snapshot(), vec![(7, "first"), (9, "second")]);
/// assert_eq!(waiting.remove(7), Some("first"));
/// assert_eq!(waiting.remove(7), None);
/// assert_eq!(waiting.len(), 1);
/// ```
pub struct DynamicSubscribers<U> {
  items: SmallVec<[(usize, U); 2]>,
}

impl<U> Default for DynamicSubscribers<U> {
  fn default() -> Self { Self { items: SmallVec::new() } }
}

impl<U> DynamicSubscribers<U> {
  /// Create an empty container.
  #[inline]
  pub fn new() -> Self { Self::default() }

  /// Append an item under `id`, keeping arrival order.
  #[inline]
  pub fn insert(&mut self, id: usize, item: U) { self.items.push((id, item)); }

  /// Remove an item by ID. Returns the item if it was still present.
  pub fn remove(&mut self, id: usize) -> Option<U> {
    self
      .items
      .iter()
      .position(|(i, _)| *i == id)
      .map(|pos| self.items.remove(pos).1)
  }

  /// Check if an ID exists in the container.
  #[inline]
  pub fn contains(&self, id: usize) -> bool { self.items.iter().any(|(i, _)| *i == id) }

  /// Get the number of items.
  #[inline]
  pub fn len(&self) -> usize { self.items.len() }

  /// Check if empty.
  #[inline]
  pub fn is_empty(&self) -> bool { self.items.is_empty() }
}

impl<U: Clone> DynamicSubscribers<U> {
  /// Copy the current members, in arrival order.
  ///
  /// Callers take the snapshot under their lock and invoke consumers after
  /// releasing it.
  pub fn snapshot(&self) -> Vec<(usize, U)> { self.items.iter().cloned().collect() }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[rxsignal_macro::test]
  fn keeps_arrival_order_across_removals() {
    let mut set = DynamicSubscribers::new();
    for id in 0..4 {
      set.insert(id, id * 10);
    }
    assert_eq!(set.remove(1), Some(10));
    assert!(!set.contains(1));
    assert!(set.contains(2));
    assert_eq!(set.snapshot(), vec![(0, 0), (2, 20), (3, 30)]);
  }

  #[rxsignal_macro::test]
  fn removal_is_idempotent() {
    let mut set = DynamicSubscribers::new();
    set.insert(3, "x");
    assert_eq!(set.remove(3), Some("x"));
    assert_eq!(set.remove(3), None);
    assert!(set.is_empty());
  }
}
