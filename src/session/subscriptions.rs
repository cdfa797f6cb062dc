//! Per-kind subscription table.

use std::collections::HashMap;
use std::sync::Arc;

use crate::data::{MeasurementKind, MeasurementSample};

/// Callback invoked for every sample of a subscribed kind.
pub type MeasurementCallback = Arc<dyn Fn(&MeasurementSample) + Send + Sync>;

/// Identifies one registration returned by
/// [`ProbeSession::subscribe`](crate::ProbeSession::subscribe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

impl SubscriptionId {
    /// Get the numeric ID.
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Callbacks keyed by measurement kind, kept in registration order.
#[derive(Default)]
pub(crate) struct SubscriptionTable {
    next_id: u64,
    by_kind: HashMap<MeasurementKind, Vec<(SubscriptionId, MeasurementCallback)>>,
}

impl SubscriptionTable {
    pub(crate) fn insert(
        &mut self,
        kind: MeasurementKind,
        callback: MeasurementCallback,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.by_kind.entry(kind).or_default().push((id, callback));
        id
    }

    /// Returns `true` if a registration was removed.
    pub(crate) fn remove(&mut self, kind: MeasurementKind, id: SubscriptionId) -> bool {
        let Some(callbacks) = self.by_kind.get_mut(&kind) else {
            return false;
        };

        let before = callbacks.len();
        callbacks.retain(|(existing, _)| *existing != id);
        let removed = callbacks.len() != before;

        if callbacks.is_empty() {
            self.by_kind.remove(&kind);
        }
        removed
    }

    /// Snapshot of the callbacks for `kind`, in registration order.
    pub(crate) fn callbacks_for(
        &self,
        kind: MeasurementKind,
    ) -> Vec<(SubscriptionId, MeasurementCallback)> {
        self.by_kind.get(&kind).cloned().unwrap_or_default()
    }

    pub(crate) fn contains(&self, kind: MeasurementKind, id: SubscriptionId) -> bool {
        self.by_kind
            .get(&kind)
            .map(|callbacks| callbacks.iter().any(|(existing, _)| *existing == id))
            .unwrap_or(false)
    }

    pub(crate) fn len(&self, kind: MeasurementKind) -> usize {
        self.by_kind.get(&kind).map(Vec::len).unwrap_or(0)
    }

    pub(crate) fn clear(&mut self) {
        self.by_kind.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, MeasurementCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, Arc::new(move |_: &MeasurementSample| {
            c.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[test]
    fn test_insert_preserves_order() {
        let mut table = SubscriptionTable::default();
        let (_, a) = counter();
        let (_, b) = counter();

        let first = table.insert(MeasurementKind::Temperature, a);
        let second = table.insert(MeasurementKind::Temperature, b);

        let ids: Vec<_> = table
            .callbacks_for(MeasurementKind::Temperature)
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec![first, second]);
        assert!(first < second);
    }

    #[test]
    fn test_remove() {
        let mut table = SubscriptionTable::default();
        let (_, a) = counter();
        let id = table.insert(MeasurementKind::SurfaceTemperature, a);

        assert!(!table.remove(MeasurementKind::PlungeTemperature, id));
        assert!(table.contains(MeasurementKind::SurfaceTemperature, id));
        assert!(table.remove(MeasurementKind::SurfaceTemperature, id));
        assert!(!table.remove(MeasurementKind::SurfaceTemperature, id));
        assert_eq!(table.len(MeasurementKind::SurfaceTemperature), 0);
    }

    #[test]
    fn test_kinds_are_independent() {
        let mut table = SubscriptionTable::default();
        let (_, a) = counter();
        let (_, b) = counter();
        table.insert(MeasurementKind::SurfaceTemperature, a);
        table.insert(MeasurementKind::PlungeTemperature, b);

        assert_eq!(table.len(MeasurementKind::SurfaceTemperature), 1);
        assert_eq!(table.len(MeasurementKind::PlungeTemperature), 1);
        assert!(table.callbacks_for(MeasurementKind::Temperature).is_empty());

        table.clear();
        assert_eq!(table.len(MeasurementKind::PlungeTemperature), 0);
    }
}
