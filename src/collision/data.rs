use glam::DVec3;
use parking_lot::Mutex;

/// One contact between an implicit surface and a point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionElement {
    /// Unit contact normal, from the implicit side towards the point side.
    pub direction: DVec3,
    /// Penetration depth, never negative.
    pub depth: f64,
    /// Position of the penetrating point.
    pub point: DVec3,
    /// Index of the point in its point set.
    pub index: usize,
}

/// Contacts found by one detection pass, shared by the detect node that
/// writes them and the handle nodes that read them.
#[derive(Debug, Default)]
pub struct CollisionData {
    elements: Mutex<Vec<CollisionElement>>,
}

impl CollisionData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append from any thread.
    pub fn safe_append(&self, element: CollisionElement) {
        self.elements.lock().push(element);
    }

    pub fn extend(&self, elements: impl IntoIterator<Item = CollisionElement>) {
        self.elements.lock().extend(elements);
    }

    pub fn clear(&self) {
        self.elements.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.elements.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.lock().is_empty()
    }

    /// Copy of the current contacts, sorted by point index.
    pub fn snapshot(&self) -> Vec<CollisionElement> {
        let mut elements = self.elements.lock().clone();
        elements.sort_by_key(|element| element.index);
        elements
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    fn element(index: usize) -> CollisionElement {
        CollisionElement {
            direction: DVec3::Y,
            depth: 0.1,
            point: DVec3::ZERO,
            index,
        }
    }

    #[test]
    fn test_concurrent_append() {
        let data = CollisionData::new();
        (0..1000).into_par_iter().for_each(|i| data.safe_append(element(i)));

        let snapshot = data.snapshot();
        assert_eq!(snapshot.len(), 1000);
        assert!(snapshot.iter().enumerate().all(|(i, e)| e.index == i));

        data.clear();
        assert!(data.is_empty());
    }
}
