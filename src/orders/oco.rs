// =============================================================================
// OCO linkage — bidirectional, unique links between sibling orders (§4.7)
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use uuid::Uuid;

/// Tracks one-cancels-other pairs. Linking `(a, b)` invalidates any prior
/// link held by either side.
pub struct OcoLinks {
    links: RwLock<HashMap<Uuid, Uuid>>,
}

impl OcoLinks {
    pub fn new() -> Self {
        Self { links: RwLock::new(HashMap::new()) }
    }

    pub fn link(&self, a: Uuid, b: Uuid) {
        let mut links = self.links.write();
        if let Some(prior) = links.remove(&a) {
            links.remove(&prior);
        }
        if let Some(prior) = links.remove(&b) {
            links.remove(&prior);
        }
        links.insert(a, b);
        links.insert(b, a);
    }

    pub fn sibling(&self, order_id: Uuid) -> Option<Uuid> {
        self.links.read().get(&order_id).copied()
    }

    /// Remove the link for `order_id` (and its sibling's reverse entry),
    /// returning the sibling if one existed. Idempotent: a second call for
    /// either side of an already-unlinked pair returns `None`.
    pub fn unlink(&self, order_id: Uuid) -> Option<Uuid> {
        let mut links = self.links.write();
        let sibling = links.remove(&order_id)?;
        links.remove(&sibling);
        Some(sibling)
    }
}

impl Default for OcoLinks {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_is_bidirectional() {
        let links = OcoLinks::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        links.link(a, b);
        assert_eq!(links.sibling(a), Some(b));
        assert_eq!(links.sibling(b), Some(a));
    }

    #[test]
    fn relinking_invalidates_prior_links() {
        let links = OcoLinks::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        links.link(a, b);
        links.link(a, c);
        assert_eq!(links.sibling(a), Some(c));
        assert_eq!(links.sibling(b), None);
    }

    #[test]
    fn unlink_is_idempotent() {
        let links = OcoLinks::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        links.link(a, b);
        assert_eq!(links.unlink(a), Some(b));
        assert_eq!(links.unlink(a), None);
        assert_eq!(links.unlink(b), None);
    }
}
