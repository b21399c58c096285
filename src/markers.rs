use std::sync::Arc;

/// Visual object owned by a context, drawn by the host while visible.
pub trait Marker: Send + Sync {
    fn visible(&self) -> bool;

    fn set_visible(&self, visible: bool);

    fn on_update(&self) {}

    fn on_render(&self) {}
}

pub type MarkerRef = Arc<dyn Marker>;

#[derive(Default)]
pub struct MarkerSet {
    markers: Vec<MarkerRef>,
}

impl MarkerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, marker: MarkerRef) {
        self.markers.push(marker);
    }

    /// Hides `marker` and unlinks it. Returns `false` if it was not in the set.
    pub fn remove(&mut self, marker: &MarkerRef) -> bool {
        marker.set_visible(false);
        match self.markers.iter().position(|existing| Arc::ptr_eq(existing, marker)) {
            Some(index) => {
                self.markers.remove(index);
                true
            }
            None => false,
        }
    }

    /// Hides every marker, then empties the set.
    pub fn clear(&mut self) {
        for marker in &self.markers {
            marker.set_visible(false);
        }
        self.markers.clear();
    }

    pub fn snapshot(&self) -> Vec<MarkerRef> {
        self.markers.clone()
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }
}
