use std::collections::HashMap;

use crate::inventory::Slot;

/// Metadata the core needs from the image archive. The archive itself is
/// read by an external library; the core only asks these questions.
pub trait ImageCatalog: Send + Sync {
    /// Z-order plane of a picture. Negative draws below mobiles.
    fn plane(&self, _pict_id: u16) -> i8 {
        0
    }
    /// Equipment slot an item occupies when equipped.
    fn item_slot(&self, _item_id: u16) -> Option<Slot> {
        None
    }
    /// Template items are distinct instances and never coalesce.
    fn is_template_item(&self, _item_id: u16) -> bool {
        false
    }
}

/// A catalog that knows nothing: every picture on plane 0, no slots.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCatalog;

impl ImageCatalog for NullCatalog {}

/// An in-memory catalog, filled by whoever loads the archive metadata.
#[derive(Debug, Default, Clone)]
pub struct MapCatalog {
    pub planes: HashMap<u16, i8>,
    pub slots: HashMap<u16, Slot>,
    pub templates: Vec<u16>,
}

impl ImageCatalog for MapCatalog {
    fn plane(&self, pict_id: u16) -> i8 {
        self.planes.get(&pict_id).copied().unwrap_or(0)
    }
    fn item_slot(&self, item_id: u16) -> Option<Slot> {
        self.slots.get(&item_id).copied()
    }
    fn is_template_item(&self, item_id: u16) -> bool {
        self.templates.contains(&item_id)
    }
}
