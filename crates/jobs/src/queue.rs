//! Client-side projection of the server's item collection.

use std::collections::BTreeSet;

use serde::Serialize;

use geoqueue_protocol::{ItemId, ItemRecord};

/// Transient per-item state derived from active jobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ItemFlags {
    pub deleting: bool,
    pub importing: bool,
    /// Percentage of the running job that covers this item, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    /// Error of the last failed job on this item.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ItemFlags {
    /// `true` while a job is in flight for the item.
    pub fn is_busy(&self) -> bool {
        self.deleting || self.importing
    }
}

/// One queue entry: the server record plus derived flags.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueItem {
    #[serde(flatten)]
    pub record: ItemRecord,
    #[serde(flatten)]
    pub flags: ItemFlags,
}

impl QueueItem {
    pub fn new(record: ItemRecord) -> Self {
        Self {
            record,
            flags: ItemFlags::default(),
        }
    }

    pub fn id(&self) -> ItemId {
        self.record.id
    }
}

/// Storage for the item collection shown to the user.
///
/// Records come from the server; flags are written only through
/// [`set_flags`](Self::set_flags) by the job projection.
pub trait QueueStore: Send {
    /// Replaces the whole collection with an authoritative snapshot.
    fn set_queue(&mut self, records: Vec<ItemRecord>);

    /// Inserts a record, or replaces the record of an existing item.
    fn add_item(&mut self, record: ItemRecord);

    /// Replaces the record of an existing item. Returns `false` if the item
    /// is unknown.
    fn update_item(&mut self, record: ItemRecord) -> bool;

    /// Overwrites the derived flags of an item.
    fn set_flags(&mut self, id: ItemId, flags: ItemFlags) -> bool;

    /// Removes items, returning how many were present.
    fn remove_items(&mut self, ids: &BTreeSet<ItemId>) -> usize;

    fn get(&self, id: ItemId) -> Option<&QueueItem>;

    /// Items in display order.
    fn items(&self) -> Vec<&QueueItem>;

    fn contains(&self, id: ItemId) -> bool {
        self.get(id).is_some()
    }

    fn ids(&self) -> BTreeSet<ItemId> {
        self.items().into_iter().map(QueueItem::id).collect()
    }
}

/// In-memory [`QueueStore`], newest items first.
#[derive(Debug, Clone, Default)]
pub struct Queue {
    items: Vec<QueueItem>,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn position(&self, id: ItemId) -> Option<usize> {
        self.items.iter().position(|i| i.id() == id)
    }
}

impl QueueStore for Queue {
    fn set_queue(&mut self, records: Vec<ItemRecord>) {
        self.items = records.into_iter().map(QueueItem::new).collect();
    }

    fn add_item(&mut self, record: ItemRecord) {
        match self.position(record.id) {
            Some(pos) => self.items[pos].record = record,
            None => self.items.insert(0, QueueItem::new(record)),
        }
    }

    fn update_item(&mut self, record: ItemRecord) -> bool {
        match self.position(record.id) {
            Some(pos) => {
                self.items[pos].record = record;
                true
            }
            None => false,
        }
    }

    fn set_flags(&mut self, id: ItemId, flags: ItemFlags) -> bool {
        match self.position(id) {
            Some(pos) => {
                self.items[pos].flags = flags;
                true
            }
            None => false,
        }
    }

    fn remove_items(&mut self, ids: &BTreeSet<ItemId>) -> usize {
        let before = self.items.len();
        self.items.retain(|i| !ids.contains(&i.id()));
        before - self.items.len()
    }

    fn get(&self, id: ItemId) -> Option<&QueueItem> {
        self.items.iter().find(|i| i.id() == id)
    }

    fn items(&self) -> Vec<&QueueItem> {
        self.items.iter().collect()
    }
}
