//! Bidirectional tag index.
//!
//! Tracks which cache keys carry which tags so that a tag eviction can find
//! every affected entry without scanning the store.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::RwLock;

use super::keys::{CacheKey, Tag};
use super::lock::{rw_read, rw_write};

#[derive(Default)]
struct Maps {
    tag_to_keys: HashMap<Tag, HashSet<CacheKey>>,
    key_to_tags: HashMap<CacheKey, BTreeSet<Tag>>,
}

impl Maps {
    fn detach(&mut self, key: &CacheKey) -> Option<BTreeSet<Tag>> {
        let tags = self.key_to_tags.remove(key)?;
        for tag in &tags {
            if let Some(keys) = self.tag_to_keys.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tag_to_keys.remove(tag);
                }
            }
        }
        Some(tags)
    }
}

/// Tracks tag → keys and key → tags.
///
/// Both directions sit behind one lock so that a reader never observes a key
/// listed under a tag it no longer carries.
pub struct TagIndex {
    store: &'static str,
    maps: RwLock<Maps>,
}

impl TagIndex {
    pub fn new(store: &'static str) -> Self {
        Self {
            store,
            maps: RwLock::new(Maps::default()),
        }
    }

    /// Associate `key` with `tags`, replacing whatever it carried before.
    pub fn tag(&self, key: CacheKey, tags: &BTreeSet<Tag>) {
        let mut maps = rw_write(&self.maps, self.store, "tag");
        maps.detach(&key);
        for tag in tags {
            maps.tag_to_keys
                .entry(tag.clone())
                .or_default()
                .insert(key.clone());
        }
        maps.key_to_tags.insert(key, tags.clone());
    }

    pub fn keys_for_tag(&self, tag: &Tag) -> HashSet<CacheKey> {
        rw_read(&self.maps, self.store, "keys_for_tag")
            .tag_to_keys
            .get(tag)
            .cloned()
            .unwrap_or_default()
    }

    /// Drop `key` from the index, returning the tags it carried.
    pub fn untag(&self, key: &CacheKey) -> BTreeSet<Tag> {
        rw_write(&self.maps, self.store, "untag")
            .detach(key)
            .unwrap_or_default()
    }

    /// Remove every key carrying any of `tags` and return those keys.
    pub fn take_tagged<'a>(&self, tags: impl IntoIterator<Item = &'a Tag>) -> HashSet<CacheKey> {
        let mut maps = rw_write(&self.maps, self.store, "take_tagged");
        let affected: HashSet<CacheKey> = tags
            .into_iter()
            .filter_map(|tag| maps.tag_to_keys.get(tag))
            .flat_map(|keys| keys.iter().cloned())
            .collect();
        for key in &affected {
            maps.detach(key);
        }
        affected
    }

    pub fn key_count(&self) -> usize {
        rw_read(&self.maps, self.store, "key_count").key_to_tags.len()
    }
}
