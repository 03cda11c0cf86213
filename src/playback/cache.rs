//! Title and episode-list cache owned by the coordinator
//!
//! Keyed by the provider's title id. Bounded: once full, the oldest inserted
//! title is evicted together with its episode lists.

use std::collections::{HashMap, VecDeque};

use crate::models::{Episode, Language, Title};

/// Default number of titles kept
pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct TitleCache {
    capacity: usize,
    titles: HashMap<String, Title>,
    episodes: HashMap<(String, Language), Vec<Episode>>,
    order: VecDeque<String>,
}

impl Default for TitleCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl TitleCache {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            titles: HashMap::new(),
            episodes: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Title> {
        self.titles.get(id)
    }

    /// Insert or refresh a title; refreshing keeps its original eviction slot
    pub fn insert(&mut self, title: Title) {
        if let Some(existing) = self.titles.get_mut(&title.id) {
            *existing = title;
            return;
        }

        while self.order.len() >= self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.titles.remove(&oldest);
            self.episodes.retain(|(id, _), _| id != &oldest);
        }

        self.order.push_back(title.id.clone());
        self.titles.insert(title.id.clone(), title);
    }

    pub fn extend(&mut self, titles: impl IntoIterator<Item = Title>) {
        for title in titles {
            self.insert(title);
        }
    }

    pub fn episodes(&self, id: &str, language: Language) -> Option<&[Episode]> {
        self.episodes
            .get(&(id.to_string(), language))
            .map(Vec::as_slice)
    }

    /// Cache an episode list; ignored for titles not in the cache
    pub fn set_episodes(&mut self, id: &str, language: Language, episodes: Vec<Episode>) {
        if self.titles.contains_key(id) {
            self.episodes.insert((id.to_string(), language), episodes);
        }
    }

    pub fn len(&self) -> usize {
        self.titles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut cache = TitleCache::default();
        cache.insert(Title::new("a1", "Show"));
        assert_eq!(cache.get("a1").map(|t| t.name.as_str()), Some("Show"));
        assert!(cache.get("missing").is_none());
    }

    #[test]
    fn test_evicts_oldest_inserted() {
        let mut cache = TitleCache::with_capacity(2);
        cache.insert(Title::new("a", "A"));
        cache.set_episodes("a", Language::Sub, vec![Episode::from(1)]);
        cache.insert(Title::new("b", "B"));
        // Refresh does not move "a" to the back
        cache.insert(Title::new("a", "A2"));
        cache.insert(Title::new("c", "C"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert!(cache.episodes("a", Language::Sub).is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_episodes_per_language() {
        let mut cache = TitleCache::default();
        cache.insert(Title::new("a", "A"));
        cache.set_episodes("a", Language::Sub, vec![Episode::from(1), Episode::from(2)]);

        assert_eq!(cache.episodes("a", Language::Sub).map(<[_]>::len), Some(2));
        assert!(cache.episodes("a", Language::Dub).is_none());

        cache.set_episodes("unknown", Language::Sub, vec![Episode::from(1)]);
        assert!(cache.episodes("unknown", Language::Sub).is_none());
    }
}
