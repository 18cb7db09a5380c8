use std::collections::HashMap;
use std::sync::Arc;

/// Live page instances by name.
#[derive(Debug)]
pub struct PageRegistry<V> {
    pages: HashMap<String, Arc<V>>,
}

impl<V> Default for PageRegistry<V> {
    fn default() -> Self {
        Self {
            pages: HashMap::new(),
        }
    }
}

impl<V> PageRegistry<V> {
    pub fn get(&self, name: &str) -> Option<Arc<V>> {
        self.pages.get(name).cloned()
    }

    #[cfg(test)]
    pub fn contains(&self, name: &str) -> bool {
        self.pages.contains_key(name)
    }

    pub fn insert(&mut self, name: &str, view: Arc<V>) -> Option<Arc<V>> {
        self.pages.insert(name.to_string(), view)
    }

    /// Returns the page and whether it was created by this call.
    pub fn get_or_create<F>(&mut self, name: &str, create: F) -> Option<(Arc<V>, bool)>
    where
        F: FnOnce(&str) -> Option<Arc<V>>,
    {
        if let Some(view) = self.pages.get(name) {
            return Some((view.clone(), false));
        }

        let view = create(name)?;
        self.pages.insert(name.to_string(), view.clone());
        Some((view, true))
    }

    pub fn clear(&mut self) -> usize {
        let dropped = self.pages.len();
        self.pages.clear();
        dropped
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.pages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::PageRegistry;
    use std::sync::Arc;

    #[test]
    fn pages_are_created_once_and_reused() {
        let mut registry = PageRegistry::<String>::default();
        let mut created = 0;

        for _ in 0..3 {
            let (view, _) = registry
                .get_or_create("pods", |name| {
                    created += 1;
                    Some(Arc::new(name.to_uppercase()))
                })
                .expect("page");
            assert_eq!(view.as_str(), "PODS");
        }

        assert_eq!(created, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn failed_creation_registers_nothing() {
        let mut registry = PageRegistry::<String>::default();
        assert!(registry.get_or_create("bogus", |_| None).is_none());
        assert!(!registry.contains("bogus"));
    }

    #[test]
    fn clear_tears_down_every_page() {
        let mut registry = PageRegistry::default();
        registry.insert("pods", Arc::new(1));
        registry.insert("nodes", Arc::new(2));

        assert_eq!(registry.clear(), 2);
        assert!(registry.get("pods").is_none());
    }
}
