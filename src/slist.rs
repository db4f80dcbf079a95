//! Array-backed key-value storage.
//!
//! Insertion is O(1), lookup by index is O(1), lookup by key is O(N).
//! Usable for small-ish datasets only, such as the connection-id table.

pub struct SimpleList<K, V> {
    keys: Vec<K>,
    values: Vec<V>,
}

impl<K, V> SimpleList<K, V> {
    pub fn new() -> SimpleList<K, V> {
        SimpleList::with_capacity(32)
    }

    pub fn with_capacity(capacity: usize) -> SimpleList<K, V> {
        SimpleList {
            keys: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn clear(&mut self) {
        self.keys.clear();
        self.values.clear();
    }

    /// Insert a new element, returning its index.
    /// Duplicate keys are not detected; the first inserted entry wins lookups.
    pub fn put(&mut self, key: K, value: V) -> usize {
        self.keys.push(key);
        self.values.push(value);
        self.keys.len() - 1
    }

    /// Index of the first entry whose key satisfies the predicate.
    pub fn find(&self, mut pred: impl FnMut(&K) -> bool) -> Option<usize> {
        self.keys.iter().position(|k| pred(k))
    }

    pub fn key(&self, index: usize) -> &K {
        &self.keys[index]
    }

    pub fn key_mut(&mut self, index: usize) -> &mut K {
        &mut self.keys[index]
    }

    pub fn value(&self, index: usize) -> &V {
        &self.values[index]
    }

    pub fn value_mut(&mut self, index: usize) -> &mut V {
        &mut self.values[index]
    }
}

impl<K, V> Default for SimpleList<K, V> {
    fn default() -> Self {
        SimpleList::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_and_find() {
        let mut list: SimpleList<&str, u32> = SimpleList::new();
        assert!(list.is_empty());

        let a = list.put("foo", 1);
        let b = list.put("bar", 2);
        assert_eq!(list.len(), 2);

        assert_eq!(list.find(|k| *k == "foo"), Some(a));
        assert_eq!(list.find(|k| *k == "bar"), Some(b));
        assert_eq!(list.find(|k| *k == "baz"), None);
        assert_eq!(*list.value(b), 2);
    }

    #[test]
    fn mutate_in_place() {
        let mut list: SimpleList<u32, u32> = SimpleList::new();
        let idx = list.put(7, 0);
        *list.value_mut(idx) = 42;
        *list.key_mut(idx) = 8;
        assert_eq!(list.find(|k| *k == 8), Some(idx));
        assert_eq!(*list.value(idx), 42);
    }

    #[test]
    fn duplicate_keys_first_wins() {
        let mut list: SimpleList<u32, &str> = SimpleList::new();
        let first = list.put(1, "first");
        list.put(1, "second");
        assert_eq!(list.find(|k| *k == 1), Some(first));
    }

    #[test]
    fn clear_resets() {
        let mut list: SimpleList<u32, u32> = SimpleList::new();
        list.put(1, 1);
        list.clear();
        assert!(list.is_empty());
        assert_eq!(list.find(|k| *k == 1), None);
    }
}
