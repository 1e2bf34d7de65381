use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(u32);

impl From<u32> for KeyId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Maps label names and values to compact ids so series keys stay small.
#[derive(Default, Debug)]
pub struct Interner {
    map: RwLock<HashMap<Arc<str>, u32>>,
    vec: RwLock<Vec<Arc<str>>>,
}

impl Interner {
    pub fn get_or_intern(&self, s: &str) -> KeyId {
        {
            let map = self.map.read();
            if let Some(&id) = map.get(s) {
                return KeyId(id);
            }
        }

        let mut map = self.map.write();
        let mut vec = self.vec.write();

        // Another writer may have interned it between the two locks.
        if let Some(&id) = map.get(s) {
            return KeyId(id);
        }

        let id = u32::try_from(vec.len()).unwrap_or(u32::MAX);
        let s: Arc<str> = Arc::from(s);
        vec.push(s.clone());
        map.insert(s, id);

        KeyId(id)
    }

    /// Looks up an existing id without interning.
    pub fn get(&self, s: &str) -> Option<KeyId> {
        self.map.read().get(s).copied().map(KeyId)
    }

    pub fn resolve(&self, id: KeyId) -> Option<Arc<str>> {
        let vec = self.vec.read();
        vec.get(id.0 as usize).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interner_returns_same_id_for_same_string() {
        let interner = Interner::default();
        let a = interner.get_or_intern("10.0.0.1");
        let b = interner.get_or_intern("p99");
        let c = interner.get_or_intern("10.0.0.1");

        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(interner.get("p99"), Some(b));
        assert_eq!(interner.get("missing"), None);
        assert_eq!(interner.resolve(b).as_deref(), Some("p99"));
    }
}
