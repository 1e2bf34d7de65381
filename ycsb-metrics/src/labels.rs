use crate::key::KeyId;
use smallvec::SmallVec;

/// Label values of one series, in the label-name order declared by its gauge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LabelValues {
    // Gauges here carry four labels; keep them inline.
    pub(crate) values: SmallVec<[KeyId; 4]>,
}

impl LabelValues {
    pub fn from_iter_ordered(iter: impl IntoIterator<Item = KeyId>) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = KeyId> + '_ {
        self.values.iter().copied()
    }

    pub fn get(&self, idx: usize) -> Option<KeyId> {
        self.values.get(idx).copied()
    }
}
