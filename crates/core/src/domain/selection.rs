use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::product::{OptionId, ValueId};

/// A partial or complete assignment of option to chosen value.
///
/// Keys are unique and iteration is ordered by option id, so anything derived
/// from a selection (breakdown lines, fingerprints) is deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Selection(BTreeMap<OptionId, ValueId>);

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        pairs
            .into_iter()
            .map(|(option_id, value_id)| (OptionId::from(option_id), ValueId::from(value_id)))
            .collect()
    }

    pub fn get(&self, option_id: &OptionId) -> Option<&ValueId> {
        self.0.get(option_id)
    }

    pub fn contains(&self, option_id: &OptionId) -> bool {
        self.0.contains_key(option_id)
    }

    pub fn insert(&mut self, option_id: OptionId, value_id: ValueId) -> Option<ValueId> {
        self.0.insert(option_id, value_id)
    }

    pub fn remove(&mut self, option_id: &OptionId) -> Option<ValueId> {
        self.0.remove(option_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OptionId, &ValueId)> {
        self.0.iter()
    }

    pub fn option_ids(&self) -> impl Iterator<Item = &OptionId> {
        self.0.keys()
    }

    /// True when every pair in `required` is present with an equal value.
    /// A missing key never matches.
    pub fn matches_all(&self, required: &BTreeMap<OptionId, ValueId>) -> bool {
        required.iter().all(|(option_id, value_id)| self.0.get(option_id) == Some(value_id))
    }

    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (option_id, value_id) in &self.0 {
            hasher.update(option_id.0.as_bytes());
            hasher.update([0x1f]);
            hasher.update(value_id.0.as_bytes());
            hasher.update([0x1e]);
        }
        format!("sha256:{:x}", hasher.finalize())
    }

    pub fn into_inner(self) -> BTreeMap<OptionId, ValueId> {
        self.0
    }
}

impl FromIterator<(OptionId, ValueId)> for Selection {
    fn from_iter<T: IntoIterator<Item = (OptionId, ValueId)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<BTreeMap<OptionId, ValueId>> for Selection {
    fn from(value: BTreeMap<OptionId, ValueId>) -> Self {
        Self(value)
    }
}
