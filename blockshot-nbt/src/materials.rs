use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::VoxelModel;

/// Occurrence count per block name across a whole model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaterialTally(BTreeMap<String, u64>);

impl MaterialTally {
    pub fn from_model(model: &VoxelModel) -> Self {
        let mut counts = BTreeMap::new();
        for (_, block) in model.blocks() {
            *counts.entry(block.name.clone()).or_insert(0) += 1;
        }
        Self(counts)
    }

    pub fn get(&self, name: &str) -> Option<u64> {
        self.0.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(k, &v)| (k.as_str(), v))
    }

    /// Manifest form: pretty-printed JSON object.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// `name,count` lines, most used first.
    pub fn to_csv(&self) -> String {
        let mut rows: Vec<(&str, u64)> = self.iter().collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        rows.iter()
            .map(|(name, count)| format!("{name},{count}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
