use serde::{Deserialize, Serialize};

use crate::server_description::TagSet;

/// Which replica-set members an operation may read from.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReadPreferenceMode {
    #[default]
    Primary,
    PrimaryPreferred,
    Secondary,
    SecondaryPreferred,
    Nearest,
}

/// A read mode plus an ordered list of tag sets.
///
/// Tag sets are tried in order and the first one matching any eligible member wins. An
/// empty tag set matches every member, so it is the usual last resort.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadPreference {
    pub mode: ReadPreferenceMode,
    pub tag_sets: Vec<TagSet>,
}

impl ReadPreference {
    pub fn new(mode: ReadPreferenceMode) -> Self {
        Self {
            mode,
            tag_sets: Vec::new(),
        }
    }

    pub fn primary() -> Self {
        Self::new(ReadPreferenceMode::Primary)
    }

    pub fn primary_preferred() -> Self {
        Self::new(ReadPreferenceMode::PrimaryPreferred)
    }

    pub fn secondary() -> Self {
        Self::new(ReadPreferenceMode::Secondary)
    }

    pub fn secondary_preferred() -> Self {
        Self::new(ReadPreferenceMode::SecondaryPreferred)
    }

    pub fn nearest() -> Self {
        Self::new(ReadPreferenceMode::Nearest)
    }

    pub fn with_tag_set<K, V, I>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.tag_sets.push(
            tags.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        );
        self
    }
}
