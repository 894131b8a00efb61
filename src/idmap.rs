use anyhow::Context;
use serde::{Deserialize, Serialize};

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// A bijection between strings and dense integer ids.
///
/// Ids are handed out 0, 1, 2, ... in insertion order and never reused, so
/// every id assigned while building an index stays valid for all later
/// reads. Only the arena of names is serialized; the reverse lookup table
/// is rebuilt on load, which keeps the on-disk form canonical.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct IdMap {
    names: Vec<String>,
    ids: HashMap<String, u32>,
}

impl IdMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id for `name`, allocating the next free id if the name
    /// has not been seen before. Idempotent.
    pub fn intern(&mut self, name: &str) -> u32 {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = self.names.len() as u32;
        self.names.push(name.to_string());
        self.ids.insert(name.to_string(), id);
        id
    }

    /// Looks up an existing id without allocating.
    pub fn get_id(&self, name: &str) -> Option<u32> {
        self.ids.get(name).copied()
    }

    /// Looks up the name an id was assigned to.
    pub fn name_of(&self, id: u32) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ids.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Serializes the map to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let mut writer = BufWriter::new(File::create(path).context("create id map file")?);
        bincode2::serialize_into(&mut writer, self).context("serialize id map")?;
        Ok(())
    }

    /// Loads a map previously written with [`IdMap::save`]. Ids come back
    /// identical to the ones handed out before saving.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut reader = BufReader::new(File::open(path).context("open id map file")?);
        let map = bincode2::deserialize_from(&mut reader).context("deserialize id map")?;
        Ok(map)
    }
}

impl From<Vec<String>> for IdMap {
    fn from(names: Vec<String>) -> Self {
        let ids = names
            .iter()
            .enumerate()
            .map(|(id, name)| (name.clone(), id as u32))
            .collect();
        Self { names, ids }
    }
}

impl From<IdMap> for Vec<String> {
    fn from(map: IdMap) -> Self {
        map.names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn intern_is_idempotent() {
        let mut map = IdMap::new();
        assert_eq!(map.intern("aspirin"), 0);
        assert_eq!(map.intern("ibuprofen"), 1);
        assert_eq!(map.intern("aspirin"), 0);
        assert_eq!(map.len(), 2);
        assert!(map.contains("ibuprofen"));
        assert_eq!(map.get_id("naproxen"), None);
        assert_eq!(map.name_of(1), Some("ibuprofen"));
        assert_eq!(map.name_of(2), None);
    }

    proptest! {
        #[test]
        fn save_load_preserves_bijection(names in proptest::collection::vec(".{0,12}", 0..50)) {
            let mut map = IdMap::new();
            for name in &names {
                map.intern(name);
            }

            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("terms.dict");
            map.save(&path).unwrap();
            let loaded = IdMap::load(&path).unwrap();

            prop_assert_eq!(loaded.len(), map.len());
            for name in &names {
                prop_assert_eq!(loaded.get_id(name), map.get_id(name));
            }
            for id in 0..map.len() as u32 {
                prop_assert_eq!(loaded.name_of(id), map.name_of(id));
            }
        }
    }
}
