use std::collections::BTreeMap;

use crate::primitives::bytes::{PageSink, PageSource};
use crate::types::Result;

/// Dictionary of interned names, keyed by their hash.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NamePage {
    names: BTreeMap<i32, String>,
}

impl NamePage {
    /// Name registered under `key`.
    pub fn name(&self, key: i32) -> Option<&str> {
        self.names.get(&key).map(String::as_str)
    }

    /// Number of registered names.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True if no name was registered.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Registers `name`, probing linearly from `hash` until a free key or
    /// the same name is found.
    pub(crate) fn intern(&mut self, hash: i32, name: &str) -> i32 {
        let mut key = hash;
        loop {
            match self.names.get(&key) {
                Some(existing) if existing == name => return key,
                Some(_) => key = key.wrapping_add(1),
                None => {
                    self.names.insert(key, name.to_owned());
                    return key;
                }
            }
        }
    }

    pub(crate) fn serialize_body(&self, sink: &mut PageSink) -> Result<()> {
        sink.put_i32(self.names.len() as i32);
        for (key, name) in &self.names {
            sink.put_i32(*key);
            sink.put_str(name)?;
        }
        Ok(())
    }

    pub(crate) fn deserialize_body(source: &mut PageSource<'_>) -> Result<Self> {
        let count = source.get_len()?;
        let mut names = BTreeMap::new();
        for _ in 0..count {
            let key = source.get_i32()?;
            names.insert(key, source.get_string()?);
        }
        Ok(Self { names })
    }
}

/// Free-form string metadata attached to a revision.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetaPage {
    entries: BTreeMap<String, String>,
}

impl MetaPage {
    /// Value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Iterates entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub(crate) fn set(&mut self, key: &str, value: &str) -> Option<String> {
        self.entries.insert(key.to_owned(), value.to_owned())
    }

    pub(crate) fn serialize_body(&self, sink: &mut PageSink) -> Result<()> {
        sink.put_i32(self.entries.len() as i32);
        for (key, value) in &self.entries {
            sink.put_str(key)?;
            sink.put_str(value)?;
        }
        Ok(())
    }

    pub(crate) fn deserialize_body(source: &mut PageSource<'_>) -> Result<Self> {
        let count = source.get_len()?;
        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let key = source.get_string()?;
            entries.insert(key, source.get_string()?);
        }
        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colliding_names_probe_to_the_next_free_key() {
        let mut page = NamePage::default();
        assert_eq!(page.intern(7, "alpha"), 7);
        assert_eq!(page.intern(7, "beta"), 8);
        assert_eq!(page.intern(7, "alpha"), 7);
        assert_eq!(page.intern(7, "beta"), 8);
        assert_eq!(page.name(8), Some("beta"));
        assert_eq!(page.len(), 2);
    }

    #[test]
    fn probing_wraps_at_i32_max() {
        let mut page = NamePage::default();
        page.intern(i32::MAX, "a");
        assert_eq!(page.intern(i32::MAX, "b"), i32::MIN);
    }
}
