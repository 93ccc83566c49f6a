//! Persistent intensity storage. The daemon depends only on the
//! small [`KeyValueStore`] trait; the bundled implementation is a
//! single-file JSON store, read whole and rewritten whole on every write —
//! proportionate to a store that only ever holds one key.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Fixed key under which the current intensity is persisted.
pub const INTENSITY_KEY: &str = "persist.vibrator_mode";

pub trait KeyValueStore: Send {
    fn get_u8(&self, key: &str) -> Option<u8>;
    fn set_u8(&mut self, key: &str, value: u8) -> io::Result<()>;
}

/// Single-file JSON-backed [`KeyValueStore`] (`serde_json`, already in this
/// repo's dependency family next to its existing `serde` use).
pub struct JsonStore {
    path: PathBuf,
    values: HashMap<String, u8>,
}

impl JsonStore {
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let values = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_default(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e),
        };
        Ok(JsonStore { path, values })
    }

    fn flush(&self) -> io::Result<()> {
        let serialized =
            serde_json::to_string(&self.values).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        if let Some(parent) = Path::new(&self.path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, serialized)
    }
}

impl KeyValueStore for JsonStore {
    fn get_u8(&self, key: &str) -> Option<u8> {
        self.values.get(key).copied()
    }

    fn set_u8(&mut self, key: &str, value: u8) -> io::Result<()> {
        self.values.insert(key.to_string(), value);
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_a_fresh_file() {
        let dir = std::env::temp_dir().join(format!("vibratord-test-{}", std::process::id()));
        let path = dir.join("store.json");
        {
            let mut store = JsonStore::open(&path).unwrap();
            assert_eq!(store.get_u8(INTENSITY_KEY), None);
            store.set_u8(INTENSITY_KEY, 2).unwrap();
        }
        let store = JsonStore::open(&path).unwrap();
        assert_eq!(store.get_u8(INTENSITY_KEY), Some(2));
        let _ = fs::remove_dir_all(&dir);
    }
}
