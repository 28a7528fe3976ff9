//! Named-slot blob storage backing the alarm store.
//!
//! Each slot holds one serialized collection. Writes replace the whole slot,
//! so a reader never sees half of a collection.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;

pub trait SlotStorage: Send {
    /// Returns `Ok(None)` when nothing has been written to the slot.
    fn read_slot(&self, slot: &str) -> io::Result<Option<String>>;
    fn write_slot(&mut self, slot: &str, blob: &str) -> io::Result<()>;
    /// Removing a missing slot is not an error.
    fn remove_slot(&mut self, slot: &str) -> io::Result<()>;
}

/// Stores each slot as `<data_dir>/<slot>.json`.
pub struct FileSlotStorage {
    data_dir: PathBuf,
}

impl FileSlotStorage {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    fn slot_path(&self, slot: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", slot))
    }
}

impl SlotStorage for FileSlotStorage {
    fn read_slot(&self, slot: &str) -> io::Result<Option<String>> {
        match fs::read_to_string(self.slot_path(slot)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write_slot(&mut self, slot: &str, blob: &str) -> io::Result<()> {
        // Ensure directory exists
        fs::create_dir_all(&self.data_dir)?;

        let path = self.slot_path(slot);
        let tmp = self.data_dir.join(format!(".{}.json.tmp", slot));
        fs::write(&tmp, blob)?;
        fs::rename(&tmp, &path)
    }

    fn remove_slot(&mut self, slot: &str) -> io::Result<()> {
        match fs::remove_file(self.slot_path(slot)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// In-process storage, lost when dropped.
#[derive(Default)]
pub struct MemorySlotStorage {
    slots: HashMap<String, String>,
}

impl MemorySlotStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SlotStorage for MemorySlotStorage {
    fn read_slot(&self, slot: &str) -> io::Result<Option<String>> {
        Ok(self.slots.get(slot).cloned())
    }

    fn write_slot(&mut self, slot: &str, blob: &str) -> io::Result<()> {
        self.slots.insert(slot.to_string(), blob.to_string());
        Ok(())
    }

    fn remove_slot(&mut self, slot: &str) -> io::Result<()> {
        self.slots.remove(slot);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Slots that should fail on their next write or removal.
    #[derive(Default)]
    pub struct Faults {
        pub fail_writes: Vec<&'static str>,
        pub fail_remove_once: Option<&'static str>,
    }

    /// Memory storage that fails on the slots named in its shared [`Faults`].
    #[derive(Default)]
    pub struct FlakyStorage {
        inner: MemorySlotStorage,
        pub faults: Arc<Mutex<Faults>>,
    }

    fn injected(slot: &str) -> io::Error {
        io::Error::new(io::ErrorKind::Other, format!("write to {} failed", slot))
    }

    impl SlotStorage for FlakyStorage {
        fn read_slot(&self, slot: &str) -> io::Result<Option<String>> {
            self.inner.read_slot(slot)
        }

        fn write_slot(&mut self, slot: &str, blob: &str) -> io::Result<()> {
            if self.faults.lock().unwrap().fail_writes.contains(&slot) {
                return Err(injected(slot));
            }
            self.inner.write_slot(slot, blob)
        }

        fn remove_slot(&mut self, slot: &str) -> io::Result<()> {
            let mut faults = self.faults.lock().unwrap();
            if faults.fail_remove_once == Some(slot) {
                faults.fail_remove_once = None;
                return Err(injected(slot));
            }
            self.inner.remove_slot(slot)
        }
    }
}
