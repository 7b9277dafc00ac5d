//! In-memory back-end (C7): a shared cache used for tests and local
//! synthetic stores.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use blob_types::{Cause, Slice, Status};

use crate::transaction::{Download, Removal, Upload};
use crate::TxState;

#[derive(Debug, Clone, Default)]
struct Entry {
    data: Vec<u8>,
    xattrs: HashMap<String, Vec<u8>>,
    pending: bool,
}

/// Shared store backing `MemoryUpload`/`MemoryDownload`/`MemoryRemoval`.
/// Clone freely; clones share the same underlying map.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        let map = self.inner.lock().unwrap();
        map.get(name).map(|e| !e.pending).unwrap_or(false)
    }
}

pub struct MemoryUpload {
    store: MemoryStore,
    name: String,
    state: TxState,
    buf: Vec<u8>,
    xattrs: HashMap<String, Vec<u8>>,
}

impl MemoryUpload {
    pub fn new(store: MemoryStore, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
            state: TxState::default(),
            buf: Vec::new(),
            xattrs: HashMap::new(),
        }
    }
}

impl Upload for MemoryUpload {
    fn set_xattr(&mut self, key: &str, value: &[u8]) -> Status {
        if self.state.require_init().is_err() {
            return Status::new(Cause::InternalError);
        }
        self.xattrs.insert(key.to_string(), value.to_vec());
        Status::ok()
    }

    fn prepare(&mut self) -> Status {
        if let Err(s) = self.state.prepare() {
            return s;
        }
        let mut map = self.store.inner.lock().unwrap();
        if map.contains_key(&self.name) {
            self.state = TxState::Done;
            return Status::new(Cause::Already);
        }
        map.insert(
            self.name.clone(),
            Entry {
                data: Vec::new(),
                xattrs: HashMap::new(),
                pending: true,
            },
        );
        Status::ok()
    }

    fn write(&mut self, bytes: &[u8]) -> Status {
        if self.state.require_prepared().is_err() {
            return Status::new(Cause::InternalError);
        }
        self.buf.extend_from_slice(bytes);
        Status::ok()
    }

    fn commit(&mut self) -> Status {
        if let Err(s) = self.state.finish() {
            return s;
        }
        let mut map = self.store.inner.lock().unwrap();
        map.insert(
            self.name.clone(),
            Entry {
                data: std::mem::take(&mut self.buf),
                xattrs: std::mem::take(&mut self.xattrs),
                pending: false,
            },
        );
        Status::ok()
    }

    fn abort(&mut self) -> Status {
        if let Err(s) = self.state.finish() {
            return s;
        }
        let mut map = self.store.inner.lock().unwrap();
        map.remove(&self.name);
        Status::ok()
    }
}

impl Drop for MemoryUpload {
    fn drop(&mut self) {
        if self.state.is_prepared() {
            let _ = self.abort();
        }
    }
}

pub struct MemoryDownload {
    store: MemoryStore,
    name: String,
    state: TxState,
    pos: usize,
    eof: bool,
}

impl MemoryDownload {
    pub fn new(store: MemoryStore, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
            state: TxState::default(),
            pos: 0,
            eof: false,
        }
    }
}

impl Download for MemoryDownload {
    fn set_range(&mut self, offset: u64, _size: u64) -> Status {
        if self.state.require_init().is_err() {
            return Status::new(Cause::InternalError);
        }
        self.pos = offset as usize;
        Status::ok()
    }

    fn prepare(&mut self) -> Status {
        if let Err(s) = self.state.prepare() {
            return s;
        }
        let map = self.store.inner.lock().unwrap();
        match map.get(&self.name) {
            Some(entry) if !entry.pending => Status::ok(),
            Some(_) => Status::new(Cause::NotFound),
            None => Status::new(Cause::NotFound),
        }
    }

    fn is_eof(&self) -> bool {
        self.eof
    }

    fn read(&mut self, slice: &mut Slice) -> Status {
        if self.state.require_prepared().is_err() {
            return Status::new(Cause::InternalError);
        }
        let map = self.store.inner.lock().unwrap();
        let entry = match map.get(&self.name) {
            Some(entry) => entry,
            None => return Status::new(Cause::NotFound),
        };
        if self.pos >= entry.data.len() {
            self.eof = true;
            return Status::ok();
        }
        slice.append(&entry.data[self.pos..]);
        self.pos = entry.data.len();
        Status::ok()
    }
}

pub struct MemoryRemoval {
    store: MemoryStore,
    name: String,
    state: TxState,
}

impl MemoryRemoval {
    pub fn new(store: MemoryStore, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
            state: TxState::default(),
        }
    }
}

impl Removal for MemoryRemoval {
    fn prepare(&mut self) -> Status {
        if let Err(s) = self.state.prepare() {
            return s;
        }
        let map = self.store.inner.lock().unwrap();
        if map.contains_key(&self.name) {
            Status::ok()
        } else {
            Status::new(Cause::NotFound)
        }
    }

    fn commit(&mut self) -> Status {
        if let Err(s) = self.state.finish() {
            return s;
        }
        let mut map = self.store.inner.lock().unwrap();
        map.remove(&self.name);
        Status::ok()
    }

    fn abort(&mut self) -> Status {
        if let Err(s) = self.state.finish() {
            return s;
        }
        Status::ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let store = MemoryStore::new();
        let mut upload = MemoryUpload::new(store.clone(), "c");
        assert!(upload.prepare().is_ok());
        assert!(upload.write(b"hello").is_ok());
        assert!(upload.commit().is_ok());
        assert!(store.contains("c"));

        let mut download = MemoryDownload::new(store, "c");
        assert!(download.prepare().is_ok());
        let mut slice = Slice::new();
        assert!(download.read(&mut slice).is_ok());
        assert_eq!(slice.data(), b"hello");
    }

    #[test]
    fn duplicate_prepare_is_already() {
        let store = MemoryStore::new();
        let mut first = MemoryUpload::new(store.clone(), "c");
        assert!(first.prepare().is_ok());
        let mut second = MemoryUpload::new(store, "c");
        assert_eq!(second.prepare().cause(), Cause::Already);
    }
}
