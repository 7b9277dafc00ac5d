//! Local filesystem back-end (C7).
//!
//! Upload writes to `<path>.pending`, applies xattrs under the `user.grid.`
//! namespace, then atomically renames onto `<path>` on Commit. Download
//! reads with a bounded buffer. Removal is `stat` then `unlink`.

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write as _};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use blob_types::{Cause, Config, Slice, Status};
use log::{debug, trace, warn};
use nix::sys::stat::Mode;
use proxmox_sys::fs::{create_path, CreateOptions};

use crate::transaction::{Download, Removal, Upload};
use crate::TxState;

fn pending_path(path: &Path) -> PathBuf {
    let mut pending = path.as_os_str().to_owned();
    pending.push(".pending");
    PathBuf::from(pending)
}

fn io_error_to_status(err: &std::io::Error) -> Status {
    match err.kind() {
        ErrorKind::NotFound => Status::new(Cause::NotFound),
        ErrorKind::AlreadyExists => Status::new(Cause::Already),
        ErrorKind::PermissionDenied => Status::new(Cause::Forbidden),
        _ => Status::with_message(Cause::InternalError, err.to_string()),
    }
}

/// `Upload` implementation writing a single file to the local filesystem.
pub struct LocalUpload {
    path: PathBuf,
    config: Config,
    state: TxState,
    file: Option<File>,
    xattrs: Vec<(String, Vec<u8>)>,
}

impl LocalUpload {
    pub fn new(path: impl Into<PathBuf>, config: Config) -> Self {
        Self {
            path: path.into(),
            config,
            state: TxState::default(),
            file: None,
            xattrs: Vec::new(),
        }
    }

    fn ensure_parent_dir(&self) -> Result<(), Status> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                let mode = Mode::from_bits_truncate(self.config.dir_mode);
                create_path(parent, Some(CreateOptions::new().perm(mode)), Some(CreateOptions::new().perm(mode)))
                    .map_err(|err| Status::with_message(Cause::InternalError, err.to_string()))?;
            }
        }
        Ok(())
    }
}

impl Upload for LocalUpload {
    fn set_xattr(&mut self, key: &str, value: &[u8]) -> Status {
        if self.state.require_init().is_err() {
            return Status::new(Cause::InternalError);
        }
        self.xattrs.push((key.to_string(), value.to_vec()));
        Status::ok()
    }

    fn prepare(&mut self) -> Status {
        if let Err(s) = self.state.prepare() {
            return s;
        }
        debug!("local upload prepare: {}", self.path.display());

        if let Err(s) = self.ensure_parent_dir() {
            return s;
        }

        let pending = pending_path(&self.path);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode_or_default(self.config.file_mode)
            .open(&pending)
        {
            Ok(file) => {
                self.file = Some(file);
                Status::ok()
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Status::new(Cause::Already),
            Err(err) => io_error_to_status(&err),
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Status {
        if self.state.require_prepared().is_err() {
            return Status::new(Cause::InternalError);
        }
        trace!("local upload write {} bytes", bytes.len());
        let file = self.file.as_mut().expect("file set in prepare");
        match file.write_all(bytes) {
            Ok(()) => Status::ok(),
            Err(err) => io_error_to_status(&err),
        }
    }

    fn commit(&mut self) -> Status {
        if let Err(s) = self.state.finish() {
            return s;
        }

        let file = self.file.as_ref().expect("file set in prepare");
        for (key, value) in &self.xattrs {
            let name = blob_tools::xattr::grid_xattr_name(key);
            let cname = match CString::new(&name[..name.len() - 1]) {
                Ok(c) => c,
                Err(_) => return Status::new(Cause::InternalError),
            };
            if let Err(err) = blob_tools::xattr::fsetxattr(file.as_raw_fd(), &cname, value) {
                return Status::with_message(Cause::InternalError, err.to_string());
            }
        }

        let pending = pending_path(&self.path);
        match std::fs::rename(&pending, &self.path) {
            Ok(()) => {
                debug!("local upload commit: {}", self.path.display());
                Status::ok()
            }
            Err(err) => io_error_to_status(&err),
        }
    }

    fn abort(&mut self) -> Status {
        if let Err(s) = self.state.finish() {
            return s;
        }
        self.file = None;
        let pending = pending_path(&self.path);
        match std::fs::remove_file(&pending) {
            Ok(()) | Err(_) => {
                warn!("local upload abort: {}", self.path.display());
                Status::ok()
            }
        }
    }
}

impl Drop for LocalUpload {
    fn drop(&mut self) {
        if self.state.is_prepared() {
            let _ = self.abort();
        }
    }
}

/// Small helper trait so `OpenOptions` can carry a mode without pulling in
/// the full `unix::fs::OpenOptionsExt` name at every call site.
trait OpenOptionsModeExt {
    fn mode_or_default(self, mode: u32) -> Self;
}

impl OpenOptionsModeExt for OpenOptions {
    fn mode_or_default(mut self, mode: u32) -> Self {
        use std::os::unix::fs::OpenOptionsExt;
        self.mode(mode);
        self
    }
}

/// `Download` implementation reading a single file from the local
/// filesystem with a bounded-size buffer.
pub struct LocalDownload {
    path: PathBuf,
    config: Config,
    state: TxState,
    file: Option<File>,
    eof: bool,
    range: Option<(u64, u64)>,
    remaining: Option<u64>,
}

impl LocalDownload {
    pub fn new(path: impl Into<PathBuf>, config: Config) -> Self {
        Self {
            path: path.into(),
            config,
            state: TxState::default(),
            file: None,
            eof: false,
            range: None,
            remaining: None,
        }
    }
}

impl Download for LocalDownload {
    fn set_range(&mut self, offset: u64, size: u64) -> Status {
        if self.state.require_init().is_err() {
            return Status::new(Cause::InternalError);
        }
        self.range = Some((offset, size));
        Status::ok()
    }

    fn prepare(&mut self) -> Status {
        if let Err(s) = self.state.prepare() {
            return s;
        }
        debug!("local download prepare: {}", self.path.display());
        match File::open(&self.path) {
            Ok(mut file) => {
                if let Some((offset, size)) = self.range {
                    use std::io::Seek;
                    if let Err(err) = file.seek(std::io::SeekFrom::Start(offset)) {
                        return io_error_to_status(&err);
                    }
                    if size != 0 {
                        self.remaining = Some(size);
                    }
                }
                self.file = Some(file);
                Status::ok()
            }
            Err(err) => io_error_to_status(&err),
        }
    }

    fn is_eof(&self) -> bool {
        self.eof
    }

    fn read(&mut self, slice: &mut Slice) -> Status {
        if self.state.require_prepared().is_err() {
            return Status::new(Cause::InternalError);
        }
        if self.remaining == Some(0) {
            self.eof = true;
            return Status::ok();
        }
        let file = self.file.as_mut().expect("file set in prepare");
        let want = self
            .remaining
            .map(|r| r.min(self.config.local_read_buffer as u64) as usize)
            .unwrap_or(self.config.local_read_buffer);

        let mut buf = vec![0u8; want];
        loop {
            match file.read(&mut buf) {
                Ok(0) => {
                    self.eof = true;
                    return Status::ok();
                }
                Ok(n) => {
                    trace!("local download read {} bytes", n);
                    slice.append(&buf[..n]);
                    if let Some(remaining) = self.remaining.as_mut() {
                        *remaining -= n as u64;
                    }
                    return Status::ok();
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return io_error_to_status(&err),
            }
        }
    }
}

/// `Removal` implementation deleting a single file from the local
/// filesystem.
pub struct LocalRemoval {
    path: PathBuf,
    state: TxState,
}

impl LocalRemoval {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: TxState::default(),
        }
    }
}

impl Removal for LocalRemoval {
    fn prepare(&mut self) -> Status {
        if let Err(s) = self.state.prepare() {
            return s;
        }
        match self.path.metadata() {
            Ok(_) => Status::ok(),
            Err(err) => io_error_to_status(&err),
        }
    }

    fn commit(&mut self) -> Status {
        if let Err(s) = self.state.finish() {
            return s;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => Status::ok(),
            Err(err) => io_error_to_status(&err),
        }
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
    fn upload_download_round_trip_with_xattr() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        let config = Config::default();

        let mut upload = LocalUpload::new(&path, config.clone());
        assert!(upload.set_xattr("grid-author", b"jfs").is_ok());
        assert!(upload.prepare().is_ok());
        assert!(upload.write(b"hello\n").is_ok());
        assert!(upload.commit().is_ok());

        let mut download = LocalDownload::new(&path, config);
        assert!(download.prepare().is_ok());
        let mut slice = Slice::new();
        assert!(download.read(&mut slice).is_ok());
        assert!(!download.is_eof());
        let mut tail = Slice::new();
        assert!(download.read(&mut tail).is_ok());
        assert!(download.is_eof());

        assert_eq!(slice.data(), b"hello\n");
    }

    #[test]
    fn second_concurrent_upload_sees_already() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        let config = Config::default();

        let mut first = LocalUpload::new(&path, config.clone());
        assert!(first.prepare().is_ok());

        let mut second = LocalUpload::new(&path, config);
        assert_eq!(second.prepare().cause(), Cause::Already);

        assert!(first.write(b"x").is_ok());
        assert!(first.commit().is_ok());
    }

    #[test]
    fn commit_after_abort_is_internal_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        let mut upload = LocalUpload::new(&path, Config::default());
        assert!(upload.prepare().is_ok());
        assert!(upload.abort().is_ok());
        assert_eq!(upload.commit().cause(), Cause::InternalError);
    }

    #[test]
    fn removal_of_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing");
        let mut removal = LocalRemoval::new(&path);
        assert_eq!(removal.prepare().cause(), Cause::NotFound);
    }
}
