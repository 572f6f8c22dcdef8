//! Durable directory-backed store.
//!
//! Layout: `<root>/<domain>/<family>.d/<entry>`, one file per key. The family
//! is the key up to its first `.`; the entry is `=` followed by the rest of
//! the key, or `!` for a key without a `.`. Prefix scans that name a family
//! only list that family's directory, so scanning the index never walks the
//! stored rows.
//!
//! Writes go to a temporary file in the same directory followed by an atomic
//! rename, so a crash leaves either the old or the new value, never a torn
//! one. Key parts are escaped so any string is a valid file name: bytes
//! outside `[A-Za-z0-9._-]` become `%XX`. Temporary files start with `~` and
//! are ignored by scans.
//!
//! One process at a time owns a store directory: [`DirStore::open`] takes an
//! exclusive advisory lock on `<root>/.lock` and holds it until the store is
//! dropped.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::Store;

const TEMP_PREFIX: char = '~';
const FAMILY_SUFFIX: &str = ".d";
const ENTRY_PREFIX: char = '=';
const BARE_ENTRY: &str = "!";
const LOCK_FILE: &str = ".lock";
const LOCK_POLL: Duration = Duration::from_millis(10);

/// How long [`DirStore::open`] waits for another process to release the
/// directory.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// One-file-per-key store rooted at a directory.
#[derive(Debug)]
pub struct DirStore {
    root: PathBuf,
    temp_seq: AtomicU64,
    _lock: DirLock,
}

impl DirStore {
    /// Open (creating if needed) a store at `root`, waiting up to
    /// [`DEFAULT_LOCK_TIMEOUT`] for the directory lock.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        Self::open_with_timeout(root, DEFAULT_LOCK_TIMEOUT)
    }

    /// Open a store, failing with [`StoreError::Locked`] if the directory
    /// lock is still held after `timeout`.
    pub fn open_with_timeout(root: impl Into<PathBuf>, timeout: Duration) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, e))?;
        let lock = DirLock::acquire(&root.join(LOCK_FILE), timeout)?;
        debug!(root = %root.display(), "opened directory store");
        Ok(Self {
            root,
            temp_seq: AtomicU64::new(0),
            _lock: lock,
        })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn domain_dir(&self, domain: &str) -> StoreResult<PathBuf> {
        if domain.is_empty()
            || !domain
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Err(StoreError::InvalidDomain(domain.to_string()));
        }
        Ok(self.root.join(domain))
    }

    fn key_path(&self, domain: &str, key: &str) -> StoreResult<PathBuf> {
        let (family, entry) = split_key(key);
        Ok(self.domain_dir(domain)?.join(family).join(entry))
    }

    // Keys stored in one family directory, unfiltered.
    fn family_keys(&self, dir: &Path, family: &str) -> StoreResult<Vec<String>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(dir, e)),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(dir, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with(TEMP_PREFIX) {
                continue;
            }
            match join_key(family, name) {
                Some(key) => keys.push(key),
                None => warn!(file = %name, "ignoring foreign file in store directory"),
            }
        }
        Ok(keys)
    }
}

/// Exclusive advisory lock on a file, released on drop. The file is left in
/// place.
#[derive(Debug)]
struct DirLock {
    file: File,
}

impl DirLock {
    fn acquire(path: &Path, timeout: Duration) -> StoreResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| StoreError::io(path, e))?;

        let deadline = Instant::now() + timeout;
        loop {
            match try_lock(&file) {
                Ok(true) => break,
                Ok(false) if Instant::now() < deadline => std::thread::sleep(LOCK_POLL),
                Ok(false) => return Err(StoreError::Locked(path.to_path_buf())),
                Err(e) => return Err(StoreError::io(path, e)),
            }
        }

        file.set_len(0).map_err(|e| StoreError::io(path, e))?;
        let mut writer = &file;
        let _ = writer.write_all(std::process::id().to_string().as_bytes());
        let _ = writer.flush();
        Ok(Self { file })
    }
}

#[cfg(unix)]
fn try_lock(file: &File) -> std::io::Result<bool> {
    use std::os::unix::io::AsRawFd;
    // SAFETY: the descriptor is owned by `file` and open for the call.
    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if result == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.kind() == ErrorKind::WouldBlock {
        Ok(false)
    } else {
        Err(err)
    }
}

#[cfg(not(unix))]
fn try_lock(_file: &File) -> std::io::Result<bool> {
    Ok(true)
}

impl Drop for DirLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            // SAFETY: the descriptor is still owned by `self.file`.
            unsafe {
                libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
            }
        }
    }
}

fn is_plain(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-'
}

/// Escape a key part into a file name fragment.
pub(crate) fn escape_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for &b in key.as_bytes() {
        if is_plain(b) {
            out.push(b as char);
        } else {
            out.push('%');
            out.push_str(&hex::encode_upper([b]));
        }
    }
    out
}

/// Reverse [`escape_key`]. Returns `None` for names the store did not write.
pub(crate) fn unescape_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let pair = name.get(i + 1..i + 3)?;
            let decoded = hex::decode(pair).ok()?;
            out.extend_from_slice(&decoded);
            i += 3;
        } else if is_plain(bytes[i]) {
            out.push(bytes[i]);
            i += 1;
        } else {
            return None;
        }
    }
    String::from_utf8(out).ok()
}

/// Family directory and entry file name for a key.
pub(crate) fn split_key(key: &str) -> (String, String) {
    match key.split_once('.') {
        Some((family, rest)) => (
            family_dir(family),
            format!("{}{}", ENTRY_PREFIX, escape_key(rest)),
        ),
        None => (family_dir(key), BARE_ENTRY.to_string()),
    }
}

fn family_dir(family: &str) -> String {
    format!("{}{}", escape_key(family), FAMILY_SUFFIX)
}

/// Reverse [`split_key`] given the unescaped family and an entry file name.
pub(crate) fn join_key(family: &str, entry: &str) -> Option<String> {
    if entry == BARE_ENTRY {
        return Some(family.to_string());
    }
    let rest = unescape_key(entry.strip_prefix(ENTRY_PREFIX)?)?;
    Some(format!("{}.{}", family, rest))
}

impl Store for DirStore {
    fn get(&self, domain: &str, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let path = self.key_path(domain, key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    fn put(&self, domain: &str, key: &str, value: &[u8]) -> StoreResult<()> {
        let (family, entry) = split_key(key);
        let dir = self.domain_dir(domain)?.join(family);
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        let path = dir.join(entry);
        let seq = self.temp_seq.fetch_add(1, Ordering::Relaxed);
        let temp_path = dir.join(format!(
            "{}{}.{}.tmp",
            TEMP_PREFIX,
            std::process::id(),
            seq
        ));

        let write = || -> std::io::Result<()> {
            let mut file = File::create(&temp_path)?;
            file.write_all(value)?;
            file.sync_all()?;
            fs::rename(&temp_path, &path)
        };
        if let Err(e) = write() {
            let _ = fs::remove_file(&temp_path);
            return Err(StoreError::io(path, e));
        }
        Ok(())
    }

    fn delete(&self, domain: &str, key: &str) -> StoreResult<()> {
        let path = self.key_path(domain, key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    fn scan_keys(&self, domain: &str, prefix: &str, limit: usize) -> StoreResult<Vec<String>> {
        let domain_dir = self.domain_dir(domain)?;

        let mut keys = match prefix.split_once('.') {
            Some((family, _)) => {
                let dir = domain_dir.join(family_dir(family));
                self.family_keys(&dir, family)?
            }
            None => {
                let entries = match fs::read_dir(&domain_dir) {
                    Ok(entries) => entries,
                    Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
                    Err(e) => return Err(StoreError::io(domain_dir, e)),
                };
                let mut keys = Vec::new();
                for entry in entries {
                    let entry = entry.map_err(|e| StoreError::io(&domain_dir, e))?;
                    let name = entry.file_name();
                    let family = name
                        .to_str()
                        .and_then(|n| n.strip_suffix(FAMILY_SUFFIX))
                        .and_then(unescape_key);
                    match family {
                        Some(family) if family.starts_with(prefix) => {
                            keys.extend(self.family_keys(&entry.path(), &family)?);
                        }
                        Some(_) => {}
                        None => warn!(
                            file = ?name,
                            "ignoring foreign entry in store directory"
                        ),
                    }
                }
                keys
            }
        };

        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        if limit > 0 {
            keys.truncate(limit);
        }
        Ok(keys)
    }
}
