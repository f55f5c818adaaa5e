// Filesystem-backed queue storage: one directory per queue, one file per
// message. Entry names encode creation time in milliseconds, which is the
// delivery order; same-millisecond writers are disambiguated by a numeric
// suffix. Claims go through link(2) so a name is never clobbered, even by a
// writer in another process.
use bytes::Bytes;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug)]
pub enum StorageError {
    NotFound,
    InvalidId(String),
    Io(io::Error),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::NotFound => write!(f, "not found"),
            StorageError::InvalidId(name) => write!(f, "invalid message id: {name}"),
            StorageError::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}

// Separates the millisecond timestamp from the disambiguation suffix.
const FILENAME_DELIMITER: char = '_';

// Characters that cannot appear verbatim in a directory name. ':' is the
// reserved queue-name delimiter; the rest would escape the storage root.
const RESERVED: &[char] = &[':', '/', '\\'];

/// Identifier of one persisted message, equal to its file name.
///
/// Ordering is `(timestamp, suffix)` with the bare name sorting before any
/// suffixed sibling, so derive order on the fields is delivery order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId {
    timestamp_ms: u64,
    suffix: Option<u64>,
}

impl MessageId {
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn suffix(&self) -> Option<u64> {
        self.suffix
    }

    fn next_probe(self) -> Self {
        Self {
            timestamp_ms: self.timestamp_ms,
            suffix: Some(self.suffix.map_or(0, |n| n + 1)),
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.suffix {
            Some(suffix) => write!(f, "{}{}{}", self.timestamp_ms, FILENAME_DELIMITER, suffix),
            None => write!(f, "{}", self.timestamp_ms),
        }
    }
}

impl FromStr for MessageId {
    type Err = StorageError;

    fn from_str(input: &str) -> Result<Self> {
        let invalid = || StorageError::InvalidId(input.to_string());
        let (stem, suffix) = match input.split_once(FILENAME_DELIMITER) {
            Some((stem, rest)) => {
                let suffix = rest.parse::<u64>().map_err(|_| invalid())?;
                (stem, Some(suffix))
            }
            None => (input, None),
        };
        let timestamp_ms = stem.parse::<u64>().map_err(|_| invalid())?;
        // A zero timestamp cannot come from a real clock; treat it as garbage.
        if timestamp_ms == 0 {
            return Err(invalid());
        }
        Ok(Self {
            timestamp_ms,
            suffix,
        })
    }
}

/// Maps `(domain, queue)` to the backing directory. Pure; never touches the
/// filesystem.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn resolve(&self, domain: &str, queue: &str) -> PathBuf {
        self.root
            .join(encode_segment(domain))
            .join(encode_segment(queue))
    }
}

// Hex-encode a name that cannot be used verbatim as a directory name. The
// encoding only has to be stable: nothing ever decodes it back.
fn encode_segment(name: &str) -> String {
    if name.contains(RESERVED) || name.starts_with('.') {
        hex::encode(name)
    } else {
        name.to_string()
    }
}

/// Lists, appends, reads and deletes message files for every queue under one
/// storage root.
#[derive(Debug)]
pub struct QueueStore {
    resolver: PathResolver,
    // Distinguishes staging files written by interleaved appends.
    staging_seq: AtomicU64,
}

impl QueueStore {
    pub fn new(resolver: PathResolver) -> Self {
        Self {
            resolver,
            staging_seq: AtomicU64::new(0),
        }
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Returns the ids of all persisted entries, oldest first. A missing
    /// directory is an empty queue, not an error. Entries whose name does not
    /// parse are skipped and logged, never failing the call.
    pub async fn list(&self, domain: &str, queue: &str) -> Result<Vec<MessageId>> {
        let dir = self.resolver.resolve(domain, queue);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            // Staging files are in-flight appends, not queue entries.
            if name.starts_with('.') {
                continue;
            }
            match name.parse::<MessageId>() {
                Ok(id) => ids.push(id),
                Err(_) => {
                    metrics::counter!("postbox_garbage_entries_total").increment(1);
                    tracing::debug!(domain, queue, entry = %name, "skipping garbage entry");
                }
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Persists a payload and returns the claimed id. The payload is staged
    /// under a dot-prefixed name and published with link(2), so a partially
    /// written entry is never visible and a claimed name is never reused.
    pub async fn append(&self, domain: &str, queue: &str, payload: &[u8]) -> Result<MessageId> {
        let dir = self.resolver.resolve(domain, queue);
        tokio::fs::create_dir_all(&dir).await?;

        let staging = dir.join(format!(
            ".staging-{}-{}",
            std::process::id(),
            self.staging_seq.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::write(&staging, payload).await?;

        let claimed = claim_slot(&dir, &staging, now_millis()).await;
        // The published entry is a second link; the staging name goes away
        // regardless of how the claim ended.
        let _ = tokio::fs::remove_file(&staging).await;
        claimed
    }

    /// Fails `NotFound` if the entry is absent.
    pub async fn read(&self, domain: &str, queue: &str, id: &MessageId) -> Result<Bytes> {
        let path = self.resolver.resolve(domain, queue).join(id.to_string());
        match tokio::fs::read(&path).await {
            Ok(payload) => Ok(Bytes::from(payload)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(StorageError::NotFound),
            Err(err) => Err(err.into()),
        }
    }

    /// Fails `NotFound` if the entry is absent.
    pub async fn delete(&self, domain: &str, queue: &str, id: &MessageId) -> Result<()> {
        let path = self.resolver.resolve(domain, queue).join(id.to_string());
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(StorageError::NotFound),
            Err(err) => Err(err.into()),
        }
    }
}

// First writer in a millisecond owns the bare timestamp; later writers take
// _0, _1, ... in claim order. link(2) fails with EEXIST instead of
// clobbering, so the probe loop is race-free across processes.
async fn claim_slot(dir: &Path, staging: &Path, timestamp_ms: u64) -> Result<MessageId> {
    let mut id = MessageId {
        timestamp_ms,
        suffix: None,
    };
    loop {
        let target = dir.join(id.to_string());
        match tokio::fs::hard_link(staging, &target).await {
            Ok(()) => return Ok(id),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                id = id.next_probe();
            }
            Err(err) => return Err(err.into()),
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock set before unix epoch")
        .as_millis() as u64
}
