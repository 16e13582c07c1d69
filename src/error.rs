use thiserror::Error;

use crate::rid::Rid;

/// Sum type for every failure mode surfaced by the paged file, record engine
/// and B+ tree layers. Iteration exhaustion is not modeled here: scans signal
/// it through `Iterator`/`Option`, not through an error variant.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("file already exists: {0}")]
    FileAlreadyExists(String),

    #[error("handle for {0} is already open")]
    HandleAlreadyInitialized(String),

    #[error("handle for {0} is not open")]
    HandleNotInitialized(String),

    #[error("page number {0} is out of range")]
    PageNumInvalid(u32),

    #[error("record size {0} is invalid")]
    RecordSizeInvalid(usize),

    #[error("file is corrupt: {0}")]
    FileCorrupt(String),

    #[error("header size does not match expected layout")]
    HeaderSizeCorrupt,

    #[error("header version {found} does not match expected version {expected}")]
    HeaderVersionMismatch { found: u32, expected: u32 },

    #[error("header page size {found} does not match expected page size {expected}")]
    HeaderPageSizeMismatch { found: u32, expected: u32 },

    #[error("header freespace list count {found} does not match expected {expected}")]
    HeaderFreespaceListsMismatch { found: u32, expected: u32 },

    #[error("page {0} cannot be reorganized")]
    PageCannotBeOrganized(u32),

    #[error("record at {0:?} has already been deleted")]
    RecordDeleted(Rid),

    #[error("record at {0:?} is an anchor and cannot be deleted directly")]
    RecordIsAnchor(Rid),

    #[error("record of size {0} exceeds the page size")]
    RecordExceedsPageSize(usize),

    #[error("attribute has an invalid type tag: {0}")]
    AttributeInvalidType(u8),

    #[error("attribute length {0} is invalid")]
    AttributeLengthInvalid(u32),

    #[error("no attribute named {0} in the record descriptor")]
    AttributeNotFound(String),

    #[error("no matching leaf entry for the given key")]
    BTreeIndexLeafEntryNotFound,

    #[error("key of size {0} exceeds the maximum key size {1}")]
    BTreeKeyTooLarge(usize, usize),

    #[error("could not locate a leaf page for the given key")]
    BTreeCannotFindLeaf,

    #[error("pages are too full to merge")]
    BTreeCannotMergePagesTooFull,

    #[error("out of memory")]
    OutOfMemory,

    #[error("seek failed on the underlying file")]
    FileSeekFailed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Internal-only signal used between `insert_into_leaf`/`insert_into_non_leaf`
/// and their caller. Never returned across `IndexManager::insert_entry`.
#[derive(Debug)]
pub(crate) struct PageFullSignal;

pub type Result<T> = std::result::Result<T, StorageError>;
