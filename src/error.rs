use thiserror::Error;

/// Errors from the blob store holding slice and thumbnail files
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// Error from S3 or S3-compatible storage
    #[error("S3 error: {0}")]
    S3(String),

    /// Local filesystem error
    #[error("Filesystem error: {0}")]
    Io(String),

    /// Object not found
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Path escapes the store root or is otherwise unusable
    #[error("Invalid blob path: {0}")]
    InvalidPath(String),
}

/// Errors raised by the catalog (works, chapters, slices)
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Work not found: {slug}")]
    WorkNotFound { slug: String },

    #[error("Work already exists: {slug}")]
    WorkExists { slug: String },

    #[error("Invalid work: {reason}")]
    InvalidWork { reason: String },

    #[error("Chapter not found: {work}/{chapter}")]
    ChapterNotFound { work: String, chapter: String },

    #[error("Slice not found: {id}")]
    SliceNotFound { id: i64 },

    #[error("Stored timestamp out of range: {0}")]
    InvalidTimestamp(i64),
}

/// Reasons the access policy could not run its schedule.
///
/// These never reach a caller: the engine turns them into a fail-closed or
/// fail-open decision.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessPolicyError {
    #[error("chapter has neither a release date nor a first-published date")]
    MissingReleaseDate,

    #[error("chapter is not part of its work's chapter list")]
    ChapterNotInWork,

    #[error("unlock time overflows the calendar")]
    ScheduleOverflow,
}

/// Errors from slice encryption and decryption
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("Ciphertext too short: {len} bytes")]
    Truncated { len: usize },

    #[error("Encryption failed")]
    Encrypt,

    /// Wrong key, tampered bytes or a blob moved to another path
    #[error("Decryption failed")]
    Decrypt,
}

/// Errors from chapter ingestion
#[derive(Debug, Error)]
pub enum IngestError {
    /// Archive is not a readable zip or holds no chapter images
    #[error("Invalid archive: {reason}")]
    InvalidArchive { reason: String },

    /// Folder upload request is missing required parts
    #[error("Invalid upload: {reason}")]
    InvalidUpload { reason: String },

    /// A single source image could not be decoded
    #[error("Failed to decode {filename}: {message}")]
    ImageDecodeFailure { filename: String, message: String },

    /// A decoded image could not be re-encoded
    #[error("Failed to encode {filename}: {message}")]
    EncodeFailure { filename: String, message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Blocking image worker panicked or was cancelled
    #[error("Image worker failed: {0}")]
    Worker(String),
}

impl From<sqlx::Error> for IngestError {
    fn from(err: sqlx::Error) -> Self {
        IngestError::Catalog(CatalogError::Database(err))
    }
}

/// Errors that can occur when serving a chapter or a single slice
#[derive(Debug, Error)]
pub enum SliceError {
    /// Chapter is locked for this viewer
    #[error("Chapter is locked")]
    Locked,

    /// Action requires an active subscription or staff role
    #[error("VIP access required")]
    VipRequired,

    /// Slice bytes could not be recovered; reported as not found
    #[error("Slice {id} could not be decrypted: {reason}")]
    DecryptionFailure { id: i64, reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Archive error: {0}")]
    Archive(String),
}

/// Errors from the coin ledger
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Balance was insufficient once the write lock was held
    #[error("Insufficient balance for {user_id}: needs {required} coins")]
    ConcurrentBalanceConflict { user_id: String, required: i64 },

    #[error("Chapter {chapter_id} is already unlocked for {user_id}")]
    AlreadyUnlocked { user_id: String, chapter_id: i64 },

    #[error("Chapter {chapter_id} cannot be bought with coins")]
    NotPurchasable { chapter_id: i64 },

    #[error("Amount must be positive, got {0}")]
    InvalidAmount(i64),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        LedgerError::Catalog(CatalogError::Database(err))
    }
}

/// Errors from identity provider credential lookup
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
