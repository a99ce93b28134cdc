//! Error types for the mprows crate.
//!
//! [`MprError`] is the single error enum for the crate, covering container
//! corruption, I/O failures, codec errors, intuition failures, and the
//! feature-gated SQL adapters.

/// The main error type for the mprows crate.
#[derive(Debug, thiserror::Error)]
pub enum MprError {
    /// The file header or meta block is malformed: bad magic, bad version,
    /// truncation, or an unknown tagged object in the row stream.
    #[error("corrupt MPR file: {0}")]
    CorruptFile(String),

    /// I/O error from the backing filesystem.
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// A value could not be encoded into the MPR wire form.
    #[error("unsupported value on encode: {0}")]
    UnsupportedValue(String),

    /// The row intuiter could not find enough data-pattern rows.
    #[error("row intuition failed: {0}")]
    RowIntuit(String),

    /// An append was attempted on a finalized file.
    #[error("file is finalized; rows can no longer be appended")]
    AlreadyFinalized,

    /// An append was attempted on a re-opened file that already holds rows.
    #[error("can't append; rows already loaded (n_rows = {0})")]
    RowsAlreadyLoaded(u32),

    /// The credential callback omitted required fields.
    #[error("missing credentials for {netloc}: {missing:?}")]
    MissingCredentials {
        /// Host the credentials were requested for.
        netloc: String,
        /// Required fields absent from the returned mapping.
        missing: Vec<String>,
    },

    /// The SQL adapter was asked to mount a non-existent MPR file.
    #[error("virtual table error: {0}")]
    VirtualTable(String),

    /// Misuse at an external boundary.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// MessagePack value encode error.
    #[error("{0}")]
    MsgpackEncode(#[from] rmpv::encode::Error),

    /// MessagePack meta serialization error.
    #[error("{0}")]
    MetaEncode(#[from] rmp_serde::encode::Error),

    /// MessagePack meta deserialization error.
    #[error("{0}")]
    MetaDecode(#[from] rmp_serde::decode::Error),

    /// JSON serialization error.
    #[error("{0}")]
    SerdeJson(#[from] serde_json::Error),

    /// Error from the embedded SQLite engine.
    #[cfg(feature = "sql")]
    #[error("{0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Error from the PostgreSQL client.
    #[cfg(feature = "med-postgres")]
    #[error("{0}")]
    Postgres(#[from] postgres::Error),

    /// Catch-all error with a custom message.
    #[error("{0}")]
    Other(String),
}
