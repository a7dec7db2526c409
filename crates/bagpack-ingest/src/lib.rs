//! bagpack-ingest — lifecycle management for bags across storage
//! locations.
//!
//! On top of the packaging engine in `bagpack-core`, this crate keeps a
//! relational catalog of archives, locations and transfers, ingests
//! verified bags from the ingest location, and replicates them to the
//! remaining locations — optionally encrypting in flight with a
//! per-archive AES-256-CTR key and confirming every copy against the
//! cataloged SHA-512.

pub mod catalog;
pub mod cipher;
pub mod error;
pub mod ingest;
pub mod transfer;

pub use catalog::{
    BagitRecord, Catalog, ContentRecord, LocationRecord, TransferRecord, TransferStatus,
};
pub use cipher::{EncryptReader, KeyDir, ENC_EXT};
pub use error::{IngestError, IngestResult};
pub use ingest::{Ingest, IngestOptions, IngestOutcome, IngestReport, IngestStatus};
pub use transfer::{
    RemoteTransport, TransferCoordinator, TransferOptions, TransferSummary,
};
