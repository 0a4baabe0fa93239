//! Core library for the Runvault archive server: a long-term store for
//! execution records emitted by a workload-pipeline engine.
//!
//! The persistent model is two entities, results and their child records,
//! kept as opaque encoded rows in a single name-ordered table. On top of that
//! sit the mutation service (create/get/update/delete with field-mask merge
//! and optimistic etags) and the filtered-paginated list engine: adaptive
//! batch sizing, continuation tokens pinned to their filter, strict name
//! ordering.
#![deny(unreachable_pub)]
#![deny(unused_must_use)]

pub mod cancel;
pub mod codec;
pub mod error;
pub mod filter;
pub mod mask;
pub mod model;
pub mod net;
pub mod page;
pub mod service;
pub mod store;

pub use cancel::CancelToken;
pub use error::ApiError;
pub use filter::{FilterEnv, FilterProgram};
pub use mask::FieldMask;
pub use model::{AnyData, Record, RecordName, ResultEntry, ResultName};
pub use net::{ArchiveHttpServer, ArchiveHttpServerConfig, ArchiveHttpServerHandle};
pub use page::{Batcher, Page, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use service::ArchiveService;
pub use store::{RecordRow, RecordStore, StoreConfig};
