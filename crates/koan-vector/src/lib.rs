#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod capability;
mod context;
mod error;
mod filter;
mod health;
mod repository;
mod types;

pub use capability::VectorCapabilities;
pub use context::VectorContext;
pub use error::{BoxedError, VectorError, VectorResult};
pub use filter::{CompareOp, FilterExpr, FilterValue};
pub use health::{ServiceHealth, ServiceStatus};
pub use repository::{RecordStream, VectorRepository};
pub use types::{DEFAULT_ALPHA, Metadata, SearchQuery, SearchResult, VectorRecord};
