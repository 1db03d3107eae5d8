//! HR self-service domain: request kinds, wire records, status codes and
//! the client that talks to the five list endpoints.

pub mod aggregator;
pub mod api_types;
pub mod cache;
pub mod client;
pub mod mutation;
pub mod status;
pub mod types;

pub use aggregator::{DomainAggregator, RequestSource};
pub use cache::{request_cache, RequestCache};
pub use client::HrClient;
pub use mutation::{MutationCoordinator, MutationTransport};
pub use types::{ApprovalState, Identity, Request, RequestKind};
