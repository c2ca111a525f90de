//! Advance payment requests against contract installments.
//!
//! Clients ask for early payout of installments due far enough in the future;
//! an approver then approves or rejects those requests in batches. All state
//! lives in a sled database and every multi-record change is one transaction.

pub mod access;
pub mod cancel;
pub mod config;
pub mod eligibility;
pub mod error;
pub mod ledger;
pub mod request;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod utils;

pub use access::{AdvanceApi, Identity, Role};
pub use cancel::CancelSignal;
pub use config::ServiceConfig;
pub use error::{AdvanceError, ErrorKind};
pub use service::AdvanceRequestService;
