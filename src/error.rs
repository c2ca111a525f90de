//! Error taxonomy for the advance request workflow
use super::ledger::{ContractId, InstallmentId, InstallmentStatus};
use super::request::{RequestId, RequestStatus};
use sled::transaction::TransactionError;
use std::convert::Infallible;
use std::fmt;

/// Broad classification callers (e.g. an HTTP layer) map onto responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidState,
    InvalidArgument,
    Forbidden,
    Unauthorized,
    Cancelled,
    Storage,
}

#[derive(thiserror::Error, Debug)]
pub enum AdvanceError {
    #[error("client not found")]
    ClientNotFound,
    // also returned when the contract belongs to someone else
    #[error("contract {0} not found for this client")]
    ContractNotFound(ContractId),
    #[error("installment {0} not found")]
    InstallmentNotFound(InstallmentId),
    #[error("advance request {0} not found")]
    RequestNotFound(RequestId),
    #[error("advance request(s) not found: {}", join(.0))]
    RequestsNotFound(Vec<RequestId>),
    #[error("contract {contract_id} already has pending advance request {request_id}")]
    PendingRequestExists {
        contract_id: ContractId,
        request_id: RequestId,
    },
    #[error("only pending requests can be resolved: {}", join(.0))]
    NotPending(Vec<StatusMismatch>),
    #[error("installment {0} is {1}, expected {2}")]
    InstallmentConflict(InstallmentId, InstallmentStatus, InstallmentStatus),
    #[error("no installments eligible for advance on this contract")]
    NoEligibleInstallments,
    #[error("installment #{0} is not eligible or does not exist on this contract")]
    InstallmentNotEligible(u32),
    #[error("requests hold installments that cannot be approved: {}", join(.0))]
    UnapprovableInstallments(Vec<InstallmentFaults>),
    #[error("no advance request ids supplied")]
    EmptyBatch,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("operation not permitted for role {0}")]
    Forbidden(String),
    #[error("identity carries no client id")]
    Unauthorized,
    #[error("operation cancelled")]
    Cancelled,
    #[error("storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("failed to generate identifier: {0}")]
    IdGeneration(String),
    #[error("failed to encode record: {0}")]
    Encode(#[from] minicbor::encode::Error<Infallible>),
    #[error("failed to decode record: {0}")]
    Decode(#[from] minicbor::decode::Error),
}

impl AdvanceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AdvanceError::ClientNotFound
            | AdvanceError::ContractNotFound(_)
            | AdvanceError::InstallmentNotFound(_)
            | AdvanceError::RequestNotFound(_)
            | AdvanceError::RequestsNotFound(_) => ErrorKind::NotFound,
            AdvanceError::PendingRequestExists { .. }
            | AdvanceError::NotPending(_)
            | AdvanceError::InstallmentConflict(..) => ErrorKind::Conflict,
            AdvanceError::NoEligibleInstallments
            | AdvanceError::InstallmentNotEligible(_)
            | AdvanceError::UnapprovableInstallments(_) => ErrorKind::InvalidState,
            AdvanceError::EmptyBatch | AdvanceError::InvalidArgument(_) => {
                ErrorKind::InvalidArgument
            }
            AdvanceError::Forbidden(_) => ErrorKind::Forbidden,
            AdvanceError::Unauthorized => ErrorKind::Unauthorized,
            AdvanceError::Cancelled => ErrorKind::Cancelled,
            AdvanceError::Storage(_)
            | AdvanceError::IdGeneration(_)
            | AdvanceError::Encode(_)
            | AdvanceError::Decode(_) => ErrorKind::Storage,
        }
    }
}

impl From<TransactionError<AdvanceError>> for AdvanceError {
    fn from(value: TransactionError<AdvanceError>) -> Self {
        match value {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => AdvanceError::Storage(e),
        }
    }
}

/// A request that was asked to transition while not pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMismatch {
    pub request_id: RequestId,
    pub actual: RequestStatus,
}

impl fmt::Display for StatusMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (status {})", self.request_id, self.actual)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallmentFault {
    Missing(InstallmentId),
    WrongStatus(InstallmentId, InstallmentStatus),
    InsideWindow(InstallmentId),
}

impl fmt::Display for InstallmentFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallmentFault::Missing(id) => write!(f, "{id} missing"),
            InstallmentFault::WrongStatus(id, status) => write!(f, "{id} is {status}"),
            InstallmentFault::InsideWindow(id) => write!(f, "{id} due too soon"),
        }
    }
}

/// Every faulty installment found on one request during approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallmentFaults {
    pub request_id: RequestId,
    pub faults: Vec<InstallmentFault>,
}

impl fmt::Display for InstallmentFaults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request {} [{}]", self.request_id, join(&self.faults))
    }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
