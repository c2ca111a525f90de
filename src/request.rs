//! Advance requests, their status machine and the read views built from them
use super::eligibility::{EligibilityWindow, within_approval_window};
use super::error::{AdvanceError, InstallmentFault, InstallmentFaults, StatusMismatch};
use super::ledger::{Amount, ClientId, ContractId, Installment, InstallmentId, InstallmentStatus, TimeStamp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(
    minicbor::Encode,
    minicbor::Decode,
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
#[cbor(transparent)]
#[serde(transparent)]
pub struct RequestId(#[n(0)] pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(
    minicbor::Encode, minicbor::Decode, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Approved,
    #[n(2)]
    Rejected,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestStatus::Pending => "PENDING",
            RequestStatus::Approved => "APPROVED",
            RequestStatus::Rejected => "REJECTED",
        };
        f.write_str(s)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct AdvanceRequestItem {
    #[n(0)]
    pub installment_id: InstallmentId,
    #[n(1)]
    pub amount_at_request_time: Amount, // snapshot, never updated
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct AdvanceRequest {
    #[n(0)]
    pub id: RequestId,
    #[n(1)]
    pub client_id: ClientId,
    #[n(2)]
    pub contract_id: ContractId,
    #[n(3)]
    pub status: RequestStatus,
    #[n(4)]
    pub notes: Option<String>,
    #[n(5)]
    pub created_at: TimeStamp<Utc>,
    #[n(6)]
    pub approved_at: Option<TimeStamp<Utc>>, // only ever set by approval
    #[n(7)]
    pub items: Vec<AdvanceRequestItem>,
}

impl AdvanceRequest {
    /// A new pending request snapshotting the amount of every selected installment.
    pub fn open(
        id: RequestId,
        client_id: ClientId,
        contract_id: ContractId,
        notes: Option<String>,
        created_at: TimeStamp<Utc>,
        selected: &[&Installment],
    ) -> Self {
        let items = selected
            .iter()
            .map(|i| AdvanceRequestItem {
                installment_id: i.id,
                amount_at_request_time: i.amount,
            })
            .collect();

        Self {
            id,
            client_id,
            contract_id,
            status: RequestStatus::Pending,
            notes,
            created_at,
            approved_at: None,
            items,
        }
    }

    pub fn installment_ids(&self) -> impl Iterator<Item = InstallmentId> + '_ {
        self.items.iter().map(|i| i.installment_id)
    }

    pub fn approve(&mut self, at: TimeStamp<Utc>) -> Result<(), StatusMismatch> {
        self.ensure_pending()?;
        self.status = RequestStatus::Approved;
        self.approved_at = Some(at);
        Ok(())
    }

    pub fn reject(&mut self) -> Result<(), StatusMismatch> {
        self.ensure_pending()?;
        self.status = RequestStatus::Rejected;
        self.approved_at = None;
        Ok(())
    }

    fn ensure_pending(&self) -> Result<(), StatusMismatch> {
        if self.status == RequestStatus::Pending {
            return Ok(());
        }
        Err(StatusMismatch {
            request_id: self.id,
            actual: self.status,
        })
    }

    pub fn detail(&self) -> AdvanceRequestDetail {
        AdvanceRequestDetail::from(self)
    }
}

/// Fails with every non-pending request in the batch, not just the first.
pub fn check_all_pending(requests: &[AdvanceRequest]) -> Result<(), AdvanceError> {
    let offending: Vec<StatusMismatch> = requests
        .iter()
        .filter_map(|r| r.ensure_pending().err())
        .collect();

    if offending.is_empty() {
        return Ok(());
    }
    Err(AdvanceError::NotPending(offending))
}

/// Installment faults blocking approval, grouped per request. Installments are
/// looked up by id in `installments`; an absent entry counts as missing.
pub fn check_approvable(
    requests: &[AdvanceRequest],
    installments: &HashMap<InstallmentId, Installment>,
    now: &TimeStamp<Utc>,
    window: EligibilityWindow,
) -> Result<(), AdvanceError> {
    let mut faulty = Vec::new();

    for request in requests {
        let faults: Vec<InstallmentFault> = request
            .installment_ids()
            .filter_map(|id| match installments.get(&id) {
                None => Some(InstallmentFault::Missing(id)),
                Some(i) if i.status != InstallmentStatus::AwaitingApproval => {
                    Some(InstallmentFault::WrongStatus(id, i.status))
                }
                Some(i) if !within_approval_window(i, now, window) => {
                    Some(InstallmentFault::InsideWindow(id))
                }
                Some(_) => None,
            })
            .collect();

        if !faults.is_empty() {
            faulty.push(InstallmentFaults {
                request_id: request.id,
                faults,
            });
        }
    }

    if faulty.is_empty() {
        return Ok(());
    }
    Err(AdvanceError::UnapprovableInstallments(faulty))
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceRequestItemView {
    pub installment_id: InstallmentId,
    pub amount_at_request_time: Amount,
}

/// What callers get back from create/get/list.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceRequestDetail {
    pub id: RequestId,
    pub client_id: ClientId,
    pub contract_id: ContractId,
    pub status: RequestStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub items: Vec<AdvanceRequestItemView>,
}

impl From<&AdvanceRequest> for AdvanceRequestDetail {
    fn from(request: &AdvanceRequest) -> Self {
        Self {
            id: request.id,
            client_id: request.client_id.clone(),
            contract_id: request.contract_id,
            status: request.status,
            notes: request.notes.clone(),
            created_at: request.created_at.to_datetime_utc(),
            approved_at: request.approved_at.as_ref().map(TimeStamp::to_datetime_utc),
            items: request
                .items
                .iter()
                .map(|i| AdvanceRequestItemView {
                    installment_id: i.installment_id,
                    amount_at_request_time: i.amount_at_request_time,
                })
                .collect(),
        }
    }
}

/// Filters and paging for request listings. Pages are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub status: Option<RequestStatus>,
    pub created_from: Option<TimeStamp<Utc>>,
    pub created_to: Option<TimeStamp<Utc>>,
    pub page: u32,
    pub page_size: u32,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            status: None,
            created_from: None,
            created_to: None,
            page: 1,
            page_size: 20,
        }
    }
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_status(mut self, status: RequestStatus) -> Self {
        self.status = Some(status);
        self
    }
    pub fn set_created_from(mut self, from: TimeStamp<Utc>) -> Self {
        self.created_from = Some(from);
        self
    }
    pub fn set_created_to(mut self, to: TimeStamp<Utc>) -> Self {
        self.created_to = Some(to);
        self
    }
    pub fn set_page(mut self, page: u32, page_size: u32) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    /// Both bounds are inclusive.
    pub fn matches(&self, request: &AdvanceRequest) -> bool {
        if self.status.is_some_and(|s| s != request.status) {
            return false;
        }
        if self
            .created_from
            .as_ref()
            .is_some_and(|from| request.created_at < *from)
        {
            return false;
        }
        if self
            .created_to
            .as_ref()
            .is_some_and(|to| request.created_at > *to)
        {
            return false;
        }
        true
    }

    /// Filters, orders newest first and cuts out the requested page.
    pub fn apply(&self, requests: Vec<AdvanceRequest>, max_page_size: u32) -> Result<Vec<AdvanceRequest>, AdvanceError> {
        if self.page == 0 {
            return Err(AdvanceError::InvalidArgument("page starts at 1".into()));
        }
        if self.page_size == 0 {
            return Err(AdvanceError::InvalidArgument("page size must be positive".into()));
        }
        let page_size = self.page_size.min(max_page_size) as usize;
        let skip = (self.page as usize - 1).saturating_mul(page_size);

        let mut matching: Vec<AdvanceRequest> =
            requests.into_iter().filter(|r| self.matches(r)).collect();
        matching.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        Ok(matching.into_iter().skip(skip).take(page_size).collect())
    }
}
