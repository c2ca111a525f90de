//! Service layer API for the advance request lifecycle
use super::cancel::CancelSignal;
use super::config::ServiceConfig;
use super::eligibility::{self, EligibilityWindow};
use super::error::AdvanceError;
use super::ledger::{
    Amount, ClientId, Contract, ContractId, Installment, InstallmentId, InstallmentStatus, TimeStamp,
};
use super::request::{
    AdvanceRequest, AdvanceRequestDetail, ListQuery, RequestId, check_all_pending, check_approvable,
};
use super::store::{LedgerStore, LedgerTx, TxResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::transaction::abort;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// One line of a contract's installment schedule.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub installment_id: InstallmentId,
    pub sequence: u32,
    pub amount: Amount,
    pub due_date: DateTime<Utc>,
    pub status: InstallmentStatus,
    pub eligible: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContractSchedule {
    pub contract_id: ContractId,
    pub code: String,
    pub installments: Vec<ScheduleEntry>,
}

pub struct AdvanceRequestService {
    store: LedgerStore,
    window: EligibilityWindow,
    max_page_size: u32,
}

impl AdvanceRequestService {
    pub fn new(instance: Arc<sled::Db>, config: &ServiceConfig) -> Result<Self, AdvanceError> {
        Ok(Self {
            store: LedgerStore::open(instance)?,
            window: config.eligibility_window(),
            max_page_size: config.max_page_size,
        })
    }

    /// Ledger access for writes outside the request lifecycle (clients,
    /// contracts, payment collection).
    pub fn ledger(&self) -> &LedgerStore {
        &self.store
    }

    /// Client must exist and own the contract; anything else reads as not found.
    fn owned_contract(&self, client_id: &ClientId, contract_id: ContractId) -> Result<Contract, AdvanceError> {
        if self.store.client(client_id)?.is_none() {
            return Err(AdvanceError::ClientNotFound);
        }
        match self.store.contract(contract_id)? {
            Some(contract) if contract.client_id == *client_id => Ok(contract),
            _ => Err(AdvanceError::ContractNotFound(contract_id)),
        }
    }

    pub fn create_request(
        &self,
        client_id: &ClientId,
        contract_id: ContractId,
        sequence: Option<u32>,
        notes: Option<String>,
        cancel: &CancelSignal,
    ) -> Result<AdvanceRequestDetail, AdvanceError> {
        self.create_request_at(client_id, contract_id, sequence, notes, TimeStamp::new(), cancel)
    }

    /// Opens a pending request over the contract's eligible installments (or
    /// the single one named by `sequence`) as of `now`.
    pub fn create_request_at(
        &self,
        client_id: &ClientId,
        contract_id: ContractId,
        sequence: Option<u32>,
        notes: Option<String>,
        now: TimeStamp<Utc>,
        cancel: &CancelSignal,
    ) -> Result<AdvanceRequestDetail, AdvanceError> {
        if cancel.is_cancelled() {
            return Err(AdvanceError::Cancelled);
        }
        let contract = self.owned_contract(client_id, contract_id)?;
        let request_id = RequestId(self.store.next_id()?);

        let request = self.store.transact(|tx| {
            self.stage_create(tx, client_id, &contract, request_id, sequence, &notes, &now, cancel)
        });

        let request = match request {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(%client_id, %contract_id, error = %e, "advance request refused");
                return Err(e);
            }
        };

        tracing::info!(
            request_id = %request.id,
            %client_id,
            %contract_id,
            installments = request.items.len(),
            "advance request created"
        );
        Ok(request.detail())
    }

    /// A request the client owns. Someone else's request is reported as not found.
    pub fn get_request(
        &self,
        id: RequestId,
        client_id: &ClientId,
    ) -> Result<AdvanceRequestDetail, AdvanceError> {
        if self.store.client(client_id)?.is_none() {
            return Err(AdvanceError::ClientNotFound);
        }
        match self.store.request(id)? {
            Some(request) if request.client_id == *client_id => Ok(request.detail()),
            _ => {
                tracing::debug!(request_id = %id, %client_id, "request not visible to client");
                Err(AdvanceError::RequestNotFound(id))
            }
        }
    }

    pub fn list_requests(
        &self,
        client_id: &ClientId,
        query: &ListQuery,
    ) -> Result<Vec<AdvanceRequestDetail>, AdvanceError> {
        if self.store.client(client_id)?.is_none() {
            return Err(AdvanceError::ClientNotFound);
        }
        let owned = self
            .store
            .all_requests()?
            .into_iter()
            .filter(|r| r.client_id == *client_id)
            .collect();
        self.page(owned, query)
    }

    /// Every client's requests; meant for the approver role only.
    pub fn list_all_requests(&self, query: &ListQuery) -> Result<Vec<AdvanceRequestDetail>, AdvanceError> {
        let all = self.store.all_requests()?;
        self.page(all, query)
    }

    fn page(
        &self,
        requests: Vec<AdvanceRequest>,
        query: &ListQuery,
    ) -> Result<Vec<AdvanceRequestDetail>, AdvanceError> {
        let page = query.apply(requests, self.max_page_size)?;
        Ok(page.iter().map(AdvanceRequest::detail).collect())
    }

    pub fn approve_requests(&self, ids: &[RequestId], cancel: &CancelSignal) -> Result<(), AdvanceError> {
        self.approve_requests_at(ids, TimeStamp::new(), cancel)
    }

    /// Approves the whole batch or nothing. Every request must be pending and
    /// every installment on it still awaiting approval outside the window.
    pub fn approve_requests_at(
        &self,
        ids: &[RequestId],
        now: TimeStamp<Utc>,
        cancel: &CancelSignal,
    ) -> Result<(), AdvanceError> {
        let ids = dedup(ids)?;
        if cancel.is_cancelled() {
            return Err(AdvanceError::Cancelled);
        }

        let result = self.store.transact(|tx| self.stage_approval(tx, &ids, &now, cancel));

        match result {
            Ok(()) => {
                tracing::info!(requests = ?ids, "advance requests approved");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(requests = ?ids, error = %e, "approval batch rejected");
                Err(e)
            }
        }
    }

    /// Rejects the whole batch or nothing. Installments still awaiting
    /// approval go back to due; any other status is left as found.
    pub fn reject_requests(&self, ids: &[RequestId], cancel: &CancelSignal) -> Result<(), AdvanceError> {
        let ids = dedup(ids)?;
        if cancel.is_cancelled() {
            return Err(AdvanceError::Cancelled);
        }

        let result = self.store.transact(|tx| self.stage_rejection(tx, &ids, cancel));

        match result {
            Ok(()) => {
                tracing::info!(requests = ?ids, "advance requests rejected");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(requests = ?ids, error = %e, "rejection batch refused");
                Err(e)
            }
        }
    }

    /// Writes a new pending request and parks its installments, inside `tx`.
    #[allow(clippy::too_many_arguments)]
    fn stage_create(
        &self,
        tx: &LedgerTx<'_>,
        client_id: &ClientId,
        contract: &Contract,
        request_id: RequestId,
        sequence: Option<u32>,
        notes: &Option<String>,
        now: &TimeStamp<Utc>,
        cancel: &CancelSignal,
    ) -> TxResult<AdvanceRequest> {
        if let Some(existing) = tx.pending_for(contract.id)? {
            return abort(AdvanceError::PendingRequestExists {
                contract_id: contract.id,
                request_id: existing,
            });
        }

        let installments = load_installments(tx, contract)?;
        let selected = match eligibility::select_for_request(&installments, sequence, now, self.window) {
            Ok(selected) => selected,
            Err(e) => return abort(e),
        };

        let request = AdvanceRequest::open(
            request_id,
            client_id.clone(),
            contract.id,
            notes.clone(),
            now.clone(),
            &selected,
        );

        for installment in selected {
            let mut updated = installment.clone();
            updated.status = InstallmentStatus::AwaitingApproval;
            tx.put_installment(&updated)?;
        }
        tx.put_request(&request)?;
        tx.mark_pending(contract.id, request_id)?;

        ensure_not_cancelled(cancel)?;
        Ok(request)
    }

    fn stage_approval(
        &self,
        tx: &LedgerTx<'_>,
        ids: &[RequestId],
        now: &TimeStamp<Utc>,
        cancel: &CancelSignal,
    ) -> TxResult<()> {
        let requests = load_batch(tx, ids)?;
        if let Err(e) = check_all_pending(&requests) {
            return abort(e);
        }

        let mut installments = HashMap::new();
        for id in requests.iter().flat_map(AdvanceRequest::installment_ids) {
            if let Some(installment) = tx.installment(id)? {
                installments.insert(id, installment);
            }
        }
        if let Err(e) = check_approvable(&requests, &installments, now, self.window) {
            return abort(e);
        }

        for mut request in requests {
            if let Err(mismatch) = request.approve(now.clone()) {
                return abort(AdvanceError::NotPending(vec![mismatch]));
            }
            for id in request.installment_ids() {
                if let Some(installment) = installments.get_mut(&id) {
                    installment.status = InstallmentStatus::Advanced;
                    tx.put_installment(installment)?;
                }
            }
            tx.put_request(&request)?;
            tx.clear_pending(request.contract_id)?;
        }

        ensure_not_cancelled(cancel)
    }

    fn stage_rejection(&self, tx: &LedgerTx<'_>, ids: &[RequestId], cancel: &CancelSignal) -> TxResult<()> {
        let requests = load_batch(tx, ids)?;
        if let Err(e) = check_all_pending(&requests) {
            return abort(e);
        }

        for mut request in requests {
            if let Err(mismatch) = request.reject() {
                return abort(AdvanceError::NotPending(vec![mismatch]));
            }
            for id in request.installment_ids() {
                match tx.installment(id)? {
                    Some(mut installment) if installment.status == InstallmentStatus::AwaitingApproval => {
                        installment.status = InstallmentStatus::Due;
                        tx.put_installment(&installment)?;
                    }
                    _ => {}
                }
            }
            tx.put_request(&request)?;
            tx.clear_pending(request.contract_id)?;
        }

        ensure_not_cancelled(cancel)
    }

    pub fn contract_schedule(
        &self,
        client_id: &ClientId,
        contract_id: ContractId,
    ) -> Result<ContractSchedule, AdvanceError> {
        self.contract_schedule_at(client_id, contract_id, TimeStamp::new())
    }

    /// The contract's installments in sequence order, flagged with eligibility as of `now`.
    pub fn contract_schedule_at(
        &self,
        client_id: &ClientId,
        contract_id: ContractId,
        now: TimeStamp<Utc>,
    ) -> Result<ContractSchedule, AdvanceError> {
        let contract = self.owned_contract(client_id, contract_id)?;
        let installments = self.store.installments_of(&contract)?;

        Ok(ContractSchedule {
            contract_id,
            code: contract.code,
            installments: installments
                .iter()
                .map(|i| ScheduleEntry {
                    installment_id: i.id,
                    sequence: i.sequence,
                    amount: i.amount,
                    due_date: i.due_date.to_datetime_utc(),
                    status: i.status,
                    eligible: eligibility::is_eligible(i, &now, self.window),
                })
                .collect(),
        })
    }
}

// Last step of every staged transaction: a cancel seen here discards all staged writes.
fn ensure_not_cancelled(cancel: &CancelSignal) -> TxResult<()> {
    if cancel.is_cancelled() {
        return abort(AdvanceError::Cancelled);
    }
    Ok(())
}

fn dedup(ids: &[RequestId]) -> Result<Vec<RequestId>, AdvanceError> {
    if ids.is_empty() {
        return Err(AdvanceError::EmptyBatch);
    }
    Ok(ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect())
}

fn load_installments(tx: &LedgerTx<'_>, contract: &Contract) -> TxResult<Vec<Installment>> {
    let mut installments = Vec::with_capacity(contract.installment_ids.len());
    for id in &contract.installment_ids {
        match tx.installment(*id)? {
            Some(installment) => installments.push(installment),
            None => return abort(AdvanceError::InstallmentNotFound(*id)),
        }
    }
    Ok(installments)
}

/// Every request in `ids`, or a not-found error naming all the missing ones.
fn load_batch(tx: &LedgerTx<'_>, ids: &[RequestId]) -> TxResult<Vec<AdvanceRequest>> {
    let mut requests = Vec::with_capacity(ids.len());
    let mut missing = Vec::new();
    for id in ids {
        match tx.request(*id)? {
            Some(request) => requests.push(request),
            None => missing.push(*id),
        }
    }
    if !missing.is_empty() {
        return abort(AdvanceError::RequestsNotFound(missing));
    }
    Ok(requests)
}
