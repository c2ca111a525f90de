//! sled-backed ledger store
//!
//! One tree per record kind plus a `pending` index mapping a contract to its
//! open advance request. Every multi-record change goes through a sled
//! transaction; an abort anywhere in the closure discards all of its writes.
use super::error::AdvanceError;
use super::ledger::{
    Amount, Client, ClientId, Contract, ContractId, Installment, InstallmentId, InstallmentStatus,
    TimeStamp,
};
use super::request::{AdvanceRequest, RequestId};
use super::utils::{id_key, new_uuid_to_bech32};
use chrono::Utc;
use sled::transaction::{ConflictableTransactionResult, TransactionalTree, abort};
use sled::{Db, Transactional, Tree};
use std::sync::Arc;

pub type TxResult<T> = ConflictableTransactionResult<T, AdvanceError>;

const CLIENTS: &str = "clients";
const CONTRACTS: &str = "contracts";
const INSTALLMENTS: &str = "installments";
const REQUESTS: &str = "advance_requests";
const PENDING: &str = "pending_by_contract";

fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, AdvanceError> {
    Ok(minicbor::to_vec(value)?)
}

fn decode<T>(bytes: &[u8]) -> Result<T, AdvanceError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    Ok(minicbor::decode(bytes)?)
}

fn read<T>(tree: &Tree, key: &[u8]) -> Result<Option<T>, AdvanceError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match tree.get(key)? {
        Some(bytes) => decode(&bytes).map(Some),
        None => Ok(None),
    }
}

fn tx_read<T>(tree: &TransactionalTree, key: &[u8]) -> TxResult<Option<T>>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match tree.get(key)? {
        Some(bytes) => match decode(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => abort(e),
        },
        None => Ok(None),
    }
}

fn tx_write<T: minicbor::Encode<()>>(tree: &TransactionalTree, key: &[u8], value: &T) -> TxResult<()> {
    match encode(value) {
        Ok(bytes) => {
            tree.insert(key, bytes)?;
            Ok(())
        }
        Err(e) => abort(e),
    }
}

pub struct LedgerStore {
    instance: Arc<Db>,
    clients: Tree,
    contracts: Tree,
    installments: Tree,
    requests: Tree,
    pending: Tree,
}

/// Typed view over the trees taking part in a request transaction.
pub struct LedgerTx<'a> {
    requests: &'a TransactionalTree,
    installments: &'a TransactionalTree,
    pending: &'a TransactionalTree,
}

impl LedgerTx<'_> {
    pub fn request(&self, id: RequestId) -> TxResult<Option<AdvanceRequest>> {
        tx_read(self.requests, &id_key(id.0))
    }
    pub fn put_request(&self, request: &AdvanceRequest) -> TxResult<()> {
        tx_write(self.requests, &id_key(request.id.0), request)
    }
    pub fn installment(&self, id: InstallmentId) -> TxResult<Option<Installment>> {
        tx_read(self.installments, &id_key(id.0))
    }
    pub fn put_installment(&self, installment: &Installment) -> TxResult<()> {
        tx_write(self.installments, &id_key(installment.id.0), installment)
    }
    pub fn pending_for(&self, contract_id: ContractId) -> TxResult<Option<RequestId>> {
        tx_read(self.pending, &id_key(contract_id.0))
    }
    pub fn mark_pending(&self, contract_id: ContractId, request_id: RequestId) -> TxResult<()> {
        tx_write(self.pending, &id_key(contract_id.0), &request_id)
    }
    pub fn clear_pending(&self, contract_id: ContractId) -> TxResult<()> {
        self.pending.remove(&id_key(contract_id.0)[..])?;
        Ok(())
    }
}

impl LedgerStore {
    pub fn open(instance: Arc<Db>) -> Result<Self, AdvanceError> {
        Ok(Self {
            clients: instance.open_tree(CLIENTS)?,
            contracts: instance.open_tree(CONTRACTS)?,
            installments: instance.open_tree(INSTALLMENTS)?,
            requests: instance.open_tree(REQUESTS)?,
            pending: instance.open_tree(PENDING)?,
            instance,
        })
    }

    pub fn next_id(&self) -> Result<u64, AdvanceError> {
        Ok(self.instance.generate_id()?)
    }

    /// Runs `f` atomically over requests, installments and the pending index.
    /// sled may re-run the closure on conflict, so it must not have side effects.
    pub fn transact<A, F>(&self, f: F) -> Result<A, AdvanceError>
    where
        F: Fn(&LedgerTx<'_>) -> TxResult<A>,
    {
        let result = (&self.requests, &self.installments, &self.pending).transaction(
            |(requests, installments, pending)| {
                let tx = LedgerTx {
                    requests,
                    installments,
                    pending,
                };
                f(&tx)
            },
        );
        Ok(result?)
    }

    pub fn register_client(&self, name: &str) -> Result<ClientId, AdvanceError> {
        let id = new_uuid_to_bech32("client_")
            .map(ClientId)
            .map_err(|e| AdvanceError::IdGeneration(e.to_string()))?;
        let client = Client {
            id: id.clone(),
            name: name.to_owned(),
        };
        self.clients.insert(id.as_str().as_bytes(), encode(&client)?)?;

        tracing::debug!(client_id = %id, "registered client");
        Ok(id)
    }

    /// Stores a contract with one installment per schedule entry, numbered from 1.
    pub fn open_contract(
        &self,
        client_id: &ClientId,
        code: &str,
        schedule: &[(Amount, TimeStamp<Utc>)],
    ) -> Result<ContractId, AdvanceError> {
        if self.client(client_id)?.is_none() {
            return Err(AdvanceError::ClientNotFound);
        }
        if schedule.is_empty() {
            return Err(AdvanceError::InvalidArgument(
                "a contract needs at least one installment".into(),
            ));
        }
        if let Some(pos) = schedule.iter().position(|(amount, _)| amount.is_zero()) {
            return Err(AdvanceError::InvalidArgument(format!(
                "installment #{} has a zero amount",
                pos + 1
            )));
        }
        if let Some(pos) = schedule.iter().position(|(_, due)| !due.is_storable()) {
            return Err(AdvanceError::InvalidArgument(format!(
                "installment #{} has a due date outside the supported range",
                pos + 1
            )));
        }

        let contract_id = ContractId(self.next_id()?);
        let mut installments = Vec::with_capacity(schedule.len());
        for (idx, (amount, due_date)) in schedule.iter().enumerate() {
            installments.push(Installment {
                id: InstallmentId(self.next_id()?),
                contract_id,
                client_id: client_id.clone(),
                sequence: idx as u32 + 1,
                amount: *amount,
                due_date: due_date.clone(),
                status: InstallmentStatus::Due,
            });
        }
        let contract = Contract {
            id: contract_id,
            client_id: client_id.clone(),
            code: code.to_owned(),
            installment_ids: installments.iter().map(|i| i.id).collect(),
        };

        let result = (&self.contracts, &self.installments).transaction(|(contracts, tx_installments)| {
            for installment in &installments {
                tx_write(tx_installments, &id_key(installment.id.0), installment)?;
            }
            tx_write(contracts, &id_key(contract_id.0), &contract)
        });
        result?;

        tracing::debug!(
            contract_id = %contract_id,
            client_id = %client_id,
            installments = installments.len(),
            "opened contract"
        );
        Ok(contract_id)
    }

    /// Payment collection: flips an unsettled installment to paid.
    pub fn record_payment(&self, installment_id: InstallmentId) -> Result<(), AdvanceError> {
        let key = id_key(installment_id.0);
        let result = self.installments.transaction(|tx| {
            let Some(mut installment) = tx_read::<Installment>(tx, &key)? else {
                return abort(AdvanceError::InstallmentNotFound(installment_id));
            };
            if let Err(actual) = installment.mark_paid() {
                return abort(AdvanceError::InstallmentConflict(
                    installment_id,
                    actual,
                    InstallmentStatus::Due,
                ));
            }
            tx_write(tx, &key, &installment)
        });
        result?;

        tracing::debug!(installment_id = %installment_id, "recorded payment");
        Ok(())
    }

    pub fn client(&self, id: &ClientId) -> Result<Option<Client>, AdvanceError> {
        read(&self.clients, id.as_str().as_bytes())
    }

    pub fn contract(&self, id: ContractId) -> Result<Option<Contract>, AdvanceError> {
        read(&self.contracts, &id_key(id.0))
    }

    pub fn installment(&self, id: InstallmentId) -> Result<Option<Installment>, AdvanceError> {
        read(&self.installments, &id_key(id.0))
    }

    /// Installments of `contract` in sequence order.
    pub fn installments_of(&self, contract: &Contract) -> Result<Vec<Installment>, AdvanceError> {
        let mut installments = Vec::with_capacity(contract.installment_ids.len());
        for id in &contract.installment_ids {
            let installment = self
                .installment(*id)?
                .ok_or(AdvanceError::InstallmentNotFound(*id))?;
            installments.push(installment);
        }
        installments.sort_by_key(|i| i.sequence);
        Ok(installments)
    }

    pub fn request(&self, id: RequestId) -> Result<Option<AdvanceRequest>, AdvanceError> {
        read(&self.requests, &id_key(id.0))
    }

    pub fn all_requests(&self) -> Result<Vec<AdvanceRequest>, AdvanceError> {
        self.requests
            .iter()
            .values()
            .map(|bytes| decode(&bytes?))
            .collect()
    }

    pub fn pending_request_for(&self, contract_id: ContractId) -> Result<Option<RequestId>, AdvanceError> {
        read(&self.pending, &id_key(contract_id.0))
    }
}
