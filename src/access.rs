//! Role gate between a resolved caller identity and the lifecycle service
//!
//! Token validation happens upstream; this only decides which role may call
//! which operation and which client id a client-side call is scoped to.
use super::cancel::CancelSignal;
use super::error::AdvanceError;
use super::ledger::{ClientId, ContractId};
use super::request::{AdvanceRequestDetail, ListQuery, RequestId};
use super::service::{AdvanceRequestService, ContractSchedule};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Client,
    Approver,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => f.write_str("CLIENT"),
            Role::Approver => f.write_str("APPROVER"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub role: Role,
    pub client_id: Option<ClientId>,
}

impl Identity {
    pub fn client(client_id: ClientId) -> Self {
        Self {
            role: Role::Client,
            client_id: Some(client_id),
        }
    }
    pub fn approver() -> Self {
        Self {
            role: Role::Approver,
            client_id: None,
        }
    }

    fn require_client(&self) -> Result<&ClientId, AdvanceError> {
        if self.role != Role::Client {
            return Err(AdvanceError::Forbidden(self.role.to_string()));
        }
        self.client_id.as_ref().ok_or(AdvanceError::Unauthorized)
    }

    fn require_approver(&self) -> Result<(), AdvanceError> {
        match self.role {
            Role::Approver => Ok(()),
            other => Err(AdvanceError::Forbidden(other.to_string())),
        }
    }
}

pub struct AdvanceApi<'a> {
    service: &'a AdvanceRequestService,
}

impl<'a> AdvanceApi<'a> {
    pub fn new(service: &'a AdvanceRequestService) -> Self {
        Self { service }
    }

    pub fn create_request(
        &self,
        identity: &Identity,
        contract_id: ContractId,
        sequence: Option<u32>,
        notes: Option<String>,
        cancel: &CancelSignal,
    ) -> Result<AdvanceRequestDetail, AdvanceError> {
        let client_id = identity.require_client()?;
        self.service
            .create_request(client_id, contract_id, sequence, notes, cancel)
    }

    pub fn get_request(
        &self,
        identity: &Identity,
        id: RequestId,
    ) -> Result<AdvanceRequestDetail, AdvanceError> {
        let client_id = identity.require_client()?;
        self.service.get_request(id, client_id)
    }

    pub fn list_my_requests(
        &self,
        identity: &Identity,
        query: &ListQuery,
    ) -> Result<Vec<AdvanceRequestDetail>, AdvanceError> {
        let client_id = identity.require_client()?;
        self.service.list_requests(client_id, query)
    }

    pub fn contract_schedule(
        &self,
        identity: &Identity,
        contract_id: ContractId,
    ) -> Result<ContractSchedule, AdvanceError> {
        let client_id = identity.require_client()?;
        self.service.contract_schedule(client_id, contract_id)
    }

    pub fn list_all_requests(
        &self,
        identity: &Identity,
        query: &ListQuery,
    ) -> Result<Vec<AdvanceRequestDetail>, AdvanceError> {
        identity.require_approver()?;
        self.service.list_all_requests(query)
    }

    pub fn approve(
        &self,
        identity: &Identity,
        ids: &[RequestId],
        cancel: &CancelSignal,
    ) -> Result<(), AdvanceError> {
        identity.require_approver()?;
        self.service.approve_requests(ids, cancel)
    }

    pub fn reject(
        &self,
        identity: &Identity,
        ids: &[RequestId],
        cancel: &CancelSignal,
    ) -> Result<(), AdvanceError> {
        identity.require_approver()?;
        self.service.reject_requests(ids, cancel)
    }
}
