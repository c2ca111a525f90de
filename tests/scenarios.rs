//! End-to-end lifecycle scenarios against a real sled database
use anyhow::Context;
use installment_advance::{
    AdvanceApi, AdvanceError, AdvanceRequestService, CancelSignal, ErrorKind, Identity,
    ServiceConfig,
    ledger::{Amount, ClientId, ContractId, InstallmentStatus, TimeStamp},
    request::{ListQuery, RequestId, RequestStatus},
};
use chrono::Utc;
use sled::open;
use std::sync::Arc;
use tempfile::{TempDir, tempdir};

// Sled locks its directory, so every test gets its own database under a
// temp dir that is removed when the returned guard drops.
fn service(name: &str) -> anyhow::Result<(TempDir, AdvanceRequestService)> {
    let temp_dir = tempdir()?;
    let db = open(temp_dir.path().join(name))?;
    let service = AdvanceRequestService::new(Arc::new(db), &ServiceConfig::default())?;
    Ok((temp_dir, service))
}

/// Contract whose installments fall due `days` after `now`, 1000.00 each.
fn contract_due_in(
    service: &AdvanceRequestService,
    client: &ClientId,
    now: &TimeStamp<Utc>,
    days: &[i64],
) -> anyhow::Result<ContractId> {
    let schedule: Vec<_> = days
        .iter()
        .map(|d| (Amount::from_cents(100_000), now.plus_days(*d)))
        .collect();
    Ok(service.ledger().open_contract(client, "CTR", &schedule)?)
}

fn statuses(service: &AdvanceRequestService, contract_id: ContractId) -> anyhow::Result<Vec<InstallmentStatus>> {
    let contract = service
        .ledger()
        .contract(contract_id)?
        .context("contract missing")?;
    Ok(service
        .ledger()
        .installments_of(&contract)?
        .iter()
        .map(|i| i.status)
        .collect())
}

fn request_status(service: &AdvanceRequestService, id: RequestId) -> anyhow::Result<RequestStatus> {
    Ok(service.ledger().request(id)?.context("request missing")?.status)
}

#[test]
fn create_then_approve_advances_installments() -> anyhow::Result<()> {
    let (_dir, service) = service("create_then_approve.db")?;
    let client = service.ledger().register_client("Ana")?;
    let now = TimeStamp::new();
    let contract_id = contract_due_in(&service, &client, &now, &[5, 20, 45, 400])?;
    let cancel = CancelSignal::new();

    let detail = service
        .create_request(&client, contract_id, None, Some("reforma".into()), &cancel)
        .context("create failed")?;

    assert_eq!(detail.status, RequestStatus::Pending);
    assert_eq!(detail.items.len(), 2);
    assert_eq!(detail.notes.as_deref(), Some("reforma"));
    assert!(detail.approved_at.is_none());
    assert!(detail
        .items
        .iter()
        .all(|i| i.amount_at_request_time == Amount::from_cents(100_000)));
    assert_eq!(
        statuses(&service, contract_id)?,
        vec![
            InstallmentStatus::Due,
            InstallmentStatus::Due,
            InstallmentStatus::AwaitingApproval,
            InstallmentStatus::AwaitingApproval,
        ]
    );

    service.approve_requests(&[detail.id], &cancel)?;

    let approved = service.get_request(detail.id, &client)?;
    assert_eq!(approved.status, RequestStatus::Approved);
    assert!(approved.approved_at.is_some());
    assert_eq!(
        statuses(&service, contract_id)?,
        vec![
            InstallmentStatus::Due,
            InstallmentStatus::Due,
            InstallmentStatus::Advanced,
            InstallmentStatus::Advanced,
        ]
    );
    assert_eq!(service.ledger().pending_request_for(contract_id)?, None);
    Ok(())
}

#[test]
fn create_then_reject_restores_due() -> anyhow::Result<()> {
    let (_dir, service) = service("create_then_reject.db")?;
    let client = service.ledger().register_client("Bruno")?;
    let now = TimeStamp::new();
    let contract_id = contract_due_in(&service, &client, &now, &[60, 90])?;
    let cancel = CancelSignal::new();

    let detail = service.create_request(&client, contract_id, None, None, &cancel)?;
    service.reject_requests(&[detail.id], &cancel)?;

    let rejected = service.get_request(detail.id, &client)?;
    assert_eq!(rejected.status, RequestStatus::Rejected);
    assert!(rejected.approved_at.is_none());
    assert_eq!(
        statuses(&service, contract_id)?,
        vec![InstallmentStatus::Due, InstallmentStatus::Due]
    );

    // the contract is free for a new request again
    let again = service.create_request(&client, contract_id, None, None, &cancel)?;
    assert_eq!(again.status, RequestStatus::Pending);
    Ok(())
}

#[test]
fn single_installment_can_be_requested() -> anyhow::Result<()> {
    let (_dir, service) = service("single_installment.db")?;
    let client = service.ledger().register_client("Carla")?;
    let now = TimeStamp::new();
    let contract_id = contract_due_in(&service, &client, &now, &[10, 50, 80])?;
    let cancel = CancelSignal::new();

    let err = service
        .create_request(&client, contract_id, Some(1), None, &cancel)
        .unwrap_err();
    assert!(matches!(err, AdvanceError::InstallmentNotEligible(1)));
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let detail = service.create_request(&client, contract_id, Some(3), None, &cancel)?;
    assert_eq!(detail.items.len(), 1);
    assert_eq!(
        statuses(&service, contract_id)?,
        vec![
            InstallmentStatus::Due,
            InstallmentStatus::Due,
            InstallmentStatus::AwaitingApproval,
        ]
    );
    Ok(())
}

#[test]
fn second_pending_request_conflicts() -> anyhow::Result<()> {
    let (_dir, service) = service("second_pending.db")?;
    let client = service.ledger().register_client("Davi")?;
    let now = TimeStamp::new();
    let contract_id = contract_due_in(&service, &client, &now, &[40, 70, 100])?;
    let cancel = CancelSignal::new();

    let first = service.create_request(&client, contract_id, Some(1), None, &cancel)?;

    // installment 2 is still eligible, but the pending request wins
    let err = service
        .create_request(&client, contract_id, Some(2), None, &cancel)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    match err {
        AdvanceError::PendingRequestExists { request_id, .. } => assert_eq!(request_id, first.id),
        other => panic!("unexpected error {other:?}"),
    }
    Ok(())
}

#[test]
fn contract_without_eligible_installments_is_invalid_state() -> anyhow::Result<()> {
    let (_dir, service) = service("no_eligible.db")?;
    let client = service.ledger().register_client("Eva")?;
    let now = TimeStamp::new();
    let contract_id = contract_due_in(&service, &client, &now, &[3, 15, 30])?;

    let err = service
        .create_request(&client, contract_id, None, None, &CancelSignal::new())
        .unwrap_err();

    assert!(matches!(err, AdvanceError::NoEligibleInstallments));
    assert_eq!(service.ledger().pending_request_for(contract_id)?, None);
    assert!(service.list_all_requests(&ListQuery::new())?.is_empty());
    Ok(())
}

#[test]
fn other_clients_contracts_and_requests_read_as_not_found() -> anyhow::Result<()> {
    let (_dir, service) = service("cross_tenant.db")?;
    let owner = service.ledger().register_client("Owner")?;
    let intruder = service.ledger().register_client("Intruder")?;
    let now = TimeStamp::new();
    let contract_id = contract_due_in(&service, &owner, &now, &[60])?;
    let cancel = CancelSignal::new();

    let err = service
        .create_request(&intruder, contract_id, None, None, &cancel)
        .unwrap_err();
    assert!(matches!(err, AdvanceError::ContractNotFound(_)));
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let detail = service.create_request(&owner, contract_id, None, None, &cancel)?;
    let err = service.get_request(detail.id, &intruder).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = service
        .contract_schedule(&intruder, contract_id)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let unknown = ClientId::from("client_1ghost");
    let err = service
        .create_request(&unknown, contract_id, None, None, &cancel)
        .unwrap_err();
    assert!(matches!(err, AdvanceError::ClientNotFound));
    Ok(())
}

#[test]
fn approval_batch_is_all_or_nothing() -> anyhow::Result<()> {
    let (_dir, service) = service("approval_batch.db")?;
    let client = service.ledger().register_client("Fabio")?;
    let now = TimeStamp::new();
    let cancel = CancelSignal::new();

    let mut ids = Vec::new();
    let mut contracts = Vec::new();
    for _ in 0..3 {
        let contract_id = contract_due_in(&service, &client, &now, &[60, 120])?;
        ids.push(service.create_request(&client, contract_id, None, None, &cancel)?.id);
        contracts.push(contract_id);
    }
    service.reject_requests(&ids[1..2], &cancel)?;

    let err = service.approve_requests(&ids, &cancel).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    match &err {
        AdvanceError::NotPending(offenders) => {
            assert_eq!(offenders.len(), 1);
            assert_eq!(offenders[0].request_id, ids[1]);
            assert_eq!(offenders[0].actual, RequestStatus::Rejected);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(err.to_string().contains("REJECTED"));

    assert_eq!(request_status(&service, ids[0])?, RequestStatus::Pending);
    assert_eq!(request_status(&service, ids[2])?, RequestStatus::Pending);
    assert_eq!(
        statuses(&service, contracts[0])?,
        vec![InstallmentStatus::AwaitingApproval; 2]
    );
    assert_eq!(
        statuses(&service, contracts[2])?,
        vec![InstallmentStatus::AwaitingApproval; 2]
    );
    Ok(())
}

#[test]
fn unknown_id_in_batch_is_not_found() -> anyhow::Result<()> {
    let (_dir, service) = service("unknown_id.db")?;
    let client = service.ledger().register_client("Gabi")?;
    let now = TimeStamp::new();
    let contract_id = contract_due_in(&service, &client, &now, &[60])?;
    let cancel = CancelSignal::new();
    let detail = service.create_request(&client, contract_id, None, None, &cancel)?;

    let err = service
        .approve_requests(&[detail.id, RequestId(9999)], &cancel)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(err.to_string().contains("9999"));
    match &err {
        AdvanceError::RequestsNotFound(missing) => assert_eq!(missing, &vec![RequestId(9999)]),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(request_status(&service, detail.id)?, RequestStatus::Pending);

    let err = service
        .reject_requests(&[RequestId(9999)], &cancel)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    Ok(())
}

#[test]
fn duplicate_ids_are_collapsed() -> anyhow::Result<()> {
    let (_dir, service) = service("duplicate_ids.db")?;
    let client = service.ledger().register_client("Hugo")?;
    let now = TimeStamp::new();
    let contract_id = contract_due_in(&service, &client, &now, &[60])?;
    let cancel = CancelSignal::new();
    let detail = service.create_request(&client, contract_id, None, None, &cancel)?;

    service.approve_requests(&[detail.id, detail.id, detail.id], &cancel)?;

    assert_eq!(request_status(&service, detail.id)?, RequestStatus::Approved);
    Ok(())
}

#[test]
fn empty_batch_is_rejected() -> anyhow::Result<()> {
    let (_dir, service) = service("empty_batch.db")?;
    let cancel = CancelSignal::new();

    let err = service.approve_requests(&[], &cancel).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    let err = service.reject_requests(&[], &cancel).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    Ok(())
}

#[test]
fn resolving_a_terminal_request_conflicts() -> anyhow::Result<()> {
    let (_dir, service) = service("terminal.db")?;
    let client = service.ledger().register_client("Iris")?;
    let now = TimeStamp::new();
    let contract_id = contract_due_in(&service, &client, &now, &[60])?;
    let cancel = CancelSignal::new();
    let detail = service.create_request(&client, contract_id, None, None, &cancel)?;

    service.approve_requests(&[detail.id], &cancel)?;

    let err = service.approve_requests(&[detail.id], &cancel).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    let err = service.reject_requests(&[detail.id], &cancel).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    assert_eq!(statuses(&service, contract_id)?, vec![InstallmentStatus::Advanced]);
    Ok(())
}

#[test]
fn approval_refuses_installments_that_drifted_into_the_window() -> anyhow::Result<()> {
    let (_dir, service) = service("drifted.db")?;
    let client = service.ledger().register_client("Joao")?;
    let now = TimeStamp::new();
    let contract_id = contract_due_in(&service, &client, &now, &[45])?;
    let cancel = CancelSignal::new();
    let detail = service.create_request_at(&client, contract_id, None, None, now.clone(), &cancel)?;

    // three weeks later the installment is only 24 days out
    let err = service
        .approve_requests_at(&[detail.id], now.plus_days(21), &cancel)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert!(err.to_string().contains("due too soon"));
    assert_eq!(request_status(&service, detail.id)?, RequestStatus::Pending);
    assert_eq!(statuses(&service, contract_id)?, vec![InstallmentStatus::AwaitingApproval]);
    Ok(())
}

#[test]
fn approval_refuses_installments_paid_meanwhile() -> anyhow::Result<()> {
    let (_dir, service) = service("paid_meanwhile.db")?;
    let client = service.ledger().register_client("Karen")?;
    let now = TimeStamp::new();
    let contract_id = contract_due_in(&service, &client, &now, &[60, 90])?;
    let cancel = CancelSignal::new();
    let detail = service.create_request(&client, contract_id, None, None, &cancel)?;

    service.ledger().record_payment(detail.items[0].installment_id)?;

    let err = service.approve_requests(&[detail.id], &cancel).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert!(err.to_string().contains("PAID"));
    Ok(())
}

#[test]
fn rejection_leaves_paid_installments_alone() -> anyhow::Result<()> {
    let (_dir, service) = service("reject_paid.db")?;
    let client = service.ledger().register_client("Leo")?;
    let now = TimeStamp::new();
    let contract_id = contract_due_in(&service, &client, &now, &[60, 90])?;
    let cancel = CancelSignal::new();
    let detail = service.create_request(&client, contract_id, None, None, &cancel)?;

    service.ledger().record_payment(detail.items[1].installment_id)?;
    service.reject_requests(&[detail.id], &cancel)?;

    assert_eq!(
        statuses(&service, contract_id)?,
        vec![InstallmentStatus::Due, InstallmentStatus::Paid]
    );
    assert_eq!(request_status(&service, detail.id)?, RequestStatus::Rejected);
    Ok(())
}

#[test]
fn listings_are_scoped_filtered_and_newest_first() -> anyhow::Result<()> {
    let (_dir, service) = service("listings.db")?;
    let mine = service.ledger().register_client("Mara")?;
    let theirs = service.ledger().register_client("Nico")?;
    let base = TimeStamp::new();
    let cancel = CancelSignal::new();

    let mut my_ids = Vec::new();
    for day in 0..3 {
        let contract_id = contract_due_in(&service, &mine, &base, &[200])?;
        let at = base.plus_days(day);
        my_ids.push(
            service
                .create_request_at(&mine, contract_id, None, None, at, &cancel)?
                .id,
        );
    }
    let other_contract = contract_due_in(&service, &theirs, &base, &[200])?;
    let other = service.create_request_at(&theirs, other_contract, None, None, base.plus_days(1), &cancel)?;
    service.approve_requests_at(&[my_ids[0]], base.plus_days(3), &cancel)?;

    let listed: Vec<RequestId> = service
        .list_requests(&mine, &ListQuery::new())?
        .iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(listed, vec![my_ids[2], my_ids[1], my_ids[0]]);

    let pending: Vec<RequestId> = service
        .list_requests(&mine, &ListQuery::new().set_status(RequestStatus::Pending))?
        .iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(pending, vec![my_ids[2], my_ids[1]]);

    let ranged: Vec<RequestId> = service
        .list_requests(
            &mine,
            &ListQuery::new()
                .set_created_from(base.plus_days(1))
                .set_created_to(base.plus_days(1)),
        )?
        .iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ranged, vec![my_ids[1]]);

    let all = service.list_all_requests(&ListQuery::new())?;
    assert_eq!(all.len(), 4);
    assert!(all.iter().any(|r| r.id == other.id));

    let second_page: Vec<RequestId> = service
        .list_all_requests(&ListQuery::new().set_page(2, 3))?
        .iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(second_page, vec![my_ids[0]]);
    Ok(())
}

#[test]
fn concurrent_creations_yield_one_pending_request() -> anyhow::Result<()> {
    let (_dir, service) = service("concurrent.db")?;
    let client = service.ledger().register_client("Otto")?;
    let now = TimeStamp::new();
    let contract_id = contract_due_in(&service, &client, &now, &[60, 90, 120])?;
    let service = Arc::new(service);

    let results: Vec<Result<_, AdvanceError>> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = Arc::clone(&service);
                let client = client.clone();
                s.spawn(move || {
                    service.create_request(&client, contract_id, None, None, &CancelSignal::new())
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("creator thread panicked"))
            .collect()
    });

    let created = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(created, 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| e.kind() == ErrorKind::Conflict));
    assert_eq!(service.list_all_requests(&ListQuery::new())?.len(), 1);
    Ok(())
}

#[test]
fn cancelled_operations_change_nothing() -> anyhow::Result<()> {
    let (_dir, service) = service("cancelled.db")?;
    let client = service.ledger().register_client("Paula")?;
    let now = TimeStamp::new();
    let contract_id = contract_due_in(&service, &client, &now, &[60])?;

    let cancelled = CancelSignal::new();
    cancelled.cancel();

    let err = service
        .create_request(&client, contract_id, None, None, &cancelled)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(statuses(&service, contract_id)?, vec![InstallmentStatus::Due]);
    assert_eq!(service.ledger().pending_request_for(contract_id)?, None);

    let detail = service.create_request(&client, contract_id, None, None, &CancelSignal::new())?;
    let err = service.approve_requests(&[detail.id], &cancelled).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(request_status(&service, detail.id)?, RequestStatus::Pending);
    Ok(())
}

#[test]
fn schedule_flags_eligible_installments() -> anyhow::Result<()> {
    let (_dir, service) = service("schedule.db")?;
    let client = service.ledger().register_client("Quim")?;
    let now = TimeStamp::new();
    let contract_id = contract_due_in(&service, &client, &now, &[5, 20, 45, 400])?;

    let schedule = service.contract_schedule_at(&client, contract_id, now)?;
    let flags: Vec<(u32, bool)> = schedule
        .installments
        .iter()
        .map(|e| (e.sequence, e.eligible))
        .collect();

    assert_eq!(flags, vec![(1, false), (2, false), (3, true), (4, true)]);
    Ok(())
}

#[test]
fn api_enforces_roles() -> anyhow::Result<()> {
    let (_dir, service) = service("api_roles.db")?;
    let client = service.ledger().register_client("Rita")?;
    let now = TimeStamp::new();
    let contract_id = contract_due_in(&service, &client, &now, &[60])?;
    let cancel = CancelSignal::new();
    let api = AdvanceApi::new(&service);
    let as_client = Identity::client(client.clone());
    let as_approver = Identity::approver();

    let err = api
        .create_request(&as_approver, contract_id, None, None, &cancel)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let detail = api.create_request(&as_client, contract_id, None, None, &cancel)?;
    assert_eq!(api.get_request(&as_client, detail.id)?.id, detail.id);
    assert_eq!(api.list_my_requests(&as_client, &ListQuery::new())?.len(), 1);

    let err = api.approve(&as_client, &[detail.id], &cancel).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    let err = api
        .list_all_requests(&as_client, &ListQuery::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    api.approve(&as_approver, &[detail.id], &cancel)?;
    assert_eq!(
        api.list_all_requests(&as_approver, &ListQuery::new())?[0].status,
        RequestStatus::Approved
    );
    Ok(())
}
