//! Walks one contract through create -> approve and another through
//! create -> reject. Configure with ADVANCE_* variables or `.env.local`.
use anyhow::Context;
use installment_advance::{
    AdvanceApi, AdvanceRequestService, CancelSignal, Identity, ServiceConfig,
    ledger::{Amount, TimeStamp},
    request::ListQuery,
    telemetry,
};

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    telemetry::init_tracing();

    let mut config = ServiceConfig::from_env()?;
    if std::env::var(installment_advance::config::ENV_DB_PATH).is_err() {
        config.temporary = true;
    }
    let db = config.open_db()?;
    let service = AdvanceRequestService::new(db, &config)?;
    let api = AdvanceApi::new(&service);
    let cancel = CancelSignal::new();

    let client = service.ledger().register_client("Demo Client")?;
    let now = TimeStamp::new();
    let schedule: Vec<_> = [5, 20, 45, 400]
        .iter()
        .map(|days| (Amount::from_cents(150_000), now.plus_days(*days)))
        .collect();
    let first = service.ledger().open_contract(&client, "DEMO-001", &schedule)?;
    let second = service.ledger().open_contract(&client, "DEMO-002", &schedule)?;

    let me = Identity::client(client.clone());
    let approver = Identity::approver();

    let schedule = api.contract_schedule(&me, first)?;
    println!("{}", serde_json::to_string_pretty(&schedule)?);

    let approved = api
        .create_request(&me, first, None, Some("demo approve".into()), &cancel)
        .context("create on first contract failed")?;
    api.approve(&approver, &[approved.id], &cancel)?;

    let rejected = api
        .create_request(&me, second, Some(4), None, &cancel)
        .context("create on second contract failed")?;
    api.reject(&approver, &[rejected.id], &cancel)?;

    for detail in api.list_all_requests(&approver, &ListQuery::new())? {
        println!("{}", serde_json::to_string_pretty(&detail)?);
    }

    Ok(())
}
