//! Installment ledger records: clients, contracts and their installment schedules
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Serialize};
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
    Hash,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstallmentStatus {
    #[n(0)]
    Due,
    #[n(1)]
    Paid,
    #[n(2)]
    AwaitingApproval,
    #[n(3)]
    Advanced,
}

impl fmt::Display for InstallmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstallmentStatus::Due => "DUE",
            InstallmentStatus::Paid => "PAID",
            InstallmentStatus::AwaitingApproval => "AWAITING_APPROVAL",
            InstallmentStatus::Advanced => "ADVANCED",
        };
        f.write_str(s)
    }
}

// bech32m encoded uuid7, see `utils::new_uuid_to_bech32`
#[derive(
    minicbor::Encode,
    minicbor::Decode,
    Serialize,
    Deserialize,
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
#[cbor(transparent)]
#[serde(transparent)]
pub struct ClientId(#[n(0)] pub String);

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
pub struct ContractId(#[n(0)] pub u64);

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
pub struct InstallmentId(#[n(0)] pub u64);

/// Money in minor units (cents). Integers only, never floats.
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
pub struct Amount(#[n(0)] pub u64);

impl Amount {
    pub fn from_cents(cents: u64) -> Self {
        Self(cents)
    }
    pub fn cents(&self) -> u64 {
        self.0
    }
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for InstallmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ClientId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        ClientId(value.to_owned())
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    /// `None` when the fields don't name a valid UTC instant.
    pub fn new_with(
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        min: u32,
        sec: u32,
    ) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(Self)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    /// Saturates at the ends of chrono's range instead of overflowing.
    pub fn plus_days(&self, days: i64) -> Self {
        let delta = TimeDelta::try_days(days).unwrap_or(if days < 0 {
            TimeDelta::MIN
        } else {
            TimeDelta::MAX
        });
        self.plus(delta)
    }
    pub fn plus(&self, delta: TimeDelta) -> Self {
        match self.0.checked_add_signed(delta) {
            Some(dt) => Self(dt),
            None if delta < TimeDelta::zero() => Self(DateTime::<Utc>::MIN_UTC),
            None => Self(DateTime::<Utc>::MAX_UTC),
        }
    }
    /// Whether the instant fits the stored encoding (nanoseconds since the
    /// epoch as an i64, roughly years 1677 to 2262).
    pub fn is_storable(&self) -> bool {
        self.0.timestamp_nanos_opt().is_some()
    }
}

// chrono's `Utc` has no `Ord`, so the derive would not apply.
impl PartialOrd for TimeStamp<Utc> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeStamp<Utc> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Client {
    #[n(0)]
    pub id: ClientId,
    #[n(1)]
    pub name: String,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Contract {
    #[n(0)]
    pub id: ContractId,
    #[n(1)]
    pub client_id: ClientId,
    #[n(2)]
    pub code: String,
    #[n(3)]
    pub installment_ids: Vec<InstallmentId>, // in sequence order
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Installment {
    #[n(0)]
    pub id: InstallmentId,
    #[n(1)]
    pub contract_id: ContractId,
    #[n(2)]
    pub client_id: ClientId,
    #[n(3)]
    pub sequence: u32, // 1-based within the contract
    #[n(4)]
    pub amount: Amount,
    #[n(5)]
    pub due_date: TimeStamp<Utc>,
    #[n(6)]
    pub status: InstallmentStatus,
}

impl Installment {
    /// Payment collection. Collection runs independently of advance requests,
    /// so an installment awaiting approval can still be paid.
    pub fn mark_paid(&mut self) -> Result<(), InstallmentStatus> {
        match self.status {
            InstallmentStatus::Due | InstallmentStatus::AwaitingApproval => {
                self.status = InstallmentStatus::Paid;
                Ok(())
            }
            other => Err(other),
        }
    }
}
