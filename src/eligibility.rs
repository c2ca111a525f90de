//! Which installments on a contract can be advanced
//!
//! Everything here is pure: callers pass the installment set and the current
//! time, nothing is read from or written to the store.
use super::error::AdvanceError;
use super::ledger::{Installment, InstallmentStatus, TimeStamp};
use chrono::{TimeDelta, Utc};

/// Days between `now` and a due date required before an installment can be advanced.
pub const DEFAULT_WINDOW_DAYS: i64 = 30;
/// Longest window accepted from configuration (ten years).
pub const MAX_WINDOW_DAYS: i64 = 3650;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EligibilityWindow(TimeDelta);

impl EligibilityWindow {
    /// Clamped to `0..=MAX_WINDOW_DAYS`.
    pub fn days(days: i64) -> Self {
        Self(TimeDelta::days(days.clamp(0, MAX_WINDOW_DAYS)))
    }
    pub fn cutoff(&self, now: &TimeStamp<Utc>) -> TimeStamp<Utc> {
        now.plus(self.0)
    }
}

impl Default for EligibilityWindow {
    fn default() -> Self {
        Self::days(DEFAULT_WINDOW_DAYS)
    }
}

/// True when the installment is due and falls strictly after the window.
pub fn is_eligible(installment: &Installment, now: &TimeStamp<Utc>, window: EligibilityWindow) -> bool {
    installment.status == InstallmentStatus::Due && installment.due_date > window.cutoff(now)
}

/// The eligible subset ordered by sequence number.
pub fn eligible_installments<'a, I>(
    installments: I,
    now: &TimeStamp<Utc>,
    window: EligibilityWindow,
) -> Vec<&'a Installment>
where
    I: IntoIterator<Item = &'a Installment>,
{
    let mut eligible: Vec<&Installment> = installments
        .into_iter()
        .filter(|i| is_eligible(i, now, window))
        .collect();
    eligible.sort_by_key(|i| i.sequence);
    eligible
}

/// Eligible installments to place on a new request, narrowed to `sequence` if given.
pub fn select_for_request<'a, I>(
    installments: I,
    sequence: Option<u32>,
    now: &TimeStamp<Utc>,
    window: EligibilityWindow,
) -> Result<Vec<&'a Installment>, AdvanceError>
where
    I: IntoIterator<Item = &'a Installment>,
{
    let eligible = eligible_installments(installments, now, window);
    if eligible.is_empty() {
        return Err(AdvanceError::NoEligibleInstallments);
    }

    match sequence {
        None => Ok(eligible),
        Some(seq) => {
            let selected: Vec<_> = eligible.into_iter().filter(|i| i.sequence == seq).collect();
            if selected.is_empty() {
                return Err(AdvanceError::InstallmentNotEligible(seq));
            }
            Ok(selected)
        }
    }
}

/// Approval only refuses due dates strictly before the cutoff, so an
/// installment sitting exactly on it still passes.
pub fn within_approval_window(
    installment: &Installment,
    now: &TimeStamp<Utc>,
    window: EligibilityWindow,
) -> bool {
    installment.due_date >= window.cutoff(now)
}
