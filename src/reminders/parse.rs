use chrono::{Duration, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::MagpieBotError;
use crate::Result;

/// Grammar: `<positive integer><unit> <task text>` with unit m, h, or d.
static SPEC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)([mhd])\s+(.+)$").expect("duration spec regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationUnit {
    Minutes,
    Hours,
    Days,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurationSpec {
    pub amount: i64,
    pub unit: DurationUnit,
    pub task: String,
}

impl DurationSpec {
    /// Absolute fire time for this spec. Amounts whose offset does not fit
    /// the representable time range are rejected rather than capped.
    pub fn due_from(&self, now: NaiveDateTime) -> Result<NaiveDateTime> {
        let offset = match self.unit {
            DurationUnit::Minutes => Duration::try_minutes(self.amount),
            DurationUnit::Hours => Duration::try_hours(self.amount),
            DurationUnit::Days => Duration::try_days(self.amount),
        }
        .ok_or_else(|| out_of_range(self.amount))?;
        now.checked_add_signed(offset)
            .ok_or_else(|| out_of_range(self.amount))
    }
}

fn out_of_range(amount: i64) -> MagpieBotError {
    MagpieBotError::InvalidFormat(format!("delay of {amount} is out of range"))
}

/// Parses a user-supplied duration spec such as `10m buy milk`.
pub fn parse_duration_spec(input: &str) -> Result<DurationSpec> {
    let caps = SPEC_RE
        .captures(input.trim())
        .ok_or_else(|| invalid(input))?;

    let amount: i64 = caps[1].parse().map_err(|_| invalid(input))?;
    if amount < 1 {
        return Err(invalid(input));
    }
    let unit = match &caps[2] {
        "m" => DurationUnit::Minutes,
        "h" => DurationUnit::Hours,
        _ => DurationUnit::Days,
    };
    let task = caps[3].trim().to_string();
    if task.is_empty() {
        return Err(invalid(input));
    }

    Ok(DurationSpec { amount, unit, task })
}

fn invalid(input: &str) -> MagpieBotError {
    MagpieBotError::InvalidFormat(format!("expected `<number><m|h|d> <task>`, got `{input}`"))
}
