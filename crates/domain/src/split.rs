//! Commission split calculator.
//!
//! Pure arithmetic, no I/O: given a total amount in minor currency units
//! and an ordered list of split rules, produces per-rule amounts that
//! always sum to the input total.
//!
//! Fixed amounts are deducted first, in input order, clamped to the
//! remaining balance. Percentage shares are computed against the
//! post-fixed remainder with floor division; the rounding discrepancy is
//! added entirely to the first percentage recipient. The tie-break is a
//! compatibility requirement, kept deterministic rather than proportional.

use thiserror::Error;

use crate::deal::{Money, Percent, SplitRule};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SplitError {
    #[error("recipient rule list is empty")]
    EmptyRecipients,

    #[error("percentages sum to {sum} basis points, expected {expected}")]
    PercentSumMismatch { sum: u32, expected: u32 },

    #[error("fixed amounts sum to {fixed_sum} which exceeds total {total}")]
    FixedExceedsTotal { fixed_sum: Money, total: Money },

    #[error("fixed-only rules sum to {fixed_sum}, expected exactly {total}")]
    FixedSumMismatch { fixed_sum: Money, total: Money },

    #[error("split total must not be negative, got {0}")]
    NegativeTotal(Money),
}

/// Computes the per-rule amounts for `total`, in the order the rules were
/// given.
///
/// Guarantees `sum(result) == total` for every `Ok` return.
pub fn calculate(total: Money, rules: &[SplitRule]) -> Result<Vec<Money>, SplitError> {
    if rules.is_empty() {
        return Err(SplitError::EmptyRecipients);
    }
    if total.minor_units() < 0 {
        return Err(SplitError::NegativeTotal(total));
    }

    let fixed_sum: i64 = rules
        .iter()
        .filter_map(|r| match r {
            SplitRule::Fixed(amount) => Some(amount.minor_units()),
            SplitRule::Percent(_) => None,
        })
        .sum();
    let percent_sum: u32 = rules
        .iter()
        .filter_map(|r| match r {
            SplitRule::Percent(p) => Some(p.basis_points()),
            SplitRule::Fixed(_) => None,
        })
        .sum();
    let has_percent = rules.iter().any(|r| matches!(r, SplitRule::Percent(_)));

    if fixed_sum > total.minor_units() {
        return Err(SplitError::FixedExceedsTotal {
            fixed_sum: Money::from_minor_units(fixed_sum),
            total,
        });
    }
    if has_percent && percent_sum != Percent::FULL.basis_points() {
        return Err(SplitError::PercentSumMismatch {
            sum: percent_sum,
            expected: Percent::FULL.basis_points(),
        });
    }
    if !has_percent && fixed_sum != total.minor_units() {
        return Err(SplitError::FixedSumMismatch {
            fixed_sum: Money::from_minor_units(fixed_sum),
            total,
        });
    }

    // First pass: deduct fixed amounts in input order, clamped to what is
    // left so a valid rule set can never overdraw the total.
    let mut amounts = vec![0i64; rules.len()];
    let mut remaining = total.minor_units();
    for (i, rule) in rules.iter().enumerate() {
        if let SplitRule::Fixed(amount) = rule {
            let take = amount.minor_units().min(remaining);
            amounts[i] = take;
            remaining -= take;
        }
    }

    // Second pass: floor-divide the remainder across percentage rules,
    // then assign the rounding discrepancy to the first one.
    let remainder = remaining;
    let mut floored_sum = 0i64;
    let mut first_percent: Option<usize> = None;
    for (i, rule) in rules.iter().enumerate() {
        if let SplitRule::Percent(p) = rule {
            let share = (i128::from(remainder) * i128::from(p.basis_points())
                / i128::from(Percent::FULL.basis_points())) as i64;
            amounts[i] = share;
            floored_sum += share;
            if first_percent.is_none() {
                first_percent = Some(i);
            }
        }
    }
    if let Some(first) = first_percent {
        amounts[first] += remainder - floored_sum;
    }

    Ok(amounts.into_iter().map(Money::from_minor_units).collect())
}
