//! Value objects for the deal domain.

use chrono::{DateTime, Utc};
use common::{PartyId, TaxId};
use serde::{Deserialize, Serialize};

use super::status::{DisputeStatus, EscalationLevel, MilestoneStatus, PayoutStatus};
use super::DealStatus;

/// Money amount in minor currency units to avoid floating point issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money {
    minor_units: i64,
}

impl Money {
    /// Creates an amount from minor currency units (e.g. 1000 = 10.00).
    pub fn from_minor_units(minor_units: i64) -> Self {
        Self { minor_units }
    }

    /// Creates an amount from major currency units.
    pub fn from_major_units(major: i64) -> Self {
        Self {
            minor_units: major * 100,
        }
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self { minor_units: 0 }
    }

    /// Returns the amount in minor units.
    pub fn minor_units(&self) -> i64 {
        self.minor_units
    }

    /// Returns true if the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.minor_units == 0
    }

    /// Returns true if the amount is strictly positive.
    pub fn is_positive(&self) -> bool {
        self.minor_units > 0
    }

    /// Returns true if the amount is negative.
    pub fn is_negative(&self) -> bool {
        self.minor_units < 0
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.minor_units < 0 { "-" } else { "" };
        let abs = self.minor_units.abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money {
            minor_units: self.minor_units + rhs.minor_units,
        }
    }
}

impl std::ops::Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Self) -> Self::Output {
        Money {
            minor_units: self.minor_units - rhs.minor_units,
        }
    }
}

impl std::ops::AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.minor_units += rhs.minor_units;
    }
}

impl std::ops::SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        self.minor_units -= rhs.minor_units;
    }
}

/// Percentage in basis points (10000 = 100%), so fractional percentages
/// like 33.33% stay exact integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Percent {
    basis_points: u32,
}

impl Percent {
    /// One hundred percent.
    pub const FULL: Percent = Percent {
        basis_points: 10_000,
    };

    /// Creates a percentage from basis points (3333 = 33.33%).
    pub fn from_basis_points(basis_points: u32) -> Self {
        Self { basis_points }
    }

    /// Creates a percentage from whole percent (60 = 60%).
    pub fn from_percent(percent: u32) -> Self {
        Self {
            basis_points: percent * 100,
        }
    }

    /// Returns the value in basis points.
    pub fn basis_points(&self) -> u32 {
        self.basis_points
    }
}

impl std::fmt::Display for Percent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:02}%", self.basis_points / 100, self.basis_points % 100)
    }
}

/// How a recipient's share of the commission is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitRule {
    /// Percentage of the split input amount (after fixed deductions).
    Percent(Percent),

    /// Fixed amount deducted before percentages.
    Fixed(Money),
}

/// Role a recipient plays in the deal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientRole {
    Agent,
    Agency,
    Lead,
    PlatformFee,
}

impl std::fmt::Display for RecipientRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RecipientRole::Agent => "agent",
            RecipientRole::Agency => "agency",
            RecipientRole::Lead => "lead",
            RecipientRole::PlatformFee => "platform_fee",
        };
        write!(f, "{s}")
    }
}

/// Input description of a split recipient, before amounts are calculated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientSpec {
    pub role: RecipientRole,
    pub party_id: PartyId,
    pub name: String,
    /// Legal identifier required for provider-side registration.
    pub tax_id: Option<TaxId>,
    pub rule: SplitRule,
}

impl RecipientSpec {
    pub fn new(
        role: RecipientRole,
        party_id: PartyId,
        name: impl Into<String>,
        rule: SplitRule,
    ) -> Self {
        Self {
            role,
            party_id,
            name: name.into(),
            tax_id: None,
            rule,
        }
    }

    pub fn with_tax_id(mut self, tax_id: TaxId) -> Self {
        self.tax_id = Some(tax_id);
        self
    }
}

/// A party entitled to a portion of the deal's commission, with its
/// calculated amount and payout progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitRecipient {
    pub role: RecipientRole,
    pub party_id: PartyId,
    pub name: String,
    pub tax_id: Option<TaxId>,
    pub rule: SplitRule,
    pub calculated_amount: Money,
    pub payout_status: PayoutStatus,
    /// Beneficiary reference assigned by the provider at registration.
    pub beneficiary_ref: Option<String>,
}

impl SplitRecipient {
    /// Builds a recipient record from its spec and calculated amount.
    pub fn from_spec(spec: &RecipientSpec, calculated_amount: Money) -> Self {
        Self {
            role: spec.role,
            party_id: spec.party_id,
            name: spec.name.clone(),
            tax_id: spec.tax_id.clone(),
            rule: spec.rule,
            calculated_amount,
            payout_status: PayoutStatus::Pending,
            beneficiary_ref: None,
        }
    }
}

/// Which payment workflow governs the deal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentModel {
    /// Client pays the agent directly; no provider-held funds.
    LegacyDirect,

    /// Funds flow into the provider's nominal account and are split on
    /// release.
    #[default]
    ProviderSplit,
}

impl std::fmt::Display for PaymentModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PaymentModel::LegacyDirect => "legacy_direct",
            PaymentModel::ProviderSplit => "provider_split",
        };
        write!(f, "{s}")
    }
}

/// Condition that makes a milestone's funds eligible for release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseTrigger {
    /// Release as soon as the milestone is paid.
    Immediate,

    /// Release after the configured short hold elapses.
    ShortHold,

    /// Release only on explicit service confirmation.
    Confirmation,

    /// Release at a fixed date.
    Date,
}

impl std::fmt::Display for ReleaseTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReleaseTrigger::Immediate => "immediate",
            ReleaseTrigger::ShortHold => "short_hold",
            ReleaseTrigger::Confirmation => "confirmation",
            ReleaseTrigger::Date => "date",
        };
        write!(f, "{s}")
    }
}

/// Input description of a milestone: its share of the commission and its
/// release trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneSpec {
    pub step_no: u32,
    pub percent: Percent,
    pub trigger: ReleaseTrigger,
    /// Only meaningful for the `Date` trigger.
    pub release_at: Option<DateTime<Utc>>,
}

/// A sub-payment of the deal's commission with its own release schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    pub step_no: u32,
    pub percent: Percent,
    pub amount: Money,
    pub trigger: ReleaseTrigger,
    pub status: MilestoneStatus,
    pub release_scheduled_at: Option<DateTime<Utc>>,
}

/// Outcome of a resolved dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeResolution {
    FullRefund,
    PartialRefund,
    NoRefund,
    SplitAdjustment,
}

impl std::fmt::Display for DisputeResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DisputeResolution::FullRefund => "full_refund",
            DisputeResolution::PartialRefund => "partial_refund",
            DisputeResolution::NoRefund => "no_refund",
            DisputeResolution::SplitAdjustment => "split_adjustment",
        };
        write!(f, "{s}")
    }
}

/// The dispute currently or last attached to a deal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeRecord {
    pub initiator: PartyId,
    pub reason: String,
    pub status: DisputeStatus,
    pub level: EscalationLevel,
    /// Deadline for the current review level; passing it escalates.
    pub level_deadline: DateTime<Utc>,
    pub opened_at: DateTime<Utc>,
    /// Status the deal returns to when the dispute ends without a refund.
    pub resumed_from: DealStatus,
    pub resolution: Option<DisputeResolution>,
    pub refund_amount: Option<Money>,
}

/// Input for creating a deal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDeal {
    pub creator: PartyId,
    pub payment_model: PaymentModel,
    pub total_price: Money,
    pub total_commission: Money,
    pub recipients: Vec<RecipientSpec>,
    /// Optional milestone schedule; empty means a single implicit payment.
    pub milestones: Vec<MilestoneSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn money_arithmetic_and_display() {
        let a = Money::from_minor_units(1234);
        let b = Money::from_minor_units(766);
        assert_eq!((a + b).minor_units(), 2000);
        assert_eq!((a - b).minor_units(), 468);
        assert_eq!(a.to_string(), "12.34");
        assert_eq!(Money::from_minor_units(-5).to_string(), "-0.05");
        assert_eq!(Money::from_major_units(10).minor_units(), 1000);
    }

    #[test]
    fn percent_display_and_constructors() {
        assert_eq!(Percent::from_percent(60).basis_points(), 6000);
        assert_eq!(Percent::from_basis_points(3333).to_string(), "33.33%");
        assert_eq!(Percent::FULL.to_string(), "100.00%");
    }

    #[test]
    fn recipient_from_spec_starts_pending() {
        let spec = RecipientSpec::new(
            RecipientRole::Agent,
            PartyId::new(),
            "Lead Agent",
            SplitRule::Percent(Percent::FULL),
        );
        let recipient = SplitRecipient::from_spec(&spec, Money::from_minor_units(100_000));
        assert_eq!(recipient.payout_status, PayoutStatus::Pending);
        assert_eq!(recipient.calculated_amount.minor_units(), 100_000);
        assert!(recipient.beneficiary_ref.is_none());
    }

    #[test]
    fn split_rule_serialization() {
        let rule = SplitRule::Percent(Percent::from_basis_points(6000));
        let json = serde_json::to_string(&rule).unwrap();
        let back: SplitRule = serde_json::from_str(&json).unwrap();
        assert_eq!(rule, back);

        let rule = SplitRule::Fixed(Money::from_minor_units(5_000));
        let json = serde_json::to_string(&rule).unwrap();
        let back: SplitRule = serde_json::from_str(&json).unwrap();
        assert_eq!(rule, back);
    }
}
