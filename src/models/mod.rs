//! Core domain types shared across the persistence, state machine, and API layers.

use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Integer micro-USDT amount (TRC20 USDT carries 6 decimals). Never compare or
/// sum amounts as floating point; all monetary arithmetic goes through this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct MicroUsdt(pub i64);

impl MicroUsdt {
    pub const ZERO: MicroUsdt = MicroUsdt(0);
    const SCALE: i64 = 1_000_000;

    pub fn from_usdt(whole: i64) -> Self {
        MicroUsdt(whole.saturating_mul(Self::SCALE))
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }
}

/// Flat 15 USDT under 300, else 5% rounded to the nearest cent — the deal's
/// commission schedule; never caller-supplied.
pub fn compute_commission(amount: MicroUsdt) -> MicroUsdt {
    let amount_usdt = amount.0 as f64 / MicroUsdt::SCALE as f64;
    let commission_usdt = if amount_usdt < 300.0 { 15.0 } else { (amount_usdt * 0.05 * 100.0).round() / 100.0 };
    MicroUsdt((commission_usdt * MicroUsdt::SCALE as f64).round() as i64)
}

impl fmt::Display for MicroUsdt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.0 / Self::SCALE, self.0.rem_euclid(Self::SCALE))
    }
}

impl Add for MicroUsdt {
    type Output = MicroUsdt;
    fn add(self, rhs: Self) -> Self::Output {
        MicroUsdt(self.0 + rhs.0)
    }
}

impl Sub for MicroUsdt {
    type Output = MicroUsdt;
    fn sub(self, rhs: Self) -> Self::Output {
        MicroUsdt(self.0 - rhs.0)
    }
}

impl FromStr for MicroUsdt {
    type Err = std::num::ParseIntError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(MicroUsdt(s.parse()?))
    }
}

/// Lifecycle status of a Deal. See `state_machine` for the legal transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DealStatus {
    Created,
    AwaitingDeposit,
    Funded,
    Released,
    Refunded,
    Disputed,
    ResolvedBuyer,
    ResolvedSeller,
    Cancelled,
    Failed,
}

impl fmt::Display for DealStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DealStatus::Created => "created",
            DealStatus::AwaitingDeposit => "awaiting_deposit",
            DealStatus::Funded => "funded",
            DealStatus::Released => "released",
            DealStatus::Refunded => "refunded",
            DealStatus::Disputed => "disputed",
            DealStatus::ResolvedBuyer => "resolved_buyer",
            DealStatus::ResolvedSeller => "resolved_seller",
            DealStatus::Cancelled => "cancelled",
            DealStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl FromStr for DealStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "created" => DealStatus::Created,
            "awaiting_deposit" => DealStatus::AwaitingDeposit,
            "funded" => DealStatus::Funded,
            "released" => DealStatus::Released,
            "refunded" => DealStatus::Refunded,
            "disputed" => DealStatus::Disputed,
            "resolved_buyer" => DealStatus::ResolvedBuyer,
            "resolved_seller" => DealStatus::ResolvedSeller,
            "cancelled" => DealStatus::Cancelled,
            "failed" => DealStatus::Failed,
            other => return Err(format!("invalid deal status: {other}")),
        })
    }
}

impl DealStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DealStatus::Released
                | DealStatus::Refunded
                | DealStatus::ResolvedBuyer
                | DealStatus::ResolvedSeller
                | DealStatus::Cancelled
                | DealStatus::Failed
        )
    }
}

/// Who covers the commission at deposit time. `Split` divides it in half,
/// with integer truncation giving the buyer's half and the remainder to the
/// seller's side of the payout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CommissionPayer {
    Buyer,
    Seller,
    Split,
}

impl fmt::Display for CommissionPayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommissionPayer::Buyer => "buyer",
            CommissionPayer::Seller => "seller",
            CommissionPayer::Split => "split",
        };
        write!(f, "{s}")
    }
}

impl FromStr for CommissionPayer {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "buyer" => CommissionPayer::Buyer,
            "seller" => CommissionPayer::Seller,
            "split" => CommissionPayer::Split,
            other => return Err(format!("invalid commission payer: {other}")),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PendingKeyValidation {
    BuyerRefund,
    SellerRelease,
    DisputeBuyer,
    DisputeSeller,
}

impl fmt::Display for PendingKeyValidation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PendingKeyValidation::BuyerRefund => "buyer_refund",
            PendingKeyValidation::SellerRelease => "seller_release",
            PendingKeyValidation::DisputeBuyer => "dispute_buyer",
            PendingKeyValidation::DisputeSeller => "dispute_seller",
        };
        write!(f, "{s}")
    }
}

impl FromStr for PendingKeyValidation {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "buyer_refund" => PendingKeyValidation::BuyerRefund,
            "seller_release" => PendingKeyValidation::SellerRelease,
            "dispute_buyer" => PendingKeyValidation::DisputeBuyer,
            "dispute_seller" => PendingKeyValidation::DisputeSeller,
            other => return Err(format!("invalid pending key validation tag: {other}")),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Deal {
    pub id: Uuid,
    pub buyer_id: String,
    pub seller_id: String,
    pub arbiter_id: String,
    pub amount: MicroUsdt,
    /// Registered payout destination, distinct from the ephemeral multisig
    /// signer address in `MultisigWallet`: the signer key is shown once and
    /// never persisted, so funds must never go there.
    pub buyer_payout_address: String,
    pub seller_payout_address: String,
    pub commission_payer: CommissionPayer,
    pub status: DealStatus,
    pub multisig_address: Option<String>,
    pub deadline: NaiveDateTime,
    pub grace_expires_at: Option<NaiveDateTime>,
    /// Monotonic latch: false -> true only, set before the notify attempt.
    pub deposit_notification_sent: bool,
    /// Monotonic latch: false -> true only, set before the notify attempt.
    pub deadline_notification_sent: bool,
    /// Seller has marked their side of the work done. Orthogonal to `status`:
    /// it only changes which side the Deadline Monitor's grace-expiry branch
    /// favors (seller release vs. buyer refund), so it rides alongside
    /// `Funded` instead of being its own `DealStatus` variant.
    pub work_submitted: bool,
    /// Set at most once per deal; cleared only on successful key validation.
    pub pending_key_validation: Option<PendingKeyValidation>,
    /// Persisted once the Payout Pipeline's cost accounting step runs; absent
    /// until then.
    pub operational_costs: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub version: i64,
}

impl Deal {
    pub fn commission(&self) -> MicroUsdt {
        compute_commission(self.amount)
    }

    /// Share of the commission the buyer must add on top of `amount` at
    /// deposit time.
    pub fn commission_share_of_buyer(&self) -> MicroUsdt {
        match self.commission_payer {
            CommissionPayer::Buyer => self.commission(),
            CommissionPayer::Seller => MicroUsdt::ZERO,
            CommissionPayer::Split => MicroUsdt(self.commission().0 / 2),
        }
    }

    pub fn deposit_required(&self) -> MicroUsdt {
        self.amount + self.commission_share_of_buyer()
    }

    /// Net amount paid to the winning party: `amount` minus whatever share of
    /// the commission wasn't already collected from the buyer at deposit time.
    pub fn payout_amount(&self) -> MicroUsdt {
        self.amount - (self.commission() - self.commission_share_of_buyer())
    }
}

/// 2-of-3 multisig wallet provisioned for a single deal. Child of `Deal`,
/// never the other way around.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MultisigWallet {
    pub deal_id: Uuid,
    pub address: String,
    pub buyer_key_addr: String,
    pub seller_key_addr: String,
    pub arbiter_key_addr: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deposit,
    Payout,
    Commission,
    Refund,
    TrxSweep,
    ResourceRental,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Payout => "payout",
            TransactionKind::Commission => "commission",
            TransactionKind::Refund => "refund",
            TransactionKind::TrxSweep => "trx_sweep",
            TransactionKind::ResourceRental => "resource_rental",
        };
        write!(f, "{s}")
    }
}

impl FromStr for TransactionKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "deposit" => TransactionKind::Deposit,
            "payout" => TransactionKind::Payout,
            "commission" => TransactionKind::Commission,
            "refund" => TransactionKind::Refund,
            "trx_sweep" => TransactionKind::TrxSweep,
            "resource_rental" => TransactionKind::ResourceRental,
            other => return Err(format!("invalid transaction kind: {other}")),
        })
    }
}

/// Append-only ledger row. Every on-chain transfer the service makes or
/// observes for a deal gets exactly one row here.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransactionRecord {
    pub id: i64,
    pub deal_id: Uuid,
    pub kind: TransactionKind,
    pub tx_hash: Option<String>,
    pub amount: MicroUsdt,
    pub confirmed: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditEntry {
    pub id: i64,
    pub deal_id: Uuid,
    pub from_status: Option<DealStatus>,
    pub to_status: DealStatus,
    pub actor: String,
    pub reason: String,
    pub created_at: NaiveDateTime,
}

/// Narrow-scope, TTL-bound credential handed out for one privileged
/// operation (e.g. arbiter key validation before a payout).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Session {
    pub id: Uuid,
    pub deal_id: Uuid,
    pub user_id: String,
    pub scope: String,
    pub attempts: u32,
    pub expires_at: NaiveDateTime,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserDisputeStats {
    pub user_id: String,
    pub win_streak: u32,
    pub loss_streak: u32,
    pub blacklisted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DisputeOutcome {
    Buyer,
    Seller,
}
