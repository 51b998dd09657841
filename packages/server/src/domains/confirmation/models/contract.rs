use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Contract states the confirmation workflow reads or writes.
///
/// The broader contract lifecycle is owned elsewhere; this subsystem only
/// moves `Draft` to `PendingConfirmation` on first send, and
/// `PendingConfirmation` to `Approved` on successful verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "contract_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractStatus {
    Draft,
    PendingConfirmation,
    Approved,
    Cancelled,
}

/// Typed confirmation stamp written onto the contract.
///
/// Replaces the free-form signatures blob: written in the same transaction
/// as the status change, never merged read-modify-write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigitalConfirmation {
    pub status: ContractStatus,
    pub session_id: Uuid,
    pub phone_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// One line item on the contract, as shown to the confirming customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractLineItem {
    pub description: String,
    pub quantity: i32,
    pub unit_price_cents: i64,
    pub total_cents: i64,
}

/// A customer phone record; at most one is flagged primary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhoneRecord {
    pub number: String,
    pub is_primary: bool,
}

/// A named contact on the customer, e.g. the person signing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContactRecord {
    pub name: Option<String>,
    pub mobile: Option<String>,
    pub phone: Option<String>,
    pub is_primary: bool,
}

/// Customer fields the phone-resolution chain inspects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomerProjection {
    pub display_name: String,
    pub home_phone: Option<String>,
    pub work_phone: Option<String>,
    pub project_manager_phone: Option<String>,
    #[serde(default)]
    pub phone_records: Vec<PhoneRecord>,
    #[serde(default)]
    pub contacts: Vec<ContactRecord>,
}

/// The slice of a contract this subsystem owns a view of.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub id: Uuid,
    pub contract_number: String,
    pub status: ContractStatus,
    pub customer: CustomerProjection,
    pub line_items: Vec<ContractLineItem>,
    pub total_cents: i64,
    pub digital_confirmation: Option<DigitalConfirmation>,
}

/// Read-only view returned to the public link.
///
/// Never includes the OTP, token hash, or any session internals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractProjection {
    pub contract_id: Uuid,
    pub contract_number: String,
    pub status: ContractStatus,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub line_items: Vec<ContractLineItem>,
    pub total_cents: i64,
}

impl Contract {
    pub fn projection(&self, phone: Option<String>) -> ContractProjection {
        ContractProjection {
            contract_id: self.id,
            contract_number: self.contract_number.clone(),
            status: self.status,
            customer_name: self.customer.display_name.clone(),
            customer_phone: phone,
            line_items: self.line_items.clone(),
            total_cents: self.total_cents,
        }
    }
}
