//! Persistent entities shared by the Postgres and in-memory stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A purchasable credit package, keyed by the payment provider's product id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: Uuid,
    pub external_product_id: String,
    pub slug: String,
    pub name: String,
    pub credit_grant: i32,
    pub price_minor_units: i64,
    pub display_order: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A validated product ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProduct {
    pub external_product_id: String,
    pub slug: String,
    pub name: String,
    pub credit_grant: i32,
    pub price_minor_units: i64,
    pub display_order: i32,
    pub is_active: bool,
}

/// Validated partial update; `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductChanges {
    pub external_product_id: Option<String>,
    pub slug: Option<String>,
    pub name: Option<String>,
    pub credit_grant: Option<i32>,
    pub price_minor_units: Option<i64>,
    pub display_order: Option<i32>,
    pub is_active: Option<bool>,
}

impl ProductChanges {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Applies the changes in place; used by stores without partial-update SQL.
    pub fn apply_to(&self, product: &mut Product) {
        if let Some(v) = &self.external_product_id {
            product.external_product_id = v.clone();
        }
        if let Some(v) = &self.slug {
            product.slug = v.clone();
        }
        if let Some(v) = &self.name {
            product.name = v.clone();
        }
        if let Some(v) = self.credit_grant {
            product.credit_grant = v;
        }
        if let Some(v) = self.price_minor_units {
            product.price_minor_units = v;
        }
        if let Some(v) = self.display_order {
            product.display_order = v;
        }
        if let Some(v) = self.is_active {
            product.is_active = v;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformRole {
    User,
    Admin,
}

impl PlatformRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformRole::User => "user",
            PlatformRole::Admin => "admin",
        }
    }

    /// Unknown role strings degrade to `User`.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "admin" => PlatformRole::Admin,
            _ => PlatformRole::User,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub credits: i64,
    pub platform_role: PlatformRole,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Schema defaults for accounts created by the auth provider.
    pub const STARTING_CREDITS: i64 = 1;

    pub fn is_admin(&self) -> bool {
        self.platform_role == PlatformRole::Admin
    }
}

/// Append-only proof that an order was fulfilled. `balance_applied_at` is set
/// in the same transaction that increments the user's balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: String,
    pub external_order_id: String,
    pub external_checkout_id: Option<String>,
    pub external_product_id: String,
    pub credits_granted: i32,
    pub amount_paid_minor_units: i64,
    pub applied_at: DateTime<Utc>,
    pub balance_applied_at: Option<DateTime<Utc>>,
}

/// The credit grant the fulfillment processor asks the ledger to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditGrant {
    pub user_id: String,
    pub external_order_id: String,
    pub external_checkout_id: Option<String>,
    pub external_product_id: String,
    pub credits: i32,
    pub amount_paid_minor_units: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Ledger entry written and balance incremented in one commit.
    Applied { entry: LedgerEntry, balance: i64 },
    /// An entry for this order already existed; nothing was written.
    AlreadyApplied { entry: LedgerEntry },
}
