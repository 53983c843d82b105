//! Store traits. Each has a Postgres implementation (behind the `database`
//! feature) and an in-memory one in [`super::memory`].

use async_trait::async_trait;
use uuid::Uuid;

use super::error::DatabaseError;
use super::models::{ApplyOutcome, CreditGrant, LedgerEntry, NewProduct, Product, ProductChanges, User};

#[async_trait]
pub trait ProductStore: Send + Sync {
    /// All products, ordered by display order then creation time.
    async fn list_all(&self) -> Result<Vec<Product>, DatabaseError>;

    /// Active products ordered by display order.
    async fn list_active(&self) -> Result<Vec<Product>, DatabaseError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Product>, DatabaseError>;

    async fn find_by_slug(&self, slug: &str) -> Result<Option<Product>, DatabaseError>;

    async fn find_by_external_id(
        &self,
        external_product_id: &str,
    ) -> Result<Option<Product>, DatabaseError>;

    /// Fails with `UniqueViolation` when the slug or external id is taken.
    async fn insert(&self, product: &NewProduct) -> Result<Product, DatabaseError>;

    /// Returns `None` when no product has this id.
    async fn update(
        &self,
        id: Uuid,
        changes: &ProductChanges,
    ) -> Result<Option<Product>, DatabaseError>;

    /// Returns whether a row was removed.
    async fn delete(&self, id: Uuid) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, user_id: &str) -> Result<Option<User>, DatabaseError>;

    /// Resolves an unexpired session token to its user.
    async fn find_by_session_token(&self, token: &str) -> Result<Option<User>, DatabaseError>;
}

/// The credit ledger and the balances it guards.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Inserts the ledger entry keyed by order id and increments the user's
    /// balance in one transaction. A pre-existing entry yields
    /// `AlreadyApplied` without touching the balance. A missing user fails
    /// with `NotFound`/`ForeignKeyViolation` and leaves nothing behind.
    async fn apply_grant(&self, grant: &CreditGrant) -> Result<ApplyOutcome, DatabaseError>;

    async fn find_by_order_id(
        &self,
        external_order_id: &str,
    ) -> Result<Option<LedgerEntry>, DatabaseError>;

    /// Most recent first.
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<LedgerEntry>, DatabaseError>;

    /// Entries whose balance increment was never recorded, oldest first.
    async fn find_unreconciled(&self, limit: i64) -> Result<Vec<LedgerEntry>, DatabaseError>;

    /// Applies the missing increment for one entry. Returns the new balance, or
    /// `None` if the entry was already reconciled.
    async fn reconcile_entry(&self, entry_id: Uuid) -> Result<Option<i64>, DatabaseError>;
}
