//! In-process stores with the same contracts as the Postgres repositories.
//!
//! One lock guards products, users and the ledger together, so a grant's
//! ledger insert and balance increment are observed atomically just like a
//! database transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::error::DatabaseError;
use super::models::{
    ApplyOutcome, CreditGrant, LedgerEntry, NewProduct, PlatformRole, Product, ProductChanges, User,
};
use super::repository::{CreditLedger, ProductStore, UserStore};
use crate::queue::{
    encode, DeadLetter, Delivery, DeliveryStatus, EventQueue, QueueDepth, QueueError, QueueMessage,
};

#[derive(Default)]
struct MemoryState {
    products: HashMap<Uuid, Product>,
    users: HashMap<String, User>,
    sessions: HashMap<String, (String, DateTime<Utc>)>,
    ledger: Vec<LedgerEntry>,
}

impl MemoryState {
    fn sorted(mut products: Vec<Product>) -> Vec<Product> {
        products.sort_by(|a, b| {
            a.display_order
                .cmp(&b.display_order)
                .then(a.created_at.cmp(&b.created_at))
        });
        products
    }

    fn check_unique(&self, id: Option<Uuid>, slug: &str, external: &str) -> Result<(), DatabaseError> {
        for other in self.products.values().filter(|p| Some(p.id) != id) {
            if other.slug == slug {
                return Err(DatabaseError::unique_violation("products_slug_key"));
            }
            if other.external_product_id == external {
                return Err(DatabaseError::unique_violation(
                    "products_external_product_id_key",
                ));
            }
        }
        Ok(())
    }

    fn credit(&mut self, user_id: &str, credits: i32) -> Result<i64, DatabaseError> {
        let user = self
            .users
            .get_mut(user_id)
            .ok_or_else(|| DatabaseError::not_found("user", user_id))?;
        user.credits += i64::from(credits);
        Ok(user.credits)
    }
}

/// Products, users, sessions and the credit ledger held in memory.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a user with the given balance.
    pub async fn insert_user(&self, id: &str, email: &str, credits: i64, role: PlatformRole) -> User {
        let user = User {
            id: id.to_string(),
            email: email.to_string(),
            name: None,
            credits,
            platform_role: role,
            created_at: Utc::now(),
        };
        self.state
            .write()
            .await
            .users
            .insert(user.id.clone(), user.clone());
        user
    }

    pub async fn insert_session(&self, token: &str, user_id: &str, expires_at: DateTime<Utc>) {
        self.state
            .write()
            .await
            .sessions
            .insert(token.to_string(), (user_id.to_string(), expires_at));
    }

    pub async fn balance(&self, user_id: &str) -> Option<i64> {
        self.state.read().await.users.get(user_id).map(|u| u.credits)
    }

    pub async fn ledger_len(&self) -> usize {
        self.state.read().await.ledger.len()
    }

    /// Records a ledger entry without its balance increment, the state a
    /// non-transactional store is left in after a crash between the two writes.
    pub async fn insert_unapplied_entry(&self, grant: &CreditGrant) -> LedgerEntry {
        let entry = new_entry(grant, None);
        self.state.write().await.ledger.push(entry.clone());
        entry
    }
}

fn new_entry(grant: &CreditGrant, balance_applied_at: Option<DateTime<Utc>>) -> LedgerEntry {
    LedgerEntry {
        id: Uuid::new_v4(),
        user_id: grant.user_id.clone(),
        external_order_id: grant.external_order_id.clone(),
        external_checkout_id: grant.external_checkout_id.clone(),
        external_product_id: grant.external_product_id.clone(),
        credits_granted: grant.credits,
        amount_paid_minor_units: grant.amount_paid_minor_units,
        applied_at: Utc::now(),
        balance_applied_at,
    }
}

#[async_trait]
impl ProductStore for MemoryStore {
    async fn list_all(&self) -> Result<Vec<Product>, DatabaseError> {
        let state = self.state.read().await;
        Ok(MemoryState::sorted(state.products.values().cloned().collect()))
    }

    async fn list_active(&self) -> Result<Vec<Product>, DatabaseError> {
        let state = self.state.read().await;
        Ok(MemoryState::sorted(
            state
                .products
                .values()
                .filter(|p| p.is_active)
                .cloned()
                .collect(),
        ))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Product>, DatabaseError> {
        Ok(self.state.read().await.products.get(&id).cloned())
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<Product>, DatabaseError> {
        let state = self.state.read().await;
        Ok(state.products.values().find(|p| p.slug == slug).cloned())
    }

    async fn find_by_external_id(
        &self,
        external_product_id: &str,
    ) -> Result<Option<Product>, DatabaseError> {
        let state = self.state.read().await;
        Ok(state
            .products
            .values()
            .find(|p| p.external_product_id == external_product_id)
            .cloned())
    }

    async fn insert(&self, product: &NewProduct) -> Result<Product, DatabaseError> {
        let mut state = self.state.write().await;
        state.check_unique(None, &product.slug, &product.external_product_id)?;

        let now = Utc::now();
        let created = Product {
            id: Uuid::new_v4(),
            external_product_id: product.external_product_id.clone(),
            slug: product.slug.clone(),
            name: product.name.clone(),
            credit_grant: product.credit_grant,
            price_minor_units: product.price_minor_units,
            display_order: product.display_order,
            is_active: product.is_active,
            created_at: now,
            updated_at: now,
        };
        state.products.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update(
        &self,
        id: Uuid,
        changes: &ProductChanges,
    ) -> Result<Option<Product>, DatabaseError> {
        let mut state = self.state.write().await;
        let Some(mut updated) = state.products.get(&id).cloned() else {
            return Ok(None);
        };
        changes.apply_to(&mut updated);
        state.check_unique(Some(id), &updated.slug, &updated.external_product_id)?;

        updated.updated_at = Utc::now();
        state.products.insert(id, updated.clone());
        Ok(Some(updated))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, DatabaseError> {
        Ok(self.state.write().await.products.remove(&id).is_some())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_id(&self, user_id: &str) -> Result<Option<User>, DatabaseError> {
        Ok(self.state.read().await.users.get(user_id).cloned())
    }

    async fn find_by_session_token(&self, token: &str) -> Result<Option<User>, DatabaseError> {
        let state = self.state.read().await;
        Ok(state
            .sessions
            .get(token)
            .filter(|(_, expires_at)| *expires_at > Utc::now())
            .and_then(|(user_id, _)| state.users.get(user_id))
            .cloned())
    }
}

#[async_trait]
impl CreditLedger for MemoryStore {
    async fn apply_grant(&self, grant: &CreditGrant) -> Result<ApplyOutcome, DatabaseError> {
        let mut state = self.state.write().await;

        if let Some(existing) = state
            .ledger
            .iter()
            .find(|e| e.external_order_id == grant.external_order_id)
        {
            return Ok(ApplyOutcome::AlreadyApplied {
                entry: existing.clone(),
            });
        }

        // Nothing is written unless the increment succeeds.
        let balance = state.credit(&grant.user_id, grant.credits)?;
        let entry = new_entry(grant, Some(Utc::now()));
        state.ledger.push(entry.clone());

        Ok(ApplyOutcome::Applied { entry, balance })
    }

    async fn find_by_order_id(
        &self,
        external_order_id: &str,
    ) -> Result<Option<LedgerEntry>, DatabaseError> {
        let state = self.state.read().await;
        Ok(state
            .ledger
            .iter()
            .find(|e| e.external_order_id == external_order_id)
            .cloned())
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<LedgerEntry>, DatabaseError> {
        let state = self.state.read().await;
        let mut entries: Vec<LedgerEntry> = state
            .ledger
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.applied_at.cmp(&a.applied_at));
        Ok(entries)
    }

    async fn find_unreconciled(&self, limit: i64) -> Result<Vec<LedgerEntry>, DatabaseError> {
        let state = self.state.read().await;
        Ok(state
            .ledger
            .iter()
            .filter(|e| e.balance_applied_at.is_none())
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn reconcile_entry(&self, entry_id: Uuid) -> Result<Option<i64>, DatabaseError> {
        let mut state = self.state.write().await;
        let Some(index) = state
            .ledger
            .iter()
            .position(|e| e.id == entry_id && e.balance_applied_at.is_none())
        else {
            return Ok(None);
        };

        let (user_id, credits) = {
            let entry = &state.ledger[index];
            (entry.user_id.clone(), entry.credits_granted)
        };
        let balance = state.credit(&user_id, credits)?;
        state.ledger[index].balance_applied_at = Some(Utc::now());
        Ok(Some(balance))
    }
}

#[derive(Debug, Clone)]
struct QueuedRow {
    id: Uuid,
    name: String,
    payload: serde_json::Value,
    status: DeliveryStatus,
    attempts: u32,
    available_at: DateTime<Utc>,
    locked_until: Option<DateTime<Utc>>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl QueuedRow {
    fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            DeliveryStatus::Pending => self.available_at <= now,
            DeliveryStatus::Processing => self.locked_until.is_some_and(|t| t <= now),
            DeliveryStatus::Completed | DeliveryStatus::Dead => false,
        }
    }
}

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(now)
}

/// Completed rows kept for inspection; older ones are dropped on ack.
pub const COMPLETED_RETENTION: usize = 1_000;

/// Queue with the same claim/visibility semantics as the Postgres table.
/// Contents do not survive a restart.
#[derive(Default)]
pub struct MemoryEventQueue {
    rows: Mutex<Vec<QueuedRow>>,
}

impl MemoryEventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }

    pub async fn status_of(&self, id: Uuid) -> Option<DeliveryStatus> {
        self.rows
            .lock()
            .await
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.status)
    }

    /// Applies `f` to the row only while it is still processing at `attempt`.
    async fn settle<F>(&self, id: Uuid, attempt: u32, f: F) -> Result<bool, QueueError>
    where
        F: FnOnce(&mut QueuedRow),
    {
        let mut rows = self.rows.lock().await;
        let Some(row) = rows.iter_mut().find(|r| {
            r.id == id && r.status == DeliveryStatus::Processing && r.attempts == attempt
        }) else {
            return Ok(false);
        };
        f(row);
        row.updated_at = Utc::now();

        if row.status == DeliveryStatus::Completed {
            prune_completed(&mut rows);
        }
        Ok(true)
    }
}

/// Keeps at most `COMPLETED_RETENTION` completed rows, dropping the oldest.
fn prune_completed(rows: &mut Vec<QueuedRow>) {
    let completed = rows
        .iter()
        .filter(|r| r.status == DeliveryStatus::Completed)
        .count();
    let mut excess = completed.saturating_sub(COMPLETED_RETENTION);
    if excess == 0 {
        return;
    }
    // Rows are in enqueue order, so the first completed ones are the oldest.
    rows.retain(|r| {
        if excess > 0 && r.status == DeliveryStatus::Completed {
            excess -= 1;
            false
        } else {
            true
        }
    });
}

#[async_trait]
impl EventQueue for MemoryEventQueue {
    async fn enqueue(&self, message: &QueueMessage) -> Result<Uuid, QueueError> {
        let payload = encode(message)?;
        let now = Utc::now();
        let row = QueuedRow {
            id: Uuid::new_v4(),
            name: message.name.clone(),
            payload,
            status: DeliveryStatus::Pending,
            attempts: 0,
            available_at: now,
            locked_until: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        let id = row.id;
        self.rows.lock().await.push(row);
        Ok(id)
    }

    async fn claim(&self, limit: i64, visibility: Duration) -> Result<Vec<Delivery>, QueueError> {
        let now = Utc::now();
        let mut rows = self.rows.lock().await;
        let mut claimed = Vec::new();

        for row in rows.iter_mut().filter(|r| r.is_due(now)) {
            if claimed.len() as i64 >= limit {
                break;
            }
            row.status = DeliveryStatus::Processing;
            row.attempts += 1;
            row.locked_until = Some(after(now, visibility));
            row.updated_at = now;
            claimed.push(Delivery {
                id: row.id,
                name: row.name.clone(),
                payload: row.payload.clone(),
                attempts: row.attempts,
                enqueued_at: row.created_at,
            });
        }

        Ok(claimed)
    }

    async fn ack(&self, id: Uuid, attempt: u32) -> Result<bool, QueueError> {
        self.settle(id, attempt, |row| {
            row.status = DeliveryStatus::Completed;
            row.locked_until = None;
        })
        .await
    }

    async fn retry_later(
        &self,
        id: Uuid,
        attempt: u32,
        delay: Duration,
        error: &str,
    ) -> Result<bool, QueueError> {
        self.settle(id, attempt, |row| {
            row.status = DeliveryStatus::Pending;
            row.available_at = after(Utc::now(), delay);
            row.locked_until = None;
            row.last_error = Some(error.to_string());
        })
        .await
    }

    async fn dead_letter(&self, id: Uuid, attempt: u32, error: &str) -> Result<bool, QueueError> {
        self.settle(id, attempt, |row| {
            row.status = DeliveryStatus::Dead;
            row.locked_until = None;
            row.last_error = Some(error.to_string());
        })
        .await
    }

    async fn dead_letters(&self, limit: i64) -> Result<Vec<DeadLetter>, QueueError> {
        let rows = self.rows.lock().await;
        let mut dead: Vec<DeadLetter> = rows
            .iter()
            .filter(|r| r.status == DeliveryStatus::Dead)
            .map(|r| DeadLetter {
                id: r.id,
                name: r.name.clone(),
                payload: r.payload.clone(),
                attempts: r.attempts,
                last_error: r.last_error.clone(),
                enqueued_at: r.created_at,
                failed_at: r.updated_at,
            })
            .collect();
        dead.sort_by(|a, b| b.failed_at.cmp(&a.failed_at));
        dead.truncate(limit.max(0) as usize);
        Ok(dead)
    }

    async fn requeue(&self, id: Uuid) -> Result<bool, QueueError> {
        let mut rows = self.rows.lock().await;
        let Some(row) = rows
            .iter_mut()
            .find(|r| r.id == id && r.status == DeliveryStatus::Dead)
        else {
            return Ok(false);
        };
        let now = Utc::now();
        row.status = DeliveryStatus::Pending;
        row.attempts = 0;
        row.available_at = now;
        row.locked_until = None;
        row.updated_at = now;
        Ok(true)
    }

    async fn depth(&self) -> Result<QueueDepth, QueueError> {
        let rows = self.rows.lock().await;
        let count = |status: DeliveryStatus| rows.iter().filter(|r| r.status == status).count() as i64;
        Ok(QueueDepth {
            pending: count(DeliveryStatus::Pending),
            processing: count(DeliveryStatus::Processing),
            dead: count(DeliveryStatus::Dead),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::error::DatabaseErrorKind;
    use crate::queue::OrderPaidData;

    fn grant(order: &str, user: &str, credits: i32) -> CreditGrant {
        CreditGrant {
            user_id: user.to_string(),
            external_order_id: order.to_string(),
            external_checkout_id: None,
            external_product_id: "prod_basic".to_string(),
            credits,
            amount_paid_minor_units: 900,
        }
    }

    fn message(order: &str) -> QueueMessage {
        QueueMessage {
            name: crate::queue::ORDER_PAID.to_string(),
            data: OrderPaidData {
                order_id: order.to_string(),
                checkout_id: None,
                user_id: "u1".to_string(),
                product_id: "prod_basic".to_string(),
                amount: 900,
                created_at: Utc::now(),
            },
        }
    }

    fn new_product(slug: &str, external: &str) -> NewProduct {
        NewProduct {
            external_product_id: external.to_string(),
            slug: slug.to_string(),
            name: slug.to_string(),
            credit_grant: 30,
            price_minor_units: 900,
            display_order: 0,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn test_apply_grant_is_idempotent() {
        let store = MemoryStore::new();
        store.insert_user("u1", "u1@example.com", 5, PlatformRole::User).await;

        let first = store.apply_grant(&grant("ord_1", "u1", 30)).await.unwrap();
        let second = store.apply_grant(&grant("ord_1", "u1", 30)).await.unwrap();

        assert!(matches!(first, ApplyOutcome::Applied { balance: 35, .. }));
        assert!(matches!(second, ApplyOutcome::AlreadyApplied { .. }));
        assert_eq!(store.balance("u1").await, Some(35));
        assert_eq!(store.ledger_len().await, 1);
    }

    #[tokio::test]
    async fn test_apply_grant_for_missing_user_writes_nothing() {
        let store = MemoryStore::new();

        let err = store.apply_grant(&grant("ord_1", "ghost", 30)).await.unwrap_err();

        assert!(matches!(err.kind, DatabaseErrorKind::NotFound { .. }));
        assert_eq!(store.ledger_len().await, 0);
    }

    #[tokio::test]
    async fn test_reconcile_applies_once() {
        let store = MemoryStore::new();
        store.insert_user("u1", "u1@example.com", 5, PlatformRole::User).await;
        let entry = store.insert_unapplied_entry(&grant("ord_9", "u1", 10)).await;

        assert_eq!(store.find_unreconciled(10).await.unwrap().len(), 1);
        assert_eq!(store.reconcile_entry(entry.id).await.unwrap(), Some(15));
        assert_eq!(store.reconcile_entry(entry.id).await.unwrap(), None);
        assert_eq!(store.balance("u1").await, Some(15));
        assert!(store.find_unreconciled(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_product_uniqueness() {
        let store = MemoryStore::new();
        store.insert(&new_product("basic", "prod_basic")).await.unwrap();

        let dup_slug = store.insert(&new_product("basic", "prod_other")).await;
        let dup_external = store.insert(&new_product("other", "prod_basic")).await;

        assert!(matches!(
            dup_slug.unwrap_err().kind,
            DatabaseErrorKind::UniqueViolation { constraint } if constraint == "products_slug_key"
        ));
        assert!(dup_external.is_err());
        assert_eq!(store.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_expired_session_is_rejected() {
        let store = MemoryStore::new();
        store.insert_user("a1", "admin@example.com", 0, PlatformRole::Admin).await;
        store
            .insert_session("expired", "a1", Utc::now() - chrono::Duration::minutes(1))
            .await;
        store
            .insert_session("live", "a1", Utc::now() + chrono::Duration::hours(1))
            .await;

        assert!(store.find_by_session_token("expired").await.unwrap().is_none());
        assert!(store.find_by_session_token("live").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_queue_claim_hides_message_until_visibility_expires() {
        let queue = MemoryEventQueue::new();
        let id = queue.enqueue(&message("ord_1")).await.unwrap();

        let first = queue.claim(10, Duration::from_secs(60)).await.unwrap();
        let second = queue.claim(10, Duration::from_secs(60)).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());

        // a consumer that dies leaves the row processing; zero visibility makes it due again
        assert!(queue.retry_later(id, 1, Duration::ZERO, "boom").await.unwrap());
        let redelivered = queue.claim(10, Duration::ZERO).await.unwrap();
        assert_eq!(redelivered[0].attempts, 2);
        let crashed = queue.claim(10, Duration::ZERO).await.unwrap();
        assert_eq!(crashed[0].attempts, 3);
    }

    #[tokio::test]
    async fn test_dead_letter_and_requeue() {
        let queue = MemoryEventQueue::new();
        let id = queue.enqueue(&message("ord_1")).await.unwrap();
        queue.claim(1, Duration::from_secs(60)).await.unwrap();
        assert!(queue.dead_letter(id, 1, "unknown product").await.unwrap());

        let dead = queue.dead_letters(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].last_error.as_deref(), Some("unknown product"));
        assert_eq!(queue.depth().await.unwrap().dead, 1);

        assert!(queue.requeue(id).await.unwrap());
        assert!(!queue.requeue(id).await.unwrap());
        assert_eq!(queue.status_of(id).await, Some(DeliveryStatus::Pending));
        assert_eq!(queue.claim(1, Duration::from_secs(60)).await.unwrap()[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_stale_consumer_cannot_settle_reclaimed_message() {
        let queue = MemoryEventQueue::new();
        let id = queue.enqueue(&message("ord_1")).await.unwrap();

        // consumer A's lock lapses and consumer B reclaims and finishes
        let a = queue.claim(1, Duration::ZERO).await.unwrap().remove(0);
        let b = queue.claim(1, Duration::from_secs(60)).await.unwrap().remove(0);
        assert_eq!((a.attempts, b.attempts), (1, 2));
        assert!(queue.ack(id, b.attempts).await.unwrap());

        assert!(!queue.dead_letter(id, a.attempts, "late failure").await.unwrap());
        assert!(!queue.retry_later(id, a.attempts, Duration::ZERO, "late").await.unwrap());
        assert_eq!(queue.status_of(id).await, Some(DeliveryStatus::Completed));
        assert!(queue.dead_letters(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_consumer_cannot_ack_over_newer_claim() {
        let queue = MemoryEventQueue::new();
        let id = queue.enqueue(&message("ord_1")).await.unwrap();

        let a = queue.claim(1, Duration::ZERO).await.unwrap().remove(0);
        let b = queue.claim(1, Duration::from_secs(60)).await.unwrap().remove(0);

        assert!(!queue.ack(id, a.attempts).await.unwrap());
        assert_eq!(queue.status_of(id).await, Some(DeliveryStatus::Processing));
        assert!(queue.dead_letter(id, b.attempts, "unknown product").await.unwrap());
        assert_eq!(queue.status_of(id).await, Some(DeliveryStatus::Dead));
    }

    #[tokio::test]
    async fn test_completed_rows_are_pruned() {
        let queue = MemoryEventQueue::new();
        let first = queue.enqueue(&message("ord_0")).await.unwrap();
        for i in 1..=COMPLETED_RETENTION {
            queue.enqueue(&message(&format!("ord_{}", i))).await.unwrap();
        }

        let claimed = queue.claim(i64::MAX, Duration::from_secs(60)).await.unwrap();
        for delivery in &claimed {
            assert!(queue.ack(delivery.id, delivery.attempts).await.unwrap());
        }

        assert_eq!(queue.len().await, COMPLETED_RETENTION);
        assert_eq!(queue.status_of(first).await, None);
    }
}
