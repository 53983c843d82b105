use crate::database::error::DatabaseError;
use crate::database::models::{NewProduct, Product, ProductChanges};
use crate::database::repository::ProductStore;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

const PRODUCT_COLUMNS: &str = "id, external_product_id, slug, name, credit_grant, \
     price_minor_units, display_order, is_active, created_at, updated_at";

/// Repository for the product catalog
pub struct ProductRepository {
    pool: PgPool,
}

impl ProductRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_one(&self, column: &str, value: &str) -> Result<Option<Product>, DatabaseError> {
        // column comes from the fixed set below, never from input
        let sql = format!("SELECT {} FROM products WHERE {} = $1", PRODUCT_COLUMNS, column);
        sqlx::query_as::<_, Product>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }
}

#[async_trait]
impl ProductStore for ProductRepository {
    async fn list_all(&self) -> Result<Vec<Product>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM products ORDER BY display_order ASC, created_at ASC",
            PRODUCT_COLUMNS
        );
        sqlx::query_as::<_, Product>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn list_active(&self) -> Result<Vec<Product>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM products WHERE is_active = TRUE \
             ORDER BY display_order ASC, created_at ASC",
            PRODUCT_COLUMNS
        );
        sqlx::query_as::<_, Product>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Product>, DatabaseError> {
        let sql = format!("SELECT {} FROM products WHERE id = $1", PRODUCT_COLUMNS);
        sqlx::query_as::<_, Product>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<Product>, DatabaseError> {
        self.find_one("slug", slug).await
    }

    async fn find_by_external_id(
        &self,
        external_product_id: &str,
    ) -> Result<Option<Product>, DatabaseError> {
        self.find_one("external_product_id", external_product_id).await
    }

    async fn insert(&self, product: &NewProduct) -> Result<Product, DatabaseError> {
        let sql = format!(
            "INSERT INTO products
             (id, external_product_id, slug, name, credit_grant, price_minor_units,
              display_order, is_active)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING {}",
            PRODUCT_COLUMNS
        );
        sqlx::query_as::<_, Product>(&sql)
            .bind(Uuid::new_v4())
            .bind(&product.external_product_id)
            .bind(&product.slug)
            .bind(&product.name)
            .bind(product.credit_grant)
            .bind(product.price_minor_units)
            .bind(product.display_order)
            .bind(product.is_active)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn update(
        &self,
        id: Uuid,
        changes: &ProductChanges,
    ) -> Result<Option<Product>, DatabaseError> {
        let sql = format!(
            "UPDATE products
             SET external_product_id = COALESCE($2, external_product_id),
                 slug = COALESCE($3, slug),
                 name = COALESCE($4, name),
                 credit_grant = COALESCE($5, credit_grant),
                 price_minor_units = COALESCE($6, price_minor_units),
                 display_order = COALESCE($7, display_order),
                 is_active = COALESCE($8, is_active),
                 updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            PRODUCT_COLUMNS
        );
        sqlx::query_as::<_, Product>(&sql)
            .bind(id)
            .bind(changes.external_product_id.as_deref())
            .bind(changes.slug.as_deref())
            .bind(changes.name.as_deref())
            .bind(changes.credit_grant)
            .bind(changes.price_minor_units)
            .bind(changes.display_order)
            .bind(changes.is_active)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }
}
