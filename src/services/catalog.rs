//! Product catalog: admin CRUD, public pricing reads and default seeding.

use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[cfg(feature = "cache")]
use crate::cache::{keys::catalog::PricingKey, Cache, RedisCache};
use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::models::{NewProduct, Product, ProductChanges};
use crate::database::repository::ProductStore;
use crate::error::{
    AppError, AppErrorKind, DomainError, InfrastructureError, ValidationError,
};

const MAX_CREDIT_GRANT: i64 = 1_000_000;
const MAX_PRICE_MINOR_UNITS: i64 = 100_000_000;

fn slug_pattern() -> &'static Regex {
    static SLUG: OnceLock<Regex> = OnceLock::new();
    SLUG.get_or_init(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").expect("slug pattern compiles"))
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Missing required fields")]
    MissingFields,

    #[error("{message}")]
    Invalid { field: &'static str, message: String },

    #[error("Product slug already exists")]
    DuplicateSlug,

    #[error("Polar product ID already exists")]
    DuplicateExternalId,

    #[error("Product not found")]
    NotFound,

    #[error("catalog storage error: {0}")]
    Storage(DatabaseError),
}

impl From<DatabaseError> for CatalogError {
    fn from(err: DatabaseError) -> Self {
        // Storage constraints back up the pre-write checks under races.
        match &err.kind {
            DatabaseErrorKind::UniqueViolation { constraint } if constraint.contains("slug") => {
                CatalogError::DuplicateSlug
            }
            DatabaseErrorKind::UniqueViolation { constraint }
                if constraint.contains("external_product_id") =>
            {
                CatalogError::DuplicateExternalId
            }
            _ => CatalogError::Storage(err),
        }
    }
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        let kind = match err {
            CatalogError::MissingFields => AppErrorKind::Validation(ValidationError::MissingField {
                field: "slug, polarProductId, name".to_string(),
            }),
            CatalogError::Invalid { field, message } => {
                AppErrorKind::Validation(ValidationError::InvalidFormat {
                    field: field.to_string(),
                    reason: message,
                })
            }
            CatalogError::DuplicateSlug => AppErrorKind::Domain(DomainError::DuplicateProduct {
                field: "slug".to_string(),
                value: String::new(),
            }),
            CatalogError::DuplicateExternalId => {
                AppErrorKind::Domain(DomainError::DuplicateProduct {
                    field: "polarProductId".to_string(),
                    value: String::new(),
                })
            }
            CatalogError::NotFound => AppErrorKind::Domain(DomainError::ProductNotFound {
                product_id: String::new(),
            }),
            CatalogError::Storage(e) => {
                AppErrorKind::Infrastructure(InfrastructureError::Database {
                    message: e.to_string(),
                    is_retryable: e.is_retryable(),
                })
            }
        };
        AppError::new(kind)
    }
}

/// Admin create payload. Prices are in minor units (cents).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProductRequest {
    pub slug: Option<String>,
    #[serde(alias = "externalProductId")]
    pub polar_product_id: Option<String>,
    pub name: Option<String>,
    #[serde(default, alias = "creditGrant")]
    pub credits: i64,
    #[serde(default, alias = "priceMinorUnits")]
    pub price_usd: i64,
    #[serde(default)]
    pub display_order: i32,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// Admin partial update; absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProductRequest {
    pub slug: Option<String>,
    #[serde(alias = "externalProductId")]
    pub polar_product_id: Option<String>,
    pub name: Option<String>,
    #[serde(alias = "creditGrant")]
    pub credits: Option<i64>,
    #[serde(alias = "priceMinorUnits")]
    pub price_usd: Option<i64>,
    pub display_order: Option<i32>,
    pub is_active: Option<bool>,
}

/// One row of the public pricing table. `id` is the Polar product id used
/// by the checkout flow; `price` is in dollars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingEntry {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub credits: i32,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
}

impl From<&Product> for PricingEntry {
    fn from(product: &Product) -> Self {
        Self {
            id: product.external_product_id.clone(),
            slug: product.slug.clone(),
            name: product.name.clone(),
            credits: product.credit_grant,
            price: Decimal::new(product.price_minor_units, 2),
        }
    }
}

fn required(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn validate_slug(slug: &str) -> Result<(), CatalogError> {
    if slug_pattern().is_match(slug) {
        Ok(())
    } else {
        Err(CatalogError::Invalid {
            field: "slug",
            message: "Slug must be lowercase letters, digits and single hyphens".to_string(),
        })
    }
}

fn checked_credits(credits: i64, message: &str) -> Result<i32, CatalogError> {
    if credits <= 0 || credits > MAX_CREDIT_GRANT {
        return Err(CatalogError::Invalid {
            field: "credits",
            message: message.to_string(),
        });
    }
    i32::try_from(credits).map_err(|_| CatalogError::Invalid {
        field: "credits",
        message: message.to_string(),
    })
}

fn checked_price(price: i64, message: &str) -> Result<i64, CatalogError> {
    if price <= 0 || price > MAX_PRICE_MINOR_UNITS {
        return Err(CatalogError::Invalid {
            field: "priceUsd",
            message: message.to_string(),
        });
    }
    Ok(price)
}

impl CreateProductRequest {
    pub fn validate(self) -> Result<NewProduct, CatalogError> {
        let (Some(slug), Some(external_product_id), Some(name)) = (
            required(self.slug),
            required(self.polar_product_id),
            required(self.name),
        ) else {
            return Err(CatalogError::MissingFields);
        };

        const NON_POSITIVE: &str = "Credits and price must be positive numbers";
        let credit_grant = checked_credits(self.credits, NON_POSITIVE)?;
        let price_minor_units = checked_price(self.price_usd, NON_POSITIVE)?;
        validate_slug(&slug)?;

        Ok(NewProduct {
            external_product_id,
            slug,
            name,
            credit_grant,
            price_minor_units,
            display_order: self.display_order,
            is_active: self.is_active,
        })
    }
}

impl UpdateProductRequest {
    pub fn validate(self) -> Result<ProductChanges, CatalogError> {
        let credit_grant = self
            .credits
            .map(|c| checked_credits(c, "Credits must be a positive number"))
            .transpose()?;
        let price_minor_units = self
            .price_usd
            .map(|p| checked_price(p, "Price must be a positive number"))
            .transpose()?;

        let slug = match self.slug {
            Some(slug) => {
                let slug = required(Some(slug)).ok_or(CatalogError::MissingFields)?;
                validate_slug(&slug)?;
                Some(slug)
            }
            None => None,
        };
        let external_product_id = match self.polar_product_id {
            Some(id) => Some(required(Some(id)).ok_or(CatalogError::MissingFields)?),
            None => None,
        };
        let name = match self.name {
            Some(name) => Some(required(Some(name)).ok_or(CatalogError::MissingFields)?),
            None => None,
        };

        Ok(ProductChanges {
            external_product_id,
            slug,
            name,
            credit_grant,
            price_minor_units,
            display_order: self.display_order,
            is_active: self.is_active,
        })
    }
}

/// The three packages offered at launch.
pub fn default_products() -> Vec<NewProduct> {
    [
        ("basic", "Basic", "prod_basic", 30, 900, 1),
        ("pro", "Pro", "prod_pro", 100, 1900, 2),
        ("premium", "Premium", "prod_premium", 200, 2900, 3),
    ]
    .into_iter()
    .map(|(slug, name, external, credits, price, order)| NewProduct {
        external_product_id: external.to_string(),
        slug: slug.to_string(),
        name: name.to_string(),
        credit_grant: credits,
        price_minor_units: price,
        display_order: order,
        is_active: true,
    })
    .collect()
}

pub struct ProductCatalog {
    products: Arc<dyn ProductStore>,
    #[cfg(feature = "cache")]
    cache: Option<RedisCache>,
}

impl ProductCatalog {
    pub fn new(products: Arc<dyn ProductStore>) -> Self {
        Self {
            products,
            #[cfg(feature = "cache")]
            cache: None,
        }
    }

    /// Serve the pricing list from Redis.
    #[cfg(feature = "cache")]
    pub fn with_cache(mut self, cache: RedisCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub async fn list_all(&self) -> Result<Vec<Product>, CatalogError> {
        Ok(self.products.list_all().await?)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Product, CatalogError> {
        self.products
            .find_by_id(id)
            .await?
            .ok_or(CatalogError::NotFound)
    }

    pub async fn get_by_slug(&self, slug: &str) -> Result<Product, CatalogError> {
        self.products
            .find_by_slug(slug)
            .await?
            .ok_or(CatalogError::NotFound)
    }

    pub async fn get_by_external_id(&self, external_id: &str) -> Result<Product, CatalogError> {
        self.products
            .find_by_external_id(external_id)
            .await?
            .ok_or(CatalogError::NotFound)
    }

    pub async fn create(&self, request: CreateProductRequest) -> Result<Product, CatalogError> {
        let product = request.validate()?;

        if self.products.find_by_slug(&product.slug).await?.is_some() {
            return Err(CatalogError::DuplicateSlug);
        }
        if self
            .products
            .find_by_external_id(&product.external_product_id)
            .await?
            .is_some()
        {
            return Err(CatalogError::DuplicateExternalId);
        }

        let created = self.products.insert(&product).await?;
        info!(product_id = %created.id, slug = %created.slug, "Product created");
        self.invalidate_pricing().await;
        Ok(created)
    }

    pub async fn update(
        &self,
        id: Uuid,
        request: UpdateProductRequest,
    ) -> Result<Product, CatalogError> {
        let changes = request.validate()?;
        let existing = self.get_by_id(id).await?;

        if let Some(slug) = changes.slug.as_deref().filter(|s| *s != existing.slug) {
            if self.products.find_by_slug(slug).await?.is_some() {
                return Err(CatalogError::DuplicateSlug);
            }
        }
        if let Some(external) = changes
            .external_product_id
            .as_deref()
            .filter(|e| *e != existing.external_product_id)
        {
            if self.products.find_by_external_id(external).await?.is_some() {
                return Err(CatalogError::DuplicateExternalId);
            }
        }

        if changes.is_empty() {
            return Ok(existing);
        }

        let updated = self
            .products
            .update(id, &changes)
            .await?
            .ok_or(CatalogError::NotFound)?;
        info!(product_id = %updated.id, slug = %updated.slug, "Product updated");
        self.invalidate_pricing().await;
        Ok(updated)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), CatalogError> {
        if !self.products.delete(id).await? {
            return Err(CatalogError::NotFound);
        }
        info!(product_id = %id, "Product deleted");
        self.invalidate_pricing().await;
        Ok(())
    }

    /// Active products ordered by display order, prices in dollars.
    pub async fn public_pricing(&self) -> Result<Vec<PricingEntry>, CatalogError> {
        #[cfg(feature = "cache")]
        if let Some(cache) = &self.cache {
            match cache.get(&PricingKey.to_string()).await {
                Ok(Some(entries)) => return Ok(entries),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Pricing cache read failed, reading from database"),
            }
        }

        let entries: Vec<PricingEntry> = self
            .products
            .list_active()
            .await?
            .iter()
            .map(PricingEntry::from)
            .collect();

        #[cfg(feature = "cache")]
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.set(&PricingKey.to_string(), &entries, None).await {
                warn!(error = %e, "Failed to cache pricing list");
            }
        }

        Ok(entries)
    }

    /// Inserts the default packages whose slug and external id are both unused.
    pub async fn seed_defaults(&self) -> Result<Vec<Product>, CatalogError> {
        let mut inserted = Vec::new();
        for product in default_products() {
            let slug_taken = self.products.find_by_slug(&product.slug).await?.is_some();
            let external_taken = self
                .products
                .find_by_external_id(&product.external_product_id)
                .await?
                .is_some();
            if slug_taken || external_taken {
                debug!(slug = %product.slug, "Skipping existing default product");
                continue;
            }
            inserted.push(self.products.insert(&product).await?);
        }

        if !inserted.is_empty() {
            info!(count = inserted.len(), "Seeded default products");
            self.invalidate_pricing().await;
        }
        Ok(inserted)
    }

    async fn invalidate_pricing(&self) {
        #[cfg(feature = "cache")]
        if let Some(cache) = &self.cache {
            if let Err(e) =
                <RedisCache as Cache<Vec<PricingEntry>>>::delete(cache, &PricingKey.to_string())
                    .await
            {
                warn!(error = %e, "Failed to invalidate pricing cache");
            }
        }
    }
}
