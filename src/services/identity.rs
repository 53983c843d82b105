use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::database::error::DatabaseError;
use crate::database::models::User;
use crate::database::repository::UserStore;
use crate::logging::mask_email;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("customer carries no external reference")]
    MissingExternalReference,

    #[error("user '{user_id}' does not exist")]
    UnknownUser { user_id: String },

    #[error("user lookup failed: {0}")]
    Storage(#[from] DatabaseError),
}

/// Maps the payment provider's customer external reference to a platform user.
pub struct IdentityResolver {
    users: Arc<dyn UserStore>,
}

impl IdentityResolver {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }

    /// `external_reference` is the provider's copy of the platform user id.
    pub async fn resolve(&self, external_reference: Option<&str>) -> Result<User, IdentityError> {
        let user_id = external_reference
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(IdentityError::MissingExternalReference)?;

        match self.users.find_by_id(user_id).await? {
            Some(user) => {
                debug!(user_id = %user.id, email = %mask_email(&user.email), "Resolved webhook customer");
                Ok(user)
            }
            None => {
                warn!(user_id = %user_id, "External reference does not match any user");
                Err(IdentityError::UnknownUser {
                    user_id: user_id.to_string(),
                })
            }
        }
    }
}
