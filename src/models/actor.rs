//! Authenticated actor, as asserted by the identity provider's token

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::AppError;

/// Role carried in the token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Member,
    Librarian,
    Admin,
}

/// JWT claims of the calling actor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorClaims {
    pub sub: String,
    pub user_id: i32,
    pub role: Role,
    pub exp: i64,
}

impl ActorClaims {
    /// Create a new JWT token
    pub fn create_token(&self, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
        use jsonwebtoken::{encode, EncodingKey, Header};
        encode(
            &Header::default(),
            self,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
    }

    /// Decode and validate a JWT token
    pub fn from_token(token: &str, secret: &str) -> Result<Self, jsonwebtoken::errors::Error> {
        use jsonwebtoken::{decode, DecodingKey, Validation};
        let token_data = decode::<Self>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(token_data.claims)
    }

    pub fn is_staff(&self) -> bool {
        matches!(self.role, Role::Librarian | Role::Admin)
    }

    pub fn require_staff(&self) -> Result<(), AppError> {
        if self.is_staff() {
            Ok(())
        } else {
            Err(AppError::Authorization("Staff role required".to_string()))
        }
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.role == Role::Admin {
            Ok(())
        } else {
            Err(AppError::Authorization("Admin role required".to_string()))
        }
    }

    /// Borrower an operation acts for: members act for themselves, staff may name anyone
    pub fn borrower_for(&self, requested: Option<i32>) -> Result<i32, AppError> {
        match requested {
            Some(id) if id != self.user_id && !self.is_staff() => Err(AppError::Authorization(
                "Only staff may act on behalf of another borrower".to_string(),
            )),
            Some(id) => Ok(id),
            None => Ok(self.user_id),
        }
    }

    /// Members only see their own records
    pub fn scope_borrower(&self, requested: Option<i32>) -> Result<Option<i32>, AppError> {
        if self.is_staff() {
            Ok(requested)
        } else {
            self.borrower_for(requested).map(Some)
        }
    }
}
