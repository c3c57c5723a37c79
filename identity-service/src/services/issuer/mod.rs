//! Grant issuers: pluggable strategies turning a grant request into a
//! draft token, resolved by grant type from a registry populated at
//! startup.

mod password;
mod private_token;

pub use password::PasswordIssuer;
pub use private_token::PrivateTokenIssuer;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::dtos::token::IssueTokenRequest;
use crate::models::{GrantType, Token};
use crate::services::ServiceError;

/// A token-issuing strategy. Implementations validate proof of identity
/// and produce a token skeleton with identity fields, expiries and the
/// grant type recorded. They never persist anything.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue_token(&self, req: &IssueTokenRequest) -> Result<Token, ServiceError>;
}

/// Stateless grant-type -> issuer lookup table.
#[derive(Clone, Default)]
pub struct IssuerRegistry {
    issuers: HashMap<GrantType, Arc<dyn TokenIssuer>>,
}

impl IssuerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, grant_type: GrantType, issuer: Arc<dyn TokenIssuer>) {
        self.issuers.insert(grant_type, issuer);
    }

    pub fn get(&self, grant_type: GrantType) -> Option<Arc<dyn TokenIssuer>> {
        self.issuers.get(&grant_type).cloned()
    }
}
