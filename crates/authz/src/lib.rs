//! Capability checks for the bookstore.
//!
//! Handlers ask an [`Authorizer`] whether a presented credential grants a
//! [`Capability`]. How credentials are issued is outside this crate.

use std::collections::HashMap;

use thiserror::Error;

/// Something a caller may be allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// List and view books.
    ReadCatalog,
    /// Create, edit and delete books.
    ManageCatalog,
}

/// The caller a capability was granted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject: String,
    pub capabilities: Vec<Capability>,
}

impl Principal {
    pub fn anonymous() -> Self {
        Self {
            subject: "anonymous".to_string(),
            capabilities: vec![Capability::ReadCatalog],
        }
    }

    pub fn can(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("missing or unknown credential")]
    Unauthenticated,

    #[error("'{subject}' lacks capability {capability:?}")]
    Forbidden {
        subject: String,
        capability: Capability,
    },
}

/// Pluggable capability check.
pub trait Authorizer: Send + Sync {
    /// Resolve `credential` and confirm it grants `capability`.
    fn authorize(
        &self,
        credential: Option<&str>,
        capability: Capability,
    ) -> Result<Principal, AuthzError>;
}

/// Grants read access to everyone and catalog management to configured bearer tokens.
#[derive(Debug, Clone, Default)]
pub struct TokenAuthorizer {
    tokens: HashMap<String, Principal>,
}

impl TokenAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an authorizer where each token is an administrator.
    pub fn with_admin_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut authorizer = Self::new();
        for (index, token) in tokens.into_iter().enumerate() {
            authorizer.grant(
                token,
                Principal {
                    subject: format!("admin-{}", index + 1),
                    capabilities: vec![Capability::ReadCatalog, Capability::ManageCatalog],
                },
            );
        }
        authorizer
    }

    pub fn grant(&mut self, token: impl Into<String>, principal: Principal) {
        self.tokens.insert(token.into(), principal);
    }
}

impl Authorizer for TokenAuthorizer {
    fn authorize(
        &self,
        credential: Option<&str>,
        capability: Capability,
    ) -> Result<Principal, AuthzError> {
        let principal = match credential {
            Some(token) => self
                .tokens
                .get(token)
                .cloned()
                .ok_or(AuthzError::Unauthenticated)?,
            None if capability == Capability::ReadCatalog => return Ok(Principal::anonymous()),
            None => return Err(AuthzError::Unauthenticated),
        };

        if principal.can(capability) {
            Ok(principal)
        } else {
            tracing::warn!(
                target: "bookstore-authz",
                subject = %principal.subject,
                ?capability,
                "capability denied"
            );
            Err(AuthzError::Forbidden {
                subject: principal.subject,
                capability,
            })
        }
    }
}
