mod guard;
mod token;

use thiserror::Error;

pub use guard::{AdminGuard, AdminIdentity, ADMIN_ROLE};
pub use token::TokenSigner;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Not authenticated")]
    MissingToken,
    #[error("Invalid authentication credentials")]
    InvalidToken,
    #[error("User not found")]
    UnknownUser,
    #[error("Not enough permissions")]
    NotAdmin,
    #[error("token signing failed: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl AuthError {
    /// True for failures that mean "who are you?" rather than "not allowed".
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            AuthError::MissingToken | AuthError::InvalidToken | AuthError::UnknownUser
        )
    }
}
