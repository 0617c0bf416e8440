use std::sync::Arc;

use shop_backup_core::{Collection, Document, Value, ID_FIELD};
use shop_backup_storage::{DocumentStore, Filter};
use tracing::warn;
use uuid::Uuid;

use crate::token::TokenSigner;
use crate::AuthError;

pub const ADMIN_ROLE: &str = "admin";

/// The authenticated administrator behind a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminIdentity {
    pub user_id: String,
    pub email: Option<String>,
}

/// Verifies bearer tokens and checks that the user they name is an admin.
#[derive(Clone)]
pub struct AdminGuard {
    signer: Arc<TokenSigner>,
    store: Arc<dyn DocumentStore>,
}

impl AdminGuard {
    pub fn new(signer: Arc<TokenSigner>, store: Arc<dyn DocumentStore>) -> Self {
        Self { signer, store }
    }

    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    pub async fn require_admin(&self, token: Option<&str>) -> Result<AdminIdentity, AuthError> {
        let token = token.ok_or(AuthError::MissingToken)?;
        let user_id = self.signer.verify(token)?;
        let user = self.find_user(&user_id).await?.ok_or_else(|| {
            warn!(%user_id, "token names an unknown user");
            AuthError::UnknownUser
        })?;

        if user.get("role").and_then(Value::as_str) != Some(ADMIN_ROLE) {
            warn!(%user_id, "non-admin user denied");
            return Err(AuthError::NotAdmin);
        }
        Ok(AdminIdentity {
            user_id,
            email: user.get("email").and_then(Value::as_str).map(str::to_owned),
        })
    }

    /// Looks a user up by id, whether stored as an object id or a plain string.
    pub async fn find_user(&self, user_id: &str) -> Result<Option<Document>, AuthError> {
        let mut candidates = vec![Value::String(user_id.to_owned())];
        if let Ok(oid) = Uuid::parse_str(user_id) {
            candidates.push(Value::ObjectId(oid));
        }
        let mut users = self
            .store
            .find(Collection::Users.name(), &Filter::any_of(ID_FIELD, candidates))
            .await?;
        Ok(users.pop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use shop_backup_storage::sqlite_store::SqliteStore;

    fn user(id: Value, role: &str) -> Document {
        let mut doc = Document::new();
        doc.insert(ID_FIELD.into(), id);
        doc.insert("email".into(), Value::String(format!("{role}@r32.ro")));
        doc.insert("role".into(), Value::String(role.into()));
        doc
    }

    async fn guard() -> (tempfile::TempDir, AdminGuard, Uuid) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = SqliteStore::new(tmp.path().join("documents.db")).expect("store");
        let admin_id = Uuid::new_v4();
        store
            .insert_many(
                "users",
                vec![
                    user(Value::ObjectId(admin_id), "admin"),
                    user(Value::String("customer-1".into()), "user"),
                ],
            )
            .await
            .expect("seed");
        let signer = Arc::new(TokenSigner::new(b"guard-secret", Duration::minutes(5)));
        (tmp, AdminGuard::new(signer, Arc::new(store)), admin_id)
    }

    #[tokio::test]
    async fn admin_token_is_accepted() {
        let (_tmp, guard, admin_id) = guard().await;
        let token = guard.signer().issue(&admin_id.to_string()).expect("issue");
        let identity = guard.require_admin(Some(&token)).await.expect("admin");
        assert_eq!(identity.user_id, admin_id.to_string());
        assert_eq!(identity.email.as_deref(), Some("admin@r32.ro"));
    }

    #[tokio::test]
    async fn non_admin_is_forbidden() {
        let (_tmp, guard, _) = guard().await;
        let token = guard.signer().issue("customer-1").expect("issue");
        assert!(matches!(guard.require_admin(Some(&token)).await, Err(AuthError::NotAdmin)));
    }

    #[tokio::test]
    async fn missing_or_unknown_callers_are_unauthorized() {
        let (_tmp, guard, _) = guard().await;
        assert!(matches!(guard.require_admin(None).await, Err(AuthError::MissingToken)));

        let token = guard.signer().issue("ghost").expect("issue");
        let err = guard.require_admin(Some(&token)).await.unwrap_err();
        assert!(matches!(err, AuthError::UnknownUser));
        assert!(err.is_unauthorized());
    }
}
