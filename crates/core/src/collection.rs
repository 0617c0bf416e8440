use crate::value::Document;

pub const ID_FIELD: &str = "_id";

/// Field names under which user records may carry a credential.
pub const CREDENTIAL_FIELDS: [&str; 4] = ["password", "password_hash", "passwordHash", "hashed_password"];

/// The application collections covered by backups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Categories,
    Products,
    Users,
    Orders,
    Reviews,
}

/// How a restore treats the live contents of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestorePolicy {
    /// Delete everything, then insert the backup.
    Overwrite,
    /// Keep existing records; insert backup records whose key is not present yet.
    MergeByKey(&'static str),
    /// Never restored.
    Skip,
}

impl Collection {
    /// Export order.
    pub const ALL: [Collection; 5] = [
        Collection::Categories,
        Collection::Products,
        Collection::Users,
        Collection::Orders,
        Collection::Reviews,
    ];

    /// Restore order: overwritten collections first, merged orders last.
    pub const RESTORE_ORDER: [Collection; 5] = [
        Collection::Categories,
        Collection::Products,
        Collection::Reviews,
        Collection::Orders,
        Collection::Users,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Collection::Categories => "categories",
            Collection::Products => "products",
            Collection::Users => "users",
            Collection::Orders => "orders",
            Collection::Reviews => "reviews",
        }
    }

    pub fn restore_policy(self) -> RestorePolicy {
        match self {
            Collection::Categories | Collection::Products | Collection::Reviews => RestorePolicy::Overwrite,
            Collection::Orders => RestorePolicy::MergeByKey("orderId"),
            Collection::Users => RestorePolicy::Skip,
        }
    }

    pub fn strips_credentials(self) -> bool {
        matches!(self, Collection::Users)
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Removes every credential field from a record, returning how many were present.
pub fn strip_credentials(doc: &mut Document) -> usize {
    CREDENTIAL_FIELDS
        .iter()
        .filter(|field| doc.remove(**field).is_some())
        .count()
}
