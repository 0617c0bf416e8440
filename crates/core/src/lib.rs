pub mod backup;
pub mod collection;
pub mod error;
pub mod timestamp;
pub mod value;

pub use backup::{
    BackupCollections, BackupDocument, BackupOrigin, BackupStats, DatabaseInfo, RestoreRequest, RestoreSummary,
};
pub use collection::{strip_credentials, Collection, RestorePolicy, CREDENTIAL_FIELDS, ID_FIELD};
pub use error::InputError;
pub use timestamp::{export_stamp, format_iso, parse_iso, parse_timestamp_fields, TIMESTAMP_FIELDS};
pub use value::{
    document_from_extended_json, document_from_json, document_to_export_json, document_to_extended_json, Document,
    Value,
};
