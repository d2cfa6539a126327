//! lockbox - secrets in a single kdbx container
//!
//! Entries are addressed as `<group-path>/<field>` where the field is one of
//! `notes`, `otp`, `password` or `url`.

pub mod backend;
pub mod cli;
pub mod clip;
pub mod credential;
pub mod entry;
pub mod error;
pub mod totp;

pub use backend::{Entity, QueryOptions, Transaction, ValueMode};
pub use credential::Credential;
pub use entry::{FieldKind, FieldValue};
pub use error::LockboxError;
