//! Remote entries, path mapping and file operations.
//!
//! [`entry::RemoteEntry`] is the shared shape of a listed object,
//! [`path`] converts between remote paths and the local temp mirror, and
//! [`ops`] implements the create/rename/delete/chmod workflows.

pub mod entry;
pub mod ops;
pub mod path;
