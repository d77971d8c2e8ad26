//! Remote protocol access.
//!
//! [`transport`] defines the seam, [`sftp`] and [`ftp`] implement it, and
//! [`session`] owns the single live connection and serialises every call.

pub mod ftp;
pub mod session;
pub mod sftp;
pub mod status;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;
