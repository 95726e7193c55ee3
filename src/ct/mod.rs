//! Certificate Transparency plumbing: the RFC 6962 leaf wire codec,
//! X.509 field extraction, and the per-log HTTP client.

pub mod cert;
pub mod client;
pub mod leaf;
