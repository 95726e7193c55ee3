pub mod cert_store;
pub mod monitored_log;

pub use cert_store::{CertStore, ErrorLog};
pub use monitored_log::{LogState, MonitoredLog};
