//! Plate Reader: license-plate recognition over HTTP.
//!
//! The service lives in `plate-service`; this package hosts the end-to-end
//! tests under `tests/`.

pub use common;
pub use plate_service;
