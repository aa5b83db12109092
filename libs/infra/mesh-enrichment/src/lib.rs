//! Best-effort ASN/GeoIP/CPE enrichment. Every adapter degrades to a
//! missing-enrichment marker on failure rather than aborting the host being
//! enriched — callers never see an `Err` from `lookup`.

pub mod asn;
pub mod cache;
pub mod cpe;
mod errors;
pub mod geoip;

pub use asn::{AsnAdapter, AsnRecord};
pub use cpe::CpeAdapter;
pub use geoip::{GeoIpAdapter, GeoIpRecord};
