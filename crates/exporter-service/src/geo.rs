//! IP → country enrichment for crawler peers.
//!
//! The lookup is optional: when no database is configured the crawler skips
//! country mapping entirely and every other metric keeps working.

use maxminddb::MaxMindDBError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Locale kept from the database's localized names.
pub const PRIMARY_LOCALE: &str = "en";

/// Country data for one address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountryInfo {
    /// ISO 3166-1 alpha-2 code, e.g. "US".
    pub iso_code: String,
    /// Country names keyed by locale.
    pub names: BTreeMap<String, String>,
}

impl CountryInfo {
    /// Name in the primary locale, or an empty string when not provided.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.names
            .get(PRIMARY_LOCALE)
            .map_or("", String::as_str)
    }
}

#[derive(Debug, Error)]
pub enum GeoError {
    /// Database file could not be opened or parsed.
    #[error("Failed to open geo database: {0}")]
    Open(String),

    /// Lookup failed for a reason other than "address not found".
    #[error("Geo lookup failed: {0}")]
    Lookup(String),
}

/// Country lookup capability.
pub trait GeoLookup: Send + Sync {
    /// Look up the country of `ip`.
    ///
    /// Returns `Ok(None)` when the database has no entry for the address.
    fn lookup(&self, ip: IpAddr) -> Result<Option<CountryInfo>, GeoError>;
}

/// Country record layout of MaxMind country/city databases.
#[derive(Debug, Deserialize)]
struct CountryRecord {
    country: Option<CountryFields>,
}

#[derive(Debug, Deserialize)]
struct CountryFields {
    iso_code: Option<String>,
    names: Option<BTreeMap<String, String>>,
}

/// MaxMind-backed lookup.
pub struct MaxMindGeo {
    reader: maxminddb::Reader<Vec<u8>>,
}

impl MaxMindGeo {
    /// Open a MaxMind database file.
    pub fn open(path: &Path) -> Result<Self, GeoError> {
        let reader = maxminddb::Reader::open_readfile(path)
            .map_err(|e| GeoError::Open(format!("{}: {e}", path.display())))?;
        info!(
            target: "exporter.geo",
            path = %path.display(),
            database_type = %reader.metadata.database_type,
            "Loaded geo database"
        );
        Ok(Self { reader })
    }
}

impl GeoLookup for MaxMindGeo {
    fn lookup(&self, ip: IpAddr) -> Result<Option<CountryInfo>, GeoError> {
        let record: CountryRecord = match self.reader.lookup(ip) {
            Ok(record) => record,
            Err(MaxMindDBError::AddressNotFoundError(_)) => return Ok(None),
            Err(e) => return Err(GeoError::Lookup(e.to_string())),
        };

        Ok(record.country.map(|country| CountryInfo {
            iso_code: country.iso_code.unwrap_or_default(),
            names: country.names.unwrap_or_default(),
        }))
    }
}
