//! Static geo lookup.
//!
//! Addresses not in the table resolve to "not found". Addresses marked with
//! [`StaticGeo::with_error`] fail the lookup.

use exporter_service::geo::{CountryInfo, GeoError, GeoLookup};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Geo lookup over a fixed address table.
#[derive(Debug, Default)]
pub struct StaticGeo {
    countries: HashMap<IpAddr, CountryInfo>,
    errors: HashSet<IpAddr>,
    lookups: AtomicUsize,
}

impl StaticGeo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `ip` to a country with an English display name.
    #[must_use]
    pub fn with_country(mut self, ip: &str, iso_code: &str, english_name: &str) -> Self {
        let names = BTreeMap::from([("en".to_string(), english_name.to_string())]);
        self.countries.insert(
            ip.parse().unwrap(),
            CountryInfo {
                iso_code: iso_code.to_string(),
                names,
            },
        );
        self
    }

    /// Make lookups of `ip` fail.
    #[must_use]
    pub fn with_error(mut self, ip: &str) -> Self {
        self.errors.insert(ip.parse().unwrap());
        self
    }

    /// Number of lookups performed.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl GeoLookup for StaticGeo {
    fn lookup(&self, ip: IpAddr) -> Result<Option<CountryInfo>, GeoError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.errors.contains(&ip) {
            return Err(GeoError::Lookup(format!("corrupt record for {ip}")));
        }
        Ok(self.countries.get(&ip).cloned())
    }
}
