//! Named lookup tables around the grid: which service answers a cell, which
//! station a service belongs to, and how vulnerable each station's population is.

mod district;
mod jurisdiction;
mod locator;
mod station;

pub use district::{district_from_address, normalize_district};
pub use jurisdiction::JurisdictionMap;
pub use locator::{assign_services, CellServices, Service, ServiceColumns, ServiceLocator, ServiceShare};
pub use station::{
    CellVulnerability, StationRecord, StationRegistry, VulnLoadings,
    DISABLED, FIREFIGHTERS, INFANT, ONE_PERSON, REGISTERED, SENIOR, WEIGHTED_COLUMNS,
};
