pub mod geocode;
pub mod grid;
pub mod join;
pub mod services;
pub mod travel;
pub mod vuln;
