pub mod cluster;
pub mod features;
pub mod forecast;
pub mod hotspots;
pub mod scorer;
