pub mod circuit_breaker;
pub mod cleanup;
pub mod geo_search;
pub mod geocoding;
pub mod holds;
pub mod orders;

pub use cleanup::HoldSweeper;
pub use geo_search::{GeoSearchService, SpatialCapability};
pub use holds::{HoldRequest, HoldService};
pub use orders::OrderService;
