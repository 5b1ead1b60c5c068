// Land Parcel Import - Core Library
// Exposes all modules for use in the import CLI, the query server, and tests

pub mod attributes;
pub mod config;
pub mod db;
pub mod error;
pub mod geometry;
pub mod logging;
pub mod normalize;
pub mod parcel;
pub mod parser;
pub mod reconciliation;
pub mod session;

// Re-export commonly used types
pub use attributes::AttributeExtractor;
pub use config::{ImportConfig, ServerConfig};
pub use db::{
    checkpoint, count_parcels, find_in_bbox, get_parcel, list_cities, list_districts,
    list_parcels, list_sections, open_store, search_parcels, setup_database, source_file_stats,
    stats_by_city, stats_by_district, summary_stats, BatchLoader, CityStats, DistrictStats,
    SearchFilter, Section, SourceFileStat, SummaryStats,
};
pub use error::{ImportError, Result};
pub use geometry::{BoundingBox, GeometryExtractor, GeometrySet, Ring, Vertex};
pub use logging::init_logging;
pub use normalize::{normalize, MatchPolicy, ZeroPaddedSplit};
pub use parcel::{CanonicalParcel, OwnerRecord, RawAttributeRecord, StoredParcel};
pub use parser::{SourceParser, SourceType};
pub use reconciliation::{MatchKind, ParcelReconciler, Reconciliation};
pub use session::{
    discover_pairs, Discovery, FilePair, ImportSession, ImportStatistics, PairEntry, PairReport,
    SessionState, StopHandle,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
