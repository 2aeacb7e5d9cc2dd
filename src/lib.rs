// Organisation Registry Cache - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod cache;     // Build context: populate, derive, export
pub mod config;    // TOML settings
pub mod dar;       // DAR address resolution (memoized)
pub mod derived;   // Primary engagements, unit location and managers
pub mod entities;  // Per-class extractors and cache records
pub mod error;     // Fatal vs. data-integrity errors
pub mod quality;   // Integrity report
pub mod registry;  // Raw object model + paged reads
pub mod store;     // SQLite artifact store + build receipts
pub mod temporal;  // Validity bounds and effect intervals

// Re-export commonly used types
pub use cache::{build, BuildOptions, BuildOutcome, OrgCache};
pub use config::Settings;
pub use dar::{AddressLookup, DarEntry, DarMemo, DarResolver, DawaClient};
pub use entities::{CacheTable, EntityClass};
pub use error::{CacheError, IntegrityError, Result};
pub use quality::{IntegrityIssue, IntegrityReport, IntegritySummary, Severity};
pub use registry::{HttpRegistry, PagedReader, RegistryTransport};
pub use store::{ArtifactInfo, ArtifactStore, BuildReceipt};
pub use temporal::{Bound, Effect, GroupRef, SliceMode};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
