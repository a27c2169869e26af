//! Domain services
//!
//! Each service owns a clone of the pool; write paths open their own
//! transaction and thread `&mut SqliteConnection` through the helpers they call.

pub mod bulk_exporter;
pub mod catalog;
pub mod currency_index;
pub mod currency_projector;
pub mod flight_log;
pub mod legacy;
pub mod mailer;
pub mod reprocess;
pub mod roster;
pub mod session;

pub use bulk_exporter::BulkExporter;
pub use catalog::Catalog;
pub use currency_index::CurrencyIndex;
pub use currency_projector::CurrencyProjector;
pub use flight_log::FlightLog;
pub use reprocess::ReprocessOrchestrator;
pub use roster::Roster;
pub use session::SessionService;

use flightlog_common::models::{LandingKind, QualificationRef};
use flightlog_common::CrewType;
use tracing::warn;

/// Unresolved reference met while writing
///
/// The offending piece is dropped and the write carries on; the skip is only
/// ever logged.
#[derive(Debug)]
pub(crate) enum SoftSkip {
    UnknownCrew { nip: i64 },
    UnknownQualification { nip: i64, reference: QualificationRef },
    NotApplicable { nip: i64, qual_id: i64, crew_type: CrewType },
    LandingsOnNonPilot { nip: i64, crew_type: CrewType },
    MissingLandingQualification { kind: LandingKind },
}

impl SoftSkip {
    pub(crate) fn log(self) {
        match self {
            SoftSkip::UnknownCrew { nip } => {
                warn!(nip, "Skipping participation: crew member not on roster");
            }
            SoftSkip::UnknownQualification { nip, reference } => {
                warn!(nip, "Dropping qualification {}: not in catalog", reference);
            }
            SoftSkip::NotApplicable { nip, qual_id, crew_type } => {
                warn!(nip, qual_id, "Dropping qualification: does not apply to {}", crew_type);
            }
            SoftSkip::LandingsOnNonPilot { nip, crew_type } => {
                warn!(nip, "Dropping landing counts on {} participation", crew_type);
            }
            SoftSkip::MissingLandingQualification { kind } => {
                warn!(
                    "Landing qualification '{}' missing from catalog; citation skipped",
                    kind.catalog_name()
                );
            }
        }
    }
}
