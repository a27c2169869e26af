//! Domain model
//!
//! Qualifications, crew members, flights and their participations, and the
//! derived currency records. Enumerations are stored in the database as their
//! `as_str()` text form; `RoleLevel` is stored and serialized as its integer.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Maximum number of qualification references on one participation
pub const MAX_PARTICIPATION_QUALIFICATIONS: usize = 6;

/// Default "never validated" sentinel date
pub fn default_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 1).expect("2020-01-01 is a valid date")
}

// ========================================
// Crew type
// ========================================

/// Crew type; gates which qualifications apply and whether landing counts are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrewType {
    Pilot,
    CabinOp,
    TacticalCtrl,
    SurvOp,
    Ops,
}

impl CrewType {
    pub const ALL: [CrewType; 5] = [
        CrewType::Pilot,
        CrewType::CabinOp,
        CrewType::TacticalCtrl,
        CrewType::SurvOp,
        CrewType::Ops,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CrewType::Pilot => "PILOT",
            CrewType::CabinOp => "CABIN_OP",
            CrewType::TacticalCtrl => "TACTICAL_CTRL",
            CrewType::SurvOp => "SURV_OP",
            CrewType::Ops => "OPS",
        }
    }

    /// Only pilots carry landing and approach counts
    pub fn logs_landings(&self) -> bool {
        matches!(self, CrewType::Pilot)
    }
}

impl fmt::Display for CrewType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CrewType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        CrewType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::invalid("crew_type", format!("unknown crew type '{s}'")))
    }
}

// ========================================
// Qualification group
// ========================================

/// Taxonomic group of a qualification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualificationGroup {
    Landing,
    PilotCurrency,
    Cabin,
    Tactical,
    Surveillance,
    Operations,
    General,
}

impl QualificationGroup {
    pub const ALL: [QualificationGroup; 7] = [
        QualificationGroup::Landing,
        QualificationGroup::PilotCurrency,
        QualificationGroup::Cabin,
        QualificationGroup::Tactical,
        QualificationGroup::Surveillance,
        QualificationGroup::Operations,
        QualificationGroup::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QualificationGroup::Landing => "LANDING",
            QualificationGroup::PilotCurrency => "PILOT_CURRENCY",
            QualificationGroup::Cabin => "CABIN",
            QualificationGroup::Tactical => "TACTICAL",
            QualificationGroup::Surveillance => "SURVEILLANCE",
            QualificationGroup::Operations => "OPERATIONS",
            QualificationGroup::General => "GENERAL",
        }
    }

    /// Fixed policy table: which crew types a group may apply to
    pub fn allowed_crew_types(&self) -> &'static [CrewType] {
        match self {
            QualificationGroup::Landing | QualificationGroup::PilotCurrency => &[CrewType::Pilot],
            QualificationGroup::Cabin => &[CrewType::CabinOp],
            QualificationGroup::Tactical => &[CrewType::TacticalCtrl],
            QualificationGroup::Surveillance => &[CrewType::SurvOp],
            QualificationGroup::Operations => &[CrewType::Ops],
            QualificationGroup::General => &CrewType::ALL,
        }
    }

    pub fn allows(&self, crew_type: CrewType) -> bool {
        self.allowed_crew_types().contains(&crew_type)
    }
}

impl fmt::Display for QualificationGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualificationGroup {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        QualificationGroup::ALL
            .into_iter()
            .find(|g| g.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::invalid("group", format!("unknown qualification group '{s}'")))
    }
}

// ========================================
// Role level
// ========================================

/// Authorization tier of a crew member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum RoleLevel {
    Viewer = 20,
    Operator = 40,
    Supervisor = 60,
    Manager = 80,
    Admin = 100,
}

impl RoleLevel {
    pub const ALL: [RoleLevel; 5] = [
        RoleLevel::Viewer,
        RoleLevel::Operator,
        RoleLevel::Supervisor,
        RoleLevel::Manager,
        RoleLevel::Admin,
    ];

    pub fn value(&self) -> i64 {
        *self as i64
    }

    /// Cosmetic name, mirrored into the `roles` table
    pub fn label(&self) -> &'static str {
        match self {
            RoleLevel::Viewer => "viewer",
            RoleLevel::Operator => "operator",
            RoleLevel::Supervisor => "supervisor",
            RoleLevel::Manager => "manager",
            RoleLevel::Admin => "admin",
        }
    }
}

impl TryFrom<i64> for RoleLevel {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self> {
        RoleLevel::ALL
            .into_iter()
            .find(|l| l.value() == value)
            .ok_or_else(|| Error::invalid("role_level", format!("{value} is not one of 20, 40, 60, 80, 100")))
    }
}

impl From<RoleLevel> for i64 {
    fn from(level: RoleLevel) -> i64 {
        level.value()
    }
}

impl fmt::Display for RoleLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

// ========================================
// Crew status
// ========================================

/// Presence status; ABSENT crew are left out of operational statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrewStatus {
    #[default]
    Present,
    Absent,
}

impl CrewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrewStatus::Present => "PRESENT",
            CrewStatus::Absent => "ABSENT",
        }
    }
}

impl FromStr for CrewStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PRESENT" => Ok(CrewStatus::Present),
            "ABSENT" => Ok(CrewStatus::Absent),
            other => Err(Error::invalid("status", format!("unknown status '{other}'"))),
        }
    }
}

// ========================================
// Qualifications
// ========================================

/// Qualification definition from the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Qualification {
    pub id: i64,
    pub name: String,
    pub group: QualificationGroup,
    pub validity_days: i64,
    pub applicable_to: CrewType,
    /// Set when the qualification was logically deleted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retired_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Qualification {
    pub fn is_retired(&self) -> bool {
        self.retired_at.is_some()
    }
}

/// Catalog create request
#[derive(Debug, Clone, Deserialize)]
pub struct NewQualification {
    pub name: String,
    pub group: QualificationGroup,
    pub validity_days: i64,
    pub applicable_to: CrewType,
}

/// Catalog partial update
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QualificationPatch {
    pub name: Option<String>,
    pub group: Option<QualificationGroup>,
    pub validity_days: Option<i64>,
    pub applicable_to: Option<CrewType>,
}

/// Implicit landing qualifications attached to pilot participations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LandingKind {
    Day,
    Night,
    Precision,
    NonPrecision,
}

impl LandingKind {
    pub const ALL: [LandingKind; 4] = [
        LandingKind::Day,
        LandingKind::Night,
        LandingKind::Precision,
        LandingKind::NonPrecision,
    ];

    /// Catalog name the kind resolves to (crew type PILOT)
    pub fn catalog_name(&self) -> &'static str {
        match self {
            LandingKind::Day => "ATR",
            LandingKind::Night => "ATN",
            LandingKind::Precision => "precapp",
            LandingKind::NonPrecision => "nprecapp",
        }
    }

    /// `flight_pilots` column holding the count
    pub fn column(&self) -> &'static str {
        match self {
            LandingKind::Day => "day_landings",
            LandingKind::Night => "night_landings",
            LandingKind::Precision => "prec_app",
            LandingKind::NonPrecision => "nprec_app",
        }
    }
}

// ========================================
// Crew
// ========================================

/// Roster entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrewMember {
    pub nip: i64,
    pub name: String,
    pub rank: String,
    pub position: String,
    pub email: Option<String>,
    pub crew_type: CrewType,
    pub status: CrewStatus,
    pub role_level: RoleLevel,
}

/// Roster create request
#[derive(Debug, Clone, Deserialize)]
pub struct NewCrewMember {
    pub nip: i64,
    pub name: String,
    #[serde(default)]
    pub rank: String,
    #[serde(default)]
    pub position: String,
    #[serde(default)]
    pub email: Option<String>,
    pub crew_type: CrewType,
    #[serde(default)]
    pub status: CrewStatus,
    #[serde(default = "default_role_level")]
    pub role_level: RoleLevel,
    /// Optional initial password; hashed before storage
    #[serde(default)]
    pub password: Option<String>,
}

fn default_role_level() -> RoleLevel {
    RoleLevel::Viewer
}

/// Roster partial update
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrewMemberPatch {
    pub name: Option<String>,
    pub rank: Option<String>,
    pub position: Option<String>,
    pub email: Option<String>,
    pub crew_type: Option<CrewType>,
    pub status: Option<CrewStatus>,
    pub role_level: Option<RoleLevel>,
}

// ========================================
// Flights
// ========================================

/// Flight header fields, shared by stored flights and write requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightFields {
    pub airtask: String,
    pub date: NaiveDate,
    pub origin: String,
    pub destination: String,
    /// Off-blocks time, `HH:MM`
    pub departure: String,
    /// On-blocks time, `HH:MM`
    pub arrival: String,
    /// Flight time, `HH:MM` (lenient; unparseable counts as zero minutes)
    pub duration: String,
    #[serde(rename = "type")]
    pub flight_type: String,
    pub action: String,
    pub tail: i64,
    #[serde(default)]
    pub landings: i64,
    #[serde(default)]
    pub passengers: i64,
    #[serde(default)]
    pub doe: i64,
    #[serde(default)]
    pub cargo: i64,
    #[serde(default)]
    pub fuel: i64,
    #[serde(default)]
    pub orm: i64,
    #[serde(default)]
    pub num_crew: i64,
    #[serde(default)]
    pub ops_timestamps: Option<String>,
}

/// Stored flight with its participations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flight {
    pub id: i64,
    #[serde(flatten)]
    pub fields: FlightFields,
    pub participations: Vec<Participation>,
}

/// Qualification reference as submitted by a caller
///
/// Integers are catalog ids; strings are legacy names resolved against the
/// catalog by `(name, crew type)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QualificationRef {
    Id(i64),
    Name(String),
}

impl fmt::Display for QualificationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualificationRef::Id(id) => write!(f, "#{id}"),
            QualificationRef::Name(name) => write!(f, "'{name}'"),
        }
    }
}

/// Landing and approach counts (pilots only)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LandingCounts {
    #[serde(default)]
    pub day_landings: Option<i64>,
    #[serde(default)]
    pub night_landings: Option<i64>,
    #[serde(default)]
    pub prec_approaches: Option<i64>,
    #[serde(default)]
    pub non_prec_approaches: Option<i64>,
}

impl LandingCounts {
    pub fn count(&self, kind: LandingKind) -> i64 {
        let value = match kind {
            LandingKind::Day => self.day_landings,
            LandingKind::Night => self.night_landings,
            LandingKind::Precision => self.prec_approaches,
            LandingKind::NonPrecision => self.non_prec_approaches,
        };
        value.unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        LandingKind::ALL.iter().all(|k| self.count(*k) == 0)
    }
}

/// Participation as submitted on create/update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipationInput {
    pub nip: i64,
    #[serde(default)]
    pub position: String,
    #[serde(flatten)]
    pub landings: LandingCounts,
    #[serde(default)]
    pub qualifications: Vec<QualificationRef>,
}

/// Flight create/update request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightInput {
    #[serde(flatten)]
    pub fields: FlightFields,
    pub participations: Vec<ParticipationInput>,
}

/// Stored participation; qualification ids are already resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participation {
    pub nip: i64,
    pub position: String,
    #[serde(flatten)]
    pub landings: LandingCounts,
    pub qualifications: Vec<i64>,
}

// ========================================
// Currency
// ========================================

/// Derived per (crew, qualification) last validation date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyRecord {
    pub crew_nip: i64,
    pub qual_id: i64,
    pub last_validated: NaiveDate,
}
