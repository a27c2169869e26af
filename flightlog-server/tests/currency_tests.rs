//! Currency index behaviour through the flight log write paths
//!
//! The full rebuild serves as the oracle: after any sequence of writes the
//! incrementally maintained index must equal what a rebuild produces.

use chrono::NaiveDate;
use sqlx::SqlitePool;

use flightlog_common::db::init_memory_database;
use flightlog_common::models::{
    default_epoch, CrewMemberPatch, CrewStatus, CurrencyRecord, FlightFields, FlightInput, LandingCounts, LandingKind,
    NewCrewMember, NewQualification, ParticipationInput, QualificationRef,
};
use flightlog_common::{CrewType, Error, QualificationGroup, RoleLevel};
use flightlog_server::services::catalog::DeleteOutcome;
use flightlog_server::services::{Catalog, CurrencyIndex, CurrencyProjector, FlightLog, ReprocessOrchestrator, Roster};

const PILOT: i64 = 135885;

struct Fixture {
    db: SqlitePool,
    catalog: Catalog,
    roster: Roster,
    flights: FlightLog,
    projector: CurrencyProjector,
    reprocess: ReprocessOrchestrator,
}

async fn fixture() -> Fixture {
    let db = init_memory_database().await.unwrap();
    let catalog = Catalog::new(db.clone());
    let roster = Roster::new(db.clone());
    let flights = FlightLog::new(db.clone(), catalog.clone(), CurrencyIndex::new(default_epoch()));
    let projector = CurrencyProjector::new(db.clone(), catalog.clone(), default_epoch());
    let reprocess = ReprocessOrchestrator::new(db.clone(), catalog.clone(), flights.clone(), 3);
    Fixture {
        db,
        catalog,
        roster,
        flights,
        projector,
        reprocess,
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

async fn add_crew(f: &Fixture, nip: i64, crew_type: CrewType, status: CrewStatus) {
    f.roster
        .create(NewCrewMember {
            nip,
            name: format!("Crew {nip}"),
            rank: "CAP".into(),
            position: String::new(),
            email: None,
            crew_type,
            status,
            role_level: RoleLevel::Viewer,
            password: None,
        })
        .await
        .unwrap();
}

async fn add_qualification(f: &Fixture, name: &str, applicable_to: CrewType) -> i64 {
    f.catalog
        .create(NewQualification {
            name: name.into(),
            group: match applicable_to {
                CrewType::Pilot => QualificationGroup::PilotCurrency,
                _ => QualificationGroup::General,
            },
            validity_days: 180,
            applicable_to,
        })
        .await
        .unwrap()
        .id
}

fn participation(nip: i64, qualifications: Vec<QualificationRef>) -> ParticipationInput {
    ParticipationInput {
        nip,
        position: "PC".into(),
        landings: LandingCounts::default(),
        qualifications,
    }
}

fn flight(on: NaiveDate, participations: Vec<ParticipationInput>) -> FlightInput {
    FlightInput {
        fields: FlightFields {
            airtask: "1A23".into(),
            date: on,
            origin: "LPMT".into(),
            destination: "LPLA".into(),
            departure: "09:30".into(),
            arrival: "12:00".into(),
            duration: "02:30".into(),
            flight_type: "OPER".into(),
            action: "SAR".into(),
            tail: 16701,
            landings: 1,
            passengers: 0,
            doe: 0,
            cargo: 0,
            fuel: 0,
            orm: 0,
            num_crew: participations.len() as i64,
            ops_timestamps: None,
        },
        participations,
    }
}

async fn last_validated(db: &SqlitePool, nip: i64, qual_id: i64) -> Option<NaiveDate> {
    sqlx::query_scalar("SELECT last_validated FROM tripulante_qualificacoes WHERE crew_nip = ? AND qual_id = ?")
        .bind(nip)
        .bind(qual_id)
        .fetch_optional(db)
        .await
        .unwrap()
}

async fn index_dump(f: &Fixture) -> Vec<CurrencyRecord> {
    let mut conn = f.db.acquire().await.unwrap();
    f.flights.index().all_records(&mut conn).await.unwrap()
}

async fn landing_id(f: &Fixture, kind: LandingKind) -> i64 {
    f.catalog.snapshot().await.unwrap().landing_id(kind).unwrap()
}

#[tokio::test]
async fn test_forward_insert() {
    let f = fixture().await;
    add_crew(&f, PILOT, CrewType::Pilot, CrewStatus::Present).await;
    let qa1 = add_qualification(&f, "QA1", CrewType::Pilot).await;

    f.flights
        .create(flight(date(2025, 5, 10), vec![participation(PILOT, vec![QualificationRef::Id(qa1)])]))
        .await
        .unwrap();

    assert_eq!(last_validated(&f.db, PILOT, qa1).await, Some(date(2025, 5, 10)));
    assert_eq!(
        f.projector.remaining_days(PILOT, qa1, date(2025, 5, 10)).await.unwrap(),
        Some(180)
    );
}

#[tokio::test]
async fn test_older_flight_does_not_move_currency_back() {
    let f = fixture().await;
    add_crew(&f, PILOT, CrewType::Pilot, CrewStatus::Present).await;
    let qa1 = add_qualification(&f, "QA1", CrewType::Pilot).await;

    f.flights
        .create(flight(date(2025, 5, 10), vec![participation(PILOT, vec![QualificationRef::Id(qa1)])]))
        .await
        .unwrap();
    f.flights
        .create(flight(date(2025, 4, 1), vec![participation(PILOT, vec![QualificationRef::Id(qa1)])]))
        .await
        .unwrap();

    assert_eq!(last_validated(&f.db, PILOT, qa1).await, Some(date(2025, 5, 10)));
}

#[tokio::test]
async fn test_delete_reconciles_to_surviving_maximum() {
    let f = fixture().await;
    add_crew(&f, PILOT, CrewType::Pilot, CrewStatus::Present).await;
    let qa1 = add_qualification(&f, "QA1", CrewType::Pilot).await;

    let may = f
        .flights
        .create(flight(date(2025, 5, 10), vec![participation(PILOT, vec![QualificationRef::Id(qa1)])]))
        .await
        .unwrap();
    let april = f
        .flights
        .create(flight(date(2025, 4, 1), vec![participation(PILOT, vec![QualificationRef::Id(qa1)])]))
        .await
        .unwrap();

    f.flights.delete(may.id).await.unwrap();
    assert_eq!(last_validated(&f.db, PILOT, qa1).await, Some(date(2025, 4, 1)));

    f.flights.delete(april.id).await.unwrap();
    assert_eq!(last_validated(&f.db, PILOT, qa1).await, Some(default_epoch()));
    assert_eq!(f.projector.remaining_days(PILOT, qa1, date(2025, 6, 1)).await.unwrap(), None);
}

#[tokio::test]
async fn test_edit_reconciles_old_and_forwards_new() {
    let f = fixture().await;
    add_crew(&f, PILOT, CrewType::Pilot, CrewStatus::Present).await;
    let qa1 = add_qualification(&f, "QA1", CrewType::Pilot).await;
    let qa9 = add_qualification(&f, "QA9", CrewType::Pilot).await;

    let created = f
        .flights
        .create(flight(date(2025, 5, 10), vec![participation(PILOT, vec![QualificationRef::Id(qa1)])]))
        .await
        .unwrap();
    f.flights
        .update(
            created.id,
            flight(date(2025, 5, 10), vec![participation(PILOT, vec![QualificationRef::Id(qa9)])]),
        )
        .await
        .unwrap();

    assert_eq!(last_validated(&f.db, PILOT, qa1).await, Some(default_epoch()));
    assert_eq!(last_validated(&f.db, PILOT, qa9).await, Some(date(2025, 5, 10)));

    let stored = f.flights.get(created.id).await.unwrap();
    assert_eq!(stored.participations[0].qualifications, vec![qa9]);
}

#[tokio::test]
async fn test_day_landings_cite_landing_qualification() {
    let f = fixture().await;
    add_crew(&f, PILOT, CrewType::Pilot, CrewStatus::Present).await;
    let atr = landing_id(&f, LandingKind::Day).await;
    let atn = landing_id(&f, LandingKind::Night).await;

    let mut with_landings = participation(PILOT, vec![]);
    with_landings.landings.day_landings = Some(2);
    let created = f
        .flights
        .create(flight(date(2025, 6, 1), vec![with_landings.clone()]))
        .await
        .unwrap();

    assert_eq!(last_validated(&f.db, PILOT, atr).await, Some(date(2025, 6, 1)));
    assert_eq!(last_validated(&f.db, PILOT, atn).await, None);

    with_landings.landings.day_landings = Some(0);
    f.flights
        .update(created.id, flight(date(2025, 6, 1), vec![with_landings]))
        .await
        .unwrap();
    assert_eq!(last_validated(&f.db, PILOT, atr).await, Some(default_epoch()));
}

#[tokio::test]
async fn test_expiring_soon_orders_by_remaining_days() {
    let f = fixture().await;
    let q = add_qualification(&f, "QA1", CrewType::Pilot).await;
    let dates = [(1001, date(2025, 3, 1)), (1002, date(2025, 1, 1)), (1003, date(2025, 2, 1))];
    for (nip, on) in dates {
        add_crew(&f, nip, CrewType::Pilot, CrewStatus::Present).await;
        f.flights
            .create(flight(on, vec![participation(nip, vec![QualificationRef::Id(q)])]))
            .await
            .unwrap();
    }
    // Absent crew never shows up, even with the oldest date
    add_crew(&f, 1004, CrewType::Pilot, CrewStatus::Absent).await;
    f.flights
        .create(flight(date(2024, 12, 1), vec![participation(1004, vec![QualificationRef::Id(q)])]))
        .await
        .unwrap();

    let expiring = f.projector.expiring_soon(2, date(2025, 6, 15)).await.unwrap();
    let nips: Vec<i64> = expiring.iter().map(|e| e.nip).collect();
    assert_eq!(nips, vec![1002, 1003]);
    assert!(expiring[0].remaining_days < expiring[1].remaining_days);
    assert_eq!(expiring[0].last_validated, date(2025, 1, 1));
}

#[tokio::test]
async fn test_rebuild_matches_incremental_index() {
    let f = fixture().await;
    add_crew(&f, 1, CrewType::Pilot, CrewStatus::Present).await;
    add_crew(&f, 2, CrewType::Pilot, CrewStatus::Present).await;
    add_crew(&f, 3, CrewType::CabinOp, CrewStatus::Present).await;
    let qa1 = add_qualification(&f, "QA1", CrewType::Pilot).await;
    let qa2 = add_qualification(&f, "QA2", CrewType::Pilot).await;
    let cab = add_qualification(&f, "CAB1", CrewType::CabinOp).await;

    let mut landing = participation(2, vec![QualificationRef::Id(qa2)]);
    landing.landings.night_landings = Some(1);
    landing.landings.prec_approaches = Some(3);

    let a = f
        .flights
        .create(flight(
            date(2025, 1, 10),
            vec![
                participation(1, vec![QualificationRef::Id(qa1), QualificationRef::Id(qa2)]),
                participation(3, vec![QualificationRef::Id(cab)]),
            ],
        ))
        .await
        .unwrap();
    let b = f
        .flights
        .create(flight(date(2025, 3, 5), vec![landing.clone()]))
        .await
        .unwrap();
    let c = f
        .flights
        .create(flight(
            date(2025, 2, 20),
            vec![
                participation(1, vec![QualificationRef::Name("qa1".into())]),
                participation(2, vec![QualificationRef::Id(qa1)]),
            ],
        ))
        .await
        .unwrap();
    f.flights
        .create(flight(date(2025, 4, 2), vec![participation(3, vec![QualificationRef::Id(cab)])]))
        .await
        .unwrap();

    f.flights
        .update(
            b.id,
            flight(date(2025, 1, 15), vec![participation(2, vec![QualificationRef::Id(qa1)])]),
        )
        .await
        .unwrap();
    f.flights.delete(c.id).await.unwrap();
    f.flights
        .update(
            a.id,
            flight(date(2025, 5, 1), vec![participation(1, vec![QualificationRef::Id(qa2)])]),
        )
        .await
        .unwrap();

    let incremental = index_dump(&f).await;
    let report = f.reprocess.rebuild_all().await.unwrap();
    assert_eq!(report.total_flights, 3);
    assert_eq!(report.processed, 3);
    assert_eq!(report.errors, 0);

    assert_eq!(index_dump(&f).await, incremental);
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let f = fixture().await;
    add_crew(&f, PILOT, CrewType::Pilot, CrewStatus::Present).await;
    let qa1 = add_qualification(&f, "QA1", CrewType::Pilot).await;

    let input = flight(date(2025, 5, 10), vec![participation(PILOT, vec![QualificationRef::Id(qa1)])]);
    let created = f.flights.create(input.clone()).await.unwrap();
    f.flights.update(created.id, input.clone()).await.unwrap();
    let once = index_dump(&f).await;
    f.flights.update(created.id, input).await.unwrap();

    assert_eq!(index_dump(&f).await, once);
    assert_eq!(last_validated(&f.db, PILOT, qa1).await, Some(date(2025, 5, 10)));
}

#[tokio::test]
async fn test_unresolvable_pieces_are_skipped() {
    let f = fixture().await;
    add_crew(&f, PILOT, CrewType::Pilot, CrewStatus::Present).await;
    add_crew(&f, 77, CrewType::CabinOp, CrewStatus::Present).await;
    let qa1 = add_qualification(&f, "QA1", CrewType::Pilot).await;
    let cab = add_qualification(&f, "CAB1", CrewType::CabinOp).await;

    let mut cabin = participation(77, vec![QualificationRef::Id(qa1), QualificationRef::Id(cab)]);
    cabin.landings.day_landings = Some(4);

    let created = f
        .flights
        .create(flight(
            date(2025, 5, 10),
            vec![
                participation(
                    PILOT,
                    vec![
                        QualificationRef::Id(qa1),
                        QualificationRef::Name("NO SUCH QUAL".into()),
                        QualificationRef::Id(9999),
                    ],
                ),
                participation(424242, vec![QualificationRef::Id(qa1)]),
                cabin,
            ],
        ))
        .await
        .unwrap();

    // Unknown crew dropped; unresolved references dropped; flight kept
    assert_eq!(created.participations.len(), 2);
    assert_eq!(created.participations[0].qualifications, vec![qa1]);
    assert_eq!(created.participations[1].qualifications, vec![cab]);
    assert!(created.participations[1].landings.is_empty());

    let atr = landing_id(&f, LandingKind::Day).await;
    assert_eq!(last_validated(&f.db, 77, atr).await, None);
    assert_eq!(last_validated(&f.db, 77, qa1).await, None);
    assert_eq!(last_validated(&f.db, 77, cab).await, Some(date(2025, 5, 10)));
    assert_eq!(last_validated(&f.db, 424242, qa1).await, None);
}

#[tokio::test]
async fn test_retired_qualification_keeps_history() {
    let f = fixture().await;
    add_crew(&f, PILOT, CrewType::Pilot, CrewStatus::Present).await;
    let qa1 = add_qualification(&f, "QA1", CrewType::Pilot).await;

    let created = f
        .flights
        .create(flight(date(2025, 5, 10), vec![participation(PILOT, vec![QualificationRef::Id(qa1)])]))
        .await
        .unwrap();

    assert!(f.catalog.delete(qa1, false).await.is_err());
    f.catalog.delete(qa1, true).await.unwrap();

    let stored = f.flights.get(created.id).await.unwrap();
    assert_eq!(stored.participations[0].qualifications, vec![qa1]);
    assert_eq!(last_validated(&f.db, PILOT, qa1).await, Some(date(2025, 5, 10)));
}

#[tokio::test]
async fn test_crew_type_change_keeps_landing_records_reconcilable() {
    let f = fixture().await;
    add_crew(&f, PILOT, CrewType::Pilot, CrewStatus::Present).await;
    let atr = landing_id(&f, LandingKind::Day).await;

    let mut with_landings = participation(PILOT, vec![]);
    with_landings.landings.day_landings = Some(2);
    let created = f
        .flights
        .create(flight(date(2025, 6, 1), vec![with_landings]))
        .await
        .unwrap();
    assert_eq!(last_validated(&f.db, PILOT, atr).await, Some(date(2025, 6, 1)));

    f.roster
        .update(
            PILOT,
            CrewMemberPatch {
                crew_type: Some(CrewType::CabinOp),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // Stored counts still cite ATR, so deleting the flight reconciles it
    f.flights.delete(created.id).await.unwrap();
    assert_eq!(last_validated(&f.db, PILOT, atr).await, Some(default_epoch()));

    let incremental = index_dump(&f).await;
    f.reprocess.rebuild_all().await.unwrap();
    assert_eq!(index_dump(&f).await, incremental);
}

#[tokio::test]
async fn test_landing_qualification_in_use_cannot_be_deleted() {
    let f = fixture().await;
    add_crew(&f, PILOT, CrewType::Pilot, CrewStatus::Present).await;
    let atr = landing_id(&f, LandingKind::Day).await;
    let atn = landing_id(&f, LandingKind::Night).await;

    let mut with_landings = participation(PILOT, vec![]);
    with_landings.landings.day_landings = Some(1);
    let first = f
        .flights
        .create(flight(date(2025, 5, 1), vec![with_landings.clone()]))
        .await
        .unwrap();
    f.flights
        .create(flight(date(2025, 4, 1), vec![with_landings]))
        .await
        .unwrap();

    for cascade in [false, true] {
        match f.catalog.delete(atr, cascade).await {
            Err(Error::Conflict(message)) => assert!(message.contains("landing counts")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
    assert!(f.catalog.get(atr).await.unwrap().retired_at.is_none());

    f.flights.delete(first.id).await.unwrap();
    assert_eq!(last_validated(&f.db, PILOT, atr).await, Some(date(2025, 4, 1)));

    // No night landings anywhere: ATN goes like any unreferenced entry
    assert_eq!(f.catalog.delete(atn, false).await.unwrap(), DeleteOutcome::Deleted);
}

#[tokio::test]
async fn test_year_statistics() {
    let f = fixture().await;
    add_crew(&f, 1001, CrewType::Pilot, CrewStatus::Present).await;
    add_crew(&f, 1002, CrewType::Pilot, CrewStatus::Present).await;
    add_crew(&f, 1003, CrewType::CabinOp, CrewStatus::Present).await;
    add_crew(&f, 1009, CrewType::Pilot, CrewStatus::Absent).await;

    let flights = [
        (date(2025, 3, 1), "02:30", "OPER", "SAR", (4, 1, 100), vec![1001, 1009, 1003]),
        (date(2025, 4, 1), "01:00", "INSTR", "TRAIN", (0, 2, 0), vec![1002, 1009]),
        (date(2025, 5, 1), "__:__", "OPER", "MEDEVAC", (1, 0, 0), vec![1001, 1002, 1009]),
        (date(2025, 6, 1), "01:30", "INSTR", "TRAIN", (0, 0, 0), vec![1002, 1009]),
        (date(2024, 12, 31), "05:00", "OPER", "SAR", (9, 9, 9), vec![1002]),
    ];
    for (on, duration, flight_type, action, (passengers, doe, cargo), crew) in flights {
        let mut input = flight(on, crew.into_iter().map(|nip| participation(nip, vec![])).collect());
        input.fields.duration = duration.into();
        input.fields.flight_type = flight_type.into();
        input.fields.action = action.into();
        input.fields.passengers = passengers;
        input.fields.doe = doe;
        input.fields.cargo = cargo;
        f.flights.create(input).await.unwrap();
    }

    let stats = f.projector.year_statistics(2025).await.unwrap();
    assert_eq!(stats.year, 2025);
    assert_eq!(stats.flight_count, 4);
    assert_eq!(stats.total_minutes, 300);
    assert_eq!(stats.minutes_by_type["OPER"], 150);
    assert_eq!(stats.minutes_by_type["INSTR"], 150);
    assert_eq!(stats.minutes_by_action["SAR"], 150);
    assert_eq!(stats.minutes_by_action["TRAIN"], 150);
    assert_eq!(stats.minutes_by_action["MEDEVAC"], 0);
    assert_eq!((stats.totals.passengers, stats.totals.doe, stats.totals.cargo), (5, 3, 100));

    // 1001 and 1002 tie on 150 minutes; absent 1009 flew more but is not ranked
    let top_pilot = &stats.top_crew_by_type[CrewType::Pilot.as_str()];
    assert_eq!((top_pilot.nip, top_pilot.minutes), (1001, 150));
    assert_eq!(top_pilot.name, "Crew 1001");
    let top_cabin = &stats.top_crew_by_type[CrewType::CabinOp.as_str()];
    assert_eq!((top_cabin.nip, top_cabin.minutes), (1003, 150));
    assert_eq!(stats.top_crew_by_type.len(), 2);
}
