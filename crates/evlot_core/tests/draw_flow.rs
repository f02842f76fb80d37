//! End-to-end organizer and entrant flows over one simulated backend.

mod common;

use common::coordinator;
use evlot_core::{
    CheckInOutcome, Ineligibility, LotteryError, MemoryGateway, PushTarget, Registration,
    FINAL_LIST_HEADER,
};
use evlot_model::{
    Document, DrawOutcome, EntrantStatus, EventId, InvitationResponse, QrPayload, UserId,
};
use evlot_testkit::prelude::*;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn draw_selects_capacity_from_eligible_entrants() {
    let world = TestWorld::new();
    let gateway = Arc::new(MemoryGateway::new());
    let org = coordinator(&world, "org", &gateway);
    let event = world.publish_event(org.store(), 2);
    let near = world.seed_checked_in(&event, 4, 50.0);
    let far = checked_in_entrant(&event, "far-away", 600.0, world.now());
    world.remote.seed(&Document::Entrant(far.clone())).unwrap();
    org.sync().unwrap();

    let pool = org.eligible_pool(event.id).unwrap();
    assert_eq!(pool.len(), 4);
    assert!(near.iter().all(|e| pool.contains(&e.id)));
    assert!(matches!(
        org.explain(event.id, far.id).unwrap(),
        Err(Ineligibility::OutsideGeofence { .. })
    ));

    let record = org.run_draw(event.id, 42).unwrap();
    assert_eq!(record.selected.len(), 2);
    assert_eq!(record.pool, pool);
    assert!(org.verify(event.id).unwrap().is_valid());

    for id in &record.pool {
        let entrant = org.entrant(*id).unwrap();
        let expected = match record.outcome_for(id) {
            Some(DrawOutcome::Selected) => EntrantStatus::Selected,
            _ => EntrantStatus::NotSelected,
        };
        assert_eq!(entrant.status, expected);
        assert_eq!(entrant.outcome, record.outcome_for(id));
    }
    let far_after = org.entrant(far.id).unwrap();
    assert_eq!(far_after.status, EntrantStatus::CheckedIn);
    assert_eq!(far_after.outcome, None);
}

#[test]
fn second_draw_changes_nothing() {
    let world = TestWorld::new();
    let gateway = Arc::new(MemoryGateway::new());
    let org = coordinator(&world, "org", &gateway);
    let event = world.publish_event(org.store(), 1);
    world.seed_checked_in(&event, 3, 10.0);
    org.sync().unwrap();

    let first = org.run_draw(event.id, 7).unwrap();
    let pending = org.store().pending_count();
    let log_len = world.remote.log_len();

    let err = org.run_draw(event.id, 8).unwrap_err();
    assert!(err.is_already_drawn());
    assert_eq!(org.store().pending_count(), pending);
    assert_eq!(world.remote.log_len(), log_len);
    assert_eq!(org.store().draw(event.id).unwrap(), Some(first));
}

#[test]
fn racing_sessions_draw_once() {
    let world = TestWorld::new();
    let gateway = Arc::new(MemoryGateway::new());
    let first = coordinator(&world, "org", &gateway);
    let second = coordinator(&world, "org", &gateway);
    let event = world.publish_event(first.store(), 2);
    world.seed_checked_in(&event, 4, 10.0);
    first.sync().unwrap();
    second.sync().unwrap();

    let record = first.run_draw(event.id, 1).unwrap();
    match second.run_draw(event.id, 2) {
        Err(LotteryError::AlreadyDrawn(err)) => {
            assert_eq!(err.event_id, event.id);
            assert_eq!(err.drawn_at, Some(record.drawn_at));
        }
        other => panic!("expected AlreadyDrawn, got {other:?}"),
    }

    // The losing session keeps its entrants untouched.
    assert_eq!(second.store().pending_count(), 0);
    assert_eq!(second.store().draw(event.id).unwrap(), Some(record));
}

#[test]
fn capacity_cannot_drop_below_winners() {
    let world = TestWorld::new();
    let gateway = Arc::new(MemoryGateway::new());
    let org = coordinator(&world, "org", &gateway);
    let event = world.publish_event(org.store(), 2);
    world.seed_checked_in(&event, 4, 10.0);
    org.sync().unwrap();
    org.run_draw(event.id, 3).unwrap();

    match org.update_capacity(event.id, 1) {
        Err(LotteryError::CapacityBelowSelected {
            requested,
            selected,
        }) => {
            assert_eq!(requested, 1);
            assert_eq!(selected, 2);
        }
        other => panic!("expected CapacityBelowSelected, got {other:?}"),
    }
    assert_eq!(org.update_capacity(event.id, 3).unwrap().capacity, 3);
    assert_eq!(org.stats(event.id).unwrap().open_spots, 1);
}

#[test]
fn empty_pool_is_rejected() {
    let world = TestWorld::new();
    let gateway = Arc::new(MemoryGateway::new());
    let org = coordinator(&world, "org", &gateway);
    let event = world.publish_event(org.store(), 2);

    assert!(matches!(
        org.run_draw(event.id, 1),
        Err(LotteryError::EmptyPool { .. })
    ));
    assert_eq!(org.store().draw(event.id).unwrap(), None);
}

#[test]
fn registration_respects_limit_and_window() {
    let world = TestWorld::new();
    let gateway = Arc::new(MemoryGateway::new());
    let org = coordinator(&world, "org", &gateway);
    let event = event_fixture("Pottery", 2, "org", world.now())
        .with_waitlist_limit(2)
        .published();
    org.store().upsert(event.clone()).unwrap();
    org.sync().unwrap();

    for user in ["ada", "grace"] {
        let entrant = coordinator(&world, user, &gateway);
        entrant.sync().unwrap();
        let joined = entrant.register(event.id, user, None).unwrap();
        assert!(matches!(joined, Registration::Joined(_)));
        assert!(matches!(
            entrant.register(event.id, user, None).unwrap(),
            Registration::AlreadyRegistered(_)
        ));
        entrant.sync().unwrap();
    }

    let third = coordinator(&world, "linus", &gateway);
    third.sync().unwrap();
    assert!(matches!(
        third.register(event.id, "Linus", None),
        Err(LotteryError::WaitlistFull { limit: 2, .. })
    ));

    let open = world.publish_event(org.store(), 5);
    world.advance(Duration::from_secs(8 * 24 * 3600));
    let late = coordinator(&world, "late", &gateway);
    late.sync().unwrap();
    assert!(matches!(
        late.register(open.id, "Late", None),
        Err(LotteryError::RegistrationClosed { .. })
    ));
}

#[test]
fn check_in_by_scanning() {
    let world = TestWorld::new();
    let gateway = Arc::new(MemoryGateway::new());
    let org = coordinator(&world, "org", &gateway);
    let event = world.publish_event(org.store(), 2);

    let walker = coordinator(&world, "walker", &gateway);
    walker.sync().unwrap();
    let entrant = walker
        .register(event.id, "Walker", Some("walker@example.com"))
        .unwrap()
        .entrant()
        .clone();
    let code = QrPayload::new(event.id, entrant.id).to_string();

    let sample = sample_at(20.0, world.now());
    let first = walker.check_in_scan(&code, Some(sample)).unwrap();
    assert!(matches!(first, CheckInOutcome::CheckedIn(_)));
    assert_eq!(first.entrant().status, EntrantStatus::CheckedIn);
    assert!(walker.filter().eligible(&event, first.entrant(), world.now()));

    let again = walker.check_in_scan(&code, Some(sample)).unwrap();
    assert!(matches!(again, CheckInOutcome::AlreadyCheckedIn(_)));

    let other = QrPayload::new(EventId::new(), entrant.id).to_string();
    assert!(matches!(
        walker.check_in_scan(&other, None),
        Err(LotteryError::EventMismatch { .. })
    ));
    assert!(matches!(
        walker.check_in_scan("not a check-in code", None),
        Err(LotteryError::Model(_))
    ));

    walker.sync().unwrap();
    org.sync().unwrap();
    assert_eq!(org.eligible_pool(event.id).unwrap(), vec![entrant.id]);
}

#[tokio::test]
async fn winner_accepts_and_lands_on_final_list() {
    let world = TestWorld::new();
    let gateway = Arc::new(MemoryGateway::new());
    let org = coordinator(&world, "org", &gateway);
    let event = world.publish_event(org.store(), 1);
    world.seed_checked_in(&event, 3, 10.0);
    org.sync().unwrap();

    let record = org.run_draw(event.id, 11).unwrap();
    let result = org.notify(&record).await;
    assert!(result.is_complete());
    org.sync().unwrap();

    let winner_id = record.selected[0];
    let winner = org.entrant(winner_id).unwrap();
    let session = coordinator(&world, winner.user_id.as_str(), &gateway);
    session.sync().unwrap();

    let answered = session
        .respond(winner_id, InvitationResponse::Accepted)
        .await
        .unwrap();
    assert_eq!(answered.response, Some(InvitationResponse::Accepted));
    assert!(matches!(
        session.respond(winner_id, InvitationResponse::Declined).await,
        Err(LotteryError::InvalidResponse { .. })
    ));

    let to_org = gateway.sent_to(&PushTarget::user_topic(&UserId::new("org")));
    assert_eq!(to_org.len(), 1);
    assert_eq!(
        to_org[0].body,
        format!("{} has accepted their invitation for Community Swim.", winner.display_name)
    );

    // A loser cannot answer.
    let loser_id = *record.not_selected().first().unwrap();
    let loser = org.entrant(loser_id).unwrap();
    let loser_session = coordinator(&world, loser.user_id.as_str(), &gateway);
    loser_session.sync().unwrap();
    assert!(matches!(
        loser_session.respond(loser_id, InvitationResponse::Accepted).await,
        Err(LotteryError::InvalidResponse { .. })
    ));
    // Nor can the organizer answer on a winner's behalf.
    assert!(matches!(
        org.respond(winner_id, InvitationResponse::Declined).await,
        Err(LotteryError::InvalidResponse { .. })
    ));

    session.sync().unwrap();
    org.sync().unwrap();
    let stats = org.stats(event.id).unwrap();
    assert_eq!(stats.winners, 1);
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.awaiting_response, 0);
    assert_eq!(stats.notified, 3);

    let csv = org.final_list_csv(event.id).unwrap();
    let mut lines = csv.lines();
    assert_eq!(lines.next(), Some(FINAL_LIST_HEADER));
    assert_eq!(
        lines.next(),
        Some(format!("{},{}@example.com", winner.display_name, winner.display_name).as_str())
    );
    assert_eq!(lines.next(), None);

    let dir = tempfile::tempdir().unwrap();
    let path = org.export_final_list(event.id, dir.path()).unwrap();
    assert_eq!(path.file_name().unwrap(), "Community_Swim_final_list.csv");
    assert_eq!(std::fs::read_to_string(path).unwrap(), csv);
}

#[test]
fn draw_outcomes_reach_other_sessions() {
    let world = TestWorld::new();
    let gateway = Arc::new(MemoryGateway::new());
    let org = coordinator(&world, "org", &gateway);
    let event = world.publish_event(org.store(), 2);
    let seeded = world.seed_checked_in(&event, 2, 10.0);
    org.sync().unwrap();
    org.run_draw(event.id, 5).unwrap();
    org.sync().unwrap();

    let viewer = coordinator(&world, seeded[0].user_id.as_str(), &gateway);
    viewer.sync().unwrap();
    let seen = viewer.entrant(seeded[0].id).unwrap();
    assert_eq!(seen.outcome, Some(DrawOutcome::Selected));
    assert!(viewer.store().draw(event.id).unwrap().is_some());
}

#[test]
fn logout_closes_the_store() {
    let world = TestWorld::new();
    let gateway = Arc::new(MemoryGateway::new());
    let org = coordinator(&world, "org", &gateway);
    let event = world.publish_event(org.store(), 2);

    org.logout();
    assert!(org.store().is_closed());
    assert!(matches!(org.event(event.id), Err(LotteryError::Sync(_))));
}

#[test]
fn parallel_draws_on_one_engine_run_once() {
    let world = TestWorld::new();
    let gateway = Arc::new(MemoryGateway::new());
    let org = coordinator(&world, "org", &gateway);
    let event = world.publish_event(org.store(), 2);
    world.seed_checked_in(&event, 6, 10.0);
    org.sync().unwrap();
    let pool = org.eligible_pool(event.id).unwrap();
    let log_len = world.remote.log_len();

    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8u64)
            .map(|seed| {
                let (org, event, pool) = (&org, &event, &pool);
                scope.spawn(move || org.engine().draw(event, pool, seed))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let drawn: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(drawn.len(), 1);
    for result in &results {
        if let Err(err) = result {
            assert!(err.is_already_drawn(), "unexpected error: {err}");
        }
    }
    assert_eq!(world.remote.log_len(), log_len + 1);
    assert_eq!(org.store().draw(event.id).unwrap().as_ref(), Some(drawn[0]));
    assert!(org.verify(event.id).unwrap().is_valid());
}

#[test]
fn parallel_sessions_draw_once() {
    let world = TestWorld::new();
    let gateway = Arc::new(MemoryGateway::new());
    let sessions: Vec<_> = (0..4)
        .map(|_| coordinator(&world, "org", &gateway))
        .collect();
    let event = world.publish_event(sessions[0].store(), 2);
    world.seed_checked_in(&event, 5, 10.0);
    for session in &sessions {
        session.sync().unwrap();
    }
    let log_len = world.remote.log_len();

    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = sessions
            .iter()
            .enumerate()
            .map(|(i, session)| scope.spawn(move || session.run_draw(event.id, i as u64)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(LotteryError::is_already_drawn));
    assert_eq!(world.remote.log_len(), log_len + 1);
}

#[test]
fn verify_without_draw_names_the_missing_record() {
    let world = TestWorld::new();
    let gateway = Arc::new(MemoryGateway::new());
    let org = coordinator(&world, "org", &gateway);
    let event = world.publish_event(org.store(), 2);

    assert!(matches!(
        org.verify(event.id),
        Err(LotteryError::NoDrawRecord(id)) if id == event.id
    ));
    let unknown = EventId::new();
    assert!(matches!(
        org.verify(unknown),
        Err(LotteryError::EventNotFound(id)) if id == unknown
    ));
}

#[test]
fn entrant_leaves_before_check_in() {
    let world = TestWorld::new();
    let gateway = Arc::new(MemoryGateway::new());
    let org = coordinator(&world, "org", &gateway);
    let event = world.publish_event(org.store(), 2);

    let ada = coordinator(&world, "ada", &gateway);
    ada.sync().unwrap();
    let joined = ada.register(event.id, "Ada", None).unwrap().entrant().clone();
    ada.sync().unwrap();
    org.sync().unwrap();
    assert_eq!(org.store().entrants_of(event.id).unwrap().len(), 1);

    let left = ada.leave(event.id).unwrap();
    assert_eq!(left.id, joined.id);
    assert_eq!(ada.store().entrant(joined.id).unwrap(), None);
    assert!(matches!(
        ada.leave(event.id),
        Err(LotteryError::NotRegistered(id)) if id == event.id
    ));
    ada.sync().unwrap();
    org.sync().unwrap();
    assert!(org.store().entrants_of(event.id).unwrap().is_empty());

    // Joining again creates a fresh entrant; once checked in it stays.
    let again = ada.register(event.id, "Ada", None).unwrap();
    assert!(matches!(again, Registration::Joined(_)));
    let code = QrPayload::new(event.id, again.entrant().id).to_string();
    ada.check_in_scan(&code, Some(sample_at(10.0, world.now()))).unwrap();
    assert!(matches!(
        ada.leave(event.id),
        Err(LotteryError::CannotLeave {
            status: EntrantStatus::CheckedIn,
            ..
        })
    ));
}
