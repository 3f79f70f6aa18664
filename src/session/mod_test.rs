use std::time::Duration;

use serde_json::json;

use super::test_helpers::{ack, joined, ms, notices, options, push, session_with, updates};
use super::*;
use crate::model::test_helpers::{referencing_event, room, tab};
use crate::model::{CHAT_MESSAGE_ELEMENT, Coords, MessageType, Reference, TabType};
use crate::reference::{ClearOptions, ReferenceMode};
use crate::transport::{
    CREATED_TAB, DISCONNECT, NEW_TAB, RECEIVED_UPDATED_REFERENCES, RELEASE_CONTROL, RELEASED_CONTROL, SEND_MESSAGE,
    SWITCH_TAB, TAKE_CONTROL, TOOK_CONTROL, USER_JOINED, USER_LEFT, local_frame,
};

fn text_of(frame: &Frame) -> String {
    frame.data.get("text").and_then(Value::as_str).unwrap_or_default().to_owned()
}

fn last_log_text(session: &Session) -> String {
    session.log().last().map(|e| e.text.clone()).unwrap_or_default()
}

fn control_event(holder: &str, text: &str, message_type: MessageType) -> Value {
    serde_json::to_value(Event::system(holder, text, message_type).in_room("room-1", "#00ff00")).unwrap()
}

// =============================================================================
// ROLE AND COLOR
// =============================================================================

#[test]
fn role_and_color_come_from_roster() {
    let room = room();
    assert_eq!(resolve_role(&room, "ada", false), Role::Participant);
    assert_eq!(resolve_role(&room, "bo", false), Role::Facilitator);
    assert_eq!(resolve_role(&room, "root", true), Role::Admin);
    assert_eq!(resolve_role(&room, "stranger", false), Role::Participant);

    assert_eq!(resolve_color(&room, "ada", false), "#00ff00");
    assert_eq!(resolve_color(&room, "root", true), ADMIN_COLOR);
    assert_eq!(resolve_color(&room, "stranger", false), DEFAULT_COLOR);
}

#[test]
fn room_without_tabs_is_rejected() {
    let mut empty = room();
    empty.tabs.clear();
    let transport = Arc::new(crate::transport::test_helpers::RecordingTransport::default());
    let result = Session::new(empty, options("ada"), transport, SessionConfig::default());
    assert!(matches!(result, Err(SessionError::NoTabs(_))));
}

// =============================================================================
// LIFECYCLE
// =============================================================================

#[test]
fn start_joins_and_arms_heartbeat() {
    let now = Instant::now();
    let (mut session, transport) = session_with(room(), options("ada"));
    session.start_at(now);

    let join = transport.sent_named(JOIN);
    assert_eq!(join.len(), 1);
    assert_eq!(join[0].data.get("userId"), Some(&json!("ada")));
    assert_eq!(join[0].data.get("roomName"), Some(&json!("Geometry")));
    assert_eq!(join[0].data.get("color"), Some(&json!("#00ff00")));
    assert!(session.is_timer_armed(TimerId::HeartbeatTick));
    assert!(session.is_timer_armed(TimerId::HeartbeatWatchdog));
}

#[test]
fn start_seeds_reference_index_and_last_message() {
    let mut seeded = room();
    seeded.log = vec![referencing_event("p-1"), Event::chat(MemberRef::new("bo", "bo"), "hi")];
    let mut opts = options("ada");
    opts.temp = true;
    opts.last_message = Some(Event::chat(MemberRef::new("bo", "bo"), "welcome"));
    let (mut session, transport) = session_with(seeded, opts);

    assert!(session.events_with_references().is_empty());
    session.start_at(Instant::now());

    assert_eq!(session.events_with_references().len(), 1);
    assert_eq!(last_log_text(&session), "welcome");
    // Temp rooms skip the join handshake.
    assert!(transport.sent_named(JOIN).is_empty());
}

#[test]
fn join_ack_replaces_members_and_logs_message() {
    let now = Instant::now();
    let (mut session, transport) = session_with(room(), options("ada"));
    session.start_at(now);
    let join = transport.sent_named(JOIN).pop().unwrap();

    let joined_message = Event::system("ada", "ada joined Geometry", MessageType::JoinedRoom);
    let data = to_data(&json!({
        "room": { "currentMembers": [{ "_id": "ada", "username": "ada" }, { "_id": "bo", "username": "bo" }] },
        "message": joined_message,
    }));
    session.handle_frame_at(join.done_with(data), now);

    assert_eq!(session.current_members().len(), 2);
    assert_eq!(last_log_text(&session), "ada joined Geometry");
}

#[test]
fn join_failure_navigates_away() {
    let now = Instant::now();
    let (mut session, transport) = session_with(room(), options("ada"));
    session.start_at(now);
    let join = transport.sent_named(JOIN).pop().unwrap();
    session.drain_effects();

    session.handle_frame_at(join.error("room is archived"), now);

    let effects = session.drain_effects();
    assert!(updates(&effects).contains(&SessionUpdate::NavigateAway));
    assert!(session.is_closed());
    assert_eq!(session.armed_timers(), 0);
}

#[test]
fn join_send_failure_navigates_away() {
    let (mut session, transport) = session_with(room(), options("ada"));
    transport.set_fail_sends(true);
    session.start_at(Instant::now());

    assert!(updates(&session.drain_effects()).contains(&SessionUpdate::NavigateAway));
    assert!(session.is_closed());
}

#[test]
fn failed_join_leaves_nothing_armed() {
    let now = Instant::now();
    let mut opts = options("ada");
    opts.snapshots = true;
    let (mut session, transport) = session_with(room(), opts);
    transport.set_fail_sends(true);
    session.start_at(now);
    session.drain_effects();

    assert!(session.is_closed());
    assert_eq!(session.armed_timers(), 0);
    assert_eq!(session.next_deadline(), None);

    // Even with the socket back, a closed session stays silent.
    transport.set_fail_sends(false);
    session.fire_due_timers_at(now + Duration::from_secs(200));
    assert!(transport.sent_named(PING).is_empty());
    assert!(session.drain_effects().is_empty());
    assert_eq!(session.armed_timers(), 0);
}

#[test]
fn teardown_leaves_and_cancels_every_timer() {
    let now = Instant::now();
    let (mut session, transport) = joined("ada", now);
    session.toggle_control_at(false, now);
    session.window_resized_at(now);
    transport.take();

    session.teardown();

    let leave = transport.sent_named(LEAVE_ROOM);
    assert_eq!(leave.len(), 1);
    assert_eq!(leave[0].data.get("roomId"), Some(&json!("room-1")));
    assert_eq!(leave[0].data.get("color"), Some(&json!("#00ff00")));
    assert_eq!(session.armed_timers(), 0);
    assert!(session.current_members().iter().all(|m| m.id != "ada"));

    // A torn-down session ignores late frames and timers.
    session.fire_due_timers_at(now + Duration::from_secs(600));
    session.handle_frame_at(push(USER_JOINED, &json!({ "currentMembers": [] })), now);
    assert!(transport.sent_named(PING).is_empty());
}

#[test]
fn admin_mode_skips_join_and_leave() {
    let mut opts = options("root");
    opts.is_admin = true;
    opts.in_admin_mode = true;
    let (mut session, transport) = session_with(room(), opts);

    session.start_at(Instant::now());
    session.teardown();

    assert!(transport.sent_named(JOIN).is_empty());
    assert!(transport.sent_named(LEAVE_ROOM).is_empty());
    assert_eq!(session.role(), Role::Admin);
    assert_eq!(session.color(), ADMIN_COLOR);
}

#[test]
fn flipping_admin_mode_navigates_away() {
    let (mut session, _transport) = joined("ada", Instant::now());
    session.set_admin_mode(false);
    assert!(session.drain_effects().is_empty());

    session.toggle_control_at(false, Instant::now());
    session.set_admin_mode(true);
    assert!(updates(&session.drain_effects()).contains(&SessionUpdate::NavigateAway));
    assert!(session.is_closed());
    assert_eq!(session.armed_timers(), 0);
}

// =============================================================================
// ROOM RESET
// =============================================================================

#[test]
fn reset_room_replaces_replica_and_reindexes() {
    let now = Instant::now();
    let (mut session, _transport) = joined("ada", now);
    session.add_tab_activity("T2");

    let mut fresh = room();
    fresh.tabs = vec![tab("T1", "Tab 1"), tab("T3", "Tab 3")];
    fresh.log = vec![referencing_event("p-1"), referencing_event("p-2"), Event::chat(MemberRef::new("bo", "bo"), "hi")];
    fresh.current_members = vec![MemberRef::new("bo", "bo")];
    fresh.controlled_by = Some("bo".into());
    session.reset_room_at(fresh, now);

    assert_eq!(session.tabs().iter().map(|t| t.id.as_str()).collect::<Vec<_>>(), vec!["T1", "T3"]);
    assert_eq!(session.log().len(), 3);
    assert_eq!(session.events_with_references().len(), 2);
    assert_eq!(session.current_members(), &[MemberRef::new("bo", "bo")]);
    assert_eq!(session.controlled_by(), Some("bo"));
    assert!(session.activity_on_other_tabs().is_empty());

    let emitted = updates(&session.drain_effects());
    assert!(emitted.contains(&SessionUpdate::ControlChanged(Some("bo".into()))));
    assert!(emitted.contains(&SessionUpdate::MembersChanged(vec![MemberRef::new("bo", "bo")])));
}

#[test]
fn reset_room_drops_idle_timer_when_control_moved() {
    let now = Instant::now();
    let (mut session, _transport) = joined("ada", now);
    session.toggle_control_at(false, now);
    assert!(session.is_timer_armed(TimerId::ControlIdle));

    let mut fresh = room();
    fresh.controlled_by = Some("bo".into());
    session.reset_room_at(fresh, now + ms(10));

    assert!(!session.is_timer_armed(TimerId::ControlIdle));
    // The stale timer never releases bo's control.
    session.fire_due_timers_at(now + Duration::from_secs(61));
    assert_eq!(session.controlled_by(), Some("bo"));
}

#[test]
fn reset_room_arms_idle_timer_for_local_holder() {
    let now = Instant::now();
    let (mut session, transport) = joined("ada", now);
    assert!(!session.is_timer_armed(TimerId::ControlIdle));

    let mut fresh = room();
    fresh.controlled_by = Some("ada".into());
    session.reset_room_at(fresh, now);
    assert!(session.is_timer_armed(TimerId::ControlIdle));

    session.fire_due_timers_at(now + Duration::from_secs(60));
    assert_eq!(session.controlled_by(), None);
    assert_eq!(transport.sent_named(RELEASE_CONTROL).len(), 1);
}

#[test]
fn reset_room_falls_back_to_first_tab_when_current_is_gone() {
    let now = Instant::now();
    let (mut session, _transport) = joined("ada", now);
    session.change_tab_at("T2", now);
    assert_eq!(session.current_tab_id(), "T2");

    let mut fresh = room();
    fresh.tabs = vec![tab("T1", "Tab 1")];
    session.reset_room_at(fresh, now);
    assert_eq!(session.current_tab_id(), "T1");
    assert_eq!(session.current_screen(), 0);
}

#[test]
fn reset_room_ignores_other_rooms_and_empty_tab_lists() {
    let now = Instant::now();
    let (mut session, _transport) = joined("ada", now);

    let mut other = room();
    other.id = "room-2".into();
    other.controlled_by = Some("bo".into());
    session.reset_room_at(other, now);

    let mut empty = room();
    empty.tabs.clear();
    empty.controlled_by = Some("bo".into());
    session.reset_room_at(empty, now);

    assert_eq!(session.controlled_by(), None);
    assert_eq!(session.tabs().len(), 2);
    assert!(session.drain_effects().is_empty());
}

// =============================================================================
// CONTROL
// =============================================================================

#[test]
fn toggle_takes_then_releases_control() {
    let now = Instant::now();
    let (mut session, transport) = joined("ada", now);

    session.toggle_control_at(false, now);
    assert_eq!(session.controlled_by(), Some("ada"));
    assert!(session.is_timer_armed(TimerId::ControlIdle));
    let take = transport.sent_named(TAKE_CONTROL);
    assert_eq!(take.len(), 1);
    assert_eq!(text_of(&take[0]), "ada took control");
    assert_eq!(session.log().last().map(|e| e.message_type.clone()), Some(MessageType::TookControl));

    session.toggle_control_at(false, now + ms(10));
    assert_eq!(session.controlled_by(), None);
    assert!(!session.is_timer_armed(TimerId::ControlIdle));
    let release = transport.sent_named(RELEASE_CONTROL);
    assert_eq!(release.len(), 1);
    assert_eq!(text_of(&release[0]), "ada released control");
    assert_eq!(last_log_text(&session), "ada released control");
}

#[test]
fn taking_control_stops_reference_picking() {
    let now = Instant::now();
    let (mut session, _transport) = joined("ada", now);
    session.start_new_reference();

    session.toggle_control_at(false, now);

    assert_eq!(session.reference_state().mode(), ReferenceMode::Idle);
}

#[test]
fn request_while_other_holds_is_advisory() {
    let now = Instant::now();
    let (mut session, transport) = joined("bo", now);
    session.handle_frame_at(
        push(TOOK_CONTROL, &control_event("ada", "ada took control", MessageType::TookControl)),
        now,
    );
    assert_eq!(session.controlled_by(), Some("ada"));
    let log_len = session.log().len();

    session.toggle_control_at(false, now);

    assert_eq!(session.controlled_by(), Some("ada"));
    assert!(transport.sent_named(TAKE_CONTROL).is_empty());
    let ask = transport.sent_named(SEND_MESSAGE);
    assert_eq!(ask.len(), 1);
    assert_eq!(text_of(&ask[0]), "Can I take control?");
    assert_eq!(session.log().len(), log_len);

    ack(&mut session, &ask[0], now);
    assert_eq!(last_log_text(&session), "Can I take control?");
    assert_eq!(session.log().last().map(|e| e.user.username.clone()), Some("bo".to_owned()));
}

#[test]
fn admin_observer_cannot_take_control() {
    let now = Instant::now();
    let mut opts = options("root");
    opts.is_admin = true;
    opts.in_admin_mode = true;
    let (mut session, transport) = session_with(room(), opts);
    session.start_at(now);
    session.drain_effects();

    session.toggle_control_at(false, now);

    assert_eq!(session.controlled_by(), None);
    assert!(transport.sent_named(TAKE_CONTROL).is_empty());
    assert_eq!(notices(&session.drain_effects()), vec![Notice::AdminCannotTakeControl]);
}

#[test]
fn disconnect_auto_releases_held_control() {
    let now = Instant::now();
    let (mut session, transport) = joined("ada", now);
    session.toggle_control_at(false, now);

    session.handle_frame_at(local_frame(DISCONNECT), now + ms(100));

    assert_eq!(session.controlled_by(), None);
    let release = transport.sent_named(RELEASE_CONTROL);
    assert_eq!(release.len(), 1);
    assert_eq!(text_of(&release[0]), "ada control was released by system");
}

#[test]
fn disconnect_without_control_changes_nothing() {
    let now = Instant::now();
    let (mut session, transport) = joined("ada", now);
    session.handle_frame_at(local_frame(DISCONNECT), now);
    assert!(transport.sent_named(RELEASE_CONTROL).is_empty());
    assert!(transport.sent_named(TAKE_CONTROL).is_empty());
}

#[test]
fn idle_timer_releases_with_system_text() {
    let now = Instant::now();
    let (mut session, _transport) = joined("ada", now);
    session.toggle_control_at(false, now);

    session.fire_due_timers_at(now + Duration::from_secs(59));
    assert_eq!(session.controlled_by(), Some("ada"));

    session.fire_due_timers_at(now + Duration::from_secs(60));
    assert_eq!(session.controlled_by(), None);
    let release = session.log().last().unwrap();
    assert_eq!(release.text, "ada control was released by system");
    assert_ne!(release.text, "ada released control");
    assert!(release.autogenerated);
}

#[test]
fn reset_idle_timer_postpones_release() {
    let now = Instant::now();
    let (mut session, _transport) = joined("ada", now);
    session.toggle_control_at(false, now);

    session.reset_idle_timer_at(now + Duration::from_secs(30));
    session.fire_due_timers_at(now + Duration::from_secs(61));
    assert_eq!(session.controlled_by(), Some("ada"));

    session.fire_due_timers_at(now + Duration::from_secs(90));
    assert_eq!(session.controlled_by(), None);
}

#[test]
fn reset_idle_timer_without_control_arms_nothing() {
    let now = Instant::now();
    let (mut session, _transport) = joined("ada", now);
    session.reset_idle_timer_at(now);
    assert!(!session.is_timer_armed(TimerId::ControlIdle));
}

#[test]
fn send_failure_keeps_optimistic_control() {
    let now = Instant::now();
    let (mut session, transport) = joined("ada", now);
    transport.set_fail_sends(true);

    session.toggle_control_at(false, now);

    assert_eq!(session.controlled_by(), Some("ada"));
    assert_eq!(last_log_text(&session), "ada took control");
    assert!(!session.is_closed());
}

#[test]
fn authoritative_pushes_overwrite_local_guess() {
    let now = Instant::now();
    let (mut session, _transport) = joined("ada", now);
    session.toggle_control_at(false, now);

    session.handle_frame_at(
        push(TOOK_CONTROL, &control_event("bo", "bo took control", MessageType::TookControl)),
        now,
    );
    assert_eq!(session.controlled_by(), Some("bo"));
    assert!(!session.is_timer_armed(TimerId::ControlIdle));

    session.handle_frame_at(
        push(RELEASED_CONTROL, &control_event("bo", "bo released control", MessageType::ReleasedControl)),
        now,
    );
    assert_eq!(session.controlled_by(), None);
    assert_eq!(last_log_text(&session), "bo released control");
}

#[test]
fn user_left_with_released_control_frees_room() {
    let now = Instant::now();
    let (mut session, _transport) = joined("bo", now);
    session.handle_frame_at(
        push(TOOK_CONTROL, &control_event("ada", "ada took control", MessageType::TookControl)),
        now,
    );

    let left = Event::system("ada", "ada left the room", MessageType::LeftRoom);
    session.handle_frame_at(
        push(USER_LEFT, &json!({ "currentMembers": [{ "_id": "bo", "username": "bo" }], "message": left, "releasedControl": true })),
        now,
    );

    assert_eq!(session.controlled_by(), None);
    assert_eq!(session.current_members().len(), 1);
    assert_eq!(last_log_text(&session), "ada left the room");
}

#[test]
fn two_sessions_converge_through_relayed_frames() {
    let now = Instant::now();
    let (mut ada, ada_wire) = joined("ada", now);
    let (mut bo, _bo_wire) = joined("bo", now);

    ada.toggle_control_at(false, now);
    let take = ada_wire.sent_named(TAKE_CONTROL).pop().unwrap();
    // The server relays the broadcast to everyone else as TOOK_CONTROL.
    bo.handle_frame_at(Frame::request(TOOK_CONTROL, take.data.clone()), now);

    assert_eq!(bo.controlled_by(), ada.controlled_by());
    assert_eq!(bo.log().last().map(|e| e.id.clone()), ada.log().last().map(|e| e.id.clone()));
}

#[test]
fn malformed_push_is_ignored() {
    let now = Instant::now();
    let (mut session, _transport) = joined("ada", now);
    let before = session.log().len();

    session.handle_frame_at(push(TOOK_CONTROL, &json!({ "bogus": 1 })), now);
    session.handle_frame_at(push(USER_JOINED, &json!({ "currentMembers": "nope" })), now);

    assert_eq!(session.controlled_by(), None);
    assert_eq!(session.log().len(), before);
}

// =============================================================================
// HEARTBEAT
// =============================================================================

#[test]
fn heartbeat_classifies_round_trips() {
    let now = Instant::now();
    let (mut session, transport) = joined("ada", now);

    let t1 = now + Duration::from_secs(5);
    session.fire_due_timers_at(t1);
    let ping = transport.sent_named(PING).pop().expect("ping sent");
    ack(&mut session, &ping, t1 + ms(50));
    assert_eq!(session.connection_status(), ConnectionStatus::Good);
    assert!(updates(&session.drain_effects()).contains(&SessionUpdate::StatusChanged(ConnectionStatus::Good)));

    let t2 = now + Duration::from_secs(10);
    transport.take();
    session.fire_due_timers_at(t2);
    let ping = transport.sent_named(PING).pop().expect("ping sent");
    ack(&mut session, &ping, t2 + ms(150));
    assert_eq!(session.connection_status(), ConnectionStatus::Bad);
}

#[test]
fn heartbeat_reports_error_when_disconnected() {
    let now = Instant::now();
    let (mut session, transport) = joined("ada", now);
    transport.set_connected(false);

    session.fire_due_timers_at(now + Duration::from_secs(5));

    assert_eq!(session.connection_status(), ConnectionStatus::Error);
    assert!(transport.sent_named(PING).is_empty());
    // Ticking continues.
    assert!(session.is_timer_armed(TimerId::HeartbeatTick));
}

#[test]
fn heartbeat_tick_releases_control_when_disconnected() {
    let now = Instant::now();
    let (mut session, transport) = joined("ada", now);
    session.toggle_control_at(false, now);
    transport.set_connected(false);

    session.fire_due_timers_at(now + Duration::from_secs(5));

    assert_eq!(session.controlled_by(), None);
    assert_eq!(last_log_text(&session), "ada control was released by system");
}

#[test]
fn watchdog_fires_without_pongs() {
    let now = Instant::now();
    let (mut session, _transport) = joined("ada", now);

    session.fire_due_timers_at(now + ms(150_000));
    assert_ne!(session.connection_status(), ConnectionStatus::Error);

    session.fire_due_timers_at(now + ms(150_001));
    assert_eq!(session.connection_status(), ConnectionStatus::Error);
}

#[test]
fn pong_resets_watchdog() {
    let now = Instant::now();
    let (mut session, transport) = joined("ada", now);

    let t = now + Duration::from_secs(100);
    session.fire_due_timers_at(t);
    let ping = transport.sent_named(PING).pop().expect("ping sent");
    ack(&mut session, &ping, t);

    session.fire_due_timers_at(now + ms(150_001));
    assert_eq!(session.connection_status(), ConnectionStatus::Good);
}

#[test]
fn failed_ping_ack_is_ignored() {
    let now = Instant::now();
    let (mut session, transport) = joined("ada", now);
    session.fire_due_timers_at(now + Duration::from_secs(5));
    let ping = transport.sent_named(PING).pop().expect("ping sent");

    session.handle_frame_at(ping.error("busy"), now + Duration::from_secs(5));

    assert_eq!(session.connection_status(), ConnectionStatus::None);
}

// =============================================================================
// REFERENCES
// =============================================================================

fn point_on(tab_id: &str) -> Reference {
    Reference { tab: Some(tab_id.into()), ..Reference::new("point", "p-1") }
}

#[test]
fn reference_on_other_tab_is_rejected() {
    let now = Instant::now();
    let (mut session, _transport) = joined("ada", now);
    session.change_tab_at("T2", now);
    session.start_new_reference();
    session.drain_effects();
    let before = session.reference_state().clone();

    let shown = session.show_reference(point_on("T1"), None, None, None, "T1");

    assert!(!shown);
    assert_eq!(session.reference_state(), &before);
    assert_eq!(notices(&session.drain_effects()), vec![Notice::ReferenceWrongTab]);
}

#[test]
fn chat_reference_crosses_tabs() {
    let now = Instant::now();
    let (mut session, _transport) = joined("ada", now);
    session.change_tab_at("T2", now);

    let chat = Reference { tab: Some("T1".into()), ..Reference::new(CHAT_MESSAGE_ELEMENT, "msg-1") };
    let coords = Some(Coords { left: 1.0, top: 2.0 });

    assert!(session.show_reference(chat, coords, None, None, "T1"));
    assert_eq!(session.reference_state().mode(), ReferenceMode::ShowingReference);
}

#[test]
fn deleted_reference_is_rejected() {
    let now = Instant::now();
    let (mut session, _transport) = joined("ada", now);
    let mut target = point_on("T1");
    target.was_object_deleted = true;

    assert!(!session.show_reference(target, None, None, None, "T1"));
    assert!(!session.reference_state().is_showing_reference());
    assert_eq!(
        notices(&session.drain_effects()),
        vec![Notice::ReferenceDeleted { label: "point p-1".into() }]
    );
}

#[test]
fn modified_reference_is_shown_with_caution() {
    let now = Instant::now();
    let (mut session, _transport) = joined("ada", now);
    let mut target = point_on("T1");
    target.was_object_updated = true;

    assert!(session.show_reference(target, None, None, None, "T1"));
    let notice = notices(&session.drain_effects()).pop().unwrap();
    assert_eq!(
        notice.to_string(),
        "Caution! The referenced object (point p-1) has been modified since the time of reference."
    );
}

#[test]
fn resize_suspends_and_restores_picking() {
    let now = Instant::now();
    let (mut session, _transport) = joined("ada", now);
    session.start_new_reference();

    session.window_resized_at(now);
    assert_eq!(session.reference_state().mode(), ReferenceMode::Idle);

    session.window_resized_at(now + ms(400));
    session.fire_due_timers_at(now + ms(800));
    assert_eq!(session.reference_state().mode(), ReferenceMode::Idle);

    session.fire_due_timers_at(now + ms(900));
    assert_eq!(session.reference_state().mode(), ReferenceMode::Referencing);
}

#[test]
fn cancel_key_keeps_picking_mode() {
    let now = Instant::now();
    let (mut session, _transport) = joined("ada", now);
    session.start_new_reference();
    session.set_to_el_and_coords(Some(point_on("T1")), Some(Coords::default()));

    session.cancel_key();

    assert_eq!(session.reference_state().mode(), ReferenceMode::Referencing);
    assert!(session.reference_state().to_el().is_none());

    session.clear_reference(ClearOptions::default());
    assert_eq!(session.reference_state().mode(), ReferenceMode::Idle);
}

#[test]
fn updated_references_replace_index() {
    let now = Instant::now();
    let (mut session, _transport) = joined("ada", now);
    session.add_to_log(referencing_event("p-1"));
    assert_eq!(session.events_with_references().len(), 1);

    let authoritative = vec![referencing_event("p-7"), referencing_event("p-8")];
    session.handle_frame_at(push(RECEIVED_UPDATED_REFERENCES, &json!({ "events": authoritative })), now);

    assert_eq!(session.events_with_references().len(), 2);
    assert_eq!(session.log().len(), 1);
}

#[test]
fn flagged_target_is_marked_deleted() {
    let now = Instant::now();
    let (mut session, _transport) = joined("ada", now);
    session.add_to_log(referencing_event("p-1"));

    assert_eq!(session.flag_reference_target("p-1", crate::log::TargetChange::Deleted), 2);
    let flagged = session.log()[0].reference.clone().unwrap();
    assert!(flagged.was_object_deleted);
}

#[test]
fn chat_message_is_appended_on_ack_with_tab_reference() {
    let now = Instant::now();
    let (mut session, transport) = joined("ada", now);

    session.send_message("look", Some(Reference::new("point", "p-3")));
    let sent = transport.sent_named(SEND_MESSAGE).pop().unwrap();
    assert!(session.log().is_empty());

    ack(&mut session, &sent, now);
    let logged = session.log().last().unwrap();
    assert_eq!(logged.text, "look");
    assert_eq!(logged.reference.as_ref().and_then(|r| r.tab.clone()), Some("T1".to_owned()));
    assert_eq!(session.events_with_references().len(), 1);
}

// =============================================================================
// TABS
// =============================================================================

#[test]
fn change_tab_announces_and_clears_badge() {
    let now = Instant::now();
    let (mut session, transport) = joined("ada", now);
    session.add_tab_activity("T2");
    session.add_tab_activity("T1");
    assert_eq!(session.activity_on_other_tabs(), ["T2".to_owned()]);
    session.start_new_reference();

    session.change_tab_at("T2", now);

    assert_eq!(session.current_tab_id(), "T2");
    assert!(session.activity_on_other_tabs().is_empty());
    assert_eq!(session.reference_state().mode(), ReferenceMode::Idle);
    let switch = transport.sent_named(SWITCH_TAB).pop().unwrap();
    assert_eq!(text_of(&switch), "ada switched to Tab 2");

    session.handle_frame_at(switch.error("late"), now);
    assert_eq!(last_log_text(&session), "ada switched to Tab 2");
}

#[test]
fn change_to_unknown_tab_is_ignored() {
    let now = Instant::now();
    let (mut session, transport) = joined("ada", now);
    session.change_tab_at("nope", now);
    assert_eq!(session.current_tab_id(), "T1");
    assert!(transport.sent_named(SWITCH_TAB).is_empty());
}

#[test]
fn instructions_shown_once_and_visit_recorded() {
    let now = Instant::now();
    let mut with_instructions = room();
    with_instructions.tabs[1].instructions = Some("Read me".into());
    let (mut session, _transport) = session_with(with_instructions, options("ada"));
    session.start_at(now);
    session.drain_effects();

    session.change_tab_at("T2", now);
    let effects = session.drain_effects();
    assert_eq!(notices(&effects), vec![Notice::Instructions("Read me".into())]);
    let followup = effects
        .iter()
        .find_map(|e| match e {
            SessionEffect::Persist { collection, id, body, followup } => {
                assert_eq!(*collection, "tabs");
                assert_eq!(id, "T2");
                assert_eq!(body, &json!({ "newVisitor": "ada" }));
                Some(followup.clone())
            }
            _ => None,
        })
        .expect("visitor write");

    session.on_persist_result(followup, Ok(()));
    let t2 = session.tab("T2").unwrap();
    assert!(t2.visitors.contains(&"ada".to_owned()));
    assert!(t2.visitors_since_instructions_updated.contains(&"ada".to_owned()));

    session.change_tab_at("T1", now);
    session.change_tab_at("T2", now);
    assert!(notices(&session.drain_effects()).is_empty());
}

#[test]
fn failed_visitor_write_leaves_tab_untouched() {
    let now = Instant::now();
    let mut with_instructions = room();
    with_instructions.tabs[1].instructions = Some("Read me".into());
    let (mut session, _transport) = session_with(with_instructions, options("ada"));
    session.start_at(now);
    session.change_tab_at("T2", now);
    let followup = PersistFollowup::ApplyTabUpdate {
        tab_id: "T2".into(),
        update: TabUpdate { visitors: Some(vec!["ada".into()]), ..TabUpdate::default() },
    };

    session.on_persist_result(
        followup,
        Err(crate::persistence::PersistenceError::Status { status: 500, message: "down".into() }),
    );

    assert!(session.tab("T2").unwrap().visitors.is_empty());
}

#[test]
fn room_instructions_show_on_first_tab_load() {
    let mut with_instructions = room();
    with_instructions.instructions = Some("Welcome".into());
    let (mut session, _transport) = session_with(with_instructions, options("ada"));
    session.start_at(Instant::now());
    session.drain_effects();

    session.set_first_tab_loaded();
    session.set_first_tab_loaded();

    assert_eq!(notices(&session.drain_effects()), vec![Notice::Instructions("Welcome".into())]);
}

#[test]
fn new_tab_requires_permission() {
    let now = Instant::now();
    let (mut ada, _t) = joined("ada", now);
    assert!(!ada.begin_new_tab());
    assert!(!ada.is_creating_new_tab());

    let (mut bo, _t) = joined("bo", now);
    assert!(bo.begin_new_tab());
    assert!(bo.is_creating_new_tab());
    bo.cancel_new_tab();
    assert!(!bo.is_creating_new_tab());

    let mut open = room();
    open.settings.participants_can_create_tabs = true;
    let (mut ada, _t) = session_with(open, options("ada"));
    assert!(ada.begin_new_tab());
}

#[test]
fn emit_new_tab_sends_tab_and_logs_on_ack() {
    let now = Instant::now();
    let (mut session, transport) = joined("bo", now);
    session.begin_new_tab();

    let message = Event::system("bo", "bo created Tab 3", MessageType::NewTab);
    session.emit_new_tab(tab("T3", "Tab 3"), message);

    assert!(!session.is_creating_new_tab());
    assert_eq!(session.tabs().len(), 3);
    let sent = transport.sent_named(NEW_TAB).pop().unwrap();
    assert_eq!(sent.data.get("_id"), Some(&json!("T3")));
    assert_eq!(sent.data["message"]["color"], json!("#0000ff"));

    ack(&mut session, &sent, now);
    assert_eq!(last_log_text(&session), "bo created Tab 3");
}

#[test]
fn created_tab_push_adds_tab_once() {
    let now = Instant::now();
    let (mut session, _transport) = joined("ada", now);
    let message = Event::system("bo", "bo created Tab 3", MessageType::NewTab);
    let payload = json!({
        "_id": "T3",
        "name": "Tab 3",
        "tabType": "desmosActivity",
        "creator": "bo",
        "message": message,
    });

    session.handle_frame_at(push(CREATED_TAB, &payload), now);
    session.handle_frame_at(push(CREATED_TAB, &payload), now);

    assert_eq!(session.tabs().len(), 3);
    assert_eq!(session.tab("T3").map(|t| t.tab_type), Some(TabType::DesmosActivity));
    assert_eq!(last_log_text(&session), "bo created Tab 3");
}

#[test]
fn screen_changes_only_on_activity_tabs() {
    let now = Instant::now();
    let mut activity = room();
    activity.tabs[1].tab_type = TabType::DesmosActivity;
    let (mut session, _transport) = session_with(activity, options("ada"));
    session.start_at(now);

    session.set_screen_at(2, now);
    assert_eq!(session.current_screen(), 0);

    session.change_tab_at("T2", now);
    session.set_screen_at(2, now);
    assert_eq!(session.current_screen(), 2);
    assert_eq!(session.snapshot_key().to_string(), "T2:2");
}

#[test]
fn panels_toggle_independently() {
    let (mut session, _transport) = joined("ada", Instant::now());
    assert!(!session.toggle_panel(crate::layout::Panel::Chat));
    assert!(session.layout().members_expanded);
    assert!(!session.toggle_simple_chat());
}

// =============================================================================
// SNAPSHOTS
// =============================================================================

fn snapshot_session(room: Room) -> (Session, Arc<crate::transport::test_helpers::RecordingTransport>) {
    let mut opts = options("ada");
    opts.snapshots = true;
    session_with(room, opts)
}

fn captures(effects: &[SessionEffect]) -> Vec<(Ticket, String)> {
    effects
        .iter()
        .filter_map(|e| match e {
            SessionEffect::Capture { ticket, key } => Some((*ticket, key.to_string())),
            _ => None,
        })
        .collect()
}

fn persists(effects: &[SessionEffect]) -> Vec<(String, Value)> {
    effects
        .iter()
        .filter_map(|e| match e {
            SessionEffect::Persist { id, body, .. } => Some((id.clone(), body.clone())),
            _ => None,
        })
        .collect()
}

#[test]
fn first_view_is_captured_after_debounce() {
    let now = Instant::now();
    let (mut session, _transport) = snapshot_session(room());
    session.start_at(now);
    session.drain_effects();

    session.fire_due_timers_at(now + ms(249));
    assert!(captures(&session.drain_effects()).is_empty());

    session.fire_due_timers_at(now + ms(250));
    let started = captures(&session.drain_effects());
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].1, "T1:0");

    session.on_capture_result(started[0].0, Ok(json!("png")));
    let effects = session.drain_effects();
    let written = persists(&effects);
    assert_eq!(written, vec![("T1".to_owned(), json!({ "snapshot": { "T1:0": "png" } }))]);

    let Some(SessionEffect::Persist { followup, .. }) = effects.into_iter().find(|e| matches!(e, SessionEffect::Persist { .. })) else {
        panic!("persist effect");
    };
    session.on_persist_result(followup, Ok(()));
    assert!(session.get_snapshot(&SnapshotKey::new("T1", 0)));
}

#[test]
fn existing_snapshot_is_not_recaptured() {
    let now = Instant::now();
    let mut captured = room();
    captured.tabs[0].snapshot.insert("T1:0".into(), json!("old"));
    let (mut session, _transport) = snapshot_session(captured);
    session.start_at(now);

    session.fire_due_timers_at(now + Duration::from_secs(1));
    assert!(captures(&session.drain_effects()).is_empty());
}

#[test]
fn switching_key_cancels_in_flight_capture() {
    let now = Instant::now();
    let (mut session, _transport) = snapshot_session(room());
    session.start_at(now);
    session.fire_due_timers_at(now + ms(250));
    let (k1_ticket, k1) = captures(&session.drain_effects()).pop().expect("K1 started");
    assert_eq!(k1, "T1:0");

    session.change_tab_at("T2", now + ms(300));
    let effects = session.drain_effects();
    assert!(effects.contains(&SessionEffect::AbortCapture(k1_ticket)));

    // A late K1 result never reaches persistence.
    session.on_capture_result(k1_ticket, Ok(json!("k1")));
    assert!(persists(&session.drain_effects()).is_empty());

    session.fire_due_timers_at(now + ms(550));
    let (k2_ticket, k2) = captures(&session.drain_effects()).pop().expect("K2 started");
    assert_eq!(k2, "T2:0");
    session.on_capture_result(k2_ticket, Ok(json!("k2")));
    let written = persists(&session.drain_effects());
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].0, "T2");
}

fn persist_followups(effects: Vec<SessionEffect>) -> Vec<PersistFollowup> {
    effects
        .into_iter()
        .filter_map(|e| match e {
            SessionEffect::Persist { followup, .. } => Some(followup),
            _ => None,
        })
        .collect()
}

/// Capture screen 0, then screen 1 of an activity tab. Returns the session
/// and the followups of both writes, in capture order.
fn capture_two_screens(now: Instant) -> (Session, PersistFollowup, PersistFollowup, Value) {
    let mut activity = room();
    activity.tabs[0].tab_type = TabType::DesmosActivity;
    let (mut session, _transport) = snapshot_session(activity);
    session.start_at(now);
    session.fire_due_timers_at(now + ms(250));
    let (first, _) = captures(&session.drain_effects()).pop().expect("screen 0 started");
    session.on_capture_result(first, Ok(json!("s0")));
    let f1 = persist_followups(session.drain_effects()).pop().expect("screen 0 write");

    session.set_screen_at(1, now + ms(300));
    session.fire_due_timers_at(now + ms(550));
    let (second, key) = captures(&session.drain_effects()).pop().expect("screen 1 started");
    assert_eq!(key, "T1:1");
    session.on_capture_result(second, Ok(json!("s1")));
    let effects = session.drain_effects();
    let body = persists(&effects).pop().expect("screen 1 write").1;
    let f2 = persist_followups(effects).pop().expect("screen 1 followup");
    (session, f1, f2, body)
}

#[test]
fn later_screen_capture_keeps_earlier_screens() {
    let now = Instant::now();
    let mut activity = room();
    activity.tabs[0].tab_type = TabType::DesmosActivity;
    let (mut session, _transport) = snapshot_session(activity);
    session.start_at(now);
    session.fire_due_timers_at(now + ms(250));
    let (first, _) = captures(&session.drain_effects()).pop().expect("screen 0 started");
    session.on_capture_result(first, Ok(json!("s0")));
    let f1 = persist_followups(session.drain_effects()).pop().expect("screen 0 write");
    session.on_persist_result(f1, Ok(()));

    session.set_screen_at(1, now + ms(300));
    session.fire_due_timers_at(now + ms(550));
    let (second, _) = captures(&session.drain_effects()).pop().expect("screen 1 started");
    session.on_capture_result(second, Ok(json!("s1")));
    let effects = session.drain_effects();

    assert_eq!(persists(&effects), vec![("T1".to_owned(), json!({ "snapshot": { "T1:0": "s0", "T1:1": "s1" } }))]);
    session.on_persist_result(persist_followups(effects).pop().expect("followup"), Ok(()));
    assert!(session.get_snapshot(&SnapshotKey::new("T1", 0)));
    assert!(session.get_snapshot(&SnapshotKey::new("T1", 1)));
}

#[test]
fn snapshot_writes_landing_out_of_order_keep_both_screens() {
    let now = Instant::now();
    let (mut session, f1, f2, body) = capture_two_screens(now);
    // Screen 0's write has not landed yet, so only screen 1 is in the body.
    assert_eq!(body, json!({ "snapshot": { "T1:1": "s1" } }));

    session.on_persist_result(f2, Ok(()));
    session.on_persist_result(f1, Ok(()));

    let tab = session.tab("T1").expect("tab");
    assert_eq!(tab.snapshot.get("T1:0"), Some(&json!("s0")));
    assert_eq!(tab.snapshot.get("T1:1"), Some(&json!("s1")));
}

#[test]
fn failed_snapshot_write_leaves_map_untouched() {
    let now = Instant::now();
    let (mut session, f1, f2, _) = capture_two_screens(now);

    session.on_persist_result(f1, Ok(()));
    session.on_persist_result(f2, Err(crate::persistence::PersistenceError::Status { status: 500, message: "boom".into() }));

    assert!(session.get_snapshot(&SnapshotKey::new("T1", 0)));
    assert!(!session.get_snapshot(&SnapshotKey::new("T1", 1)));
}

#[test]
fn rapid_switch_captures_only_last_key() {
    let now = Instant::now();
    let (mut session, _transport) = snapshot_session(room());
    session.start_at(now);
    session.change_tab_at("T2", now + ms(10));

    session.fire_due_timers_at(now + Duration::from_secs(1));
    let started = captures(&session.drain_effects());
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].1, "T2:0");
}

#[test]
fn releasing_control_captures_current_view() {
    let now = Instant::now();
    let mut captured = room();
    captured.tabs[0].snapshot.insert("T1:0".into(), json!("old"));
    let (mut session, _transport) = snapshot_session(captured);
    session.start_at(now);
    session.toggle_control_at(false, now);
    session.toggle_control_at(false, now);

    session.fire_due_timers_at(now + ms(250));
    let started = captures(&session.drain_effects());
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].1, "T1:0");
}

#[test]
fn temp_rooms_never_capture() {
    let now = Instant::now();
    let mut opts = options("ada");
    opts.snapshots = true;
    opts.temp = true;
    let (mut session, _transport) = session_with(room(), opts);
    session.start_at(now);
    session.fire_due_timers_at(now + Duration::from_secs(1));
    assert!(captures(&session.drain_effects()).is_empty());
}
