#![allow(clippy::unwrap_used)]

mod common;

use std::time::Duration;

use common::{
    LOGIN_CONSUMER, SERVICE, SERVICE_ID, connect, connect_with, default_msgs, directory_refresh,
    item, item_refresh, item_update, login_refresh, opts, refreshed_ids, requests, statuses_for,
    watchlist, watchlist_with,
};
use pretty_assertions::assert_eq;
use streamwatch_api::{
    ChannelEvent, CloseMsg, DataState, DomainType, LoginMsg, LoginRequest, Msg, Priority, Service,
    ServiceState, State, StateCode, StreamId, StreamState, WireMsg,
};
use streamwatch_core::{
    ConsumerEvent, ReissuePolicy, ReturnCode, Submission, SubmitOptions, WatchlistConfig,
    WatchlistError,
};

#[test]
fn equivalent_requests_share_one_upstream() {
    let mut wl = watchlist();
    wl.channel_event(ChannelEvent::Up);
    wl.submit_login_request(LoginRequest::new(LOGIN_CONSUMER, "user"), &SubmitOptions::default())
        .unwrap();

    for id in [5, 6, 7] {
        wl.submit_item_request(item(id, "TRI"), &opts()).unwrap();
    }
    assert!(requests(&wl.transport_mut().take()).is_empty());

    wl.process_msg(login_refresh());
    wl.process_msg(directory_refresh(vec![Service::added(SERVICE_ID, SERVICE)]));

    let sent = wl.transport_mut().take();
    let reqs = requests(&sent);
    assert_eq!(reqs.len(), 1);
    assert_eq!(reqs[0].stream_id, 3);
    assert_eq!(reqs[0].key.name.as_deref(), Some("TRI"));
    assert_eq!(reqs[0].key.service_id, Some(SERVICE_ID));
    assert_eq!(reqs[0].priority, Some(Priority::new(1, 3)));
    assert_eq!(wl.upstream_count(), 1);
    wl.drain_events();

    wl.process_msg(item_refresh(3));
    assert_eq!(refreshed_ids(&wl.drain_events()), vec![5, 6, 7]);

    wl.process_msg(item_update(3));
    let events = wl.drain_events();
    let updated: Vec<_> = default_msgs(&events)
        .into_iter()
        .filter_map(|m| match m {
            Msg::Update(u) => Some(u.stream_id),
            _ => None,
        })
        .collect();
    assert_eq!(updated, vec![5, 6, 7]);
}

#[test]
fn user_spec_and_service_name_come_back_with_messages() {
    let mut wl = watchlist();
    connect(&mut wl);
    let spec: streamwatch_core::UserSpec = std::sync::Arc::new("mine");
    wl.submit_item_request(item(5, "TRI"), &opts().with_user_spec(spec))
        .unwrap();
    wl.process_msg(item_refresh(3));

    let events = wl.drain_events();
    let streamwatch_core::ConsumerEvent::Default(event) = &events[0] else {
        panic!("expected an item event, got {events:?}");
    };
    assert_eq!(event.info.service_name.as_deref(), Some(SERVICE));
    let value = event
        .info
        .user_spec
        .as_ref()
        .and_then(|s| s.downcast_ref::<&str>());
    assert_eq!(value, Some(&"mine"));
}

#[test]
fn closing_a_subscriber_reissues_the_remaining_priority() {
    let mut wl = watchlist();
    connect(&mut wl);
    for id in [5, 6, 7] {
        wl.submit_item_request(item(id, "TRI"), &opts()).unwrap();
    }
    wl.process_msg(item_refresh(3));
    wl.transport_mut().take();

    wl.close_stream(6).unwrap();
    let sent = wl.transport_mut().take();
    let reqs = requests(&sent);
    assert_eq!(reqs.len(), 1);
    assert_eq!(reqs[0].stream_id, 3);
    assert_eq!(reqs[0].priority, Some(Priority::new(1, 2)));
    assert!(reqs[0].no_refresh);

    wl.close_stream(5).unwrap();
    let sent = wl.transport_mut().take();
    assert_eq!(requests(&sent)[0].priority, Some(Priority::new(1, 1)));

    wl.close_stream(7).unwrap();
    let sent = wl.transport_mut().take();
    assert_eq!(sent.len(), 1);
    assert!(matches!(
        sent[0],
        WireMsg::Generic(Msg::Close(CloseMsg { stream_id: 3, .. }))
    ));
    assert_eq!(wl.upstream_count(), 0);
    assert!(matches!(
        wl.close_stream(7),
        Err(WatchlistError::InvalidUsage { .. })
    ));
}

#[test]
fn higher_class_dominates_aggregate() {
    let mut wl = watchlist();
    connect(&mut wl);
    wl.submit_item_request(item(5, "TRI"), &opts()).unwrap();
    wl.process_msg(item_refresh(3));
    wl.transport_mut().take();

    wl.submit_item_request(item(6, "TRI").with_priority(Priority::new(2, 1)), &opts())
        .unwrap();
    let sent = wl.transport_mut().take();
    let reqs = requests(&sent);
    assert_eq!(reqs.len(), 1);
    assert_eq!(reqs[0].priority, Some(Priority::new(2, 1)));
    // The new subscriber wants an image.
    assert!(!reqs[0].no_refresh);
}

#[test]
fn close_and_resend_policy() {
    let mut wl = watchlist_with(WatchlistConfig {
        reissue_policy: ReissuePolicy::CloseAndResend,
        ..WatchlistConfig::default()
    });
    connect(&mut wl);
    wl.submit_item_request(item(5, "TRI"), &opts()).unwrap();
    wl.submit_item_request(item(6, "TRI"), &opts()).unwrap();
    wl.process_msg(item_refresh(3));
    wl.transport_mut().take();

    wl.close_stream(6).unwrap();
    let sent = wl.transport_mut().take();
    assert_eq!(sent.len(), 2);
    assert!(matches!(
        sent[0],
        WireMsg::Generic(Msg::Close(CloseMsg { stream_id: 3, .. }))
    ));
    let reqs = requests(&sent);
    assert_eq!(reqs[0].stream_id, 3);
    assert!(!reqs[0].no_refresh);
    // Back to the default the provider assumes after a fresh request.
    assert_eq!(reqs[0].priority, None);
}

#[test]
fn streaming_flag_cannot_change_on_reissue() {
    let mut wl = watchlist();
    connect(&mut wl);
    wl.submit_item_request(item(5, "TRI"), &opts()).unwrap();
    wl.process_msg(item_refresh(3));
    wl.transport_mut().take();

    let code = wl.submit(Submission::Item(item(5, "TRI").snapshot()), &opts());
    assert_eq!(code, ReturnCode::Failure);
    assert!(wl.transport_mut().take().is_empty());

    let code = wl.submit(Submission::Item(item(5, "TRI")), &opts());
    assert_eq!(code, ReturnCode::Success);
    let sent = wl.transport_mut().take();
    let reqs = requests(&sent);
    assert_eq!(reqs.len(), 1);
    assert!(reqs[0].streaming);
    assert!(!reqs[0].no_refresh);
}

#[test]
fn incompatible_reissues_are_invalid_usage() {
    let mut wl = watchlist();
    connect(&mut wl);
    wl.submit_item_request(item(5, "TRI"), &opts()).unwrap();
    wl.transport_mut().take();

    assert!(matches!(
        wl.submit_item_request(item(5, "IBM"), &opts()),
        Err(WatchlistError::InvalidUsage { .. })
    ));
    assert!(matches!(
        wl.submit_item_request(item(5, "TRI"), &SubmitOptions::service("OTHER")),
        Err(WatchlistError::InvalidUsage { .. })
    ));
    let mut by_price = item(5, "TRI");
    by_price.domain = DomainType::MarketByPrice;
    assert!(matches!(
        wl.submit_item_request(by_price, &opts()),
        Err(WatchlistError::InvalidUsage { .. })
    ));
    assert!(wl.transport_mut().take().is_empty());
}

#[test]
fn malformed_requests_rejected() {
    let mut wl = watchlist();
    connect(&mut wl);

    let mut nameless = item(5, "TRI");
    nameless.key.name = None;
    assert!(wl.submit_item_request(nameless, &opts()).is_err());

    assert!(
        wl.submit_item_request(item(5, "TRI"), &SubmitOptions::default())
            .is_err()
    );

    let mut both = item(5, "TRI");
    both.key.service_id = Some(SERVICE_ID);
    assert!(wl.submit_item_request(both, &opts()).is_err());

    let mut login_domain = item(5, "TRI");
    login_domain.domain = DomainType::Login;
    assert!(wl.submit_item_request(login_domain, &opts()).is_err());

    // The login consumer id is taken.
    assert!(matches!(
        wl.submit_item_request(item(LOGIN_CONSUMER, "TRI"), &opts()),
        Err(WatchlistError::InvalidUsage { .. })
    ));
    assert_eq!(wl.item_stream_count(), 0);
}

#[test]
fn request_by_service_id() {
    let mut wl = watchlist();
    connect(&mut wl);
    let mut request = item(5, "TRI");
    request.key.service_id = Some(SERVICE_ID);
    wl.submit_item_request(request, &SubmitOptions::default())
        .unwrap();
    // Same key by name lands on the same upstream.
    wl.submit_item_request(item(6, "TRI"), &opts()).unwrap();
    assert_eq!(wl.upstream_count(), 1);
    assert_eq!(wl.item_upstream(5), Some(3));
    assert_eq!(wl.item_upstream(6), Some(3));
}

#[test]
fn unknown_service_gets_suspect_status_then_recovers() {
    let mut wl = watchlist();
    connect(&mut wl);
    wl.submit_item_request(item(5, "TRI"), &SubmitOptions::service("LATER"))
        .unwrap();

    let events = wl.drain_events();
    let states = statuses_for(&events, 5);
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].stream_state, StreamState::Open);
    assert_eq!(states[0].data_state, DataState::Suspect);
    assert!(requests(&wl.transport_mut().take()).is_empty());

    wl.process_msg(streamwatch_api::DirectoryMsg::Update(
        streamwatch_api::DirectoryUpdate::new(2, vec![Service::added(9, "LATER")]),
    ));
    let sent = wl.transport_mut().take();
    let reqs = requests(&sent);
    assert_eq!(reqs.len(), 1);
    assert_eq!(reqs[0].key.service_id, Some(9));
}

#[test]
fn multi_part_refresh_holds_new_attaches() {
    let mut wl = watchlist();
    connect(&mut wl);
    wl.submit_item_request(item(5, "TRI"), &opts()).unwrap();
    wl.transport_mut().take();

    let Msg::Refresh(mut first) = item_refresh(3) else {
        unreachable!()
    };
    first.complete = false;
    wl.process_msg(Msg::Refresh(first));

    wl.submit_item_request(item(6, "TRI"), &opts()).unwrap();
    assert!(wl.transport_mut().take().is_empty());

    wl.process_msg(item_refresh(3));
    let sent = wl.transport_mut().take();
    let reqs = requests(&sent);
    assert_eq!(reqs.len(), 1);
    assert_eq!(reqs[0].priority, Some(Priority::new(1, 2)));
    assert!(!reqs[0].no_refresh);

    // Only the new subscriber was waiting for an image.
    wl.drain_events();
    wl.process_msg(item_refresh(3));
    assert_eq!(refreshed_ids(&wl.drain_events()), vec![6]);
}

#[test]
fn snapshot_then_streaming_moves_to_a_new_upstream() {
    let mut wl = watchlist();
    connect(&mut wl);
    wl.submit_item_request(item(5, "TRI").snapshot(), &opts())
        .unwrap();
    let sent = wl.transport_mut().take();
    let reqs = requests(&sent);
    assert_eq!(reqs.len(), 1);
    assert!(!reqs[0].streaming);

    wl.submit_item_request(item(6, "TRI"), &opts()).unwrap();
    assert!(wl.transport_mut().take().is_empty());

    wl.process_msg(item_refresh(3));
    let events = wl.drain_events();
    let refreshes: Vec<_> = default_msgs(&events)
        .into_iter()
        .filter_map(|m| match m {
            Msg::Refresh(r) => Some((r.stream_id, r.state.stream_state)),
            _ => None,
        })
        .collect();
    assert_eq!(refreshes, vec![(5, StreamState::NonStreaming)]);

    let sent = wl.transport_mut().take();
    let reqs = requests(&sent);
    assert_eq!(reqs.len(), 1);
    assert_eq!(reqs[0].stream_id, 4);
    assert!(reqs[0].streaming);
    assert_eq!(wl.item_upstream(6), Some(4));
    assert_eq!(wl.item_stream_count(), 1);
}

#[test]
fn snapshot_on_open_stream_detaches_after_image() {
    let mut wl = watchlist();
    connect(&mut wl);
    wl.submit_item_request(item(5, "TRI"), &opts()).unwrap();
    wl.process_msg(item_refresh(3));
    wl.transport_mut().take();
    wl.drain_events();

    wl.submit_item_request(item(6, "TRI").snapshot(), &opts())
        .unwrap();
    let sent = wl.transport_mut().take();
    let reqs = requests(&sent);
    assert_eq!(reqs.len(), 1);
    // Snapshot subscribers leave the aggregate alone.
    assert_eq!(reqs[0].priority, None);

    wl.process_msg(item_refresh(3));
    assert_eq!(refreshed_ids(&wl.drain_events()), vec![6]);
    assert_eq!(wl.item_stream_count(), 1);
    assert_eq!(wl.upstream_count(), 1);
}

#[test]
fn open_window_queues_new_requests() {
    let mut wl = watchlist();
    connect_with(
        &mut wl,
        vec![Service::added(SERVICE_ID, SERVICE).with_open_window(1)],
    );
    wl.submit_item_request(item(5, "TRI"), &opts()).unwrap();
    wl.submit_item_request(item(6, "IBM"), &opts()).unwrap();

    let sent = wl.transport_mut().take();
    let reqs = requests(&sent);
    assert_eq!(reqs.len(), 1);
    assert_eq!(reqs[0].key.name.as_deref(), Some("TRI"));

    wl.process_msg(item_refresh(3));
    let sent = wl.transport_mut().take();
    let reqs = requests(&sent);
    assert_eq!(reqs.len(), 1);
    assert_eq!(reqs[0].stream_id, 4);
    assert_eq!(reqs[0].key.name.as_deref(), Some("IBM"));
}

#[test]
fn closing_a_queued_request_sends_nothing() {
    let mut wl = watchlist();
    connect_with(
        &mut wl,
        vec![Service::added(SERVICE_ID, SERVICE).with_open_window(1)],
    );
    wl.submit_item_request(item(5, "TRI"), &opts()).unwrap();
    wl.submit_item_request(item(6, "IBM"), &opts()).unwrap();
    wl.transport_mut().take();

    wl.close_stream(6).unwrap();
    assert!(wl.transport_mut().take().is_empty());

    wl.process_msg(item_refresh(3));
    assert!(requests(&wl.transport_mut().take()).is_empty());
}

#[test]
fn open_window_ignored_when_not_obeyed() {
    let mut wl = watchlist_with(WatchlistConfig {
        obey_open_window: false,
        ..WatchlistConfig::default()
    });
    connect_with(
        &mut wl,
        vec![Service::added(SERVICE_ID, SERVICE).with_open_window(1)],
    );
    wl.submit_item_request(item(5, "TRI"), &opts()).unwrap();
    wl.submit_item_request(item(6, "IBM"), &opts()).unwrap();
    assert_eq!(requests(&wl.transport_mut().take()).len(), 2);
}

#[test]
fn provider_close_reaches_every_subscriber_once() {
    let mut wl = watchlist();
    connect(&mut wl);
    wl.submit_item_request(item(5, "TRI"), &opts()).unwrap();
    wl.submit_item_request(item(6, "TRI"), &opts()).unwrap();
    wl.process_msg(item_refresh(3));
    wl.drain_events();

    wl.process_msg(Msg::Status(streamwatch_api::StatusMsg::new(
        3,
        DomainType::MarketPrice,
        State::closed("Item not entitled."),
    )));
    let events = wl.drain_events();
    for id in [5, 6] {
        let states = statuses_for(&events, id);
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].stream_state, StreamState::Closed);
        assert_eq!(states[0].text, "Item not entitled.");
    }
    assert_eq!(wl.item_stream_count(), 0);
    assert_eq!(wl.upstream_count(), 0);
}

#[test]
fn closed_recover_rerequests_on_a_new_stream() {
    let mut wl = watchlist();
    connect(&mut wl);
    wl.submit_item_request(item(5, "TRI"), &opts()).unwrap();
    wl.process_msg(item_refresh(3));
    wl.transport_mut().take();
    wl.drain_events();

    wl.process_msg(Msg::Status(streamwatch_api::StatusMsg::new(
        3,
        DomainType::MarketPrice,
        State::closed_recover("Source unavailable."),
    )));
    let events = wl.drain_events();
    let states = statuses_for(&events, 5);
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].stream_state, StreamState::Open);
    assert_eq!(states[0].data_state, DataState::Suspect);

    let sent = wl.transport_mut().take();
    let reqs = requests(&sent);
    assert_eq!(reqs.len(), 1);
    assert_eq!(reqs[0].stream_id, 4);
    assert_eq!(wl.item_upstream(5), Some(4));
}

#[test]
fn closed_recover_without_single_open_closes_consumers() {
    let mut wl = watchlist();
    wl.channel_event(ChannelEvent::Up);
    wl.submit_login_request(LoginRequest::new(LOGIN_CONSUMER, "user"), &SubmitOptions::default())
        .unwrap();
    let LoginMsg::Refresh(mut refresh) = login_refresh() else {
        unreachable!()
    };
    refresh.single_open = false;
    wl.process_msg(LoginMsg::Refresh(refresh));
    wl.process_msg(directory_refresh(vec![Service::added(SERVICE_ID, SERVICE)]));
    wl.submit_item_request(item(5, "TRI"), &opts()).unwrap();
    wl.process_msg(item_refresh(3));
    wl.transport_mut().take();
    wl.drain_events();

    wl.process_msg(Msg::Status(streamwatch_api::StatusMsg::new(
        3,
        DomainType::MarketPrice,
        State::closed_recover("Source unavailable."),
    )));
    let states = statuses_for(&wl.drain_events(), 5);
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].stream_state, StreamState::ClosedRecover);
    assert!(requests(&wl.transport_mut().take()).is_empty());
    assert_eq!(wl.item_stream_count(), 0);
}

#[test]
fn service_down_suspends_and_service_up_recovers() {
    let mut wl = watchlist();
    connect(&mut wl);
    wl.submit_item_request(item(5, "TRI"), &opts()).unwrap();
    wl.process_msg(item_refresh(3));
    wl.transport_mut().take();
    wl.drain_events();

    let down = Service::new(SERVICE_ID, streamwatch_api::MapAction::Update).with_state(
        ServiceState {
            up: false,
            ..ServiceState::default()
        },
    );
    wl.process_msg(streamwatch_api::DirectoryMsg::Update(
        streamwatch_api::DirectoryUpdate::new(2, vec![down]),
    ));
    let states = statuses_for(&wl.drain_events(), 5);
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].data_state, DataState::Suspect);
    let sent = wl.transport_mut().take();
    assert!(matches!(
        sent.as_slice(),
        [WireMsg::Generic(Msg::Close(CloseMsg { stream_id: 3, .. }))]
    ));

    let up = Service::new(SERVICE_ID, streamwatch_api::MapAction::Update)
        .with_state(ServiceState::default());
    wl.process_msg(streamwatch_api::DirectoryMsg::Update(
        streamwatch_api::DirectoryUpdate::new(2, vec![up]),
    ));
    let sent = wl.transport_mut().take();
    let reqs = requests(&sent);
    assert_eq!(reqs.len(), 1);
    assert_eq!(reqs[0].stream_id, 4);
}

#[test]
fn dictionary_domain_uses_dictionary_events() {
    let mut wl = watchlist();
    connect(&mut wl);
    let mut request = item(5, "RWFFld");
    request.domain = DomainType::Dictionary;
    wl.submit_item_request(request, &opts()).unwrap();
    wl.process_msg(Msg::Refresh(streamwatch_api::RefreshMsg::new(
        3,
        DomainType::Dictionary,
        State::open_ok(),
    )));
    let events = wl.drain_events();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        streamwatch_core::ConsumerEvent::Dictionary(e) if e.msg.stream_id() == 5
    ));
}

#[test]
fn batch_request_expands_and_reports() {
    let mut wl = watchlist();
    connect(&mut wl);
    let mut template = item(10, "unused");
    template.key.name = None;
    let names = vec!["TRI".to_owned(), "IBM".to_owned()];
    wl.submit_batch_request(template, &names, &opts()).unwrap();

    let sent = wl.transport_mut().take();
    let names_sent: Vec<_> = requests(&sent)
        .into_iter()
        .map(|r| r.key.name.clone().unwrap())
        .collect();
    assert_eq!(names_sent, vec!["TRI", "IBM"]);
    assert_eq!(wl.item_upstream(11), Some(3));
    assert_eq!(wl.item_upstream(12), Some(4));

    let states = statuses_for(&wl.drain_events(), 10);
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].stream_state, StreamState::Closed);
    assert_eq!(states[0].text, "Processed 2 total requests.");
}

#[test]
fn batch_rejected_on_stream_id_collision() {
    let mut wl = watchlist();
    connect(&mut wl);
    wl.submit_item_request(item(21, "TRI"), &opts()).unwrap();
    wl.transport_mut().take();

    let names = vec!["IBM".to_owned(), "MSFT".to_owned()];
    let result = wl.submit_batch_request(item(20, "x"), &names, &opts());
    assert!(matches!(result, Err(WatchlistError::InvalidUsage { .. })));
    assert!(wl.transport_mut().take().is_empty());
    assert_eq!(wl.item_stream_count(), 1);

    assert!(
        wl.submit_batch_request(item(30, "x"), &[], &opts())
            .is_err()
    );
}

fn updated_ids(events: &[ConsumerEvent]) -> Vec<StreamId> {
    default_msgs(events)
        .into_iter()
        .filter_map(|m| match m {
            Msg::Update(u) => Some(u.stream_id),
            _ => None,
        })
        .collect()
}

#[test]
fn late_attach_sees_no_updates_before_its_refresh() {
    let mut wl = watchlist();
    connect(&mut wl);
    wl.submit_item_request(item(5, "TRI"), &opts()).unwrap();
    wl.process_msg(item_refresh(3));
    wl.submit_item_request(item(6, "TRI"), &opts()).unwrap();
    wl.transport_mut().take();
    wl.drain_events();

    // The image for 6 is still on its way.
    wl.process_msg(item_update(3));
    assert_eq!(updated_ids(&wl.drain_events()), vec![5]);

    wl.process_msg(item_refresh(3));
    assert_eq!(refreshed_ids(&wl.drain_events()), vec![6]);

    wl.process_msg(item_update(3));
    assert_eq!(updated_ids(&wl.drain_events()), vec![5, 6]);
}

#[test]
fn updates_withheld_again_after_recovery() {
    let mut wl = watchlist();
    connect(&mut wl);
    wl.submit_item_request(item(5, "TRI"), &opts()).unwrap();
    wl.process_msg(item_refresh(3));
    wl.process_msg(Msg::Status(streamwatch_api::StatusMsg::new(
        3,
        DomainType::MarketPrice,
        State::closed_recover("Source unavailable."),
    )));
    wl.transport_mut().take();
    wl.drain_events();
    assert_eq!(wl.item_upstream(5), Some(4));

    wl.process_msg(item_update(4));
    assert!(updated_ids(&wl.drain_events()).is_empty());

    wl.process_msg(item_refresh(4));
    wl.process_msg(item_update(4));
    assert_eq!(updated_ids(&wl.drain_events()), vec![5]);
}

#[tokio::test(start_paused = true)]
async fn item_request_timeout_closes_and_resends() {
    let mut wl = watchlist_with(WatchlistConfig {
        request_timeout: Duration::from_secs(5),
        ..WatchlistConfig::default()
    });
    connect(&mut wl);
    wl.submit_item_request(item(5, "TRI"), &opts()).unwrap();
    assert_eq!(requests(&wl.transport_mut().take()).len(), 1);
    wl.drain_events();

    for _ in 0..3 {
        tokio::time::advance(Duration::from_secs(5)).await;
        wl.process_timers();

        let sent = wl.transport_mut().take();
        assert_eq!(sent.len(), 2);
        assert!(matches!(
            sent[0],
            WireMsg::Generic(Msg::Close(CloseMsg { stream_id: 3, .. }))
        ));
        let reqs = requests(&sent);
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].stream_id, 3);
        assert!(!reqs[0].no_refresh);

        let states = statuses_for(&wl.drain_events(), 5);
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].stream_state, StreamState::Open);
        assert_eq!(states[0].data_state, DataState::Suspect);
        assert_eq!(states[0].code, StateCode::Timeout);
    }

    wl.process_msg(item_refresh(3));
    assert_eq!(refreshed_ids(&wl.drain_events()), vec![5]);

    // Answered; the next deadline passes quietly.
    tokio::time::advance(Duration::from_secs(5)).await;
    wl.process_timers();
    assert!(wl.transport_mut().take().is_empty());
    assert!(wl.drain_events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn exhausted_item_retries_close_the_provider_stream() {
    let mut wl = watchlist_with(WatchlistConfig {
        request_timeout: Duration::from_secs(5),
        max_request_retries: Some(1),
        ..WatchlistConfig::default()
    });
    connect(&mut wl);
    wl.submit_item_request(item(5, "TRI"), &opts()).unwrap();
    wl.transport_mut().take();
    wl.drain_events();

    tokio::time::advance(Duration::from_secs(5)).await;
    wl.process_timers();
    assert_eq!(requests(&wl.transport_mut().take()).len(), 1);
    wl.drain_events();

    tokio::time::advance(Duration::from_secs(5)).await;
    wl.process_timers();
    let sent = wl.transport_mut().take();
    assert!(matches!(
        sent.as_slice(),
        [WireMsg::Generic(Msg::Close(CloseMsg { stream_id: 3, .. }))]
    ));

    let states = statuses_for(&wl.drain_events(), 5);
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].stream_state, StreamState::Closed);
    assert_eq!(states[0].code, StateCode::Timeout);
    assert_eq!(wl.item_stream_count(), 0);
    assert_eq!(wl.upstream_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn zero_retries_close_on_first_timeout() {
    let mut wl = watchlist_with(WatchlistConfig {
        request_timeout: Duration::from_secs(5),
        max_request_retries: Some(0),
        ..WatchlistConfig::default()
    });
    connect(&mut wl);
    wl.submit_item_request(item(5, "TRI"), &opts()).unwrap();
    wl.transport_mut().take();
    wl.drain_events();

    tokio::time::advance(Duration::from_secs(5)).await;
    wl.process_timers();
    let sent = wl.transport_mut().take();
    assert!(matches!(
        sent.as_slice(),
        [WireMsg::Generic(Msg::Close(CloseMsg { stream_id: 3, .. }))]
    ));
    let states = statuses_for(&wl.drain_events(), 5);
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].stream_state, StreamState::Closed);
}
