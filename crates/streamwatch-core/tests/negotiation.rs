#![allow(clippy::unwrap_used)]

mod common;

use common::{
    SERVICE, SERVICE_ID, connect, connect_with, item, item_refresh, opts, refreshed_ids, requests,
    statuses_for, watchlist,
};
use pretty_assertions::assert_eq;
use streamwatch_api::{DataState, DomainType, Qos, Rate, Service, StreamState, Timeliness};
use streamwatch_core::{SubmitOptions, WatchlistError};

fn conflated() -> Qos {
    Qos::new(Timeliness::Realtime, Rate::TimeConflated(500))
}

fn delayed() -> Qos {
    Qos::new(Timeliness::Delayed(5), Rate::TickByTick)
}

fn worst() -> Qos {
    Qos::new(Timeliness::Delayed(60), Rate::TimeConflated(1000))
}

#[test]
fn unqualified_request_gets_realtime_from_a_plain_service() {
    let mut wl = watchlist();
    connect(&mut wl);
    wl.submit_item_request(item(5, "TRI"), &opts()).unwrap();

    let sent = wl.transport_mut().take();
    let reqs = requests(&sent);
    assert_eq!(reqs.len(), 1);
    assert_eq!(reqs[0].qos, Some(Qos::realtime()));
    assert_eq!(reqs[0].worst_qos, None);
}

#[test]
fn missing_capability_parks_the_request() {
    let mut wl = watchlist();
    connect_with(
        &mut wl,
        vec![Service::added(SERVICE_ID, SERVICE).with_capabilities(&[DomainType::MarketByOrder])],
    );
    wl.submit_item_request(item(5, "TRI"), &opts()).unwrap();

    assert!(requests(&wl.transport_mut().take()).is_empty());
    let states = statuses_for(&wl.drain_events(), 5);
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].stream_state, StreamState::Open);
    assert_eq!(states[0].data_state, DataState::Suspect);
    assert_eq!(states[0].text, "Capability not supported.");
    assert_eq!(wl.item_stream_count(), 1);

    let mut by_order = item(6, "TRI");
    by_order.domain = DomainType::MarketByOrder;
    wl.submit_item_request(by_order, &opts()).unwrap();
    assert_eq!(requests(&wl.transport_mut().take()).len(), 1);
}

#[test]
fn exact_qos_must_be_offered() {
    let mut wl = watchlist();
    connect_with(
        &mut wl,
        vec![Service::added(SERVICE_ID, SERVICE).with_qos(vec![conflated(), delayed()])],
    );
    wl.submit_item_request(item(5, "TRI").with_qos(Qos::realtime()), &opts())
        .unwrap();

    assert!(requests(&wl.transport_mut().take()).is_empty());
    let states = statuses_for(&wl.drain_events(), 5);
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].data_state, DataState::Suspect);
    assert_eq!(states[0].text, "Service does not provide a matching QoS.");

    wl.submit_item_request(item(6, "TRI").with_qos(delayed()), &opts())
        .unwrap();
    let sent = wl.transport_mut().take();
    let reqs = requests(&sent);
    assert_eq!(reqs.len(), 1);
    assert_eq!(reqs[0].qos, Some(delayed()));
}

#[test]
fn range_and_unqualified_requests_meet_on_the_best_offer() {
    let mut wl = watchlist();
    connect_with(
        &mut wl,
        vec![Service::added(SERVICE_ID, SERVICE).with_qos(vec![delayed(), conflated()])],
    );
    wl.submit_item_request(
        item(5, "TRI").with_qos_range(Qos::realtime(), worst()),
        &opts(),
    )
    .unwrap();
    let sent = wl.transport_mut().take();
    let reqs = requests(&sent);
    assert_eq!(reqs.len(), 1);
    assert_eq!(reqs[0].qos, Some(conflated()));
    assert_eq!(reqs[0].worst_qos, None);

    wl.submit_item_request(item(6, "TRI"), &opts()).unwrap();
    assert_eq!(wl.upstream_count(), 1);
    assert_eq!(wl.item_upstream(6), Some(3));
}

#[test]
fn private_requests_get_their_own_streams() {
    let mut wl = watchlist();
    connect(&mut wl);
    wl.submit_item_request(item(5, "TRI").private_stream(), &opts())
        .unwrap();
    wl.submit_item_request(item(6, "TRI").private_stream(), &opts())
        .unwrap();
    wl.submit_item_request(item(7, "TRI"), &opts()).unwrap();

    let sent = wl.transport_mut().take();
    let reqs = requests(&sent);
    assert_eq!(reqs.len(), 3);
    assert!(reqs[0].private);
    assert!(reqs[1].private);
    assert!(!reqs[2].private);
    assert_eq!(wl.upstream_count(), 3);

    wl.process_msg(item_refresh(3));
    assert_eq!(refreshed_ids(&wl.drain_events()), vec![5]);
}

#[test]
fn unplaceable_private_request_is_closed_recoverably() {
    let mut wl = watchlist();
    connect(&mut wl);
    wl.submit_item_request(
        item(5, "TRI").private_stream(),
        &SubmitOptions::service("ELSEWHERE"),
    )
    .unwrap();

    assert!(wl.transport_mut().take().is_empty());
    let states = statuses_for(&wl.drain_events(), 5);
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].stream_state, StreamState::ClosedRecover);
    assert_eq!(wl.item_stream_count(), 0);
}

#[test]
fn private_flag_cannot_change_on_reissue() {
    let mut wl = watchlist();
    connect(&mut wl);
    wl.submit_item_request(item(5, "TRI"), &opts()).unwrap();
    assert!(matches!(
        wl.submit_item_request(item(5, "TRI").private_stream(), &opts()),
        Err(WatchlistError::InvalidUsage { .. })
    ));
}
