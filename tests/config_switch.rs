//! Service-config driven balancer switching: updates are serialised
//! through the resolver watcher, the old policy is closed exactly once,
//! and no pick can observe its picker after the switch.

mod common;

use std::sync::atomic::Ordering;

use common::*;
use wirecall::client::name_resolution::Address;
use wirecall::client::{wait_for_ready, CallOptions, Channel, ChannelOptions};
use wirecall::Context;

#[tokio::test]
async fn switching_policies_closes_the_old_one_exactly_once() {
    let probe_a = BalancerProbe::new();
    let probe_b = BalancerProbe::new();
    TestBalancerBuilder::register("switch_a", false, probe_a.clone());
    TestBalancerBuilder::register("switch_b", false, probe_b.clone());

    let connector = FakeConnector::new();
    connector.add("srv:1", FakeServer::replying(b"pong"));
    let resolver = ManualResolverBuilder::new();
    let mut options = ChannelOptions::new(connector);
    options.resolver_builder = Some(resolver.clone());
    let channel = Channel::dial("manual:///switchy", options).expect("dial");

    let handle = resolver.handle();
    handle.new_address(vec![Address::new("srv:1")]);
    handle.new_service_config(r#"{"loadBalancingPolicy": "switch_a"}"#.to_string());
    wait_for(|| probe_a.events().iter().any(|e| e == "switch_a:Ready")).await;

    handle.new_service_config(r#"{"loadBalancingPolicy": "switch_b"}"#.to_string());
    wait_for(|| probe_b.events().iter().any(|e| e == "switch_b:Ready")).await;

    assert_eq!(
        probe_a.closes.load(Ordering::SeqCst),
        1,
        "the replaced policy is closed exactly once"
    );
    assert!(
        probe_a.events().iter().any(|e| e == "switch_a:resolved"),
        "the first policy saw the address list"
    );
    assert!(
        probe_b.events().iter().any(|e| e == "switch_b:resolved"),
        "the address list is replayed into the new policy"
    );

    // From here on no pick can reach policy A's picker: every call runs
    // through B, whose picker reports outcomes into probe_b.
    let ctx = Context::background();
    for _ in 0..3 {
        let mut reply = TestMessage::default();
        channel
            .invoke(
                &ctx,
                "/svc/M",
                &TestMessage::new(b"ping"),
                &mut reply,
                CallOptions::new().with(wait_for_ready(true)),
            )
            .await
            .expect("calls keep working after the switch");
        assert_eq!(reply, TestMessage::new(b"pong"));
    }
    assert_eq!(probe_b.done.lock().unwrap().len(), 3);
    assert!(
        probe_a.done.lock().unwrap().is_empty(),
        "no pick may observe the old picker after the switch"
    );
    assert_eq!(probe_a.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unknown_policy_falls_back_to_pick_first() {
    let connector = FakeConnector::new();
    connector.add("srv:2", FakeServer::replying(b"pong"));
    let resolver = ManualResolverBuilder::new();
    let mut options = ChannelOptions::new(connector);
    options.resolver_builder = Some(resolver.clone());
    let channel = Channel::dial("manual:///fallback", options).expect("dial");

    let handle = resolver.handle();
    handle.new_address(vec![Address::new("srv:2")]);
    handle.new_service_config(r#"{"loadBalancingPolicy": "does_not_exist"}"#.to_string());

    let ctx = Context::background();
    let mut reply = TestMessage::default();
    channel
        .invoke(
            &ctx,
            "/svc/M",
            &TestMessage::new(b"ping"),
            &mut reply,
            CallOptions::new().with(wait_for_ready(true)),
        )
        .await
        .expect("calls still work under the fallback policy");
    assert_eq!(reply, TestMessage::new(b"pong"));
}

#[tokio::test]
async fn malformed_service_config_keeps_the_previous_snapshot() {
    let connector = FakeConnector::new();
    connector.add("srv:3", FakeServer::replying(b"pong"));
    let resolver = ManualResolverBuilder::new();
    let mut options = ChannelOptions::new(connector);
    options.resolver_builder = Some(resolver.clone());
    let channel = Channel::dial("manual:///sticky", options).expect("dial");

    let handle = resolver.handle();
    handle.new_address(vec![Address::new("srv:3")]);
    handle.new_service_config(
        r#"{"methodConfig": [{"name": [{"service": "svc"}], "waitForReady": true}]}"#.to_string(),
    );
    wait_for(|| channel.get_method_config("/svc/M").wait_for_ready == Some(true)).await;

    // A malformed document must not clobber the installed one.
    handle.new_service_config("{not json".to_string());
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    assert_eq!(
        channel.get_method_config("/svc/M").wait_for_ready,
        Some(true)
    );
}

#[tokio::test]
async fn switching_to_the_same_policy_does_not_close_it() {
    let probe = BalancerProbe::new();
    TestBalancerBuilder::register("switch_same", false, probe.clone());

    let connector = FakeConnector::new();
    connector.add("srv:4", FakeServer::replying(b"pong"));
    let resolver = ManualResolverBuilder::new();
    let mut options = ChannelOptions::new(connector);
    options.resolver_builder = Some(resolver.clone());
    let _channel = Channel::dial("manual:///same", options).expect("dial");

    let handle = resolver.handle();
    handle.new_address(vec![Address::new("srv:4")]);
    handle.new_service_config(r#"{"loadBalancingPolicy": "switch_same"}"#.to_string());
    wait_for(|| probe.events().iter().any(|e| e == "switch_same:Ready")).await;

    handle.new_service_config(r#"{"loadBalancingPolicy": "switch_same"}"#.to_string());
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    assert_eq!(probe.closes.load(Ordering::SeqCst), 0);
}
