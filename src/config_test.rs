use super::*;
use std::collections::HashMap;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn empty_environment_yields_defaults() {
    let cfg = HubConfig::from_lookup(lookup_from(&[]));
    assert_eq!(cfg, HubConfig::default());
    assert_eq!(cfg.addr, DEFAULT_ADDR);
    assert_eq!(cfg.pong_wait, Duration::from_secs(60));
    assert_eq!(cfg.ping_period(), Duration::from_secs(54));
    assert!(cfg.unsafe_origin);
    assert!(cfg.demo_session.is_none());
}

#[test]
fn overrides_are_applied() {
    let cfg = HubConfig::from_lookup(lookup_from(&[
        ("HOOKHUB_ADDR", "127.0.0.1:9000"),
        ("HOOKHUB_PONG_WAIT_SECS", "10"),
        ("HOOKHUB_WRITE_WAIT_SECS", "2"),
        ("HOOKHUB_OUTBOUND_CAPACITY", "16"),
        ("HOOKHUB_HOOK_EVENT_CAPACITY", "4"),
        ("HOOKHUB_UNSAFE_ORIGIN", "false"),
        ("HOOKHUB_DEMO_SESSION", "GL_1001"),
    ]));
    assert_eq!(cfg.addr, "127.0.0.1:9000");
    assert_eq!(cfg.pong_wait, Duration::from_secs(10));
    assert_eq!(cfg.ping_period(), Duration::from_secs(9));
    assert_eq!(cfg.write_wait, Duration::from_secs(2));
    assert_eq!(cfg.outbound_capacity, 16);
    assert_eq!(cfg.hook_event_capacity, 4);
    assert!(!cfg.unsafe_origin);
    assert_eq!(cfg.demo_session.as_deref(), Some("GL_1001"));
}

#[test]
fn unparseable_values_fall_back_to_defaults() {
    let cfg = HubConfig::from_lookup(lookup_from(&[
        ("HOOKHUB_PONG_WAIT_SECS", "soon"),
        ("HOOKHUB_OUTBOUND_CAPACITY", "0"),
        ("HOOKHUB_UNSAFE_ORIGIN", "maybe"),
        ("HOOKHUB_ADDR", "  "),
    ]));
    assert_eq!(cfg.pong_wait, Duration::from_secs(DEFAULT_PONG_WAIT_SECS));
    assert_eq!(cfg.outbound_capacity, DEFAULT_OUTBOUND_CAPACITY);
    assert!(cfg.unsafe_origin);
    assert_eq!(cfg.addr, DEFAULT_ADDR);
}

#[test]
fn ping_period_stays_below_pong_wait() {
    let cfg = HubConfig::from_lookup(lookup_from(&[("HOOKHUB_PONG_WAIT_SECS", "1")]));
    assert!(cfg.ping_period() < cfg.pong_wait);
}
