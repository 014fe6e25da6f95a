use hass_transport::{
    AlwaysAvailable, HealthProbe, HttpHealthProbe, Runnable, TransportError,
    websocket::{
        ConnectionEpoch, ConnectionState, Connector, EventSubscription, HassClient, Link,
        Message, MessageKind, RequestId, RequestTracker, ServiceCall, SubscriptionRegistry,
        TungsteniteConnector, WsConfig,
    },
};

fn assert_connector<C: Connector>() {}
fn assert_runnable<R: Runnable>() {}
fn assert_probe<P: HealthProbe>() {}

#[test]
fn websocket_exports_compile() {
    assert_connector::<TungsteniteConnector>();
    assert_runnable::<HassClient>();
    assert_probe::<AlwaysAvailable>();
    assert_probe::<HttpHealthProbe>();

    let _ = std::mem::size_of::<Link>();
    let _ = std::mem::size_of::<ConnectionEpoch>();
    let _ = std::mem::size_of::<RequestTracker>();
    let _ = std::mem::size_of::<SubscriptionRegistry>();
    let _ = std::mem::size_of::<TransportError>();
    assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
}

#[test]
fn messages_build_from_public_types() {
    let subscribe = Message::from(EventSubscription::new(RequestId(1), "state_changed"));
    assert_eq!(subscribe.kind(), MessageKind::EventSubscription);

    let call = Message::from(ServiceCall::new(RequestId(2), "light", "turn_on").entity("light.kitchen"));
    assert_eq!(call.type_tag(), "call_service");

    let config = WsConfig::from_host(true, "hub.example.org", "token");
    assert!(config.validate().is_ok());
}
