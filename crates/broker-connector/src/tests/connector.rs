//! Connection setup, session fan-out and failure reporting.

use super::harness::{
    connector_with_stage, process_events, queue_settings, BlockingHarness, Call, MockBroker,
    Observed,
};
use crate::broker::{AcknowledgeMode, DestinationHandle};
use crate::config::{ConnectorRole, ConnectorSettings, Credentials};
use crate::error::{BrokerError, ConnectorError};
use crate::session::Session;
use std::collections::HashSet;
use std::time::Duration;

#[test]
fn opens_requested_sessions_on_one_connection() {
    for count in [1, 2, 5] {
        let harness = BlockingHarness::new();
        let sessions = harness.open(
            queue_settings(ConnectorSettings::new(ConnectorRole::Consumer)).with_session_count(count),
        );

        assert_eq!(sessions.len(), count);
        assert_eq!(
            harness
                .broker
                .count(|c| matches!(c, Call::CreateConnection { .. })),
            1
        );
        assert_eq!(
            harness.broker.count(|c| matches!(c, Call::CreateSession(_))),
            count
        );

        let ids: HashSet<_> = sessions.iter().map(Session::id).collect();
        assert_eq!(ids.len(), count, "session ids must be distinct");

        for session in &sessions {
            assert_eq!(
                session.core().destination(),
                &DestinationHandle::Queue("orders".to_string())
            );
        }
    }
}

#[test]
fn producer_role_opens_a_single_session() {
    let harness = BlockingHarness::new();
    let sessions = harness.open(
        queue_settings(ConnectorSettings::new(ConnectorRole::Producer)).with_session_count(4),
    );

    assert_eq!(sessions.len(), 1);
    assert!(matches!(sessions[0], Session::Plain(_)));
}

#[test]
fn role_selects_session_kind_and_acknowledge_mode() {
    let cases = [
        (ConnectorRole::Consumer, AcknowledgeMode::Auto),
        (ConnectorRole::AckConsumer, AcknowledgeMode::Client),
        (ConnectorRole::TxConsumer, AcknowledgeMode::Transacted),
    ];

    for (role, mode) in cases {
        let harness = BlockingHarness::new();
        let session = harness.open_one(
            queue_settings(ConnectorSettings::new(role)).with_max_pending_acks(7),
        );

        assert_eq!(harness.broker.count(|c| *c == Call::CreateSession(mode)), 1);
        match role {
            ConnectorRole::AckConsumer => {
                let ack = session.as_ack().expect("ack session");
                assert_eq!(ack.max_pending_acks(), 7);
            }
            ConnectorRole::TxConsumer => assert!(session.as_tx().is_some()),
            _ => assert!(matches!(session, Session::Plain(_))),
        }
    }
}

#[test]
fn connection_is_prepared_before_start() {
    let harness = BlockingHarness::new();
    harness.open_one(
        queue_settings(ConnectorSettings::new(ConnectorRole::Consumer))
            .with_credentials(Credentials::new("admin", "secret"))
            .with_client_id("stage-7"),
    );

    let calls = harness.broker.calls();
    assert_eq!(
        &calls[..4],
        &[
            Call::CreateConnection {
                username: Some("admin".to_string())
            },
            Call::SetExceptionListener,
            Call::SetClientId("stage-7".to_string()),
            Call::Start,
        ]
    );
}

#[test]
fn anonymous_connection_without_credentials() {
    let harness = BlockingHarness::new();
    harness.open_one(queue_settings(ConnectorSettings::new(ConnectorRole::Consumer)));

    assert_eq!(
        harness.broker.calls()[0],
        Call::CreateConnection { username: None }
    );
    assert_eq!(
        harness.broker.count(|c| matches!(c, Call::SetClientId(_))),
        0
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reports_connection_then_sessions_in_open_order() {
    let broker = MockBroker::new();
    let (connector, mut stage) = connector_with_stage(
        &broker,
        queue_settings(ConnectorSettings::new(ConnectorRole::AckConsumer)).with_session_count(3),
    );

    let handle = connector.init_session_async().unwrap();
    handle.await.unwrap();
    process_events(&mut stage, 4).await;

    let observed = &stage.handler().observed;
    assert_eq!(observed[0], Observed::Connection);
    assert_eq!(stage.handler().sessions(), 3);
    assert!(stage.connection().is_some());

    let delivered: Vec<_> = stage.sessions().iter().map(Session::id).collect();
    let reported: Vec<_> = observed[1..]
        .iter()
        .filter_map(|o| match o {
            Observed::Session(id) => Some(*id),
            _ => None,
        })
        .collect();
    assert_eq!(delivered, reported);

    // Closing in delivery order closes broker channels 0, 1, 2.
    for session in stage.sessions() {
        session.close_session_async().await.unwrap();
    }
    let closed: Vec<_> = broker
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::CloseSession(index) => Some(index),
            _ => None,
        })
        .collect();
    assert_eq!(closed, vec![0, 1, 2]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connection_failure_is_reported_once_without_sessions() {
    let broker = MockBroker::new();
    broker.fail_connect(BrokerError::new("bad credentials").with_code("401"));
    let (connector, mut stage) = connector_with_stage(
        &broker,
        queue_settings(ConnectorSettings::new(ConnectorRole::Consumer)).with_session_count(3),
    );

    connector.init_session_async().unwrap().await.unwrap();

    let result = stage.process_next().await;
    assert!(matches!(result, Err(ConnectorError::Broker(ref e)) if e.error_code.as_deref() == Some("401")));

    // Nothing follows the failure.
    let next = tokio::time::timeout(Duration::from_millis(100), stage.process_next()).await;
    assert!(!matches!(next, Ok(Ok(true))));

    assert_eq!(stage.handler().failures(), 1);
    assert_eq!(stage.handler().sessions(), 0);
    assert!(stage.sessions().is_empty());
    assert!(stage.connection().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn session_open_failure_delivers_no_sessions() {
    let broker = MockBroker::new();
    broker.fail_session_at(2);
    let (connector, mut stage) = connector_with_stage(
        &broker,
        queue_settings(ConnectorSettings::new(ConnectorRole::Consumer)).with_session_count(4),
    );

    connector.init_session_async().unwrap().await.unwrap();

    process_events(&mut stage, 1).await;
    let result = stage.process_next().await;
    assert!(matches!(result, Err(ConnectorError::Broker(_))));

    assert_eq!(stage.handler().observed[0], Observed::Connection);
    assert_eq!(stage.handler().sessions(), 0);
    assert_eq!(stage.handler().failures(), 1);

    // Sessions opened before the failure are not leaked.
    assert_eq!(broker.count(|c| *c == Call::CloseSession(0)), 1);
    assert_eq!(broker.count(|c| *c == Call::CloseSession(1)), 1);
    assert_eq!(broker.count(|c| matches!(c, Call::CreateSession(_))), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_destination_fails_after_connection() {
    let broker = MockBroker::new();
    let (connector, mut stage) =
        connector_with_stage(&broker, ConnectorSettings::new(ConnectorRole::Consumer));

    connector.init_session_async().unwrap().await.unwrap();

    process_events(&mut stage, 1).await;
    let result = stage.process_next().await;
    match result {
        Err(ConnectorError::Config(message)) => assert_eq!(message, "Destination is missing"),
        other => panic!("expected config error, got {:?}", other),
    }
    assert_eq!(broker.count(|c| matches!(c, Call::CreateSession(_))), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_dispatcher_is_returned_and_reported() {
    let broker = MockBroker::new();
    let (connector, mut stage) = connector_with_stage(
        &broker,
        queue_settings(ConnectorSettings::new(ConnectorRole::Consumer))
            .with_dispatcher("missing-dispatcher"),
    );

    let started = connector.init_session_async();
    assert!(matches!(started, Err(ConnectorError::Config(_))));

    let result = stage.process_next().await;
    match result {
        Err(ConnectorError::Config(message)) => {
            assert_eq!(message, "Unknown dispatcher: missing-dispatcher")
        }
        other => panic!("expected config error, got {:?}", other),
    }
    assert!(broker.calls().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalid_settings_never_touch_the_broker() {
    let broker = MockBroker::new();
    let (connector, mut stage) = connector_with_stage(
        &broker,
        queue_settings(ConnectorSettings::new(ConnectorRole::Consumer)).with_session_count(0),
    );

    assert!(connector.init_session_async().is_err());
    assert!(matches!(
        stage.process_next().await,
        Err(ConnectorError::Config(_))
    ));
    assert!(broker.calls().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lost_connection_fails_the_stage() {
    let broker = MockBroker::new();
    let (connector, mut stage) = connector_with_stage(
        &broker,
        queue_settings(ConnectorSettings::new(ConnectorRole::Consumer)).with_session_count(2),
    );

    connector.init_session_async().unwrap().await.unwrap();
    process_events(&mut stage, 3).await;

    assert!(broker.raise_exception(BrokerError::new("connection reset")));
    let result = stage.process_next().await;
    assert!(matches!(result, Err(ConnectorError::ConnectionFailure(ref e)) if e.message == "connection reset"));

    // A second loss is swallowed.
    assert!(broker.raise_exception(BrokerError::new("still down")));
    let next = tokio::time::timeout(Duration::from_millis(100), stage.process_next()).await;
    assert!(next.is_err(), "no event expected after the first failure");
    assert_eq!(stage.handler().failures(), 1);
}
