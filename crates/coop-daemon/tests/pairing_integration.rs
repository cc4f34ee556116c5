//! End-to-end pairing over real sockets: discovery state on the responder,
//! the TCP handshake, and session adoption on both ends.

use std::net::SocketAddr;

use coop_core::{CoopMessage, DeviceInfo, DeviceOs, SCAN_KEY};
use coop_daemon::application::registry::MachineRegistry;
use coop_daemon::infrastructure::network::pairing::{
    read_pair_request, request_pairing, validate_pair_request, write_pair_response, PairError,
    PairListener, PairRejection,
};
use coop_daemon::infrastructure::network::session::{spawn_session, SessionEvent, SessionHandle};
use coop_core::protocol::messages::PairRejectReason;
use tokio::sync::mpsc;
use uuid::Uuid;

fn device(name: &str, os: DeviceOs) -> DeviceInfo {
    DeviceInfo::new(Uuid::new_v4().to_string(), name, os)
}

#[tokio::test]
async fn test_pair_then_exchange_frames_both_ways() {
    let initiator = device("laptop", DeviceOs::Linux);
    let responder = device("desktop", DeviceOs::Linux);

    // The responder has already discovered the initiator.
    let mut registry = MachineRegistry::new();
    registry.upsert("127.0.0.1".parse().unwrap(), 0, &initiator);

    let (listener, port) = PairListener::bind().await.unwrap();
    let (resp_events, mut resp_rx) = mpsc::channel(16);

    let responder_task = tokio::spawn(async move {
        let (mut stream, _src) = listener.accept().await.unwrap();
        let request = read_pair_request(&mut stream).await.unwrap();
        let uuid = validate_pair_request(&registry, &request.key, &request.device).unwrap();
        write_pair_response(&mut stream, true, PairRejectReason::None)
            .await
            .unwrap();
        spawn_session(uuid, stream, resp_events)
    });

    let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    let stream = request_pairing(addr, &initiator).await.unwrap();
    let (init_events, mut init_rx) = mpsc::channel(16);
    let init_handle = spawn_session(responder.uuid.clone(), stream, init_events);
    let resp_handle = responder_task.await.unwrap();

    // Initiator pings; responder answers.
    assert!(init_handle.send(CoopMessage::Ping));
    match resp_rx.recv().await.unwrap() {
        SessionEvent::Frame { uuid, message } => {
            assert_eq!(uuid, initiator.uuid);
            assert_eq!(message, CoopMessage::Ping);
        }
        other => panic!("expected ping, got {other:?}"),
    }
    assert!(resp_handle.send(CoopMessage::Pong));
    match init_rx.recv().await.unwrap() {
        SessionEvent::Frame { message, .. } => assert_eq!(message, CoopMessage::Pong),
        other => panic!("expected pong, got {other:?}"),
    }
}

#[tokio::test]
async fn test_busy_class_rejection_leaves_first_pairing_intact() {
    let first = device("first-pc", DeviceOs::Linux);
    let second = device("second-pc", DeviceOs::Windows); // same Pc class

    let mut registry = MachineRegistry::new();
    registry.upsert("127.0.0.1".parse().unwrap(), 0, &first);
    registry.upsert("127.0.0.1".parse().unwrap(), 0, &second);
    let (first_handle, _first_rx) = SessionHandle::detached();
    registry.get_mut(&first.uuid).unwrap().on_pair(first_handle);

    let (listener, port) = PairListener::bind().await.unwrap();

    let responder_task = tokio::spawn(async move {
        let (mut stream, _src) = listener.accept().await.unwrap();
        let request = read_pair_request(&mut stream).await.unwrap();
        let rejection =
            validate_pair_request(&registry, &request.key, &request.device).unwrap_err();
        assert_eq!(rejection, PairRejection::DeviceBusy);
        write_pair_response(&mut stream, false, rejection.reason())
            .await
            .unwrap();
        registry
    });

    let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    let result = request_pairing(addr, &second).await;
    assert!(matches!(
        result,
        Err(PairError::Rejected(PairRejectReason::DeviceBusy))
    ));

    let registry = responder_task.await.unwrap();
    assert!(
        registry.get(&first.uuid).unwrap().is_connected(),
        "the established pairing must survive the rejected attempt"
    );
}

#[tokio::test]
async fn test_unknown_initiator_is_rejected() {
    let stranger = device("stranger", DeviceOs::Linux);
    let registry = MachineRegistry::new();

    let (listener, port) = PairListener::bind().await.unwrap();

    tokio::spawn(async move {
        let (mut stream, _src) = listener.accept().await.unwrap();
        let request = read_pair_request(&mut stream).await.unwrap();
        let rejection =
            validate_pair_request(&registry, &request.key, &request.device).unwrap_err();
        write_pair_response(&mut stream, false, rejection.reason())
            .await
            .unwrap();
    });

    let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    let result = request_pairing(addr, &stranger).await;
    assert!(matches!(
        result,
        Err(PairError::Rejected(PairRejectReason::UnknownDevice))
    ));
}

#[tokio::test]
async fn test_key_mismatch_is_checked_before_discovery() {
    // Even a discovered machine is turned away on a bad key.
    let dev = device("laptop", DeviceOs::Linux);
    let mut registry = MachineRegistry::new();
    registry.upsert("127.0.0.1".parse().unwrap(), 0, &dev);

    assert_eq!(
        validate_pair_request(&registry, "stale-version-key", &dev),
        Err(PairRejection::KeyMismatch)
    );
    assert_eq!(
        validate_pair_request(&registry, SCAN_KEY, &dev),
        Ok(dev.uuid.clone())
    );
}
