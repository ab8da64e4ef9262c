//! End-to-end gateway scenarios over real sockets.
//!
//! Each test drives the listener as an ESME would: raw TCP, framed with
//! the crate's own codec.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;

use smppgw::config::Config;
use smppgw::gateway::Gateway;
use smppgw::pdu::{
    BindFields, CommandId, Pdu, PduEvent, PduFrame, SmFields, SmppCodec, Status, IF_VERSION_34,
};

const WAIT: Duration = Duration::from_secs(5);

type Esme = Framed<TcpStream, SmppCodec>;

async fn start_gateway(yaml: &str) -> (Gateway, std::net::SocketAddr) {
    let config = Config::from_yaml(yaml).expect("valid test config");
    let gateway = Gateway::new(config).expect("gateway assembles");
    let address = gateway.start().await.expect("listener starts");
    (gateway, address)
}

fn base_config() -> String {
    r#"
server:
  address: 127.0.0.1:0
  system_id: smsc
groups:
  - id: test-group
    max_binds: 2
clients:
  - system_id: test
    password: secret
    group: test-group
"#
    .to_string()
}

async fn connect(address: std::net::SocketAddr) -> Esme {
    let stream = TcpStream::connect(address).await.expect("connect");
    Framed::new(stream, SmppCodec::new())
}

fn bind_transmitter(sequence: u32, system_id: &str, password: &str) -> PduFrame {
    PduFrame::request(
        sequence,
        Pdu::BindTransmitter(BindFields {
            system_id: system_id.into(),
            password: password.into(),
            system_type: String::new(),
            interface_version: IF_VERSION_34,
            addr_ton: 0,
            addr_npi: 0,
            address_range: String::new(),
            tlvs: Default::default(),
        }),
    )
}

fn submit_sm(sequence: u32, dest: &str, text: &[u8]) -> PduFrame {
    PduFrame::request(
        sequence,
        Pdu::SubmitSm(Box::new(SmFields {
            source_addr: "15550001".into(),
            dest_addr: dest.into(),
            short_message: Bytes::copy_from_slice(text),
            ..Default::default()
        })),
    )
}

async fn recv(esme: &mut Esme) -> PduFrame {
    let event = timeout(WAIT, esme.next())
        .await
        .expect("response within deadline")
        .expect("stream open")
        .expect("no transport error");
    match event {
        PduEvent::Frame(frame) => frame,
        PduEvent::Malformed(err) => panic!("server sent a malformed frame: {err}"),
    }
}

#[tokio::test]
async fn happy_bind_and_submit() {
    let (_gateway, address) = start_gateway(&base_config()).await;
    let mut esme = connect(address).await;

    esme.send(bind_transmitter(1, "test", "secret")).await.unwrap();
    let resp = recv(&mut esme).await;
    assert_eq!(resp.command(), CommandId::BindTransmitterResp);
    assert_eq!(resp.status(), Status::Ok);
    assert_eq!(resp.sequence(), 1);
    match resp.pdu {
        Pdu::BindTransmitterResp(fields) => assert_eq!(fields.system_id, "smsc"),
        other => panic!("unexpected pdu {other:?}"),
    }

    esme.send(submit_sm(2, "15551234", b"hello")).await.unwrap();
    let resp = recv(&mut esme).await;
    assert_eq!(resp.command(), CommandId::SubmitSmResp);
    assert_eq!(resp.status(), Status::Ok);
    assert_eq!(resp.sequence(), 2);
    match resp.pdu {
        Pdu::SubmitSmResp(fields) => assert_eq!(fields.message_id, "MSG-1"),
        other => panic!("unexpected pdu {other:?}"),
    }
}

#[tokio::test]
async fn wrong_password_is_rejected_and_the_socket_closes() {
    let (_gateway, address) = start_gateway(&base_config()).await;
    let mut esme = connect(address).await;

    esme.send(bind_transmitter(1, "test", "bad")).await.unwrap();
    let resp = recv(&mut esme).await;
    assert_eq!(resp.command(), CommandId::BindTransmitterResp);
    assert_eq!(resp.status(), Status::InvalidPassword);
    assert_eq!(resp.sequence(), 1);
    match resp.pdu {
        Pdu::BindTransmitterResp(fields) => assert!(fields.system_id.is_empty()),
        other => panic!("unexpected pdu {other:?}"),
    }

    // The server hangs up after an authentication failure.
    let next = timeout(WAIT, esme.next()).await.expect("close within deadline");
    assert!(next.is_none(), "expected EOF after auth failure");
}

#[tokio::test]
async fn unknown_system_id_is_rejected() {
    let (_gateway, address) = start_gateway(&base_config()).await;
    let mut esme = connect(address).await;

    esme.send(bind_transmitter(1, "nobody", "secret")).await.unwrap();
    let resp = recv(&mut esme).await;
    assert_eq!(resp.status(), Status::InvalidSystemId);
}

#[tokio::test]
async fn submit_before_bind_is_rejected_with_bind_status() {
    let (_gateway, address) = start_gateway(&base_config()).await;
    let mut esme = connect(address).await;

    esme.send(submit_sm(7, "15551234", b"too soon")).await.unwrap();
    let resp = recv(&mut esme).await;
    assert_eq!(resp.command(), CommandId::SubmitSmResp);
    assert_eq!(resp.status(), Status::InvalidBindStatus);
    assert_eq!(resp.sequence(), 7);
}

#[tokio::test]
async fn unbind_before_bind_is_rejected_with_bind_status() {
    let (_gateway, address) = start_gateway(&base_config()).await;
    let mut esme = connect(address).await;

    esme.send(PduFrame::request(3, Pdu::Unbind)).await.unwrap();
    let resp = recv(&mut esme).await;
    assert_eq!(resp.command(), CommandId::UnbindResp);
    assert_eq!(resp.status(), Status::InvalidBindStatus);
    assert_eq!(resp.sequence(), 3);

    // The session stays OPEN: a bind still goes through afterwards.
    esme.send(bind_transmitter(4, "test", "secret")).await.unwrap();
    assert_eq!(recv(&mut esme).await.status(), Status::Ok);
}

#[tokio::test]
async fn enquire_link_before_bind_is_rejected_with_bind_status() {
    let (_gateway, address) = start_gateway(&base_config()).await;
    let mut esme = connect(address).await;

    esme.send(PduFrame::request(5, Pdu::EnquireLink)).await.unwrap();
    let resp = recv(&mut esme).await;
    assert_eq!(resp.command(), CommandId::EnquireLinkResp);
    assert_eq!(resp.status(), Status::InvalidBindStatus);
    assert_eq!(resp.sequence(), 5);
}

#[tokio::test]
async fn malformed_frame_gets_a_nack_and_the_session_survives() {
    let (_gateway, address) = start_gateway(&base_config()).await;
    let mut esme = connect(address).await;

    // A header claiming command_length = 10: below the header size.
    let mut bogus = BytesMut::new();
    bogus.extend_from_slice(&10u32.to_be_bytes());
    bogus.extend_from_slice(&(CommandId::EnquireLink as u32).to_be_bytes());
    bogus.extend_from_slice(&0u32.to_be_bytes());
    bogus.extend_from_slice(&99u32.to_be_bytes());
    esme.get_mut().write_all(&bogus).await.unwrap();
    esme.get_mut().flush().await.unwrap();

    let resp = recv(&mut esme).await;
    assert_eq!(resp.command(), CommandId::GenericNack);
    assert_eq!(resp.status(), Status::InvalidMsgLength);
    assert_eq!(resp.sequence(), 0);

    // Session is still OPEN: a bind goes through on the same socket.
    esme.send(bind_transmitter(2, "test", "secret")).await.unwrap();
    let resp = recv(&mut esme).await;
    assert_eq!(resp.command(), CommandId::BindTransmitterResp);
    assert_eq!(resp.status(), Status::Ok);
}

#[tokio::test]
async fn unknown_command_id_gets_invalid_command_nack() {
    let (_gateway, address) = start_gateway(&base_config()).await;
    let mut esme = connect(address).await;

    let mut bogus = BytesMut::new();
    bogus.extend_from_slice(&16u32.to_be_bytes());
    bogus.extend_from_slice(&0x0000_00AAu32.to_be_bytes());
    bogus.extend_from_slice(&0u32.to_be_bytes());
    bogus.extend_from_slice(&41u32.to_be_bytes());
    esme.get_mut().write_all(&bogus).await.unwrap();
    esme.get_mut().flush().await.unwrap();

    let resp = recv(&mut esme).await;
    assert_eq!(resp.command(), CommandId::GenericNack);
    assert_eq!(resp.status(), Status::InvalidCommandId);
    assert_eq!(resp.sequence(), 41);
}

#[tokio::test]
async fn second_bind_on_a_bound_session_reports_already_bound() {
    let (_gateway, address) = start_gateway(&base_config()).await;
    let mut esme = connect(address).await;

    esme.send(bind_transmitter(1, "test", "secret")).await.unwrap();
    assert_eq!(recv(&mut esme).await.status(), Status::Ok);

    esme.send(bind_transmitter(2, "test", "secret")).await.unwrap();
    let resp = recv(&mut esme).await;
    assert_eq!(resp.status(), Status::AlreadyBound);
    assert_eq!(resp.sequence(), 2);
}

#[tokio::test]
async fn enquire_link_echoes_the_sequence() {
    let (_gateway, address) = start_gateway(&base_config()).await;
    let mut esme = connect(address).await;

    esme.send(bind_transmitter(1, "test", "secret")).await.unwrap();
    recv(&mut esme).await;

    esme.send(PduFrame::request(88, Pdu::EnquireLink)).await.unwrap();
    let resp = recv(&mut esme).await;
    assert_eq!(resp.command(), CommandId::EnquireLinkResp);
    assert_eq!(resp.status(), Status::Ok);
    assert_eq!(resp.sequence(), 88);
}

#[tokio::test]
async fn unbind_closes_the_session() {
    let (_gateway, address) = start_gateway(&base_config()).await;
    let mut esme = connect(address).await;

    esme.send(bind_transmitter(1, "test", "secret")).await.unwrap();
    recv(&mut esme).await;

    esme.send(PduFrame::request(2, Pdu::Unbind)).await.unwrap();
    let resp = recv(&mut esme).await;
    assert_eq!(resp.command(), CommandId::UnbindResp);
    assert_eq!(resp.status(), Status::Ok);
    assert_eq!(resp.sequence(), 2);

    let next = timeout(WAIT, esme.next()).await.expect("close within deadline");
    assert!(next.is_none(), "expected EOF after unbind");
}

#[tokio::test]
async fn bind_ceiling_applies_across_connections() {
    // max_binds is 2 in the base config: the third concurrent bind fails.
    let (_gateway, address) = start_gateway(&base_config()).await;

    let mut first = connect(address).await;
    first.send(bind_transmitter(1, "test", "secret")).await.unwrap();
    assert_eq!(recv(&mut first).await.status(), Status::Ok);

    let mut second = connect(address).await;
    second.send(bind_transmitter(1, "test", "secret")).await.unwrap();
    assert_eq!(recv(&mut second).await.status(), Status::Ok);

    let mut third = connect(address).await;
    third.send(bind_transmitter(1, "test", "secret")).await.unwrap();
    assert_eq!(recv(&mut third).await.status(), Status::BindFailed);
}

#[tokio::test]
async fn unbind_releases_the_bind_slot() {
    let yaml = r#"
server:
  address: 127.0.0.1:0
  system_id: smsc
groups:
  - id: single
    max_binds: 1
clients:
  - system_id: solo
    password: pw
    group: single
"#;
    let (_gateway, address) = start_gateway(yaml).await;

    let mut first = connect(address).await;
    first.send(bind_transmitter(1, "solo", "pw")).await.unwrap();
    assert_eq!(recv(&mut first).await.status(), Status::Ok);

    first.send(PduFrame::request(2, Pdu::Unbind)).await.unwrap();
    recv(&mut first).await;
    // Wait for the session teardown to release the slot.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut second = connect(address).await;
    second.send(bind_transmitter(1, "solo", "pw")).await.unwrap();
    assert_eq!(recv(&mut second).await.status(), Status::Ok);
}

#[tokio::test]
async fn standalone_credentials_from_server_config() {
    let yaml = r#"
server:
  address: 127.0.0.1:0
  system_id: smsc
  password: letmein
"#;
    let (_gateway, address) = start_gateway(yaml).await;
    let mut esme = connect(address).await;

    esme.send(bind_transmitter(1, "smsc", "letmein")).await.unwrap();
    assert_eq!(recv(&mut esme).await.status(), Status::Ok);
}

#[tokio::test]
async fn transceiver_bind_can_submit() {
    let (_gateway, address) = start_gateway(&base_config()).await;
    let mut esme = connect(address).await;

    let bind = PduFrame::request(
        1,
        Pdu::BindTransceiver(BindFields {
            system_id: "test".into(),
            password: "secret".into(),
            interface_version: IF_VERSION_34,
            ..Default::default()
        }),
    );
    esme.send(bind).await.unwrap();
    let resp = recv(&mut esme).await;
    assert_eq!(resp.command(), CommandId::BindTransceiverResp);
    assert_eq!(resp.status(), Status::Ok);

    esme.send(submit_sm(2, "15551234", b"via trx")).await.unwrap();
    assert_eq!(recv(&mut esme).await.status(), Status::Ok);
}

#[tokio::test]
async fn receiver_bind_cannot_submit() {
    let (_gateway, address) = start_gateway(&base_config()).await;
    let mut esme = connect(address).await;

    let bind = PduFrame::request(
        1,
        Pdu::BindReceiver(BindFields {
            system_id: "test".into(),
            password: "secret".into(),
            interface_version: IF_VERSION_34,
            ..Default::default()
        }),
    );
    esme.send(bind).await.unwrap();
    assert_eq!(recv(&mut esme).await.status(), Status::Ok);

    esme.send(submit_sm(2, "15551234", b"nope")).await.unwrap();
    let resp = recv(&mut esme).await;
    assert_eq!(resp.command(), CommandId::SubmitSmResp);
    assert_eq!(resp.status(), Status::InvalidBindStatus);
}

#[tokio::test]
async fn delivery_reaches_a_bound_receiver() {
    let (gateway, address) = start_gateway(&base_config()).await;
    let mut esme = connect(address).await;

    let bind = PduFrame::request(
        1,
        Pdu::BindReceiver(BindFields {
            system_id: "test".into(),
            password: "secret".into(),
            interface_version: IF_VERSION_34,
            ..Default::default()
        }),
    );
    esme.send(bind).await.unwrap();
    recv(&mut esme).await;

    let message = SmFields {
        source_addr: "15559999".into(),
        dest_addr: "15550001".into(),
        short_message: Bytes::from_static(b"mt message"),
        ..Default::default()
    };
    assert!(gateway.registry().deliver_to("test", message));

    let frame = recv(&mut esme).await;
    assert_eq!(frame.command(), CommandId::DeliverSm);
    match frame.pdu {
        Pdu::DeliverSm(ref sm) => assert_eq!(sm.short_message.as_ref(), b"mt message"),
        other => panic!("unexpected pdu {other:?}"),
    }

    // Acknowledge the delivery like a well-behaved ESME.
    esme.send(PduFrame::response(
        frame.sequence(),
        Status::Ok,
        Pdu::DeliverSmResp(Default::default()),
    ))
    .await
    .unwrap();
}

#[tokio::test]
async fn denied_ip_is_dropped_before_any_smpp_traffic() {
    let yaml = r#"
server:
  address: 127.0.0.1:0
  system_id: smsc
  default_allow: false
"#;
    let (_gateway, address) = start_gateway(yaml).await;
    let mut esme = connect(address).await;

    esme.send(bind_transmitter(1, "test", "secret")).await.unwrap();
    let next = timeout(WAIT, esme.next()).await.expect("close within deadline");
    assert!(next.is_none(), "expected drop for denied peer");
}
