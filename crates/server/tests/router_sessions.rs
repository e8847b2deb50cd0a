//! End-to-end router sessions over in-memory and TCP streams.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use cache::{
    AnnouncementSet, Asn, Payload, Prefix, RouteOrigin, SerialStore, Snapshot, ValidatedCache,
};
use rtr::{
    CacheResponse, EndOfData, ErrorCode, Flag, FrameError, Ipv4Prefix, Pdu, ProtocolVersion,
    ResetQuery, Serial, SerialNotify, SerialQuery, Timing, read_frame, write_pdu,
};
use rtr_server::{ConnectionConfig, ServerConfig, ServerError, serve_connection, start_server};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const MAX_PDU: usize = 64 * 1024;
const WAIT: Duration = Duration::from_secs(5);

fn documentation_origin() -> RouteOrigin {
    let prefix: Prefix = "192.0.2.0/24".parse().expect("prefix");
    RouteOrigin::new(Asn(64496), prefix, 24).expect("origin")
}

/// Session 0x1234 at serial 5 holding one IPv4 announcement.
fn store_at_serial_five() -> Arc<SerialStore> {
    let store = Arc::new(SerialStore::with_session(16, 0x1234, Serial(4)));
    let snapshot: Snapshot = [Payload::from(documentation_origin())].into_iter().collect();
    assert_eq!(store.publish(snapshot), Serial(5));
    store
}

fn connect(store: Arc<SerialStore>) -> (DuplexStream, JoinHandle<Result<(), ServerError>>) {
    let (client, server) = tokio::io::duplex(MAX_PDU);
    let config = ConnectionConfig {
        timing: Timing::default(),
        max_pdu_size: MAX_PDU,
    };
    let task = tokio::spawn(serve_connection(server, store, config));
    (client, task)
}

async fn next_pdu<R>(reader: &mut R) -> Pdu
where
    R: tokio::io::AsyncRead + Unpin,
{
    timeout(WAIT, read_frame(reader, MAX_PDU))
        .await
        .expect("pdu in time")
        .expect("valid pdu")
}

fn announcement(flag: Flag) -> Pdu {
    Pdu::Ipv4Prefix(Ipv4Prefix {
        version: ProtocolVersion::V1,
        flag,
        prefix: Ipv4Addr::new(192, 0, 2, 0),
        prefix_len: 24,
        max_len: 24,
        asn: 64496,
    })
}

fn end_of_data(serial: u32) -> Pdu {
    Pdu::EndOfData(EndOfData {
        session_id: 0x1234,
        serial: Serial(serial),
        timing: Some(Timing::default()),
    })
}

fn reset_query() -> Pdu {
    Pdu::ResetQuery(ResetQuery {
        version: ProtocolVersion::V1,
    })
}

#[tokio::test]
async fn reset_query_then_incremental_withdrawal() {
    let store = store_at_serial_five();
    let (mut client, _task) = connect(store.clone());

    write_pdu(&mut client, &reset_query()).await.expect("write");
    assert_eq!(
        next_pdu(&mut client).await,
        Pdu::CacheResponse(CacheResponse {
            version: ProtocolVersion::V1,
            session_id: 0x1234,
        })
    );
    assert_eq!(next_pdu(&mut client).await, announcement(Flag::Announce));
    assert_eq!(next_pdu(&mut client).await, end_of_data(5));

    assert_eq!(store.publish(Snapshot::default()), Serial(6));
    assert_eq!(
        next_pdu(&mut client).await,
        Pdu::SerialNotify(SerialNotify {
            version: ProtocolVersion::V1,
            session_id: 0x1234,
            serial: Serial(6),
        })
    );

    let query = Pdu::SerialQuery(SerialQuery {
        version: ProtocolVersion::V1,
        session_id: 0x1234,
        serial: Serial(5),
    });
    write_pdu(&mut client, &query).await.expect("write");
    assert!(matches!(next_pdu(&mut client).await, Pdu::CacheResponse(_)));
    assert_eq!(next_pdu(&mut client).await, announcement(Flag::Withdraw));
    assert_eq!(next_pdu(&mut client).await, end_of_data(6));
}

#[tokio::test]
async fn foreign_session_gets_cache_reset_and_stays_open() {
    let store = store_at_serial_five();
    let (mut client, _task) = connect(store);

    let query = Pdu::SerialQuery(SerialQuery {
        version: ProtocolVersion::V1,
        session_id: 0x9999,
        serial: Serial(5),
    });
    write_pdu(&mut client, &query).await.expect("write");
    assert!(matches!(next_pdu(&mut client).await, Pdu::CacheReset(_)));

    write_pdu(&mut client, &reset_query()).await.expect("write");
    assert!(matches!(next_pdu(&mut client).await, Pdu::CacheResponse(_)));
}

#[tokio::test]
async fn short_declared_length_is_reported_and_closed() {
    let store = store_at_serial_five();
    let (mut client, task) = connect(store);

    let malformed = [1u8, 2, 0, 0, 0, 0, 0, 4];
    client.write_all(&malformed).await.expect("write");
    match next_pdu(&mut client).await {
        Pdu::ErrorReport(report) => {
            assert_eq!(report.code, ErrorCode::CorruptData);
            assert_eq!(report.pdu, malformed.to_vec());
            assert!(!report.text.is_empty());
        }
        other => panic!("expected error report, got {other:?}"),
    }
    let closed = timeout(WAIT, read_frame(&mut client, MAX_PDU))
        .await
        .expect("close in time");
    assert!(matches!(closed, Err(FrameError::Closed)));
    assert!(timeout(WAIT, task).await.expect("task ends").expect("join").is_ok());
}

#[tokio::test]
async fn unsupported_version_and_type_are_reported() {
    let (mut client, _task) = connect(store_at_serial_five());
    let future_version = [9u8, 1, 0x12, 0x34, 0, 0, 0, 12, 0, 0, 0, 5];
    client.write_all(&future_version).await.expect("write");
    match next_pdu(&mut client).await {
        Pdu::ErrorReport(report) => {
            assert_eq!(report.code, ErrorCode::UnsupportedProtocolVersion);
            assert_eq!(report.version, ProtocolVersion::V1);
            assert_eq!(report.pdu, future_version.to_vec());
        }
        other => panic!("expected error report, got {other:?}"),
    }

    let (mut client, _task) = connect(store_at_serial_five());
    let unknown = [1u8, 5, 0, 0, 0, 0, 0, 8];
    client.write_all(&unknown).await.expect("write");
    match next_pdu(&mut client).await {
        Pdu::ErrorReport(report) => {
            assert_eq!(report.code, ErrorCode::UnsupportedPduType);
            assert_eq!(report.pdu, unknown.to_vec());
        }
        other => panic!("expected error report, got {other:?}"),
    }
}

#[tokio::test]
async fn no_data_before_first_publication() {
    let store = Arc::new(SerialStore::with_session(4, 7, Serial(0)));
    let (mut client, _task) = connect(store.clone());
    write_pdu(&mut client, &reset_query()).await.expect("write");
    match next_pdu(&mut client).await {
        Pdu::ErrorReport(report) => assert_eq!(report.code, ErrorCode::NoDataAvailable),
        other => panic!("expected error report, got {other:?}"),
    }

    store.publish(Snapshot::default());
    write_pdu(&mut client, &reset_query()).await.expect("write");
    assert!(matches!(next_pdu(&mut client).await, Pdu::CacheResponse(_)));
    assert!(matches!(next_pdu(&mut client).await, Pdu::EndOfData(eod) if eod.serial == Serial(1)));
}

#[tokio::test]
async fn tcp_listener_serves_cache_updates() {
    let store = Arc::new(SerialStore::with_session(8, 0x4242, Serial(0)));
    let cache = Arc::new(ValidatedCache::new(store));
    cache.update(
        "ripe".into(),
        AnnouncementSet::new([documentation_origin()], vec![]),
    );
    let config = ServerConfig {
        listen: "127.0.0.1:0".parse().expect("addr"),
        max_clients: 1,
        ..ServerConfig::default()
    };
    let server = start_server(&config, cache.clone()).await.expect("server");

    let mut router = TcpStream::connect(server.local_addr()).await.expect("connect");
    write_pdu(&mut router, &reset_query()).await.expect("write");
    assert!(matches!(
        next_pdu(&mut router).await,
        Pdu::CacheResponse(response) if response.session_id == 0x4242
    ));
    assert!(matches!(next_pdu(&mut router).await, Pdu::Ipv4Prefix(_)));
    assert!(matches!(next_pdu(&mut router).await, Pdu::EndOfData(_)));
    assert_eq!(server.clients().len(), 1);

    let mut refused = TcpStream::connect(server.local_addr()).await.expect("connect");
    let closed = timeout(WAIT, read_frame(&mut refused, MAX_PDU))
        .await
        .expect("refused in time");
    assert!(matches!(closed, Err(FrameError::Closed) | Err(FrameError::Io(_))));

    cache.remove(&"ripe".into()).expect("removed");
    assert!(matches!(
        next_pdu(&mut router).await,
        Pdu::SerialNotify(notify) if notify.serial == Serial(2)
    ));
    server.shutdown();
}

#[tokio::test]
async fn finished_sessions_release_their_slot() {
    let store = Arc::new(SerialStore::with_session(8, 0x4242, Serial(0)));
    let cache = Arc::new(ValidatedCache::new(store));
    cache.update(
        "ripe".into(),
        AnnouncementSet::new([documentation_origin()], vec![]),
    );
    let config = ServerConfig {
        listen: "127.0.0.1:0".parse().expect("addr"),
        max_clients: 1,
        ..ServerConfig::default()
    };
    let server = start_server(&config, cache).await.expect("server");

    let mut broken = TcpStream::connect(server.local_addr()).await.expect("connect");
    broken
        .write_all(&[1u8, 2, 0, 0, 0, 0, 0, 4])
        .await
        .expect("write");
    assert!(matches!(next_pdu(&mut broken).await, Pdu::ErrorReport(_)));
    drop(broken);

    timeout(WAIT, async {
        while !server.clients().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("slot released");

    let mut router = TcpStream::connect(server.local_addr()).await.expect("connect");
    write_pdu(&mut router, &reset_query()).await.expect("write");
    assert!(matches!(next_pdu(&mut router).await, Pdu::CacheResponse(_)));
    server.shutdown();
}
