mod common;

use common::TestServer;
use futures::future::join_all;
use tally::{Error, RequestChannel, protocol::Label};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

fn label(s: &str) -> Label {
    Label::new(s).unwrap()
}

async fn request(addr: &str, name: &str) -> i64 {
    RequestChannel::new(addr, label(name)).await.unwrap()
}

#[tokio::test]
async fn twelve_requests_count_up_then_reset() {
    let server = TestServer::start().await;

    let mut replies = Vec::new();
    for _ in 0..13 {
        replies.push(request(&server.addr, "job").await);
    }

    assert_eq!(replies, [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, -1, 0]);
    server.stop().await;
}

#[tokio::test]
async fn labels_count_independently() {
    let server = TestServer::start().await;

    for expected in 0..5 {
        assert_eq!(request(&server.addr, "a").await, expected);
        assert_eq!(request(&server.addr, "b").await, expected);
    }
    assert_eq!(request(&server.addr, "a").await, 5);
    assert_eq!(server.service.table().get("a"), Some(6));
    assert_eq!(server.service.table().get("b"), Some(5));

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simultaneous_connections_never_repeat_or_skip() {
    let server = TestServer::start().await;

    let replies = join_all((0..11).map(|_| request(&server.addr, "same"))).await;
    let mut sorted = replies.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, (0..=10).collect::<Vec<_>>());

    // Eleven more wrap through the reset: the sentinel once, then 0..=9.
    let replies = join_all((0..11).map(|_| request(&server.addr, "same"))).await;
    let mut sorted = replies.clone();
    sorted.sort_unstable();
    let mut expected = vec![-1];
    expected.extend(0..=9);
    assert_eq!(sorted, expected);

    server.stop().await;
}

#[tokio::test]
async fn replies_are_ascii_decimal_and_connection_closes() {
    let server = TestServer::start().await;
    for _ in 0..11 {
        request(&server.addr, "raw").await;
    }

    let mut stream = TcpStream::connect(&server.addr).await.unwrap();
    stream.write_all(b"raw").await.unwrap();
    let mut bytes = Vec::new();
    stream.read_to_end(&mut bytes).await.unwrap();

    assert_eq!(bytes, b"-1");
    server.stop().await;
}

#[tokio::test]
async fn a_bad_connection_does_not_disturb_others() {
    let server = TestServer::start().await;

    // Not UTF-8: closed without a reply.
    let mut bad = TcpStream::connect(&server.addr).await.unwrap();
    bad.write_all(&[0xc3, 0x28]).await.unwrap();
    let mut bytes = Vec::new();
    bad.read_to_end(&mut bytes).await.unwrap();
    assert!(bytes.is_empty());

    // Connected and walked away.
    drop(TcpStream::connect(&server.addr).await.unwrap());

    assert_eq!(request(&server.addr, "ok").await, 0);
    assert_eq!(server.service.table().len(), 1);
    server.stop().await;
}

#[tokio::test]
async fn refused_connection_is_a_connection_failure() {
    let server = TestServer::start().await;
    let addr = server.addr.clone();
    server.stop().await;

    let err = RequestChannel::new(addr, label("job")).await.unwrap_err();
    assert!(matches!(err, Error::ConnectionFailure { .. }));
}
