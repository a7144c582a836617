//! End-to-end tests for the MJPEG fan-out path and the web routes.
//!
//! Raw source (TCP) -> ingest -> distributor -> viewer (TCP, HTTP).
//! Viewers speak HTTP/1.0 so the body arrives unframed until close,
//! the way the appliance's browsers and players receive it.

use bytes::Bytes;
use sleepmon::app::AppContext;
use sleepmon::config::MonitorConfig;
use sleepmon::motion::MotionStatus;
use sleepmon::server;
use sleepmon::streaming::{run_ingest, Distributor, DistributorHandle};
use sleepmon::vitals::VitalsSnapshot;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;

const MARKER: &[u8] = b"--spionisto\r\n";
const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    ingest: SocketAddr,
    web: SocketAddr,
    handle: DistributorHandle,
    motion_tx: watch::Sender<MotionStatus>,
    vitals_tx: watch::Sender<VitalsSnapshot>,
}

async fn start() -> Harness {
    let config = MonitorConfig::default();
    let (distributor, handle) = Distributor::new(config.resume_delay(), config.sink_queue_frames);
    tokio::spawn(distributor.run());

    let (motion_tx, motion_rx) = watch::channel(MotionStatus::default());
    let (vitals_tx, vitals_rx) = watch::channel(VitalsSnapshot::no_reading());
    let ctx = AppContext::new(config, handle.clone(), motion_rx, vitals_rx);

    let ingest = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ingest_addr = ingest.local_addr().unwrap();
    tokio::spawn(run_ingest(ingest, MARKER.to_vec(), handle.clone()));

    let web = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let web_addr = web.local_addr().unwrap();
    tokio::spawn(server::run_server(web, ctx));

    Harness {
        ingest: ingest_addr,
        web: web_addr,
        handle,
        motion_tx,
        vitals_tx,
    }
}

async fn get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(format!("GET {} HTTP/1.0\r\nHost: test\r\n\r\n", path).as_bytes())
        .await
        .unwrap();
    let mut out = String::new();
    timeout(WAIT, stream.read_to_string(&mut out))
        .await
        .unwrap()
        .unwrap();
    out
}

/// Open a viewer and consume the response head.
async fn open_viewer(addr: SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /stream.mjpeg HTTP/1.0\r\nHost: test\r\n\r\n")
        .await
        .unwrap();

    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        timeout(WAIT, stream.read_exact(&mut byte))
            .await
            .unwrap()
            .unwrap();
        head.push(byte[0]);
    }
    let head = String::from_utf8(head).unwrap().to_ascii_lowercase();
    assert!(head.contains(" 200 ok"), "unexpected head: {}", head);
    assert!(head.contains("content-type: multipart/x-mixed-replace; boundary=--spionisto"));
    stream
}

async fn read_exactly(stream: &mut TcpStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    timeout(WAIT, stream.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    buf
}

/// Broadcast a first segment and wait until the viewer sees it.
async fn wait_registered(handle: &DistributorHandle, viewer: &mut TcpStream) {
    let hello = b"hello--spionisto\r\n";
    handle.broadcast(Bytes::from_static(hello)).unwrap();
    assert_eq!(read_exactly(viewer, hello.len()).await, hello.to_vec());
}

#[tokio::test]
async fn test_source_frames_reach_all_viewers() {
    let h = start().await;

    let mut a = open_viewer(h.web).await;
    let mut b = open_viewer(h.web).await;
    wait_registered(&h.handle, &mut a).await;
    let _ = read_exactly(&mut b, b"hello--spionisto\r\n".len()).await;

    let mut source = TcpStream::connect(h.ingest).await.unwrap();
    source.write_all(b"JPEG-ONE--spionisto\r\nJPEG-T").await.unwrap();

    let first = b"JPEG-ONE--spionisto\r\n";
    assert_eq!(read_exactly(&mut a, first.len()).await, first.to_vec());
    assert_eq!(read_exactly(&mut b, first.len()).await, first.to_vec());

    source.write_all(b"WO--spionisto\r\n").await.unwrap();
    let second = b"JPEG-TWO--spionisto\r\n";
    assert_eq!(read_exactly(&mut a, second.len()).await, second.to_vec());
    assert_eq!(read_exactly(&mut b, second.len()).await, second.to_vec());
}

#[tokio::test]
async fn test_disconnected_viewer_does_not_disturb_others() {
    let h = start().await;

    let mut stay = open_viewer(h.web).await;
    let leave = open_viewer(h.web).await;
    wait_registered(&h.handle, &mut stay).await;
    drop(leave);

    for i in 0..20 {
        let seg = format!("frame{:02}--spionisto\r\n", i);
        h.handle.broadcast(Bytes::from(seg.clone())).unwrap();
        assert_eq!(read_exactly(&mut stay, seg.len()).await, seg.into_bytes());
    }
}

#[tokio::test]
async fn test_ping_route() {
    let h = start().await;
    let resp = get(h.web, "/ping").await;
    assert!(resp.contains(" 200 OK"));
    assert!(resp
        .to_ascii_lowercase()
        .contains("access-control-allow-origin: *"));
    assert!(resp.ends_with(r#"{"status":"ready"}"#));
}

#[tokio::test]
async fn test_status_route_reports_fused_alarm() {
    let h = start().await;

    h.motion_tx.send_replace(MotionStatus {
        detected: true,
        sustained: true,
        started: true,
    });
    h.vitals_tx.send_replace(VitalsSnapshot {
        spo2: 96,
        bpm: 64,
        sustained: true,
        status: "OK".to_string(),
        ..VitalsSnapshot::no_reading()
    });

    let resp = get(h.web, "/status").await;
    assert!(resp.contains(" 200 OK"));
    let body = resp.split("\r\n\r\n").nth(1).unwrap();
    let json: serde_json::Value = serde_json::from_str(body).unwrap();

    assert_eq!(json["SPO2"], 96);
    assert_eq!(json["BPM"], 64);
    assert_eq!(json["motion"], 1);
    assert_eq!(json["motionReason"], "CAMERA");
    assert_eq!(json["oximeterStatus"], "OK");
}

#[tokio::test]
async fn test_post_to_stream_is_rejected() {
    let h = start().await;
    let mut stream = TcpStream::connect(h.web).await.unwrap();
    stream
        .write_all(b"POST /stream.mjpeg HTTP/1.0\r\nContent-Length: 0\r\n\r\n")
        .await
        .unwrap();
    let mut out = String::new();
    timeout(WAIT, stream.read_to_string(&mut out))
        .await
        .unwrap()
        .unwrap();
    assert!(out.contains(" 405 Method Not Allowed"));
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let h = start().await;
    let resp = get(h.web, "/nope").await;
    assert!(resp.contains(" 404 Not Found"));
}
