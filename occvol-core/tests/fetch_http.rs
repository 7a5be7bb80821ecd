//! HTTP report source against a one-shot local server.

use chrono::NaiveDate;
use occvol_core::data::{
    parse_report, DataError, OccReportSource, ReportSource, TransportKind, UnavailableKind,
};
use occvol_core::MemoryLog;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Serve one response, reporting the request line back to the test.
fn serve_once(status: &str, body: &str) -> (String, mpsc::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::channel();
    let status = status.to_string();
    let body = body.to_string();

    thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let request = read_request(&mut stream);
            let _ = tx.send(request.lines().next().unwrap_or_default().to_string());
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(response.as_bytes());
        }
    });

    (format!("http://{addr}/daily-volume"), rx)
}

fn source(url: &str, timeout: Duration) -> OccReportSource {
    OccReportSource::new(url, "CSV", timeout, Arc::new(MemoryLog::new())).unwrap()
}

#[test]
fn fetch_sends_report_date_and_format() {
    let body = std::fs::read_to_string(
        std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures/blank_separated_2021_12.csv"),
    )
    .unwrap();
    let (url, requests) = serve_once("200 OK", &body);

    let raw = source(&url, Duration::from_secs(5))
        .fetch(d(2021, 12, 17))
        .unwrap();

    let request_line = requests.recv().unwrap();
    assert!(request_line.starts_with("GET /daily-volume?"));
    assert!(request_line.contains("reportDate=20211201"));
    assert!(request_line.contains("format=csv"));
    assert_eq!(raw.month, d(2021, 12, 1));
    assert_eq!(parse_report(&raw.text).unwrap().contracts.data_lines().len(), 2);
}

#[test]
fn slow_server_is_a_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let _ = read_request(&mut stream);
            thread::sleep(Duration::from_secs(3));
        }
    });

    let err = source(&format!("http://{addr}/"), Duration::from_millis(200))
        .fetch(d(2024, 1, 1))
        .unwrap_err();
    assert!(
        matches!(
            err,
            DataError::Transport {
                kind: TransportKind::Timeout,
                ..
            }
        ),
        "got {err:?}"
    );
}

#[test]
fn refused_connection_is_a_connection_error() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let err = source(&format!("http://127.0.0.1:{port}/"), Duration::from_secs(2))
        .fetch(d(2024, 1, 1))
        .unwrap_err();
    assert!(matches!(
        err,
        DataError::Transport {
            kind: TransportKind::Connection,
            ..
        }
    ));
}

#[test]
fn error_status_is_a_connection_error() {
    let (url, _requests) = serve_once("500 Internal Server Error", "oops");
    let err = source(&url, Duration::from_secs(5))
        .fetch(d(2024, 1, 1))
        .unwrap_err();
    match err {
        DataError::Transport { kind, detail } => {
            assert_eq!(kind, TransportKind::Connection);
            assert!(detail.contains("500"));
        }
        other => panic!("expected Transport, got {other:?}"),
    }
}

#[test]
fn sentinel_bodies_are_unavailable() {
    for (body, expected) in [
        ("<p>Invalid report Date</p>", UnavailableKind::InvalidReportDate),
        ("Report is not available", UnavailableKind::NotPublished),
    ] {
        let (url, _requests) = serve_once("200 OK", body);
        let err = source(&url, Duration::from_secs(5))
            .fetch(d(2007, 12, 1))
            .unwrap_err();
        match err {
            DataError::Unavailable { month, kind } => {
                assert_eq!(month, d(2007, 12, 1));
                assert_eq!(kind, expected);
            }
            other => panic!("expected Unavailable, got {other:?}"),
        }
    }
}
