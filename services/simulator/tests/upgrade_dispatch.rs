// Upgrade and dispatch: raw-socket handshake, first command round-trip, and
// the 404 fallthrough for unknown paths.

use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use origin_test_utils::{loopback, SimClient, SAMPLE_KEY};
use simulator::{Simulator, SimulatorConfig};

fn test_config() -> SimulatorConfig {
    SimulatorConfig {
        port: 0,
        enable_discovery: false,
        ..SimulatorConfig::default()
    }
}

#[tokio::test]
async fn handshake_returns_the_rfc_accept_value() {
    let simulator = Simulator::start(test_config()).await.expect("start");
    let client = SimClient::connect_with_key(simulator.local_addr(), SAMPLE_KEY)
        .await
        .expect("upgrade");
    assert_eq!(client.accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    simulator.shutdown().await;
}

#[tokio::test]
async fn get_version_round_trips_with_the_inbound_sequence_id() {
    let simulator = Simulator::start(test_config()).await.expect("start");
    let mut client = SimClient::connect(simulator.local_addr()).await.expect("upgrade");

    client
        .send_json(&json!({
            "Command": "GetVersion",
            "Destination": "System",
            "Source": "C",
            "SequenceID": 1,
            "Type": "Command",
        }))
        .await
        .expect("send");

    let response = client
        .response_for(1, Duration::from_secs(5))
        .await
        .expect("response expected");
    assert_eq!(response["Command"], "GetVersion");
    assert_eq!(response["Source"], "System");
    assert_eq!(response["Destination"], "C");
    assert_eq!(response["SequenceID"], 1);
    assert_eq!(response["Type"], "Response");
    assert_eq!(response["Number"], "1.1.4248");

    simulator.shutdown().await;
}

#[tokio::test]
async fn each_command_gets_exactly_one_response_before_activity_noise() {
    let simulator = Simulator::start(test_config()).await.expect("start");
    let mut client = SimClient::connect(simulator.local_addr()).await.expect("upgrade");

    for seq in 1..=5 {
        client
            .send_json(&json!({
                "Command": "GetModel",
                "Destination": "System",
                "Source": "C",
                "SequenceID": seq,
                "Type": "Command",
            }))
            .await
            .expect("send");
        let response = client
            .response_for(seq, Duration::from_secs(5))
            .await
            .expect("response expected");
        assert_eq!(response["Value"], "Origin");
        assert_eq!(response["Devices"].as_array().map(Vec::len), Some(12));
    }

    simulator.shutdown().await;
}

#[tokio::test]
async fn upgrade_without_a_key_is_a_bad_request() {
    let simulator = Simulator::start(test_config()).await.expect("start");
    let mut stream = TcpStream::connect(loopback(simulator.local_addr())).await.expect("connect");
    stream
        .write_all(
            b"GET /SmartScope-1.0/mountControlEndpoint HTTP/1.1\r\n\
              Host: x\r\n\
              Upgrade: websocket\r\n\
              Connection: Upgrade\r\n\
              \r\n",
        )
        .await
        .expect("write");

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.expect("read");
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 400 Bad Request"));

    simulator.shutdown().await;
}

#[tokio::test]
async fn unknown_paths_get_a_404_and_a_close() {
    let simulator = Simulator::start(test_config()).await.expect("start");
    let mut stream = TcpStream::connect(loopback(simulator.local_addr())).await.expect("connect");
    stream
        .write_all(b"GET /nowhere HTTP/1.1\r\nHost: x\r\n\r\n")
        .await
        .expect("write");

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.expect("read");
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 404 Not Found"));
    assert!(text.contains("Connection: close"));

    simulator.shutdown().await;
}

#[tokio::test]
async fn malformed_request_lines_are_dropped_silently() {
    let simulator = Simulator::start(test_config()).await.expect("start");
    let mut stream = TcpStream::connect(loopback(simulator.local_addr())).await.expect("connect");
    stream.write_all(b"NONSENSE\r\n\r\n").await.expect("write");

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.expect("read");
    assert!(response.is_empty(), "no response for a malformed request line");

    simulator.shutdown().await;
}

#[tokio::test]
async fn initial_status_burst_arrives_after_connecting() {
    let simulator = Simulator::start(test_config()).await.expect("start");
    let mut client = SimClient::connect(simulator.local_addr()).await.expect("upgrade");

    let seen = client.collect_json_for(Duration::from_millis(1800)).await;
    let sources: Vec<&str> = seen.iter().filter_map(|v| v["Source"].as_str()).collect();
    for subsystem in ["Mount", "Focuser", "Camera", "Disk", "TaskController"] {
        assert!(
            sources.contains(&subsystem),
            "expected an initial {subsystem} notification, got {sources:?}"
        );
    }

    simulator.shutdown().await;
}
