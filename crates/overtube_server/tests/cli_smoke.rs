#![forbid(unsafe_code)]

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_tungstenite::tungstenite::Error as WsError;

const BIN: &str = env!("CARGO_BIN_EXE_overtube_server");

fn free_port() -> u16 {
	let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
	listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn help_prints_usage() {
	let out = Command::new(BIN).arg("--help").output().await.unwrap();
	assert_eq!(out.status.code(), Some(2));
	let stderr = String::from_utf8_lossy(&out.stderr);
	assert!(stderr.contains("Usage: overtube_server"));
	assert!(stderr.contains("set <youtube|twitch> <channel>"));
}

#[tokio::test]
async fn unknown_argument_is_rejected() {
	let out = Command::new(BIN).arg("--frobnicate").output().await.unwrap();
	assert_eq!(out.status.code(), Some(2));
	assert!(String::from_utf8_lossy(&out.stderr).contains("Unknown argument: --frobnicate"));
}

#[tokio::test]
async fn serves_overlay_socket_and_exits_on_command() {
	let dir = tempfile::tempdir().unwrap();
	let config = dir.path().join("config.toml");
	let state = dir.path().join("state.json");
	std::fs::write(
		&config,
		format!("[server]\nstate_path = {:?}\nsettle_delay_ms = 0\n", state.display().to_string()),
	)
	.unwrap();

	let port = free_port();
	let mut child = Command::new(BIN)
		.args(["--bind", &format!("127.0.0.1:{port}"), "--config"])
		.arg(&config)
		.env("HOME", dir.path())
		.env("RUST_LOG", "warn")
		.env_remove("OTEL_EXPORTER_OTLP_ENDPOINT")
		.stdin(Stdio::piped())
		.stdout(Stdio::null())
		.stderr(Stdio::null())
		.kill_on_drop(true)
		.spawn()
		.unwrap();

	let url = format!("ws://127.0.0.1:{port}/ws");
	let deadline = Instant::now() + Duration::from_secs(10);
	let status = loop {
		match tokio_tungstenite::connect_async(url.as_str()).await {
			Err(WsError::Http(resp)) => break resp.status().as_u16(),
			Err(_) if Instant::now() < deadline => tokio::time::sleep(Duration::from_millis(50)).await,
			Err(e) => panic!("server never came up: {e}"),
			Ok(_) => panic!("overlay admitted with no active streams"),
		}
	};
	assert_eq!(status, 503);

	let mut stdin = child.stdin.take().unwrap();
	stdin.write_all(b"bogus\nexit\n").await.unwrap();
	stdin.flush().await.unwrap();

	let exit = tokio::time::timeout(Duration::from_secs(10), child.wait())
		.await
		.expect("server did not exit")
		.unwrap();
	assert!(exit.success());
}
