#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::{path::Path, time::Duration};

use hermod::{Hermod, config};
use pretty_assertions::assert_eq;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    sync::oneshot,
};

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .expect("free port")
        .port()
}

fn server(root: &Path, port: u16) -> Hermod {
    let mailbox = root.join("bob");
    let spool = root.join("spool");

    config::parse(&format!(
        r#"(
            policy: (local_domains: ["local.test"]),
            users: (accounts: [(address: "bob@local.test", mailbox: Some("{}"))]),
            smtp: (listeners: [(socket: "127.0.0.1:{port}", timeouts: (poll_secs: 1, command_secs: 30))]),
            spool: File(path: "{}"),
            delivery: (
                scan_interval_secs: 1,
                max_sleep_slice_secs: 1,
                transport: (relay_host: Some("127.0.0.1:1")),
            ),
            shutdown_timeout_secs: 10,
            delivery_join_timeout_secs: 5,
        )"#,
        mailbox.display(),
        spool.display()
    ))
    .expect("valid config")
}

struct Client {
    stream: BufReader<TcpStream>,
}

impl Client {
    async fn connect(port: u16) -> Self {
        for _ in 0..50 {
            if let Ok(stream) = TcpStream::connect(("127.0.0.1", port)).await {
                return Self {
                    stream: BufReader::new(stream),
                };
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("server never started listening on {port}");
    }

    async fn reply(&mut self) -> String {
        let mut line = String::new();
        self.stream.read_line(&mut line).await.expect("read reply");
        line.trim_end().to_string()
    }

    async fn send(&mut self, line: &str) {
        self.stream
            .get_mut()
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .expect("write command");
    }

    async fn exchange(&mut self, line: &str) -> String {
        self.send(line).await;
        self.reply().await
    }
}

async fn wait_for_message(mailbox: &Path) -> String {
    for _ in 0..100 {
        if let Ok(mut entries) = std::fs::read_dir(mailbox)
            && let Some(Ok(entry)) = entries.next()
            && let Ok(message) = std::fs::read_to_string(entry.path())
            && message.contains("hello world")
        {
            return message;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("nothing delivered to {}", mailbox.display());
}

#[test]
fn sample_configuration_parses() {
    let hermod = config::parse(include_str!("../../hermod.config.ron")).expect("valid sample");

    assert_eq!(hermod.shutdown_timeout(), Duration::from_secs(60));
    assert_eq!(hermod.delivery_join_timeout(), Duration::from_secs(10));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn accepted_mail_reaches_the_local_mailbox() {
    let root = tempfile::tempdir().expect("tempdir");
    let port = free_port();
    let hermod = server(root.path(), port);

    let (stop, stopped) = oneshot::channel::<()>();
    let running = tokio::spawn(hermod.run_until(async move {
        let _ = stopped.await;
        Ok(())
    }));

    let mut client = Client::connect(port).await;
    assert_eq!(client.reply().await, "220 Welcome to SMTP Server.");
    assert_eq!(client.exchange("HELO client.test").await, "250 Hello client.test");
    assert_eq!(client.exchange("MAIL FROM:<alice@remote.test>").await, "250 OK");
    assert_eq!(client.exchange("RCPT TO:<bob@local.test>").await, "250 OK");
    assert_eq!(
        client.exchange("DATA").await,
        "354 Start mail input; end with <CRLF>.<CRLF>"
    );
    client.send("Subject: hi").await;
    client.send("").await;
    client.send("hello world").await;
    assert_eq!(client.exchange(".").await, "250 OK");
    assert_eq!(client.exchange("QUIT").await, "221 SMTP server signing off.");

    let message = wait_for_message(&root.path().join("bob")).await;
    assert!(message.contains("Subject: hi"));

    stop.send(()).expect("server still running");
    tokio::time::timeout(Duration::from_secs(15), running)
        .await
        .expect("shutdown within bounds")
        .expect("controller task")
        .expect("clean shutdown");

    let spooled = std::fs::read_dir(root.path().join("spool"))
        .expect("spool directory")
        .filter_map(Result::ok)
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "ron"))
        .count();
    assert_eq!(spooled, 0);
}

#[tokio::test]
async fn occupied_socket_aborts_startup() {
    let root = tempfile::tempdir().expect("tempdir");
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = occupied.local_addr().expect("local address").port();

    let result = server(root.path(), port)
        .run_until(std::future::pending())
        .await;

    assert!(result.is_err());
    drop(occupied);
}

#[tokio::test]
async fn stop_errors_are_returned_after_shutdown() {
    let root = tempfile::tempdir().expect("tempdir");
    let hermod = server(root.path(), free_port());

    let result = tokio::time::timeout(
        Duration::from_secs(15),
        hermod.run_until(async { Err(anyhow::anyhow!("signal handler failed")) }),
    )
    .await
    .expect("shutdown within bounds");

    let err = result.expect_err("stop error surfaces");
    assert_eq!(err.to_string(), "signal handler failed");
}
