//! Helpers for the end-to-end tests: free ports, key material, a russh
//! client, output collection and a byte-counting TCP relay.

#![allow(dead_code)]

use std::{
    net::TcpListener, sync::{
        Arc, atomic::{AtomicU64, Ordering}
    }, time::Duration
};

use client_core::{ClientResult, TargetClientHandler, TargetConfig, connect_target};
use russh::{
    ChannelMsg, client::{self, Handle}, keys::{
        Algorithm, PrivateKey, ssh_key::{LineEnding, rand_core::OsRng}
    }
};
use server_core::{DaemonConfig, run_daemon};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt}, net::TcpStream, task::JoinHandle, time::sleep
};

pub fn pick_free_port() -> u16 {
    TcpListener::bind(("127.0.0.1", 0))
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .unwrap()
}

pub struct KeyPair {
    pub private_pem: String,
    pub authorized_line: String,
    pub key: PrivateKey,
}

pub fn key_pair() -> KeyPair {
    let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
    KeyPair {
        private_pem: key.to_openssh(LineEnding::LF).unwrap().to_string(),
        authorized_line: key.public_key().to_openssh().unwrap(),
        key,
    }
}

/// Wait until something accepts connections on `address`.
pub async fn wait_for_listener(address: &str) {
    for _ in 0..100 {
        if TcpStream::connect(address).await.is_ok() {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("nothing listening on {address}");
}

/// Start a daemon accepting `client` and return its address.
pub async fn start_daemon(client: &KeyPair, host_key: Option<&KeyPair>) -> String {
    start_daemon_with(client, host_key, Duration::from_secs(60)).await
}

pub async fn start_daemon_with(client: &KeyPair, host_key: Option<&KeyPair>, keepalive_interval: Duration) -> String {
    let address = format!("127.0.0.1:{}", pick_free_port());
    let config = DaemonConfig {
        address: address.clone(),
        host_key: host_key.map(|k| k.private_pem.clone().into()),
        authorized_key: Some(client.authorized_line.clone()),
        keepalive_interval,
        ..Default::default()
    };
    tokio::spawn(run_daemon(config));
    wait_for_listener(&address).await;
    address
}

pub fn client_config() -> Arc<client::Config> {
    Arc::new(client::Config {
        preferred: ssh_core::crypto::default_preferred(),
        ..Default::default()
    })
}

pub async fn connect(address: &str, key: &KeyPair) -> ClientResult<Handle<TargetClientHandler>> {
    let target = TargetConfig {
        address: address.to_string(),
        user: "tester".into(),
        private_key: key.private_pem.clone(),
        ..Default::default()
    };
    connect_target(&target, client_config(), TargetClientHandler::new).await
}

#[derive(Debug, Default)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: Option<u32>,
    pub exit_signal: Option<String>,
}

/// Run `command` on a fresh session channel, optionally with a pty of `(columns, rows)`.
pub async fn exec<H>(handle: &Handle<H>, command: &str, pty: Option<(u32, u32)>) -> ExecOutput
where
    H: client::Handler,
{
    let mut channel = handle.channel_open_session().await.unwrap();
    if let Some((columns, rows)) = pty {
        channel.request_pty(true, "xterm", columns, rows, 0, 0, &[]).await.unwrap();
    }
    channel.exec(true, command).await.unwrap();

    let mut output = ExecOutput::default();
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let collect = async {
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
                ChannelMsg::ExtendedData { data, ext: 1 } => stderr.extend_from_slice(&data),
                ChannelMsg::ExitStatus { exit_status } => output.exit_status = Some(exit_status),
                ChannelMsg::ExitSignal { signal_name, .. } => output.exit_signal = Some(format!("{signal_name:?}")),
                ChannelMsg::Close => break,
                _ => {}
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(20), collect)
        .await
        .expect("command did not finish");
    output.stdout = String::from_utf8_lossy(&stdout).into_owned();
    output.stderr = String::from_utf8_lossy(&stderr).into_owned();
    output
}

/// Relays one TCP connection to a target and counts the bytes sent back.
pub struct CountingRelay {
    pub address: String,
    to_client: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl CountingRelay {
    pub async fn start(target: &str) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let to_client = Arc::new(AtomicU64::new(0));
        let counter = to_client.clone();
        let target = target.to_string();
        let task = tokio::spawn(async move {
            let (client, _) = listener.accept().await.unwrap();
            let server = TcpStream::connect(&target).await.unwrap();
            let (mut client_read, mut client_write) = client.into_split();
            let (mut server_read, mut server_write) = server.into_split();
            let upstream = tokio::io::copy(&mut client_read, &mut server_write);
            let downstream = async {
                let mut buf = vec![0u8; 4096];
                loop {
                    let n = match server_read.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => n,
                    };
                    if client_write.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                    counter.fetch_add(n as u64, Ordering::SeqCst);
                }
            };
            tokio::select! {
                _ = upstream => {}
                _ = downstream => {}
            }
        });
        Self { address, to_client, task }
    }

    pub fn bytes_to_client(&self) -> u64 {
        self.to_client.load(Ordering::SeqCst)
    }

    /// Drop both sockets, as if the client host vanished.
    pub fn cut(&self) {
        self.task.abort();
    }
}
