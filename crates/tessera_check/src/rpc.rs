//! JSON-over-TCP clients for the Tessera control plane.
//!
//! Every request is one newline-delimited JSON object on a fresh
//! connection. Replies are a single object, except checksum scans, which
//! stream progress events until a terminal line. Error replies carry an
//! `error` field in place of the payload.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use anyhow::{bail, Context};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::debug;

use crate::checksum::ChecksumOptions;
use crate::cluster::{Table, TableSchema, Tablet};
use crate::remote::{Master, TabletServer, TabletState, TabletStatus};
use crate::reporter::ScanProgress;

/// Upper bound on one wire line.
const MAX_LINE_LEN: usize = 4 * 1024 * 1024;

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request<'a> {
    Ping,
    ListTables,
    ListTablets {
        table: &'a str,
    },
    ListTabletServers,
    FetchInfo,
    ChecksumScan {
        tablet_id: &'a str,
        columns: &'a [String],
        snapshot_timestamp: Option<u64>,
    },
}

#[derive(Debug, Deserialize)]
struct ErrorReply {
    error: String,
}

#[derive(Debug, Deserialize)]
struct TableListReply {
    tables: Vec<TableEntry>,
}

#[derive(Debug, Deserialize)]
struct TableEntry {
    name: String,
    num_replicas: usize,
    #[serde(default)]
    schema: TableSchema,
}

#[derive(Debug, Deserialize)]
struct TabletListReply {
    tablets: Vec<Tablet>,
}

#[derive(Debug, Deserialize)]
struct ServerListReply {
    tablet_servers: Vec<ServerEntry>,
}

#[derive(Debug, Deserialize)]
struct ServerEntry {
    uuid: String,
    address: String,
}

#[derive(Debug, Deserialize)]
struct FetchInfoReply {
    timestamp: u64,
    #[serde(default)]
    tablets: BTreeMap<String, TabletStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum ScanEvent {
    Progress { rows: u64, bytes: u64 },
    Finished { checksum: u64 },
}

type Conn = Framed<TcpStream, LinesCodec>;

async fn open(addr: &str) -> anyhow::Result<Conn> {
    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("connect to {addr}"))?;
    Ok(Framed::new(
        stream,
        LinesCodec::new_with_max_length(MAX_LINE_LEN),
    ))
}

async fn send(conn: &mut Conn, request: &Request<'_>) -> anyhow::Result<()> {
    let line = serde_json::to_string(request).context("encode request")?;
    conn.send(line).await.context("send request")?;
    Ok(())
}

async fn recv_line(conn: &mut Conn) -> anyhow::Result<String> {
    match conn.next().await {
        Some(line) => line.context("read reply"),
        None => bail!("connection closed before reply"),
    }
}

fn decode_reply<T: DeserializeOwned>(line: &str) -> anyhow::Result<T> {
    if let Ok(reply) = serde_json::from_str::<ErrorReply>(line) {
        bail!("remote error: {}", reply.error);
    }
    serde_json::from_str(line).with_context(|| format!("decode reply: {line}"))
}

async fn call<T: DeserializeOwned>(addr: &str, request: &Request<'_>) -> anyhow::Result<T> {
    let mut conn = open(addr).await?;
    send(&mut conn, request).await?;
    let line = recv_line(&mut conn).await?;
    decode_reply(&line)
}

/// Master client over the Tessera control-plane wire protocol.
pub struct RpcMaster {
    addr: String,
}

impl RpcMaster {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl Master for RpcMaster {
    async fn connect(&self) -> anyhow::Result<()> {
        let _: serde_json::Value = call(&self.addr, &Request::Ping).await?;
        Ok(())
    }

    async fn list_tables(&self) -> anyhow::Result<Vec<Table>> {
        let reply: TableListReply = call(&self.addr, &Request::ListTables).await?;
        Ok(reply
            .tables
            .into_iter()
            .map(|entry| Table {
                name: entry.name,
                num_replicas: entry.num_replicas,
                schema: entry.schema,
                tablets: Vec::new(),
            })
            .collect())
    }

    async fn list_tablets(&self, table_name: &str) -> anyhow::Result<Vec<Tablet>> {
        let reply: TabletListReply =
            call(&self.addr, &Request::ListTablets { table: table_name }).await?;
        Ok(reply.tablets)
    }

    async fn list_tablet_servers(
        &self,
    ) -> anyhow::Result<BTreeMap<String, Arc<dyn TabletServer>>> {
        let reply: ServerListReply = call(&self.addr, &Request::ListTabletServers).await?;
        let mut servers: BTreeMap<String, Arc<dyn TabletServer>> = BTreeMap::new();
        for entry in reply.tablet_servers {
            servers.insert(
                entry.uuid.clone(),
                Arc::new(RpcTabletServer::new(entry.uuid, entry.address)),
            );
        }
        Ok(servers)
    }
}

#[derive(Debug, Default)]
struct ServerInfo {
    healthy: bool,
    timestamp: u64,
    tablets: BTreeMap<String, TabletStatus>,
}

/// Tablet server client. `fetch_info` populates the cached state that the
/// read-only accessors serve.
pub struct RpcTabletServer {
    uuid: String,
    address: String,
    info: RwLock<ServerInfo>,
}

impl RpcTabletServer {
    pub fn new(uuid: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            address: address.into(),
            info: RwLock::new(ServerInfo::default()),
        }
    }

    fn read_info<R>(&self, read: impl FnOnce(&ServerInfo) -> R) -> R {
        let info = self.info.read().unwrap_or_else(|e| e.into_inner());
        read(&info)
    }
}

#[async_trait]
impl TabletServer for RpcTabletServer {
    fn uuid(&self) -> &str {
        &self.uuid
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&self) -> anyhow::Result<()> {
        let _: serde_json::Value = call(&self.address, &Request::Ping).await?;
        Ok(())
    }

    async fn fetch_info(&self) -> anyhow::Result<()> {
        let fetched: anyhow::Result<FetchInfoReply> =
            call(&self.address, &Request::FetchInfo).await;
        let mut info = self.info.write().unwrap_or_else(|e| e.into_inner());
        match fetched {
            Ok(reply) => {
                info.healthy = true;
                info.timestamp = reply.timestamp;
                info.tablets = reply.tablets;
                Ok(())
            }
            Err(err) => {
                info.healthy = false;
                Err(err)
            }
        }
    }

    fn is_healthy(&self) -> bool {
        self.read_info(|info| info.healthy)
    }

    fn current_timestamp(&self) -> u64 {
        self.read_info(|info| info.timestamp)
    }

    fn replica_state(&self, tablet_id: &str) -> TabletState {
        self.read_info(|info| {
            info.tablets
                .get(tablet_id)
                .map(|status| status.state)
                .unwrap_or_default()
        })
    }

    fn tablet_status(&self, tablet_id: &str) -> Option<TabletStatus> {
        self.read_info(|info| info.tablets.get(tablet_id).cloned())
    }

    async fn checksum_tablet(
        &self,
        tablet_id: &str,
        schema: &TableSchema,
        options: &ChecksumOptions,
        progress: ScanProgress,
    ) -> anyhow::Result<u64> {
        let mut conn = open(&self.address).await?;
        send(
            &mut conn,
            &Request::ChecksumScan {
                tablet_id,
                columns: &schema.columns,
                snapshot_timestamp: options.use_snapshot.then_some(options.snapshot_timestamp),
            },
        )
        .await?;
        loop {
            let line = recv_line(&mut conn)
                .await
                .with_context(|| format!("checksum scan of tablet {tablet_id} on {}", self.uuid))?;
            match decode_reply::<ScanEvent>(&line)? {
                ScanEvent::Progress { rows, bytes } => progress.record(rows, bytes),
                ScanEvent::Finished { checksum } => {
                    debug!(
                        tablet = %tablet_id,
                        server = %self.uuid,
                        checksum,
                        "checksum scan finished"
                    );
                    return Ok(checksum);
                }
            }
        }
    }
}
