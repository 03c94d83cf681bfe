// src/api/bijson.rs
//! Bidirectional JSON-RPC over TCP, one JSON document per line. Peers call
//! `SMGenericV1.*` and the server calls back `SMGClientV1.DisconnectSession`
//! on the same socket.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::timeout;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{RpcReply, RpcRequest};
use crate::error::ChargingError;
use crate::sessions::{AttrDisconnectSession, BiRpcDispatcher, ClientConnection, ExternalConnections};

pub const DISCONNECT_SESSION: &str = "SMGClientV1.DisconnectSession";

const MAX_LINE_LENGTH: usize = 1024 * 1024;
const OUTBOX_SIZE: usize = 256;

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, ChargingError>>>>>;

// ============================================================================
// Server side view of one peer
// ============================================================================

pub struct BiJsonConnection {
    out: mpsc::Sender<String>,
    pending: Pending,
    next_id: AtomicU64,
    reply_timeout: Duration,
}

impl BiJsonConnection {
    async fn call(&self, method: &str, params: Value) -> Result<Value, ChargingError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let line = json!({ "method": method, "params": params, "id": id }).to_string();
        if self.out.send(line).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(ChargingError::Connection("bijson peer gone".to_string()));
        }
        match timeout(self.reply_timeout, rx).await {
            Ok(Ok(res)) => res,
            Ok(Err(_)) => Err(ChargingError::Connection(
                "bijson peer closed before replying".to_string(),
            )),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(ChargingError::TimedOut)
            }
        }
    }
}

#[async_trait]
impl ClientConnection for BiJsonConnection {
    async fn disconnect_session(&self, args: &AttrDisconnectSession) -> Result<String, ChargingError> {
        let reply = self
            .call(DISCONNECT_SESSION, json!([serde_json::to_value(args)?]))
            .await?;
        Ok(match reply {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }
}

// ============================================================================
// Listener
// ============================================================================

pub struct BiJsonServer {
    rpc: BiRpcDispatcher,
    connections: Arc<ExternalConnections>,
    reply_timeout: Duration,
    shutdown: CancellationToken,
}

impl BiJsonServer {
    pub fn new(rpc: BiRpcDispatcher, reply_timeout: Duration) -> Self {
        let connections = rpc.manager().context().connections.clone();
        Self {
            rpc,
            connections,
            reply_timeout,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn listen(&self, addr: &str) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        info!("📡 BiJSON listening on {}", listener.local_addr()?);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("🛑 BiJSON listener stopped");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((socket, addr)) => {
                        let peer = Peer {
                            rpc: self.rpc.clone(),
                            connections: self.connections.clone(),
                            reply_timeout: self.reply_timeout,
                            shutdown: self.shutdown.child_token(),
                        };
                        tokio::spawn(async move {
                            if let Err(e) = peer.run(socket, addr).await {
                                error!("❌ BiJSON peer {}: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept BiJSON connection: {}", e),
                },
            }
        }
    }
}

struct Peer {
    rpc: BiRpcDispatcher,
    connections: Arc<ExternalConnections>,
    reply_timeout: Duration,
    shutdown: CancellationToken,
}

impl Peer {
    async fn run(self, socket: TcpStream, addr: SocketAddr) -> Result<(), ChargingError> {
        let (mut sink, mut stream) =
            Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)).split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOX_SIZE);
        let writer = tokio::spawn(async move {
            while let Some(line) = out_rx.recv().await {
                if let Err(e) = sink.send(line).await {
                    warn!("BiJSON write failed: {}", e);
                    break;
                }
            }
        });

        let pending: Pending = Arc::default();
        let conn = Arc::new(BiJsonConnection {
            out: out_tx.clone(),
            pending: pending.clone(),
            next_id: AtomicU64::new(1),
            reply_timeout: self.reply_timeout,
        });
        let conn_id = self.connections.add(conn).await;
        info!("🔌 BiJSON peer {} registered as {}", addr, conn_id);

        let result = loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break Ok(()),
                next = stream.next() => match next {
                    None => break Ok(()),
                    Some(Err(e)) => break Err(ChargingError::Connection(e.to_string())),
                    Some(Ok(line)) if line.trim().is_empty() => continue,
                    Some(Ok(line)) => self.on_line(&line, &conn_id, &pending, &out_tx).await,
                },
            }
        };

        self.connections.remove(&conn_id).await;
        writer.abort();
        info!("BiJSON peer {} disconnected", addr);
        result
    }

    async fn on_line(&self, line: &str, conn_id: &str, pending: &Pending, out: &mpsc::Sender<String>) {
        let msg: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                send_reply(out, RpcReply::from_result(Value::Null, Err(e.into()))).await;
                return;
            }
        };
        if msg.get("method").is_none() {
            resolve_reply(pending, &msg).await;
            return;
        }
        let req: RpcRequest = match serde_json::from_value(msg) {
            Ok(r) => r,
            Err(e) => {
                send_reply(out, RpcReply::from_result(Value::Null, Err(e.into()))).await;
                return;
            }
        };
        // a slow call must not hold back the replies the server waits for
        let rpc = self.rpc.clone();
        let out = out.clone();
        let conn_id = conn_id.to_string();
        tokio::spawn(async move {
            let res = rpc.dispatch(Some(conn_id), &req.method, req.params).await;
            send_reply(&out, RpcReply::from_result(req.id, res)).await;
        });
    }
}

async fn send_reply(out: &mpsc::Sender<String>, reply: RpcReply) {
    match serde_json::to_string(&reply) {
        Ok(line) => {
            if out.send(line).await.is_err() {
                debug!("BiJSON reply dropped, peer gone");
            }
        }
        Err(e) => error!("❌ Cannot encode BiJSON reply: {}", e),
    }
}

async fn resolve_reply(pending: &Pending, msg: &Value) {
    let Some(id) = msg.get("id").and_then(Value::as_u64) else {
        warn!("⚠️ BiJSON message without method or numeric id: {}", msg);
        return;
    };
    let Some(tx) = pending.lock().await.remove(&id) else {
        debug!("BiJSON reply for unknown id {}", id);
        return;
    };
    let res = match msg.get("error") {
        None | Some(Value::Null) => Ok(msg.get("result").cloned().unwrap_or(Value::Null)),
        Some(Value::String(e)) => Err(ChargingError::from_rpc_message(e)),
        Some(other) => Err(ChargingError::from_rpc_message(&other.to_string())),
    };
    let _ = tx.send(res);
}
