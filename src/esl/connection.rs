// src/esl/connection.rs
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::ChargingError;
use crate::esl::event::EslEvent;

/// Commands the FreeSWITCH adapter sends over an event socket.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EslCommands: Send + Sync {
    /// Runs an `api` command and returns its body.
    async fn api(&self, cmd: &str) -> Result<String, ChargingError>;

    /// Sends a `sendmsg` with the given headers to a channel.
    async fn sendmsg(&self, uuid: &str, headers: Vec<(String, String)>) -> Result<(), ChargingError>;
}

struct Writer {
    half: OwnedWriteHalf,
    /// Replies are delivered in command order.
    pending: VecDeque<oneshot::Sender<EslEvent>>,
}

pub struct EslConnection {
    writer: Arc<Mutex<Writer>>,
    server_id: String,
    closed: CancellationToken,
}

fn conn_err(e: impl std::fmt::Display) -> ChargingError {
    ChargingError::Connection(e.to_string())
}

impl EslConnection {
    /// Connects, authenticates and subscribes. Events are delivered on the
    /// returned channel until the socket closes.
    pub async fn connect(
        host: &str,
        port: u16,
        password: &str,
        events: &[&str],
    ) -> Result<(Arc<Self>, mpsc::Receiver<EslEvent>), ChargingError> {
        let server_id = format!("{}:{}", host, port);
        info!("Connecting to FreeSWITCH ESL: {}", server_id);
        let stream = TcpStream::connect(&server_id).await.map_err(conn_err)?;
        Self::handshake(stream, server_id, password, events).await
    }

    pub async fn handshake(
        stream: TcpStream,
        server_id: String,
        password: &str,
        events: &[&str],
    ) -> Result<(Arc<Self>, mpsc::Receiver<EslEvent>), ChargingError> {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let greeting = read_frame(&mut reader).await.map_err(conn_err)?;
        if !greeting.map_or(false, |g| g.contains("Content-Type: auth/request")) {
            return Err(conn_err("invalid greeting from FreeSWITCH"));
        }
        debug!("Received auth request from {}", server_id);

        write_half
            .write_all(format!("auth {}\n\n", password).as_bytes())
            .await
            .map_err(conn_err)?;
        let auth = read_frame(&mut reader).await.map_err(conn_err)?;
        if !auth.map_or(false, |a| a.contains("Reply-Text: +OK")) {
            return Err(conn_err("authentication failed"));
        }
        info!("✅ Authenticated to FreeSWITCH: {}", server_id);

        for cmd in [
            format!("event plain {}\n\n", events.join(" ")),
            "filter Call-Direction inbound\n\n".to_string(),
        ] {
            write_half.write_all(cmd.as_bytes()).await.map_err(conn_err)?;
            let reply = read_frame(&mut reader).await.map_err(conn_err)?;
            if !reply.map_or(false, |r| r.contains("Reply-Text: +OK")) {
                return Err(conn_err(format!("command refused: {}", cmd.trim())));
            }
        }
        info!("✅ Subscribed to events: {}", server_id);

        let conn = Arc::new(Self {
            writer: Arc::new(Mutex::new(Writer {
                half: write_half,
                pending: VecDeque::new(),
            })),
            server_id,
            closed: CancellationToken::new(),
        });
        let (tx, rx) = mpsc::channel(1024);
        tokio::spawn(read_loop(reader, conn.writer.clone(), tx, conn.closed.clone(), conn.server_id.clone()));
        Ok((conn, rx))
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Fires once the reader stopped.
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    async fn command(&self, cmd: &str) -> Result<EslEvent, ChargingError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut w = self.writer.lock().await;
            w.half.write_all(cmd.as_bytes()).await.map_err(conn_err)?;
            w.half.flush().await.map_err(conn_err)?;
            w.pending.push_back(tx);
        }
        rx.await
            .map_err(|_| conn_err(format!("connection to {} closed", self.server_id)))
    }
}

#[async_trait]
impl EslCommands for EslConnection {
    async fn api(&self, cmd: &str) -> Result<String, ChargingError> {
        let reply = self.command(&format!("api {}\n\n", cmd)).await?;
        let body = reply.body.unwrap_or_default();
        if body.starts_with("-ERR") {
            return Err(ChargingError::ServerError(body));
        }
        Ok(body)
    }

    async fn sendmsg(&self, uuid: &str, headers: Vec<(String, String)>) -> Result<(), ChargingError> {
        let mut cmd = format!("sendmsg {}\n", uuid);
        for (k, v) in &headers {
            cmd.push_str(&format!("{}: {}\n", k, v));
        }
        cmd.push('\n');
        let reply = self.command(&cmd).await?;
        match reply.get_header("Reply-Text") {
            Some(text) if text.starts_with("+OK") => Ok(()),
            other => Err(ChargingError::ServerError(other.cloned().unwrap_or_default())),
        }
    }
}

async fn read_loop(
    mut reader: BufReader<OwnedReadHalf>,
    writer: Arc<Mutex<Writer>>,
    events: mpsc::Sender<EslEvent>,
    closed: CancellationToken,
    server_id: String,
) {
    loop {
        let frame = match read_frame(&mut reader).await {
            Ok(Some(f)) => f,
            Ok(None) => break,
            Err(e) => {
                error!("Error reading from {}: {}", server_id, e);
                break;
            }
        };
        let Some(msg) = EslEvent::parse(&frame) else {
            continue;
        };
        match msg.get_header("Content-Type").map(String::as_str) {
            Some("api/response") | Some("command/reply") => {
                let waiter = writer.lock().await.pending.pop_front();
                match waiter {
                    Some(w) => {
                        let _ = w.send(msg);
                    }
                    None => warn!("Unsolicited reply from {}", server_id),
                }
            }
            Some("text/disconnect-notice") => {
                info!("FreeSWITCH {} sent disconnect notice", server_id);
                break;
            }
            _ if msg.event_name().is_some() => {
                if events.send(msg).await.is_err() {
                    break;
                }
            }
            other => debug!("Ignoring {:?} frame from {}", other, server_id),
        }
    }
    writer.lock().await.pending.clear();
    closed.cancel();
}

/// Reads one frame: headers up to a blank line plus `Content-Length` bytes
/// of body. `None` on a clean EOF.
async fn read_frame<R: AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<Option<String>> {
    let mut response = String::new();
    let mut content_length: Option<usize> = None;

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            if response.is_empty() {
                continue;
            }
            break;
        }
        if let Some(len) = line.strip_prefix("Content-Length:") {
            content_length = len.trim().parse().ok();
        }
        response.push_str(line);
        response.push('\n');
    }
    response.push('\n');

    if let Some(len) = content_length {
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await?;
        response.push_str(&String::from_utf8_lossy(&body));
    }
    Ok(Some(response))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Minimal event socket server: accepts auth, acknowledges commands,
    /// answers `api` with the canned body and pushes the queued events.
    pub(crate) async fn fake_freeswitch(
        api_body: &'static str,
        events: Vec<String>,
    ) -> (std::net::SocketAddr, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (r, mut w) = socket.into_split();
            let mut r = BufReader::new(r);
            w.write_all(b"Content-Type: auth/request\n\n").await.unwrap();
            let mut subscribed = false;
            loop {
                let Ok(Some(frame)) = read_frame(&mut r).await else {
                    break;
                };
                let first = frame.lines().next().unwrap_or_default().to_string();
                let _ = seen_tx.send(first.clone());
                if first.starts_with("api ") {
                    let reply = format!(
                        "Content-Type: api/response\nContent-Length: {}\n\n{}",
                        api_body.len(),
                        api_body
                    );
                    w.write_all(reply.as_bytes()).await.unwrap();
                } else {
                    w.write_all(b"Content-Type: command/reply\nReply-Text: +OK accepted\n\n")
                        .await
                        .unwrap();
                }
                if first.starts_with("filter") && !subscribed {
                    subscribed = true;
                    for ev in &events {
                        let frame = format!(
                            "Content-Length: {}\nContent-Type: text/event-plain\n\n{}",
                            ev.len(),
                            ev
                        );
                        w.write_all(frame.as_bytes()).await.unwrap();
                    }
                }
            }
        });
        (addr, seen_rx)
    }

    #[tokio::test]
    async fn test_connect_api_and_events() {
        let event = "Event-Name: CHANNEL_ANSWER\nUnique-ID: u1\n".to_string();
        let (addr, mut seen) = fake_freeswitch("+OK done", vec![event]).await;
        let (conn, mut events) = EslConnection::connect(
            "127.0.0.1",
            addr.port(),
            "ClueCon",
            &["CHANNEL_ANSWER", "CHANNEL_HANGUP_COMPLETE"],
        )
        .await
        .unwrap();

        let ev = events.recv().await.unwrap();
        assert!(ev.is_event("CHANNEL_ANSWER"));
        assert_eq!(ev.unique_id(), "u1");

        assert_eq!(conn.api("uuid_setvar u1 cgr_notify +AUTH_OK").await.unwrap(), "+OK done");
        conn.sendmsg(
            "u1",
            vec![("call-command".into(), "hangup".into())],
        )
        .await
        .unwrap();

        let mut commands = Vec::new();
        while let Ok(c) = seen.try_recv() {
            commands.push(c);
        }
        assert_eq!(commands[0], "auth ClueCon");
        assert_eq!(commands[1], "event plain CHANNEL_ANSWER CHANNEL_HANGUP_COMPLETE");
        assert!(commands.contains(&"api uuid_setvar u1 cgr_notify +AUTH_OK".to_string()));
        assert!(commands.contains(&"sendmsg u1".to_string()));
    }

    #[tokio::test]
    async fn test_read_frame_with_body() {
        let data = b"\nContent-Type: api/response\nContent-Length: 5\n\nhello";
        let mut r = BufReader::new(&data[..]);
        let frame = read_frame(&mut r).await.unwrap().unwrap();
        let ev = EslEvent::parse(&frame).unwrap();
        assert_eq!(ev.body.as_deref(), Some("hello"));
        assert!(read_frame(&mut r).await.unwrap().is_none());
    }
}
