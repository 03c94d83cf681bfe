// src/agents/diameter/agent.rs
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::codec::{DiameterCodec, DiameterError};
use super::dictionary::{
    command_name, APP_ID_CREDIT_CONTROL, CMD_CAPABILITIES_EXCHANGE, CMD_CREDIT_CONTROL,
    CMD_DEVICE_WATCHDOG, CMD_DISCONNECT_PEER, DIAMETER_SUCCESS,
};
use super::message::Message;
use super::processor::CcrProcessor;

type PeerSink = Arc<Mutex<SplitSink<Framed<TcpStream, DiameterCodec>, Message>>>;

const FIRMWARE_REVISION: &str = "1";

pub struct DiameterAgent {
    processor: Arc<CcrProcessor>,
    shutdown: CancellationToken,
}

impl DiameterAgent {
    pub fn new(processor: Arc<CcrProcessor>) -> Self {
        Self {
            processor,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn listen(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.processor.config().listen).await?;
        self.serve(listener).await
    }

    /// Accepts peers until the shutdown token fires.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        info!("📡 Diameter agent listening on {}", listener.local_addr()?);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("🛑 Diameter agent stopped");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((socket, addr)) => {
                        info!("Diameter peer connected from {}", addr);
                        let processor = self.processor.clone();
                        let shutdown = self.shutdown.child_token();
                        tokio::spawn(async move {
                            if let Err(e) = handle_peer(socket, addr, processor, shutdown).await {
                                error!("❌ Diameter peer {}: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept Diameter connection: {}", e),
                },
            }
        }
    }
}

async fn handle_peer(
    socket: TcpStream,
    addr: SocketAddr,
    processor: Arc<CcrProcessor>,
    shutdown: CancellationToken,
) -> Result<(), DiameterError> {
    let local_ip = socket.local_addr()?.ip();
    let (sink, mut stream) = Framed::new(socket, DiameterCodec).split();
    let sink: PeerSink = Arc::new(Mutex::new(sink));

    loop {
        let msg = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = stream.next() => match next {
                Some(m) => m?,
                None => break,
            },
        };
        if !msg.is_request() {
            debug!("Ignoring {} answer from {}", command_name(msg.command_code), addr);
            continue;
        }
        match msg.command_code {
            CMD_CAPABILITIES_EXCHANGE => {
                let cea = capabilities_answer(&msg, &processor, local_ip)?;
                sink.lock().await.send(cea).await?;
            }
            CMD_DEVICE_WATCHDOG => {
                let dwa = base_answer(&msg, &processor)?;
                sink.lock().await.send(dwa).await?;
            }
            CMD_DISCONNECT_PEER => {
                let dpa = base_answer(&msg, &processor)?;
                sink.lock().await.send(dpa).await?;
                info!("Diameter peer {} disconnecting", addr);
                break;
            }
            CMD_CREDIT_CONTROL => {
                let processor = processor.clone();
                let sink = sink.clone();
                tokio::spawn(async move {
                    let Some(cca) = processor.handle(msg).await else {
                        return;
                    };
                    if let Err(e) = sink.lock().await.send(cca).await {
                        error!("❌ Writing CCA to {}: {}", addr, e);
                    }
                });
            }
            other => warn!(
                "⚠️ Unsupported Diameter command {} from {}",
                command_name(other),
                addr
            ),
        }
    }
    info!("Diameter peer {} closed", addr);
    Ok(())
}

fn base_answer(req: &Message, processor: &CcrProcessor) -> Result<Message, DiameterError> {
    let cfg = processor.config();
    req.answer()
        .with_avp("Result-Code", &DIAMETER_SUCCESS.to_string())?
        .with_avp("Origin-Host", &cfg.origin_host)?
        .with_avp("Origin-Realm", &cfg.origin_realm)
}

fn capabilities_answer(
    req: &Message,
    processor: &CcrProcessor,
    local_ip: IpAddr,
) -> Result<Message, DiameterError> {
    let cfg = processor.config();
    base_answer(req, processor)?
        .with_avp("Host-IP-Address", &local_ip.to_string())?
        .with_avp("Vendor-Id", &cfg.vendor_id.to_string())?
        .with_avp("Product-Name", &cfg.product_name)?
        .with_avp("Firmware-Revision", FIRMWARE_REVISION)?
        .with_avp("Auth-Application-Id", &APP_ID_CREDIT_CONTROL.to_string())
}
