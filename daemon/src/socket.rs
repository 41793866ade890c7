//! Unix socket transport for subscribers

use crate::broadcaster::Subscription;
use crate::protocol::{Request, Response};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

pub struct SocketServer {
    path: PathBuf,
    listener: UnixListener,
}

impl SocketServer {
    pub async fn bind(path: &Path) -> std::io::Result<Self> {
        let _ = std::fs::remove_file(path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(path)?;
        info!("Socket server listening on {:?}", path);
        Ok(Self { path: path.to_path_buf(), listener })
    }

    pub async fn accept(&self) -> std::io::Result<UnixStream> {
        let (stream, _) = self.listener.accept().await?;
        Ok(stream)
    }

    pub fn socket_path() -> PathBuf {
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/run/user/{}/procwatch.sock", uid))
    }
}

impl Drop for SocketServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn write_frame(writer: &mut OwnedWriteHalf, frame: String) -> std::io::Result<()> {
    writer.write_all((frame + "\n").as_bytes()).await
}

/// Serves one subscriber: answers its requests and forwards broadcast and
/// targeted event frames until either side goes away.
pub async fn handle_client<H>(stream: UnixStream, subscription: Subscription, handler: Arc<H>)
where
    H: RequestHandler + Send + Sync + 'static,
{
    let Subscription { id, mut broadcast_rx, mut direct_rx } = subscription;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        tokio::select! {
            result = reader.read_line(&mut line) => {
                match result {
                    Ok(0) => break,
                    Ok(_) => {
                        let response = match serde_json::from_str::<Request>(&line) {
                            Ok(request) => handler.handle(request).await,
                            Err(e) => {
                                warn!("Invalid request from {}: {}", id, e);
                                Response::Response {
                                    id: None,
                                    data: serde_json::json!({"error": e.to_string()}),
                                }
                            }
                        };
                        line.clear();
                        let json = match serde_json::to_string(&response) {
                            Ok(json) => json,
                            Err(e) => {
                                error!("Failed to encode response: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = write_frame(&mut writer, json).await {
                            error!("Failed to write response: {}", e);
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Read error: {}", e);
                        break;
                    }
                }
            }
            result = broadcast_rx.recv() => {
                match result {
                    Ok(msg) => {
                        if let Err(e) = write_frame(&mut writer, msg).await {
                            error!("Failed to broadcast: {}", e);
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Subscriber {} lagged, {} events dropped", id, skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            Some(msg) = direct_rx.recv() => {
                if let Err(e) = write_frame(&mut writer, msg).await {
                    error!("Failed to send to {}: {}", id, e);
                    break;
                }
            }
        }
    }
}

#[async_trait::async_trait]
pub trait RequestHandler {
    async fn handle(&self, request: Request) -> Response;
}
