//! Newline-delimited JSON server over a Unix domain socket.
//!
//! One envelope per line in, one response per line out. Each accepted
//! connection runs on its own task; a connection can pipeline multiple
//! requests. A line that does not parse as an envelope gets an
//! `invalid_request` error response and the connection stays open. The
//! accept loop stops when the shutdown future resolves; in-flight
//! connections finish their current line.

use std::future::Future;
use std::io;
use std::path::Path;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use crate::dispatch::{dispatch, ErrorCode, EvidenceResponse, RequestEnvelope};
use crate::service::EvidenceService;

/// Binds the listener, removing a stale socket file first.
///
/// # Errors
///
/// Returns an I/O error if the stale file cannot be removed or the bind
/// fails.
pub fn bind(socket_path: &Path) -> io::Result<UnixListener> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }
    UnixListener::bind(socket_path)
}

/// Runs the accept loop until `shutdown` resolves.
///
/// # Errors
///
/// Returns an I/O error if accepting fails; per-connection errors are
/// logged and do not stop the loop.
pub async fn serve(
    listener: UnixListener,
    service: EvidenceService,
    shutdown: impl Future<Output = ()>,
) -> io::Result<()> {
    tokio::pin!(shutdown);
    info!("evidence server listening");
    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("shutdown requested, stopping accept loop");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, _addr) = accepted?;
                let service = service.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, &service).await {
                        warn!("connection ended with error: {err}");
                    }
                });
            }
        }
    }
}

async fn handle_connection(stream: UnixStream, service: &EvidenceService) -> io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<RequestEnvelope>(&line) {
            Ok(envelope) => dispatch(service, envelope),
            Err(err) => {
                debug!("unparseable request line: {err}");
                EvidenceResponse::Error {
                    code: ErrorCode::InvalidRequest,
                    message: format!("malformed request: {err}"),
                }
            }
        };
        let mut encoded = serde_json::to_vec(&response).map_err(io::Error::other)?;
        encoded.push(b'\n');
        write_half.write_all(&encoded).await?;
    }
    Ok(())
}
