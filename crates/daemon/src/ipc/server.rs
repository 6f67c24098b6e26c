//! IPC server side: socket listener, per-connection framing and the accept
//! loop.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;

use super::handler::RequestHandler;
use super::messages::{IpcRequest, IpcResponse};

/// Listener on the host's Unix Domain Socket.
///
/// The socket file is removed again when the server is dropped.
pub struct IpcServer {
    listener: UnixListener,
    path: PathBuf,
}

impl IpcServer {
    /// Bind the server to `path`, creating parent directories and replacing
    /// a stale socket file.
    pub async fn bind(path: &Path) -> Result<Self, io::Error> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))?;
                }
            }
        }

        if path.exists() {
            std::fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path)?;
        tracing::debug!("IPC socket bound at {:?}", path);

        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept a new incoming connection.
    pub async fn accept(&self) -> Result<IpcConnection, io::Error> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(IpcConnection::new(stream))
    }

    /// Accept connections until `shutdown` is cancelled, answering each
    /// request with `handler`.
    pub async fn serve<H>(self, handler: Arc<H>, shutdown: CancellationToken)
    where
        H: RequestHandler + 'static,
    {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("IPC server shutting down");
                    break;
                }
                accepted = self.accept() => match accepted {
                    Ok(conn) => {
                        let handler = Arc::clone(&handler);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            handle_connection(conn, handler, shutdown).await;
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept IPC connection");
                    }
                }
            }
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn handle_connection<H>(mut conn: IpcConnection, handler: Arc<H>, shutdown: CancellationToken)
where
    H: RequestHandler + 'static,
{
    loop {
        let request = tokio::select! {
            _ = shutdown.cancelled() => break,
            request = conn.read_request() => request,
        };

        let response = match request {
            Ok(Some(request)) => {
                tracing::debug!(?request, "IPC request");
                handler.handle(request).await
            }
            Ok(None) => break,
            Err(IpcError::Json(e)) => IpcResponse::Error {
                message: format!("invalid request: {e}"),
            },
            Err(e) => {
                tracing::debug!(error = %e, "IPC connection failed");
                break;
            }
        };

        let stopping = response == IpcResponse::Stopping;
        if let Err(e) = conn.send_response(&response).await {
            tracing::debug!(error = %e, "Failed to send IPC response");
            break;
        }
        if stopping {
            break;
        }
    }
}

/// A connection to an IPC client, speaking newline-delimited JSON.
pub struct IpcConnection {
    reader: BufReader<tokio::io::ReadHalf<UnixStream>>,
    writer: tokio::io::WriteHalf<UnixStream>,
}

impl IpcConnection {
    fn new(stream: UnixStream) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }

    /// Read the next request from the client.
    ///
    /// Returns `None` if the client has disconnected.
    pub async fn read_request(&mut self) -> Result<Option<IpcRequest>, IpcError> {
        let mut line = String::new();
        let bytes_read = self.reader.read_line(&mut line).await?;

        if bytes_read == 0 {
            return Ok(None);
        }

        let request = serde_json::from_str(line.trim())?;
        Ok(Some(request))
    }

    /// Send a response to the client.
    pub async fn send_response(&mut self, response: &IpcResponse) -> Result<(), IpcError> {
        let mut json = serde_json::to_string(response)?;
        json.push('\n');

        self.writer.write_all(json.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// Errors that can occur during IPC communication.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A JSON serialization/deserialization error occurred.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Answers every request with a pong, and `Stop` with `Stopping`.
    struct PongHandler;

    impl RequestHandler for PongHandler {
        async fn handle(&self, request: IpcRequest) -> IpcResponse {
            match request {
                IpcRequest::Stop => IpcResponse::Stopping,
                _ => IpcResponse::Pong,
            }
        }
    }

    async fn roundtrip(path: &Path, raw: &str) -> String {
        let stream = UnixStream::connect(path).await.unwrap();
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);

        write_half.write_all(raw.as_bytes()).await.unwrap();
        write_half.flush().await.unwrap();

        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        line
    }

    #[tokio::test]
    async fn test_server_bind_creates_parent_dirs() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("nested").join("dir").join("test.sock");

        let server = IpcServer::bind(&socket_path).await.unwrap();
        assert!(socket_path.exists());
        drop(server);
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn test_server_bind_replaces_stale_socket() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        std::fs::write(&socket_path, b"stale").unwrap();

        let _server = IpcServer::bind(&socket_path).await.unwrap();
        assert!(socket_path.exists());
    }

    #[tokio::test]
    async fn test_server_accept_and_communicate() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");

        let server = IpcServer::bind(&socket_path).await.unwrap();

        let client_path = socket_path.clone();
        let client = tokio::spawn(async move {
            let line = roundtrip(&client_path, "\"Ping\"\n").await;
            serde_json::from_str::<IpcResponse>(line.trim()).unwrap()
        });

        let mut conn = server.accept().await.unwrap();
        let request = conn.read_request().await.unwrap().unwrap();
        assert_eq!(request, IpcRequest::Ping);
        conn.send_response(&IpcResponse::Pong).await.unwrap();

        assert_eq!(client.await.unwrap(), IpcResponse::Pong);
    }

    #[tokio::test]
    async fn test_connection_read_returns_none_on_disconnect() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");

        let server = IpcServer::bind(&socket_path).await.unwrap();

        let client_path = socket_path.clone();
        tokio::spawn(async move {
            let _stream = UnixStream::connect(&client_path).await.unwrap();
        });

        let mut conn = server.accept().await.unwrap();
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        let request = conn.read_request().await.unwrap();
        assert!(request.is_none());
    }

    #[tokio::test]
    async fn test_serve_answers_and_reports_bad_json() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        let server = IpcServer::bind(&socket_path).await.unwrap();

        let shutdown = CancellationToken::new();
        let serving = tokio::spawn(server.serve(Arc::new(PongHandler), shutdown.clone()));

        let pong = roundtrip(&socket_path, "\"Ping\"\n").await;
        assert_eq!(
            serde_json::from_str::<IpcResponse>(pong.trim()).unwrap(),
            IpcResponse::Pong
        );

        let error = roundtrip(&socket_path, "{not json}\n").await;
        match serde_json::from_str::<IpcResponse>(error.trim()).unwrap() {
            IpcResponse::Error { message } => assert!(message.starts_with("invalid request")),
            other => panic!("expected an error, got {:?}", other),
        }

        shutdown.cancel();
        serving.await.unwrap();
        assert!(!socket_path.exists());
    }
}
