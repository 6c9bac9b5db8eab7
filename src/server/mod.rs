//! Async TCP server using Tokio.
//!
//! Accepts TCP connections and dispatches HTTP/1.1 requests to a handler
//! function. Connections are persistent (keep-alive) unless the client asks
//! otherwise, and pipelined requests already in the buffer are served in order.

use std::future::{self, Future};
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::http::{
    StatusCode,
    request::{Request, RequestError},
    response::Response,
};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Largest request (head plus body) buffered before answering 413.
pub const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

const INITIAL_BUF_SIZE: usize = 4096;

/// Binds a TCP address and dispatches incoming HTTP/1.1 requests to a
/// handler function.
///
/// # Examples
///
/// ```rust,no_run
/// use bookshelf::server::Server;
/// use bookshelf::http::{Response, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = Server::bind("127.0.0.1:4000").await?;
///     server
///         .run_until(
///             |_req| async { Response::new(StatusCode::Ok).body("Hello!") },
///             async { tokio::signal::ctrl_c().await.ok(); },
///         )
///         .await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound.
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves until the process exits.
    ///
    /// # Errors
    ///
    /// See [`Server::run_until`].
    pub async fn run<H, F>(self, handler: H) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        self.run_until(handler, future::pending()).await
    }

    /// Accepts connections until `shutdown` resolves.
    ///
    /// The handler is shared across all spawned connection tasks. Connections
    /// already accepted when `shutdown` fires finish their current request on
    /// their own task.
    ///
    /// # Errors
    ///
    /// Currently never fails once bound; accept errors are logged and skipped.
    pub async fn run_until<H, F, S>(self, handler: H, shutdown: S) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
        S: Future<Output = ()>,
    {
        let handler = Arc::new(handler);
        info!(address = %self.local_addr, "bookshelf listening");

        tokio::pin!(shutdown);
        loop {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                () = &mut shutdown => {
                    info!(address = %self.local_addr, "shutting down");
                    return Ok(());
                }
            };

            let (stream, peer_addr) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let handler = Arc::clone(&handler);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, handler).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// What the buffered bytes amount to so far.
enum Framed {
    Ready { request: Request, consumed: usize },
    NeedMore,
    Reject(Response),
}

fn frame(buf: &[u8]) -> Framed {
    let (request, body_offset) = match Request::parse(buf) {
        Ok(pair) => pair,
        Err(RequestError::Incomplete) if buf.len() <= MAX_REQUEST_SIZE => return Framed::NeedMore,
        Err(RequestError::Incomplete) => {
            return Framed::Reject(
                Response::new(StatusCode::PayloadTooLarge).body("Request entity too large"),
            );
        }
        Err(e) => {
            return Framed::Reject(
                Response::new(StatusCode::BadRequest).body(format!("Bad Request: {e}")),
            );
        }
    };

    if request.has_transfer_encoding() {
        return Framed::Reject(
            Response::new(StatusCode::LengthRequired).body("Transfer-Encoding is not supported"),
        );
    }

    let total = body_offset.checked_add(request.content_length().unwrap_or(0));
    let Some(total) = total.filter(|&total| total <= MAX_REQUEST_SIZE) else {
        return Framed::Reject(
            Response::new(StatusCode::PayloadTooLarge).body("Request entity too large"),
        );
    };
    if buf.len() < total {
        return Framed::NeedMore;
    }

    Framed::Ready {
        request,
        consumed: total,
    }
}

async fn handle_connection<H, F>(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<H>,
) -> Result<(), std::io::Error>
where
    H: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        let (request, consumed) = match frame(&buf) {
            Framed::Ready { request, consumed } => (request, consumed),
            Framed::NeedMore => {
                if stream.read_buf(&mut buf).await? == 0 {
                    debug!(peer = %peer_addr, "connection closed by peer");
                    break;
                }
                continue;
            }
            Framed::Reject(response) => {
                warn!(peer = %peer_addr, status = response.status().as_u16(), "rejecting request");
                stream.write_all(&response.keep_alive(false).into_bytes()).await?;
                break;
            }
        };

        let keep_alive = request.is_keep_alive();
        debug!(
            peer = %peer_addr,
            method = %request.method(),
            path = %request.path(),
            "dispatching request"
        );

        let response = handler(request).await.keep_alive(keep_alive);
        stream.write_all(&response.into_bytes()).await?;
        stream.flush().await?;

        let _ = buf.split_to(consumed);

        if !keep_alive {
            debug!(peer = %peer_addr, "Connection: close; shutting down");
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_waits_for_body() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 4\r\n\r\nab";
        assert!(matches!(frame(raw), Framed::NeedMore));

        let raw = b"POST / HTTP/1.1\r\nContent-Length: 4\r\n\r\nabcdGET";
        match frame(raw) {
            Framed::Ready { request, consumed } => {
                assert_eq!(request.body().as_ref(), b"abcd");
                assert_eq!(consumed, raw.len() - 3);
            }
            _ => panic!("expected a complete request"),
        }
    }

    #[test]
    fn frame_rejects_chunked_bodies() {
        let raw = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n";
        match frame(raw) {
            Framed::Reject(r) => assert_eq!(r.status(), StatusCode::LengthRequired),
            _ => panic!("expected 411"),
        }
    }

    #[test]
    fn frame_rejects_oversized_declared_body() {
        let raw = format!(
            "POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n",
            MAX_REQUEST_SIZE + 1
        );
        match frame(raw.as_bytes()) {
            Framed::Reject(r) => assert_eq!(r.status(), StatusCode::PayloadTooLarge),
            _ => panic!("expected 413"),
        }
    }

    #[test]
    fn frame_rejects_content_length_that_overflows() {
        let raw = format!("POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n", usize::MAX);
        match frame(raw.as_bytes()) {
            Framed::Reject(r) => assert_eq!(r.status(), StatusCode::PayloadTooLarge),
            _ => panic!("expected 413"),
        }
    }

    #[test]
    fn frame_rejects_non_utf8_content_length() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: \xff4\r\n\r\nbodyGET / HTTP/1.1\r\n\r\n";
        match frame(raw) {
            Framed::Reject(r) => assert_eq!(r.status(), StatusCode::BadRequest),
            _ => panic!("expected 400"),
        }
    }

    #[test]
    fn frame_rejects_garbage() {
        match frame(b"\x01\x02 nonsense\r\n\r\n") {
            Framed::Reject(r) => assert_eq!(r.status(), StatusCode::BadRequest),
            _ => panic!("expected 400"),
        }
    }

    #[tokio::test]
    async fn serves_pipelined_requests_then_shuts_down() {
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let task = tokio::spawn(server.run_until(
            |req: Request| async move { Response::new(StatusCode::Ok).body(req.path().to_owned()) },
            async {
                let _ = rx.await;
            },
        ));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();

        let first = text.find("\r\n\r\n/a").unwrap();
        let second = text.find("\r\n\r\n/b").unwrap();
        assert!(first < second);
        assert!(text.contains("Connection: close\r\n"));

        tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }
}
