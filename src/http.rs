//! Minimal HTTP/1.1 endpoint serving `/metrics`.
//!
//! One request per connection; the response always closes the connection.

use crate::metrics::{MetricsRegistry, CONTENT_TYPE};
use crate::scheduler::ShutdownListener;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{self, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Take};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::time;
use tracing::{debug, error, info, warn};

pub const METRICS_PATH: &str = "/metrics";
pub const DEFAULT_METRICS_PORT: u16 = 9204;

/// Request line plus headers; anything beyond is never buffered.
pub const MAX_REQUEST_BYTES: u64 = 8 * 1024;

const MAX_HEADER_LINES: usize = 64;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
// Unread input left after a rejection, discarded so the client still gets the answer
const LINGER_BYTES: u64 = 64 * 1024;
const LINGER_TIMEOUT: Duration = Duration::from_secs(1);

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

type RequestReader = BufReader<Take<OwnedReadHalf>>;
type Response = (&'static str, &'static str, String);

pub async fn bind(addr: SocketAddr) -> io::Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    info!("metrics server listening on http://{}{}", listener.local_addr()?, METRICS_PATH);
    Ok(listener)
}

/// Accept scrapes until shutdown. Connections already accepted finish on
/// their own tasks.
pub async fn serve(
    listener: TcpListener,
    registry: Arc<MetricsRegistry>,
    mut shutdown: ShutdownListener,
) {
    loop {
        tokio::select! {
            () = shutdown.wait() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let registry = Arc::clone(&registry);
                    tokio::spawn(async move {
                        let handled = time::timeout(
                            REQUEST_TIMEOUT,
                            handle_client(stream, &registry),
                        )
                        .await;
                        match handled {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => warn!("metrics client {} error: {}", addr, e),
                            Err(_) => debug!("metrics client {} timed out", addr),
                        }
                    });
                }
                Err(e) => {
                    error!("failed to accept metrics connection: {}", e);
                }
            }
        }
    }
    debug!("metrics server stopped");
}

async fn handle_client(stream: TcpStream, registry: &MetricsRegistry) -> io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader: RequestReader = BufReader::new(reader.take(MAX_REQUEST_BYTES));

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await? == 0 {
        return Ok(());
    }

    let rejection = if !request_line.ends_with('\n') && exhausted(&reader) {
        Some(reject("414 URI Too Long"))
    } else {
        drain_headers(&mut reader).await?
    };
    let rejected = rejection.is_some();
    let (status, content_type, body) = match rejection {
        Some(response) => response,
        None => route(&request_line, registry),
    };

    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    writer.write_all(response.as_bytes()).await?;
    writer.shutdown().await?;

    if rejected {
        let mut rest = reader.into_inner().into_inner().take(LINGER_BYTES);
        let _ = time::timeout(LINGER_TIMEOUT, io::copy(&mut rest, &mut io::sink())).await;
    }
    Ok(())
}

fn exhausted(reader: &RequestReader) -> bool {
    reader.get_ref().limit() == 0
}

fn reject(status: &'static str) -> Response {
    (status, TEXT_PLAIN, format!("{}\n", status.to_lowercase()))
}

/// Skip the headers; the body of a GET is ignored.
async fn drain_headers(reader: &mut RequestReader) -> io::Result<Option<Response>> {
    let too_large = || Some(reject("431 Request Header Fields Too Large"));
    let mut header = String::new();

    for _ in 0..MAX_HEADER_LINES {
        header.clear();
        if reader.read_line(&mut header).await? == 0 {
            return Ok(if exhausted(reader) { too_large() } else { None });
        }
        if !header.ends_with('\n') && exhausted(reader) {
            return Ok(too_large());
        }
        if header.trim().is_empty() {
            return Ok(None);
        }
    }

    Ok(too_large())
}

fn route(request_line: &str, registry: &MetricsRegistry) -> Response {
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("");
    let target = parts.next().unwrap_or("");
    let path = target.split('?').next().unwrap_or("");

    match (method, path) {
        ("GET", METRICS_PATH) => ("200 OK", CONTENT_TYPE, registry.render()),
        (_, METRICS_PATH) => reject("405 Method Not Allowed"),
        _ => reject("404 Not Found"),
    }
}
