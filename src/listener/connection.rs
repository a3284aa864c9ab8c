#![forbid(unsafe_code)]

use std::io;
use std::time::Duration;

use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::listener::access_log::{AccessLog, AccessLogEntry, UNKNOWN_CLIENT};
use crate::listener::response::{canned_response, detect_status_code, has_terminator, CANNED_RESPONSE};
use crate::utils::config::{ReadPolicy, ServerConfig, READ_CHUNK_SIZE};
use crate::utils::errors::Errors;

// ***************************************************************************
//                                Constants
// ***************************************************************************
// Reading stops here even if no terminator has arrived.
pub const MAX_REQUEST_SIZE: usize = 64 * READ_CHUNK_SIZE;

// ---------------------------------------------------------------------------
// peer_ip:
// ---------------------------------------------------------------------------
/** The client's IP address, or UNKNOWN when the socket no longer has one
 * (for example because the peer already reset the connection).
 */
pub fn peer_ip(stream: &TcpStream) -> String {
    match stream.peer_addr() {
        Ok(addr) => addr.ip().to_string(),
        Err(e) => {
            debug!("Unable to get peer address: {}", e);
            UNKNOWN_CLIENT.to_string()
        }
    }
}

// ---------------------------------------------------------------------------
// read_request:
// ---------------------------------------------------------------------------
/** Read the request in READ_CHUNK_SIZE pieces according to the policy.
 * With UntilTerminator reading stops once the header section is complete,
 * the peer closes its side, or MAX_REQUEST_SIZE is reached.  SingleRead
 * takes whatever the first read returns.
 */
pub async fn read_request<R>(reader: &mut R, policy: ReadPolicy) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut request = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    loop {
        let bytes_read = reader.read(&mut chunk).await?;
        if bytes_read == 0 {
            break;
        }

        let prev_len = request.len();
        request.extend_from_slice(&chunk[..bytes_read]);
        match policy {
            ReadPolicy::SingleRead => break,
            ReadPolicy::UntilTerminator => {
                if has_terminator(&request, prev_len) || request.len() >= MAX_REQUEST_SIZE {
                    break;
                }
            }
        }
    }
    Ok(request)
}

// ---------------------------------------------------------------------------
// read_request_with_timeout:
// ---------------------------------------------------------------------------
async fn read_request_with_timeout<R>(reader: &mut R, policy: ReadPolicy, limit: Option<Duration>,
                                      client_ip: &str) -> Result<Vec<u8>, Errors>
where
    R: AsyncRead + Unpin,
{
    match limit {
        Some(d) => {
            let read = tokio::time::timeout(d, read_request(reader, policy)).await
                .map_err(|_| Errors::ReadTimeout(d.as_secs(), client_ip.to_string()))?;
            Ok(read?)
        }
        None => Ok(read_request(reader, policy).await?),
    }
}

// ---------------------------------------------------------------------------
// handle_connection:
// ---------------------------------------------------------------------------
/** Serve one client: read its request, write the canned response, close our
 * side and append one access log record.  Read, write and timeout failures
 * abandon the connection without a log record.
 */
pub async fn handle_connection<S>(mut stream: S, client_ip: &str, config: &ServerConfig,
                                  access_log: &AccessLog) -> Result<AccessLogEntry, Errors>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = read_request_with_timeout(&mut stream, config.read_policy, config.read_timeout, client_ip).await?;
    let request_text = String::from_utf8_lossy(&request);
    debug!("Request from {} ({} bytes):\n{}", client_ip, request.len(), request_text);

    stream.write_all(canned_response()).await?;
    stream.flush().await?;
    if let Err(e) = stream.shutdown().await {
        debug!("Shutdown of connection from {} failed: {}", client_ip, e);
    }

    let http_code = detect_status_code(CANNED_RESPONSE);
    let entry = AccessLogEntry::now(&config.timezone, client_ip, &http_code, &request_text);
    access_log.append(&entry).await?;
    Ok(entry)
}
