//! Per-connection line loop, shared by both dispatch strategies.
//!
//! Reads newline-terminated commands into a buffer, executes them
//! against the keyspace, and writes the reply after each line. The
//! read deadline resets on every processed line; malformed input
//! produces an `ERROR ...` reply and keeps the connection open.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use antcache_protocol::{Command, MAX_LINE_LEN};

use crate::handler::{self, Shared};

/// Initial read buffer capacity; covers typical commands without
/// over-allocating.
pub const BUF_CAPACITY: usize = 4096;

/// Idle read deadline; reset after each processed line.
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-connection socket buffer sizes.
const SOCKET_BUF_SIZE: usize = 32 * 1024;

/// TCP keepalive period.
const KEEPALIVE: Duration = Duration::from_secs(30);

/// Applies per-connection TCP tuning: no Nagle, keepalive, and fixed
/// read/write buffer sizes. Failures are logged and ignored — tuning
/// is never worth dropping a connection over.
pub fn tune_socket(stream: &TcpStream) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("set_nodelay failed: {e}");
    }
    let sock = socket2::SockRef::from(stream);
    let keepalive = socket2::TcpKeepalive::new().with_time(KEEPALIVE);
    if let Err(e) = sock.set_tcp_keepalive(&keepalive) {
        debug!("set_tcp_keepalive failed: {e}");
    }
    if let Err(e) = sock.set_recv_buffer_size(SOCKET_BUF_SIZE) {
        debug!("set_recv_buffer_size failed: {e}");
    }
    if let Err(e) = sock.set_send_buffer_size(SOCKET_BUF_SIZE) {
        debug!("set_send_buffer_size failed: {e}");
    }
}

/// Drives one client connection to completion: EOF, write error, idle
/// timeout, or an oversized line all end the session.
pub async fn handle(mut stream: TcpStream, ctx: Arc<Shared>) -> std::io::Result<()> {
    tune_socket(&stream);

    let mut authenticated = !ctx.auth.enabled();
    let mut buf = BytesMut::with_capacity(BUF_CAPACITY);

    loop {
        // serve every complete line already buffered
        while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            let line = buf.split_to(pos + 1);
            let line = String::from_utf8_lossy(&line[..pos]);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let response = process_line(line, &ctx, &mut authenticated);
            stream.write_all(response.as_bytes()).await?;
        }

        // an incomplete line may never exceed the protocol cap
        if buf.len() > MAX_LINE_LEN {
            stream
                .write_all(b"ERROR request exceeds maximum line length\n")
                .await?;
            return Ok(());
        }

        match tokio::time::timeout(READ_TIMEOUT, stream.read_buf(&mut buf)).await {
            Ok(Ok(0)) => return Ok(()),  // clean disconnect
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Ok(()),     // idle timeout
        }
    }
}

/// Parses and executes one line, enforcing the authentication gate.
fn process_line(line: &str, ctx: &Shared, authenticated: &mut bool) -> String {
    match Command::parse(line) {
        Ok(Command::Auth { password }) => {
            if !ctx.auth.enabled() {
                *authenticated = true;
                return "OK no authentication required\n".to_string();
            }
            if ctx.auth.verify(&password) {
                *authenticated = true;
                "OK authenticated\n".to_string()
            } else {
                "ERROR invalid password\n".to_string()
            }
        }
        Ok(cmd) => {
            if !*authenticated {
                return "ERROR authentication required\n".to_string();
            }
            handler::execute(cmd, ctx)
        }
        Err(e) => format!("ERROR {e}\n"),
    }
}
