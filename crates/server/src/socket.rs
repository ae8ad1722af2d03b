#![forbid(unsafe_code)]

use crate::command::Command;
use crate::protocol::{self, MAX_LINE_BYTES, response_envelope, write_newline_json};
use crate::service::Request;
use crate::shutdown::ShutdownToken;
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

const ACCEPT_POLL: Duration = Duration::from_millis(50);
const READ_POLL: Duration = Duration::from_millis(200);

/// Accept loop: nonblocking listener polled against the shutdown token, one
/// worker thread per connection, unbounded in count.
pub fn serve_with_listener(
    listener: TcpListener,
    requests: mpsc::Sender<Request>,
    shutdown: ShutdownToken,
) -> std::io::Result<()> {
    listener.set_nonblocking(true)?;

    loop {
        if shutdown.is_cancelled() {
            break;
        }
        match listener.accept() {
            Ok((stream, addr)) => {
                info!(%addr, "client connected");
                let requests = requests.clone();
                let shutdown = shutdown.clone();
                thread::spawn(move || {
                    if let Err(err) = handle_connection(&stream, &requests, &shutdown) {
                        error!(%addr, %err, "connection failed");
                    }
                    // Deterministic close on every exit path.
                    let _ = stream.shutdown(Shutdown::Both);
                    info!(%addr, "client disconnected");
                });
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(err) => {
                // The accept loop must survive transient accept failures.
                error!(%err, "accept failed");
            }
        }
    }

    info!("listener stopped");
    Ok(())
}

/// Worker loop: read one newline-framed request, decode it concurrently with
/// the other workers, then hand the command to the store service and write
/// its reply back to this connection.
fn handle_connection(
    stream: &TcpStream,
    requests: &mpsc::Sender<Request>,
    shutdown: &ShutdownToken,
) -> std::io::Result<()> {
    // The read timeout keeps a quiet connection re-checking the shutdown
    // token instead of parking forever in read_line.
    stream.set_read_timeout(Some(READ_POLL))?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream.try_clone()?);

    let mut line = String::new();
    loop {
        if shutdown.is_cancelled() {
            break;
        }
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                let raw = line.trim().to_string();
                line.clear();
                if raw.is_empty() {
                    continue;
                }
                handle_request(&raw, &mut writer, requests)?;
            }
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                // A partial line stays buffered; the next pass appends to it.
                if line.len() > MAX_LINE_BYTES {
                    return Err(std::io::Error::new(
                        ErrorKind::InvalidData,
                        "request line exceeds the frame limit",
                    ));
                }
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    writer.flush()
}

fn handle_request(
    raw: &str,
    writer: &mut BufWriter<TcpStream>,
    requests: &mpsc::Sender<Request>,
) -> std::io::Result<()> {
    // No header means no correlation data to echo, so no response either.
    let (header, payload) = match protocol::parse_envelope(raw) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!(%err, "discarding unframed message");
            return Ok(());
        }
    };

    let command = match Command::parse(&header, payload) {
        Ok(command) => command,
        // Unknown commands and malformed payloads never reach the store
        // service; the client still gets its header back with no licenses.
        Err(err) => {
            warn!(command = header.command(), %err, "request rejected");
            return write_newline_json(writer, &response_envelope(&header, &[]));
        }
    };

    let (reply_tx, reply_rx) = mpsc::channel();
    let request = Request {
        header,
        command,
        reply: reply_tx,
    };
    if requests.send(request).is_err() {
        return Err(std::io::Error::new(
            ErrorKind::BrokenPipe,
            "store service is gone",
        ));
    }

    match reply_rx.recv() {
        Ok(response) => write_newline_json(writer, &response),
        Err(_) => Err(std::io::Error::new(
            ErrorKind::BrokenPipe,
            "store service dropped the request",
        )),
    }
}
