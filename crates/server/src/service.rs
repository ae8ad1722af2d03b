#![forbid(unsafe_code)]

use crate::command::Command;
use crate::handler::LicenseHandler;
use crate::protocol::{Header, response_envelope};
use crate::shutdown::ShutdownToken;
use serde_json::Value;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// One decoded command on its way to the store service. The reply sender
/// routes the response back to the exact connection that issued the request.
pub struct Request {
    pub header: Header,
    pub command: Command,
    pub reply: mpsc::Sender<Value>,
}

const RECV_POLL: Duration = Duration::from_millis(100);

/// Spawns the single-writer store service: one thread owns the handler (and
/// through it the store connection) and applies commands strictly in arrival
/// order. Connection workers only ever talk to it through the channel.
pub fn spawn(
    mut handler: LicenseHandler,
    shutdown: ShutdownToken,
) -> (mpsc::Sender<Request>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel::<Request>();
    let join = thread::spawn(move || {
        run(&mut handler, &rx, &shutdown);
        info!("store service stopped");
    });
    (tx, join)
}

fn run(handler: &mut LicenseHandler, rx: &mpsc::Receiver<Request>, shutdown: &ShutdownToken) {
    loop {
        if shutdown.is_cancelled() {
            break;
        }
        let request = match rx.recv_timeout(RECV_POLL) {
            Ok(request) => request,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        };
        process(handler, request);
    }
}

fn process(handler: &mut LicenseHandler, request: Request) {
    let command = request.command.name();
    info!(command, "executing command");

    let licenses = match request.command.execute(handler) {
        Ok(Some(licenses)) => licenses,
        Ok(None) => Vec::new(),
        // Failures surface to the client only as an empty result list.
        Err(err) => {
            warn!(command, %err, "command rejected");
            Vec::new()
        }
    };

    let response = response_envelope(&request.header, &licenses);
    if request.reply.send(response).is_err() {
        warn!(command, "requesting connection went away before the response");
    }

    dump_table(handler);
}

fn dump_table(handler: &LicenseHandler) {
    let Ok(records) = handler.store().all_records() else {
        return;
    };
    for record in records {
        debug!(
            id = record.id.as_u32(),
            state = record.state.as_str(),
            expires_at = %record.expires_at,
            is_default = record.is_default,
            "license row"
        );
    }
}
