#![forbid(unsafe_code)]
#![allow(dead_code)]

use lm_server::shutdown::ShutdownToken;
use lm_storage::LicenseStore;
use serde_json::Value;
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::JoinHandle;
use std::time::Duration;

pub const MASTER_SERIAL: &str = "MASTER-0001";

/// Boots the full service in-process on an ephemeral port with an in-memory
/// store. Dropping the server cancels the shutdown token and joins the
/// service thread.
pub struct TestServer {
    addr: SocketAddr,
    shutdown: ShutdownToken,
    join: Option<JoinHandle<Result<(), String>>>,
}

impl TestServer {
    pub fn start() -> Self {
        Self::start_with_store(LicenseStore::open_in_memory().expect("open store"))
    }

    pub fn start_with_store(store: LicenseStore) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
        let addr = listener.local_addr().expect("local addr");
        let shutdown = ShutdownToken::new();
        let token = shutdown.clone();
        let join = std::thread::spawn(move || {
            lm_server::run_with_listener(store, MASTER_SERIAL, listener, token)
                .map_err(|err| err.to_string())
        });
        Self {
            addr,
            shutdown,
            join: Some(join),
        }
    }

    pub fn connect(&self) -> Client {
        Client::connect(self.addr)
    }

    pub fn stop(&mut self) {
        self.shutdown.cancel();
        if let Some(join) = self.join.take() {
            join.join().expect("service thread").expect("clean shutdown");
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

pub struct Client {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
}

impl Client {
    pub fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("read timeout");
        let reader = BufReader::new(stream.try_clone().expect("clone stream"));
        Self { stream, reader }
    }

    pub fn send(&mut self, req: &Value) {
        writeln!(self.stream, "{req}").expect("write request");
        self.stream.flush().expect("flush request");
    }

    pub fn recv(&mut self) -> Value {
        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response");
        assert!(!line.trim().is_empty(), "empty response line");
        serde_json::from_str(line.trim()).expect("parse response json")
    }

    pub fn request(&mut self, req: Value) -> Value {
        self.send(&req);
        self.recv()
    }
}

/// Splits a response envelope into its echoed header and license objects.
pub fn split_response(resp: &Value) -> (&Value, &[Value]) {
    let items = resp.as_array().expect("response array");
    let (header, licenses) = items.split_first().expect("response header");
    (header, licenses)
}
