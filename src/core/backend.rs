//! Single logical connection to one `(address, database)` pair
//!
//! A `BackendConn` owns a bounded input queue and a supervisor task that
//! runs writer sessions against the backend. Each session dials, performs
//! the AUTH/SELECT handshake, then pumps queued requests through a pipelined
//! writer while a companion reader task pairs responses with requests in
//! FIFO order. Failed sessions reconnect, eagerly at first and then with
//! exponential backoff.
use std::cmp;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::BackendConfig;
use crate::core::request::Request;
use crate::error::BackendError;
use crate::resp::{self, FlushWriter, RespError, RespReader, RespValue};
use crate::utils::ExpBackoff;

/// Depth of the input queue; the only backpressure signal to producers.
const INPUT_QUEUE_DEPTH: usize = 1024;

/// Failed sessions reconnect immediately this many times before backing off.
const RETRY_FAST_ATTEMPTS: u32 = 10;

const RETRY_MIN_DELAY: Duration = Duration::from_millis(50);
const RETRY_MAX_DELAY: Duration = Duration::from_millis(5000);

/// Pipelined flush knobs for the writer session.
const FLUSH_MAX_BUFFERED: usize = 256;
const FLUSH_MAX_INTERVAL: Duration = Duration::from_millis(1);

/// Error-frame prefix signalling the backend's replication primary is gone.
const MASTER_DOWN: &[u8] = b"MASTERDOWN";

/// Liveness of a backend connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnState {
    /// No live session.
    Disconnected = 0,
    /// A writer/reader pair holds a live TCP connection.
    Connected = 1,
    /// Reachable, but the backend reported it is serving stale data.
    DataStale = 2,
}

impl ConnState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => ConnState::Connected,
            2 => ConnState::DataStale,
            _ => ConnState::Disconnected,
        }
    }
}

/// A durable, pipelined, auto-reconnecting connection to one backend
/// address and logical database.
pub struct BackendConn {
    addr: String,
    dbnum: u32,
    input: Mutex<Option<mpsc::Sender<Arc<Request>>>>,
    state: AtomicU8,
    closed: AtomicBool,
    config: Arc<BackendConfig>,
}

impl BackendConn {
    /// Allocate the connection and start its supervisor task.
    ///
    /// Returns immediately; requests submitted before the first session is
    /// established simply queue.
    pub fn new(addr: &str, dbnum: u32, config: &Arc<BackendConfig>) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(INPUT_QUEUE_DEPTH);
        let bc = Arc::new(Self {
            addr: addr.to_string(),
            dbnum,
            input: Mutex::new(Some(tx)),
            state: AtomicU8::new(ConnState::Disconnected as u8),
            closed: AtomicBool::new(false),
            config: Arc::clone(config),
        });
        tokio::spawn(Arc::clone(&bc).run(rx));
        bc
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn state(&self) -> ConnState {
        ConnState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnState::Connected
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Enqueue a request, blocking while the input queue is full.
    ///
    /// Increments the request's batch counter before enqueueing. Calling
    /// this after [`close`] is a programming error and panics.
    ///
    /// [`close`]: BackendConn::close
    pub async fn push_back(&self, req: Arc<Request>) {
        if let Some(batch) = req.batch() {
            batch.add(1);
        }
        let tx = self.sender().expect("push_back called after close");
        if tx.send(req).await.is_err() {
            panic!("push_back called after close");
        }
    }

    /// Probe an idle connection and let a stale one recover.
    ///
    /// Transitions DataStale back to Connected, then enqueues a synthetic
    /// PING when the input queue is empty. Returns false when pending
    /// requests already exercise the connection, or after close.
    pub fn keep_alive(&self) -> bool {
        if self.cas_state(ConnState::DataStale, ConnState::Connected) {
            warn!(
                "backend conn to {}, state = Connected (keepalive)",
                self.addr
            );
        }
        let Some(tx) = self.sender() else {
            return false;
        };
        if tx.capacity() < tx.max_capacity() {
            return false;
        }
        tx.try_send(Arc::new(Request::ping())).is_ok()
    }

    /// Close the input queue. Idempotent; the supervisor drains what is
    /// left and exits.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.input.lock().unwrap().take();
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<Arc<Request>>> {
        self.input.lock().unwrap().as_ref().cloned()
    }

    fn set_state(&self, state: ConnState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn cas_state(&self, from: ConnState, to: ConnState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Supervisor: one writer session per round, retry policy between them.
    async fn run(self: Arc<Self>, mut input: mpsc::Receiver<Arc<Request>>) {
        info!("backend conn to {}, start service", self.addr);
        let mut fails: u32 = 0;
        let mut backoff = ExpBackoff::new(RETRY_MIN_DELAY, RETRY_MAX_DELAY);
        let mut round: u64 = 0;
        while !self.is_closed() {
            debug!("backend conn to {}, rounds-{}", self.addr, round);
            if self
                .writer_session(&mut input, round, &mut fails, &mut backoff)
                .await
                .is_err()
            {
                self.delay_before_retry(&mut input, &mut fails, &mut backoff)
                    .await;
            }
            round += 1;
        }
        info!("backend conn to {}, stop and exit", self.addr);
    }

    /// One session: connect, handshake, pump requests until the input
    /// queue closes or the session fails; then drain buffered requests.
    async fn writer_session(
        self: &Arc<Self>,
        input: &mut mpsc::Receiver<Arc<Request>>,
        round: u64,
        fails: &mut u32,
        backoff: &mut ExpBackoff,
    ) -> Result<(), BackendError> {
        let result = self.writer_loop(input, round, fails, backoff).await;

        // Snapshot drain: only requests buffered at this instant fail fast.
        // A producer racing this loop has its request carried into the next
        // session instead.
        let pending = input.len();
        for _ in 0..pending {
            match input.try_recv() {
                Ok(req) => req.set_response(Err(BackendError::Reset)),
                Err(_) => break,
            }
        }

        match &result {
            Ok(()) => debug!("backend conn to {}, writer-{} exit", self.addr, round),
            Err(err) => warn!(
                "backend conn to {}, writer-{} exit, {}",
                self.addr, round, err
            ),
        }
        result
    }

    async fn writer_loop(
        self: &Arc<Self>,
        input: &mut mpsc::Receiver<Arc<Request>>,
        round: u64,
        fails: &mut u32,
        backoff: &mut ExpBackoff,
    ) -> Result<(), BackendError> {
        let (reader, write_half) = self.connect_and_handshake().await?;

        let (tasks_tx, tasks_rx) = mpsc::channel(self.config.max_pipeline);
        let (exit_tx, exit_rx) = oneshot::channel();
        tokio::spawn(Arc::clone(self).reader_loop(tasks_rx, reader, round, exit_tx));

        self.set_state(ConnState::Connected);
        *fails = 0;
        backoff.reset();

        let result = self
            .pump_requests(input, write_half, &tasks_tx, exit_rx)
            .await;

        self.set_state(ConnState::Disconnected);
        drop(tasks_tx); // reader drains the in-flight queue and exits
        result
    }

    async fn pump_requests(
        &self,
        input: &mut mpsc::Receiver<Arc<Request>>,
        write_half: OwnedWriteHalf,
        tasks_tx: &mpsc::Sender<Arc<Request>>,
        mut reader_exit: oneshot::Receiver<()>,
    ) -> Result<(), BackendError> {
        let mut writer = FlushWriter::new(write_half)
            .max_buffered(cmp::min(FLUSH_MAX_BUFFERED, self.config.max_pipeline))
            .max_interval(FLUSH_MAX_INTERVAL)
            .with_timeout(self.config.send_timeout());

        loop {
            let req = tokio::select! {
                req = input.recv() => match req {
                    Some(req) => req,
                    None => return Ok(()),
                },
                _ = &mut reader_exit => {
                    return Err(BackendError::failure("reader task exited"));
                }
            };

            if req.is_read_only() && req.is_broken() {
                req.set_response(Err(BackendError::RequestBroken));
                continue;
            }

            if let Err(err) = writer.encode_multi_bulk(&req.multi).await {
                let err = BackendError::failure(err.to_string());
                req.set_response(Err(err.clone()));
                return Err(err);
            }

            // flush immediately when nothing else is waiting; otherwise let
            // the writer coalesce up to its thresholds
            let force = input.is_empty();
            if let Err(err) = writer.flush(force).await {
                let err = BackendError::failure(err.to_string());
                req.set_response(Err(err.clone()));
                return Err(err);
            }

            if let Err(send_err) = tasks_tx.send(req).await {
                send_err.0.set_response(Err(BackendError::Reset));
                return Err(BackendError::failure("reader task exited"));
            }
        }
    }

    /// Pair responses with in-flight requests in FIFO order.
    async fn reader_loop(
        self: Arc<Self>,
        mut tasks: mpsc::Receiver<Arc<Request>>,
        mut conn: RespReader<OwnedReadHalf>,
        round: u64,
        exit: oneshot::Sender<()>,
    ) {
        let mut failure: Option<BackendError> = None;
        while let Some(req) = tasks.recv().await {
            match conn.decode().await {
                Ok(frame) => {
                    if let RespValue::Error(message) = &frame {
                        if message.as_bytes().starts_with(MASTER_DOWN)
                            && self.cas_state(ConnState::Connected, ConnState::DataStale)
                        {
                            warn!(
                                "backend conn to {}, state = DataStale, caused by 'MASTERDOWN'",
                                self.addr
                            );
                        }
                    }
                    // a backend error frame is the backend's answer, not a
                    // transport failure
                    req.set_response(Ok(frame));
                }
                Err(err) => {
                    let err = BackendError::failure(err.to_string());
                    req.set_response(Err(err.clone()));
                    failure = Some(err);
                    break;
                }
            }
        }

        // Unblock the writer session, then fail whatever it already handed
        // to this queue.
        drop(exit);
        while let Some(req) = tasks.recv().await {
            req.set_response(Err(BackendError::Reset));
        }

        match failure {
            Some(err) => warn!(
                "backend conn to {}, reader-{} exit, {}",
                self.addr, round, err
            ),
            None => debug!("backend conn to {}, reader-{} exit", self.addr, round),
        }
    }

    async fn connect_and_handshake(
        &self,
    ) -> Result<(RespReader<OwnedReadHalf>, OwnedWriteHalf), BackendError> {
        let stream = self.dial().await?;
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = RespReader::new(read_half).with_timeout(self.config.recv_timeout());

        if let Some(auth) = self.config.auth.clone() {
            let multi = vec![RespValue::bulk("AUTH"), RespValue::bulk(auth)];
            self.handshake_command(&mut write_half, &mut reader, &multi)
                .await?;
        }
        if self.dbnum != 0 {
            let multi = vec![
                RespValue::bulk("SELECT"),
                RespValue::bulk(self.dbnum.to_string()),
            ];
            self.handshake_command(&mut write_half, &mut reader, &multi)
                .await?;
        }

        Ok((reader, write_half))
    }

    async fn handshake_command(
        &self,
        write_half: &mut OwnedWriteHalf,
        reader: &mut RespReader<OwnedReadHalf>,
        multi: &[RespValue],
    ) -> Result<(), BackendError> {
        let mut buf = bytes::BytesMut::new();
        resp::encode_multi_bulk(multi, &mut buf);
        let write = async {
            write_half.write_all(&buf).await?;
            write_half.flush().await
        };
        timeout(self.config.send_timeout(), write)
            .await
            .map_err(|_| BackendError::failure("handshake write timed out"))?
            .map_err(|err: io::Error| BackendError::failure(err.to_string()))?;

        let reply = reader.decode().await.map_err(|err| match err {
            RespError::UnexpectedEof => BackendError::RespRequired,
            other => BackendError::failure(other.to_string()),
        })?;
        match reply {
            RespValue::SimpleString(_) => Ok(()),
            RespValue::Error(message) => {
                Err(BackendError::failure(format!("error resp: {message}")))
            }
            other => Err(BackendError::failure(format!(
                "error resp: should be string, but got {}",
                other.type_name()
            ))),
        }
    }

    async fn dial(&self) -> Result<TcpStream, BackendError> {
        let stream = timeout(self.config.dial_timeout(), TcpStream::connect(&self.addr))
            .await
            .map_err(|_| BackendError::failure(format!("dial {} timed out", self.addr)))?
            .map_err(|err| BackendError::failure(format!("dial {} failed, {}", self.addr, err)))?;
        if let Err(err) = self.configure_stream(&stream) {
            warn!(
                "backend conn to {}, socket setup failed: {}",
                self.addr, err
            );
        }
        Ok(stream)
    }

    fn configure_stream(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nodelay(true)?;
        let sock = socket2::SockRef::from(stream);
        sock.set_recv_buffer_size(self.config.recv_bufsize)?;
        sock.set_send_buffer_size(self.config.send_bufsize)?;
        let period = self.config.keepalive_period();
        let keepalive = socket2::TcpKeepalive::new()
            .with_time(period)
            .with_interval(period / 2 + Duration::from_secs(1));
        sock.set_tcp_keepalive(&keepalive)?;
        Ok(())
    }

    /// Retry policy between failed sessions: reconnect eagerly for the
    /// first few failures, then sleep on the backoff schedule while
    /// resetting any request that arrives, so producers never block on a
    /// dead backend.
    async fn delay_before_retry(
        &self,
        input: &mut mpsc::Receiver<Arc<Request>>,
        fails: &mut u32,
        backoff: &mut ExpBackoff,
    ) {
        *fails += 1;
        if *fails <= RETRY_FAST_ATTEMPTS {
            return;
        }
        let sleep = tokio::time::sleep(backoff.next_delay());
        tokio::pin!(sleep);
        while !self.is_closed() {
            tokio::select! {
                _ = &mut sleep => return,
                req = input.recv() => match req {
                    Some(req) => req.set_response(Err(BackendError::Reset)),
                    None => return,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use std::net::SocketAddr;
    use std::sync::atomic::AtomicUsize;
    use tokio::net::TcpListener;

    fn test_config() -> Arc<BackendConfig> {
        Arc::new(BackendConfig {
            dial_timeout_ms: 1000,
            recv_timeout_ms: 5000,
            send_timeout_ms: 5000,
            ..Default::default()
        })
    }

    /// Minimal RESP backend answering every multi-bulk command with the
    /// reply produced by `reply_for`.
    async fn spawn_backend<F>(reply_for: F) -> SocketAddr
    where
        F: Fn(&[RespValue]) -> RespValue + Clone + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let reply_for = reply_for.clone();
                tokio::spawn(async move {
                    let (read_half, mut write_half) = stream.into_split();
                    let mut reader = RespReader::new(read_half);
                    while let Ok(frame) = reader.decode().await {
                        let RespValue::Array(Some(multi)) = frame else {
                            break;
                        };
                        let mut buf = BytesMut::new();
                        resp::encode(&reply_for(&multi), &mut buf);
                        if write_half.write_all(&buf).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        addr
    }

    fn echo_second_frame(multi: &[RespValue]) -> RespValue {
        match multi.get(1) {
            Some(RespValue::BulkString(Some(data))) => {
                RespValue::SimpleString(String::from_utf8_lossy(data).into_owned())
            }
            _ => RespValue::SimpleString("OK".to_string()),
        }
    }

    #[tokio::test]
    async fn test_pipelined_requests_complete_in_order() {
        let addr = spawn_backend(echo_second_frame).await;
        let bc = BackendConn::new(&addr.to_string(), 0, &test_config());

        let reqs: Vec<Arc<Request>> = (0..200)
            .map(|i| {
                Arc::new(Request::new(vec![
                    RespValue::bulk("GET"),
                    RespValue::bulk(format!("k{}", i)),
                ]))
            })
            .collect();
        for req in &reqs {
            bc.push_back(Arc::clone(req)).await;
        }

        for (i, req) in reqs.iter().enumerate() {
            timeout(Duration::from_secs(5), req.wait()).await.unwrap();
            assert_eq!(
                req.response().unwrap(),
                Ok(RespValue::SimpleString(format!("k{}", i)))
            );
        }
        bc.close();
    }

    #[tokio::test]
    async fn test_handshake_sends_auth_and_select() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&seen);
        let addr = spawn_backend(move |multi| {
            if let Some(RespValue::BulkString(Some(cmd))) = multi.first() {
                record
                    .lock()
                    .unwrap()
                    .push(String::from_utf8_lossy(cmd).into_owned());
            }
            RespValue::SimpleString("OK".to_string())
        })
        .await;

        let config = Arc::new(BackendConfig {
            auth: Some("secret".to_string()),
            ..(*test_config()).clone()
        });
        let bc = BackendConn::new(&addr.to_string(), 2, &config);

        let req = Arc::new(Request::new(vec![
            RespValue::bulk("GET"),
            RespValue::bulk("k"),
        ]));
        bc.push_back(Arc::clone(&req)).await;
        timeout(Duration::from_secs(5), req.wait()).await.unwrap();

        assert_eq!(
            req.response().unwrap(),
            Ok(RespValue::SimpleString("OK".to_string()))
        );
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], "AUTH");
        assert_eq!(seen[1], "SELECT");
        assert!(bc.is_connected());
        bc.close();
    }

    #[tokio::test]
    async fn test_broken_read_only_request_rejected_without_send() {
        let served = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&served);
        let addr = spawn_backend(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
            RespValue::SimpleString("OK".to_string())
        })
        .await;
        let bc = BackendConn::new(&addr.to_string(), 0, &test_config());

        let flag = Arc::new(AtomicBool::new(true));
        let broken = Arc::new(
            Request::new(vec![RespValue::bulk("GET"), RespValue::bulk("k")])
                .read_only(true)
                .with_broken_flag(flag),
        );
        bc.push_back(Arc::clone(&broken)).await;
        timeout(Duration::from_secs(5), broken.wait()).await.unwrap();
        assert_eq!(
            broken.response().unwrap(),
            Err(BackendError::RequestBroken)
        );

        // the session is still alive and serves the next request
        let ok = Arc::new(Request::new(vec![
            RespValue::bulk("GET"),
            RespValue::bulk("k"),
        ]));
        bc.push_back(Arc::clone(&ok)).await;
        timeout(Duration::from_secs(5), ok.wait()).await.unwrap();
        assert!(ok.response().unwrap().is_ok());
        assert_eq!(served.load(Ordering::SeqCst), 1);
        bc.close();
    }

    #[tokio::test]
    async fn test_masterdown_frame_marks_state_stale() {
        let replies = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&replies);
        let addr = spawn_backend(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                RespValue::Error("MASTERDOWN the master is down".to_string())
            } else {
                RespValue::SimpleString("PONG".to_string())
            }
        })
        .await;
        let bc = BackendConn::new(&addr.to_string(), 0, &test_config());

        let req = Arc::new(Request::new(vec![
            RespValue::bulk("GET"),
            RespValue::bulk("k"),
        ]));
        bc.push_back(Arc::clone(&req)).await;
        timeout(Duration::from_secs(5), req.wait()).await.unwrap();

        // the error frame is the backend's answer, delivered as a response
        assert_eq!(
            req.response().unwrap(),
            Ok(RespValue::Error("MASTERDOWN the master is down".to_string()))
        );
        assert_eq!(bc.state(), ConnState::DataStale);
        assert!(!bc.is_connected());

        // keep-alive recovers the state and probes with a PING
        assert!(bc.keep_alive());
        assert!(bc.is_connected());
        bc.close();
    }

    #[tokio::test]
    async fn test_cold_start_requests_reset() {
        // grab a port that refuses connections
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let bc = BackendConn::new(&addr.to_string(), 0, &test_config());
        let reqs: Vec<Arc<Request>> = (0..3)
            .map(|_| {
                Arc::new(Request::new(vec![
                    RespValue::bulk("SET"),
                    RespValue::bulk("k"),
                    RespValue::bulk("v"),
                ]))
            })
            .collect();
        for req in &reqs {
            bc.push_back(Arc::clone(req)).await;
        }
        for req in &reqs {
            timeout(Duration::from_secs(5), req.wait()).await.unwrap();
            assert_eq!(req.response().unwrap(), Err(BackendError::Reset));
        }
        assert!(!bc.is_connected());
        bc.close();
    }

    #[tokio::test]
    async fn test_reconnects_after_mid_flight_disconnect() {
        // backend that serves two replies per connection, then hangs up
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let (read_half, mut write_half) = stream.into_split();
                    let mut reader = RespReader::new(read_half);
                    for _ in 0..2 {
                        if reader.decode().await.is_err() {
                            return;
                        }
                        let mut buf = BytesMut::new();
                        resp::encode(&RespValue::SimpleString("OK".to_string()), &mut buf);
                        if write_half.write_all(&buf).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });

        let bc = BackendConn::new(&addr.to_string(), 0, &test_config());

        let mut served = 0;
        let mut failed = 0;
        for _ in 0..20 {
            let req = Arc::new(Request::new(vec![
                RespValue::bulk("GET"),
                RespValue::bulk("k"),
            ]));
            bc.push_back(Arc::clone(&req)).await;
            timeout(Duration::from_secs(5), req.wait()).await.unwrap();
            match req.response().unwrap() {
                Ok(_) => served += 1,
                Err(_) => failed += 1,
            }
        }

        // sessions die after two replies each; the supervisor reconnects
        // and later requests are served on fresh connections
        assert!(served >= 10, "served only {} of 20", served);
        assert!(failed > 0, "expected some requests to hit a dead session");
        bc.close();
    }

    #[tokio::test]
    async fn test_keep_alive_declines_when_queue_busy() {
        // a backend that accepts but never answers the SELECT handshake, so
        // submitted requests stay queued
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let bc = BackendConn::new(&addr.to_string(), 1, &test_config());
        tokio::time::sleep(Duration::from_millis(50)).await;

        let req = Arc::new(Request::new(vec![RespValue::bulk("PING")]));
        bc.push_back(req).await;
        assert!(!bc.keep_alive());
        bc.close();
    }

    #[tokio::test]
    async fn test_keep_alive_probes_idle_connection() {
        let addr = spawn_backend(|_| RespValue::SimpleString("PONG".to_string())).await;
        let bc = BackendConn::new(&addr.to_string(), 0, &test_config());

        // wait for the session to come up
        for _ in 0..100 {
            if bc.is_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(bc.is_connected());
        assert!(bc.keep_alive());
        bc.close();
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let addr = spawn_backend(|_| RespValue::SimpleString("OK".to_string())).await;
        let bc = BackendConn::new(&addr.to_string(), 0, &test_config());
        bc.close();
        bc.close();
        assert!(bc.is_closed());
    }

    #[tokio::test]
    #[should_panic(expected = "push_back called after close")]
    async fn test_push_back_after_close_panics() {
        let bc = BackendConn::new("127.0.0.1:1", 0, &test_config());
        bc.close();
        bc.push_back(Arc::new(Request::new(vec![RespValue::bulk("PING")])))
            .await;
    }

    #[tokio::test]
    async fn test_addr_and_initial_state() {
        let bc = BackendConn::new("127.0.0.1:1", 0, &test_config());
        assert_eq!(bc.addr(), "127.0.0.1:1");
        assert!(!bc.is_closed());
        bc.close();
    }
}
