//! Peer fan-out engine.
//!
//! A logical response is split into byte segments, the segments are seeded
//! into a shared queue, and one worker per peer connection drains it. A
//! worker that fails re-enqueues its segment for somebody else and exits,
//! so a single healthy peer eventually serves everything; when every worker
//! has exited with segments still missing the request fails with
//! [`NodeError::FanOutExhausted`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

use torrent_node_config::constants::PEER_REQUEST_TIMEOUT;

use crate::error::{NodeError, NodeResult, StopFlag};

/// Parallelism of the broadcast variant.
const BROADCAST_CONCURRENCY: usize = 8;

/// One `[from_byte, to_byte)` slice of a logical response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub from_byte: u64,
    pub to_byte: u64,
    pub index: usize,
}

/// Builds `(path, post_body)` for one segment.
pub type MakeRequest = Arc<dyn Fn(u64, u64) -> (String, String) + Send + Sync>;
/// Extracts the payload from one raw peer response.
pub type ParseResponse = Arc<dyn Fn(&[u8]) -> NodeResult<Vec<u8>> + Send + Sync>;

/// Splits `size` bytes into `count_segments` contiguous segments of at
/// least `min_size` bytes (except possibly the last).
pub fn make_segments(count_segments: usize, size: u64, min_size: u64) -> Vec<Segment> {
    let step = size.min((size / count_segments as u64).max(min_size));
    debug_assert!(step != 0, "segment step is 0");

    let mut segments = Vec::with_capacity(count_segments);
    let mut prev_byte = 0u64;
    for index in 0..count_segments - 1 {
        let next_byte = (prev_byte + step).min(size);
        segments.push(Segment {
            from_byte: prev_byte,
            to_byte: next_byte,
            index,
        });
        prev_byte = next_byte;
    }
    segments.push(Segment {
        from_byte: prev_byte,
        to_byte: size,
        index: count_segments - 1,
    });
    segments
}

/// Result of one broadcast probe.
pub struct BroadcastItem {
    pub server: String,
    pub response: NodeResult<Vec<u8>>,
    pub elapsed: Duration,
}

enum WorkerEvent {
    Success,
    Exited,
}

/// A fixed set of peer endpoints plus the shared HTTP client used to talk
/// to them.
pub struct Peers {
    servers: Vec<String>,
    count_connections: usize,
    client: reqwest::Client,
    stop: StopFlag,
}

fn join_url(server: &str, path: &str) -> String {
    if server.ends_with('/') {
        format!("{server}{path}")
    } else {
        format!("{server}/{path}")
    }
}

async fn post(client: &reqwest::Client, url: &str, body: String) -> NodeResult<Vec<u8>> {
    let response = client
        .post(url)
        .body(body)
        .send()
        .await
        .map_err(|e| NodeError::Protocol(format!("request to {url} failed: {e}")))?;
    if !response.status().is_success() {
        return Err(NodeError::Protocol(format!(
            "request to {url} failed with status {}",
            response.status()
        )));
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| NodeError::Protocol(format!("reading response from {url} failed: {e}")))?;
    Ok(bytes.to_vec())
}

impl Peers {
    pub fn new(servers: Vec<String>, count_connections: usize, stop: StopFlag) -> NodeResult<Self> {
        if count_connections == 0 {
            return Err(NodeError::User("incorrect count connections: 0".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(PEER_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| NodeError::Protocol(e.to_string()))?;
        Ok(Self {
            servers,
            count_connections,
            client,
            stop,
        })
    }

    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    /// Issues one request against one peer.
    pub async fn run_one_request(
        &self,
        server: &str,
        path: &str,
        body: impl Into<String>,
    ) -> NodeResult<Vec<u8>> {
        post(&self.client, &join_url(server, path), body.into()).await
    }

    /// Sends the same request to every configured peer, collecting each
    /// peer's outcome and timing.
    pub async fn broadcast(&self, path: &str, body: &str) -> NodeResult<Vec<BroadcastItem>> {
        let results = stream::iter(self.servers.iter().cloned())
            .map(|server| {
                let client = self.client.clone();
                let url = join_url(&server, path);
                let body = body.to_string();
                async move {
                    let started = Instant::now();
                    let response = post(&client, &url, body).await;
                    BroadcastItem {
                        server,
                        response,
                        elapsed: started.elapsed(),
                    }
                }
            })
            .buffer_unordered(BROADCAST_CONCURRENCY)
            .collect::<Vec<_>>()
            .await;
        self.stop.check()?;
        Ok(results)
    }

    /// Fans a `response_size`-byte response out across `hint_servers` and
    /// reassembles the segments in order. With `precision` set every
    /// segment (and the total) must come back with its exact byte length.
    pub async fn request(
        &self,
        response_size: u64,
        min_response_size: u64,
        precision: bool,
        make_request: MakeRequest,
        parse: ParseResponse,
        hint_servers: &[String],
    ) -> NodeResult<Vec<u8>> {
        if response_size == 0 {
            return Err(NodeError::Protocol("response size 0".into()));
        }
        let count_segments =
            ((response_size + min_response_size - 1) / min_response_size).max(1) as usize;
        let segments = make_segments(count_segments, response_size, min_response_size);
        let answers = self
            .request_impl(segments, precision, make_request, parse, hint_servers)
            .await?;

        let mut response = Vec::with_capacity(response_size as usize);
        for answer in answers {
            response.extend_from_slice(&answer);
        }
        if precision && response.len() as u64 != response_size {
            return Err(NodeError::Protocol(format!(
                "response size {} != expected response size {response_size}",
                response.len()
            )));
        }
        Ok(response)
    }

    /// One-request-per-item variant: `count` independent requests built by
    /// index, answered in order.
    pub async fn requests(
        &self,
        count: usize,
        make_request: Arc<dyn Fn(u64) -> (String, String) + Send + Sync>,
        parse: ParseResponse,
        hint_servers: &[String],
    ) -> NodeResult<Vec<Vec<u8>>> {
        if count == 0 {
            return Err(NodeError::Protocol("response size 0".into()));
        }
        let segments = make_segments(count, count as u64, 1);
        let make = Arc::new(move |from: u64, to: u64| {
            debug_assert_eq!(to, from + 1, "incorrect single-item segment");
            make_request(from)
        });
        let answers = self
            .request_impl(segments, false, make, parse, hint_servers)
            .await?;
        if answers.len() != count {
            return Err(NodeError::Protocol("incorrect count answers".into()));
        }
        Ok(answers)
    }

    async fn request_impl(
        &self,
        segments: Vec<Segment>,
        precision: bool,
        make_request: MakeRequest,
        parse: ParseResponse,
        hint_servers: &[String],
    ) -> NodeResult<Vec<Vec<u8>>> {
        let servers = if hint_servers.is_empty() {
            &self.servers
        } else {
            hint_servers
        };
        if servers.is_empty() {
            return Err(NodeError::Protocol("no peers available".into()));
        }

        let count_segments = segments.len();
        let results: Arc<Mutex<Vec<Option<Vec<u8>>>>> =
            Arc::new(Mutex::new(vec![None; count_segments]));

        let (segment_tx, segment_rx) = mpsc::unbounded_channel::<Segment>();
        let segment_rx = Arc::new(Mutex::new(segment_rx));
        for segment in segments {
            segment_tx.send(segment).expect("receiver alive");
        }
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<WorkerEvent>();

        let mut workers = JoinSet::new();
        let worker_count = servers.len() * self.count_connections;
        for _connection in 0..self.count_connections {
            for server in servers {
                let server = server.clone();
                let client = self.client.clone();
                let segment_rx = Arc::clone(&segment_rx);
                let segment_tx = segment_tx.clone();
                let event_tx = event_tx.clone();
                let results = Arc::clone(&results);
                let make_request = Arc::clone(&make_request);
                let parse = Arc::clone(&parse);
                let stop = self.stop.clone();
                workers.spawn(async move {
                    loop {
                        if stop.is_stopped() {
                            break;
                        }
                        let segment = {
                            let mut rx = segment_rx.lock().await;
                            match rx.recv().await {
                                Some(segment) => segment,
                                None => break,
                            }
                        };
                        let (path, body) = make_request(segment.from_byte, segment.to_byte);
                        let outcome = async {
                            let raw = post(&client, &join_url(&server, &path), body).await?;
                            let parsed = parse(&raw)?;
                            if precision
                                && parsed.len() as u64 != segment.to_byte - segment.from_byte
                            {
                                return Err(NodeError::Protocol(
                                    "incorrect response size".into(),
                                ));
                            }
                            Ok::<_, NodeError>(parsed)
                        }
                        .await;
                        match outcome {
                            Ok(parsed) => {
                                results.lock().await[segment.index] = Some(parsed);
                                let _ = event_tx.send(WorkerEvent::Success);
                            }
                            Err(err) => {
                                tracing::warn!(%server, segment = segment.index, "segment request failed: {err}");
                                let _ = segment_tx.send(segment);
                                break;
                            }
                        }
                    }
                    let _ = event_tx.send(WorkerEvent::Exited);
                });
            }
        }
        drop(event_tx);

        let mut success = 0usize;
        let mut exited = 0usize;
        while let Some(event) = event_rx.recv().await {
            match event {
                WorkerEvent::Success => success += 1,
                WorkerEvent::Exited => exited += 1,
            }
            if success == count_segments || exited == worker_count {
                break;
            }
        }

        // Equivalent of stopping the queue: unblock and collect everybody.
        workers.abort_all();
        while workers.join_next().await.is_some() {}

        self.stop.check()?;
        if success != count_segments {
            return Err(NodeError::FanOutExhausted);
        }

        let mut results = results.lock().await;
        Ok(results
            .iter_mut()
            .map(|slot| slot.take().expect("all segments succeeded"))
            .collect())
    }
}
