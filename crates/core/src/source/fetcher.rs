//! Peer-side block acquisition: head discovery, speculative header
//! prefetch and dump fetching with batch, range and envelope variants.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use torrent_node_common::decompress;
use torrent_node_config::constants::{MAX_BLOCK_SIZE_WITHOUT_ADVANCE, MIN_RESPONSE_SIZE};
use torrent_node_types::record::be;
use torrent_node_types::MinimalBlockHeader;

use crate::error::{NodeError, NodeResult};
use crate::p2p::Peers;

/// Winning answer of a `get-count-blocks` broadcast: the highest advertised
/// count and every peer that advertised it.
pub struct LastBlockResponse {
    pub last_block: u64,
    pub servers: Vec<String>,
}

pub struct BlockFetcher {
    max_advanced: usize,
    batch_size: usize,
    compress: bool,
    peers: Arc<Peers>,
    cached_headers: Vec<(u64, MinimalBlockHeader)>,
    cached_dumps: HashMap<String, Vec<u8>>,
}

fn json_error_check(doc: &Value) -> NodeResult<()> {
    if let Some(error) = doc.get("error") {
        if !error.is_null() {
            return Err(NodeError::Protocol(error.to_string()));
        }
    }
    Ok(())
}

fn parse_json(raw: &[u8]) -> NodeResult<Value> {
    serde_json::from_slice(raw).map_err(|e| {
        NodeError::Protocol(format!(
            "json parse error: {e}. Data: {}",
            String::from_utf8_lossy(&raw[..raw.len().min(512)])
        ))
    })
}

fn result_object(doc: &Value) -> NodeResult<&Value> {
    json_error_check(doc)?;
    doc.get("result")
        .filter(|result| !result.is_null())
        .ok_or_else(|| NodeError::Protocol("result field not found".into()))
}

fn field_u64(json: &Value, name: &str) -> NodeResult<u64> {
    let field = json
        .get(name)
        .ok_or_else(|| NodeError::Protocol(format!("{name} field not found")))?;
    // v2 peers render numbers as strings.
    if let Some(value) = field.as_u64() {
        return Ok(value);
    }
    field
        .as_str()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| NodeError::Protocol(format!("{name} field not found")))
}

fn field_str(json: &Value, name: &str) -> NodeResult<String> {
    json.get(name)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| NodeError::Protocol(format!("{name} field not found")))
}

fn parse_minimal_header(json: &Value) -> NodeResult<MinimalBlockHeader> {
    Ok(MinimalBlockHeader {
        number: field_u64(json, "number")?,
        hash: field_str(json, "hash")?,
        parent_hash: field_str(json, "prev_hash")?,
        block_size: field_u64(json, "size")?,
        file_name: field_str(json, "fileName")?,
    })
}

fn parse_header_response(raw: &[u8]) -> NodeResult<MinimalBlockHeader> {
    let doc = parse_json(raw)?;
    parse_minimal_header(result_object(&doc)?)
}

fn parse_headers_response(raw: &[u8]) -> NodeResult<Vec<MinimalBlockHeader>> {
    let doc = parse_json(raw)?;
    let result = result_object(&doc)?
        .as_array()
        .ok_or_else(|| NodeError::Protocol("result field not found".into()))?;
    result.iter().map(parse_minimal_header).collect()
}

/// A dump response is raw bytes, except that peers report failures as a
/// small JSON body; a JSON-shaped prefix is inspected before the bytes are
/// trusted.
pub fn parse_dump_response(raw: &[u8]) -> NodeResult<Vec<u8>> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    if raw.len() <= 512 && raw.first() == Some(&b'{') && raw.last() == Some(&b'}') {
        let doc = parse_json(raw)?;
        let result = result_object(&doc)?;
        let dump = field_str(result, "dump")?;
        return Ok(dump.into_bytes());
    }
    Ok(raw.to_vec())
}

fn make_dump_range_request(block_hash: &str, from_byte: u64, to_byte: u64) -> (String, String) {
    (
        "get-dump-block-by-hash".to_string(),
        format!(
            "{{\"id\":1,\"params\":{{\"hash\": \"{block_hash}\" , \"fromByte\": {from_byte}, \"toByte\": {to_byte}, \"isHex\": false}}}}"
        ),
    )
}

fn make_dump_sign_request(block_hash: &str) -> (String, String) {
    (
        "get-dump-block-by-hash".to_string(),
        format!("{{\"id\":1,\"params\":{{\"hash\": \"{block_hash}\", \"isHex\": false, \"isSign\": true}}}}"),
    )
}

fn make_header_request(number: u64) -> (String, String) {
    (
        "get-block-by-number".to_string(),
        format!("{{\"id\":1,\"params\":{{\"number\": {number}, \"type\": \"forP2P\"}}}}"),
    )
}

fn make_headers_request(begin_block: u64, count_blocks: u64) -> (String, String) {
    (
        "get-blocks".to_string(),
        format!(
            "{{\"id\":1,\"params\":{{\"beginBlock\": {begin_block}, \"countBlocks\": {count_blocks}, \"type\": \"forP2P\", \"direction\": \"forward\"}}}}"
        ),
    )
}

impl BlockFetcher {
    pub fn new(max_advanced: usize, batch_size: usize, compress: bool, peers: Arc<Peers>) -> Self {
        Self {
            max_advanced: max_advanced.max(1),
            batch_size: batch_size.max(1),
            compress,
            peers,
            cached_headers: Vec::new(),
            cached_dumps: HashMap::new(),
        }
    }

    pub fn clear_advanced(&mut self) {
        self.cached_headers.clear();
        self.cached_dumps.clear();
    }

    /// Broadcasts `get-count-blocks` and keeps the highest answer together
    /// with every peer that reported it.
    pub async fn get_last_block(&self) -> NodeResult<LastBlockResponse> {
        let results = self.peers.broadcast("get-count-blocks", "{\"id\": 1}").await?;

        let mut last_block: Option<u64> = None;
        let mut servers = Vec::new();
        let mut last_error: Option<NodeError> = None;
        for item in results {
            let count = item.response.and_then(|raw| {
                let doc = parse_json(&raw)?;
                field_u64(result_object(&doc)?, "count_blocks")
            });
            match count {
                Ok(count) => {
                    let best = last_block.get_or_insert(0);
                    if *best < count {
                        *best = count;
                        servers.clear();
                        servers.push(item.server);
                    } else if *best == count {
                        servers.push(item.server);
                    }
                }
                Err(err) => last_error = Some(err),
            }
        }

        match last_block {
            Some(last_block) => Ok(LastBlockResponse {
                last_block,
                servers,
            }),
            None => Err(last_error
                .unwrap_or_else(|| NodeError::Protocol("no peers answered".into()))),
        }
    }

    /// Header of `block_num`, served from the prefetch cache. A miss
    /// refills the cache with up to `max_advanced` subsequent headers,
    /// fetched in `batch_size` ranges.
    pub async fn get_block_header(
        &mut self,
        block_num: u64,
        max_block_num: u64,
        server: &str,
    ) -> NodeResult<MinimalBlockHeader> {
        if let Some((_, header)) = self
            .cached_headers
            .iter()
            .find(|(number, _)| *number == block_num)
        {
            return Ok(header.clone());
        }

        self.cached_headers.clear();

        let count_blocks = (max_block_num - block_num + 1).min(self.max_advanced as u64);
        if count_blocks == 0 {
            return Err(NodeError::Protocol("incorrect count blocks".into()));
        }
        let batch_size = self.batch_size as u64;
        let count_batches = (count_blocks + batch_size - 1) / batch_size;

        let make = {
            let batch_size = batch_size;
            Arc::new(move |batch: u64| {
                let begin = block_num + batch * batch_size;
                let count = batch_size.min(count_blocks - batch * batch_size);
                if count == 1 {
                    make_header_request(begin)
                } else {
                    make_headers_request(begin, count)
                }
            })
        };
        let hints = vec![server.to_string()];
        let answers = self
            .peers
            .requests(
                count_batches as usize,
                make,
                Arc::new(|raw: &[u8]| Ok(raw.to_vec())),
                &hints,
            )
            .await?;

        let mut expected = block_num;
        for (batch, answer) in answers.iter().enumerate() {
            let count = batch_size.min(count_blocks - batch as u64 * batch_size);
            let headers = if count == 1 {
                vec![parse_header_response(answer)?]
            } else {
                parse_headers_response(answer)?
            };
            if headers.len() as u64 != count {
                return Err(NodeError::Protocol("incorrect answer".into()));
            }
            for header in headers {
                if header.number != expected {
                    return Err(NodeError::Protocol(format!(
                        "unexpected block number {} in prefetch, expected {expected}",
                        header.number
                    )));
                }
                self.cached_headers.push((expected, header));
                expected += 1;
            }
        }

        Ok(self.cached_headers[0].1.clone())
    }

    pub async fn get_block_header_without_advance(
        &self,
        block_num: u64,
        server: &str,
    ) -> NodeResult<MinimalBlockHeader> {
        let (path, body) = make_header_request(block_num);
        let raw = self.peers.run_one_request(server, &path, body).await?;
        parse_header_response(&raw)
    }

    /// Fetches one dump without touching the prefetch cache. Signed dumps
    /// come back as one envelope per request, so they are fetched whole
    /// with per-peer failover; unsigned large dumps are range-segmented
    /// across the peers.
    pub async fn get_block_dump_without_advance(
        &self,
        block_hash: &str,
        block_size: u64,
        hint_servers: &[String],
        is_sign: bool,
    ) -> NodeResult<Vec<u8>> {
        if is_sign {
            let (path, body) = make_dump_sign_request(block_hash);
            let mut last_error = NodeError::Protocol("no peers available".into());
            for server in hint_servers {
                match self.peers.run_one_request(server, &path, body.clone()).await {
                    Ok(raw) => return parse_dump_response(&raw),
                    Err(err) => last_error = err,
                }
            }
            Err(last_error)
        } else {
            let block_hash = block_hash.to_string();
            self.peers
                .request(
                    block_size,
                    MIN_RESPONSE_SIZE,
                    true,
                    Arc::new(move |from, to| make_dump_range_request(&block_hash, from, to)),
                    Arc::new(parse_dump_response),
                    hint_servers,
                )
                .await
        }
    }

    /// Dump of `block_hash`, served from the prefetch cache. Oversized
    /// blocks fall back to the ranged path; otherwise the cache is refilled
    /// with the run of small blocks following `block_hash` in one
    /// `get-dumps-blocks-by-hash` batch.
    pub async fn get_block_dump(
        &mut self,
        block_hash: &str,
        block_size: u64,
        hint_servers: &[String],
        is_sign: bool,
    ) -> NodeResult<Vec<u8>> {
        if let Some(dump) = self.cached_dumps.get(block_hash) {
            return Ok(dump.clone());
        }
        if block_size > MAX_BLOCK_SIZE_WITHOUT_ADVANCE {
            return self
                .get_block_dump_without_advance(block_hash, block_size, hint_servers, is_sign)
                .await;
        }

        self.cached_dumps.clear();

        let start = self
            .cached_headers
            .iter()
            .position(|(_, header)| header.hash == block_hash)
            .ok_or_else(|| NodeError::Protocol("advanced blocks not loaded".into()))?;
        let hashes: Vec<String> = self.cached_headers[start..]
            .iter()
            .take_while(|(_, header)| header.block_size <= MAX_BLOCK_SIZE_WITHOUT_ADVANCE)
            .map(|(_, header)| header.hash.clone())
            .collect();

        let body = format!(
            "{{\"id\":1,\"params\":{{\"hashes\": [{}], \"isSign\": {}, \"compress\": {}}}}}",
            hashes
                .iter()
                .map(|hash| format!("\"{hash}\""))
                .collect::<Vec<_>>()
                .join(", "),
            is_sign,
            self.compress,
        );

        let mut last_error = NodeError::Protocol("no peers available".into());
        for server in hint_servers {
            match self
                .peers
                .run_one_request(server, "get-dumps-blocks-by-hash", body.clone())
                .await
            {
                Ok(raw) => {
                    let raw = if self.compress {
                        decompress(&raw)?
                    } else {
                        raw
                    };
                    let mut pos = 0;
                    for hash in &hashes {
                        let dump = be::read_framed(&raw, &mut pos)?;
                        self.cached_dumps.insert(hash.clone(), dump.to_vec());
                    }
                    return self
                        .cached_dumps
                        .get(block_hash)
                        .cloned()
                        .ok_or_else(|| NodeError::Protocol("incorrect responses".into()));
                }
                Err(err) => last_error = err,
            }
        }
        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StopFlag;
    use httptest::{matchers::request, responders::status_code, Expectation, Server};

    fn peers_for(servers: Vec<String>) -> Arc<Peers> {
        let (_handle, stop) = StopFlag::new();
        Arc::new(Peers::new(servers, 1, stop).unwrap())
    }

    #[tokio::test]
    async fn head_discovery_keeps_the_winning_peers() {
        let low = Server::run();
        let high_one = Server::run();
        let high_two = Server::run();
        low.expect(
            Expectation::matching(request::method_path("POST", "/get-count-blocks"))
                .respond_with(status_code(200).body(r#"{"result":{"count_blocks":90}}"#)),
        );
        for server in [&high_one, &high_two] {
            server.expect(
                Expectation::matching(request::method_path("POST", "/get-count-blocks"))
                    .respond_with(status_code(200).body(r#"{"result":{"count_blocks":100}}"#)),
            );
        }

        let peers = peers_for(vec![
            low.url_str("/"),
            high_one.url_str("/"),
            high_two.url_str("/"),
        ]);
        let fetcher = BlockFetcher::new(8, 10, false, peers);
        let response = fetcher.get_last_block().await.unwrap();
        assert_eq!(response.last_block, 100);
        assert_eq!(response.servers.len(), 2);
        assert!(!response.servers.contains(&low.url_str("/")));
    }

    #[tokio::test]
    async fn head_discovery_accepts_v2_strings() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/get-count-blocks"))
                .respond_with(status_code(200).body(r#"{"result":{"count_blocks":"42"}}"#)),
        );
        let fetcher = BlockFetcher::new(8, 10, false, peers_for(vec![server.url_str("/")]));
        assert_eq!(fetcher.get_last_block().await.unwrap().last_block, 42);
    }

    #[tokio::test]
    async fn header_prefetch_validates_numbers() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/get-blocks"))
                .times(1)
                .respond_with(status_code(200).body(
                    r#"{"result":[
                        {"number":5,"hash":"aa","prev_hash":"pp","size":10,"fileName":"0.blk"},
                        {"number":6,"hash":"bb","prev_hash":"aa","size":11,"fileName":"0.blk"},
                        {"number":7,"hash":"cc","prev_hash":"bb","size":12,"fileName":"0.blk"}
                    ]}"#,
                )),
        );

        let url = server.url_str("/");
        let mut fetcher = BlockFetcher::new(3, 3, false, peers_for(vec![url.clone()]));
        let header = fetcher.get_block_header(5, 100, &url).await.unwrap();
        assert_eq!(header.hash, "aa");
        // Subsequent lookups hit the cache; no second request is expected.
        let header = fetcher.get_block_header(7, 100, &url).await.unwrap();
        assert_eq!(header.hash, "cc");
    }

    #[tokio::test]
    async fn header_prefetch_rejects_misnumbered_answers() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/get-block-by-number"))
                .times(1)
                .respond_with(status_code(200).body(
                    r#"{"result":{"number":9,"hash":"zz","prev_hash":"pp","size":10,"fileName":"0.blk"}}"#,
                )),
        );

        let url = server.url_str("/");
        let mut fetcher = BlockFetcher::new(1, 1, false, peers_for(vec![url.clone()]));
        let err = fetcher.get_block_header(5, 5, &url).await.unwrap_err();
        assert!(matches!(err, NodeError::Protocol(_)));
    }

    #[tokio::test]
    async fn dump_error_bodies_are_detected() {
        assert!(parse_dump_response(br#"{"error":{"code":-32603,"message":"nope"}}"#).is_err());
        assert_eq!(parse_dump_response(b"raw-bytes").unwrap(), b"raw-bytes");
    }
}
