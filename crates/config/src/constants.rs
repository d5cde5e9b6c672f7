use std::time::Duration;

/// Database layout version pinned on first run.
pub const VERSION_DB: &str = "v3.4";

/// Number of blocks fetched, verified and parsed speculatively by the peer
/// source.
pub const COUNT_ADVANCED_BLOCKS: usize = 8;

/// Blocks larger than this are fetched in byte-range segments instead of the
/// small-block batch path.
pub const MAX_BLOCK_SIZE_WITHOUT_ADVANCE: u64 = 100 * 1000;

/// Minimum size of one fan-out segment in a ranged dump fetch.
pub const MIN_RESPONSE_SIZE: u64 = 1000;

/// Size headroom reserved for the sign envelope of a requested dump.
pub const ESTIMATE_SIZE_SIGNATURE: u64 = 250;

/// The steady sync loop runs at most once per this interval.
pub const SYNC_LOOP_PERIOD: Duration = Duration::from_millis(500);

/// Timeout of regular peer HTTP requests.
pub const PEER_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout of node-test result uploads.
pub const NODE_TEST_UPLOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause between node-liveness test rounds.
pub const NODE_TEST_PERIOD: Duration = Duration::from_secs(60 * 60);

/// Server keep-alive: drop idle connections after this long.
pub const HTTP_KEEP_ALIVE_IDLE: Duration = Duration::from_secs(120);
