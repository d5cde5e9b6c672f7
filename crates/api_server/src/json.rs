//! JSON response builders shared by the handlers. The wire format keeps
//! the original envelope: an optional echoed `id`, a `result` payload on
//! success and `{error: {code, message}}` on failure; `version: v2`
//! renders large integers as strings.

use serde_json::{json, Map, Value};

use torrent_node_types::{BlockHeader, TransactionInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JsonVersion {
    #[default]
    V1,
    V2,
}

/// Field projection of header responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockTypeInfo {
    #[default]
    Simple,
    ForP2P,
    Small,
    Hashes,
    Full,
}

/// Request envelope fields shared by every method.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub id: Option<Value>,
    pub version: JsonVersion,
    pub pretty: bool,
}

impl RequestContext {
    pub fn from_doc(doc: &Value) -> Self {
        let id = doc
            .get("id")
            .filter(|id| id.is_string() || id.is_i64() || id.is_u64())
            .cloned();
        let version = match doc.get("version").and_then(Value::as_str) {
            Some("v2") | Some("version2") => JsonVersion::V2,
            _ => JsonVersion::V1,
        };
        let pretty = doc
            .get("pretty")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Self {
            id,
            version,
            pretty,
        }
    }
}

fn int_or_string(value: u64, as_string: bool) -> Value {
    if as_string {
        Value::String(value.to_string())
    } else {
        Value::from(value)
    }
}

fn envelope(ctx: &RequestContext, body: Map<String, Value>) -> String {
    let mut doc = Map::new();
    if let Some(id) = &ctx.id {
        doc.insert("id".to_string(), id.clone());
    }
    doc.extend(body);
    let doc = Value::Object(doc);
    if ctx.pretty {
        serde_json::to_string_pretty(&doc).expect("serializable response")
    } else {
        serde_json::to_string(&doc).expect("serializable response")
    }
}

pub fn error_response(ctx: &RequestContext, code: i32, message: &str) -> String {
    let mut body = Map::new();
    body.insert(
        "error".to_string(),
        json!({ "code": code, "message": message }),
    );
    envelope(ctx, body)
}

pub fn status_response(ctx: &RequestContext, version: &str, git_hash: &str) -> String {
    let mut body = Map::new();
    body.insert("result".to_string(), Value::String("ok".into()));
    body.insert("version".to_string(), Value::String(version.into()));
    body.insert("git_hash".to_string(), Value::String(git_hash.into()));
    envelope(ctx, body)
}

pub fn count_blocks_response(ctx: &RequestContext, count_blocks: u64) -> String {
    let as_string = ctx.version == JsonVersion::V2;
    let mut body = Map::new();
    body.insert(
        "result".to_string(),
        json!({ "count_blocks": int_or_string(count_blocks, as_string) }),
    );
    envelope(ctx, body)
}

pub fn dump_response(ctx: &RequestContext, dump_hex: &str) -> String {
    let mut body = Map::new();
    body.insert("result".to_string(), json!({ "dump": dump_hex }));
    envelope(ctx, body)
}

pub fn test_sign_response(ctx: &RequestContext, data_hex: &str) -> String {
    let mut body = Map::new();
    body.insert("result".to_string(), json!({ "data": data_hex }));
    envelope(ctx, body)
}

pub fn transaction_value(tx: &TransactionInfo, version: JsonVersion) -> Value {
    let as_string = version == JsonVersion::V2;
    let mut value = Map::new();
    value.insert("from".to_string(), Value::String(tx.from_address.to_string()));
    value.insert("to".to_string(), Value::String(tx.to_address.to_string()));
    value.insert(
        "value".to_string(),
        int_or_string(tx.value as u64, as_string),
    );
    value.insert(
        "transaction".to_string(),
        Value::String(hex::encode(&tx.hash)),
    );
    value.insert("data".to_string(), Value::String(hex::encode(&tx.data)));
    value.insert(
        "signature".to_string(),
        Value::String(hex::encode(&tx.sign)),
    );
    value.insert(
        "publickey".to_string(),
        Value::String(hex::encode(&tx.pub_key)),
    );
    value.insert("fee".to_string(), int_or_string(tx.fees as u64, as_string));
    value.insert(
        "realFee".to_string(),
        int_or_string(tx.real_fees as u64, as_string),
    );
    value.insert("nonce".to_string(), int_or_string(tx.nonce, as_string));
    value.insert(
        "blockNumber".to_string(),
        int_or_string(tx.block_number, as_string),
    );
    if let Some(status) = tx.int_status {
        value.insert("intStatus".to_string(), Value::from(status));
    }
    if let Some(delegate) = &tx.delegate {
        value.insert("isDelegate".to_string(), Value::Bool(delegate.is_delegate));
        if delegate.is_delegate {
            value.insert(
                "delegate".to_string(),
                int_or_string(delegate.value, as_string),
            );
        }
    }
    Value::Object(value)
}

/// Header fields under the chosen projection. The caller guarantees the
/// header is numbered.
pub fn block_header_value(
    header: &BlockHeader,
    block_type: BlockTypeInfo,
    version: JsonVersion,
) -> Value {
    let as_string = version == JsonVersion::V2;
    let number = header.block_number.unwrap_or(0);

    let mut value = Map::new();
    if block_type == BlockTypeInfo::Simple {
        if let Ok(name) = header.block_type_name() {
            value.insert("type".to_string(), Value::String(name.into()));
        }
    }
    value.insert("hash".to_string(), Value::String(header.hash.clone()));
    value.insert(
        "prev_hash".to_string(),
        Value::String(header.prev_hash.clone()),
    );
    if block_type == BlockTypeInfo::Simple {
        value.insert(
            "tx_hash".to_string(),
            Value::String(header.txs_hash.clone()),
        );
    }
    value.insert("number".to_string(), int_or_string(number, as_string));
    if block_type == BlockTypeInfo::Simple {
        value.insert(
            "timestamp".to_string(),
            int_or_string(header.timestamp, as_string),
        );
        value.insert(
            "count_txs".to_string(),
            int_or_string(header.count_txs.unwrap_or(0), as_string),
        );
        value.insert(
            "sign".to_string(),
            Value::String(hex::encode(&header.signature)),
        );
    }
    if block_type != BlockTypeInfo::Small {
        value.insert("size".to_string(), Value::from(header.block_size));
        value.insert(
            "fileName".to_string(),
            Value::String(header.file_pos.file_name.clone()),
        );
    }
    Value::Object(value)
}

pub fn block_response(
    ctx: &RequestContext,
    header: &BlockHeader,
    block_type: BlockTypeInfo,
) -> String {
    let mut body = Map::new();
    body.insert(
        "result".to_string(),
        block_header_value(header, block_type, ctx.version),
    );
    envelope(ctx, body)
}

pub fn blocks_response(
    ctx: &RequestContext,
    headers: &[BlockHeader],
    block_type: BlockTypeInfo,
) -> String {
    let values: Vec<Value> = headers
        .iter()
        .map(|header| block_header_value(header, block_type, ctx.version))
        .collect();
    let mut body = Map::new();
    body.insert("result".to_string(), Value::Array(values));
    envelope(ctx, body)
}

/// `full`/`hashes` projections: the simple header plus the transaction
/// list, either as objects or as bare hashes.
pub fn full_block_response(
    ctx: &RequestContext,
    header: &BlockHeader,
    txs: &[TransactionInfo],
    block_type: BlockTypeInfo,
) -> String {
    let mut value = match block_header_value(header, BlockTypeInfo::Simple, ctx.version) {
        Value::Object(map) => map,
        _ => unreachable!("header value is an object"),
    };
    let txs_value: Vec<Value> = match block_type {
        BlockTypeInfo::Hashes => txs
            .iter()
            .map(|tx| Value::String(hex::encode(&tx.hash)))
            .collect(),
        _ => txs
            .iter()
            .map(|tx| transaction_value(tx, ctx.version))
            .collect(),
    };
    value.insert("txs".to_string(), Value::Array(txs_value));

    let mut body = Map::new();
    body.insert("result".to_string(), Value::Object(value));
    envelope(ctx, body)
}
