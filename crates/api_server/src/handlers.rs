use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::Value;

use torrent_node_common::compress;
use torrent_node_types::record::be;
use torrent_node_types::BlockHeader;

use torrent_node_core::{NodeError, NodeResult};

use crate::error::{classify, CODE_INTERNAL};
use crate::json::{self, BlockTypeInfo, RequestContext};
use crate::server::ApiState;

const GET_BLOCK_BY_HASH: &str = "get-block-by-hash";
const GET_BLOCK_BY_NUMBER: &str = "get-block-by-number";
const GET_BLOCKS: &str = "get-blocks";
const GET_COUNT_BLOCKS: &str = "get-count-blocks";
const GET_DUMP_BLOCK_BY_HASH: &str = "get-dump-block-by-hash";
const GET_DUMP_BLOCK_BY_NUMBER: &str = "get-dump-block-by-number";
const GET_DUMPS_BLOCKS_BY_HASH: &str = "get-dumps-blocks-by-hash";
const GET_DUMPS_BLOCKS_BY_NUMBER: &str = "get-dumps-blocks-by-number";
const SIGN_TEST_STRING: &str = "sign-test-string";

fn json_body(status: StatusCode, body: String) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response()
}

fn raw_body(bytes: Vec<u8>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        bytes,
    )
        .into_response()
}

fn error_to_response(ctx: &RequestContext, err: NodeError) -> Response {
    if !err.is_cancelled() {
        tracing::error!("request failed: {err}");
    }
    let (status, code) = classify(&err);
    json_body(status, json::error_response(ctx, code, &err.to_string()))
}

pub(crate) async fn status(State(state): State<ApiState>) -> Response {
    let ctx = RequestContext::default();
    json_body(
        StatusCode::OK,
        json::status_response(&ctx, &state.version, &state.git_hash),
    )
}

pub(crate) async fn dispatch_method(
    State(state): State<ApiState>,
    Path(method): Path<String>,
    body: Bytes,
) -> Response {
    dispatch(&state, Some(&method), &body)
}

pub(crate) async fn dispatch_root(State(state): State<ApiState>, body: Bytes) -> Response {
    dispatch(&state, None, &body)
}

fn dispatch(state: &ApiState, method_from_path: Option<&str>, body: &[u8]) -> Response {
    // The URL form of sign-test-string signs the raw body as-is and
    // answers with the raw envelope.
    if method_from_path == Some(SIGN_TEST_STRING) {
        if body.is_empty() {
            return StatusCode::BAD_REQUEST.into_response();
        }
        return match state.node.sign_test_string(body) {
            Ok(envelope) => raw_body(envelope),
            Err(err) => error_to_response(&RequestContext::default(), err),
        };
    }

    let doc: Value = match serde_json::from_slice(body) {
        Ok(doc) => doc,
        Err(err) => {
            return json_body(
                StatusCode::INTERNAL_SERVER_ERROR,
                json::error_response(
                    &RequestContext::default(),
                    CODE_INTERNAL,
                    &format!("json parse error: {err}"),
                ),
            );
        }
    };
    let ctx = RequestContext::from_doc(&doc);

    let method = match method_from_path {
        Some(method) => method.to_string(),
        None => match doc.get("method").and_then(Value::as_str) {
            Some(method) => method.to_string(),
            None => {
                return error_to_response(&ctx, NodeError::User("method field not found".into()));
            }
        },
    };

    match handle_method(state, &method, &doc, &ctx) {
        Ok(response) => response,
        Err(err) => error_to_response(&ctx, err),
    }
}

fn handle_method(
    state: &ApiState,
    method: &str,
    doc: &Value,
    ctx: &RequestContext,
) -> NodeResult<Response> {
    match method {
        GET_BLOCK_BY_HASH => get_block(state, doc, ctx, BlockParam::Hash),
        GET_BLOCK_BY_NUMBER => get_block(state, doc, ctx, BlockParam::Number),
        GET_BLOCKS => get_blocks(state, doc, ctx),
        GET_COUNT_BLOCKS => Ok(json_body(
            StatusCode::OK,
            json::count_blocks_response(ctx, state.node.blockchain.count_blocks()),
        )),
        GET_DUMP_BLOCK_BY_HASH => get_dump_block(state, doc, ctx, BlockParam::Hash),
        GET_DUMP_BLOCK_BY_NUMBER => get_dump_block(state, doc, ctx, BlockParam::Number),
        GET_DUMPS_BLOCKS_BY_HASH => get_dumps_blocks(state, doc, BlockParam::Hash),
        GET_DUMPS_BLOCKS_BY_NUMBER => get_dumps_blocks(state, doc, BlockParam::Number),
        SIGN_TEST_STRING => sign_test_string(state, doc, ctx),
        other => Err(NodeError::User(format!("incorrect func {other}"))),
    }
}

enum BlockParam {
    Hash,
    Number,
}

fn params(doc: &Value) -> NodeResult<&Value> {
    doc.get("params")
        .filter(|params| params.is_object())
        .ok_or_else(|| NodeError::User("params field not found".into()))
}

fn param_str(params: &Value, name: &str) -> NodeResult<String> {
    params
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| NodeError::User(format!("{name} field not found")))
}

fn param_u64(params: &Value, name: &str) -> NodeResult<u64> {
    params
        .get(name)
        .and_then(Value::as_u64)
        .ok_or_else(|| NodeError::User(format!("{name} field not found")))
}

fn opt_u64(params: &Value, name: &str, default: u64) -> u64 {
    params.get(name).and_then(Value::as_u64).unwrap_or(default)
}

fn opt_i64(params: &Value, name: &str) -> i64 {
    params.get(name).and_then(Value::as_i64).unwrap_or(0)
}

fn opt_bool(params: &Value, name: &str) -> bool {
    params.get(name).and_then(Value::as_bool).unwrap_or(false)
}

fn block_type_of(params: &Value) -> BlockTypeInfo {
    if let Some(type_int) = params.get("type").and_then(Value::as_i64) {
        return match type_int {
            4 => BlockTypeInfo::ForP2P,
            1 => BlockTypeInfo::Hashes,
            2 => BlockTypeInfo::Full,
            3 => BlockTypeInfo::Small,
            _ => BlockTypeInfo::Simple,
        };
    }
    match params.get("type").and_then(Value::as_str) {
        Some("forP2P") => BlockTypeInfo::ForP2P,
        Some("hashes") => BlockTypeInfo::Hashes,
        Some("full") => BlockTypeInfo::Full,
        Some("small") => BlockTypeInfo::Small,
        _ => BlockTypeInfo::Simple,
    }
}

/// Looks a block up by the request's `hash` or `number` parameter; only
/// numbered headers count as found.
fn find_header(state: &ApiState, params: &Value, param: &BlockParam) -> NodeResult<BlockHeader> {
    let (header, rendered) = match param {
        BlockParam::Hash => {
            let hash = param_str(params, "hash")?;
            (state.node.blockchain.get_block_by_hash(&hash), hash)
        }
        BlockParam::Number => {
            let number = param_u64(params, "number")?;
            (
                state.node.blockchain.get_block_by_number(number),
                number.to_string(),
            )
        }
    };
    header
        .filter(|header| header.block_number.is_some())
        .ok_or(NodeError::NotFound(format!("block {rendered}")))
}

fn genesis_error(ctx: &RequestContext) -> Response {
    json_body(
        StatusCode::OK,
        json::error_response(
            ctx,
            CODE_INTERNAL,
            "Incorrect block number: 0. Genesis block begin with number 1",
        ),
    )
}

fn get_block(
    state: &ApiState,
    doc: &Value,
    ctx: &RequestContext,
    param: BlockParam,
) -> NodeResult<Response> {
    let params = params(doc)?;
    let block_type = block_type_of(params);
    let header = find_header(state, params, &param)?;
    let number = header.block_number.expect("found headers are numbered");
    if number == 0 {
        return Ok(genesis_error(ctx));
    }

    // The signatures confirming this block travel in its successor; load
    // them from the archive so callers can verify.
    if let Some(mut next) = state.node.blockchain.get_block_by_number(number + 1) {
        state.node.fill_signed_transactions(&mut next)?;
    }

    match block_type {
        BlockTypeInfo::Simple | BlockTypeInfo::ForP2P | BlockTypeInfo::Small => Ok(json_body(
            StatusCode::OK,
            json::block_response(ctx, &header, block_type),
        )),
        BlockTypeInfo::Hashes | BlockTypeInfo::Full => {
            let bi = state.node.full_block(&header, 0, 0)?;
            Ok(json_body(
                StatusCode::OK,
                json::full_block_response(ctx, &bi.header, &bi.txs, block_type),
            ))
        }
    }
}

fn get_blocks(state: &ApiState, doc: &Value, ctx: &RequestContext) -> NodeResult<Response> {
    let params = params(doc)?;
    let mut count_blocks = opt_i64(params, "countBlocks");
    let mut begin_block = opt_i64(params, "beginBlock");

    let block_type = match params.get("type").and_then(Value::as_str) {
        None => BlockTypeInfo::Simple,
        Some("simple") => BlockTypeInfo::Simple,
        Some("forP2P") => BlockTypeInfo::ForP2P,
        Some("small") => BlockTypeInfo::Small,
        Some(other) => {
            return Err(NodeError::User(format!("Incorrect block type: {other}")));
        }
    };
    let is_forward = params.get("direction").and_then(Value::as_str) == Some("forward");

    let max_block = state.node.blockchain.count_blocks() as i64;
    let mut headers = Vec::new();
    let mut push = |number: i64| -> NodeResult<()> {
        let header = state
            .node
            .blockchain
            .get_block_by_number(number as u64)
            .ok_or_else(|| NodeError::NotFound(format!("block {number}")))?;
        headers.push(header);
        Ok(())
    };

    if !is_forward {
        begin_block = max_block - begin_block;
        let mut number = begin_block;
        while number > begin_block - count_blocks && number > 0 {
            push(number)?;
            number -= 1;
        }
    } else {
        if count_blocks == 0 {
            count_blocks = max_block;
        }
        let end = (max_block + 1).min(begin_block + count_blocks);
        let mut number = begin_block;
        while number < end {
            if number == 0 {
                return Ok(genesis_error(ctx));
            }
            push(number)?;
            number += 1;
        }
    }

    Ok(json_body(
        StatusCode::OK,
        json::blocks_response(ctx, &headers, block_type),
    ))
}

fn get_dump_block(
    state: &ApiState,
    doc: &Value,
    ctx: &RequestContext,
    param: BlockParam,
) -> NodeResult<Response> {
    let params = params(doc)?;
    let header = find_header(state, params, &param)?;
    let from_byte = opt_u64(params, "fromByte", 0);
    let to_byte = opt_u64(params, "toByte", u64::MAX);
    let is_hex = opt_bool(params, "isHex");
    let is_sign = opt_bool(params, "isSign");
    let is_compress = opt_bool(params, "compress");

    let dump = state.node.block_dump(&header, from_byte, to_byte, is_sign)?;
    if dump.is_empty() {
        return Err(NodeError::NotFound(format!("block {}", header.hash)));
    }
    let dump = if is_compress { compress(&dump)? } else { dump };

    if is_hex {
        Ok(json_body(
            StatusCode::OK,
            json::dump_response(ctx, &hex::encode(dump)),
        ))
    } else {
        Ok(raw_body(dump))
    }
}

fn get_dumps_blocks(state: &ApiState, doc: &Value, param: BlockParam) -> NodeResult<Response> {
    let params = params(doc)?;
    let is_sign = opt_bool(params, "isSign");
    let is_compress = opt_bool(params, "compress");

    let (name, values) = match param {
        BlockParam::Hash => ("hashes", params.get("hashes")),
        BlockParam::Number => ("numbers", params.get("numbers")),
    };
    let values = values
        .and_then(Value::as_array)
        .ok_or_else(|| NodeError::User(format!("{name} field not found")))?;

    let mut result = Vec::new();
    for value in values {
        let header = match param {
            BlockParam::Hash => {
                let hash = value
                    .as_str()
                    .ok_or_else(|| NodeError::User("field not found".into()))?;
                state.node.blockchain.get_block_by_hash(hash)
            }
            BlockParam::Number => {
                let number = value
                    .as_u64()
                    .ok_or_else(|| NodeError::User("field not found".into()))?;
                state.node.blockchain.get_block_by_number(number)
            }
        }
        .filter(|header| header.block_number.is_some())
        .ok_or_else(|| NodeError::NotFound(format!("block {value}")))?;

        let dump = state.node.block_dump(&header, 0, u64::MAX, is_sign)?;
        if dump.is_empty() {
            return Err(NodeError::NotFound(format!("block {}", header.hash)));
        }
        be::write_framed(&mut result, &dump);
    }

    let result = if is_compress {
        compress(&result)?
    } else {
        result
    };
    Ok(raw_body(result))
}

fn sign_test_string(state: &ApiState, doc: &Value, ctx: &RequestContext) -> NodeResult<Response> {
    let params = params(doc)?;
    let data = param_str(params, "data")?;
    let data = hex::decode(data.strip_prefix("0x").unwrap_or(&data))
        .map_err(|_| NodeError::User("data field is not hex".into()))?;
    let envelope = state.node.sign_test_string(&data)?;
    Ok(json_body(
        StatusCode::OK,
        json::test_sign_response(ctx, &hex::encode(envelope)),
    ))
}
