//! The remote-query-executor wire contract.
//!
//! A request is one serde_json action body; its HMAC-SHA256 hex signature
//! over the raw bytes travels in the [BODY_SIGNATURE_HEADER] header. A
//! response is an ordered sequence of `(event, payload)` pairs, either as
//! one framed blob or as a chunked stream of individually framed pairs:
//! `raw_cursor_info` first, then zero or more `raw_chunk`s, closed by
//! `finished`. An `error_dump` aborts the sequence with a re-serialized
//! error payload; exception type names never cross this boundary. A
//! sequence that ends without `finished` is a protocol error.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use biqc::error::{codes, Error, Reason, Result, WithErrorInfo};
use biqc::translate::TranslatedQuery;

use crate::stream::Row;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex HMAC-SHA256 signature of the request body.
pub const BODY_SIGNATURE_HEADER: &str = "x-biqc-body-signature";

/// Signs raw body bytes. An empty key never signs anything: a deployment
/// without a shared secret must fail loudly, not fall through unsigned.
pub fn sign_body(key: &[u8], body: &[u8]) -> Result<String> {
    if key.is_empty() {
        return Err(
            Error::new_simple("request signing requires a non-empty key")
                .with_code(codes::PROTOCOL),
        );
    }
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|_| Error::new_assert("HMAC-SHA256 accepts keys of any length"))?;
    mac.update(body);
    Ok(format!("{:x}", mac.finalize().into_bytes()))
}

/// Checks a received body against the signature header value.
pub fn verify_body(key: &[u8], body: &[u8], signature: &str) -> Result<()> {
    if sign_body(key, body)? != signature {
        return Err(Error::new_simple("body signature mismatch").with_code(codes::PROTOCOL));
    }
    Ok(())
}

/// Actions a client may request from a remote executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RqeAction {
    /// Execute one translated statement against a named connection.
    ExecuteQuery {
        connection_id: String,
        query: TranslatedQuery,
    },
    /// Liveness probe.
    Ping,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub body: Vec<u8>,
    pub signature: String,
}

pub fn signed_request(action: &RqeAction, key: &[u8]) -> Result<SignedRequest> {
    let body = serde_json::to_vec(action)
        .map_err(|error| Error::new_assert(format!("action does not serialize: {error}")))?;
    let signature = sign_body(key, &body)?;
    Ok(SignedRequest { body, signature })
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RqeEventKind {
    RawCursorInfo,
    RawChunk,
    ErrorDump,
    Finished,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RqeEvent {
    pub kind: RqeEventKind,
    pub payload: serde_json::Value,
}

impl RqeEvent {
    pub fn new(kind: RqeEventKind, payload: serde_json::Value) -> Self {
        RqeEvent { kind, payload }
    }

    /// The wire form: a two-element `[name, payload]` array.
    pub fn into_frame(self) -> serde_json::Value {
        serde_json::Value::Array(vec![
            serde_json::Value::String(self.kind.to_string()),
            self.payload,
        ])
    }
}

/// Parses one framed `[name, payload]` pair.
pub fn parse_event(frame: serde_json::Value) -> Result<RqeEvent> {
    let serde_json::Value::Array(parts) = frame else {
        return Err(Error::new_simple("event frame is not a pair").with_code(codes::PROTOCOL));
    };
    let [name, payload] = <[serde_json::Value; 2]>::try_from(parts)
        .map_err(|_| Error::new_simple("event frame is not a pair").with_code(codes::PROTOCOL))?;
    let serde_json::Value::String(name) = name else {
        return Err(Error::new_simple("event name is not a string").with_code(codes::PROTOCOL));
    };
    let kind = name.parse::<RqeEventKind>().map_err(|_| {
        Error::new(Reason::Unexpected {
            found: format!("event type `{name}`"),
        })
        .with_code(codes::PROTOCOL)
    })?;
    Ok(RqeEvent::new(kind, payload))
}

/// The re-serializable error payload of an `error_dump` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDump {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorDump {
    pub fn from_error(error: &Error) -> Self {
        ErrorDump {
            message: error.reason.to_string(),
            code: error.code.map(str::to_string),
            details: None,
        }
    }

    pub fn into_error(self) -> Error {
        let error = Error::new_simple(self.message);
        match self.code.as_deref().and_then(known_code) {
            Some(code) => error.with_code(code),
            None => error,
        }
    }
}

/// Maps a wire code string back onto the static code table. Unknown codes
/// are dropped rather than invented.
fn known_code(code: &str) -> Option<&'static str> {
    const KNOWN: &[&str] = &[
        codes::UNKNOWN_FUNCTION,
        codes::WRONG_ARGUMENT_TYPES,
        codes::UNKNOWN_FIELD,
        codes::INVALID_LITERAL,
        codes::TOO_MANY_FIELDS,
        codes::INVALID_QUERY_STRUCTURE,
        codes::INVALID_FILTER_VALUE,
        codes::MASK_CONFLICT,
        codes::INCOMPATIBLE_LOD_DIMENSIONS,
        codes::SPLIT_GUARD_EXCEEDED,
        codes::PROTOCOL,
        codes::EMPTY_QUERY,
        codes::ROW_LIMIT,
    ];
    KNOWN.iter().copied().find(|known| *known == code)
}

/// A fully collected remote result.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawExecutionResult {
    pub cursor_info: serde_json::Value,
    pub rows: Vec<Row>,
}

/// Folds an event sequence into a result, enforcing the ordering contract:
/// `raw_cursor_info` first, `finished` terminal, `error_dump` aborting.
pub fn collect_result<I>(events: I) -> Result<RawExecutionResult>
where
    I: IntoIterator<Item = RqeEvent>,
{
    let mut events = events.into_iter();
    let Some(first) = events.next() else {
        return Err(Error::new_simple("result stream is empty").with_code(codes::PROTOCOL));
    };
    if first.kind != RqeEventKind::RawCursorInfo {
        return Err(Error::new_simple(format!(
            "first event is `{}`, expected `raw_cursor_info`",
            first.kind
        ))
        .with_code(codes::PROTOCOL));
    }

    let mut result = RawExecutionResult {
        cursor_info: first.payload,
        rows: Vec::new(),
    };
    let mut last = RqeEventKind::RawCursorInfo;
    for event in events {
        last = event.kind;
        match event.kind {
            RqeEventKind::RawCursorInfo => {
                return Err(Error::new_simple("repeated `raw_cursor_info` event")
                    .with_code(codes::PROTOCOL));
            }
            RqeEventKind::RawChunk => {
                let serde_json::Value::Array(chunk_rows) = event.payload else {
                    return Err(Error::new_simple("chunk payload is not a list")
                        .with_code(codes::PROTOCOL));
                };
                for row in chunk_rows {
                    let serde_json::Value::Array(cells) = row else {
                        return Err(Error::new_simple("chunk row is not a list")
                            .with_code(codes::PROTOCOL));
                    };
                    result.rows.push(cells);
                }
            }
            RqeEventKind::ErrorDump => {
                let dump: ErrorDump = serde_json::from_value(event.payload).map_err(|_| {
                    Error::new_simple("malformed error payload").with_code(codes::PROTOCOL)
                })?;
                return Err(dump.into_error());
            }
            RqeEventKind::Finished => return Ok(result),
        }
    }
    Err(Error::new_simple(format!(
        "finish event was not received (last: `{last}`)"
    ))
    .with_code(codes::PROTOCOL))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    // RFC 4231 test case 2.
    #[test]
    fn hmac_signature_matches_the_reference_vector() {
        let signature = sign_body(b"Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            signature,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn empty_keys_never_sign() {
        let error = sign_body(b"", b"body").unwrap_err();
        assert_eq!(error.code, Some(codes::PROTOCOL));
        assert_eq!(
            error.reason.to_string(),
            "request signing requires a non-empty key"
        );
    }

    #[test]
    fn signed_requests_verify_round_trip() {
        let request = signed_request(&RqeAction::Ping, b"secret").unwrap();
        verify_body(b"secret", &request.body, &request.signature).unwrap();

        let tampered = verify_body(b"secret", b"{\"action\":\"other\"}", &request.signature);
        assert_eq!(tampered.unwrap_err().code, Some(codes::PROTOCOL));
    }

    #[test]
    fn actions_serialize_with_a_tag() {
        let request = signed_request(&RqeAction::Ping, b"secret").unwrap();
        let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(body, json!({"action": "ping"}));
    }

    #[test]
    fn event_frames_round_trip() {
        let event = RqeEvent::new(RqeEventKind::RawChunk, json!([[1, "SF"]]));
        let parsed = parse_event(event.clone().into_frame()).unwrap();
        assert_eq!(parsed, event);
    }

    #[rstest]
    #[case::object(json!({"event": "finished"}), "event frame is not a pair")]
    #[case::one_element(json!(["finished"]), "event frame is not a pair")]
    #[case::three_elements(json!(["finished", null, null]), "event frame is not a pair")]
    #[case::numeric_name(json!([1, null]), "event name is not a string")]
    #[case::unknown_name(json!(["no_such_event", null]), "unexpected event type `no_such_event`")]
    fn malformed_frames_are_protocol_errors(
        #[case] frame: serde_json::Value,
        #[case] message: &str,
    ) {
        let error = parse_event(frame).unwrap_err();
        assert_eq!(error.code, Some(codes::PROTOCOL));
        assert_eq!(error.reason.to_string(), message);
    }

    fn cursor_info() -> RqeEvent {
        RqeEvent::new(RqeEventKind::RawCursorInfo, json!({"names": ["res_0"]}))
    }

    #[test]
    fn events_collect_into_rows() {
        let result = collect_result(vec![
            cursor_info(),
            RqeEvent::new(RqeEventKind::RawChunk, json!([[1], [2]])),
            RqeEvent::new(RqeEventKind::RawChunk, json!([])),
            RqeEvent::new(RqeEventKind::RawChunk, json!([[3]])),
            RqeEvent::new(RqeEventKind::Finished, json!(null)),
        ])
        .unwrap();
        assert_eq!(result.cursor_info, json!({"names": ["res_0"]}));
        assert_eq!(result.rows, vec![vec![json!(1)], vec![json!(2)], vec![json!(3)]]);
    }

    #[test]
    fn cursor_info_must_come_first() {
        let error = collect_result(vec![
            RqeEvent::new(RqeEventKind::RawChunk, json!([])),
            RqeEvent::new(RqeEventKind::Finished, json!(null)),
        ])
        .unwrap_err();
        assert_eq!(error.code, Some(codes::PROTOCOL));
        assert_eq!(
            error.reason.to_string(),
            "first event is `raw_chunk`, expected `raw_cursor_info`"
        );
    }

    #[test]
    fn a_stream_without_finished_is_cut_off() {
        let error = collect_result(vec![
            cursor_info(),
            RqeEvent::new(RqeEventKind::RawChunk, json!([[1]])),
        ])
        .unwrap_err();
        assert_eq!(error.code, Some(codes::PROTOCOL));
        assert_eq!(
            error.reason.to_string(),
            "finish event was not received (last: `raw_chunk`)"
        );
    }

    #[test]
    fn events_after_finished_are_ignored() {
        let result = collect_result(vec![
            cursor_info(),
            RqeEvent::new(RqeEventKind::Finished, json!(null)),
            RqeEvent::new(RqeEventKind::RawChunk, json!([[9]])),
        ])
        .unwrap();
        assert!(result.rows.is_empty());
    }

    #[test]
    fn error_dumps_abort_with_the_carried_code() {
        let dump = ErrorDump {
            message: "query returned more than 10 rows".to_string(),
            code: Some("E0503".to_string()),
            details: None,
        };
        let error = collect_result(vec![
            cursor_info(),
            RqeEvent::new(RqeEventKind::ErrorDump, serde_json::to_value(&dump).unwrap()),
        ])
        .unwrap_err();
        assert_eq!(error.code, Some(codes::ROW_LIMIT));
        assert_eq!(error.reason.to_string(), "query returned more than 10 rows");
    }

    #[test]
    fn unknown_wire_codes_are_dropped() {
        let dump = ErrorDump {
            message: "boom".to_string(),
            code: Some("E9999".to_string()),
            details: None,
        };
        assert_eq!(dump.into_error().code, None);
    }

    #[test]
    fn error_dump_round_trips_a_local_error() {
        let original = Error::new_simple("field `f_1` not found").with_code(codes::UNKNOWN_FIELD);
        let dump = ErrorDump::from_error(&original);
        let revived = dump.into_error();
        assert_eq!(revived.code, Some(codes::UNKNOWN_FIELD));
        assert_eq!(revived.reason.to_string(), "field `f_1` not found");
    }
}
