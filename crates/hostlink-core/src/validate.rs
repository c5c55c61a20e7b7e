//! Schema validation for wire messages.
//!
//! Raw JSON is checked against the declared shape for its `type` tag before
//! it reaches any session logic. Errors name the offending field path so the
//! caller can log something useful; the message is then discarded. A
//! malformed message never takes the connection down.
//!
//! Optional fields stay optional exactly as declared. Numeric fields are
//! checked as finite integers within the range the wire allows (oversized
//! float literals parse to infinity and are rejected here).

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::message::{RequestMessage, ResponseMessage};

type Object = serde_json::Map<String, Value>;

/// A wire message that failed schema validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("message is not a JSON object")]
    NotAnObject,
    #[error("missing `type` tag")]
    MissingType,
    #[error("`type` tag must be a string")]
    TypeNotString,
    #[error("unknown message type `{0}`")]
    UnknownType(String),
    #[error("invalid field `{path}`: expected {expected}")]
    Field { path: String, expected: String },
}

fn field_err(path: impl Into<String>, expected: impl Into<String>) -> SchemaError {
    SchemaError::Field {
        path: path.into(),
        expected: expected.into(),
    }
}

/// Validate a host-to-client message.
pub fn validate_response(raw: Value) -> Result<ResponseMessage, SchemaError> {
    let null = Value::Null;
    let obj = raw.as_object().ok_or(SchemaError::NotAnObject)?;
    let tag = tag_of(obj)?;
    let data = obj.get("data").unwrap_or(&null);

    match tag {
        "join_success" | "player_joined" | "player_left" => {
            uint(data, "data", u64::from(u32::MAX))?;
        }
        "leave_success" => {
            let data = object(data, "data")?;
            get_bool(data, "data", "success")?;
        }
        "webrtc_rtp_capabilities" => check_rtp_capabilities(data, "data")?,
        "webrtc_transport_created" => {
            let data = object(data, "data")?;
            get_bool(data, "data", "success")?;
            transport_role(get(data, "data", "role")?, "data.role")?;
            if let Some(params) = opt(data, "params") {
                check_transport_params(params, "data.params")?;
            }
        }
        "webrtc_produce_success" => {
            let data = object(data, "data")?;
            get_bool(data, "data", "success")?;
            opt_str(data, "data", "id")?;
        }
        "new_consumer" => check_new_consumer(data, "data")?,
        "player_name" | "player_avatar" | "player_handle" => {
            let data = object(data, "data")?;
            get_uint(data, "data", "playerId", u64::from(u32::MAX))?;
            opt_str(data, "data", "value")?;
        }
        "player_location" => {
            let data = object(data, "data")?;
            get_uint(data, "data", "playerId", u64::from(u32::MAX))?;
            let location = get_array(data, "data", "location")?;
            if location.len() != 7 {
                return Err(field_err("data.location", "an array of 7 numbers"));
            }
            for (i, item) in location.iter().enumerate() {
                finite(item, &format!("data.location[{i}]"))?;
            }
        }
        "player_falling" => {
            let data = object(data, "data")?;
            get_uint(data, "data", "playerId", u64::from(u32::MAX))?;
            get_bool(data, "data", "falling")?;
        }
        "player_chat" => {
            let data = object(data, "data")?;
            get_uint(data, "data", "playerId", u64::from(u32::MAX))?;
            get_str(data, "data", "text")?;
            get_uint(data, "data", "timestamp", u64::MAX)?;
        }
        other => return Err(SchemaError::UnknownType(other.to_string())),
    }

    decode(raw)
}

/// Validate a client-to-host message.
pub fn validate_request(raw: Value) -> Result<RequestMessage, SchemaError> {
    let null = Value::Null;
    let obj = raw.as_object().ok_or(SchemaError::NotAnObject)?;
    let tag = tag_of(obj)?;
    let data = obj.get("data").unwrap_or(&null);

    match tag {
        "join" | "leave" => {
            let data = object(data, "data")?;
            let space_id = get_str(data, "data", "spaceId")?;
            if space_id.is_empty() {
                return Err(field_err("data.spaceId", "a non-empty string"));
            }
        }
        "webrtc_get_router_rtp_capabilities" => {
            if !data.is_null() {
                return Err(field_err("data", "null"));
            }
        }
        "webrtc_create_transport" => transport_role(data, "data")?,
        "webrtc_connect_transport" => {
            let data = object(data, "data")?;
            transport_role(get(data, "data", "role")?, "data.role")?;
            check_dtls_parameters(get(data, "data", "dtlsParameters")?, "data.dtlsParameters")?;
        }
        "webrtc_produce" => {
            let data = object(data, "data")?;
            media_kind(get(data, "data", "kind")?, "data.kind")?;
            check_rtp_parameters(get(data, "data", "rtpParameters")?, "data.rtpParameters")?;
        }
        "set_rtp_capabilities" => check_rtp_capabilities(data, "data")?,
        "webrtc_consume_audio" => {
            let data = object(data, "data")?;
            check_rtp_capabilities(get(data, "data", "rtpCapabilities")?, "data.rtpCapabilities")?;
        }
        // Engine-defined payload, forwarded verbatim.
        "set_grounded" => {}
        "chat" => {
            if !data.is_string() {
                return Err(field_err("data", "a string"));
            }
        }
        other => return Err(SchemaError::UnknownType(other.to_string())),
    }

    decode(raw)
}

fn decode<T: DeserializeOwned>(raw: Value) -> Result<T, SchemaError> {
    serde_json::from_value(raw)
        .map_err(|err| field_err("data", format!("a decodable payload ({err})")))
}

fn tag_of(obj: &Object) -> Result<&str, SchemaError> {
    obj.get("type")
        .ok_or(SchemaError::MissingType)?
        .as_str()
        .ok_or(SchemaError::TypeNotString)
}

// Shape checks for the media negotiation payloads. These are routed to the
// media stack, so only their shape is enforced.

fn check_rtp_capabilities(value: &Value, path: &str) -> Result<(), SchemaError> {
    let obj = object(value, path)?;

    if let Some(codecs) = opt(obj, "codecs") {
        let path = format!("{path}.codecs");
        for (i, codec) in array(codecs, &path)?.iter().enumerate() {
            let path = format!("{path}[{i}]");
            let codec = object(codec, &path)?;
            media_kind(get(codec, &path, "kind")?, &format!("{path}.kind"))?;
            get_str(codec, &path, "mimeType")?;
            get_uint(codec, &path, "clockRate", u64::from(u32::MAX))?;
            opt_uint(codec, &path, "preferredPayloadType", u64::from(u8::MAX))?;
            opt_uint(codec, &path, "channels", u64::from(u8::MAX))?;
            check_opt_rtcp_feedback(codec, &path)?;
        }
    }

    if let Some(extensions) = opt(obj, "headerExtensions") {
        let path = format!("{path}.headerExtensions");
        for (i, ext) in array(extensions, &path)?.iter().enumerate() {
            let path = format!("{path}[{i}]");
            let ext = object(ext, &path)?;
            media_kind(get(ext, &path, "kind")?, &format!("{path}.kind"))?;
            get_str(ext, &path, "uri")?;
            get_uint(ext, &path, "preferredId", u64::from(u16::MAX))?;
            opt_bool(ext, &path, "preferredEncrypt")?;
            if let Some(direction) = opt(ext, "direction") {
                one_of(
                    direction,
                    &format!("{path}.direction"),
                    &["sendrecv", "sendonly", "recvonly", "inactive"],
                )?;
            }
        }
    }

    Ok(())
}

fn check_rtp_parameters(value: &Value, path: &str) -> Result<(), SchemaError> {
    let obj = object(value, path)?;
    opt_str(obj, path, "mid")?;

    let codecs_path = format!("{path}.codecs");
    for (i, codec) in get_array(obj, path, "codecs")?.iter().enumerate() {
        let path = format!("{codecs_path}[{i}]");
        let codec = object(codec, &path)?;
        get_str(codec, &path, "mimeType")?;
        get_uint(codec, &path, "payloadType", u64::from(u8::MAX))?;
        get_uint(codec, &path, "clockRate", u64::from(u32::MAX))?;
        opt_uint(codec, &path, "channels", u64::from(u8::MAX))?;
        check_opt_rtcp_feedback(codec, &path)?;
    }

    if let Some(extensions) = opt(obj, "headerExtensions") {
        let path = format!("{path}.headerExtensions");
        for (i, ext) in array(extensions, &path)?.iter().enumerate() {
            let path = format!("{path}[{i}]");
            let ext = object(ext, &path)?;
            get_str(ext, &path, "uri")?;
            get_uint(ext, &path, "id", u64::from(u16::MAX))?;
            opt_bool(ext, &path, "encrypt")?;
        }
    }

    if let Some(encodings) = opt(obj, "encodings") {
        let path = format!("{path}.encodings");
        for (i, encoding) in array(encodings, &path)?.iter().enumerate() {
            let path = format!("{path}[{i}]");
            let encoding = object(encoding, &path)?;
            opt_uint(encoding, &path, "ssrc", u64::from(u32::MAX))?;
            opt_str(encoding, &path, "rid")?;
            opt_uint(encoding, &path, "codecPayloadType", u64::from(u8::MAX))?;
            if let Some(rtx) = opt(encoding, "rtx") {
                let rtx_path = format!("{path}.rtx");
                let rtx = object(rtx, &rtx_path)?;
                get_uint(rtx, &rtx_path, "ssrc", u64::from(u32::MAX))?;
            }
            opt_bool(encoding, &path, "dtx")?;
            opt_str(encoding, &path, "scalabilityMode")?;
            if let Some(scale) = opt(encoding, "scaleResolutionDownBy") {
                finite(scale, &format!("{path}.scaleResolutionDownBy"))?;
            }
            opt_uint(encoding, &path, "maxBitrate", u64::from(u32::MAX))?;
        }
    }

    if let Some(rtcp) = opt(obj, "rtcp") {
        let path = format!("{path}.rtcp");
        let rtcp = object(rtcp, &path)?;
        opt_str(rtcp, &path, "cname")?;
        opt_bool(rtcp, &path, "reducedSize")?;
        opt_bool(rtcp, &path, "mux")?;
    }

    Ok(())
}

fn check_transport_params(value: &Value, path: &str) -> Result<(), SchemaError> {
    let obj = object(value, path)?;
    get_str(obj, path, "id")?;

    let ice_path = format!("{path}.iceParameters");
    let ice = object(get(obj, path, "iceParameters")?, &ice_path)?;
    get_str(ice, &ice_path, "usernameFragment")?;
    get_str(ice, &ice_path, "password")?;
    opt_bool(ice, &ice_path, "iceLite")?;

    let candidates_path = format!("{path}.iceCandidates");
    for (i, candidate) in get_array(obj, path, "iceCandidates")?.iter().enumerate() {
        let path = format!("{candidates_path}[{i}]");
        let candidate = object(candidate, &path)?;
        get_str(candidate, &path, "foundation")?;
        get_str(candidate, &path, "ip")?;
        get_uint(candidate, &path, "port", u64::from(u16::MAX))?;
        get_uint(candidate, &path, "priority", u64::from(u32::MAX))?;
        one_of(
            get(candidate, &path, "protocol")?,
            &format!("{path}.protocol"),
            &["udp", "tcp"],
        )?;
        one_of(get(candidate, &path, "type")?, &format!("{path}.type"), &["host"])?;
        if let Some(tcp_type) = opt(candidate, "tcpType") {
            one_of(tcp_type, &format!("{path}.tcpType"), &["passive"])?;
        }
    }

    check_dtls_parameters(
        get(obj, path, "dtlsParameters")?,
        &format!("{path}.dtlsParameters"),
    )
}

fn check_dtls_parameters(value: &Value, path: &str) -> Result<(), SchemaError> {
    let obj = object(value, path)?;
    if let Some(role) = opt(obj, "role") {
        one_of(role, &format!("{path}.role"), &["auto", "client", "server"])?;
    }
    let fingerprints_path = format!("{path}.fingerprints");
    for (i, fingerprint) in get_array(obj, path, "fingerprints")?.iter().enumerate() {
        let path = format!("{fingerprints_path}[{i}]");
        let fingerprint = object(fingerprint, &path)?;
        get_str(fingerprint, &path, "algorithm")?;
        get_str(fingerprint, &path, "value")?;
    }
    Ok(())
}

fn check_new_consumer(value: &Value, path: &str) -> Result<(), SchemaError> {
    let obj = object(value, path)?;
    get_str(obj, path, "producerId")?;
    get_str(obj, path, "id")?;
    media_kind(get(obj, path, "kind")?, &format!("{path}.kind"))?;
    check_rtp_parameters(
        get(obj, path, "rtpParameters")?,
        &format!("{path}.rtpParameters"),
    )?;
    one_of(
        get(obj, path, "type")?,
        &format!("{path}.type"),
        &["simulcast", "svc", "simple", "pipe"],
    )?;
    get_bool(obj, path, "producerPaused")?;
    Ok(())
}

fn check_opt_rtcp_feedback(obj: &Object, path: &str) -> Result<(), SchemaError> {
    if let Some(feedback) = opt(obj, "rtcpFeedback") {
        let path = format!("{path}.rtcpFeedback");
        for (i, entry) in array(feedback, &path)?.iter().enumerate() {
            let path = format!("{path}[{i}]");
            let entry = object(entry, &path)?;
            get_str(entry, &path, "type")?;
            opt_str(entry, &path, "parameter")?;
        }
    }
    Ok(())
}

fn one_of(value: &Value, path: &str, allowed: &[&str]) -> Result<(), SchemaError> {
    match value.as_str() {
        Some(s) if allowed.contains(&s) => Ok(()),
        _ => Err(field_err(path, format!("one of {allowed:?}"))),
    }
}

fn media_kind(value: &Value, path: &str) -> Result<(), SchemaError> {
    one_of(value, path, &["audio", "video"])
}

fn transport_role(value: &Value, path: &str) -> Result<(), SchemaError> {
    one_of(value, path, &["producer", "consumer"])
}

// Leaf helpers. `opt` treats an explicit null the same as an absent key.

fn opt<'v>(obj: &'v Object, key: &str) -> Option<&'v Value> {
    obj.get(key).filter(|value| !value.is_null())
}

fn object<'v>(value: &'v Value, path: &str) -> Result<&'v Object, SchemaError> {
    value.as_object().ok_or_else(|| field_err(path, "an object"))
}

fn array<'v>(value: &'v Value, path: &str) -> Result<&'v Vec<Value>, SchemaError> {
    value.as_array().ok_or_else(|| field_err(path, "an array"))
}

fn get<'v>(obj: &'v Object, path: &str, key: &str) -> Result<&'v Value, SchemaError> {
    obj.get(key)
        .ok_or_else(|| field_err(format!("{path}.{key}"), "a value"))
}

fn get_array<'v>(obj: &'v Object, path: &str, key: &str) -> Result<&'v Vec<Value>, SchemaError> {
    array(get(obj, path, key)?, &format!("{path}.{key}"))
}

fn get_str<'v>(obj: &'v Object, path: &str, key: &str) -> Result<&'v str, SchemaError> {
    get(obj, path, key)?
        .as_str()
        .ok_or_else(|| field_err(format!("{path}.{key}"), "a string"))
}

fn opt_str(obj: &Object, path: &str, key: &str) -> Result<(), SchemaError> {
    match opt(obj, key) {
        Some(value) if !value.is_string() => {
            Err(field_err(format!("{path}.{key}"), "a string"))
        }
        _ => Ok(()),
    }
}

fn get_bool(obj: &Object, path: &str, key: &str) -> Result<bool, SchemaError> {
    get(obj, path, key)?
        .as_bool()
        .ok_or_else(|| field_err(format!("{path}.{key}"), "a boolean"))
}

fn opt_bool(obj: &Object, path: &str, key: &str) -> Result<(), SchemaError> {
    match opt(obj, key) {
        Some(value) if !value.is_boolean() => {
            Err(field_err(format!("{path}.{key}"), "a boolean"))
        }
        _ => Ok(()),
    }
}

fn uint(value: &Value, path: &str, max: u64) -> Result<u64, SchemaError> {
    match value.as_u64() {
        Some(n) if n <= max => Ok(n),
        _ => Err(field_err(path, format!("an unsigned integer <= {max}"))),
    }
}

fn get_uint(obj: &Object, path: &str, key: &str, max: u64) -> Result<u64, SchemaError> {
    uint(get(obj, path, key)?, &format!("{path}.{key}"), max)
}

fn opt_uint(obj: &Object, path: &str, key: &str, max: u64) -> Result<(), SchemaError> {
    match opt(obj, key) {
        Some(value) => uint(value, &format!("{path}.{key}"), max).map(|_| ()),
        None => Ok(()),
    }
}

fn finite(value: &Value, path: &str) -> Result<f64, SchemaError> {
    match value.as_f64() {
        Some(n) if n.is_finite() => Ok(n),
        _ => Err(field_err(path, "a finite number")),
    }
}
