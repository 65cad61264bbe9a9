use anyhow::Result;

use crate::api::{
    EndPointIdentity, IssueCode, IssuePhase, LanguageIdentity, LanguageIssue, MessageStatus,
};

use super::messages::{Request, Response, ResponseHeader};

pub const PROTOCOL_STAGE: &str = "protocol";

/// A `Protocol` failure addressed to `endpoint`.
pub fn protocol_failure(endpoint: &EndPointIdentity, message: &str) -> Response {
    let issue = LanguageIssue::error(IssuePhase::Protocol, IssueCode::Protocol, message);
    Response::Protocol {
        header: ResponseHeader::new(endpoint, &LanguageIdentity::default(), MessageStatus::Failure)
            .with_issues(vec![issue]),
        stage: PROTOCOL_STAGE.to_string(),
    }
}

/// Decodes a JSON request. A malformed request comes back as the
/// `Protocol` failure to send in its place, addressed to the request's
/// endpoint when that much could be read.
pub fn decode_request(json: &str) -> std::result::Result<Request, Response> {
    let value: serde_json::Value = match serde_json::from_str(json) {
        Ok(v) => v,
        Err(e) => {
            return Err(protocol_failure(
                &EndPointIdentity::default(),
                &format!("invalid JSON: {e}"),
            ))
        }
    };
    let endpoint = value
        .get("endpoint")
        .and_then(|e| serde_json::from_value::<EndPointIdentity>(e.clone()).ok())
        .unwrap_or_default();
    serde_json::from_value(value)
        .map_err(|e| protocol_failure(&endpoint, &format!("invalid request: {e}")))
}

pub fn encode_request(request: &Request) -> Result<String> {
    Ok(serde_json::to_string(request)?)
}

pub fn decode_response(json: &str) -> Result<Response> {
    Ok(serde_json::from_str(json)?)
}

pub fn encode_response(response: &Response) -> Result<String> {
    Ok(serde_json::to_string(response)?)
}
