//! Registration endpoint (POST /register)
//!
//! Accepts `address`, `port` and `endpoint` as form fields. Fields may also
//! come from the query string; body values take precedence.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use std::sync::Arc;
use tracing::{debug, warn};

use super::{empty_response, error_response};
use crate::server::AppState;
use crate::types::{Result, RollcallError, Service};

/// Raw registration form; every field optional so missing ones get a clear 400
#[derive(Default, Debug)]
struct RegisterForm {
    address: Option<String>,
    port: Option<String>,
    endpoint: Option<String>,
}

impl RegisterForm {
    fn or(self, fallback: RegisterForm) -> Self {
        Self {
            address: self.address.or(fallback.address),
            port: self.port.or(fallback.port),
            endpoint: self.endpoint.or(fallback.endpoint),
        }
    }
}

/// Decode form pairs; a repeated key keeps its first value, unknown keys are ignored
fn decode_form(raw: &[u8]) -> Result<RegisterForm> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(raw)
        .map_err(|e| RollcallError::BadRequest(format!("malformed form: {}", e)))?;

    let mut form = RegisterForm::default();
    for (key, value) in pairs {
        let slot = match key.as_str() {
            "address" => &mut form.address,
            "port" => &mut form.port,
            "endpoint" => &mut form.endpoint,
            _ => continue,
        };
        slot.get_or_insert(value);
    }
    Ok(form)
}

fn required(value: Option<String>, field: &str) -> Result<String> {
    value.ok_or_else(|| RollcallError::BadRequest(format!("missing field '{}'", field)))
}

/// Validate a registration into a service descriptor
pub fn parse_registration(query: Option<&str>, body: &[u8]) -> Result<Service> {
    let from_query = match query {
        Some(q) => decode_form(q.as_bytes())?,
        None => RegisterForm::default(),
    };
    let form = decode_form(body)?.or(from_query);

    let address = required(form.address, "address")?;
    let port = required(form.port, "port")?;
    let endpoint = required(form.endpoint, "endpoint")?;

    if address.is_empty() {
        return Err(RollcallError::BadRequest("address must not be empty".into()));
    }
    let port: u16 = port
        .parse()
        .map_err(|_| RollcallError::BadRequest(format!("invalid port '{}'", port)))?;
    if endpoint.is_empty() {
        return Err(RollcallError::BadRequest("endpoint must not be empty".into()));
    }
    if !endpoint.starts_with('/') {
        return Err(RollcallError::BadRequest(format!(
            "endpoint '{}' must start with '/'",
            endpoint
        )));
    }

    Ok(Service::new(address, port, endpoint))
}

/// Handle POST /register
pub async fn handle_register(state: Arc<AppState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let query = req.uri().query().map(str::to_string);
    let body = match req.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("Register request body error: {}", e);
            return error_response(RollcallError::BadRequest(
                "failed to read request body".into(),
            ));
        }
    };

    let service = match parse_registration(query.as_deref(), &body) {
        Ok(service) => service,
        Err(e) => {
            debug!("Rejected registration: {}", e);
            return error_response(e);
        }
    };

    match state.registry.register(&service).await {
        Ok(outcome) => {
            debug!(service = %service, ?outcome, "Registration handled");
            empty_response(StatusCode::OK)
        }
        Err(e) => {
            warn!(service = %service, "Registration failed: {}", e);
            error_response(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bad_request(result: Result<Service>) -> bool {
        matches!(result, Err(RollcallError::BadRequest(_)))
    }

    #[test]
    fn test_parse_valid_form() {
        let service =
            parse_registration(None, b"address=localhost&port=8080&endpoint=%2Fwebhook").unwrap();
        assert_eq!(service, Service::new("localhost", 8080, "/webhook"));
    }

    #[test]
    fn test_parse_port_bounds() {
        assert_eq!(
            parse_registration(None, b"address=a&port=0&endpoint=/x")
                .unwrap()
                .port,
            0
        );
        assert_eq!(
            parse_registration(None, b"address=a&port=65535&endpoint=/x")
                .unwrap()
                .port,
            65535
        );
        assert!(bad_request(parse_registration(
            None,
            b"address=a&port=65536&endpoint=/x"
        )));
        assert!(bad_request(parse_registration(
            None,
            b"address=a&port=-1&endpoint=/x"
        )));
        assert!(bad_request(parse_registration(
            None,
            b"address=a&port=http&endpoint=/x"
        )));
    }

    #[test]
    fn test_parse_missing_fields() {
        assert!(bad_request(parse_registration(None, b"port=1&endpoint=/x")));
        assert!(bad_request(parse_registration(None, b"address=a&endpoint=/x")));
        assert!(bad_request(parse_registration(None, b"address=a&port=1")));
        assert!(bad_request(parse_registration(None, b"")));
    }

    #[test]
    fn test_parse_rejects_bad_values() {
        assert!(bad_request(parse_registration(None, b"address=&port=1&endpoint=/x")));
        assert!(bad_request(parse_registration(None, b"address=a&port=1&endpoint=")));
        assert!(bad_request(parse_registration(None, b"address=a&port=1&endpoint=x")));
    }

    #[test]
    fn test_repeated_field_keeps_first_value() {
        let service = parse_registration(
            None,
            b"address=a&address=b&port=1&port=2&endpoint=/x&extra=ignored",
        )
        .unwrap();
        assert_eq!(service, Service::new("a", 1, "/x"));
    }

    #[test]
    fn test_query_fallback_and_precedence() {
        let service = parse_registration(Some("address=q&port=1&endpoint=/q"), b"port=2").unwrap();
        assert_eq!(service, Service::new("q", 2, "/q"));
    }
}
