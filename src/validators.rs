//! Input validation for the `public` command
//!
//! Every check here is pure: a rejected request never reaches the firewall
//! or the gateway.

use crate::core::error::ValidationError;
use crate::core::types::{ExposeRequest, Protocol};

/// Prefix of the port argument: `--port:<num>`
pub const PORT_FLAG: &str = "--port:";

/// Validates a single port number.
///
/// # Errors
///
/// Returns `Err` if port is 0 (reserved).
pub fn validate_port(port: u16) -> Result<u16, ValidationError> {
    if port == 0 {
        Err(ValidationError::InvalidPort(port.to_string()))
    } else {
        Ok(port)
    }
}

/// Parses a port strictly: ASCII digits only, no sign, no whitespace,
/// value in 1..=65535.
///
/// # Examples
///
/// ```
/// use minishell::validators::parse_port;
///
/// assert_eq!(parse_port("8080"), Ok(8080));
/// assert!(parse_port("+80").is_err());
/// assert!(parse_port("80 ").is_err());
/// assert!(parse_port("70000").is_err());
/// ```
pub fn parse_port(input: &str) -> Result<u16, ValidationError> {
    if input.is_empty() || !input.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::InvalidPort(input.to_string()));
    }
    let port = input
        .parse::<u16>()
        .map_err(|_| ValidationError::InvalidPort(input.to_string()))?;
    validate_port(port).map_err(|_| ValidationError::InvalidPort(input.to_string()))
}

/// Parses `TCP`/`UDP` in any letter case.
pub fn parse_protocol(input: &str) -> Result<Protocol, ValidationError> {
    input
        .parse::<Protocol>()
        .map_err(|_| ValidationError::InvalidProtocol(input.to_string()))
}

/// Parses the arguments of `public <TCP|UDP> --port:<num>`.
///
/// The protocol comes first; the port flag may be repeated, the last one
/// wins. Anything else is rejected.
pub fn parse_public_args(params: &[&str]) -> Result<ExposeRequest, ValidationError> {
    let [protocol, rest @ ..] = params else {
        return Err(ValidationError::Usage);
    };
    if rest.is_empty() {
        return Err(ValidationError::Usage);
    }

    let protocol = parse_protocol(protocol)?;

    let mut port = None;
    for param in rest {
        match param.strip_prefix(PORT_FLAG) {
            Some(value) => port = Some(parse_port(value)?),
            None => return Err(ValidationError::UnexpectedArgument((*param).to_string())),
        }
    }

    let port = port.ok_or(ValidationError::MissingPort)?;
    Ok(ExposeRequest { port, protocol })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_validate_port() {
        assert!(validate_port(0).is_err());
        assert_eq!(validate_port(1), Ok(1));
        assert_eq!(validate_port(65535), Ok(65535));
    }

    #[test]
    fn test_parse_port_rejects_malformed() {
        for bad in ["", "0", "-1", "+80", "80x", "0x50", " 80", "65536", "notanumber"] {
            assert!(parse_port(bad).is_err(), "accepted {bad:?}");
        }
        assert_eq!(parse_port("00080"), Ok(80));
    }

    #[test]
    fn test_parse_public_args() {
        assert_eq!(
            parse_public_args(&["tcp", "--port:8080"]),
            Ok(ExposeRequest {
                port: 8080,
                protocol: Protocol::Tcp
            })
        );
        assert_eq!(
            parse_public_args(&["UDP", "--port:1", "--port:27015"]).map(|r| r.port),
            Ok(27015)
        );
    }

    #[test]
    fn test_parse_public_args_errors() {
        assert_eq!(parse_public_args(&[]), Err(ValidationError::Usage));
        assert_eq!(parse_public_args(&["TCP"]), Err(ValidationError::Usage));
        assert_eq!(
            parse_public_args(&["ICMP", "--port:80"]),
            Err(ValidationError::InvalidProtocol("ICMP".into()))
        );
        assert_eq!(
            parse_public_args(&["TCP", "--port:abc"]),
            Err(ValidationError::InvalidPort("abc".into()))
        );
        assert_eq!(
            parse_public_args(&["TCP", "8080"]),
            Err(ValidationError::UnexpectedArgument("8080".into()))
        );
    }

    proptest! {
        #[test]
        fn test_every_valid_port_round_trips(port in 1u16..=65535) {
            prop_assert_eq!(parse_port(&port.to_string()), Ok(port));
        }

        #[test]
        fn test_non_digit_input_never_parses(input in ".*[^0-9].*") {
            prop_assert!(parse_port(&input).is_err());
        }
    }
}
