//! Building calls from command-line arguments

use anyhow::{anyhow, bail, Context, Result};
use jm_core::EndpointId;
use jm_protocol::method::lookup;
use jm_protocol::{WorkerCall, WORKER_METHODS};
use serde_json::{Map, Value};

/// Parse `host:port`, or a bare host with `default_port`
pub fn parse_endpoint(text: &str, default_port: Option<u16>) -> Result<EndpointId> {
    match text.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port = port
                .parse()
                .with_context(|| format!("Invalid port in {:?}", text))?;
            Ok(EndpointId::new(host, port))
        }
        _ => match default_port {
            Some(port) if !text.is_empty() => Ok(EndpointId::new(text, port)),
            _ => bail!("Expected host:port, got {:?}", text),
        },
    }
}

/// Build a worker call from a method name and its arguments
///
/// Arguments are either `name=value` or positional, in the order the
/// method declares its parameters. Values are always strings.
pub fn parse_call(method: &str, args: &[String]) -> Result<WorkerCall> {
    let descriptor =
        lookup(WORKER_METHODS, method).ok_or_else(|| anyhow!("Unknown method: {}", method))?;

    let mut params = Map::new();
    let mut positional = descriptor.params.iter();
    for arg in args {
        let (name, value) = match arg.split_once('=') {
            Some((name, value)) if descriptor.params.contains(&name) => (name, value),
            _ => {
                let name = positional.next().ok_or_else(|| {
                    anyhow!("Too many arguments for {}", descriptor.signature())
                })?;
                (*name, arg.as_str())
            }
        };
        params.insert(name.to_string(), Value::String(value.to_string()));
    }

    let params = (!params.is_empty()).then_some(Value::Object(params));
    WorkerCall::from_parts(method, params)
        .with_context(|| format!("Invalid arguments for {}", descriptor.signature()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint() {
        assert_eq!(
            parse_endpoint("node7:18003", None).unwrap(),
            EndpointId::new("node7", 18003)
        );
        assert_eq!(
            parse_endpoint("node7", Some(17999)).unwrap(),
            EndpointId::new("node7", 17999)
        );
        assert!(parse_endpoint("node7", None).is_err());
        assert!(parse_endpoint("node7:http", None).is_err());
    }

    #[test]
    fn test_parse_call_without_params() {
        let call = parse_call("pid", &[]).unwrap();
        assert_eq!(call, WorkerCall::Pid);
    }

    #[test]
    fn test_parse_call_positional_and_named() {
        let call = parse_call("getEnviron", &["HOME".to_string()]).unwrap();
        assert_eq!(
            call,
            WorkerCall::GetEnviron {
                name: "HOME".to_string()
            }
        );

        let args = vec!["name=controlDict".to_string(), "system".to_string()];
        let call = parse_call("getDictionaryText", &args).unwrap();
        assert_eq!(
            call,
            WorkerCall::GetDictionaryText {
                directory: "system".to_string(),
                name: "controlDict".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_call_errors() {
        assert!(parse_call("format", &[]).is_err());
        assert!(parse_call("pid", &["extra".to_string()]).is_err());
        assert!(parse_call("getEnviron", &[]).is_err());
    }
}
