//! Tool invocation command.

use std::path::Path;

use serde_json::Value;

use crate::EndpointArgs;

/// Parse `--args`; a missing value sends no arguments.
fn parse_arguments(raw: Option<&str>) -> anyhow::Result<Option<Value>> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(None);
    };
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| anyhow::anyhow!("--args must be a JSON object: {}", e))?;
    if !value.is_object() {
        anyhow::bail!("--args must be a JSON object, got {}", value);
    }
    Ok(Some(value))
}

pub async fn run(
    args: &EndpointArgs,
    name: &str,
    arguments: Option<&str>,
    config: Option<&Path>,
) -> anyhow::Result<bool> {
    let arguments = parse_arguments(arguments)?;
    let bridge = super::bridge(config)?;
    let endpoint = super::endpoint(args)?;

    let result = bridge.invoke(&endpoint, name, arguments).await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(result.success)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_arguments() {
        assert_eq!(parse_arguments(None).unwrap(), None);
        assert_eq!(parse_arguments(Some("  ")).unwrap(), None);
        assert_eq!(
            parse_arguments(Some(r#"{"a": 1}"#)).unwrap(),
            Some(json!({"a": 1}))
        );
        assert!(parse_arguments(Some("[1, 2]")).is_err());
        assert!(parse_arguments(Some("{oops")).is_err());
    }
}
