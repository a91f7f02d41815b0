//! MCP protocol types.
//!
//! This module defines the JSON-RPC 2.0 envelope used on every transport and
//! the MCP-specific payloads exchanged during discovery and invocation.
//! Decoding is deliberately lenient: third-party servers routinely omit
//! fields the protocol marks as required.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::McpError;

/// JSON-RPC protocol version.
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol version.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Method names used by this client.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const PROMPTS_LIST: &str = "prompts/list";
    pub const RESOURCES_LIST: &str = "resources/list";
    pub const TOOLS_CALL: &str = "tools/call";
}

/// Request ID for JSON-RPC messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric ID.
    Number(i64),
    /// String ID.
    String(String),
}

impl RequestId {
    /// Whether this id echoes the numeric id we sent.
    ///
    /// Some servers stringify ids on the way back, so `"3"` matches `3`.
    pub fn matches(&self, id: u64) -> bool {
        match self {
            Self::Number(n) => u64::try_from(*n).map(|n| n == id).unwrap_or(false),
            Self::String(s) => s.trim().parse::<u64>().map(|n| n == id).unwrap_or(false),
        }
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        Self::Number(i64::try_from(id).unwrap_or(i64::MAX))
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "{}", s),
        }
    }
}

/// JSON-RPC request message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: String,
    /// Unique request ID.
    pub id: RequestId,
    /// Method name.
    pub method: String,
    /// Optional method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Encode to the wire form.
    pub fn encode(&self) -> Result<String, McpError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// JSON-RPC notification (no ID, no response expected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Optional method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Create a new JSON-RPC notification.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }

    /// Encode to the wire form.
    pub fn encode(&self) -> Result<String, McpError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i64,
    /// Error message.
    #[serde(default)]
    pub message: String,
    /// Optional additional data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// Any message a server may send back: a response, a notification, or a
/// server-initiated request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcMessage {
    /// JSON-RPC version; tolerated when missing.
    #[serde(default)]
    pub jsonrpc: Option<String>,
    /// Correlation id; absent on notifications.
    #[serde(default)]
    pub id: Option<RequestId>,
    /// Present on notifications and server requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Successful result (mutually exclusive with error).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error object (mutually exclusive with result).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcMessage {
    /// Decode one wire message.
    pub fn decode(text: &str) -> Result<Self, McpError> {
        let value: Value = serde_json::from_str(text.trim())?;
        if !value.is_object() {
            return Err(McpError::protocol("message is not a JSON object"));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// A response carries an id and either a result or an error.
    pub fn is_response(&self) -> bool {
        self.id.is_some() && self.method.is_none() && (self.result.is_some() || self.error.is_some())
    }

    /// Whether this message answers request `id`.
    pub fn answers(&self, id: u64) -> bool {
        self.is_response() && self.id.as_ref().map(|i| i.matches(id)).unwrap_or(false)
    }

    /// Get the result, or the server error.
    pub fn into_result(self) -> Result<Value, McpError> {
        if let Some(error) = self.error {
            return Err(McpError::server_error(error.code, error.message));
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}

// ============================================================================
// MCP Protocol Types
// ============================================================================

/// Client information sent during initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    pub version: String,
}

/// Server information returned during initialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server name.
    #[serde(default)]
    pub name: String,
    /// Server version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Server capabilities returned during initialization.
///
/// Flags are kept as raw values: servers send `{}`, `true`, or richer objects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<Value>,
}

impl ServerCapabilities {
    fn flag(value: &Option<Value>) -> bool {
        !matches!(value, None | Some(Value::Null) | Some(Value::Bool(false)))
    }

    /// Whether the server advertises tools.
    pub fn supports_tools(&self) -> bool {
        Self::flag(&self.tools)
    }

    /// Whether the server advertises prompts.
    pub fn supports_prompts(&self) -> bool {
        Self::flag(&self.prompts)
    }

    /// Whether the server advertises resources.
    pub fn supports_resources(&self) -> bool {
        Self::flag(&self.resources)
    }

    /// Whether no listable capability is advertised at all.
    pub fn is_empty(&self) -> bool {
        !self.supports_tools() && !self.supports_prompts() && !self.supports_resources()
    }
}

/// Parameters for the initialize request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// MCP protocol version.
    pub protocol_version: String,
    /// Client capabilities; this client offers none.
    pub capabilities: Value,
    /// Client information.
    pub client_info: ClientInfo,
}

impl InitializeParams {
    /// Build params from the configured client identity.
    pub fn from_config(client: &toolbridge_core::config::ClientConfig) -> Self {
        Self {
            protocol_version: client.protocol_version.clone(),
            capabilities: Value::Object(Default::default()),
            client_info: ClientInfo {
                name: client.name.clone(),
                version: client.version.clone(),
            },
        }
    }
}

/// Result of the initialize request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// MCP protocol version.
    #[serde(default)]
    pub protocol_version: Option<String>,
    /// Server capabilities. Required: a result without them is not a handshake.
    pub capabilities: ServerCapabilities,
    /// Server information.
    #[serde(default)]
    pub server_info: ServerInfo,
}

/// Remote tool definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, alias = "input_schema", alias = "parameters", skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

/// Argument accepted by a remote prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// Remote prompt definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

/// Remote resource definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDefinition {
    pub uri: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, alias = "mime_type", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// One page of a `*/list` result.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub items: Vec<Value>,
    /// Cursor for pagination.
    pub next_cursor: Option<String>,
}

impl ListPage {
    /// Read a page, taking items only from `key` (`tools`, `prompts` or
    /// `resources`). Other listing keys in the same result are ignored.
    pub fn from_result(result: Value, key: &str) -> Result<Self, String> {
        let Value::Object(mut obj) = result else {
            return Err("result is not an object".to_string());
        };
        let items = match obj.remove(key) {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => Vec::new(),
            Some(other) => return Err(format!("'{}' is not an array: {}", key, other)),
        };
        let next_cursor = ["nextCursor", "next_cursor"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_str))
            .map(str::to_string);
        Ok(Self { items, next_cursor })
    }
}

/// Parameters for the tools/call request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    /// Tool name.
    pub name: String,
    /// Tool arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

/// Result of the tools/call request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    /// Content returned by the tool.
    #[serde(default)]
    pub content: Vec<ToolContent>,
    /// Whether the tool execution resulted in an error.
    #[serde(default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// Joined text content, if any.
    pub fn text(&self) -> Option<String> {
        let parts: Vec<&str> = self.content.iter().filter_map(|c| c.as_text()).collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }
}

/// Content returned by a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    /// Text content.
    Text {
        /// The text content.
        text: String,
    },
    /// Image content (base64 encoded).
    Image {
        /// Base64-encoded image data.
        data: String,
        /// MIME type of the image.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// Embedded resource.
    Resource {
        /// The embedded resource document.
        resource: Value,
    },
    /// Any content type this client does not model.
    #[serde(other)]
    Unknown,
}

impl ToolContent {
    /// Get the text content if this is a text item.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let request = JsonRpcRequest::new(1, methods::INITIALIZE, Some(json!({"a": 1})));
        let json = request.encode().unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"initialize\""));
        assert!(json.contains("\"id\":1"));
    }

    #[test]
    fn test_notification_has_no_id() {
        let json = JsonRpcNotification::new(methods::INITIALIZED, None).encode().unwrap();
        assert_eq!(json, r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#);
    }

    #[test]
    fn test_decode_response() {
        let msg = JsonRpcMessage::decode(
            r#"{"jsonrpc":"2.0","id":1,"result":{"capabilities":{"tools":{}}}}"#,
        )
        .unwrap();
        assert!(msg.answers(1));
        assert!(!msg.answers(2));

        let result: InitializeResult = serde_json::from_value(msg.into_result().unwrap()).unwrap();
        assert!(result.capabilities.supports_tools());
        assert!(!result.capabilities.supports_prompts());
        assert_eq!(result.server_info.name, "");
    }

    #[test]
    fn test_string_id_matches_numeric() {
        let msg = JsonRpcMessage::decode(r#"{"jsonrpc":"2.0","id":"7","result":{}}"#).unwrap();
        assert!(msg.answers(7));
    }

    #[test]
    fn test_notification_is_not_a_response() {
        let msg = JsonRpcMessage::decode(
            r#"{"jsonrpc":"2.0","method":"notifications/message","params":{}}"#,
        )
        .unwrap();
        assert!(!msg.is_response());
        assert!(!msg.answers(1));
    }

    #[test]
    fn test_error_response() {
        let msg = JsonRpcMessage::decode(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"nope"}}"#,
        )
        .unwrap();
        assert!(msg.answers(1));
        match msg.into_result() {
            Err(McpError::Server { code, .. }) => assert_eq!(code, JsonRpcError::METHOD_NOT_FOUND),
            other => panic!("expected server error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_non_objects() {
        assert!(JsonRpcMessage::decode("[1,2]").is_err());
        assert!(JsonRpcMessage::decode("not json").is_err());
    }

    #[test]
    fn test_capability_flags() {
        let caps: ServerCapabilities =
            serde_json::from_value(json!({"tools": true, "prompts": false, "resources": null}))
                .unwrap();
        assert!(caps.supports_tools());
        assert!(!caps.supports_prompts());
        assert!(!caps.supports_resources());
        assert!(!caps.is_empty());
        assert!(ServerCapabilities::default().is_empty());
    }

    #[test]
    fn test_initialize_requires_capabilities() {
        let missing = serde_json::from_value::<InitializeResult>(json!({"serverInfo": {"name": "x"}}));
        assert!(missing.is_err());
    }

    #[test]
    fn test_list_page_from_result() {
        let page = ListPage::from_result(
            json!({
                "tools": [{"name": "read_file", "inputSchema": {"type": "object"}}],
                "nextCursor": "abc"
            }),
            "tools",
        )
        .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.next_cursor.as_deref(), Some("abc"));

        let page = ListPage::from_result(
            json!({"resources": [{"uri": "file:///a.txt", "mimeType": "text/plain"}]}),
            "resources",
        )
        .unwrap();
        let resource: ResourceDefinition = serde_json::from_value(page.items[0].clone()).unwrap();
        assert_eq!(resource.mime_type.as_deref(), Some("text/plain"));
    }

    #[test]
    fn test_list_page_ignores_other_listing_keys() {
        let page = ListPage::from_result(
            json!({"tools": [{"name": "a"}], "prompts": [{"name": "b"}], "resources": [{"uri": "c"}]}),
            "prompts",
        )
        .unwrap();
        assert_eq!(page.items, vec![json!({"name": "b"})]);
        assert!(page.next_cursor.is_none());

        let page = ListPage::from_result(json!({"next_cursor": "n"}), "tools").unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.next_cursor.as_deref(), Some("n"));

        assert!(ListPage::from_result(json!({"tools": "nope"}), "tools").is_err());
        assert!(ListPage::from_result(json!([1]), "tools").is_err());
    }

    #[test]
    fn test_call_tool_result() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "File contents here"},
                {"type": "audio", "data": "..."}
            ],
            "isError": false
        }))
        .unwrap();
        assert!(!result.is_error);
        assert_eq!(result.content.len(), 2);
        assert_eq!(result.text().as_deref(), Some("File contents here"));
    }
}
