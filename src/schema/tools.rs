use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::Content;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ListToolsResult {
    pub tools: Vec<Tool>,
}

impl ListToolsResult {
    pub fn with_tools(mut self, tools: impl IntoIterator<Item = Tool>) -> Self {
        self.tools.extend(tools);
        self
    }
}

/// Definition of a tool the client can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: ToolInputSchema,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Tool {
    pub fn new(name: impl Into<String>, input_schema: ToolInputSchema) -> Self {
        Self {
            name: name.into(),
            input_schema,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// JSON schema describing the arguments a tool accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInputSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
    /// Shared definitions targeted by `$ref` inside `properties`.
    #[serde(rename = "$defs", skip_serializing_if = "Option::is_none")]
    pub defs: Option<Map<String, Value>>,
}

impl Default for ToolInputSchema {
    fn default() -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: None,
            required: None,
            defs: None,
        }
    }
}

impl ToolInputSchema {
    pub fn with_property(mut self, name: impl Into<String>, schema: Value) -> Self {
        self.properties
            .get_or_insert_with(Map::new)
            .insert(name.into(), schema);
        self
    }

    pub fn with_required(mut self, name: impl Into<String>) -> Self {
        self.required.get_or_insert_with(Vec::new).push(name.into());
        self
    }

    pub fn from_json_schema<T: schemars::JsonSchema>() -> Self {
        let schema = schemars::schema_for!(T);
        let schema_obj = schema.as_value().as_object();
        let object = |key: &str| {
            schema_obj
                .and_then(|obj| obj.get(key))
                .and_then(|v| v.as_object())
                .cloned()
        };
        let schema_type = schema_obj
            .and_then(|obj| obj.get("type"))
            .and_then(|v| v.as_str())
            .unwrap_or("object")
            .to_string();
        let required = schema_obj
            .and_then(|obj| obj.get("required"))
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect::<Vec<_>>()
            });
        Self {
            schema_type,
            properties: object("properties"),
            required,
            defs: object("$defs"),
        }
    }
}

/// The server's answer to a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolResult {
    pub content: Vec<Content>,
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
    #[serde(rename = "structuredContent", skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
}

impl CallToolResult {
    pub fn new() -> Self {
        Self {
            content: Vec::new(),
            is_error: None,
            structured_content: None,
        }
    }

    /// Wrap a handler's structured value. Strings become plain text content;
    /// other values are rendered as JSON text. Non-object values are wrapped
    /// as `{"result": value}` in the structured payload.
    pub fn from_value(value: Value) -> Self {
        let text = match &value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let structured = match value {
            Value::Object(_) => value,
            other => json!({ "result": other }),
        };
        Self::new()
            .with_text_content(text)
            .with_structured_content(structured)
    }

    pub fn with_text_content(mut self, text: impl Into<String>) -> Self {
        self.content.push(Content::text(text));
        self
    }

    pub fn with_structured_content(mut self, content: Value) -> Self {
        self.structured_content = Some(content);
        self
    }

    /// First text block of the result.
    pub fn text(&self) -> Option<&str> {
        self.content.first().map(Content::as_text)
    }

    /// The handler's value, unwrapping the `{"result": ...}` envelope used
    /// for non-object values.
    pub fn value(&self) -> Option<&Value> {
        let structured = self.structured_content.as_ref()?;
        match structured.as_object() {
            Some(obj) if obj.len() == 1 && obj.contains_key("result") => obj.get("result"),
            _ => Some(structured),
        }
    }
}

impl Default for CallToolResult {
    fn default() -> Self {
        Self::new()
    }
}
