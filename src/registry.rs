use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    arguments::Arguments,
    context::ServerCtx,
    error::{CapabilityKind, Error, Result},
    schema::{
        Prompt, PromptArgument, PromptMessage, Resource, ResourceContents, ResourceTemplate, Tool,
        ToolInputSchema,
    },
    uri_template::UriTemplate,
};

/// Handler behind a registered tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, ctx: ServerCtx, arguments: Arguments) -> Result<Value>;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(ServerCtx, Arguments) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn call(&self, ctx: ServerCtx, arguments: Arguments) -> Result<Value> {
        (self)(ctx, arguments).await
    }
}

/// The URI being read together with the values bound by its template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceRequest {
    pub uri: String,
    pub params: HashMap<String, String>,
}

impl ResourceRequest {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// What a resource handler produces.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceContent {
    Text(String),
    Json(Value),
}

impl ResourceContent {
    pub(crate) fn into_contents(
        self,
        uri: &str,
        mime_type: Option<&str>,
    ) -> Result<ResourceContents> {
        let (text, default_mime) = match self {
            ResourceContent::Text(text) => (text, "text/plain"),
            ResourceContent::Json(value) => (serde_json::to_string_pretty(&value)?, "application/json"),
        };
        Ok(ResourceContents {
            uri: uri.to_string(),
            mime_type: Some(mime_type.unwrap_or(default_mime).to_string()),
            text,
        })
    }
}

#[async_trait]
pub trait ResourceHandler: Send + Sync {
    async fn read(&self, ctx: ServerCtx, request: ResourceRequest) -> Result<ResourceContent>;
}

#[async_trait]
impl<F, Fut> ResourceHandler for F
where
    F: Fn(ServerCtx, ResourceRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ResourceContent>> + Send + 'static,
{
    async fn read(&self, ctx: ServerCtx, request: ResourceRequest) -> Result<ResourceContent> {
        (self)(ctx, request).await
    }
}

/// Prompts are plain templates: no context, no suspension.
pub trait PromptHandler: Send + Sync {
    fn render(&self, arguments: &Arguments) -> Result<Vec<PromptMessage>>;
}

impl<F> PromptHandler for F
where
    F: Fn(&Arguments) -> Result<Vec<PromptMessage>> + Send + Sync,
{
    fn render(&self, arguments: &Arguments) -> Result<Vec<PromptMessage>> {
        (self)(arguments)
    }
}

#[derive(Clone)]
pub struct ToolDescriptor {
    pub(crate) name: String,
    pub(crate) description: Option<String>,
    pub(crate) input_schema: ToolInputSchema,
    validator: std::result::Result<Arc<jsonschema::Validator>, String>,
    pub(crate) handler: Arc<dyn ToolHandler>,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        input_schema: ToolInputSchema,
        handler: impl ToolHandler + 'static,
    ) -> Self {
        let validator = serde_json::to_value(&input_schema)
            .map_err(|e| e.to_string())
            .and_then(|schema| jsonschema::validator_for(&schema).map_err(|e| e.to_string()))
            .map(Arc::new);
        Self {
            name: name.into(),
            description: None,
            input_schema,
            validator,
            handler: Arc::new(handler),
        }
    }

    /// A tool whose parameters are the typed struct `P`. The schema is derived
    /// from `P`, and arguments that fail to deserialize are reported as
    /// `InvalidArgs`.
    pub fn typed<P, F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        P: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(ServerCtx, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let name = name.into();
        let tool_name = name.clone();
        let handler = Arc::new(handler);
        let wrapped = move |ctx: ServerCtx, arguments: Arguments| {
            let handler = handler.clone();
            let tool_name = tool_name.clone();
            async move {
                let params: P = arguments
                    .deserialize()
                    .map_err(|e| Error::invalid_args(tool_name, e.to_string()))?;
                (*handler)(ctx, params).await
            }
        };
        Self::new(name, ToolInputSchema::from_json_schema::<P>(), wrapped)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check `arguments` against the compiled input schema. Every violation
    /// is listed in the `InvalidArgs` message.
    pub(crate) fn validate(&self, arguments: &Arguments) -> Result<()> {
        let validator = self.validator.as_ref().map_err(|e| self.schema_error(e))?;
        let instance = Value::Object(arguments.as_map().clone());
        let violations: Vec<String> = validator
            .iter_errors(&instance)
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{path}: {e}")
                }
            })
            .collect();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(Error::invalid_args(&self.name, violations.join("; ")))
        }
    }

    fn schema_error(&self, message: &str) -> Error {
        Error::Config(format!(
            "tool '{}' has an invalid input schema: {message}",
            self.name
        ))
    }

    pub fn tool(&self) -> Tool {
        let tool = Tool::new(&self.name, self.input_schema.clone());
        match &self.description {
            Some(description) => tool.with_description(description),
            None => tool,
        }
    }
}

#[derive(Clone)]
enum ResourcePattern {
    Literal(String),
    Template(UriTemplate),
}

#[derive(Clone)]
pub struct ResourceDescriptor {
    pub(crate) name: String,
    pub(crate) description: Option<String>,
    pub(crate) mime_type: Option<String>,
    pattern: ResourcePattern,
    pub(crate) handler: Arc<dyn ResourceHandler>,
}

impl ResourceDescriptor {
    /// `uri` is either a literal URI or a template with `{name}` placeholders.
    pub fn new(
        name: impl Into<String>,
        uri: &str,
        handler: impl ResourceHandler + 'static,
    ) -> Result<Self> {
        let pattern = if UriTemplate::is_template(uri) {
            ResourcePattern::Template(UriTemplate::parse(uri)?)
        } else {
            ResourcePattern::Literal(uri.to_string())
        };
        Ok(Self {
            name: name.into(),
            description: None,
            mime_type: None,
            pattern,
            handler: Arc::new(handler),
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern(&self) -> &str {
        match &self.pattern {
            ResourcePattern::Literal(uri) => uri,
            ResourcePattern::Template(template) => template.as_str(),
        }
    }

    pub fn is_template(&self) -> bool {
        matches!(self.pattern, ResourcePattern::Template(_))
    }

    fn resource(&self) -> Option<Resource> {
        match &self.pattern {
            ResourcePattern::Literal(uri) => Some(Resource {
                uri: uri.clone(),
                name: self.name.clone(),
                description: self.description.clone(),
                mime_type: self.mime_type.clone(),
            }),
            ResourcePattern::Template(_) => None,
        }
    }

    fn resource_template(&self) -> Option<ResourceTemplate> {
        match &self.pattern {
            ResourcePattern::Template(template) => Some(ResourceTemplate {
                uri_template: template.as_str().to_string(),
                name: self.name.clone(),
                description: self.description.clone(),
                mime_type: self.mime_type.clone(),
            }),
            ResourcePattern::Literal(_) => None,
        }
    }
}

#[derive(Clone)]
pub struct PromptDescriptor {
    pub(crate) name: String,
    pub(crate) description: Option<String>,
    pub(crate) arguments: Vec<PromptArgument>,
    pub(crate) handler: Arc<dyn PromptHandler>,
}

impl PromptDescriptor {
    pub fn new<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Arguments) -> Result<Vec<PromptMessage>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: None,
            arguments: Vec::new(),
            handler: Arc::new(handler),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_argument(
        mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        self.arguments.push(PromptArgument {
            name: name.into(),
            description: Some(description.into()),
            required: Some(required),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn required_arguments(&self) -> impl Iterator<Item = &str> {
        self.arguments
            .iter()
            .filter(|a| a.required.unwrap_or(false))
            .map(|a| a.name.as_str())
    }

    pub fn prompt(&self) -> Prompt {
        Prompt {
            name: self.name.clone(),
            description: self.description.clone(),
            arguments: (!self.arguments.is_empty()).then(|| self.arguments.clone()),
        }
    }
}

/// Every tool, resource and prompt a server exposes. Built once at startup
/// and shared read-only between connections.
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    tools: Vec<ToolDescriptor>,
    resources: Vec<ResourceDescriptor>,
    prompts: Vec<PromptDescriptor>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_tool(&mut self, tool: ToolDescriptor) -> Result<()> {
        if let Err(message) = &tool.validator {
            return Err(tool.schema_error(message));
        }
        if self.tool(&tool.name).is_some() {
            return Err(Error::DuplicateRegistration {
                kind: CapabilityKind::Tool,
                key: tool.name,
            });
        }
        self.tools.push(tool);
        Ok(())
    }

    pub fn register_resource(&mut self, resource: ResourceDescriptor) -> Result<()> {
        if self.resources.iter().any(|r| r.pattern() == resource.pattern()) {
            return Err(Error::DuplicateRegistration {
                kind: CapabilityKind::Resource,
                key: resource.pattern().to_string(),
            });
        }
        self.resources.push(resource);
        Ok(())
    }

    pub fn register_prompt(&mut self, prompt: PromptDescriptor) -> Result<()> {
        if self.prompt(&prompt.name).is_some() {
            return Err(Error::DuplicateRegistration {
                kind: CapabilityKind::Prompt,
                key: prompt.name,
            });
        }
        self.prompts.push(prompt);
        Ok(())
    }

    pub fn with_tool(mut self, tool: ToolDescriptor) -> Result<Self> {
        self.register_tool(tool)?;
        Ok(self)
    }

    pub fn with_resource(mut self, resource: ResourceDescriptor) -> Result<Self> {
        self.register_resource(resource)?;
        Ok(self)
    }

    pub fn with_prompt(mut self, prompt: PromptDescriptor) -> Result<Self> {
        self.register_prompt(prompt)?;
        Ok(self)
    }

    pub fn list_tools(&self) -> Vec<Tool> {
        self.tools.iter().map(ToolDescriptor::tool).collect()
    }

    /// Resources registered under a literal URI.
    pub fn list_resources(&self) -> Vec<Resource> {
        self.resources
            .iter()
            .filter_map(ResourceDescriptor::resource)
            .collect()
    }

    pub fn list_resource_templates(&self) -> Vec<ResourceTemplate> {
        self.resources
            .iter()
            .filter_map(ResourceDescriptor::resource_template)
            .collect()
    }

    pub fn list_prompts(&self) -> Vec<Prompt> {
        self.prompts.iter().map(PromptDescriptor::prompt).collect()
    }

    pub fn has_tools(&self) -> bool {
        !self.tools.is_empty()
    }

    pub fn has_resources(&self) -> bool {
        !self.resources.is_empty()
    }

    pub fn has_prompts(&self) -> bool {
        !self.prompts.is_empty()
    }

    pub fn tool(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn prompt(&self, name: &str) -> Option<&PromptDescriptor> {
        self.prompts.iter().find(|p| p.name == name)
    }

    /// Find the resource serving `uri`. Literal URIs win; among templates the
    /// most specific match wins, and the earliest registration breaks ties.
    pub fn resolve_resource(&self, uri: &str) -> Option<(&ResourceDescriptor, ResourceRequest)> {
        let literal = self.resources.iter().find(
            |r| matches!(&r.pattern, ResourcePattern::Literal(literal) if literal == uri),
        );
        if let Some(descriptor) = literal {
            return Some((
                descriptor,
                ResourceRequest {
                    uri: uri.to_string(),
                    params: HashMap::new(),
                },
            ));
        }

        let mut best: Option<(&ResourceDescriptor, (usize, usize), HashMap<String, String>)> =
            None;
        for descriptor in &self.resources {
            let ResourcePattern::Template(template) = &descriptor.pattern else {
                continue;
            };
            let Some(params) = template.matches(uri) else {
                continue;
            };
            let rank = template.specificity();
            let better = match &best {
                Some((_, best_rank, _)) => rank > *best_rank,
                None => true,
            };
            if better {
                best = Some((descriptor, rank, params));
            }
        }
        best.map(|(descriptor, _, params)| {
            (
                descriptor,
                ResourceRequest {
                    uri: uri.to_string(),
                    params,
                },
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn text_resource(text: &'static str) -> impl ResourceHandler {
        move |_ctx: ServerCtx, _req: ResourceRequest| async move {
            Ok(ResourceContent::Text(text.to_string()))
        }
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let tool = || {
            ToolDescriptor::new(
                "echo",
                ToolInputSchema::default(),
                |_ctx: ServerCtx, _args: Arguments| async move { Ok(Value::Null) },
            )
        };
        let mut registry = CapabilityRegistry::new();
        registry.register_tool(tool()).unwrap();
        match registry.register_tool(tool()) {
            Err(Error::DuplicateRegistration { kind, key }) => {
                assert_eq!(kind, CapabilityKind::Tool);
                assert_eq!(key, "echo");
            }
            other => panic!("expected duplicate registration, got {:?}", other.err()),
        }

        registry
            .register_resource(ResourceDescriptor::new("a", "greeting://{name}", text_resource("a")).unwrap())
            .unwrap();
        assert!(registry
            .register_resource(ResourceDescriptor::new("b", "greeting://{name}", text_resource("b")).unwrap())
            .is_err());
    }

    #[test]
    fn test_uncompilable_input_schema_is_rejected() {
        let tool = ToolDescriptor::new(
            "lookup",
            ToolInputSchema::default()
                .with_property("code", serde_json::json!({"type": "string", "pattern": "(unclosed"})),
            |_ctx: ServerCtx, _args: Arguments| async move { Ok(Value::Null) },
        );
        let err = CapabilityRegistry::new().with_tool(tool).err().unwrap();
        assert!(
            matches!(err, Error::Config(ref message) if message.contains("lookup")),
            "unexpected error: {err:?}"
        );
    }

    #[test]
    fn test_listing_never_invokes_handlers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let registry = CapabilityRegistry::new()
            .with_tool(ToolDescriptor::new(
                "count",
                ToolInputSchema::default(),
                move |_ctx: ServerCtx, _args: Arguments| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async move { Ok(Value::Null) }
                },
            ))
            .unwrap()
            .with_prompt(PromptDescriptor::new("p", |_args: &Arguments| {
                panic!("prompt rendered during listing")
            }))
            .unwrap();

        assert_eq!(registry.list_tools().len(), 1);
        assert_eq!(registry.list_prompts().len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_literal_and_template_listing_are_separate() {
        let registry = CapabilityRegistry::new()
            .with_resource(
                ResourceDescriptor::new("config", "data://config", text_resource("{}"))
                    .unwrap()
                    .with_mime_type("application/json"),
            )
            .unwrap()
            .with_resource(ResourceDescriptor::new("greeting", "greeting://{name}", text_resource("hi")).unwrap())
            .unwrap();

        let resources = registry.list_resources();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].uri, "data://config");

        let templates = registry.list_resource_templates();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].uri_template, "greeting://{name}");
    }

    #[test]
    fn test_resolution_order() {
        let registry = CapabilityRegistry::new()
            .with_resource(ResourceDescriptor::new("any", "docs://{page}", text_resource("any")).unwrap())
            .unwrap()
            .with_resource(ResourceDescriptor::new("guide", "docs://guide-{page}", text_resource("guide")).unwrap())
            .unwrap()
            .with_resource(ResourceDescriptor::new("index", "docs://index", text_resource("index")).unwrap())
            .unwrap();

        let (descriptor, request) = registry.resolve_resource("docs://index").unwrap();
        assert_eq!(descriptor.name(), "index");
        assert!(request.params.is_empty());

        let (descriptor, request) = registry.resolve_resource("docs://guide-intro").unwrap();
        assert_eq!(descriptor.name(), "guide");
        assert_eq!(request.param("page"), Some("intro"));

        let (descriptor, request) = registry.resolve_resource("docs://faq").unwrap();
        assert_eq!(descriptor.name(), "any");
        assert_eq!(request.param("page"), Some("faq"));

        assert!(registry.resolve_resource("other://faq").is_none());
    }

    #[test]
    fn test_equal_specificity_prefers_earlier_registration() {
        let registry = CapabilityRegistry::new()
            .with_resource(ResourceDescriptor::new("first", "x://{a}/one", text_resource("1")).unwrap())
            .unwrap()
            .with_resource(ResourceDescriptor::new("second", "x://{b}/one", text_resource("2")).unwrap())
            .unwrap();
        let (descriptor, _) = registry.resolve_resource("x://k/one").unwrap();
        assert_eq!(descriptor.name(), "first");
    }

    #[test]
    fn test_invalid_template_fails_construction() {
        let err = ResourceDescriptor::new("bad", "greeting://{name", text_resource("x"))
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidUriTemplate { .. }));
    }

    #[test]
    fn test_json_content_mime_defaults() {
        let contents = ResourceContent::Json(serde_json::json!({"theme": "dark"}))
            .into_contents("data://config", None)
            .unwrap();
        assert_eq!(contents.mime_type.as_deref(), Some("application/json"));
        assert!(contents.text.contains("\"theme\": \"dark\""));

        let contents = ResourceContent::Text("hi".into())
            .into_contents("greeting://x", Some("text/markdown"))
            .unwrap();
        assert_eq!(contents.mime_type.as_deref(), Some("text/markdown"));
    }
}
