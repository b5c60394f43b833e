use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    arguments::Arguments,
    context::ServerCtx,
    error::{CapabilityKind, Error, Result},
    registry::CapabilityRegistry,
    schema::{GetPromptResult, ReadResourceResult},
};

/// Routes invocations to the handlers of a registry. Handler failures and
/// panics stop here and come out as `HandlerError`.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<CapabilityRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub async fn call_tool(&self, ctx: &ServerCtx, name: &str, arguments: Arguments) -> Result<Value> {
        let tool = self
            .registry
            .tool(name)
            .ok_or_else(|| Error::not_found(CapabilityKind::Tool, name))?;
        tool.validate(&arguments)?;

        debug!("Calling tool '{}'", name);
        let handler = tool.handler.clone();
        guarded(name, handler.call(ctx.with_logger(name), arguments)).await
    }

    pub async fn read_resource(&self, ctx: &ServerCtx, uri: &str) -> Result<ReadResourceResult> {
        let (resource, request) = self
            .registry
            .resolve_resource(uri)
            .ok_or_else(|| Error::not_found(CapabilityKind::Resource, uri))?;

        debug!("Reading resource '{}' via '{}'", uri, resource.pattern());
        let handler = resource.handler.clone();
        let content = guarded(
            &resource.name,
            handler.read(ctx.with_logger(&resource.name), request),
        )
        .await?;
        let contents = content.into_contents(uri, resource.mime_type.as_deref())?;
        Ok(ReadResourceResult::default().with_content(contents))
    }

    pub fn get_prompt(&self, name: &str, arguments: Arguments) -> Result<GetPromptResult> {
        let prompt = self
            .registry
            .prompt(name)
            .ok_or_else(|| Error::not_found(CapabilityKind::Prompt, name))?;
        if let Some(missing) = prompt.required_arguments().find(|a| !arguments.contains(a)) {
            return Err(Error::invalid_args(
                name,
                format!("missing required argument '{missing}'"),
            ));
        }

        let rendered = std::panic::catch_unwind(AssertUnwindSafe(|| prompt.handler.render(&arguments)));
        let messages = match rendered {
            Ok(result) => result.map_err(|e| e.into_dispatch_error(name))?,
            Err(panic) => return Err(panicked(name, panic)),
        };
        Ok(GetPromptResult {
            description: prompt.description.clone(),
            messages,
        })
    }
}

/// Run a handler future, converting escaped errors and panics into their
/// dispatch form.
async fn guarded<T>(name: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result.map_err(|e| e.into_dispatch_error(name)),
        Err(panic) => Err(panicked(name, panic)),
    }
}

fn panicked(name: &str, payload: Box<dyn Any + Send>) -> Error {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    };
    warn!("Handler '{}' panicked: {}", name, message);
    Error::handler_error(name, format!("panicked: {message}"))
}
