//! Function catalog and dispatcher.
//!
//! The catalog holds the functions the model may call. Each entry pairs a
//! [`FunctionDeclaration`] (what the model sees) with a [`FunctionHandler`]
//! (what runs). Dispatch validates the model's raw argument text against the
//! declaration before the handler is invoked.
//!
//! Models sometimes decorate the name they return (`functions.ShowChart`);
//! [`reconcile_name`] maps such names back onto a declared one.

mod builtin;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use serde_json::Value;
use tracing::info;

use crate::error::DispatchError;
use crate::models::{FunctionDeclaration, ParameterSchema, PropertySchema};
use crate::traits::{FunctionContext, FunctionHandler, ImageGenerator};

pub use builtin::{LoadData, ShowChart, VisualizeObject};

/// Result of a successful dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    /// `"Function <name> called"`.
    pub status: String,
    /// Text fed back to the model.
    pub result: String,
}

/// Registry of callable functions.
pub struct FunctionCatalog {
    handlers: Vec<Box<dyn FunctionHandler>>,
    declarations: Vec<FunctionDeclaration>,
}

impl FunctionCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            declarations: Vec::new(),
        }
    }

    /// Catalog with chart, image, and data lookup functions.
    pub fn with_builtins(images: Arc<dyn ImageGenerator>, data_file: PathBuf) -> Self {
        let mut catalog = Self::new();
        catalog.handlers.push(Box::new(ShowChart));
        catalog.handlers.push(Box::new(VisualizeObject::new(images)));
        catalog.handlers.push(Box::new(LoadData::new(data_file)));
        catalog.declarations = catalog.handlers.iter().map(|h| h.declaration()).collect();
        catalog
    }

    /// Register a function. Names must be unique.
    pub fn declare(&mut self, handler: Box<dyn FunctionHandler>) -> anyhow::Result<()> {
        let declaration = handler.declaration();
        if declaration.name.trim().is_empty() {
            bail!("Function name must not be empty");
        }
        if self.find(&declaration.name).is_some() {
            bail!("Function {} is already declared", declaration.name);
        }
        self.declarations.push(declaration);
        self.handlers.push(handler);
        Ok(())
    }

    pub fn declarations(&self) -> &[FunctionDeclaration] {
        &self.declarations
    }

    pub fn find(&self, name: &str) -> Option<&dyn FunctionHandler> {
        self.declarations
            .iter()
            .position(|d| d.name == name)
            .map(|i| self.handlers[i].as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Validate `arguments` and run the named handler.
    pub async fn dispatch(
        &self,
        name: &str,
        arguments: &str,
        ctx: &mut FunctionContext,
    ) -> Result<DispatchOutcome, DispatchError> {
        let index = self
            .declarations
            .iter()
            .position(|d| d.name == name)
            .ok_or_else(|| DispatchError::UnknownFunction(name.to_string()))?;

        let value = parse_arguments(name, arguments)?;
        validate_arguments(&self.declarations[index], &value)?;

        let result = self.handlers[index].call(&value, ctx).await?;
        info!(function = name, "function dispatched");
        Ok(DispatchOutcome {
            status: format!("Function {} called", name),
            result,
        })
    }
}

impl Default for FunctionCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a model-returned name onto a declared one.
///
/// An exact match wins; otherwise the longest declared name contained in
/// `returned` is chosen.
pub fn reconcile_name<'a>(
    declarations: &'a [FunctionDeclaration],
    returned: &str,
) -> Option<&'a str> {
    if let Some(exact) = declarations.iter().find(|d| d.name == returned) {
        return Some(&exact.name);
    }
    declarations
        .iter()
        .filter(|d| !d.name.is_empty() && returned.contains(d.name.as_str()))
        .max_by_key(|d| d.name.len())
        .map(|d| d.name.as_str())
}

/// Placeholder declaration sent when no functions are offered.
pub fn stub_declaration() -> FunctionDeclaration {
    FunctionDeclaration {
        name: "Noname".to_string(),
        description: None,
        parameters: ParameterSchema::default().property("stub", PropertySchema::new("string"), false),
    }
}

fn parse_arguments(name: &str, arguments: &str) -> Result<Value, DispatchError> {
    if arguments.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(arguments).map_err(|e| DispatchError::InvalidArguments {
        function: name.to_string(),
        reason: format!("arguments are not valid JSON: {}", e),
    })
}

/// Check `value` against the declaration's parameter schema.
pub fn validate_arguments(
    declaration: &FunctionDeclaration,
    value: &Value,
) -> Result<(), DispatchError> {
    let invalid = |reason: String| DispatchError::InvalidArguments {
        function: declaration.name.clone(),
        reason,
    };

    let object = value
        .as_object()
        .ok_or_else(|| invalid("arguments must be a JSON object".to_string()))?;

    for required in &declaration.parameters.required {
        match object.get(required) {
            None | Some(Value::Null) => {
                return Err(invalid(format!("missing required field '{}'", required)))
            }
            Some(_) => {}
        }
    }

    for (field, field_value) in object {
        if field_value.is_null() {
            continue;
        }
        if let Some(schema) = declaration.parameters.properties.get(field) {
            check_value(schema, field_value).map_err(|e| invalid(format!("field '{}' {}", field, e)))?;
        }
    }
    Ok(())
}

fn check_value(schema: &PropertySchema, value: &Value) -> Result<(), String> {
    let matches = match schema.kind.as_str() {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        _ => true,
    };
    if !matches {
        return Err(format!("must be of type {}", schema.kind));
    }

    if let (Some(allowed), Some(text)) = (&schema.allowed, value.as_str()) {
        if !allowed.iter().any(|a| a == text) {
            return Err(format!("must be one of {}", allowed.join(", ")));
        }
    }

    if let (Some(items), Some(elements)) = (&schema.items, value.as_array()) {
        for (i, element) in elements.iter().enumerate() {
            check_value(items, element).map_err(|e| format!("item {} {}", i, e))?;
        }
    }
    Ok(())
}
