//! Functions shipped with the assistant.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::chart::{ChartStyle, ChartTrace};
use crate::error::DispatchError;
use crate::models::{FunctionDeclaration, ParameterSchema, PropertySchema};
use crate::traits::{FunctionContext, FunctionHandler, ImageGenerator};

// ============ ShowChart ============

/// Appends a data series to the turn's chart.
pub struct ShowChart;

#[async_trait]
impl FunctionHandler for ShowChart {
    fn declaration(&self) -> FunctionDeclaration {
        FunctionDeclaration {
            name: "ShowChart".to_string(),
            description: Some("Show data in a chart".to_string()),
            parameters: ParameterSchema::default()
                .property(
                    "data",
                    PropertySchema::array_of(PropertySchema::new("number"))
                        .describe("Data to show"),
                    true,
                )
                .property(
                    "style",
                    PropertySchema::new("string")
                        .describe("Chart style")
                        .one_of(&ChartStyle::NAMES),
                    false,
                ),
        }
    }

    async fn call(&self, arguments: &Value, ctx: &mut FunctionContext) -> Result<String, DispatchError> {
        let data: Vec<f64> = arguments
            .get("data")
            .and_then(|d| d.as_array())
            .map(|items| items.iter().filter_map(|v| v.as_f64()).collect())
            .unwrap_or_default();
        if data.is_empty() {
            return Err(DispatchError::InvalidArguments {
                function: "ShowChart".to_string(),
                reason: "data must contain at least one number".to_string(),
            });
        }

        let style = match arguments.get("style").and_then(|s| s.as_str()) {
            Some(name) => name
                .parse::<ChartStyle>()
                .map_err(|e| DispatchError::InvalidArguments {
                    function: "ShowChart".to_string(),
                    reason: e.to_string(),
                })?,
            None => ChartStyle::default(),
        };

        ctx.traces.push(ChartTrace { data, style });
        Ok("Complete".to_string())
    }
}

// ============ VisualizeObject ============

/// Generates an image from a description.
pub struct VisualizeObject {
    images: Arc<dyn ImageGenerator>,
}

impl VisualizeObject {
    pub fn new(images: Arc<dyn ImageGenerator>) -> Self {
        Self { images }
    }
}

#[async_trait]
impl FunctionHandler for VisualizeObject {
    fn declaration(&self) -> FunctionDeclaration {
        FunctionDeclaration {
            name: "VisualizeObject".to_string(),
            description: Some("Create an image of the object from its description".to_string()),
            parameters: ParameterSchema::default().property(
                "description",
                PropertySchema::new("string").describe("Object description"),
                true,
            ),
        }
    }

    async fn call(&self, arguments: &Value, ctx: &mut FunctionContext) -> Result<String, DispatchError> {
        let description = arguments
            .get("description")
            .and_then(|d| d.as_str())
            .unwrap_or_default()
            .trim();
        if description.is_empty() {
            return Ok("No description".to_string());
        }

        let image = self
            .images
            .generate(description)
            .await
            .map_err(|e| DispatchError::Handler {
                function: "VisualizeObject".to_string(),
                reason: e.to_string(),
            })?;
        if image.is_empty() {
            return Ok("No image generated".to_string());
        }

        if let Err(e) = png::Decoder::new(std::io::Cursor::new(image.as_slice())).read_info() {
            warn!(error = %e, "generated image did not decode");
            return Ok(format!("Image generation error {}", e));
        }

        ctx.image = Some(image);
        Ok("Complete".to_string())
    }
}

// ============ LoadData ============

/// Returns the content of a local data file.
pub struct LoadData {
    data_file: PathBuf,
}

impl LoadData {
    pub fn new(data_file: PathBuf) -> Self {
        Self { data_file }
    }
}

#[async_trait]
impl FunctionHandler for LoadData {
    fn declaration(&self) -> FunctionDeclaration {
        FunctionDeclaration {
            name: "LoadData".to_string(),
            description: Some("Load data of the requested type".to_string()),
            parameters: ParameterSchema::default().property(
                "datatype",
                PropertySchema::new("string").describe("Type of the data to load"),
                true,
            ),
        }
    }

    async fn call(&self, arguments: &Value, _ctx: &mut FunctionContext) -> Result<String, DispatchError> {
        let datatype = arguments
            .get("datatype")
            .and_then(|d| d.as_str())
            .unwrap_or_default();

        let content = tokio::fs::read_to_string(&self.data_file)
            .await
            .map_err(|e| DispatchError::Handler {
                function: "LoadData".to_string(),
                reason: format!("file {} not found: {}", self.data_file.display(), e),
            })?;

        tracing::debug!(datatype, bytes = content.len(), "loaded data file");
        Ok(content)
    }
}
