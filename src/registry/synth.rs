//! Turning gadget descriptors into tool definitions.
//!
//! Everything here is pure: the same descriptor and environment always yield
//! byte-identical output.

use minijinja::{Environment as Templates, context};
use once_cell::sync::Lazy;
use serde_json::{Map, Value, json};

use crate::config::Environment;
use crate::embedded;
use crate::error::DescriptorError;
use crate::gadget::GadgetDescriptor;

const DESCRIPTION_TEMPLATE: &str = "templates/tool_description.md.j2";

static TEMPLATES: Lazy<Templates<'static>> = Lazy::new(|| {
    let mut templates = Templates::new();
    match embedded::get_file(DESCRIPTION_TEMPLATE) {
        Some(source) => {
            if let Err(e) = templates.add_template(DESCRIPTION_TEMPLATE, source) {
                log::error!("Invalid bundled template {DESCRIPTION_TEMPLATE}: {e}");
            }
        }
        None => log::error!("Bundled template {DESCRIPTION_TEMPLATE} is missing"),
    }
    templates
});

/// A tool as advertised to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Map<String, Value>,
    pub read_only: bool,
}

/// Tool name for a gadget's display name.
pub fn normalize_tool_name(name: &str) -> String {
    name.replace(' ', "_")
}

pub fn synthesize(
    descriptor: &GadgetDescriptor,
    environment: Environment,
) -> Result<ToolDefinition, DescriptorError> {
    let name = normalize_tool_name(&descriptor.name);
    let description = render_description(&name, descriptor, environment)?;

    Ok(ToolDefinition {
        name,
        description,
        input_schema: gadget_input_schema(descriptor),
        read_only: true,
    })
}

fn render_description(
    name: &str,
    descriptor: &GadgetDescriptor,
    environment: Environment,
) -> Result<String, DescriptorError> {
    let template_error = |source| DescriptorError::Template {
        image: descriptor.image.clone(),
        source,
    };
    TEMPLATES
        .get_template(DESCRIPTION_TEMPLATE)
        .map_err(template_error)?
        .render(context! {
            name => name,
            description => descriptor.description.trim(),
            environment => environment.display_name(),
            fields => &descriptor.output_fields,
        })
        .map_err(template_error)
}

fn gadget_input_schema(descriptor: &GadgetDescriptor) -> Map<String, Value> {
    let mut params = Map::new();
    for p in &descriptor.params {
        params.insert(
            p.full_key(),
            json!({
                "type": "string",
                "description": p.description,
            }),
        );
    }

    let schema = json!({
        "type": "object",
        "properties": {
            "params": {
                "type": "object",
                "description": "key-value pairs of parameters to pass to the gadget",
                "properties": params,
            },
            "timeout": {
                "type": "number",
                "description": "Timeout in seconds for the gadget to run",
            },
            "background": {
                "type": "boolean",
                "description": "Run the gadget in the background and return its ID instead of waiting for results",
            },
        },
        "required": ["params"],
    });

    match schema {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
