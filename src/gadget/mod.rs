//! Gadget metadata as seen by the registry.
//!
//! A [`GadgetDescriptor`] is produced once per image by an [`ExecutionClient`]
//! and never mutated afterwards.

mod client;

pub use client::{CliGadgetClient, ExecutionClient, Params};

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use crate::error::{ClientError, DescriptorError};

/// One tunable parameter a gadget accepts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamDesc {
    pub key: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default_value: String,
}

impl ParamDesc {
    /// Key the runtime expects: `prefix + key`.
    pub fn full_key(&self) -> String {
        format!("{}{}", self.prefix, self.key)
    }
}

/// A column of the gadget's primary output stream.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct OutputField {
    pub name: String,
    pub description: String,
    /// Raw `value.one-of` annotation, when the field is an enum.
    pub allowed_values: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GadgetDescriptor {
    pub image: String,
    pub name: String,
    pub description: String,
    pub raw_metadata: String,
    pub params: Vec<ParamDesc>,
    pub output_fields: Vec<OutputField>,
}

/// Shape of `image inspect --output json`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GadgetInfo {
    image_name: String,
    #[serde(default)]
    metadata: String,
    #[serde(default)]
    params: Vec<ParamDesc>,
}

#[derive(Debug, Deserialize)]
struct RawMetadata {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    datasources: Mapping,
}

#[derive(Debug, Default, Deserialize)]
struct RawDataSource {
    #[serde(default)]
    fields: Mapping,
}

#[derive(Debug, Default, Deserialize)]
struct RawField {
    #[serde(default)]
    annotations: BTreeMap<String, Value>,
}

impl GadgetDescriptor {
    /// Decode the JSON document printed by the gadget CLI's `image inspect`.
    pub fn from_info_json(json: &str) -> Result<Self, ClientError> {
        let info: GadgetInfo = serde_json::from_str(json)?;
        Ok(Self::from_parts(info.image_name, info.metadata, info.params)?)
    }

    pub fn from_parts(
        image: String,
        raw_metadata: String,
        params: Vec<ParamDesc>,
    ) -> Result<Self, DescriptorError> {
        let metadata: RawMetadata = serde_yaml::from_str(&raw_metadata)?;
        let name = metadata
            .name
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| DescriptorError::MissingName {
                image: image.clone(),
            })?;
        let output_fields = first_source_fields(&metadata.datasources)?;

        Ok(Self {
            image,
            name,
            description: metadata.description,
            raw_metadata,
            params,
            output_fields,
        })
    }

    /// Parameters with a non-empty default, keyed by their full key.
    pub fn default_params(&self) -> Params {
        self.params
            .iter()
            .filter(|p| !p.default_value.is_empty())
            .map(|p| (p.full_key(), p.default_value.clone()))
            .collect()
    }
}

fn first_source_fields(datasources: &Mapping) -> Result<Vec<OutputField>, DescriptorError> {
    let Some((_, source)) = datasources.iter().next() else {
        return Ok(Vec::new());
    };
    let source: RawDataSource = if source.is_null() {
        RawDataSource::default()
    } else {
        serde_yaml::from_value(source.clone())?
    };

    let mut fields = Vec::with_capacity(source.fields.len());
    for (name, field) in &source.fields {
        let Some(name) = scalar_text(name) else {
            continue;
        };
        let field: RawField = if field.is_null() {
            RawField::default()
        } else {
            serde_yaml::from_value(field.clone())?
        };
        fields.push(OutputField {
            name,
            description: field
                .annotations
                .get("description")
                .and_then(scalar_text)
                .unwrap_or_default(),
            allowed_values: field.annotations.get("value.one-of").and_then(scalar_text),
        });
    }
    Ok(fields)
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Fresh background session id: 16 random bytes, hex encoded.
pub fn new_session_id() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACE_OPEN_METADATA: &str = r#"
name: trace open
description: trace open files
datasources:
  open:
    fields:
      proc:
        annotations:
          description: process that opened the file
      fname:
        annotations:
          description: path of the file
      error_raw:
        annotations:
          description: error code
          value.one-of: "EPERM, ENOENT"
  second:
    fields:
      ignored: {}
"#;

    #[test]
    fn test_output_fields_follow_first_source_order() {
        let d = GadgetDescriptor::from_parts(
            "ghcr.io/inspektor-gadget/gadget/trace_open:latest".into(),
            TRACE_OPEN_METADATA.into(),
            vec![],
        )
        .unwrap();
        assert_eq!(d.name, "trace open");
        let names: Vec<_> = d.output_fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["proc", "fname", "error_raw"]);
        assert_eq!(
            d.output_fields[2].allowed_values.as_deref(),
            Some("EPERM, ENOENT")
        );
        assert_eq!(d.output_fields[0].allowed_values, None);
    }

    #[test]
    fn test_no_datasources_yields_no_fields() {
        let d = GadgetDescriptor::from_parts("img".into(), "name: x\n".into(), vec![]).unwrap();
        assert!(d.output_fields.is_empty());
        assert_eq!(d.description, "");
    }

    #[test]
    fn test_missing_name_is_rejected() {
        let err = GadgetDescriptor::from_parts("img".into(), "description: y\n".into(), vec![])
            .unwrap_err();
        assert!(matches!(err, DescriptorError::MissingName { .. }));
    }

    #[test]
    fn test_from_info_json() {
        let json = serde_json::json!({
            "imageName": "trace_dns",
            "metadata": "name: trace dns\ndescription: dns\n",
            "params": [
                {"key": "map-fetch-interval", "prefix": "operator.oci.ebpf.", "description": "interval", "defaultValue": "1s"},
                {"key": "namespace", "prefix": "", "description": "ns", "defaultValue": ""}
            ]
        });
        let d = GadgetDescriptor::from_info_json(&json.to_string()).unwrap();
        assert_eq!(d.image, "trace_dns");
        assert_eq!(d.params.len(), 2);
        assert_eq!(d.params[0].full_key(), "operator.oci.ebpf.map-fetch-interval");

        let defaults = d.default_params();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults["operator.oci.ebpf.map-fetch-interval"], "1s");
    }

    #[test]
    fn test_session_id_shape() {
        let a = new_session_id();
        let b = new_session_id();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
