//! Image list resolution for `--gadget-images-file`
//!
//! A list spec is either a file path or the name of a list bundled into the binary:
//! - "default" → `assets/images/default.json`
//! - "/abs/images.json", "./images.json", "images.json" → read from disk
//!
//! Both forms hold the same JSON document:
//!
//! ```json
//! { "images": ["ghcr.io/inspektor-gadget/gadget/trace_open:latest"] }
//! ```

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{MAIN_SEPARATOR, Path};

use crate::error::ImageListError;

#[derive(Debug, Clone, Deserialize)]
pub struct ImageListConfig {
    pub images: Vec<String>,
}

/// Whether `spec` names a file rather than a bundled list.
fn is_path_spec(spec: &str) -> bool {
    let path = Path::new(spec);
    path.is_absolute()
        || spec.contains('/')
        || spec.contains(MAIN_SEPARATOR)
        || spec.starts_with('.')
        || path.extension().is_some()
}

fn parse(name: &str, content: &str) -> Result<Vec<String>, ImageListError> {
    let config: ImageListConfig =
        serde_json::from_str(content).map_err(|source| ImageListError::Parse {
            name: name.to_string(),
            source,
        })?;
    Ok(config.images)
}

/// Load the image list named by `spec`.
pub async fn load_image_list(spec: &str) -> Result<Vec<String>, ImageListError> {
    if !is_path_spec(spec) {
        let content = crate::embedded::get_file(&format!("images/{spec}.json"))
            .ok_or_else(|| ImageListError::UnknownBundled {
                name: spec.to_string(),
                available: crate::embedded::list_image_lists()
                    .into_iter()
                    .map(String::from)
                    .collect(),
            })?;
        return parse(spec, content);
    }

    let path = Path::new(spec);
    if !path.exists() {
        return Err(ImageListError::NotFound(path.to_path_buf()));
    }
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ImageListError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    parse(spec, &content)
}

/// Merge image lists, trimming entries and dropping blanks and repeats.
/// The first occurrence of an image decides its position.
pub fn merge_images<I>(images: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    images
        .into_iter()
        .map(|image| image.trim().to_string())
        .filter(|image| !image.is_empty() && seen.insert(image.clone()))
        .collect()
}
