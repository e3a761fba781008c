//! Assets bundled into the binary at compile time
//!
//! ```text
//! assets/
//! ├── images/
//! │   └── default.json
//! └── templates/
//!     └── tool_description.md.j2
//! ```

use include_dir::{Dir, include_dir};

pub static ASSETS: Dir<'static> = include_dir!("$CARGO_MANIFEST_DIR/assets");

/// Get any embedded file by path relative to `assets/`
pub fn get_file(path: &str) -> Option<&'static str> {
    ASSETS.get_file(path)?.contents_utf8()
}

/// Names of the bundled image lists (file stem of `images/*.json`)
pub fn list_image_lists() -> Vec<&'static str> {
    ASSETS
        .get_dir("images")
        .map(|dir| {
            dir.files()
                .filter_map(|file| {
                    let name = file.path().file_name()?.to_str()?;
                    name.strip_suffix(".json")
                })
                .collect()
        })
        .unwrap_or_default()
}
