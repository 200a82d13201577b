use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Fixed output size listed in a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CanvasSpec {
    pub width: u32,
    pub height: u32,
}

/// Build description loaded from a JSON file. Every field is optional so
/// command-line flags can fill in or override any of them.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub frames: Vec<String>,
    pub fps: Option<u32>,
    pub output: Option<PathBuf>,
    pub container: Option<String>,
    pub codec: Option<String>,
    pub canvas: Option<CanvasSpec>,
}

impl Manifest {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Reads a manifest. Relative frame paths and output are resolved
    /// against the manifest's own directory.
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let json = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read manifest {}: {e}", path.display()))?;
        let mut manifest = Self::from_json(&json)
            .map_err(|e| format!("Invalid manifest {}: {e}", path.display()))?;

        let base = path.parent().unwrap_or(Path::new(""));
        for frame in &mut manifest.frames {
            if !frame.contains("://") && Path::new(frame.as_str()).is_relative() {
                *frame = base.join(frame.as_str()).to_string_lossy().into_owned();
            }
        }
        if let Some(output) = manifest.output.as_mut() {
            if output.is_relative() {
                *output = base.join(&*output);
            }
        }
        Ok(manifest)
    }
}
