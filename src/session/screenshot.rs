//! Screenshot options, clipping precedence, and output paths.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::ipc::path::workspace_hash;
use crate::session::dom::BoundingBox;

/// Supported capture formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreenshotFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
}

impl ScreenshotFormat {
    /// File extension for saved captures.
    pub fn extension(&self) -> &'static str {
        match self {
            ScreenshotFormat::Png => "png",
            ScreenshotFormat::Jpeg => "jpg",
            ScreenshotFormat::Webp => "webp",
        }
    }

    /// MIME type of the capture payload.
    pub fn mime_type(&self) -> &'static str {
        match self {
            ScreenshotFormat::Png => "image/png",
            ScreenshotFormat::Jpeg => "image/jpeg",
            ScreenshotFormat::Webp => "image/webp",
        }
    }
}

impl std::str::FromStr for ScreenshotFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "png" => Ok(ScreenshotFormat::Png),
            "jpeg" | "jpg" => Ok(ScreenshotFormat::Jpeg),
            "webp" => Ok(ScreenshotFormat::Webp),
            _ => Err(format!("unknown screenshot format: {}", s)),
        }
    }
}

/// Explicit clipping rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipRegion {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,

    /// Scale factor applied to the capture.
    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_scale() -> f64 {
    1.0
}

impl ClipRegion {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
            scale: 1.0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0.0 && self.height > 0.0 && self.scale > 0.0
    }
}

impl From<BoundingBox> for ClipRegion {
    fn from(bounds: BoundingBox) -> Self {
        ClipRegion::new(bounds.x, bounds.y, bounds.width, bounds.height)
    }
}

/// Options for a screenshot operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotOptions {
    /// Capture the element matching this selector.
    #[serde(default)]
    pub selector: Option<String>,

    /// Explicit clip rectangle; beats everything else.
    #[serde(default)]
    pub clip: Option<ClipRegion>,

    /// Capture the full scrollable page.
    #[serde(default)]
    pub full_page: bool,

    /// Output format.
    #[serde(default)]
    pub format: ScreenshotFormat,

    /// Directory to save into; defaults to the workspace-stable scheme.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

/// What region a capture should cover, after applying precedence.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureTarget {
    /// The explicit clip rectangle.
    Clip(ClipRegion),

    /// The bounding box of the first element matching a selector.
    Element(String),

    /// The full scrollable page.
    FullPage,

    /// The current viewport.
    Viewport,
}

/// Apply the clipping precedence: clip > selector > fullPage > viewport.
pub fn capture_target(options: &ScreenshotOptions) -> CaptureTarget {
    if let Some(clip) = options.clip {
        CaptureTarget::Clip(clip)
    } else if let Some(ref selector) = options.selector {
        CaptureTarget::Element(selector.clone())
    } else if options.full_page {
        CaptureTarget::FullPage
    } else {
        CaptureTarget::Viewport
    }
}

/// A capture saved to disk.
#[derive(Debug, Clone)]
pub struct CapturedScreenshot {
    /// Where the image was written.
    pub path: PathBuf,

    /// The image, base64-encoded for transport to the host.
    pub base64: String,
}

/// Compute the output path for a new capture.
///
/// Without an override the scheme is
/// `<os-temp>/browser-coordinator/screenshots/<hash(cwd)>/screenshot-<timestamp>.<ext>`,
/// stable per workspace so successive captures land together.
pub fn output_path(override_dir: Option<&Path>, format: ScreenshotFormat) -> PathBuf {
    let dir = match override_dir {
        Some(dir) => dir.to_path_buf(),
        None => {
            let cwd = std::env::current_dir().unwrap_or_else(|_| std::env::temp_dir());
            std::env::temp_dir()
                .join("browser-coordinator")
                .join("screenshots")
                .join(workspace_hash(&cwd))
        }
    };
    let timestamp = Utc::now().format("%Y-%m-%dT%H-%M-%S%.3fZ");
    dir.join(format!("screenshot-{}.{}", timestamp, format.extension()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_clip_beats_all() {
        let options = ScreenshotOptions {
            selector: Some("#app".to_string()),
            clip: Some(ClipRegion::new(0.0, 0.0, 10.0, 10.0)),
            full_page: true,
            ..Default::default()
        };
        assert!(matches!(capture_target(&options), CaptureTarget::Clip(_)));
    }

    #[test]
    fn test_precedence_selector_beats_full_page() {
        let options = ScreenshotOptions {
            selector: Some("#app".to_string()),
            full_page: true,
            ..Default::default()
        };
        assert_eq!(
            capture_target(&options),
            CaptureTarget::Element("#app".to_string())
        );
    }

    #[test]
    fn test_precedence_full_page_then_viewport() {
        let options = ScreenshotOptions {
            full_page: true,
            ..Default::default()
        };
        assert_eq!(capture_target(&options), CaptureTarget::FullPage);
        assert_eq!(
            capture_target(&ScreenshotOptions::default()),
            CaptureTarget::Viewport
        );
    }

    #[test]
    fn test_format_mapping() {
        assert_eq!(ScreenshotFormat::Png.extension(), "png");
        assert_eq!(ScreenshotFormat::Jpeg.extension(), "jpg");
        assert_eq!(ScreenshotFormat::Webp.mime_type(), "image/webp");
        assert_eq!("JPG".parse::<ScreenshotFormat>().unwrap(), ScreenshotFormat::Jpeg);
        assert!("bmp".parse::<ScreenshotFormat>().is_err());
    }

    #[test]
    fn test_output_path_scheme() {
        let path = output_path(None, ScreenshotFormat::Png);
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("screenshot-"));
        assert!(name.ends_with(".png"));
        assert!(path
            .components()
            .any(|c| c.as_os_str() == "screenshots"));
    }

    #[test]
    fn test_output_path_override() {
        let path = output_path(Some(Path::new("/captures")), ScreenshotFormat::Webp);
        assert!(path.starts_with("/captures"));
        assert!(path.to_string_lossy().ends_with(".webp"));
    }

    #[test]
    fn test_clip_from_bounding_box() {
        let clip = ClipRegion::from(BoundingBox::new(1.0, 2.0, 3.0, 4.0));
        assert_eq!(clip.scale, 1.0);
        assert!(clip.is_valid());
    }
}
