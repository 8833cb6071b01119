use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::GenerateError;

pub const MAX_INPUT_IMAGES: usize = 8;
pub const MAX_INPUT_IMAGE_BYTES: u64 = 30 * 1024 * 1024;

/// Output size tier accepted by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Resolution {
    #[serde(rename = "1K")]
    OneK,
    #[default]
    #[serde(rename = "2K")]
    TwoK,
    #[serde(rename = "4K")]
    FourK,
}

impl Resolution {
    pub fn parse(value: &str) -> Result<Self, GenerateError> {
        match value.trim().to_ascii_uppercase().as_str() {
            "1K" => Ok(Self::OneK),
            "2K" => Ok(Self::TwoK),
            "4K" => Ok(Self::FourK),
            _ => Err(GenerateError::UnsupportedResolution {
                value: value.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneK => "1K",
            Self::TwoK => "2K",
            Self::FourK => "4K",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Png,
    Jpg,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Result<Self, GenerateError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpg),
            _ => Err(GenerateError::UnsupportedOutputFormat {
                value: value.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpg => "jpg",
        }
    }
}

/// One generation input: either already fetchable by the provider, or a
/// local file that must be staged to object storage first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageRef {
    Url(String),
    Local(PathBuf),
}

impl ImageRef {
    /// Classifies by scheme prefix; anything that is not http(s) is treated
    /// as a local path.
    pub fn from_input(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            Self::Url(trimmed.to_string())
        } else {
            Self::Local(PathBuf::from(trimmed))
        }
    }

    pub fn as_local(&self) -> Option<&Path> {
        match self {
            Self::Local(path) => Some(path.as_path()),
            Self::Url(_) => None,
        }
    }
}

/// Caps enforced before any network call. Configurable so tests do not need
/// to materialize 30MB files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationLimits {
    pub max_images: usize,
    pub max_file_bytes: u64,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_images: MAX_INPUT_IMAGES,
            max_file_bytes: MAX_INPUT_IMAGE_BYTES,
        }
    }
}

/// One image-generation job as accepted from the invoking surface.
/// Constructed once, validated, then consumed by the engine; never mutated
/// after validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default)]
    pub images: Vec<ImageRef>,
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: String,
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default)]
    pub output_format: OutputFormat,
}

fn default_aspect_ratio() -> String {
    "3:4".to_string()
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            images: Vec::new(),
            aspect_ratio: default_aspect_ratio(),
            resolution: Resolution::default(),
            output_format: OutputFormat::default(),
        }
    }

    /// Builds a request from the raw string parameters of the invoking
    /// surface, applying the provider defaults for anything omitted.
    pub fn from_inputs(
        prompt: &str,
        images: &[String],
        aspect_ratio: Option<&str>,
        resolution: Option<&str>,
        output_format: Option<&str>,
    ) -> Result<Self, GenerateError> {
        let resolution = match resolution {
            Some(value) => Resolution::parse(value)?,
            None => Resolution::default(),
        };
        let output_format = match output_format {
            Some(value) => OutputFormat::parse(value)?,
            None => OutputFormat::default(),
        };
        Ok(Self {
            prompt: prompt.to_string(),
            images: images
                .iter()
                .map(|value| ImageRef::from_input(value))
                .collect(),
            aspect_ratio: aspect_ratio
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(default_aspect_ratio),
            resolution,
            output_format,
        })
    }

    /// Pre-network validation. Local inputs are stat'ed to enforce the size
    /// cap; a path that cannot be stat'ed fails here rather than waiting for
    /// the stager.
    pub fn validate(&self, limits: &ValidationLimits) -> Result<(), GenerateError> {
        if self.prompt.trim().is_empty() {
            return Err(GenerateError::EmptyPrompt);
        }
        if self.images.len() > limits.max_images {
            return Err(GenerateError::TooManyImages {
                count: self.images.len(),
                max: limits.max_images,
            });
        }
        for image in &self.images {
            let Some(path) = image.as_local() else {
                continue;
            };
            let metadata = fs::metadata(path).map_err(|_| GenerateError::FileNotFound {
                path: path.display().to_string(),
            })?;
            if metadata.len() > limits.max_file_bytes {
                return Err(GenerateError::ImageTooLarge {
                    name: file_name_of(path),
                    size_bytes: metadata.len(),
                    max_bytes: limits.max_file_bytes,
                });
            }
        }
        Ok(())
    }
}

pub fn file_name_of(path: &Path) -> String {
    path.file_name()
        .and_then(|value| value.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use super::{
        GenerationRequest, ImageRef, OutputFormat, Resolution, ValidationLimits,
        MAX_INPUT_IMAGES, MAX_INPUT_IMAGE_BYTES,
    };
    use crate::error::GenerateError;

    #[test]
    fn resolution_parses_known_tiers_case_insensitively() {
        assert_eq!(Resolution::parse("1K").ok(), Some(Resolution::OneK));
        assert_eq!(Resolution::parse("2k").ok(), Some(Resolution::TwoK));
        assert_eq!(Resolution::parse(" 4K ").ok(), Some(Resolution::FourK));
        assert!(matches!(
            Resolution::parse("8K"),
            Err(GenerateError::UnsupportedResolution { .. })
        ));
    }

    #[test]
    fn output_format_accepts_jpeg_alias() {
        assert_eq!(OutputFormat::parse("jpeg").ok(), Some(OutputFormat::Jpg));
        assert!(matches!(
            OutputFormat::parse("webp"),
            Err(GenerateError::UnsupportedOutputFormat { .. })
        ));
    }

    #[test]
    fn image_ref_classifies_by_scheme() {
        assert_eq!(
            ImageRef::from_input("https://cdn.example.com/a.png"),
            ImageRef::Url("https://cdn.example.com/a.png".to_string())
        );
        assert_eq!(
            ImageRef::from_input("inputs/photo.png"),
            ImageRef::Local(PathBuf::from("inputs/photo.png"))
        );
    }

    #[test]
    fn default_limits_match_provider_contract() {
        let limits = ValidationLimits::default();
        assert_eq!(limits.max_images, MAX_INPUT_IMAGES);
        assert_eq!(limits.max_file_bytes, MAX_INPUT_IMAGE_BYTES);
        assert_eq!(MAX_INPUT_IMAGES, 8);
        assert_eq!(MAX_INPUT_IMAGE_BYTES, 30 * 1024 * 1024);
    }

    #[test]
    fn rejects_more_than_max_images() {
        let mut request = GenerationRequest::new("a boat");
        request.images = (0..9)
            .map(|idx| ImageRef::Url(format!("https://cdn.example.com/{idx}.png")))
            .collect();
        let err = request.validate(&ValidationLimits::default()).unwrap_err();
        assert!(matches!(
            err,
            GenerateError::TooManyImages { count: 9, max: 8 }
        ));
    }

    #[test]
    fn rejects_empty_prompt() {
        let request = GenerationRequest::new("   ");
        assert!(matches!(
            request.validate(&ValidationLimits::default()),
            Err(GenerateError::EmptyPrompt)
        ));
    }

    #[test]
    fn rejects_oversized_local_file_with_name_and_size() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("big.png");
        fs::write(&path, vec![0u8; 64])?;

        let mut request = GenerationRequest::new("a boat");
        request.images = vec![ImageRef::Local(path)];
        let limits = ValidationLimits {
            max_images: 8,
            max_file_bytes: 16,
        };
        match request.validate(&limits) {
            Err(GenerateError::ImageTooLarge {
                name,
                size_bytes,
                max_bytes,
            }) => {
                assert_eq!(name, "big.png");
                assert_eq!(size_bytes, 64);
                assert_eq!(max_bytes, 16);
            }
            other => panic!("expected ImageTooLarge, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn rejects_missing_local_file() {
        let mut request = GenerationRequest::new("a boat");
        request.images = vec![ImageRef::Local(PathBuf::from("/nonexistent/photo.png"))];
        assert!(matches!(
            request.validate(&ValidationLimits::default()),
            Err(GenerateError::FileNotFound { .. })
        ));
    }

    #[test]
    fn from_inputs_applies_provider_defaults() -> anyhow::Result<()> {
        let request = GenerationRequest::from_inputs("a boat", &[], None, None, None)?;
        assert_eq!(request.aspect_ratio, "3:4");
        assert_eq!(request.resolution, Resolution::TwoK);
        assert_eq!(request.output_format, OutputFormat::Png);
        Ok(())
    }
}
