use std::fmt;

use serde_json::{json, Map, Value};

use crate::error::{PipelineError, Result};
use crate::models::ModelSelector;
use crate::options::{map_aspect_ratio, ImageSize};

pub const MIN_IMAGES: u8 = 1;
pub const MAX_IMAGES: u8 = 4;

/// Provider credential, passed explicitly to every call that needs it.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(raw: impl AsRef<str>) -> Result<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(PipelineError::MissingCredential);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn authorization_header(&self) -> String {
        format!("Key {}", self.0)
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Raw values as collected by a front end, before any validation.
#[derive(Debug, Clone, Default)]
pub struct GenerationForm {
    pub prompt: String,
    pub model_id: String,
    pub aspect_ratio: String,
    pub num_images: f64,
    pub num_inference_steps: Option<f64>,
    pub guidance_scale: Option<f64>,
    pub enable_safety_checker: Option<bool>,
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub model_id: String,
    pub image_size: ImageSize,
    pub num_images: u8,
    pub num_inference_steps: Option<u32>,
    pub guidance_scale: Option<f64>,
    pub enable_safety_checker: Option<bool>,
    pub api_key: ApiKey,
}

impl GenerationRequest {
    /// Validate a raw form.
    ///
    /// The credential is checked first so nothing else runs without one.
    /// Falsy optional values (zero steps, zero guidance, a disabled or
    /// missing safety toggle) are treated as unset and never reach the
    /// provider document.
    pub fn from_form(form: &GenerationForm, selector: &ModelSelector) -> Result<Self> {
        let api_key = ApiKey::new(&form.api_key)?;

        let image_size = map_aspect_ratio(&form.aspect_ratio).ok_or_else(|| {
            PipelineError::InvalidOption(format!(
                "unknown aspect ratio '{}'",
                form.aspect_ratio.trim()
            ))
        })?;

        let num_images = coerce_num_images(form.num_images)?;

        let num_inference_steps = match form.num_inference_steps.map(f64::trunc) {
            Some(value) if !value.is_finite() => {
                return Err(PipelineError::InvalidOption(
                    "num_inference_steps must be a finite number".to_string(),
                ))
            }
            Some(value) if value < 0.0 => {
                return Err(PipelineError::InvalidOption(format!(
                    "num_inference_steps must be positive, got {value}"
                )))
            }
            Some(value) if value > 0.0 => Some(value as u32),
            _ => None,
        };

        let guidance_scale = form
            .guidance_scale
            .filter(|value| value.is_finite() && *value != 0.0);

        let enable_safety_checker = form.enable_safety_checker.filter(|enabled| *enabled);

        let model = selector
            .select(Some(form.model_id.as_str()))
            .map_err(PipelineError::InvalidOption)?;

        Ok(Self {
            prompt: form.prompt.clone(),
            model_id: model.model_id,
            image_size,
            num_images,
            num_inference_steps,
            guidance_scale,
            enable_safety_checker,
            api_key,
        })
    }

    /// The JSON body sent to the provider. Optional fields appear only when
    /// set; the credential never appears.
    pub fn document(&self) -> Map<String, Value> {
        let mut payload = map_object(json!({
            "prompt": self.prompt,
            "image_size": self.image_size.as_str(),
            "num_images": self.num_images,
        }));
        if let Some(steps) = self.num_inference_steps {
            payload.insert("num_inference_steps".to_string(), json!(steps));
        }
        if let Some(guidance) = self.guidance_scale {
            payload.insert("guidance_scale".to_string(), json!(guidance));
        }
        if let Some(enabled) = self.enable_safety_checker {
            payload.insert("enable_safety_checker".to_string(), Value::Bool(enabled));
        }
        payload
    }
}

fn coerce_num_images(raw: f64) -> Result<u8> {
    let value = raw.trunc();
    if !value.is_finite() || value < f64::from(MIN_IMAGES) || value > f64::from(MAX_IMAGES) {
        return Err(PipelineError::InvalidOption(format!(
            "num_images must be between {MIN_IMAGES} and {MAX_IMAGES}, got {raw}"
        )));
    }
    Ok(value as u8)
}

fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
