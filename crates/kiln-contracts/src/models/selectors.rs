use super::registry::{ModelRegistry, ModelSpec};

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSelection {
    pub model_id: String,
    pub spec: Option<ModelSpec>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_default(),
        }
    }

    /// Resolve the requested model id.
    ///
    /// Catalogued ids carry their spec. Other non-empty ids pass through
    /// untouched since the provider hosts far more endpoints than the
    /// catalog lists. A blank request falls back to the default model.
    pub fn select(&self, requested: Option<&str>) -> Result<ModelSelection, String> {
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());
        if let Some(model_id) = requested {
            return Ok(ModelSelection {
                model_id: model_id.trim_matches('/').to_string(),
                spec: self.registry.get(model_id).cloned(),
                fallback_reason: None,
            });
        }

        let Some(model) = self.registry.default_model().cloned() else {
            return Err("No image models are configured.".to_string());
        };
        Ok(ModelSelection {
            model_id: model.name.clone(),
            spec: Some(model),
            fallback_reason: Some("No model specified; using default.".to_string()),
        })
    }
}
