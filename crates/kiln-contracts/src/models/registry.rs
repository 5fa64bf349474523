use indexmap::IndexMap;

pub const DEFAULT_MODEL: &str = "fal-ai/flux/dev";

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
    pub name: String,
    pub label: String,
    pub default_steps: Option<u32>,
    pub default_guidance: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    /// First registered model, which the catalog treats as the default.
    pub fn default_model(&self) -> Option<&ModelSpec> {
        self.models.values().next()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert =
        |name: &str, label: &str, default_steps: Option<u32>, default_guidance: Option<f64>| {
            map.insert(
                name.to_string(),
                ModelSpec {
                    name: name.to_string(),
                    label: label.to_string(),
                    default_steps,
                    default_guidance,
                },
            );
        };

    insert(DEFAULT_MODEL, "FLUX.1 [dev]", Some(28), Some(3.5));
    insert("fal-ai/flux-pro/v1.1", "FLUX1.1 [pro]", None, None);
    insert(
        "fal-ai/flux-pro/v1.1-ultra-finetuned",
        "FLUX1.1 [pro] ultra (fine-tuned)",
        None,
        None,
    );

    map
}
