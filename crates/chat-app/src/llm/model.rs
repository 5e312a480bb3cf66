#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
}

impl Model {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
        }
    }

    /// Uses the part after the provider prefix as display name.
    pub fn from_id(id: impl Into<String>) -> Self {
        let id = id.into();
        let name = id
            .split_once('/')
            .map(|(_, name)| name.to_string())
            .unwrap_or_else(|| id.clone());
        Self::new(id, name)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

pub const DEFAULT_MODEL: &str = "openai/gpt-3.5-turbo";

pub fn default_models() -> Vec<Model> {
    vec![
        Model::from_id("openai/gpt-3.5-turbo").with_description("Fast general-purpose default"),
        Model::from_id("mistralai/mixtral-8x7b-instruct").with_description("Mixture-of-experts"),
        Model::new("meta-llama/llama-3-8b-instruct", "meta-llama/llama-3-8b-instruct"),
        Model::from_id("openrouter/auto").with_description("Let the router pick a model"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_contains_default_model() {
        assert!(
            default_models()
                .iter()
                .any(|model| model.id == DEFAULT_MODEL)
        );
    }

    #[test]
    fn display_name_drops_provider_prefix() {
        let model = Model::from_id("mistralai/mixtral-8x7b-instruct");
        assert_eq!(model.name, "mixtral-8x7b-instruct");
        assert_eq!(Model::from_id("local").name, "local");
    }
}
