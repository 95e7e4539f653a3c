use crate::config::ModelInfo;
use crate::db::Tier;
use crate::error::AppError;

/// Configured models and the tier each one requires.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: Vec<ModelInfo>,
}

impl ModelCatalog {
    pub fn new(models: Vec<ModelInfo>) -> Self {
        Self { models }
    }

    /// Models a user of `tier` may select, in configuration order.
    pub fn available(&self, tier: Tier) -> Vec<ModelInfo> {
        self.models
            .iter()
            .filter(|model| model.tier <= tier)
            .cloned()
            .collect()
    }

    /// Pick the requested model, or the first permitted one when none was asked for.
    pub fn resolve(&self, requested: Option<&str>, tier: Tier) -> Result<ModelInfo, AppError> {
        match requested.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => {
                let model = self
                    .models
                    .iter()
                    .find(|model| model.id == id)
                    .ok_or_else(|| AppError::PermissionDenied(format!("model {} is not available", id)))?;
                if model.tier > tier {
                    return Err(AppError::PermissionDenied(format!(
                        "model {} requires tier {}",
                        id, model.tier
                    )));
                }
                Ok(model.clone())
            }
            None => self
                .models
                .iter()
                .find(|model| model.tier <= tier)
                .cloned()
                .ok_or_else(|| AppError::PermissionDenied(format!("no model available for tier {}", tier))),
        }
    }

    /// Model used for background work such as titles and classification.
    pub fn background_model(&self) -> Option<&ModelInfo> {
        self.models.iter().find(|model| model.tier == Tier::Free)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> ModelCatalog {
        ModelCatalog::new(vec![
            ModelInfo { id: "small".into(), name: "Small".into(), tier: Tier::Free },
            ModelInfo { id: "large".into(), name: "Large".into(), tier: Tier::Pro },
            ModelInfo { id: "huge".into(), name: "Huge".into(), tier: Tier::Admin },
        ])
    }

    #[test]
    fn test_available_by_tier() {
        let catalog = catalog();
        assert_eq!(catalog.available(Tier::Free).len(), 1);
        assert_eq!(catalog.available(Tier::Pro).len(), 2);
        assert_eq!(catalog.available(Tier::Admin).len(), 3);
    }

    #[test]
    fn test_resolve_defaults_to_first_permitted() {
        let model = catalog().resolve(None, Tier::Free).unwrap();
        assert_eq!(model.id, "small");

        let model = catalog().resolve(Some("  "), Tier::Pro).unwrap();
        assert_eq!(model.id, "small");
    }

    #[test]
    fn test_resolve_rejects_higher_tier_and_unknown() {
        let err = catalog().resolve(Some("large"), Tier::Free).unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied(_)));

        let err = catalog().resolve(Some("missing"), Tier::Admin).unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied(_)));

        assert_eq!(catalog().resolve(Some("large"), Tier::Admin).unwrap().id, "large");
    }

    #[test]
    fn test_background_model_is_free() {
        assert_eq!(catalog().background_model().unwrap().id, "small");
        let paid_only = ModelCatalog::new(vec![ModelInfo { id: "x".into(), name: "X".into(), tier: Tier::Pro }]);
        assert!(paid_only.background_model().is_none());
    }
}
