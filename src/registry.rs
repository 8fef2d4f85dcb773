//! Model registry.
//!
//! Maps a model name to how the model is built and which trainer drives it.
//! Build one at startup and pass it by reference to whatever instantiates
//! models.

use std::collections::BTreeMap;

use crate::config::TrainingConfig;
use crate::error::{HermesError, Result};
use crate::models::{CommVariant, Ic3Net, IndependentQNet};

/// Which network a registry entry builds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelKind {
    Ic3Net(CommVariant),
    IndependentQNet,
}

/// Which trainer drives a registered model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrainerKind {
    /// [`PgTrainer`](crate::trainer::PgTrainer)
    PolicyGradient,
    /// [`QTrainer`](crate::trainer::QTrainer)
    QLearning,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegistryEntry {
    pub model: ModelKind,
    pub trainer: TrainerKind,
}

/// A freshly built model, tagged by kind.
#[derive(Clone, Debug)]
pub enum BuiltModel {
    Ic3Net(Ic3Net),
    IndependentQNet(IndependentQNet),
}

impl BuiltModel {
    pub fn into_ic3net(self) -> Option<Ic3Net> {
        match self {
            BuiltModel::Ic3Net(net) => Some(net),
            BuiltModel::IndependentQNet(_) => None,
        }
    }

    pub fn into_qnet(self) -> Option<IndependentQNet> {
        match self {
            BuiltModel::IndependentQNet(net) => Some(net),
            BuiltModel::Ic3Net(_) => None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ModelRegistry {
    entries: BTreeMap<String, RegistryEntry>,
}

impl ModelRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// `ic3net`, `independent_ic3net` and `independent_qnet`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            "ic3net",
            RegistryEntry {
                model: ModelKind::Ic3Net(CommVariant::Cooperative),
                trainer: TrainerKind::PolicyGradient,
            },
        );
        registry.register(
            "independent_ic3net",
            RegistryEntry {
                model: ModelKind::Ic3Net(CommVariant::Independent),
                trainer: TrainerKind::PolicyGradient,
            },
        );
        registry.register(
            "independent_qnet",
            RegistryEntry {
                model: ModelKind::IndependentQNet,
                trainer: TrainerKind::QLearning,
            },
        );
        registry
    }

    /// Add or replace an entry.
    pub fn register(&mut self, name: &str, entry: RegistryEntry) {
        self.entries.insert(name.to_string(), entry);
    }

    pub fn get(&self, name: &str) -> Result<&RegistryEntry> {
        self.entries.get(name).ok_or_else(|| {
            HermesError::invalid_parameter(
                "model_name".to_string(),
                format!("no model registered as '{}'", name),
            )
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn trainer_kind(&self, name: &str) -> Result<TrainerKind> {
        Ok(self.get(name)?.trainer)
    }

    /// Build the model registered as `name` from `config`.
    pub fn build(&self, name: &str, config: &TrainingConfig) -> Result<BuiltModel> {
        config.validate()?;
        match self.get(name)?.model {
            ModelKind::Ic3Net(variant) => Ok(BuiltModel::Ic3Net(Ic3Net::from_config(config, variant)?)),
            ModelKind::IndependentQNet => Ok(BuiltModel::IndependentQNet(IndependentQNet::from_config(config)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_build_each_model() {
        let registry = ModelRegistry::with_defaults();
        let config = TrainingConfig::new().agent_num(2).obs_size(3).action_dim(2).hid_size(8);

        assert!(matches!(registry.build("ic3net", &config), Ok(BuiltModel::Ic3Net(_))));
        assert!(matches!(
            registry.build("independent_qnet", &config),
            Ok(BuiltModel::IndependentQNet(_))
        ));
        assert_eq!(registry.trainer_kind("independent_qnet").unwrap(), TrainerKind::QLearning);
    }

    #[test]
    fn test_independent_variant_checks_comm_iters() {
        let registry = ModelRegistry::with_defaults();
        let config = TrainingConfig::new().agent_num(2).obs_size(3).action_dim(2).hid_size(8);

        assert!(matches!(
            registry.build("independent_ic3net", &config),
            Err(HermesError::UseCooperativeVariant(2))
        ));
        let single_round = config.comm_iters(1);
        assert!(registry.build("independent_ic3net", &single_round).is_ok());
        assert!(matches!(
            registry.build("ic3net", &single_round),
            Err(HermesError::UseIndependentVariant(1))
        ));
    }

    #[test]
    fn test_unknown_name() {
        let registry = ModelRegistry::with_defaults();
        assert!(matches!(
            registry.build("schednet", &TrainingConfig::default()),
            Err(HermesError::InvalidParameter { .. })
        ));
        assert_eq!(registry.names().count(), 3);
    }
}
