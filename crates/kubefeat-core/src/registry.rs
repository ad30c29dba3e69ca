// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Name-keyed lookup of feature managers and operators.
//!
//! Registries are built once at startup and are immutable afterwards; share
//! them behind an `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::error::{FeatureError, Result};
use crate::feature::{FeatureManager, FeatureOperator};

/// Registered feature managers, keyed by feature name.
#[derive(Clone, Default)]
pub struct FeatureManagerRegistry {
    managers: HashMap<String, Arc<dyn FeatureManager>>,
}

impl FeatureManagerRegistry {
    /// Build a registry from a fixed set of managers.
    ///
    /// If two managers share a name, the later one wins.
    pub fn new(managers: impl IntoIterator<Item = Arc<dyn FeatureManager>>) -> Self {
        let mut map = HashMap::new();
        for manager in managers {
            let name = manager.name().to_string();
            if map.insert(name.clone(), manager).is_some() {
                warn!(feature = %name, "Duplicate feature manager registration");
            }
        }
        Self { managers: map }
    }

    /// Look up the manager for a feature.
    pub fn get_feature_manager(&self, name: &str) -> Result<Arc<dyn FeatureManager>> {
        self.managers
            .get(name)
            .cloned()
            .ok_or_else(|| FeatureError::UnknownFeature {
                feature_name: name.to_string(),
            })
    }

    /// Names of all registered features, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.managers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for FeatureManagerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureManagerRegistry")
            .field("features", &self.names())
            .finish()
    }
}

/// Registered feature operators, keyed by feature name.
#[derive(Clone, Default)]
pub struct FeatureOperatorRegistry {
    operators: HashMap<String, Arc<dyn FeatureOperator>>,
}

impl FeatureOperatorRegistry {
    /// Build a registry from a fixed set of operators.
    ///
    /// If two operators share a name, the later one wins.
    pub fn new(operators: impl IntoIterator<Item = Arc<dyn FeatureOperator>>) -> Self {
        let mut map = HashMap::new();
        for operator in operators {
            let name = operator.name().to_string();
            if map.insert(name.clone(), operator).is_some() {
                warn!(feature = %name, "Duplicate feature operator registration");
            }
        }
        Self { operators: map }
    }

    /// Look up the operator for a feature.
    pub fn get_feature_operator(&self, name: &str) -> Result<Arc<dyn FeatureOperator>> {
        self.operators
            .get(name)
            .cloned()
            .ok_or_else(|| FeatureError::UnknownFeature {
                feature_name: name.to_string(),
            })
    }

    /// Names of all registered features, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.operators.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for FeatureOperatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureOperatorRegistry")
            .field("features", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClusterId, FeatureOutput, FeatureSpec};
    use async_trait::async_trait;

    struct NamedManager(&'static str);

    #[async_trait]
    impl FeatureManager for NamedManager {
        fn name(&self) -> &str {
            self.0
        }

        async fn validate_spec(&self, _spec: &FeatureSpec) -> Result<()> {
            Ok(())
        }

        async fn prepare_spec(
            &self,
            _cluster_id: ClusterId,
            spec: FeatureSpec,
        ) -> Result<FeatureSpec> {
            Ok(spec)
        }

        async fn get_output(
            &self,
            _cluster_id: ClusterId,
            _spec: &FeatureSpec,
        ) -> Result<FeatureOutput> {
            Ok(FeatureOutput::new())
        }
    }

    struct NamedOperator(&'static str);

    #[async_trait]
    impl FeatureOperator for NamedOperator {
        fn name(&self) -> &str {
            self.0
        }

        async fn apply(&self, _cluster_id: ClusterId, _spec: &FeatureSpec) -> Result<()> {
            Ok(())
        }

        async fn deactivate(&self, _cluster_id: ClusterId, _spec: &FeatureSpec) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_manager_lookup() {
        let registry = FeatureManagerRegistry::new([
            Arc::new(NamedManager("dns")) as Arc<dyn FeatureManager>,
            Arc::new(NamedManager("vault")),
        ]);

        assert_eq!(registry.get_feature_manager("dns").unwrap().name(), "dns");
        assert_eq!(registry.names(), vec!["dns", "vault"]);
    }

    #[test]
    fn test_unknown_manager() {
        let registry = FeatureManagerRegistry::default();

        let err = match registry.get_feature_manager("logging") {
            Ok(_) => panic!("lookup should fail"),
            Err(err) => err,
        };
        assert!(matches!(
            err,
            FeatureError::UnknownFeature { ref feature_name } if feature_name == "logging"
        ));
    }

    #[test]
    fn test_operator_lookup() {
        let registry =
            FeatureOperatorRegistry::new([Arc::new(NamedOperator("dns")) as Arc<dyn FeatureOperator>]);

        assert_eq!(registry.get_feature_operator("dns").unwrap().name(), "dns");
        assert!(registry.get_feature_operator("vault").is_err());
    }
}
