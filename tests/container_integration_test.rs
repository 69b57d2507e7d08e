// Integration tests for the dependency-injection container

#[cfg(test)]
mod container_integration_tests {
    use async_trait::async_trait;
    use std::sync::Arc;

    use synapse::container::{ContainerError, ServiceContainer};
    use synapse::engines::{
        CommanderEngine, EngineResult, ScholarEngine, SoldierEngine,
    };

    struct StubSoldier;

    #[async_trait]
    impl SoldierEngine for StubSoldier {
        async fn initialize(&self) -> EngineResult<()> {
            Ok(())
        }

        async fn decide(&self, _context: serde_json::Value) -> EngineResult<serde_json::Value> {
            Ok(serde_json::json!({"action": "hold"}))
        }
    }

    struct StubCommander {
        soldier: Arc<dyn SoldierEngine>,
    }

    #[async_trait]
    impl CommanderEngine for StubCommander {
        async fn initialize(&self) -> EngineResult<()> {
            Ok(())
        }

        async fn analyze(&self, context: serde_json::Value) -> EngineResult<serde_json::Value> {
            // Delegates the final call to the soldier it was wired with.
            self.soldier.decide(context).await
        }
    }

    struct StubScholar;

    #[async_trait]
    impl ScholarEngine for StubScholar {
        async fn initialize(&self) -> EngineResult<()> {
            Ok(())
        }

        async fn research(
            &self,
            topic: &str,
            _context: serde_json::Value,
        ) -> EngineResult<serde_json::Value> {
            Ok(serde_json::json!({ "topic": topic, "factors": [] }))
        }
    }

    #[tokio::test]
    async fn test_three_engines_wired_through_container() {
        let container = ServiceContainer::new();

        container.register_singleton::<dyn SoldierEngine, _>(|_| {
            let engine: Arc<dyn SoldierEngine> = Arc::new(StubSoldier);
            Ok(engine)
        });
        container.register_singleton::<dyn ScholarEngine, _>(|_| {
            let engine: Arc<dyn ScholarEngine> = Arc::new(StubScholar);
            Ok(engine)
        });
        // The commander depends on the soldier interface, resolved
        // through the container rather than by direct import.
        container.register_singleton::<dyn CommanderEngine, _>(|c| {
            let engine: Arc<dyn CommanderEngine> = Arc::new(StubCommander {
                soldier: c.resolve::<dyn SoldierEngine>()?,
            });
            Ok(engine)
        });

        let commander = container.resolve::<dyn CommanderEngine>().unwrap();
        commander.initialize().await.unwrap();
        let decision = commander.analyze(serde_json::json!({"signal": 1})).await.unwrap();
        assert_eq!(decision["action"], "hold");

        let scholar = container.resolve::<dyn ScholarEngine>().unwrap();
        let report = scholar
            .research("mean reversion", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(report["topic"], "mean reversion");

        // Singleton identity across resolves.
        let again = container.resolve::<dyn CommanderEngine>().unwrap();
        assert!(Arc::ptr_eq(&commander, &again));
    }

    #[test]
    fn test_mutual_cycle_detected_and_recovered() {
        struct ServiceA;
        struct ServiceB;

        let container = ServiceContainer::new();
        container.register_singleton::<ServiceA, _>(|c| {
            c.resolve::<ServiceB>()?;
            Ok(Arc::new(ServiceA))
        });
        container.register_singleton::<ServiceB, _>(|c| {
            c.resolve::<ServiceA>()?;
            Ok(Arc::new(ServiceB))
        });

        // A -> B -> A is reported as a cycle, from either entry point.
        assert!(matches!(
            container.resolve::<ServiceA>(),
            Err(ContainerError::CircularDependency(_))
        ));
        assert!(matches!(
            container.resolve::<ServiceB>(),
            Err(ContainerError::CircularDependency(_))
        ));

        // The currently-resolving set was cleared on both exits: an
        // unrelated registration still resolves fine afterwards.
        struct Standalone;
        container.register_singleton::<Standalone, _>(|_| Ok(Arc::new(Standalone)));
        assert!(container.resolve::<Standalone>().is_ok());
    }

    #[test]
    fn test_registered_instance_resolves_identically() {
        struct Config {
            name: &'static str,
        }

        let container = ServiceContainer::new();
        let config = Arc::new(Config { name: "prod" });
        container.register_instance::<Config>(Arc::clone(&config));

        let resolved = container.resolve::<Config>().unwrap();
        assert!(Arc::ptr_eq(&config, &resolved));
        assert_eq!(resolved.name, "prod");
    }

    #[test]
    fn test_global_container_is_shared() {
        struct Marker;

        synapse::container::global().register_singleton::<Marker, _>(|_| Ok(Arc::new(Marker)));
        assert!(synapse::container::global().is_registered::<Marker>());

        // Leave the process-global container as we found it.
        synapse::container::global().clear();
    }
}
