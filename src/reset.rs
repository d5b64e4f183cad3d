//! Reset Coordinator (component F, §4.5).
//!
//! Wipes transactions/holds/ledger entries and restores every account to
//! its seed balance, one engine at a time. Refuses while the generator is
//! running. Each engine resets independently — a failure on one engine is
//! reported without attempting compensation on the others, since reset is
//! itself idempotent and safe to retry.

use std::collections::BTreeMap;

use crate::engine_id::EngineId;
use crate::error::AppError;
use crate::generator::Generator;
use crate::orchestrator::EngineLookup;
use rust_decimal::Decimal;

pub struct ResetCoordinator<'a, L: EngineLookup + 'static> {
    clients: &'a dyn EngineLookup,
    generator: &'a Generator<L>,
}

impl<'a, L: EngineLookup + 'static> ResetCoordinator<'a, L> {
    pub fn new(clients: &'a dyn EngineLookup, generator: &'a Generator<L>) -> Self {
        Self { clients, generator }
    }

    /// Resets every engine in `engines`. Returns the per-engine outcome so
    /// the caller can report partial failure; a busy engine does not stop
    /// the remaining resets.
    pub async fn reset_all(
        &self,
        engines: &[EngineId],
        seed_balance: Decimal,
        account_range: u32,
    ) -> Result<BTreeMap<EngineId, Result<(), AppError>>, AppError> {
        if self.generator.is_running().await {
            return Err(AppError::BadRequest("Cannot reset while RDG is running".into()));
        }

        let mut results = BTreeMap::new();
        for &engine in engines {
            let client = self.clients.client(engine);
            let outcome = client.reset(seed_balance, account_range).await;
            results.insert(engine, outcome);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::GeneratorConfig;
    use crate::procedure::mock::MockEngineClient;
    use crate::procedure::EngineClient;
    use std::sync::Arc;

    struct TwoEngineLookup {
        a: MockEngineClient,
        b: MockEngineClient,
    }

    impl EngineLookup for TwoEngineLookup {
        fn client(&self, engine: EngineId) -> &dyn EngineClient {
            if engine == self.a.engine() { &self.a } else { &self.b }
        }
    }

    fn lookup() -> Arc<TwoEngineLookup> {
        Arc::new(TwoEngineLookup {
            a: MockEngineClient::new(EngineId::SqlA),
            b: MockEngineClient::new(EngineId::SqlB),
        })
    }

    #[tokio::test]
    async fn reset_refuses_while_generator_running() {
        let lookup = lookup();
        let generator = Generator::new(lookup.clone());
        generator
            .start(GeneratorConfig {
                rps: 1,
                concurrency_cap: 1,
                active_engines: vec![EngineId::SqlA, EngineId::SqlB],
                min_amount: Decimal::new(1, 0),
                max_amount: Decimal::new(2, 0),
                allow_same_db: true,
                account_range: 5,
            })
            .await
            .unwrap();

        let coordinator = ResetCoordinator::new(&*lookup, &generator);
        let err = coordinator
            .reset_all(&[EngineId::SqlA, EngineId::SqlB], Decimal::new(10_000, 0), 795)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        generator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn reset_calls_every_listed_engine_independently() {
        let lookup = lookup();
        let generator = Generator::new(lookup.clone());
        let coordinator = ResetCoordinator::new(&*lookup, &generator);

        let results = coordinator
            .reset_all(&[EngineId::SqlA, EngineId::SqlB], Decimal::new(10_000, 0), 795)
            .await
            .unwrap();

        assert!(results[&EngineId::SqlA].is_ok());
        assert!(results[&EngineId::SqlB].is_ok());
        assert_eq!(lookup.a.reset_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(lookup.b.reset_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
