//! Store ports. The pipeline persists through these traits; the engine crate
//! plugs in the Postgres and Redis adapters, tests plug in memory.

use aegis_core::{ExecutionResult, InternalEvent, PolicyDefinition, PositionState};
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn load_open_positions(&self) -> Result<Vec<PositionState>>;
    async fn insert_position(&self, position: &PositionState) -> Result<()>;
    async fn update_position(&self, position: &PositionState) -> Result<()>;
}

#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn load_active_policies(&self) -> Result<Vec<PolicyDefinition>>;
    async fn insert_policy(&self, policy: &PolicyDefinition) -> Result<()>;
    async fn delete_policy(&self, id: &str) -> Result<bool>;
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn insert_execution(&self, result: &ExecutionResult) -> Result<()>;
    async fn get_execution(&self, id: &str) -> Result<Option<ExecutionResult>>;
    async fn list_executions(&self, limit: i64) -> Result<Vec<ExecutionResult>>;
}

#[async_trait]
pub trait EventLogStore: Send + Sync {
    async fn append_event(&self, event: &InternalEvent) -> Result<()>;
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn write_snapshot(&self, key: &str, payload: &str, ttl_seconds: u64) -> Result<()>;
}

/// In-memory stores for tests.
#[cfg(any(test, feature = "testing"))]
pub mod memory {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MemoryStore {
        pub positions: Mutex<Vec<PositionState>>,
        pub policies: Mutex<Vec<PolicyDefinition>>,
        pub executions: Mutex<Vec<ExecutionResult>>,
        pub events: Mutex<Vec<InternalEvent>>,
        pub snapshots: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl PositionStore for MemoryStore {
        async fn load_open_positions(&self) -> Result<Vec<PositionState>> {
            Ok(self.positions.lock().unwrap().iter().filter(|p| p.is_open()).cloned().collect())
        }

        async fn insert_position(&self, position: &PositionState) -> Result<()> {
            self.positions.lock().unwrap().push(position.clone());
            Ok(())
        }

        async fn update_position(&self, position: &PositionState) -> Result<()> {
            let mut all = self.positions.lock().unwrap();
            if let Some(slot) = all.iter_mut().find(|p| p.id == position.id) {
                *slot = position.clone();
            }
            Ok(())
        }
    }

    #[async_trait]
    impl PolicyStore for MemoryStore {
        async fn load_active_policies(&self) -> Result<Vec<PolicyDefinition>> {
            Ok(self.policies.lock().unwrap().iter().filter(|p| p.is_active).cloned().collect())
        }

        async fn insert_policy(&self, policy: &PolicyDefinition) -> Result<()> {
            self.policies.lock().unwrap().push(policy.clone());
            Ok(())
        }

        async fn delete_policy(&self, id: &str) -> Result<bool> {
            let mut all = self.policies.lock().unwrap();
            let before = all.len();
            all.retain(|p| p.id != id);
            Ok(all.len() != before)
        }
    }

    #[async_trait]
    impl ExecutionStore for MemoryStore {
        async fn insert_execution(&self, result: &ExecutionResult) -> Result<()> {
            self.executions.lock().unwrap().push(result.clone());
            Ok(())
        }

        async fn get_execution(&self, id: &str) -> Result<Option<ExecutionResult>> {
            Ok(self.executions.lock().unwrap().iter().find(|e| e.id == id).cloned())
        }

        async fn list_executions(&self, limit: i64) -> Result<Vec<ExecutionResult>> {
            Ok(self.executions.lock().unwrap().iter().rev().take(limit as usize).cloned().collect())
        }
    }

    #[async_trait]
    impl EventLogStore for MemoryStore {
        async fn append_event(&self, event: &InternalEvent) -> Result<()> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    #[async_trait]
    impl SnapshotStore for MemoryStore {
        async fn write_snapshot(&self, key: &str, payload: &str, _ttl_seconds: u64) -> Result<()> {
            self.snapshots.lock().unwrap().push((key.to_string(), payload.to_string()));
            Ok(())
        }
    }
}
