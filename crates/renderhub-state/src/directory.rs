//! `EnvironmentDirectory` backed by the environments table.

use async_trait::async_trait;

use renderhub_core::{EnvironmentDirectory, RenderingEnvironment};

use crate::store::StateStore;

#[async_trait]
impl EnvironmentDirectory for StateStore {
    async fn list_environment_names(&self) -> anyhow::Result<Vec<String>> {
        Ok(StateStore::list_environment_names(self)?)
    }

    async fn get_environment(&self, name: &str) -> anyhow::Result<Option<RenderingEnvironment>> {
        Ok(StateStore::get_environment(self, name)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn directory_reads_through_the_store() {
        let store = StateStore::open_in_memory().unwrap();
        let env: RenderingEnvironment = serde_json::from_str(r#"{"name":"farm-a"}"#).unwrap();
        store.put_environment(&env).unwrap();

        let directory: &dyn EnvironmentDirectory = &store;
        assert_eq!(directory.list_environment_names().await.unwrap(), vec!["farm-a"]);
        assert_eq!(directory.get_environment("farm-a").await.unwrap(), Some(env));
        assert!(directory.get_environment("farm-b").await.unwrap().is_none());
    }
}
