//! Task registry: remembers which repository serves each task so revision
//! rounds can update it.

use async_trait::async_trait;
use dashmap::DashMap;
use mongodb::{
    bson::doc,
    options::{IndexOptions, ReplaceOptions},
    Client as MongoClient, Collection, Database, IndexModel,
};
use service_core::error::AppError;

use crate::models::TaskRepo;

const COLLECTION: &str = "task_repos";

/// Trait for task-to-repository stores.
#[async_trait]
pub trait RepoRegistry: Send + Sync {
    async fn get(&self, task: &str) -> Result<Option<TaskRepo>, AppError>;

    /// Insert or replace the record for `record.task`.
    async fn put(&self, record: &TaskRepo) -> Result<(), AppError>;

    async fn health_check(&self) -> Result<(), AppError>;

    fn backend(&self) -> &'static str;
}

/// Process-local registry. Records are lost on restart.
#[derive(Default)]
pub struct InMemoryRegistry {
    records: DashMap<String, TaskRepo>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RepoRegistry for InMemoryRegistry {
    async fn get(&self, task: &str) -> Result<Option<TaskRepo>, AppError> {
        Ok(self.records.get(task).map(|r| r.value().clone()))
    }

    async fn put(&self, record: &TaskRepo) -> Result<(), AppError> {
        self.records.insert(record.task.clone(), record.clone());
        Ok(())
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[derive(Clone)]
pub struct MongoRegistry {
    client: MongoClient,
    db: Database,
}

impl MongoRegistry {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, AppError> {
        tracing::info!(database = %database, "Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB: {}", e);
            AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self { client, db })
    }

    pub async fn initialize_indexes(&self) -> Result<(), AppError> {
        let task_index = IndexModel::builder()
            .keys(doc! { "task": 1 })
            .options(
                IndexOptions::builder()
                    .name("task_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();

        self.task_repos()
            .create_index(task_index, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create task index: {}", e);
                AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
            })?;

        tracing::info!("Created MongoDB indexes for task registry");
        Ok(())
    }

    fn task_repos(&self) -> Collection<TaskRepo> {
        self.db.collection(COLLECTION)
    }
}

#[async_trait]
impl RepoRegistry for MongoRegistry {
    async fn get(&self, task: &str) -> Result<Option<TaskRepo>, AppError> {
        self.task_repos()
            .find_one(doc! { "task": task }, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to find task repo: {}", e);
                AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
            })
    }

    async fn put(&self, record: &TaskRepo) -> Result<(), AppError> {
        let options = ReplaceOptions::builder().upsert(true).build();
        self.task_repos()
            .replace_one(doc! { "task": record.task.as_str() }, record, options)
            .await
            .map_err(|e| {
                tracing::error!("Failed to upsert task repo: {}", e);
                AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
            })?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), AppError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("MongoDB health check failed: {}", e);
                AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
            })?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "mongodb"
    }
}
