//! MongoDB client and store implementation
//!
//! Connection wrapper plus the production `TaskStore`. The concurrency
//! guarantees lean on the database: unique indexes reject duplicate
//! idempotency keys and duplicate submissions, and `find_one_and_update`
//! with a filtered `$inc` gives the single-operation check-and-increment the
//! participation gate needs.

use bson::{doc, DateTime, Document};
use mongodb::options::{IndexOptions, ReturnDocument};
use mongodb::{Client, Collection, IndexModel};
use tracing::info;

use async_trait::async_trait;
use futures_util::TryStreamExt;

use crate::db::schemas::{
    IngestionRecordDoc, IngestionStatus, Metadata, SubmissionDoc, TaskDoc, TaskStatus,
    INGESTION_COLLECTION, SUBMISSION_COLLECTION, TASK_COLLECTION,
};
use crate::db::store::TaskStore;
use crate::types::{Result, TollgateError};

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// Trait for schemas with mutable metadata
pub trait MutMetadata {
    fn mut_metadata(&mut self) -> &mut Metadata;
}

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Connect and verify the connection with a ping
    pub async fn new(uri: &str, db_name: &str) -> Result<Self> {
        info!("Connecting to MongoDB at {}", uri);

        // serverSelectionTimeoutMS avoids hanging on an unreachable MongoDB
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| TollgateError::Database(format!("Failed to connect to MongoDB: {e}")))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| TollgateError::Database(format!("MongoDB ping failed: {e}")))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    fn collection<T: Send + Sync>(&self, name: &str) -> Collection<T> {
        self.client.database(&self.db_name).collection::<T>(name)
    }
}

/// Production store backed by MongoDB
pub struct MongoTaskStore {
    tasks: Collection<TaskDoc>,
    submissions: Collection<SubmissionDoc>,
    ingestions: Collection<IngestionRecordDoc>,
}

impl MongoTaskStore {
    /// Build typed collections and apply schema-defined indexes
    pub async fn new(client: &MongoClient) -> Result<Self> {
        let store = Self {
            tasks: client.collection(TASK_COLLECTION),
            submissions: client.collection(SUBMISSION_COLLECTION),
            ingestions: client.collection(INGESTION_COLLECTION),
        };

        apply_indexes::<TaskDoc>(&store.tasks).await?;
        apply_indexes::<SubmissionDoc>(&store.submissions).await?;
        apply_indexes::<IngestionRecordDoc>(&store.ingestions).await?;

        Ok(store)
    }
}

async fn apply_indexes<T>(collection: &Collection<T>) -> Result<()>
where
    T: IntoIndexes + Send + Sync,
{
    let schema_indices = T::into_indices();
    if schema_indices.is_empty() {
        return Ok(());
    }

    let indices: Vec<IndexModel> = schema_indices
        .into_iter()
        .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
        .collect();

    collection
        .create_indexes(indices)
        .await
        .map_err(|e| TollgateError::Database(format!("Failed to create indexes: {e}")))?;

    Ok(())
}

/// E11000: the unique index rejected the insert
fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};
    match &*err.kind {
        ErrorKind::Write(WriteFailure::WriteError(write_err)) => write_err.code == 11000,
        _ => false,
    }
}

fn db_err(context: &str, err: mongodb::error::Error) -> TollgateError {
    TollgateError::Database(format!("{context}: {err}"))
}

#[async_trait]
impl TaskStore for MongoTaskStore {
    async fn find_ingestion(
        &self,
        external_request_id: &str,
    ) -> Result<Option<IngestionRecordDoc>> {
        self.ingestions
            .find_one(doc! { "external_request_id": external_request_id })
            .await
            .map_err(|e| db_err("find ingestion", e))
    }

    async fn try_insert_ingestion(&self, mut record: IngestionRecordDoc) -> Result<bool> {
        record.metadata = Metadata::new();
        match self.ingestions.insert_one(record).await {
            Ok(_) => Ok(true),
            Err(e) if is_duplicate_key(&e) => Ok(false),
            Err(e) => Err(db_err("insert ingestion", e)),
        }
    }

    async fn set_ingestion_task(&self, external_request_id: &str, task_id: &str) -> Result<()> {
        let result = self
            .ingestions
            .update_one(
                doc! { "external_request_id": external_request_id },
                doc! { "$set": {
                    "task_id": task_id,
                    "status": IngestionStatus::Settled.as_str(),
                    "metadata.updated_at": DateTime::now(),
                }},
            )
            .await
            .map_err(|e| db_err("complete ingestion", e))?;

        if result.matched_count == 0 {
            return Err(TollgateError::NotFound(format!(
                "ingestion record {external_request_id}"
            )));
        }
        Ok(())
    }

    async fn list_reconciliation(&self) -> Result<Vec<IngestionRecordDoc>> {
        let cursor = self
            .ingestions
            .find(doc! { "status": IngestionStatus::ReconciliationRequired.as_str() })
            .await
            .map_err(|e| db_err("list reconciliation", e))?;

        cursor
            .try_collect()
            .await
            .map_err(|e| db_err("read reconciliation cursor", e))
    }

    async fn insert_task(&self, mut task: TaskDoc) -> Result<()> {
        task.metadata = Metadata::new();
        self.tasks
            .insert_one(task)
            .await
            .map_err(|e| db_err("insert task", e))?;
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<TaskDoc>> {
        self.tasks
            .find_one(doc! { "task_id": task_id })
            .await
            .map_err(|e| db_err("find task", e))
    }

    async fn set_task_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        let result = self
            .tasks
            .update_one(
                doc! { "task_id": task_id },
                doc! { "$set": {
                    "status": status.as_str(),
                    "metadata.updated_at": DateTime::now(),
                }},
            )
            .await
            .map_err(|e| db_err("set task status", e))?;

        if result.matched_count == 0 {
            return Err(TollgateError::NotFound(format!("task {task_id}")));
        }
        Ok(())
    }

    async fn claim_seat(&self, task_id: &str) -> Result<TaskDoc> {
        // advisory read for the capacity bound and for failure diagnosis;
        // max_participants is immutable so using it in the filter is safe
        let task = self
            .get_task(task_id)
            .await?
            .ok_or_else(|| TollgateError::NotFound(format!("task {task_id}")))?;

        let updated = self
            .tasks
            .find_one_and_update(
                doc! {
                    "task_id": task_id,
                    "status": TaskStatus::Active.as_str(),
                    "participant_count": { "$lt": task.max_participants as i64 },
                },
                doc! {
                    "$inc": { "participant_count": 1 },
                    "$set": { "metadata.updated_at": DateTime::now() },
                },
            )
            .return_document(ReturnDocument::After)
            .await
            .map_err(|e| db_err("claim seat", e))?;

        match updated {
            Some(task) => Ok(task),
            None => {
                // the conditional update lost; re-read to say why
                let task = self
                    .get_task(task_id)
                    .await?
                    .ok_or_else(|| TollgateError::NotFound(format!("task {task_id}")))?;
                if task.participant_count >= task.max_participants {
                    Err(TollgateError::CapacityExceeded)
                } else {
                    Err(TollgateError::TaskNotActive(task.status.as_str().into()))
                }
            }
        }
    }

    async fn release_seat(&self, task_id: &str) -> Result<()> {
        self.tasks
            .update_one(
                doc! { "task_id": task_id, "participant_count": { "$gt": 0 } },
                doc! { "$inc": { "participant_count": -1 } },
            )
            .await
            .map_err(|e| db_err("release seat", e))?;
        Ok(())
    }

    async fn insert_submission(&self, mut submission: SubmissionDoc) -> Result<()> {
        submission.metadata = Metadata::new();
        match self.submissions.insert_one(submission).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => Err(TollgateError::DuplicateSubmission),
            Err(e) => Err(db_err("insert submission", e)),
        }
    }

    async fn get_submission(
        &self,
        task_id: &str,
        participant_id: &str,
    ) -> Result<Option<SubmissionDoc>> {
        self.submissions
            .find_one(doc! { "task_id": task_id, "participant_id": participant_id })
            .await
            .map_err(|e| db_err("find submission", e))
    }

    async fn apply_rating(
        &self,
        task_id: &str,
        participant_id: &str,
        quality_score: u8,
        reward_minor: u64,
        rated_by: &str,
    ) -> Result<SubmissionDoc> {
        // {reward_minor: null} matches both absent and null, so the filter
        // only ever selects an unrated submission
        let updated = self
            .submissions
            .find_one_and_update(
                doc! {
                    "task_id": task_id,
                    "participant_id": participant_id,
                    "reward_minor": null,
                },
                doc! { "$set": {
                    "quality_score": quality_score as i32,
                    "reward_minor": reward_minor as i64,
                    "rated_by": rated_by,
                    "rated_at": DateTime::now(),
                    "metadata.updated_at": DateTime::now(),
                }},
            )
            .return_document(ReturnDocument::After)
            .await
            .map_err(|e| db_err("apply rating", e))?;

        match updated {
            Some(submission) => Ok(submission),
            None => match self.get_submission(task_id, participant_id).await? {
                Some(_) => Err(TollgateError::AlreadyRated),
                None => Err(TollgateError::NotFound(format!(
                    "submission {task_id}/{participant_id}"
                ))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    // Exercising this store requires a running MongoDB instance; the pipeline
    // logic is covered against MemoryStore, which implements the same
    // TaskStore contract.
}
