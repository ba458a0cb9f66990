//! MongoDB 文档存储

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Document};
use mongodb::options::{ClientOptions, FindOptions};
use mongodb::{Client, Database};
use std::time::Duration;

use super::{DocumentStore, StoreError};
use crate::query::pipeline::{to_documents, Stage};

/// MongoDB 存储
///
/// `Database` 持有客户端连接池，可在请求间共享
#[derive(Clone)]
pub struct MongoStore {
    database: Database,
}

impl MongoStore {
    /// 连接并 ping 一次，失败即返回错误
    pub async fn connect(
        uri: &str,
        database: &str,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|e| StoreError::Connection(format!("Invalid MongoDB URI: {}", e)))?;
        options.app_name = Some(env!("CARGO_PKG_NAME").to_string());
        options.connect_timeout = Some(timeout);
        options.server_selection_timeout = Some(timeout);

        let client =
            Client::with_options(options).map_err(|e| StoreError::Connection(e.to_string()))?;
        let database = client.database(database);

        database
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        log::info!("Connected to MongoDB database '{}'", database.name());

        Ok(Self { database })
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn aggregate(
        &self,
        collection: &str,
        pipeline: &[Stage],
    ) -> Result<Vec<Document>, StoreError> {
        let cursor = self
            .database
            .collection::<Document>(collection)
            .aggregate(to_documents(pipeline), None)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        cursor
            .try_collect()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        projection: Document,
    ) -> Result<Vec<Document>, StoreError> {
        let options = FindOptions::builder().projection(projection).build();
        let cursor = self
            .database
            .collection::<Document>(collection)
            .find(filter, options)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        cursor
            .try_collect()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }
}
