//! Name-bound handles.
//!
//! `docwrap.collection("local", "stuff")?.fetch(..)` reads the same as
//! `docwrap.fetch("local", "stuff", ..)` without repeating the names.

use docwrap_core::{
    CountOptions, Document, DocwrapResult, FetchOptions, GetOrInsertOptions, InsertOptions,
    MoveOptions, RemoveOptions, UpdateOptions,
};

use crate::facade::Docwrap;

/// A registered logical database.
#[derive(Debug, Clone)]
pub struct DatabaseHandle<'a> {
    docwrap: &'a Docwrap,
    name: String,
}

impl<'a> DatabaseHandle<'a> {
    pub(crate) fn new(docwrap: &'a Docwrap, name: &str) -> Self {
        Self {
            docwrap,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collection(&self, collection: &str) -> CollectionHandle<'a> {
        CollectionHandle {
            docwrap: self.docwrap,
            database: self.name.clone(),
            collection: collection.to_string(),
        }
    }

    pub async fn collection_names(&self) -> DocwrapResult<Vec<String>> {
        self.docwrap.collection_names(&self.name).await
    }
}

/// One collection of a registered logical database.
#[derive(Debug, Clone)]
pub struct CollectionHandle<'a> {
    docwrap: &'a Docwrap,
    database: String,
    collection: String,
}

impl CollectionHandle<'_> {
    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn name(&self) -> &str {
        &self.collection
    }

    pub async fn insert(&self, options: InsertOptions) -> DocwrapResult<Document> {
        self.docwrap
            .insert(&self.database, &self.collection, options)
            .await
    }

    pub async fn update(&self, options: UpdateOptions) -> DocwrapResult<bool> {
        self.docwrap
            .update(&self.database, &self.collection, options)
            .await
    }

    pub async fn fetch(&self, options: FetchOptions) -> DocwrapResult<Vec<Document>> {
        self.docwrap
            .fetch(&self.database, &self.collection, options)
            .await
    }

    pub async fn fetch_and_count(
        &self,
        options: FetchOptions,
    ) -> DocwrapResult<(Vec<Document>, u64)> {
        self.docwrap
            .fetch_and_count(&self.database, &self.collection, options)
            .await
    }

    pub async fn count(&self, options: CountOptions) -> DocwrapResult<u64> {
        self.docwrap
            .count(&self.database, &self.collection, options)
            .await
    }

    pub async fn get_or_insert(&self, options: GetOrInsertOptions) -> DocwrapResult<Document> {
        self.docwrap
            .get_or_insert(&self.database, &self.collection, options)
            .await
    }

    /// Move a document from this collection into `destination`.
    pub async fn move_to(&self, destination: &str, options: MoveOptions) -> DocwrapResult<bool> {
        self.docwrap
            .move_document(&self.database, &self.collection, destination, options)
            .await
    }

    pub async fn remove(&self, options: RemoveOptions) -> DocwrapResult<bool> {
        self.docwrap
            .remove(&self.database, &self.collection, options)
            .await
    }
}
