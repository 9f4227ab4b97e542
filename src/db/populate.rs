use std::collections::HashMap;

use bson::{doc, oid::ObjectId, Bson, Document};
use futures::TryStreamExt;
use mongodb::Database;

use crate::db::store::{and_filter, Model};
use crate::error::AppError;

/// Replaces ObjectId references stored under `path` with the referenced documents.
pub struct Populate {
    path: &'static str,
    collection: &'static str,
    filter: Document,
    projection: Document,
    virtuals: fn(&mut Document),
}

impl Populate {
    /// Reference to `M` documents, leaving out its hidden fields and `exclude`.
    ///
    /// Documents outside `M`'s default filter are not resolved.
    pub fn of<M: Model>(path: &'static str, exclude: &[&str]) -> Self {
        let projection = M::hidden_fields()
            .iter()
            .chain(exclude.iter())
            .map(|field| (field.to_string(), Bson::Int32(0)))
            .collect();

        Self {
            path,
            collection: M::COLLECTION,
            filter: M::default_filter(),
            projection,
            virtuals: M::add_virtuals,
        }
    }

    fn referenced_ids(&self, docs: &[Document]) -> Vec<ObjectId> {
        let mut ids = Vec::new();
        for doc in docs {
            match doc.get(self.path) {
                Some(Bson::ObjectId(id)) => ids.push(*id),
                Some(Bson::Array(items)) => {
                    ids.extend(items.iter().filter_map(Bson::as_object_id));
                }
                _ => {}
            }
        }
        ids.sort();
        ids.dedup();
        ids
    }

    fn lookup(&self, ids: Vec<ObjectId>) -> Document {
        and_filter(self.filter.clone(), doc! {"_id": {"$in": ids}})
    }

    pub async fn apply(&self, db: &Database, docs: &mut [Document]) -> Result<(), AppError> {
        let ids = self.referenced_ids(docs);
        if ids.is_empty() {
            return Ok(());
        }

        let found: Vec<Document> = db
            .collection::<Document>(self.collection)
            .find(self.lookup(ids))
            .projection(self.projection.clone())
            .await?
            .try_collect()
            .await?;
        let by_id: HashMap<ObjectId, Document> = found
            .into_iter()
            .filter_map(|mut doc| {
                (self.virtuals)(&mut doc);
                doc.get_object_id("_id").ok().map(|id| (id, doc))
            })
            .collect();

        for doc in docs.iter_mut() {
            let replacement = match doc.get(self.path) {
                Some(Bson::ObjectId(id)) => by_id
                    .get(id)
                    .map(|found| Bson::Document(found.clone()))
                    .unwrap_or(Bson::Null),
                Some(Bson::Array(items)) => Bson::Array(
                    items
                        .iter()
                        .filter_map(Bson::as_object_id)
                        .filter_map(|id| by_id.get(&id).cloned().map(Bson::Document))
                        .collect(),
                ),
                _ => continue,
            };
            doc.insert(self.path, replacement);
        }
        Ok(())
    }
}
