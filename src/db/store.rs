use async_trait::async_trait;
use bson::{doc, oid::ObjectId, Bson, DateTime, Document};
use futures::TryStreamExt;
use mongodb::{options::ReturnDocument, Collection, Database};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::AppError;
use crate::services::api_features::FindQuery;

/// A persisted entity type and the explicit steps that run around its reads and writes.
#[async_trait]
pub trait Model: Serialize + DeserializeOwned + Send + Sync + Unpin + 'static {
    const COLLECTION: &'static str;

    /// Condition merged into every list and aggregate query.
    fn default_filter() -> Document {
        Document::new()
    }

    /// Fields left out of reads unless a caller reveals them.
    fn hidden_fields() -> &'static [&'static str] {
        &[]
    }

    /// Drops or derives fields before a partial update is written.
    fn sanitize_patch(patch: Document) -> Document {
        patch
    }

    /// Adds derived fields to a document about to be rendered.
    fn add_virtuals(_doc: &mut Document) {}

    /// Runs after a document was inserted, updated or deleted.
    async fn after_write(_db: &Database, _doc: &Document) -> Result<(), AppError> {
        Ok(())
    }
}

pub fn parse_id(id: &str) -> Result<ObjectId, AppError> {
    ObjectId::parse_str(id).map_err(|_| AppError::cast("_id", id))
}

/// Combines two filters so both must match.
pub fn and_filter(base: Document, filter: Document) -> Document {
    match (base.is_empty(), filter.is_empty()) {
        (true, _) => filter,
        (_, true) => base,
        _ => doc! { "$and": [base, filter] },
    }
}

pub struct Store<M: Model> {
    db: Database,
    collection: Collection<M>,
}

impl<M: Model> Clone for Store<M> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            collection: self.collection.clone(),
        }
    }
}

impl<M: Model> Store<M> {
    pub fn new(db: &Database) -> Self {
        Self {
            db: db.clone(),
            collection: db.collection(M::COLLECTION),
        }
    }

    pub fn collection(&self) -> &Collection<M> {
        &self.collection
    }

    pub fn documents(&self) -> Collection<Document> {
        self.collection.clone_with_type()
    }

    /// Projection hiding `M::hidden_fields()` except the ones listed in `reveal`.
    pub fn hidden_projection(reveal: &[&str]) -> Option<Document> {
        let projection: Document = M::hidden_fields()
            .iter()
            .filter(|field| !reveal.contains(field))
            .map(|field| (field.to_string(), Bson::Int32(0)))
            .collect();
        (!projection.is_empty()).then_some(projection)
    }

    /// Merges a client-requested projection with the hidden fields.
    ///
    /// Inclusion projections may not name hidden fields; exclusion projections
    /// always exclude them as well.
    pub fn read_projection(requested: &Document) -> Option<Document> {
        let hidden = M::hidden_fields();
        let inclusive = requested
            .iter()
            .any(|(key, value)| key != "_id" && !is_exclusion(value));

        if inclusive {
            let projection: Document = requested
                .iter()
                .filter(|(key, _)| !hidden.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            let still_inclusive = projection
                .iter()
                .any(|(key, value)| key != "_id" && !is_exclusion(value));
            if still_inclusive {
                return Some(projection);
            }
            return Self::hidden_projection(&[]);
        }

        let mut projection = requested.clone();
        for field in hidden {
            projection.insert(*field, 0);
        }
        (!projection.is_empty()).then_some(projection)
    }

    pub async fn find_one(&self, filter: Document, reveal: &[&str]) -> Result<Option<M>, AppError> {
        let mut action = self.collection.find_one(filter);
        if let Some(projection) = Self::hidden_projection(reveal) {
            action = action.projection(projection);
        }
        Ok(action.await?)
    }

    pub async fn find_by_id(&self, id: &str, reveal: &[&str]) -> Result<Option<M>, AppError> {
        let id = parse_id(id)?;
        self.find_one(doc! {"_id": id}, reveal).await
    }

    pub async fn find_document_by_id(&self, id: &str) -> Result<Option<Document>, AppError> {
        let id = parse_id(id)?;
        let docs = self.documents();
        let mut action = docs.find_one(doc! {"_id": id});
        if let Some(projection) = Self::hidden_projection(&[]) {
            action = action.projection(projection);
        }
        Ok(action.await?)
    }

    pub async fn insert(&self, model: &M) -> Result<ObjectId, AppError> {
        let result = self.collection.insert_one(model).await?;
        let id = result
            .inserted_id
            .as_object_id()
            .ok_or_else(|| AppError::Internal("inserted document has no ObjectId".into()))?;

        let mut written = bson::to_document(model)?;
        written.insert("_id", id);
        M::after_write(&self.db, &written).await?;
        Ok(id)
    }

    /// Applies a partial update without re-running document validation.
    pub async fn find_by_id_and_update(
        &self,
        id: &str,
        patch: Document,
    ) -> Result<Option<Document>, AppError> {
        let id = parse_id(id)?;
        let mut patch = M::sanitize_patch(patch);
        patch.remove("_id");
        patch.insert("updatedAt", DateTime::now());

        let docs = self.documents();
        let mut action = docs
            .find_one_and_update(doc! {"_id": id}, doc! {"$set": patch})
            .return_document(ReturnDocument::After);
        if let Some(projection) = Self::hidden_projection(&[]) {
            action = action.projection(projection);
        }

        let updated = action.await?;
        if let Some(doc) = &updated {
            M::after_write(&self.db, doc).await?;
        }
        Ok(updated)
    }

    pub async fn find_by_id_and_delete(&self, id: &str) -> Result<Option<Document>, AppError> {
        let id = parse_id(id)?;
        let docs = self.documents();
        let deleted = docs.find_one_and_delete(doc! {"_id": id}).await?;
        if let Some(doc) = &deleted {
            M::after_write(&self.db, doc).await?;
        }
        Ok(deleted)
    }

    /// Raw update used by internal write steps; hooks do not run.
    pub async fn update_by_id(&self, id: ObjectId, update: Document) -> Result<(), AppError> {
        self.collection.update_one(doc! {"_id": id}, update).await?;
        Ok(())
    }

    pub async fn count(&self, filter: Document) -> Result<u64, AppError> {
        Ok(self.collection.count_documents(filter).await?)
    }

    /// Runs a list query with the model's default filter applied.
    pub async fn find(&self, query: &FindQuery) -> Result<Vec<Document>, AppError> {
        let filter = and_filter(M::default_filter(), query.filter.clone());
        let docs = self.documents();
        let mut action = docs.find(filter);
        if !query.sort.is_empty() {
            action = action.sort(query.sort.clone());
        }
        if let Some(projection) = Self::read_projection(&query.projection) {
            action = action.projection(projection);
        }
        if query.skip > 0 {
            action = action.skip(query.skip);
        }
        if query.limit != 0 {
            action = action.limit(query.limit);
        }

        Ok(action.await?.try_collect().await?)
    }

    /// Query plan for a list query, as reported by the server.
    pub async fn explain(&self, query: &FindQuery) -> Result<Document, AppError> {
        let filter = and_filter(M::default_filter(), query.filter.clone());
        let mut find = doc! {
            "find": M::COLLECTION,
            "filter": filter,
            "sort": query.sort.clone(),
            "skip": query.skip as i64,
            "limit": query.limit,
        };
        if let Some(projection) = Self::read_projection(&query.projection) {
            find.insert("projection", projection);
        }

        Ok(self
            .db
            .run_command(doc! {"explain": find, "verbosity": "queryPlanner"})
            .await?)
    }

    /// Runs an aggregation pipeline, prefixed with the model's default filter.
    pub async fn aggregate(&self, pipeline: Vec<Document>) -> Result<Vec<Document>, AppError> {
        let stages = with_default_match(M::default_filter(), pipeline);
        Ok(self.collection.aggregate(stages).await?.try_collect().await?)
    }
}

/// Puts a `$match` on `base` in front of `pipeline`, unless `base` is empty.
pub fn with_default_match(base: Document, pipeline: Vec<Document>) -> Vec<Document> {
    if base.is_empty() {
        return pipeline;
    }
    std::iter::once(doc! {"$match": base})
        .chain(pipeline)
        .collect()
}

fn is_exclusion(value: &Bson) -> bool {
    match value {
        Bson::Int32(v) => *v == 0,
        Bson::Int64(v) => *v == 0,
        Bson::Double(v) => *v == 0.0,
        Bson::Boolean(v) => !*v,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::review::Review;
    use crate::models::tour::Tour;
    use crate::models::user::User;

    #[test]
    fn and_filter_skips_empty_sides() {
        let base = doc! {"secretTour": {"$ne": true}};
        assert_eq!(and_filter(base.clone(), Document::new()), base);
        assert_eq!(and_filter(Document::new(), doc! {"price": 5}), doc! {"price": 5});
        assert_eq!(
            and_filter(base.clone(), doc! {"price": 5}),
            doc! {"$and": [base, {"price": 5}]}
        );
    }

    #[test]
    fn invalid_ids_are_cast_errors() {
        let err = parse_id("not-an-id").unwrap_err();
        assert_eq!(err.to_string(), "invalid _id: not-an-id");
    }

    #[test]
    fn hidden_fields_can_be_revealed() {
        let projection = Store::<User>::hidden_projection(&["password"]).unwrap();
        assert!(!projection.contains_key("password"));
        assert_eq!(projection.get_i32("role").unwrap(), 0);
    }

    #[test]
    fn exclusion_projection_also_hides_fields() {
        let projection = Store::<User>::read_projection(&doc! {"__v": 0}).unwrap();
        assert_eq!(projection.get_i32("__v").unwrap(), 0);
        assert_eq!(projection.get_i32("password").unwrap(), 0);
    }

    #[test]
    fn inclusion_projection_never_names_hidden_fields() {
        let projection =
            Store::<User>::read_projection(&doc! {"email": 1, "password": 1}).unwrap();
        assert_eq!(projection, doc! {"email": 1});

        let only_hidden = Store::<User>::read_projection(&doc! {"password": 1}).unwrap();
        assert_eq!(only_hidden.get_i32("password").unwrap(), 0);
    }

    #[test]
    fn aggregates_skip_secret_tours_first() {
        let pipeline = vec![doc! {"$group": {"_id": "$difficulty"}}];
        let stages = with_default_match(Tour::default_filter(), pipeline.clone());

        assert_eq!(stages.len(), 2);
        assert_eq!(stages[0], doc! {"$match": {"secretTour": {"$ne": true}}});
        assert_eq!(stages[1], pipeline[0]);
    }

    #[test]
    fn models_without_default_filter_keep_their_pipeline() {
        let pipeline = vec![doc! {"$match": {"tour": ObjectId::new()}}];
        assert_eq!(
            with_default_match(Review::default_filter(), pipeline.clone()),
            pipeline
        );
    }
}
