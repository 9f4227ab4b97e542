use actix_web::HttpResponse;
use bson::Document;
use mongodb::Database;
use serde::Deserialize;
use serde_json::json;

use crate::db::json::render;
use crate::db::populate::Populate;
use crate::db::store::{Model, Store};
use crate::error::AppError;

const NOT_FOUND: &str = "No Document found with this Id";

#[derive(Debug, Deserialize)]
pub struct IdParam {
    pub id: String,
}

/// Loads one `M` by id, resolving the given references.
pub async fn get_one<M: Model>(
    db: &Database,
    id: &str,
    populate: &[Populate],
) -> Result<HttpResponse, AppError> {
    let mut doc = Store::<M>::new(db)
        .find_document_by_id(id)
        .await?
        .ok_or_else(|| AppError::not_found(NOT_FOUND))?;

    for reference in populate {
        reference.apply(db, std::slice::from_mut(&mut doc)).await?;
    }

    Ok(HttpResponse::Ok().json(json!({"status": "success", "data": render::<M>(doc)})))
}

pub async fn update_one<M: Model>(
    db: &Database,
    id: &str,
    patch: Document,
) -> Result<HttpResponse, AppError> {
    let doc = Store::<M>::new(db)
        .find_by_id_and_update(id, patch)
        .await?
        .ok_or_else(|| AppError::not_found(NOT_FOUND))?;

    Ok(HttpResponse::Ok().json(json!({"status": "success", "data": render::<M>(doc)})))
}

pub async fn delete_one<M: Model>(db: &Database, id: &str) -> Result<HttpResponse, AppError> {
    Store::<M>::new(db)
        .find_by_id_and_delete(id)
        .await?
        .ok_or_else(|| AppError::bad_request("No Document found with that Id"))?;

    Ok(HttpResponse::NoContent().finish())
}

/// A JSON object body as a partial update.
pub fn patch_document(body: serde_json::Map<String, serde_json::Value>) -> Result<Document, AppError> {
    Ok(bson::to_document(&body)?)
}
