use bson::doc;
use mongodb::Database;
use validator::Validate;

use crate::db::store::{Model, Store};
use crate::error::AppError;
use crate::models::tour::{NewTour, Tour};

/// Parses a JSON array of tour bodies, checking each one like tour creation does.
pub fn parse_tours(raw: &str) -> Result<Vec<Tour>, AppError> {
    let bodies: Vec<serde_json::Value> = serde_json::from_str(raw)
        .map_err(|e| AppError::Validation(format!("tour data is not a JSON array: {}", e)))?;

    bodies
        .into_iter()
        .enumerate()
        .map(|(idx, body)| {
            let input: NewTour = serde_json::from_value(body)
                .map_err(|e| AppError::Validation(format!("tour #{}: {}", idx, e)))?;
            input.validate()?;
            Tour::from_input(input)
        })
        .collect()
}

pub async fn import_tours(db: &Database, tours: &[Tour]) -> Result<usize, AppError> {
    let store = Store::<Tour>::new(db);
    for tour in tours {
        let id = store.insert(tour).await?;
        log::debug!("imported tour {} ({})", tour.name, id);
    }
    Ok(tours.len())
}

pub async fn delete_tours(db: &Database) -> Result<u64, AppError> {
    let result = db
        .collection::<bson::Document>(Tour::COLLECTION)
        .delete_many(doc! {})
        .await?;
    Ok(result.deleted_count)
}
