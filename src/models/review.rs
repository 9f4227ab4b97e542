use async_trait::async_trait;
use bson::{doc, oid::ObjectId, DateTime, Document};
use futures::TryStreamExt;
use mongodb::Database;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::db::populate::Populate;
use crate::db::store::Model;
use crate::error::AppError;
use crate::models::tour::{Tour, DEFAULT_RATINGS_AVERAGE};
use crate::models::user::User;

fn default_rating() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub review: String,
    #[serde(default = "default_rating")]
    pub rating: f64,
    pub tour: ObjectId,
    pub user: ObjectId,
    pub created_at: Option<DateTime>,
    pub updated_at: Option<DateTime>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct NewReview {
    #[validate(length(min = 1, message = "Review field is required"))]
    pub review: String,
    #[validate(range(min = 1.0, max = 5.0, message = "rating must be between 1 and 5"))]
    pub rating: Option<f64>,
    /// Only read when the tour is not already part of the path.
    pub tour: Option<String>,
}

impl Review {
    pub fn from_input(input: NewReview, tour: ObjectId, user: ObjectId) -> Result<Self, AppError> {
        input.validate()?;
        let now = DateTime::now();
        Ok(Self {
            id: None,
            review: input.review,
            rating: input.rating.unwrap_or_else(default_rating),
            tour,
            user,
            created_at: Some(now),
            updated_at: Some(now),
        })
    }

    /// The author, without account bookkeeping fields.
    pub fn author() -> Populate {
        Populate::of::<User>(
            "user",
            &["__v", "createdAt", "updatedAt", "passwordChangeAt", "email"],
        )
    }
}

/// Recomputes `ratingsQuantity` and `ratingsAverage` of a tour from its reviews.
pub async fn calc_average_ratings(db: &Database, tour: ObjectId) -> Result<(), AppError> {
    let stats: Vec<Document> = db
        .collection::<Document>(Review::COLLECTION)
        .aggregate(vec![
            doc! {"$match": {"tour": tour}},
            doc! {"$group": {
                "_id": "$tour",
                "nRating": {"$sum": 1},
                "avgRating": {"$avg": "$rating"},
            }},
        ])
        .await?
        .try_collect()
        .await?;

    let (quantity, average) = rating_summary(stats.first());
    log::debug!("tour {} now has {} ratings averaging {}", tour, quantity, average);

    db.collection::<Document>(Tour::COLLECTION)
        .update_one(
            doc! {"_id": tour},
            doc! {"$set": {"ratingsQuantity": quantity, "ratingsAverage": average}},
        )
        .await?;
    Ok(())
}

/// No reviews resets the tour to its defaults.
fn rating_summary(stats: Option<&Document>) -> (i32, f64) {
    let Some(stats) = stats else {
        return (0, DEFAULT_RATINGS_AVERAGE);
    };
    let quantity = stats
        .get_i32("nRating")
        .map(i64::from)
        .or_else(|_| stats.get_i64("nRating"))
        .unwrap_or(0);
    let average = stats.get_f64("avgRating").unwrap_or(DEFAULT_RATINGS_AVERAGE);
    (i32::try_from(quantity).unwrap_or(i32::MAX), average)
}

#[async_trait]
impl Model for Review {
    const COLLECTION: &'static str = "reviews";

    fn sanitize_patch(mut patch: Document) -> Document {
        // Ownership of a review never moves.
        patch.remove("tour");
        patch.remove("user");
        patch
    }

    async fn after_write(db: &Database, doc: &Document) -> Result<(), AppError> {
        match doc.get_object_id("tour") {
            Ok(tour) => calc_average_ratings(db, tour).await,
            Err(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_review_text_is_rejected() {
        let input: NewReview = serde_json::from_value(json!({"review": "", "rating": 4})).unwrap();
        let err = Review::from_input(input, ObjectId::new(), ObjectId::new()).unwrap_err();
        assert!(err.to_string().contains("Review field is required"));
    }

    #[test]
    fn rating_must_be_between_one_and_five() {
        for rating in [0.5, 5.5] {
            let input: NewReview =
                serde_json::from_value(json!({"review": "great", "rating": rating})).unwrap();
            assert!(Review::from_input(input, ObjectId::new(), ObjectId::new()).is_err());
        }
    }

    #[test]
    fn rating_defaults_to_one() {
        let input: NewReview = serde_json::from_value(json!({"review": "fine"})).unwrap();
        let review = Review::from_input(input, ObjectId::new(), ObjectId::new()).unwrap();
        assert_eq!(review.rating, 1.0);
    }

    #[test]
    fn summary_uses_aggregate_or_defaults() {
        assert_eq!(rating_summary(None), (0, DEFAULT_RATINGS_AVERAGE));

        let stats = doc! {"_id": ObjectId::new(), "nRating": 2, "avgRating": 4.5};
        assert_eq!(rating_summary(Some(&stats)), (2, 4.5));
    }

    #[test]
    fn patches_cannot_reassign_ownership() {
        let patch = Review::sanitize_patch(doc! {
            "rating": 5,
            "tour": ObjectId::new(),
            "user": ObjectId::new(),
        });
        assert_eq!(patch, doc! {"rating": 5});
    }
}
