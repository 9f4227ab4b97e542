use async_trait::async_trait;
use bson::{doc, oid::ObjectId, Bson, DateTime, Document};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::db::store::Model;
use crate::error::AppError;

pub const DEFAULT_RATINGS_AVERAGE: f64 = 4.1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    #[default]
    Easy,
    Medium,
    Difficult,
}

impl std::str::FromStr for Difficulty {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "difficult" => Ok(Difficulty::Difficult),
            other => Err(AppError::Validation(format!(
                "`{}` is not a valid enum value for path `difficulty`",
                other
            ))),
        }
    }
}

fn point() -> String {
    "Point".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    #[serde(rename = "type", default = "point")]
    pub kind: String,
    #[serde(default)]
    pub coordinates: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tour {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    pub slug: String,
    pub rating: f64,
    pub price: f64,
    pub duration: f64,
    pub max_group_size: i32,
    pub difficulty: Difficulty,
    pub ratings_average: f64,
    pub ratings_quantity: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_discount: Option<f64>,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub image_cover: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub start_dates: Vec<DateTime>,
    #[serde(default)]
    pub secret_tour: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_location: Option<GeoPoint>,
    #[serde(default)]
    pub locations: Vec<GeoPoint>,
    #[serde(default)]
    pub guides: Vec<ObjectId>,
    pub created_at: Option<DateTime>,
    pub updated_at: Option<DateTime>,
}

/// Body accepted by tour creation.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewTour {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(range(min = 1.0, max = 5.0))]
    pub rating: Option<f64>,
    pub price: f64,
    pub duration: f64,
    pub max_group_size: i32,
    pub difficulty: String,
    pub ratings_average: Option<f64>,
    pub ratings_quantity: Option<i32>,
    pub price_discount: Option<f64>,
    pub summary: String,
    pub description: Option<String>,
    pub image_cover: String,
    pub images: Vec<String>,
    pub start_dates: Vec<String>,
    pub secret_tour: Option<bool>,
    pub start_location: Option<GeoPoint>,
    #[serde(default)]
    pub locations: Vec<GeoPoint>,
    #[serde(default)]
    pub guides: Vec<String>,
}

/// Lowercases the name and joins its alphanumeric runs with `-`.
pub fn slugify(name: &str) -> String {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

impl Tour {
    /// Applies defaults and schema checks, deriving the slug from the name.
    pub fn from_input(input: NewTour) -> Result<Self, AppError> {
        if let Some(discount) = input.price_discount {
            if discount >= input.price {
                return Err(AppError::Validation(
                    "discount price less the actual price".to_string(),
                ));
            }
        }

        let start_dates = input
            .start_dates
            .iter()
            .map(|date| parse_date(date).ok_or_else(|| AppError::cast("startDates", date.as_str())))
            .collect::<Result<Vec<_>, _>>()?;
        let guides = input
            .guides
            .iter()
            .map(|id| ObjectId::parse_str(id).map_err(|_| AppError::cast("guides", id.as_str())))
            .collect::<Result<Vec<_>, _>>()?;

        let name = input.name.trim().to_string();
        let now = DateTime::now();
        Ok(Self {
            id: None,
            slug: slugify(&name),
            name,
            rating: input.rating.unwrap_or(3.0),
            price: input.price,
            duration: input.duration,
            max_group_size: input.max_group_size,
            difficulty: input.difficulty.parse()?,
            ratings_average: input.ratings_average.unwrap_or(DEFAULT_RATINGS_AVERAGE),
            ratings_quantity: input.ratings_quantity.unwrap_or(0),
            price_discount: input.price_discount,
            summary: input.summary.trim().to_string(),
            description: input.description.map(|d| d.trim().to_string()),
            image_cover: input.image_cover,
            images: input.images,
            start_dates,
            secret_tour: input.secret_tour.unwrap_or(false),
            start_location: input.start_location,
            locations: input.locations,
            guides,
            created_at: Some(now),
            updated_at: Some(now),
        })
    }
}

/// Accepts RFC 3339 timestamps or plain `YYYY-MM-DD` dates.
fn parse_date(value: &str) -> Option<DateTime> {
    if let Ok(dt) = DateTime::parse_rfc3339_str(value) {
        return Some(dt);
    }
    chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| DateTime::from_millis(dt.and_utc().timestamp_millis()))
}

#[async_trait]
impl Model for Tour {
    const COLLECTION: &'static str = "tours";

    fn default_filter() -> Document {
        doc! {"secretTour": {"$ne": true}}
    }

    fn sanitize_patch(mut patch: Document) -> Document {
        let slug = patch.get_str("name").map(slugify).ok();
        if let Some(slug) = slug {
            patch.insert("slug", slug);
        }
        patch
    }

    fn add_virtuals(doc: &mut Document) {
        let duration = match doc.get("duration") {
            Some(Bson::Double(d)) => *d,
            Some(Bson::Int32(d)) => f64::from(*d),
            Some(Bson::Int64(d)) => *d as f64,
            _ => return,
        };
        doc.insert("durationWeeks", duration / 7.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input() -> serde_json::Value {
        json!({
            "name": "  The Forest Hiker ",
            "price": 397,
            "duration": 5,
            "maxGroupSize": 25,
            "difficulty": "easy",
            "summary": "Breathtaking hike through the Canadian Banff National Park",
            "imageCover": "tour-1-cover.jpg",
            "images": ["tour-1-1.jpg"],
            "startDates": ["2021-04-25T09:00:00.000Z", "2021-07-20"]
        })
    }

    #[test]
    fn slug_is_derived_from_name() {
        assert_eq!(slugify("The Forest Hiker"), "the-forest-hiker");
        assert_eq!(slugify("  Sea & Sun!  "), "sea-sun");
    }

    #[test]
    fn creation_applies_defaults() {
        let input: NewTour = serde_json::from_value(input()).unwrap();
        input.validate().unwrap();
        let tour = Tour::from_input(input).unwrap();

        assert_eq!(tour.name, "The Forest Hiker");
        assert_eq!(tour.slug, "the-forest-hiker");
        assert_eq!(tour.ratings_average, DEFAULT_RATINGS_AVERAGE);
        assert_eq!(tour.ratings_quantity, 0);
        assert!(!tour.secret_tour);
        assert_eq!(tour.difficulty, Difficulty::Easy);
        assert_eq!(tour.start_dates.len(), 2);
    }

    #[test]
    fn missing_price_does_not_deserialize() {
        let mut body = input();
        body.as_object_mut().unwrap().remove("price");
        assert!(serde_json::from_value::<NewTour>(body).is_err());
    }

    #[test]
    fn rating_out_of_range_fails_validation() {
        let mut body = input();
        body["rating"] = json!(7);
        let input: NewTour = serde_json::from_value(body).unwrap();
        assert!(input.validate().is_err());
    }

    #[test]
    fn discount_must_be_below_price() {
        let mut body = input();
        body["priceDiscount"] = json!(500);
        let input: NewTour = serde_json::from_value(body).unwrap();
        let err = Tour::from_input(input).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn unknown_difficulty_is_rejected() {
        let mut body = input();
        body["difficulty"] = json!("extreme");
        let input: NewTour = serde_json::from_value(body).unwrap();
        assert!(matches!(Tour::from_input(input), Err(AppError::Validation(_))));
    }

    #[test]
    fn patches_recompute_slug() {
        let patch = Tour::sanitize_patch(doc! {"name": "The Sea Explorer"});
        assert_eq!(patch.get_str("slug").unwrap(), "the-sea-explorer");
        assert!(!Tour::sanitize_patch(doc! {"price": 5}).contains_key("slug"));
    }

    #[test]
    fn duration_weeks_is_added() {
        let mut tour = doc! {"duration": 14_i32};
        Tour::add_virtuals(&mut tour);
        assert_eq!(tour.get_f64("durationWeeks").unwrap(), 2.0);

        let mut partial = doc! {"name": "The Sea Explorer"};
        Tour::add_virtuals(&mut partial);
        assert!(!partial.contains_key("durationWeeks"));
    }
}
