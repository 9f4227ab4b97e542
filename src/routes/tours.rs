use actix_web::{http::StatusCode, web, HttpRequest, HttpResponse};
use bson::{doc, DateTime, Document};
use chrono::NaiveDate;
use serde_json::{json, Value};
use validator::Validate;

use crate::app::AppState;
use crate::db::json::{model_to_json, render, render_all, to_json_all};
use crate::db::populate::Populate;
use crate::error::AppError;
use crate::models::review::Review;
use crate::models::tour::{NewTour, Tour};
use crate::models::user::User;
use crate::routes::factory::{self, IdParam};
use crate::services::api_features::{
    parse_query_string, top_tours_alias, FindQuery, QueryFeatures, QueryParams,
};

/// Monthly plans only cover this year, whatever the request asks for.
const PLAN_YEAR: i32 = 2021;

fn guides() -> Populate {
    Populate::of::<User>(
        "guides",
        &["passwordChangeAt", "__v", "createdAt", "updatedAt"],
    )
}

async fn list_tours(state: &AppState, params: QueryParams) -> Result<HttpResponse, AppError> {
    let query = QueryFeatures::new(params)
        .filter()
        .sort()
        .fields()
        .pagination()
        .build();
    let store = state.tours();

    if log::log_enabled!(log::Level::Debug) {
        match store.explain(&query).await {
            Ok(plan) => log::debug!("tour list plan: {}", plan),
            Err(err) => log::debug!("tour list plan unavailable: {}", err),
        }
    }

    let mut tours = store.find(&query).await?;
    guides().apply(&state.db, &mut tours).await?;
    let tours = render_all::<Tour>(tours);

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "result": tours.len(),
        "tours": tours,
    })))
}

pub async fn get_tours(
    state: web::Data<AppState>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    list_tours(&state, parse_query_string(req.query_string())).await
}

pub async fn top_tours(
    state: web::Data<AppState>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let mut params = parse_query_string(req.query_string());
    top_tours_alias(&mut params);
    list_tours(&state, params).await
}

pub async fn create_tour(
    state: web::Data<AppState>,
    body: web::Json<Value>,
) -> Result<HttpResponse, AppError> {
    let wrong_input = || AppError::new("wrong input", StatusCode::PAYMENT_REQUIRED);
    let input: NewTour = serde_json::from_value(body.into_inner()).map_err(|err| {
        log::debug!("rejected tour body: {}", err);
        wrong_input()
    })?;
    input.validate().map_err(|_| wrong_input())?;

    let mut tour = Tour::from_input(input)?;
    let id = state.tours().insert(&tour).await?;
    tour.id = Some(id);
    log::info!("created tour {} ({})", tour.name, id);

    Ok(HttpResponse::Created().json(json!({
        "status": "success",
        "tour": model_to_json(&tour)?,
    })))
}

pub async fn get_tour(
    state: web::Data<AppState>,
    path: web::Path<IdParam>,
) -> Result<HttpResponse, AppError> {
    let mut tour = state
        .tours()
        .find_document_by_id(&path.id)
        .await?
        .ok_or_else(|| AppError::not_found("No tour found this id"))?;
    guides()
        .apply(&state.db, std::slice::from_mut(&mut tour))
        .await?;

    let id = tour.get_object_id("_id").map_err(|_| AppError::cast("_id", path.id.as_str()))?;
    let mut reviews = state
        .reviews()
        .find(&FindQuery {
            filter: doc! {"tour": id},
            ..FindQuery::default()
        })
        .await?;
    Review::author().apply(&state.db, &mut reviews).await?;

    let mut tour = render::<Tour>(tour);
    if let Some(obj) = tour.as_object_mut() {
        obj.insert("reviews".to_string(), Value::from(render_all::<Review>(reviews)));
    }

    Ok(HttpResponse::Ok().json(json!({"status": "success", "tour": tour})))
}

pub async fn update_tour(
    state: web::Data<AppState>,
    path: web::Path<IdParam>,
    body: web::Json<serde_json::Map<String, Value>>,
) -> Result<HttpResponse, AppError> {
    let patch = factory::patch_document(body.into_inner())?;
    factory::update_one::<Tour>(&state.db, &path.id, patch).await
}

pub async fn delete_tour(
    state: web::Data<AppState>,
    path: web::Path<IdParam>,
) -> Result<HttpResponse, AppError> {
    factory::delete_one::<Tour>(&state.db, &path.id).await
}

fn stats_pipeline() -> Vec<Document> {
    vec![
        doc! {"$match": {"ratingsAverage": {"$gte": 4.5}}},
        doc! {"$group": {
            "_id": {"$toUpper": "$difficulty"},
            "num": {"$sum": 1},
            "numRatings": {"$sum": "$ratingsQuantity"},
            "avgRating": {"$avg": "$ratingsAverage"},
            "avgPrice": {"$avg": "$price"},
            "minPrice": {"$min": "$price"},
            "maxPrice": {"$max": "$price"},
        }},
        doc! {"$sort": {"avgPrice": 1}},
    ]
}

pub async fn get_tour_stats(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let stats = state.tours().aggregate(stats_pipeline()).await?;
    Ok(HttpResponse::Ok().json(json!({"status": "success", "data": to_json_all(stats)})))
}

fn midnight(year: i32, month: u32, day: u32) -> Option<DateTime> {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| DateTime::from_millis(dt.and_utc().timestamp_millis()))
}

fn plan_pipeline(year: i32) -> Result<Vec<Document>, AppError> {
    let (start, end) = midnight(year, 1, 1)
        .zip(midnight(year, 12, 31))
        .ok_or_else(|| AppError::Internal(format!("no calendar for year {}", year)))?;

    Ok(vec![
        doc! {"$unwind": "$startDates"},
        doc! {"$match": {"startDates": {"$gte": start, "$lte": end}}},
        doc! {"$group": {
            "_id": {"$month": "$startDates"},
            "numTourStats": {"$sum": 1},
            "tours": {"$push": "$name"},
        }},
        doc! {"$addFields": {"month": "$_id"}},
        doc! {"$project": {"_id": 0}},
        doc! {"$sort": {"numTourStats": -1}},
        doc! {"$limit": 12},
    ])
}

pub async fn get_monthly_plan(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let year = path.into_inner();
    let requested: i32 = year.trim().parse().map_err(|_| AppError::cast("year", year.as_str()))?;
    if requested != PLAN_YEAR {
        log::debug!("monthly plan asked for {}, serving {}", requested, PLAN_YEAR);
    }

    let plan = state.tours().aggregate(plan_pipeline(PLAN_YEAR)?).await?;
    Ok(HttpResponse::Ok().json(json!({"status": "success", "data": to_json_all(plan)})))
}
