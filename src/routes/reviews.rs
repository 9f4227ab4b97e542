use actix_web::{http::StatusCode, web, HttpRequest, HttpResponse};
use bson::{doc, oid::ObjectId};
use serde_json::{json, Value};

use crate::app::AppState;
use crate::db::json::{model_to_json, render_all};
use crate::db::store::parse_id;
use crate::error::AppError;
use crate::middleware::auth_context::CurrentUser;
use crate::models::review::{NewReview, Review};
use crate::routes::factory::{self, IdParam};
use crate::services::api_features::{parse_query_string, QueryFeatures};

/// The tour a nested `/tours/{tourId}/reviews` request is scoped to.
fn scoped_tour(req: &HttpRequest) -> Result<Option<ObjectId>, AppError> {
    match req.match_info().get("tourId") {
        Some(id) => Ok(Some(parse_id(id)?)),
        None => Ok(None),
    }
}

pub async fn get_reviews(
    state: web::Data<AppState>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let mut query = QueryFeatures::new(parse_query_string(req.query_string()))
        .filter()
        .sort()
        .fields()
        .pagination()
        .build();
    if let Some(tour) = scoped_tour(&req)? {
        query.filter.insert("tour", tour);
    }

    let mut reviews = state.reviews().find(&query).await?;
    Review::author().apply(&state.db, &mut reviews).await?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "result": reviews.len(),
        "data": render_all::<Review>(reviews),
    })))
}

pub async fn create_review(
    state: web::Data<AppState>,
    req: HttpRequest,
    current: CurrentUser,
    body: web::Json<NewReview>,
) -> Result<HttpResponse, AppError> {
    let input = body.into_inner();
    let tour = match scoped_tour(&req)? {
        Some(tour) => tour,
        None => {
            let id = input
                .tour
                .as_deref()
                .ok_or_else(|| AppError::Validation("Review must belong to Tour".into()))?;
            parse_id(id)?
        }
    };
    let user = current.id()?;

    let store = state.reviews();
    if store.count(doc! {"tour": tour, "user": user}).await? > 0 {
        return Err(AppError::new(
            "You have already reviewed this tour",
            StatusCode::CONFLICT,
        ));
    }

    let mut review = Review::from_input(input, tour, user)?;
    review.id = Some(store.insert(&review).await?);

    Ok(HttpResponse::Created().json(json!({
        "status": "success",
        "message": "Review created",
        "review": model_to_json(&review)?,
    })))
}

pub async fn get_review(
    state: web::Data<AppState>,
    path: web::Path<IdParam>,
) -> Result<HttpResponse, AppError> {
    factory::get_one::<Review>(&state.db, &path.id, &[Review::author()]).await
}

pub async fn update_review(
    state: web::Data<AppState>,
    path: web::Path<IdParam>,
    body: web::Json<serde_json::Map<String, Value>>,
) -> Result<HttpResponse, AppError> {
    let patch = factory::patch_document(body.into_inner())?;
    factory::update_one::<Review>(&state.db, &path.id, patch).await
}

pub async fn delete_review(
    state: web::Data<AppState>,
    path: web::Path<IdParam>,
) -> Result<HttpResponse, AppError> {
    factory::delete_one::<Review>(&state.db, &path.id).await
}
