mod common;

use std::sync::Arc;

use actix_web::test;
use bson::{doc, oid::ObjectId, Document};
use serde_json::{json, Value};
use serial_test::serial;

use common::{get_test_email, get_test_password, RejectingMailer, TestApp};
use tour_api::services::email_service::Mailer;

async fn stored_tour(test_app: &TestApp, id: &ObjectId) -> Document {
    test_app
        .state
        .tours()
        .find_document_by_id(&id.to_hex())
        .await
        .unwrap()
        .expect("tour is stored")
}

#[actix_rt::test]
#[serial]
async fn test_signup_then_signin() {
    let Some(test_app) = TestApp::live(None).await else {
        return;
    };
    let app = test::init_service(test_app.create_app()).await;

    let req = test::TestRequest::post()
        .uri("/user/signup")
        .set_json(&json!({
            "firstName": "Test",
            "lastName": "User",
            "email": get_test_email(),
            "password": get_test_password(),
            "confirmPassword": get_test_password()
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    assert!(resp.response().cookies().any(|c| c.name() == "jwt"));

    let req = test::TestRequest::post()
        .uri("/user/signin")
        .set_json(&json!({"email": get_test_email(), "password": "wrongpassword"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
    assert!(resp.response().cookies().next().is_none());

    let req = test::TestRequest::post()
        .uri("/user/signin")
        .set_json(&json!({"email": get_test_email(), "password": get_test_password()}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert!(resp.response().cookies().any(|c| c.name() == "jwt"));
}

#[actix_rt::test]
#[serial]
async fn test_second_review_of_a_tour_is_rejected() {
    let Some(test_app) = TestApp::live(None).await else {
        return;
    };
    let app = test::init_service(test_app.create_app()).await;

    let user = test_app.insert_user("reviewer@example.com").await;
    let tour = test_app.insert_tour("The Forest Hiker", false).await;
    let cookie = test_app.session_cookie(&user);

    for expected in [201_u16, 409] {
        let req = test::TestRequest::post()
            .uri(&format!("/tours/{}/reviews", tour))
            .cookie(cookie.clone())
            .set_json(&json!({"review": "Amazing!", "rating": 5}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), expected);

        if expected == 409 {
            let body: Value = test::read_body_json(resp).await;
            assert_eq!(body["message"], "You have already reviewed this tour");
        }
    }

    let count = test_app
        .state
        .reviews()
        .count(doc! {"tour": tour, "user": user})
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[actix_rt::test]
#[serial]
async fn test_review_writes_keep_tour_rating_in_sync() {
    let Some(test_app) = TestApp::live(None).await else {
        return;
    };
    let app = test::init_service(test_app.create_app()).await;

    let tour = test_app.insert_tour("The Sea Explorer", false).await;
    let first = test_app.session_cookie(&test_app.insert_user("first@example.com").await);
    let second = test_app.session_cookie(&test_app.insert_user("second@example.com").await);

    let mut review_ids = Vec::new();
    for (cookie, rating) in [(&first, 4), (&second, 2)] {
        let req = test::TestRequest::post()
            .uri("/review")
            .cookie(cookie.clone())
            .set_json(&json!({"review": "Worth it", "rating": rating, "tour": tour.to_hex()}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 201);
        let body: Value = test::read_body_json(resp).await;
        review_ids.push(body["review"]["_id"].as_str().unwrap().to_string());
    }

    let stored = stored_tour(&test_app, &tour).await;
    assert_eq!(stored.get_i32("ratingsQuantity").unwrap(), 2);
    assert_eq!(stored.get_f64("ratingsAverage").unwrap(), 3.0);

    let req = test::TestRequest::patch()
        .uri(&format!("/review/{}", review_ids[0]))
        .cookie(first.clone())
        .set_json(&json!({"rating": 5}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
    let stored = stored_tour(&test_app, &tour).await;
    assert_eq!(stored.get_f64("ratingsAverage").unwrap(), 3.5);

    let req = test::TestRequest::delete()
        .uri(&format!("/review/{}", review_ids[1]))
        .cookie(second.clone())
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 204);
    let stored = stored_tour(&test_app, &tour).await;
    assert_eq!(stored.get_i32("ratingsQuantity").unwrap(), 1);
    assert_eq!(stored.get_f64("ratingsAverage").unwrap(), 5.0);

    let req = test::TestRequest::delete()
        .uri(&format!("/review/{}", review_ids[0]))
        .cookie(first.clone())
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 204);
    let stored = stored_tour(&test_app, &tour).await;
    assert_eq!(stored.get_i32("ratingsQuantity").unwrap(), 0);
    assert_eq!(stored.get_f64("ratingsAverage").unwrap(), 4.1);
}

#[actix_rt::test]
#[serial]
async fn test_forget_password_rolls_back_when_mail_fails() {
    let mailer: Arc<dyn Mailer> = Arc::new(RejectingMailer);
    let Some(test_app) = TestApp::live(Some(mailer)).await else {
        return;
    };
    let app = test::init_service(test_app.create_app()).await;
    let user = test_app.insert_user(&get_test_email()).await;

    let req = test::TestRequest::post()
        .uri("/user/forgetPassword")
        .set_json(&json!({"email": "nobody@example.com"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);

    let req = test::TestRequest::post()
        .uri("/user/forgetPassword")
        .set_json(&json!({"email": get_test_email()}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 500);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "error");

    let stored = test_app
        .state
        .db
        .collection::<Document>("users")
        .find_one(doc! {"_id": user})
        .await
        .unwrap()
        .expect("user is stored");
    assert!(!stored.contains_key("passwordResetToken"));
    assert!(!stored.contains_key("passwordResetExpires"));
}

#[actix_rt::test]
#[serial]
async fn test_secret_tours_are_not_listed() {
    let Some(test_app) = TestApp::live(None).await else {
        return;
    };
    let app = test::init_service(test_app.create_app()).await;

    test_app.insert_tour("The Park Camper", false).await;
    test_app.insert_tour("The Secret Passage", true).await;
    let cookie = test_app.session_cookie(&test_app.insert_user("guide@example.com").await);

    let req = test::TestRequest::get()
        .uri("/tours")
        .cookie(cookie)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["result"], 1);
    assert_eq!(body["tours"][0]["name"], "The Park Camper");
    assert_eq!(body["tours"][0]["durationWeeks"], 5.0 / 7.0);
}
