use bson::doc;
use mongodb::{
    options::{ClientOptions, IndexOptions, ServerApi, ServerApiVersion},
    Client, Database, IndexModel,
};
use std::time::Duration;

use crate::db::store::Model;
use crate::models::{review::Review, tour::Tour, user::User};

pub async fn create_mongo_client(uri: &str) -> mongodb::error::Result<Client> {
    log::info!("Connecting to MongoDB");

    let mut client_options = ClientOptions::parse(uri).await?;

    client_options.connect_timeout = Some(Duration::from_secs(10));
    client_options.server_selection_timeout = Some(Duration::from_secs(10));
    client_options.max_pool_size = Some(10);
    client_options.min_pool_size = Some(1);

    let server_api = ServerApi::builder().version(ServerApiVersion::V1).build();
    client_options.server_api = Some(server_api);

    Client::with_options(client_options)
}

/// Pings the database; a failure is logged but does not stop startup.
pub async fn ping(db: &Database) {
    match db.run_command(doc! {"ping": 1}).await {
        Ok(_) => log::info!("Connected to the database {}", db.name()),
        Err(e) => {
            log::warn!("Connected to MongoDB but ping test failed: {}", e);
            log::warn!("The API may still work, but some functionality might be impaired");
        }
    }
}

pub async fn ensure_indexes(db: &Database) -> mongodb::error::Result<()> {
    let unique = || IndexOptions::builder().unique(true).build();

    let tours = db.collection::<bson::Document>(Tour::COLLECTION);
    tours
        .create_index(
            IndexModel::builder()
                .keys(doc! {"name": 1})
                .options(unique())
                .build(),
        )
        .await?;
    tours
        .create_index(IndexModel::builder().keys(doc! {"price": 1}).build())
        .await?;

    db.collection::<bson::Document>(User::COLLECTION)
        .create_index(
            IndexModel::builder()
                .keys(doc! {"email": 1})
                .options(unique())
                .build(),
        )
        .await?;

    db.collection::<bson::Document>(Review::COLLECTION)
        .create_index(
            IndexModel::builder()
                .keys(doc! {"user": 1, "tour": 1})
                .options(unique())
                .build(),
        )
        .await?;

    log::info!("Indexes ensured");
    Ok(())
}
