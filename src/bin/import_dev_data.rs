//! Loads or purges development tour data.
//!
//! ```text
//! import-dev-data --import [path/to/tours.json]
//! import-dev-data --delete
//! ```

use env_logger::Env;

use tour_api::{config::AppConfig, db};

const DEFAULT_DATA: &str = "dev-data/tours.json";

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(Env::default().default_filter_or("info"));
    dotenv::dotenv().ok();

    let mut args = std::env::args().skip(1);
    let action = args.next().unwrap_or_default();
    if action != "--import" && action != "--delete" {
        eprintln!("usage: import-dev-data --import [file] | --delete");
        std::process::exit(2);
    }

    let config = AppConfig::from_env()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let client = db::mongo::create_mongo_client(&config.mongo_uri)
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    let database = client.database(&config.db_name);
    let to_io = |e: tour_api::error::AppError| std::io::Error::new(std::io::ErrorKind::Other, e);

    if action == "--import" {
        let path = args.next().unwrap_or_else(|| DEFAULT_DATA.to_string());
        let raw = std::fs::read_to_string(&path)?;
        let tours = db::seed::parse_tours(&raw).map_err(to_io)?;
        if let Err(e) = db::mongo::ensure_indexes(&database).await {
            log::warn!("Failed to ensure indexes: {}", e);
        }
        let count = db::seed::import_tours(&database, &tours).await.map_err(to_io)?;
        log::info!("Data successfully loaded! ({} tours from {})", count, path);
    } else {
        let count = db::seed::delete_tours(&database).await.map_err(to_io)?;
        log::info!("Data successfully deleted! ({} tours)", count);
    }

    Ok(())
}
