use alloy::primitives::Address;
use alloy::providers::ProviderBuilder;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

mod config;
mod db;
mod error;
mod indexer;
mod models;
mod profile;
mod property;
mod schema;
mod store;

use store::{PgStore, ProfileStore, PropertyQueries};

#[derive(Clone)]
pub struct AppState {
    profiles: Arc<dyn ProfileStore>,
    properties: Arc<dyn PropertyQueries>,
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "RWA Imob marketplace API" }))
        .route(
            "/profile",
            get(profile::get_profile).post(profile::upsert_profile),
        )
        .route("/properties", get(property::get_properties))
        .route("/properties/:id", get(property::get_property))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let config = config::AppConfig::load()?;
    log::info!(
        "Loaded config: rpc={} contract={} database={}",
        config.rpc_url,
        config.contract_address,
        config.redacted_database_url()
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let pool = db::establish_pool(&config)?;

    let provider = ProviderBuilder::new().connect(&config.rpc_url).await?;
    let contract: Address = config.contract_address.parse()?;
    indexer::EventIndexer::new(
        provider,
        pool.clone(),
        indexer::IndexerOptions {
            contract,
            start_block: config.start_block,
            batch_size: config.log_batch_size,
            confirmations: config.confirmations,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        },
    )
    .start();

    let store = Arc::new(PgStore::new(pool));
    let state = AppState {
        profiles: store.clone(),
        properties: store,
    };

    log::info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state).into_make_service()).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OfferRow, PropertyRow};
    use crate::store::memory::MemoryStore;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use bigdecimal::BigDecimal;
    use serde_json::Value;
    use tower::ServiceExt;

    fn app(store: MemoryStore) -> Router {
        let store = Arc::new(store);
        router(AppState {
            profiles: store.clone(),
            properties: store,
        })
    }

    async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_profile(body: Value) -> Request<Body> {
        Request::post("/profile")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn get_profile_requires_address() {
        let (status, body) = call(
            app(MemoryStore::default()),
            Request::get("/profile").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Address required");
    }

    #[tokio::test]
    async fn unknown_profile_is_empty_object() {
        let (status, body) = call(
            app(MemoryStore::default()),
            Request::get("/profile?address=0xABC").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({}));
    }

    #[tokio::test]
    async fn upsert_lowercases_and_stamps() {
        let app = app(MemoryStore::default());

        let (status, body) = call(
            app.clone(),
            post_profile(serde_json::json!({
                "address": "0xAbCdEf",
                "name": "Lello",
                "bio": "corretor",
                "avatarUrl": "https://example.com/a.png"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["address"], "0xabcdef");
        assert_eq!(body["avatar_url"], "https://example.com/a.png");
        assert!(body["updated_at"].as_i64().unwrap() > 0);

        let (_, fetched) = call(
            app,
            Request::get("/profile?address=0xABCDEF").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(fetched["name"], "Lello");
    }

    #[tokio::test]
    async fn upsert_without_address_is_bad_request() {
        let (status, _) = call(
            app(MemoryStore::default()),
            post_profile(serde_json::json!({ "name": "nobody" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn storage_failure_is_500() {
        let (status, body) = call(
            app(MemoryStore::failing()),
            Request::get("/profile?address=0xabc").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Database error");
    }

    #[tokio::test]
    async fn properties_embed_active_offers() {
        let store = MemoryStore::default();
        {
            let mut state = store.state.lock().unwrap();
            state.properties.insert(
                7,
                PropertyRow {
                    id: 7,
                    owner: "0xa".into(),
                    price: BigDecimal::from(1000),
                    for_sale: true,
                    location: "Leblon".into(),
                    location_hash: "Qm".into(),
                    listed_at: 1,
                    sold_at: None,
                },
            );
            for (id, active) in [("0x1-0", true), ("0x2-0", false)] {
                state.offers.push(OfferRow {
                    id: id.into(),
                    property_id: 7,
                    buyer: "0xb".into(),
                    amount: BigDecimal::from(500),
                    active,
                    created_at: 2,
                });
            }
        }
        let app = app(store);

        let (status, body) = call(
            app.clone(),
            Request::get("/properties").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["id"], 7);
        assert_eq!(body[0]["offers"].as_array().unwrap().len(), 1);

        let (status, _) = call(
            app,
            Request::get("/properties/99").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
