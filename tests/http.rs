use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{StatusCode, Uri, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use pixelplanet_client::http::ApiClient;
use pixelplanet_client::{Area, ChunkCoord, ClientConfig, ClientError, PixelPlanetClient};

const ME_BODY: &str = r#"{
    "name": "tester",
    "dailyRanking": 1,
    "dailyTotalPixels": 2,
    "ranking": 3,
    "totalPixels": 40,
    "canvases": {
        "0": {
            "ident": "d",
            "title": "Small",
            "colors": [[255, 255, 255], [0, 0, 0], [255, 0, 0]],
            "size": 512,
            "bcd": 3000,
            "pcd": 5000,
            "cds": 60000
        },
        "2": {
            "ident": "v",
            "title": "Voxels",
            "colors": [[0, 0, 0]],
            "size": 1024,
            "bcd": 2000,
            "cds": 60000,
            "v": true
        }
    }
}"#;

#[derive(Clone, Default)]
struct Recorded {
    paths: Arc<Mutex<Vec<String>>>,
    tokens: Arc<Mutex<Vec<String>>>,
}

async fn me() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/json")], ME_BODY)
}

async fn captcha(
    State(recorded): State<Recorded>,
    Json(body): Json<serde_json::Value>,
) -> StatusCode {
    let token = body["token"].as_str().unwrap_or_default().to_string();
    let accepted = token == "good";
    recorded.tokens.lock().unwrap().push(token);
    if accepted {
        StatusCode::OK
    } else {
        StatusCode::FORBIDDEN
    }
}

/// Serves `/chunks/0/{cx}/{cy}.bmp`. Chunk (0, 0) was never painted and
/// comes back empty; every other chunk is filled with `cx * 2 + cy`.
async fn chunk(State(recorded): State<Recorded>, uri: Uri) -> impl IntoResponse {
    let path = uri.path().to_string();
    recorded.paths.lock().unwrap().push(path.clone());

    let parts: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    let [_, _, cx, cy_bmp] = parts.as_slice() else {
        return (StatusCode::NOT_FOUND, Vec::new());
    };
    let cx: u8 = cx.parse().unwrap();
    let cy: u8 = cy_bmp.trim_end_matches(".bmp").parse().unwrap();

    if (cx, cy) == (0, 0) {
        (StatusCode::OK, Vec::new())
    } else {
        (StatusCode::OK, vec![cx * 2 + cy; 256 * 256])
    }
}

async fn start_server() -> (String, Recorded) {
    let recorded = Recorded::default();
    let app = Router::new()
        .route("/api/me", get(me))
        .route("/api/captcha", post(captcha))
        .fallback(chunk)
        .with_state(recorded.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (url, recorded)
}

fn config(base_url: &str) -> ClientConfig {
    ClientConfig {
        base_url: format!("{base_url}/"),
        ws_url: "ws://127.0.0.1:9".to_string(),
        ..ClientConfig::default()
    }
}

#[tokio::test]
async fn fetch_me_parses_metadata() {
    let (url, _) = start_server().await;
    let api = ApiClient::new(&config(&url)).unwrap();
    assert_eq!(api.base_url(), url);

    let me = api.fetch_me().await.unwrap();
    assert_eq!(me.name.as_deref(), Some("tester"));
    assert_eq!(me.total_pixels, 40);
    assert_eq!(me.canvases[&0].colors.len(), 3);
    assert!(me.canvases[&2].is_3d);
}

#[tokio::test]
async fn fetch_chunk_requests_bitmap_path() {
    let (url, recorded) = start_server().await;
    let api = ApiClient::new(&config(&url)).unwrap();

    let bitmap = api.fetch_chunk(0, ChunkCoord::new(1, 0)).await.unwrap();
    assert_eq!(bitmap.len(), 256 * 256);
    assert!(bitmap.iter().all(|&b| b == 2));
    assert_eq!(*recorded.paths.lock().unwrap(), vec!["/chunks/0/1/0.bmp"]);
}

#[tokio::test]
async fn captcha_rejection_is_an_error() {
    let (url, recorded) = start_server().await;
    let api = ApiClient::new(&config(&url)).unwrap();

    api.update_captcha_token("good").await.unwrap();
    assert!(matches!(
        api.update_captcha_token("bad").await,
        Err(ClientError::Http(_))
    ));
    assert_eq!(*recorded.tokens.lock().unwrap(), vec!["good", "bad"]);
}

#[tokio::test]
async fn connect_loads_canvases_and_assembles_areas() {
    let (url, recorded) = start_server().await;
    let client = PixelPlanetClient::connect(config(&url)).await.unwrap();

    assert_eq!(client.me().unwrap().name.as_deref(), Some("tester"));
    assert_eq!(client.canvases().map(|c| c.id).collect::<Vec<_>>(), vec![0, 2]);
    let small = client.canvas(0).unwrap();
    assert_eq!(small.chunk_size(), 256);
    assert_eq!(small.placed_cooldown.as_millis(), 5000);

    // (-2, -2)..=(1, 1) straddles all four chunks of a 512 canvas
    let area = Area::new(0, -2, -2, 1, 1).unwrap();
    let pixels = client.fetch_area(&area).await.unwrap();
    assert_eq!(
        pixels,
        vec![
            0, 0, 2, 2, //
            0, 0, 2, 2, //
            1, 1, 3, 3, //
            1, 1, 3, 3,
        ]
    );

    let mut paths = recorded.paths.lock().unwrap().clone();
    paths.sort();
    assert_eq!(
        paths,
        vec![
            "/chunks/0/0/0.bmp",
            "/chunks/0/0/1.bmp",
            "/chunks/0/1/0.bmp",
            "/chunks/0/1/1.bmp",
        ]
    );

    let chunk = client.get_chunk(0, ChunkCoord::new(1, 1)).await.unwrap();
    assert!(chunk.iter().all(|&b| b == 3));
    assert!(matches!(
        client.get_chunk(5, ChunkCoord::new(0, 0)).await,
        Err(ClientError::UnknownCanvas(5))
    ));
}
