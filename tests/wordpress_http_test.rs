use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use wp_translator::model::{Settings, TranslatedFields};
use wp_translator::wordpress::{
    ContentService, TranslationWriteError, WordPressClient, WordPressOptions,
};

#[derive(Default)]
struct FakeSite {
    language_plugin: bool,
    plugin_folder_exists: bool,
    fail_link_for: Option<i64>,
    list_queries: Mutex<Vec<HashMap<String, String>>>,
    created: Mutex<Vec<Value>>,
    linked: Mutex<Vec<(i64, Value)>>,
    plugin_calls: Mutex<Vec<String>>,
}

type Site = Arc<FakeSite>;

fn post_json(id: i64) -> Value {
    json!({
        "id": id,
        "title": { "rendered": "Hello" },
        "content": { "rendered": "<p>World</p>" },
        "excerpt": { "rendered": "" },
        "slug": "hello",
        "type": "post",
        "lang": "en",
        "translations": [],
        "link": format!("https://wp.test/?p={}", id)
    })
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .is_some_and(|h| h.starts_with("Basic "))
}

async fn list_posts(State(site): State<Site>, Query(q): Query<HashMap<String, String>>) -> Response {
    let filtered = q.contains_key("lang");
    site.list_queries.lock().unwrap().push(q);
    if filtered && !site.language_plugin {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "code": "rest_invalid_param", "message": "Invalid parameter(s): lang" })),
        )
            .into_response();
    }
    Json(json!([post_json(105), post_json(106)])).into_response()
}

async fn create_post(State(site): State<Site>, Json(body): Json<Value>) -> Response {
    site.created.lock().unwrap().push(body);
    (StatusCode::CREATED, Json(json!({ "id": 301, "status": "draft" }))).into_response()
}

async fn get_post(Path(id): Path<i64>) -> Response {
    if id == 105 {
        Json(post_json(105)).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "code": "rest_post_invalid_id", "message": "Invalid post ID." })),
        )
            .into_response()
    }
}

async fn update_post(State(site): State<Site>, Path(id): Path<i64>, Json(body): Json<Value>) -> Response {
    if site.fail_link_for == Some(id) {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "code": "rest_cannot_edit", "message": "Sorry, you are not allowed to edit this post." })),
        )
            .into_response();
    }
    site.linked.lock().unwrap().push((id, body));
    Json(json!({ "id": id })).into_response()
}

async fn users_me(headers: HeaderMap) -> Response {
    if authorized(&headers) {
        Json(json!({ "id": 1, "name": "admin" })).into_response()
    } else {
        StatusCode::UNAUTHORIZED.into_response()
    }
}

async fn install_plugin(State(site): State<Site>, Json(body): Json<Value>) -> Response {
    site.plugin_calls
        .lock()
        .unwrap()
        .push(format!("install {}", body["slug"].as_str().unwrap_or_default()));
    if site.plugin_folder_exists {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "code": "folder_exists", "message": "Destination folder already exists." })),
        )
            .into_response();
    }
    (StatusCode::CREATED, Json(json!({ "plugin": "polylang/polylang", "status": "active" }))).into_response()
}

async fn activate_plugin(State(site): State<Site>, Json(body): Json<Value>) -> Response {
    site.plugin_calls
        .lock()
        .unwrap()
        .push(format!("activate {}", body["status"].as_str().unwrap_or_default()));
    Json(json!({ "plugin": "polylang/polylang", "status": "active" })).into_response()
}

async fn spawn_site(site: Site) -> String {
    let app = Router::new()
        .route("/wp-json/wp/v2/posts", get(list_posts).post(create_post))
        .route("/wp-json/wp/v2/posts/{id}", get(get_post).post(update_post))
        .route("/wp-json/wp/v2/users/me", get(users_me))
        .route("/wp-json/wp/v2/plugins", post(install_plugin))
        .route("/wp-json/wp/v2/plugins/polylang/polylang", post(activate_plugin))
        .with_state(site);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/", addr)
}

fn client_for(url: &str) -> WordPressClient {
    let settings = Settings {
        wp_url: url.to_string(),
        wp_user: "admin".into(),
        wp_app_password: "abcd efgh".into(),
        source_lang: "en".into(),
        ..Default::default()
    };
    let options = WordPressOptions {
        timeout: Duration::from_secs(5),
        ..Default::default()
    };
    WordPressClient::new(&settings, &options).unwrap()
}

fn fields() -> TranslatedFields {
    TranslatedFields {
        title: "Ahoj".into(),
        content: "<p>Svet</p>".into(),
        excerpt: String::new(),
    }
}

#[tokio::test]
async fn unconfigured_site_lists_nothing() {
    let client = client_for("");
    assert!(client.fetch_posts("post", Some("en")).await.unwrap().is_empty());
    assert!(!client.validate_connection().await);
    assert!(!client.install_language_plugin().await.unwrap());
}

#[tokio::test]
async fn unreachable_site_is_an_error() {
    let client = client_for("http://127.0.0.1:9");
    assert!(client.fetch_posts("post", None).await.is_err());
    assert!(!client.check_language_plugin_active().await);
}

#[tokio::test]
async fn lists_source_language_posts() {
    let site = Arc::new(FakeSite {
        language_plugin: true,
        ..Default::default()
    });
    let client = client_for(&spawn_site(site.clone()).await);

    let posts = client.fetch_posts("post", Some("en")).await.unwrap();
    assert_eq!(posts.iter().map(|p| p.id).collect::<Vec<_>>(), vec![105, 106]);
    assert!(posts[0].translations.is_empty());

    let queries = site.list_queries.lock().unwrap().clone();
    assert_eq!(queries[0].get("lang").map(String::as_str), Some("en"));
    assert_eq!(queries[0].get("per_page").map(String::as_str), Some("20"));
}

#[tokio::test]
async fn fetch_post_maps_404_to_none() {
    let site = Arc::new(FakeSite::default());
    let client = client_for(&spawn_site(site).await);
    assert_eq!(client.fetch_post("post", 105).await.unwrap().unwrap().id, 105);
    assert!(client.fetch_post("post", 999).await.unwrap().is_none());
}

#[tokio::test]
async fn create_translation_creates_draft_and_links_both_posts() {
    let site = Arc::new(FakeSite::default());
    let client = client_for(&spawn_site(site.clone()).await);
    let original = client.fetch_post("post", 105).await.unwrap().unwrap();

    let draft_id = client.create_translation(&original, &fields(), "sk").await.unwrap();
    assert_eq!(draft_id, 301);

    let created = site.created.lock().unwrap().clone();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0]["status"], "draft");
    assert_eq!(created[0]["lang"], "sk");
    assert_eq!(created[0]["title"], "Ahoj");

    let linked = site.linked.lock().unwrap().clone();
    assert_eq!(linked.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![105, 301]);
    let expected: BTreeMap<String, i64> =
        BTreeMap::from([("en".to_string(), 105), ("sk".to_string(), 301)]);
    for (_, body) in &linked {
        let map: BTreeMap<String, i64> =
            serde_json::from_value(body["translations"].clone()).unwrap();
        assert_eq!(map, expected);
    }
}

#[tokio::test]
async fn failed_link_reports_partial_write() {
    let site = Arc::new(FakeSite {
        fail_link_for: Some(105),
        ..Default::default()
    });
    let client = client_for(&spawn_site(site.clone()).await);
    let original = client.fetch_post("post", 105).await.unwrap().unwrap();

    let err = client
        .create_translation(&original, &fields(), "sk")
        .await
        .unwrap_err();
    match err {
        TranslationWriteError::PartialLink { draft_id, post_id, cause } => {
            assert_eq!(draft_id, 301);
            assert_eq!(post_id, 105);
            assert!(format!("{:#}", cause).contains("403"));
        }
        other => panic!("expected partial link error, got {}", other),
    }
    assert_eq!(site.created.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn language_plugin_probe_follows_lang_filter() {
    let with_plugin = Arc::new(FakeSite {
        language_plugin: true,
        ..Default::default()
    });
    let client = client_for(&spawn_site(with_plugin).await);
    assert!(client.check_language_plugin_active().await);

    let without_plugin = Arc::new(FakeSite::default());
    let client = client_for(&spawn_site(without_plugin).await);
    assert!(!client.check_language_plugin_active().await);
}

#[tokio::test]
async fn install_falls_back_to_activation_when_folder_exists() {
    let fresh = Arc::new(FakeSite::default());
    let client = client_for(&spawn_site(fresh.clone()).await);
    assert!(client.install_language_plugin().await.unwrap());
    assert_eq!(*fresh.plugin_calls.lock().unwrap(), vec!["install polylang"]);

    let present = Arc::new(FakeSite {
        plugin_folder_exists: true,
        ..Default::default()
    });
    let client = client_for(&spawn_site(present.clone()).await);
    assert!(client.install_language_plugin().await.unwrap());
    assert_eq!(
        *present.plugin_calls.lock().unwrap(),
        vec!["install polylang", "activate active"]
    );
}

#[tokio::test]
async fn validate_connection_uses_credentials() {
    let site = Arc::new(FakeSite::default());
    let client = client_for(&spawn_site(site).await);
    assert!(client.validate_connection().await);
}
