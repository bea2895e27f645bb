//! Integration tests for the HTTP surface: requests go through the full
//! axum router via `tower::ServiceExt::oneshot`, responses are decoded as
//! JSON and checked against the wire contract.

mod helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use helpers::{blueprint_package, TestHarness};
use std::sync::Arc;
use tower::ServiceExt;
use uescope::api::{router, AppContext};
use uescope::query::QueryEngine;

fn app(h: &TestHarness) -> axum::Router {
    let ctx = AppContext {
        store: Arc::clone(&h.store),
        config: Arc::clone(&h.config),
        engine: Arc::new(QueryEngine::new(Arc::clone(&h.store), Arc::clone(&h.config))),
        indexer: Arc::clone(&h.indexer),
        start_time: std::time::Instant::now(),
    };
    router(ctx)
}

async fn get_json(
    app: &axum::Router,
    uri: &str,
) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, value)
}

async fn post_json(
    app: &axum::Router,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, value)
}

fn scanned_harness() -> TestHarness {
    let h = TestHarness::new();
    h.write(
        "Script/Characters/Player.as",
        "UCLASS(Blueprintable)\nclass APlayer : ACharacter\n{\n\tUFUNCTION()\n\tvoid BeginPlay()\n\t{\n\t}\n\tUPROPERTY()\n\tint32 Health;\n}\n",
    );
    h.write(
        "Cpp/Engine/Actor.h",
        "UCLASS()\nclass ENGINE_API ACharacter : public APawn\n{\n\tGENERATED_BODY()\n};\n",
    );
    h.write_bytes(
        "Content/Blueprints/BP_Player.uasset",
        &blueprint_package("BlueprintGeneratedClass", "APlayer"),
    );
    h.scan_all();
    h
}

// ---------------------------------------------------------------------------
// Health, status, stats, summary
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_ok() {
    let h = TestHarness::new();
    let app = app(&h);
    let (status, body) = get_json(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["uptimeSeconds"].is_u64());
    assert_eq!(body["projects"], 3);
}

#[tokio::test]
async fn status_covers_every_configured_language() {
    let h = scanned_harness();
    let app = app(&h);
    let (status, body) = get_json(&app, "/status").await;
    assert_eq!(status, StatusCode::OK);
    for language in ["script", "cpp", "content"] {
        assert_eq!(body[language]["state"], "ready", "{language}");
        assert_eq!(body[language]["progressPercent"], 100.0);
    }
}

#[tokio::test]
async fn stats_counts_rows() {
    let h = scanned_harness();
    let app = app(&h);
    let (status, body) = get_json(&app, "/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["files"], 2);
    assert_eq!(body["assets"], 1);
    assert!(body["types"].as_i64().unwrap() >= 2);
    assert!(body["trigramRows"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn summary_includes_projects_and_build_time() {
    let h = scanned_harness();
    let app = app(&h);
    let (status, body) = get_json(&app, "/summary").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["generatedAt"].is_i64());
    assert_eq!(body["projects"].as_array().unwrap().len(), 3);
    assert!(body["buildTimeMs"].is_u64());
    assert!(body["indexStatus"].is_array());
}

// ---------------------------------------------------------------------------
// Required-parameter validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_required_parameters_are_400() {
    let h = TestHarness::new();
    let app = app(&h);
    for uri in [
        "/find-type",
        "/find-children",
        "/browse-module",
        "/find-file",
        "/find-member",
        "/grep",
    ] {
        let (status, body) = get_json(&app, uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert!(body["error"].is_string(), "{uri}");
    }
}

#[tokio::test]
async fn unknown_language_is_400() {
    let h = TestHarness::new();
    let app = app(&h);
    let (status, body) = get_json(&app, "/find-type?name=AFoo&language=kotlin").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("kotlin"));
}

#[tokio::test]
async fn malformed_regex_is_400() {
    let h = TestHarness::new();
    let app = app(&h);
    let (status, body) = get_json(&app, "/grep?pattern=(unclosed").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("regex"));
}

// ---------------------------------------------------------------------------
// Query endpoints
// ---------------------------------------------------------------------------

#[tokio::test]
async fn find_type_exact_and_fuzzy() {
    let h = scanned_harness();
    let app = app(&h);

    let (status, body) = get_json(&app, "/find-type?name=APlayer").await;
    assert_eq!(status, StatusCode::OK);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["name"], "APlayer");
    assert_eq!(results[0]["parent"], "ACharacter");
    assert_eq!(results[0]["specifiers"][0], "Blueprintable");

    let (_, body) = get_json(&app, "/find-type?name=Player&fuzzy=true").await;
    let results = body["results"].as_array().unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0]["name"], "APlayer");
    assert!(results[0]["score"].is_f64() || results[0]["score"].is_number());

    // unknown name: empty result, not an error
    let (status, body) = get_json(&app, "/find-type?name=ANobody").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["results"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn find_children_spans_languages_and_assets() {
    let h = scanned_harness();
    let app = app(&h);
    let (status, body) = get_json(&app, "/find-children?parent=ACharacter&recursive=true").await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["name"].as_str().unwrap())
        .collect();
    // script class inherits the cpp class; the blueprint inherits the
    // script class
    assert!(names.contains(&"APlayer"));
    assert!(names.contains(&"BP_Player"));
    assert_eq!(body["totalChildren"], 2);
    assert_eq!(body["truncated"], false);
}

#[tokio::test]
async fn find_children_truncates() {
    let h = TestHarness::new();
    for i in 0..5 {
        h.write(&format!("Script/C{i}.as"), &format!("class AChild{i} : ABase\n{{\n}}\n"));
    }
    h.scan_all();
    let app = app(&h);
    let (_, body) = get_json(&app, "/find-children?parent=ABase&maxResults=2").await;
    assert_eq!(body["results"].as_array().unwrap().len(), 2);
    assert_eq!(body["totalChildren"], 5);
    assert_eq!(body["truncated"], true);
}

#[tokio::test]
async fn browse_module_and_list_modules() {
    let h = scanned_harness();
    let app = app(&h);

    let (status, body) = get_json(&app, "/browse-module?module=Game.Characters").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["module"], "Game.Characters");
    assert_eq!(body["totalFiles"], 1);
    assert_eq!(body["types"][0]["name"], "APlayer");

    let (status, body) = get_json(&app, "/list-modules?parent=Game").await;
    assert_eq!(status, StatusCode::OK);
    let modules: Vec<&str> = body["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["module"].as_str().unwrap())
        .collect();
    assert_eq!(modules, vec!["Game.Characters"]);
}

#[tokio::test]
async fn find_file_and_find_member() {
    let h = scanned_harness();
    let app = app(&h);

    let (status, body) = get_json(&app, "/find-file?filename=Player").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"][0]["name"], "Player.as");

    let (status, body) = get_json(&app, "/find-member?name=Health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"][0]["containingType"], "APlayer");
    assert_eq!(body["results"][0]["kind"], "property");

    let (_, body) = get_json(&app, "/find-member?name=Health&memberKind=function").await;
    assert!(body["results"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn grep_end_to_end() {
    let h = scanned_harness();
    let app = app(&h);
    let (status, body) = get_json(&app, "/grep?pattern=BeginPlay&contextLines=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalMatches"], 1);
    assert_eq!(body["searchEngine"], "trigram");
    let first = &body["results"][0];
    assert!(first["file"].as_str().unwrap().ends_with("Player.as"));
    assert!(first["match"].as_str().unwrap().contains("BeginPlay"));
    assert_eq!(first["context"].as_array().unwrap().len(), 3);

    // asset search rides along on name matches
    let (_, body) = get_json(&app, "/grep?pattern=BP_Player").await;
    assert_eq!(body["assets"].as_array().unwrap().len(), 1);
    assert!(body["assets"][0]["matchedFields"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn grep_grouped_mode() {
    let h = scanned_harness();
    let app = app(&h);
    let (_, body) = get_json(&app, "/grep?pattern=UPROPERTY&grouped=true").await;
    let groups = body["results"].as_array().unwrap();
    assert_eq!(groups.len(), 1);
    assert!(groups[0]["matchCount"].as_u64().unwrap() >= 1);
    assert!(groups[0]["matches"].is_array());
}

// ---------------------------------------------------------------------------
// Write endpoints
// ---------------------------------------------------------------------------

#[tokio::test]
async fn internal_ingest_applies_and_reports() {
    let h = scanned_harness();
    let app = app(&h);

    std::thread::sleep(std::time::Duration::from_millis(20));
    let new_path = h.write("Script/Fresh.as", "class AFresh\n{\n}\n");
    let gone = h.path("Script/Characters/Player.as");
    h.remove("Script/Characters/Player.as");

    let (status, body) = post_json(
        &app,
        "/internal/ingest",
        serde_json::json!({
            "files": [ { "path": new_path.to_string_lossy() } ],
            "deletes": [ gone.to_string_lossy() ],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ingested"], 1);
    assert_eq!(body["deleted"], 1);

    let (_, body) = get_json(&app, "/find-type?name=AFresh").await;
    assert_eq!(body["results"].as_array().unwrap().len(), 1);
    let (_, body) = get_json(&app, "/find-type?name=APlayer").await;
    assert!(body["results"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn refresh_accepts_language_and_rejects_unknown() {
    let h = scanned_harness();
    let app = app(&h);

    let (status, body) = post_json(&app, "/refresh?language=script", serde_json::json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "refreshing");
    assert_eq!(body["languages"][0], "script");

    let (status, _) = post_json(&app, "/refresh?language=cobol", serde_json::json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn internal_ingest_reports_out_of_project_paths() {
    let h = TestHarness::new();
    let app = app(&h);
    let (status, body) = post_json(
        &app,
        "/internal/ingest",
        serde_json::json!({ "files": [ { "path": "/nowhere/at/all.as" } ] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ingested"], 0);
    assert_eq!(body["errors"].as_array().unwrap().len(), 1);
}
