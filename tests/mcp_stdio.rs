use std::path::{Path, PathBuf};

use pocketrag::{
    ChunkDb,
    ConfigDb,
    DataDir,
    RagConfig,
    config::EmbedderKind,
    ingestion::IngestOptions,
};
use rmcp::{
    ServiceExt,
    model::CallToolRequestParams,
    transport::{ConfigureCommandExt, TokioChildProcess},
};
use serde_json::json;

fn setup_fixture(data_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let docs = data_dir.join("docs");
    std::fs::create_dir_all(&docs)?;
    let manual = docs.join("boiler.txt");
    std::fs::write(
        &manual,
        "Bleed the radiators before winter.\u{c}\
         The boiler pressure should read 1.5 bar when cold.",
    )?;

    let data_dir = DataDir::resolve(Some(data_dir))?;
    let config_db = ConfigDb::open(&data_dir.config_db())?;
    let store = ChunkDb::open(&data_dir.chunks_db())?;
    let config = RagConfig {
        embedder: EmbedderKind::Hashing,
        ..RagConfig::default()
    };
    let mut rag = config.rag_service(store)?;
    let options = IngestOptions {
        progress: false,
        ..IngestOptions::default()
    };
    rag.ingest(&manual, &config_db, &options)?;

    Ok(())
}

#[tokio::test]
async fn mcp_stdio_search_and_context_roundtrip()
-> Result<(), Box<dyn std::error::Error>> {
    let tempdir = tempfile::tempdir()?;
    setup_fixture(tempdir.path())?;

    let bin = pocketrag_bin()?;
    let transport = TokioChildProcess::new(
        tokio::process::Command::new(bin).configure(|cmd| {
            cmd.args(["--embedder", "hashing", "mcp"])
                .env("POCKETRAG_DATA_DIR", tempdir.path())
                .env_remove("POCKETRAG_GENERATOR");
        }),
    )?;

    let client = ().serve(transport).await?;

    let args = json!({
        "query": "boiler pressure",
        "limit": 5,
        "mode": "keyword"
    });
    let result = client
        .peer()
        .call_tool(
            CallToolRequestParams::new("pocketrag_search")
                .with_arguments(args.as_object().unwrap().clone()),
        )
        .await?;

    let structured = result.structured_content.expect("structured content");
    let results = structured
        .get("results")
        .and_then(|v| v.as_array())
        .expect("results array");
    assert_eq!(results.len(), 1);
    assert_eq!(
        results[0].get("documentName").and_then(|v| v.as_str()),
        Some("boiler.txt")
    );
    assert_eq!(
        results[0].get("pageNumber").and_then(|v| v.as_u64()),
        Some(2)
    );

    let context_args = json!({
        "question": "What should the boiler pressure read?",
        "documents": ["boiler.txt"]
    });
    let context_result = client
        .peer()
        .call_tool(
            CallToolRequestParams::new("pocketrag_context")
                .with_arguments(context_args.as_object().unwrap().clone()),
        )
        .await?;

    let structured = context_result
        .structured_content
        .expect("structured content");
    let context = structured
        .get("context")
        .and_then(|v| v.as_str())
        .expect("context string");
    assert!(context.contains("1.5 bar"));

    let text = context_result
        .content
        .first()
        .and_then(|c| c.as_text())
        .map(|t| t.text.clone())
        .expect("text content");
    assert!(text.contains("Sources: boiler.txt p.2"));

    client.cancel().await?;
    Ok(())
}

fn pocketrag_bin() -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Ok(bin) = std::env::var("CARGO_BIN_EXE_pocketrag") {
        return Ok(PathBuf::from(bin));
    }

    let mut path = std::env::current_exe()?;
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push("pocketrag");

    if cfg!(windows) {
        path.set_extension("exe");
    }

    Ok(path)
}
