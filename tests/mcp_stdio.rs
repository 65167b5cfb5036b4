use std::path::{Path, PathBuf};

use docsift::{Chunk, Index, ModelManager};
use rmcp::{
    ServiceExt,
    model::CallToolRequestParams,
    transport::{ConfigureCommandExt, TokioChildProcess},
};
use serde_json::json;

const MODEL: &str = "hash:64";

fn chunk(id: usize, text: &str, file: &str) -> Chunk {
    Chunk {
        chunk_id: id,
        start_word: 0,
        end_word: text.split_whitespace().count() - 1,
        text: text.to_string(),
        file: Some(file.to_string()),
    }
}

fn setup_fixture(data_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let chunks = vec![
        chunk(0, "rear wing downforce at high speed", "Data/aero/ks9_wing.md"),
        chunk(1, "battery cooling loop layout", "Data/ev/ks9_cooling.md"),
        chunk(2, "rear wing mounting brackets", "Data/chassis/ks8_mounts.md"),
    ];

    let mut model = ModelManager::with_model_id(MODEL.to_string());
    let index = Index::build(chunks, &mut model, 2)?;
    index.save(&data_dir.join("search_index"))?;
    Ok(())
}

#[tokio::test]
async fn mcp_stdio_search_roundtrip() -> Result<(), Box<dyn std::error::Error>>
{
    let tempdir = tempfile::tempdir()?;
    setup_fixture(tempdir.path())?;

    let bin = docsift_bin()?;
    let transport = TokioChildProcess::new(
        tokio::process::Command::new(bin).configure(|cmd| {
            cmd.arg("mcp")
                .env("DOCSIFT_DATA_DIR", tempdir.path())
                .env("DOCSIFT_MODEL", MODEL);
        }),
    )?;

    let client = ().serve(transport).await?;

    let args = json!({
        "query": "folder:aero rear wing",
        "topK": 3,
        "threshold": -1.0,
        "includeText": true
    });

    let result = client
        .peer()
        .call_tool(CallToolRequestParams::new("semantic_search").with_arguments(args.as_object().unwrap().clone()))
        .await?;

    let structured = result.structured_content.expect("structured content");
    assert_eq!(
        structured.get("residualQuery").and_then(|v| v.as_str()),
        Some("rear wing")
    );
    assert_eq!(structured["filters"]["folder"], "aero");

    let results = structured
        .get("results")
        .and_then(|v| v.as_array())
        .expect("results array");

    assert_eq!(results.len(), 1);
    assert_eq!(
        results[0].get("file").and_then(|v| v.as_str()),
        Some("Data/aero/ks9_wing.md")
    );
    assert_eq!(
        results[0].get("text").and_then(|v| v.as_str()),
        Some("rear wing downforce at high speed")
    );

    client.cancel().await?;
    Ok(())
}

fn docsift_bin() -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Ok(bin) = std::env::var("CARGO_BIN_EXE_docsift") {
        return Ok(PathBuf::from(bin));
    }

    let mut path = std::env::current_exe()?;
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push("docsift");

    if cfg!(windows) {
        path.set_extension("exe");
    }

    Ok(path)
}
