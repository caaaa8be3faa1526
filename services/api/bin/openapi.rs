//! Writes the OpenAPI document of the REST surface to disk.
//!
//! Usage: `openapi [PATH]`, defaulting to `openapi.json`.

use colloquy_api::router::ApiDoc;
use utoipa::OpenApi;

fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "openapi.json".to_string());
    let document = ApiDoc::openapi().to_pretty_json()?;
    std::fs::write(&path, document)?;
    println!("Wrote OpenAPI document to {path}");
    Ok(())
}
