//! Write the PeerHub OpenAPI document to `openapi.json`

use utoipa::OpenApi;

fn main() -> anyhow::Result<()> {
    let doc = peerhub_backend::api::openapi::ApiDoc::openapi();
    let json = doc.to_pretty_json()?;
    std::fs::write("openapi.json", json)?;
    println!("Wrote openapi.json ({} paths)", doc.paths.paths.len());
    Ok(())
}
