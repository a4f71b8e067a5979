// Export OpenAPI specification as JSON
//
// Usage: cargo run -p relay-ingress --bin export-openapi > docs/openapi.json

use relay_ingress::openapi::ApiDoc;

fn main() -> anyhow::Result<()> {
    println!("{}", ApiDoc::to_json()?);
    Ok(())
}
