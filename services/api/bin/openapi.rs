use stagecast_api::router::ApiDoc;
use utoipa::OpenApi;

/// Prints the OpenAPI document for the control plane, for piping into docs
/// tooling or a file.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", ApiDoc::openapi().to_pretty_json()?);
    Ok(())
}
