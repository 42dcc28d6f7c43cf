use anyhow::Result;

use crate::cli::output::{StatusInfo, get_formatter};
use crate::models::{Config, OutputFormat};
use crate::services::VectorIndex;

/// Report pipeline readiness from on-disk artifacts. Never loads the
/// embedding model; status must stay cheap.
pub async fn handle_status(format: OutputFormat, _verbose: bool) -> Result<()> {
    let config = Config::load()?;
    let formatter = get_formatter(format);

    let model_dir = config.embedding.resolved_model_dir();
    let model_available = model_dir
        .as_ref()
        .map(|dir| dir.join("model.onnx").exists() && dir.join("tokenizer.json").exists())
        .unwrap_or(false);

    let (index_found, chunk_count, index_built_at) =
        match VectorIndex::load_manifest(&config.index_dir()) {
            Ok(manifest) => (true, manifest.chunk_count, Some(manifest.built_at)),
            Err(_) => (false, 0, None),
        };

    let status = StatusInfo {
        model_id: config.embedding.model_id.clone(),
        model_available,
        model_dir: model_dir
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<unknown>".to_string()),
        generation_url: config.generation.base_url.clone(),
        generation_model: config.generation.model.clone(),
        index_found,
        chunk_count,
        index_built_at,
    };

    print!("{}", formatter.format_status(&status));

    if !model_available {
        eprintln!();
        eprintln!(
            "Hint: embedding model not found. Place model.onnx and tokenizer.json under the model path."
        );
    }
    if !index_found {
        eprintln!();
        eprintln!("Hint: no index built yet. Build one with: murshid index <corpus-dir>");
    }

    Ok(())
}
