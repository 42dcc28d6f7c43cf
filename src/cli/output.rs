use std::fmt::Write as FmtWrite;

use crate::models::{Answer, IndexReport, OutputFormat};

pub trait Formatter {
    fn format_answer(&self, answer: &Answer) -> String;
    fn format_status(&self, status: &StatusInfo) -> String;
    fn format_index_report(&self, report: &IndexReport) -> String;
    fn format_message(&self, message: &str) -> String;
    fn format_error(&self, error: &str) -> String;
}

/// Pipeline status assembled from on-disk artifacts, without loading the
/// embedding model.
#[derive(Debug, Clone)]
pub struct StatusInfo {
    pub model_id: String,
    pub model_available: bool,
    pub model_dir: String,
    pub generation_url: String,
    pub generation_model: String,
    pub index_found: bool,
    pub chunk_count: u64,
    pub index_built_at: Option<String>,
}

pub struct TextFormatter;

impl Formatter for TextFormatter {
    fn format_answer(&self, answer: &Answer) -> String {
        let mut output = String::new();

        writeln!(output, "{}", answer.text).unwrap();

        if let Some(ref context) = answer.context {
            writeln!(output).unwrap();
            writeln!(output, "Context").unwrap();
            writeln!(output, "-------").unwrap();
            for line in context.lines() {
                writeln!(output, "  {}", line).unwrap();
            }
        }

        if !answer.sources.is_empty() {
            writeln!(output).unwrap();
            writeln!(output, "Sources").unwrap();
            writeln!(output, "-------").unwrap();
            for source in &answer.sources {
                writeln!(output, "  {}", source).unwrap();
            }
        }

        output
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        let mut output = String::new();
        writeln!(output, "Status").unwrap();
        writeln!(output, "------").unwrap();

        let model_status = if status.model_available {
            "[AVAILABLE]"
        } else {
            "[MISSING]"
        };
        writeln!(output, "Embedding:   {} {}", status.model_id, model_status).unwrap();
        writeln!(output, "  Path:      {}", status.model_dir).unwrap();
        writeln!(output).unwrap();

        writeln!(
            output,
            "Generation:  {} via {}",
            status.generation_model, status.generation_url
        )
        .unwrap();
        writeln!(output).unwrap();

        if status.index_found {
            writeln!(output, "Index:       [BUILT]").unwrap();
            writeln!(output, "  Chunks:    {}", status.chunk_count).unwrap();
            if let Some(ref built_at) = status.index_built_at {
                writeln!(output, "  Built at:  {}", built_at).unwrap();
            }
        } else {
            writeln!(output, "Index:       [NOT BUILT]").unwrap();
        }

        output
    }

    fn format_index_report(&self, report: &IndexReport) -> String {
        let mut output = String::new();
        writeln!(output, "Indexing Complete").unwrap();
        writeln!(output, "-----------------").unwrap();
        writeln!(output, "Documents indexed: {}", report.documents_indexed).unwrap();
        writeln!(output, "Chunks indexed: {}", report.chunk_count).unwrap();
        writeln!(output, "Chunks skipped: {}", report.skipped_chunks).unwrap();
        writeln!(output, "Duration: {}ms", report.duration_ms).unwrap();
        output
    }

    fn format_message(&self, message: &str) -> String {
        format!("{}\n", message)
    }

    fn format_error(&self, error: &str) -> String {
        format!("Error: {}\n", error)
    }
}

pub struct JsonFormatter {
    pub pretty: bool,
}

impl JsonFormatter {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn render(&self, value: &serde_json::Value) -> String {
        if self.pretty {
            serde_json::to_string_pretty(value).unwrap_or_else(|e| {
                format!("{{\"error\": \"{}\"}}", e)
            })
        } else {
            value.to_string()
        }
    }
}

impl Formatter for JsonFormatter {
    fn format_answer(&self, answer: &Answer) -> String {
        let value = serde_json::to_value(answer)
            .unwrap_or_else(|e| serde_json::json!({"error": e.to_string()}));
        self.render(&value)
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        let value = serde_json::json!({
            "embedding": {
                "model_id": status.model_id,
                "available": status.model_available,
                "model_dir": status.model_dir,
            },
            "generation": {
                "model": status.generation_model,
                "url": status.generation_url,
            },
            "index": {
                "found": status.index_found,
                "chunk_count": status.chunk_count,
                "built_at": status.index_built_at,
            }
        });
        self.render(&value)
    }

    fn format_index_report(&self, report: &IndexReport) -> String {
        let value = serde_json::to_value(report)
            .unwrap_or_else(|e| serde_json::json!({"error": e.to_string()}));
        self.render(&value)
    }

    fn format_message(&self, message: &str) -> String {
        serde_json::json!({"message": message}).to_string()
    }

    fn format_error(&self, error: &str) -> String {
        serde_json::json!({"error": error}).to_string()
    }
}

pub struct MarkdownFormatter;

impl Formatter for MarkdownFormatter {
    fn format_answer(&self, answer: &Answer) -> String {
        let mut output = String::new();
        writeln!(output, "## Answer\n").unwrap();
        writeln!(output, "{}\n", answer.text).unwrap();

        if !answer.grounded {
            writeln!(output, "> ⚠️ Not grounded in the indexed corpus.\n").unwrap();
        }

        if let Some(ref context) = answer.context {
            writeln!(output, "### Context\n").unwrap();
            writeln!(output, "```").unwrap();
            writeln!(output, "{}", context).unwrap();
            writeln!(output, "```\n").unwrap();
        }

        if !answer.sources.is_empty() {
            writeln!(output, "### Sources\n").unwrap();
            for source in &answer.sources {
                writeln!(output, "- `{}`", source).unwrap();
            }
        }

        output
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        let mut output = String::new();
        writeln!(output, "## Status\n").unwrap();

        let model_status = if status.model_available { "✅" } else { "❌" };
        writeln!(output, "### Embedding {}\n", model_status).unwrap();
        writeln!(output, "- **Model:** `{}`", status.model_id).unwrap();
        writeln!(output, "- **Path:** `{}`\n", status.model_dir).unwrap();

        writeln!(output, "### Generation\n").unwrap();
        writeln!(output, "- **Model:** `{}`", status.generation_model).unwrap();
        writeln!(output, "- **URL:** `{}`\n", status.generation_url).unwrap();

        let index_status = if status.index_found { "✅" } else { "❌" };
        writeln!(output, "### Index {}\n", index_status).unwrap();
        if status.index_found {
            writeln!(output, "- **Chunks:** {}", status.chunk_count).unwrap();
            if let Some(ref built_at) = status.index_built_at {
                writeln!(output, "- **Built at:** {}", built_at).unwrap();
            }
        }

        output
    }

    fn format_index_report(&self, report: &IndexReport) -> String {
        let mut output = String::new();
        writeln!(output, "## Indexing Complete\n").unwrap();
        writeln!(output, "| Metric | Value |").unwrap();
        writeln!(output, "|--------|-------|").unwrap();
        writeln!(output, "| Documents indexed | {} |", report.documents_indexed).unwrap();
        writeln!(output, "| Chunks indexed | {} |", report.chunk_count).unwrap();
        writeln!(output, "| Chunks skipped | {} |", report.skipped_chunks).unwrap();
        writeln!(output, "| Duration | {}ms |", report.duration_ms).unwrap();
        output
    }

    fn format_message(&self, message: &str) -> String {
        format!("> {}\n", message)
    }

    fn format_error(&self, error: &str) -> String {
        format!("> ⚠️ **Error:** {}\n", error)
    }
}

pub fn get_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Text => Box::new(TextFormatter),
        OutputFormat::Json => Box::new(JsonFormatter::new(true)),
        OutputFormat::Markdown => Box::new(MarkdownFormatter),
    }
}
