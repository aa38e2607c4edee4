use serde_json::json;

use crate::cli::{utils, OutputFormat};
use crate::security::scan_text;

/// Offline signature check, for tuning patterns against real payloads.
pub fn handle(text: &str, output_format: OutputFormat) -> anyhow::Result<()> {
    let matches = scan_text(text, "input");

    if matches.is_empty() {
        return utils::output_success(output_format, "No threats detected", Some(json!({ "matches": [] })));
    }

    match output_format {
        OutputFormat::Json => {
            utils::output_success(output_format, "Threats detected", Some(json!({ "matches": matches })))
        }
        OutputFormat::Text => {
            let rows: Vec<Vec<String>> = matches
                .iter()
                .map(|m| vec![m.category.to_string(), m.pattern.to_string()])
                .collect();
            println!("{}", utils::render_table(&["CATEGORY", "PATTERN"], &rows));
            Ok(())
        }
    }
}
