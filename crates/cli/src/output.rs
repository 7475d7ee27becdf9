//! Formatting helpers shared by the commands.

use captioner_core::error::ErrorCategory;
use serde::Serialize;
use std::collections::HashSet;

/// Keeps only the requested keys (case-insensitive) of each JSON object.
pub fn filter_fields(mut results: Vec<serde_json::Value>, fields: &[String]) -> Vec<serde_json::Value> {
    if fields.is_empty() {
        return results;
    }
    let want: HashSet<String> = fields.iter().map(|s| s.to_lowercase()).collect();
    for r in results.iter_mut() {
        if let Some(obj) = r.as_object_mut() {
            obj.retain(|k, _| want.contains(&k.to_lowercase()));
        }
    }
    results
}

pub fn to_values<T: Serialize>(items: &[T]) -> anyhow::Result<Vec<serde_json::Value>> {
    items
        .iter()
        .map(|i| serde_json::to_value(i).map_err(Into::into))
        .collect()
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = "B";
    for u in UNITS {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = u;
    }
    format!("{value:.1} {unit}")
}

pub fn exit_code(category: ErrorCategory) -> u8 {
    match category {
        ErrorCategory::Io => 2,
        ErrorCategory::Network => 3,
        ErrorCategory::Input => 4,
        ErrorCategory::Tool => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filter_fields_is_case_insensitive() {
        let rows = vec![json!({"path": "a", "has_caption": true, "id": "image-a"})];
        let out = filter_fields(rows, &["PATH".into(), "has_caption".into()]);
        assert_eq!(out[0], json!({"path": "a", "has_caption": true}));
    }

    #[test]
    fn sizes_are_humanized() {
        assert_eq!(human_size(12), "12 B");
        assert_eq!(human_size(2048), "2.0 KB");
        assert_eq!(human_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn exit_codes_are_distinct() {
        let codes: HashSet<u8> = [
            ErrorCategory::Io,
            ErrorCategory::Network,
            ErrorCategory::Input,
            ErrorCategory::Tool,
        ]
        .into_iter()
        .map(exit_code)
        .collect();
        assert_eq!(codes.len(), 4);
    }
}
