use std::collections::BTreeMap;

use anyhow::anyhow;
use serde_json::{json, Value};

use crate::cli::OutputFormat;

/// Output a success message in the appropriate format
pub fn output_success(output_format: OutputFormat, message: &str, data: Option<Value>) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let mut response = json!({ "success": true, "message": message });
            if let Some(data) = data {
                response["data"] = data;
            }
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Text => println!("✓ {}", message),
    }
    Ok(())
}

/// Print rows as aligned columns, or the raw array as JSON
pub fn output_rows(output_format: OutputFormat, rows: &Value, columns: &[&str], empty: &str) -> anyhow::Result<()> {
    if output_format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(rows)?);
        return Ok(());
    }

    let items = rows.as_array().map(Vec::as_slice).unwrap_or_default();
    if items.is_empty() {
        println!("{}", empty);
        return Ok(());
    }
    for line in table(items, columns) {
        println!("{}", line);
    }
    Ok(())
}

fn cell(item: &Value, column: &str) -> String {
    match item.get(column) {
        None | Some(Value::Null) => "-".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Header plus one padded line per item
pub fn table(items: &[Value], columns: &[&str]) -> Vec<String> {
    let cells: Vec<Vec<String>> = items
        .iter()
        .map(|item| columns.iter().map(|c| cell(item, c)).collect())
        .collect();
    let widths: Vec<usize> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| cells.iter().map(|row| row[i].len()).chain([c.len()]).max().unwrap_or(0))
        .collect();

    let render = |row: Vec<String>| {
        row.iter()
            .zip(&widths)
            .map(|(text, width)| format!("{:<width$}", text, width = *width))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let header = columns.iter().map(|c| c.to_uppercase()).collect();
    std::iter::once(render(header)).chain(cells.into_iter().map(render)).collect()
}

/// `name=value` pairs into a reading map
pub fn parse_readings(pairs: &[String]) -> anyhow::Result<BTreeMap<String, f64>> {
    let mut readings = BTreeMap::new();
    for pair in pairs {
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("Expected name=value, got '{}'", pair))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(anyhow!("Missing variable name in '{}'", pair));
        }
        let value: f64 = value
            .trim()
            .parse()
            .map_err(|_| anyhow!("'{}' is not a number", value.trim()))?;
        readings.insert(name.to_string(), value);
    }
    Ok(readings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readings_are_parsed() {
        let readings = parse_readings(&["temp=21.5".into(), " rh = 40 ".into()]).unwrap();
        assert_eq!(readings["temp"], 21.5);
        assert_eq!(readings["rh"], 40.0);
    }

    #[test]
    fn malformed_readings_are_rejected() {
        assert!(parse_readings(&["temp".into()]).is_err());
        assert!(parse_readings(&["=1".into()]).is_err());
        assert_eq!(
            parse_readings(&["temp=warm".into()]).unwrap_err().to_string(),
            "'warm' is not a number"
        );
    }

    #[test]
    fn table_pads_columns() {
        let rows = vec![
            json!({"external_id": "pump-1", "status": "ONLINE"}),
            json!({"external_id": "p2", "status": null}),
        ];
        let lines = table(&rows, &["external_id", "status"]);
        assert_eq!(lines[0], "EXTERNAL_ID  STATUS");
        assert_eq!(lines[1], "pump-1       ONLINE");
        assert_eq!(lines[2], "p2           -");
    }
}
