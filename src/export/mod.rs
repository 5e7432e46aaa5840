use anyhow::Result;

use crate::db::ResultSet;

/// Render a result set as CSV: a header row of column names, then one line
/// per row. NULL is written as an empty field. A result with no rows renders
/// as an empty string.
pub fn to_csv(result: &ResultSet) -> Result<String> {
    if result.is_empty() {
        return Ok(String::new());
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&result.columns)?;
    for row in &result.rows {
        writer.write_record(row.iter().map(|v| v.to_string()))?;
    }

    let bytes = writer.into_inner().map_err(|e| anyhow::anyhow!("Failed to finish CSV: {}", e))?;
    Ok(String::from_utf8(bytes)?)
}
