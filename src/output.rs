use std::path::Path;

use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use crate::error::Result;

pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    for r in rows {
        wtr.serialize(r)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let s = serde_json::to_string_pretty(value)?;
    std::fs::write(path, s)?;
    Ok(())
}

/// Markdown table of the first `max_rows` rows.
pub fn render_table<T>(rows: &[T], max_rows: usize) -> String
where
    T: Tabled + Clone,
{
    let slice: Vec<T> = rows.iter().cloned().take(max_rows).collect();
    if slice.is_empty() {
        return "(no rows)".to_string();
    }
    Table::new(slice).with(Style::markdown()).to_string()
}

pub fn preview_table_rows<T>(title: &str, rows: &[T], max_rows: usize)
where
    T: Tabled + Clone,
{
    println!("\n{}\n", title);
    println!("{}\n", render_table(rows, max_rows));
    if rows.len() > max_rows {
        println!("({} more rows not shown)\n", rows.len() - max_rows);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClientResultRow;

    fn row(client: &str, status: &str) -> ClientResultRow {
        ClientResultRow {
            client: client.into(),
            status: status.into(),
            login_weeks: 3,
            purchase_total: "7".into(),
            brands: 2,
        }
    }

    #[test]
    fn table_is_markdown_and_capped() {
        let rows = vec![row("Alpha", "ok"), row("Beta", "skipped")];
        let out = render_table(&rows, 1);
        assert!(out.contains("| Client"));
        assert!(out.contains("Alpha"));
        assert!(!out.contains("Beta"));
        assert_eq!(render_table::<ClientResultRow>(&[], 5), "(no rows)");
    }

    #[test]
    fn csv_uses_renamed_headers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clients.csv");
        write_csv(&path, &[row("Alpha", "ok")]).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.starts_with("Client,Status,LoginWeeks,PurchaseTotal,Brands\n"));
        assert!(text.contains("Alpha,ok,3,7,2"));
    }
}
