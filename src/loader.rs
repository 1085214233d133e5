use std::collections::HashMap;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord};
use tracing::debug;

use crate::config::ColumnMap;
use crate::error::{ReportError, Result};
use crate::types::{BrandMetric, CanonicalRow, Role, SummaryMetric};
use crate::util::{file_label, parse_amount};

/// Header position of every configured source column.
struct ColumnIndex {
    group_key: usize,
    company_name: usize,
    date: Option<usize>,
    value: Option<usize>,
    extra: Vec<(String, usize)>,
}

impl ColumnIndex {
    fn resolve(headers: &StringRecord, map: &ColumnMap, role: Role, file: &str) -> Result<Self> {
        let positions: HashMap<&str, usize> = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.trim().trim_start_matches('\u{feff}'), i))
            .collect();
        let find = |column: &str| -> Result<usize> {
            positions
                .get(column)
                .copied()
                .ok_or_else(|| ReportError::Schema {
                    file: file.to_string(),
                    role: role.to_string(),
                    column: column.to_string(),
                })
        };
        let date = map.date.as_deref().map(&find).transpose()?;
        let value = map.value.as_deref().map(&find).transpose()?;
        let mut extra = Vec::with_capacity(map.extra.len());
        for (field, column) in &map.extra {
            extra.push((field.clone(), find(column)?));
        }
        Ok(Self {
            group_key: find(&map.group_key)?,
            company_name: find(&map.company_name)?,
            date,
            value,
            extra,
        })
    }
}

fn cell(record: &StringRecord, idx: usize) -> String {
    record.get(idx).unwrap_or("").trim().to_string()
}

/// Read a classified CSV and map it onto canonical rows.
///
/// Every configured column must exist in the header; the mapping is the only
/// place source column names appear.
pub fn load_canonical(path: &Path, role: Role, map: &ColumnMap) -> Result<Vec<CanonicalRow>> {
    let file = file_label(path);
    let mut rdr = ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers = rdr.headers()?.clone();
    let index = ColumnIndex::resolve(&headers, map, role, &file)?;

    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        rows.push(CanonicalRow {
            line,
            group_key: cell(&record, index.group_key),
            company_name: cell(&record, index.company_name),
            date: index.date.map(|i| cell(&record, i)),
            value: index.value.map(|i| cell(&record, i)),
            extra: index
                .extra
                .iter()
                .map(|(field, i)| (field.clone(), cell(&record, *i)))
                .collect(),
        });
    }
    debug!(file = %file, role = %role, rows = rows.len(), "loaded");
    Ok(rows)
}

fn number(row: &CanonicalRow, field: &str, file: &str) -> Result<f64> {
    match row.extra(field) {
        Some(raw) => parse_amount(raw).map_err(|message| ReportError::InvalidValue {
            file: file.to_string(),
            line: row.line,
            message: format!("{}: {}", field, message),
        }),
        None => Ok(0.0),
    }
}

pub fn brand_metric(row: &CanonicalRow, file: &str) -> Result<BrandMetric> {
    Ok(BrandMetric {
        brand_name: row.extra("brand_name").unwrap_or_default().to_string(),
        total_count: number(row, "total_count", file)?,
        unique_user_count: number(row, "unique_user_count", file)?,
        total_price: number(row, "total_price", file)?,
        discounted_price_sum: number(row, "discounted_price_sum", file)?,
        discount_sum: number(row, "discount_sum", file)?,
    })
}

pub fn summary_metric(row: &CanonicalRow) -> SummaryMetric {
    let field = |name: &str| {
        row.extra(name)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    SummaryMetric {
        period_start: field("period_start"),
        period_end: field("period_end"),
        registration_users: field("registration_users"),
        mau: field("mau"),
        distribution_total: field("distribution_total"),
        purchase_amount: field("purchase_amount"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ColumnTable;
    use std::fs;

    fn write(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn maps_configured_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "login.csv",
            "\u{feff}client_id,company_name,week_start_date,weekly_login_users\n\
             c1, Acme ,2026-01-05,12\n\
             ,,,\n\
             c1,Acme,2026-01-12,\"1,300\"\n",
        );
        let rows = load_canonical(&path, Role::Login, &ColumnTable::default().login).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].group_key, "c1");
        assert_eq!(rows[0].company_name, "Acme");
        assert_eq!(rows[0].date.as_deref(), Some("2026-01-05"));
        assert_eq!(rows[1].value.as_deref(), Some("1,300"));
        assert_eq!(rows[1].line, 4);
    }

    #[test]
    fn renamed_upstream_column_needs_only_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "login.csv",
            "cid,name,week,users\nc1,Acme,2026-01-05,3\n",
        );
        let map = ColumnMap {
            group_key: "cid".into(),
            company_name: "name".into(),
            date: Some("week".into()),
            value: Some("users".into()),
            extra: Default::default(),
        };
        let rows = load_canonical(&path, Role::Login, &map).unwrap();
        assert_eq!(rows[0].value.as_deref(), Some("3"));
    }

    #[test]
    fn missing_column_is_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "purchase.csv",
            "client_id,company_name,week\nc1,Acme,2026-01-05\n",
        );
        let err = load_canonical(&path, Role::Purchase, &ColumnTable::default().purchase)
            .unwrap_err();
        match err {
            ReportError::Schema { file, role, column } => {
                assert_eq!(file, "purchase.csv");
                assert_eq!(role, "purchase");
                assert_eq!(column, "week_start");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn brand_rows_parse_numbers_and_default_unmapped_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "brand.csv",
            "client_id,client_name,brand_name,total_count,unique_user_count,total_price\n\
             c1,Acme,Cafe,4,3,\"2,000\"\n",
        );
        let rows = load_canonical(&path, Role::Brand, &ColumnTable::default().brand).unwrap();
        let brand = brand_metric(&rows[0], "brand.csv").unwrap();
        assert_eq!(brand.brand_name, "Cafe");
        assert_eq!(brand.total_price, 2000.0);
        assert_eq!(brand.discount_sum, 0.0);
    }

    #[test]
    fn bad_number_reports_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "brand.csv",
            "client_id,client_name,brand_name,total_count,unique_user_count,total_price\n\
             c1,Acme,Cafe,4,3,lots\n",
        );
        let rows = load_canonical(&path, Role::Brand, &ColumnTable::default().brand).unwrap();
        let err = brand_metric(&rows[0], "brand.csv").unwrap_err();
        assert!(matches!(err, ReportError::InvalidValue { line: 2, .. }));
    }

    #[test]
    fn summary_blank_cells_become_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "summary.csv",
            "client_id,client_name,period_start,period_end,first_registration_users,mau,product_distribution_total,total_purchase_amount\n\
             c1,Acme,2026/01/01,2026/01/31,120,,5000,6000\n",
        );
        let rows = load_canonical(&path, Role::Summary, &ColumnTable::default().summary).unwrap();
        let summary = summary_metric(&rows[0]);
        assert_eq!(summary.registration_users.as_deref(), Some("120"));
        assert_eq!(summary.mau, None);
        assert_eq!(summary.period_end.as_deref(), Some("2026/01/31"));
    }
}
