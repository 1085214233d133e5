// `monthly` run: campaign promotion cost and point usage workbooks.
//
// Inputs are CSV or Excel exports. Each workbook is produced only when its
// inputs are present; the run fails only if neither can be produced.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, Reader};
use chrono::NaiveDate;
use rust_xlsxwriter::{Color, Format, FormatBorder, FormatPattern, Workbook, Worksheet};
use tracing::{debug, info, warn};

use crate::classifier::{classify, UnmatchedPolicy};
use crate::config::{MonthlyConfig, ReportConfig};
use crate::error::{ReportError, Result};
use crate::output::write_json;
use crate::pipeline::collect_inputs;
use crate::task::{ReportTask, TaskState};
use crate::types::{MonthlyRole, MonthlySummary};
use crate::util::file_label;

pub const CAMPAIGN_RAW_SHEET: &str = "(元データ)キャンペーン販売商品とその割引総額";
pub const DISCOUNT_RAW_SHEET: &str = "(元データ)基本割引率一覧";
pub const CAMPAIGN_CALC_SHEET: &str = "キャンペーン費用集計";
pub const POINT_RAW_SHEET: &str = "(元データ) oasis ポイント利用状況(月次)";
pub const POINT_RESULT_SHEET: &str = "集計結果";

const INPUT_EXTENSIONS: [&str; 3] = ["csv", "xlsx", "xls"];
/// Leading columns that hold identifiers rather than amounts.
const ID_COLUMNS: usize = 3;
/// First data row (0-based) of the calculation sheet.
const CALC_FIRST_ROW: u32 = 3;

const CALC_HEADERS: [&str; 9] = [
    "基本割引率",
    "基本割引価格",
    "基本割引価格合計",
    "基本割引額",
    "基本割引額合計",
    "割引差額",
    "確認",
    "キャンペーン追加割引額",
    "区分",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Number(f64),
    Text(String),
}

/// First sheet (or the whole CSV) as a header row plus data rows.
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn read(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let table = match ext.as_str() {
            "csv" => Self::read_csv(path)?,
            "xlsx" | "xls" => Self::read_excel(path)?,
            other => {
                return Err(ReportError::InvalidValue {
                    file: file_label(path),
                    line: 0,
                    message: format!("unsupported file type `{}`", other),
                })
            }
        };
        debug!(file = %file_label(path), rows = table.rows.len(), "table read");
        Ok(table)
    }

    fn read_csv(path: &Path) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
        let headers = rdr
            .headers()?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();
        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record?;
            rows.push(record.iter().map(text_cell).collect());
        }
        Ok(Self { headers, rows })
    }

    fn read_excel(path: &Path) -> Result<Self> {
        let mut workbook = open_workbook_auto(path)?;
        let range = workbook.worksheet_range_at(0).ok_or_else(|| ReportError::InvalidValue {
            file: file_label(path),
            line: 0,
            message: "workbook has no sheets".into(),
        })??;
        let mut lines = range.rows();
        let headers = match lines.next() {
            Some(header) => header.iter().map(|c| c.to_string().trim().to_string()).collect(),
            None => Vec::new(),
        };
        let rows = lines.map(|row| row.iter().map(data_cell).collect()).collect();
        Ok(Self { headers, rows })
    }

    fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Value of `name` in data row `row`; `None` when the column is absent
    /// or the cell is empty.
    pub fn value(&self, row: usize, name: &str) -> Option<&Cell> {
        let idx = self.column(name)?;
        self.rows
            .get(row)?
            .get(idx)
            .filter(|c| **c != Cell::Empty)
    }
}

fn text_cell(raw: &str) -> Cell {
    let s = raw.trim();
    if s.is_empty() {
        Cell::Empty
    } else if let Ok(n) = s.parse::<f64>() {
        Cell::Number(n)
    } else {
        Cell::Text(s.to_string())
    }
}

fn data_cell(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::Empty,
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Float(f) => Cell::Number(*f),
        Data::DateTime(dt) => Cell::Number(dt.as_f64()),
        Data::String(s) if s.trim().is_empty() => Cell::Empty,
        Data::String(s) => Cell::Text(s.clone()),
        other => Cell::Text(other.to_string()),
    }
}

fn write_cell(ws: &mut Worksheet, row: u32, col: u16, cell: &Cell) -> Result<()> {
    match cell {
        Cell::Empty => {}
        Cell::Number(n) => {
            ws.write_number(row, col, *n)?;
        }
        Cell::Text(s) => {
            ws.write_string(row, col, s)?;
        }
    }
    Ok(())
}

fn write_headers(ws: &mut Worksheet, row: u32, headers: &[String]) -> Result<()> {
    for (col, h) in headers.iter().enumerate() {
        ws.write_string(row, col as u16, h)?;
    }
    Ok(())
}

/// Copy the configured columns verbatim; absent values stay blank.
fn raw_sheet(name: &str, columns: &[String], table: &Table) -> Result<Worksheet> {
    let mut ws = Worksheet::new();
    ws.set_name(name)?;
    write_headers(&mut ws, 0, columns)?;
    for row in 0..table.rows.len() {
        for (col, column) in columns.iter().enumerate() {
            if let Some(cell) = table.value(row, column) {
                write_cell(&mut ws, row as u32 + 1, col as u16, cell)?;
            }
        }
    }
    Ok(ws)
}

/// Like [`raw_sheet`] but identifiers default to "" and amounts to 0.
fn defaulted_row(ws: &mut Worksheet, row: u32, columns: &[String], table: &Table, src: usize) -> Result<()> {
    for (col, column) in columns.iter().enumerate() {
        let fallback = if col < ID_COLUMNS {
            Cell::Text(String::new())
        } else {
            Cell::Number(0.0)
        };
        let cell = table.value(src, column).unwrap_or(&fallback);
        write_cell(ws, row, col as u16, cell)?;
    }
    Ok(())
}

fn col_letter(col: usize) -> char {
    (b'A' + col as u8) as char
}

fn title(period: &str, what: &str) -> String {
    let (year, month) = period.split_at(period.len().min(4));
    format!("{}年{}月 {}", year, month, what)
}

pub fn campaign_workbook(
    period: &str,
    config: &MonthlyConfig,
    campaign: &Table,
    discount: &Table,
) -> Result<Workbook> {
    let columns = &config.campaign_columns;
    let mut calc = Worksheet::new();
    calc.set_name(CAMPAIGN_CALC_SHEET)?;
    calc.write_string(0, 0, title(period, "キャンペーン販促費"))?;
    write_headers(&mut calc, 1, columns)?;
    for (i, h) in CALC_HEADERS.iter().enumerate() {
        calc.write_string(1, (columns.len() + i) as u16, *h)?;
    }

    let n = campaign.rows.len() as u32;
    let last_lookup = discount.rows.len() + 1;
    for src in 0..campaign.rows.len() {
        let row = CALC_FIRST_ROW + src as u32;
        let r = row + 1;
        defaulted_row(&mut calc, row, columns, campaign, src)?;
        let formulas = [
            format!("=VLOOKUP($C{r},'{DISCOUNT_RAW_SHEET}'!D$2:L${last_lookup},3,)"),
            format!("=VLOOKUP($C{r},'{DISCOUNT_RAW_SHEET}'!D$2:N${last_lookup},4,)"),
            format!("=M{r}*E{r}"),
            format!("=ROUNDDOWN(F{r}*L{r},0)"),
            format!("=O{r}*E{r}"),
            format!("=G{r}-N{r}"),
            format!("=IF(Q{r}=P{r},\"OK\",\"\")"),
            format!("=K{r}-P{r}"),
            format!("=IF($D{r}=$L{r},\"通常\",\"キャンペーン\")"),
        ];
        for (i, formula) in formulas.iter().enumerate() {
            calc.write_formula(row, (columns.len() + i) as u16, formula.as_str())?;
        }
    }
    let last = CALC_FIRST_ROW + n;
    for col in ['K', 'P', 'Q', 'S'] {
        let idx = (col as u8 - b'A') as u16;
        calc.write_formula(2, idx, format!("=SUM({col}4:{col}{last})").as_str())?;
    }

    let mut workbook = Workbook::new();
    workbook.push_worksheet(calc);
    workbook.push_worksheet(raw_sheet(CAMPAIGN_RAW_SHEET, columns, campaign)?);
    workbook.push_worksheet(raw_sheet(DISCOUNT_RAW_SHEET, &config.discount_columns, discount)?);
    Ok(workbook)
}

pub fn point_workbook(config: &MonthlyConfig, points: &Table) -> Result<Workbook> {
    let columns = &config.result_columns;
    let mut result = Worksheet::new();
    result.set_name(POINT_RESULT_SHEET)?;
    write_headers(&mut result, 0, columns)?;
    for src in 0..points.rows.len() {
        defaulted_row(&mut result, src as u32 + 1, columns, points, src)?;
    }

    // Excel row of the sum sits right after the data.
    let sum_row = points.rows.len() as u32 + 1;
    let last_col = columns.len().saturating_sub(1);
    let edge = |col: usize| {
        let mut format = Format::new().set_border_bottom(FormatBorder::Medium);
        if col == 0 {
            format = format.set_border_left(FormatBorder::Medium);
        }
        if col == last_col {
            format = format.set_border_right(FormatBorder::Medium);
        }
        format
    };
    for col in 0..columns.len() {
        let format = edge(col);
        match col {
            1 => {
                result.write_string_with_format(sum_row, 1, "合計利用pt", &format)?;
            }
            c if c == last_col => {
                let letter = col_letter(c);
                let sum = format
                    .set_background_color(Color::Yellow)
                    .set_pattern(FormatPattern::Solid);
                result.write_formula_with_format(
                    sum_row,
                    c as u16,
                    format!("=SUM({letter}2:{letter}{sum_row})").as_str(),
                    &sum,
                )?;
            }
            c => {
                result.write_blank(sum_row, c as u16, &format)?;
            }
        }
    }

    let mut workbook = Workbook::new();
    workbook.push_worksheet(result);
    workbook.push_worksheet(raw_sheet(POINT_RAW_SHEET, &config.point_columns, points)?);
    Ok(workbook)
}

#[derive(Debug, Clone, Default)]
pub struct MonthlyOptions {
    pub period: String,
    pub input_dir: Option<PathBuf>,
    pub campaign: Option<PathBuf>,
    pub discount: Option<PathBuf>,
    pub point: Option<PathBuf>,
}

impl MonthlyOptions {
    fn explicit(&self) -> Vec<(MonthlyRole, PathBuf)> {
        [
            (MonthlyRole::Campaign, &self.campaign),
            (MonthlyRole::Discount, &self.discount),
            (MonthlyRole::Point, &self.point),
        ]
        .into_iter()
        .filter_map(|(role, path)| path.clone().map(|p| (role, p)))
        .collect()
    }
}

pub fn run_monthly(config: &ReportConfig, opts: &MonthlyOptions, today: NaiveDate) -> Result<MonthlySummary> {
    let explicit = opts.explicit();
    let explicit_paths: Vec<PathBuf> = explicit.iter().map(|(_, p)| p.clone()).collect();
    collect_inputs(&explicit_paths, None, &INPUT_EXTENSIONS)?;
    let explicit_names: Vec<String> = explicit_paths.iter().map(|p| file_label(p)).collect();
    let scanned: Vec<PathBuf> = collect_inputs(&[], opts.input_dir.as_deref(), &INPUT_EXTENSIONS)?
        .into_iter()
        .filter(|p| !explicit_names.contains(&file_label(p)))
        .collect();

    let mut task = ReportTask::create(&config.tasks_dir, &opts.period, today)?;
    let result = monthly_in_task(config, &mut task, &explicit, &scanned);
    if let Err(e) = &result {
        let at = task.state();
        match task.fail(e) {
            Ok(path) => warn!(state = %at, record = %path.display(), "run failed, task record written"),
            Err(write_err) => warn!(error = %write_err, "could not write task record"),
        }
    }
    result
}

fn monthly_in_task(
    config: &ReportConfig,
    task: &mut ReportTask,
    explicit: &[(MonthlyRole, PathBuf)],
    scanned: &[PathBuf],
) -> Result<MonthlySummary> {
    let explicit_paths: Vec<PathBuf> = explicit.iter().map(|(_, p)| p.clone()).collect();
    let explicit_copies = task.add_inputs(&explicit_paths)?;
    let scanned_copies = task.add_inputs(scanned)?;

    let classified = classify(&scanned_copies, &config.monthly.classification, UnmatchedPolicy::Ignore)?;
    let mut inputs: BTreeMap<MonthlyRole, PathBuf> = classified
        .iter()
        .map(|(role, path)| (*role, path.clone()))
        .collect();
    for ((role, _), copy) in explicit.iter().zip(explicit_copies) {
        inputs.insert(*role, copy);
    }
    for (role, path) in &inputs {
        info!(role = %role, file = %file_label(path), "input classified");
    }
    task.advance(TaskState::Classified)?;

    let read = |role: MonthlyRole| inputs.get(&role).map(|p| Table::read(p)).transpose();
    let campaign = read(MonthlyRole::Campaign)?;
    let discount = read(MonthlyRole::Discount)?;
    let points = read(MonthlyRole::Point)?;
    task.advance(TaskState::Normalized)?;

    let period = task.period().to_string();
    let mut books = Vec::new();
    let mut skipped = Vec::new();
    match (&campaign, &discount) {
        (Some(c), Some(d)) => books.push((
            format!("{}_【月次集計】キャンペーン販促費.xlsx", period),
            campaign_workbook(&period, &config.monthly, c, d)?,
        )),
        _ => {
            let missing: Vec<&str> = [("campaign", campaign.is_none()), ("discount", discount.is_none())]
                .into_iter()
                .filter_map(|(name, absent)| absent.then_some(name))
                .collect();
            warn!(missing = %missing.join(","), "campaign report skipped");
            skipped.push("campaign".to_string());
        }
    }
    match &points {
        Some(p) => books.push((
            format!("{}_【月次集計】ポイント利用額.xlsx", period),
            point_workbook(&config.monthly, p)?,
        )),
        None => {
            warn!("point report skipped, no point usage input");
            skipped.push("point".to_string());
        }
    }
    if books.is_empty() {
        return Err(ReportError::MissingInput {
            role: "campaign+discount or point".into(),
        });
    }
    task.advance(TaskState::Populated)?;

    let mut outputs = Vec::with_capacity(books.len());
    for (name, mut workbook) in books {
        let path = task.output_dir().join(name);
        workbook.save(&path)?;
        info!(output = %path.display(), "workbook written");
        outputs.push(path.display().to_string());
    }
    task.advance(TaskState::Merged)?;

    let summary = MonthlySummary {
        period,
        task_dir: task.dir().display().to_string(),
        state: TaskState::Done.to_string(),
        outputs,
        skipped,
    };
    write_json(&task.output_dir().join("monthly_summary.json"), &summary)?;
    task.advance(TaskState::Done)?;
    Ok(summary)
}
