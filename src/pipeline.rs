// End-to-end `generate` run:
// classify -> load -> normalize -> populate -> merge -> write.
//
// Everything before population is all-or-nothing. Population failures are
// per client and, under the partial-success policy, only skip that client.
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::aggregate::series_total;
use crate::classifier::{classify, Classified, UnmatchedPolicy};
use crate::config::ReportConfig;
use crate::error::{ReportError, Result};
use crate::loader::{brand_metric, load_canonical, summary_metric};
use crate::merge::merge_slides;
use crate::normalize::{check_login_complete, login_calendar, to_metrics, weekly_series, zero_fill};
use crate::output::{write_csv, write_json};
use crate::package::Package;
use crate::populate::{Populator, SlideTemplate};
use crate::task::{ReportTask, TaskState};
use crate::types::{BrandMetric, CanonicalRow, ClientRecord, ClientResultRow, Role, RunSummary};
use crate::util::{file_label, format_int};

#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub period: String,
    pub files: Vec<PathBuf>,
    pub input_dir: Option<PathBuf>,
    /// Overrides `report.template` from the config.
    pub template: Option<PathBuf>,
}

/// Explicit files plus every file in `dir` with one of `extensions`, sorted.
/// Office lock files (`~$…`) and dotfiles are skipped.
pub fn collect_inputs(files: &[PathBuf], dir: Option<&Path>, extensions: &[&str]) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for file in files {
        if !file.is_file() {
            return Err(ReportError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("input file {} not found", file.display()),
            )));
        }
        out.push(file.clone());
    }
    if let Some(dir) = dir {
        let mut found = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let name = file_label(&path);
            if name.starts_with("~$") || name.starts_with('.') || !path.is_file() {
                continue;
            }
            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            if extensions.contains(&ext.as_str()) {
                found.push(path);
            }
        }
        found.sort();
        debug!(dir = %dir.display(), files = found.len(), "input directory scanned");
        out.extend(found);
    }
    Ok(out)
}

fn load_role(
    classified: &Classified<Role>,
    role: Role,
    config: &ReportConfig,
) -> Result<(String, Vec<CanonicalRow>)> {
    let path = classified.get(role).ok_or_else(|| ReportError::MissingInput {
        role: role.to_string(),
    })?;
    let rows = load_canonical(path, role, config.columns.for_role(role))?;
    Ok((file_label(path), rows))
}

/// Turn the four classified exports into one record per client, in the order
/// clients first appear in the summary file.
pub fn build_records(config: &ReportConfig, classified: &Classified<Role>) -> Result<Vec<ClientRecord>> {
    let (login_file, login_rows) = load_role(classified, Role::Login, config)?;
    let (purchase_file, purchase_rows) = load_role(classified, Role::Purchase, config)?;
    let (brand_file, brand_rows) = load_role(classified, Role::Brand, config)?;
    let (_, summary_rows) = load_role(classified, Role::Summary, config)?;

    let login = weekly_series(&login_rows, &login_file)?;
    let purchase = weekly_series(&purchase_rows, &purchase_file)?;
    let calendar = login_calendar(&login);
    info!(weeks = calendar.len(), clients = login.len(), "login calendar built");

    let mut brands: BTreeMap<String, Vec<BrandMetric>> = BTreeMap::new();
    for row in &brand_rows {
        brands
            .entry(row.group_key.clone())
            .or_default()
            .push(brand_metric(row, &brand_file)?);
    }

    let mut seen = HashSet::new();
    let mut records = Vec::new();
    for row in &summary_rows {
        let key = &row.group_key;
        if !seen.insert(key.clone()) {
            warn!(client = %key, line = row.line, "duplicate summary row ignored");
            continue;
        }
        let name = if row.company_name.is_empty() {
            key.clone()
        } else {
            row.company_name.clone()
        };
        let login_metrics = match login.get(key) {
            Some(series) => {
                check_login_complete(&name, series, &calendar)?;
                to_metrics(series)
            }
            None => {
                warn!(client = %name, "no login rows");
                Vec::new()
            }
        };
        let purchase_metrics = match purchase.get(key) {
            Some(series) => zero_fill(&name, series, &calendar)?,
            None => {
                warn!(client = %name, "no purchase rows");
                Vec::new()
            }
        };
        let client_brands = brands.remove(key).unwrap_or_default();
        if client_brands.is_empty() {
            warn!(client = %name, "no brand rows");
        }
        records.push(ClientRecord {
            group_key: key.clone(),
            display_name: name,
            login: login_metrics,
            purchase: purchase_metrics,
            summary: Some(summary_metric(row)),
            brands: client_brands,
        });
    }

    let orphans: BTreeSet<&str> = login
        .keys()
        .chain(purchase.keys())
        .chain(brands.keys())
        .map(String::as_str)
        .filter(|k| !seen.contains(*k))
        .collect();
    if !orphans.is_empty() {
        let list: Vec<&str> = orphans.into_iter().collect();
        warn!(clients = %list.join(","), "clients missing from the summary are not reported");
    }
    info!(clients = records.len(), "client records built");
    Ok(records)
}

fn result_row(record: &ClientRecord, status: &str) -> ClientResultRow {
    ClientResultRow {
        client: record.display_name.clone(),
        status: status.to_string(),
        login_weeks: record.login.len(),
        purchase_total: format_int(series_total(&record.purchase).trunc() as i64),
        brands: record.brands.len(),
    }
}

/// Slides that made it, plus one result row per client.
#[derive(Debug)]
pub struct Assembled<S> {
    pub slides: Vec<S>,
    pub rows: Vec<ClientResultRow>,
    pub skipped: Vec<String>,
}

/// Populate every client in order. A population failure skips the client
/// when `partial_success` is set and aborts otherwise; any other error
/// always aborts.
pub fn assemble_slides<S, F>(records: &[ClientRecord], partial_success: bool, mut populate: F) -> Result<Assembled<S>>
where
    F: FnMut(&ClientRecord) -> Result<S>,
{
    let mut out = Assembled {
        slides: Vec::with_capacity(records.len()),
        rows: Vec::with_capacity(records.len()),
        skipped: Vec::new(),
    };
    for record in records {
        match populate(record) {
            Ok(slide) => {
                out.slides.push(slide);
                out.rows.push(result_row(record, "ok"));
            }
            Err(e @ ReportError::Population { .. }) if partial_success => {
                warn!(client = %record.display_name, error = %e, "client skipped");
                out.skipped.push(record.display_name.clone());
                out.rows.push(result_row(record, "skipped"));
            }
            Err(e) => return Err(e),
        }
    }
    Ok(out)
}

pub fn run_generate(config: &ReportConfig, opts: &GenerateOptions, today: NaiveDate) -> Result<RunSummary> {
    let inputs = collect_inputs(&opts.files, opts.input_dir.as_deref(), &["csv"])?;
    if inputs.is_empty() {
        return Err(ReportError::Task(
            "no input files: pass CSV paths or --input-dir".into(),
        ));
    }
    let template_path = opts
        .template
        .clone()
        .unwrap_or_else(|| config.report.template.clone());
    let template = Package::open(&template_path)?;

    let mut task = ReportTask::create(&config.tasks_dir, &opts.period, today)?;
    match generate_in_task(config, &template, &mut task, &inputs) {
        Ok(summary) => Ok(summary),
        Err(e) => {
            let at = task.state();
            match task.fail(&e) {
                Ok(path) => warn!(state = %at, record = %path.display(), "run failed, task record written"),
                Err(write_err) => warn!(error = %write_err, "could not write task record"),
            }
            Err(e)
        }
    }
}

fn generate_in_task(
    config: &ReportConfig,
    template_pkg: &Package,
    task: &mut ReportTask,
    inputs: &[PathBuf],
) -> Result<RunSummary> {
    let copies = task.add_inputs(inputs)?;
    let classified = classify(&copies, &config.classification, UnmatchedPolicy::Reject)?;
    classified.require(&Role::ALL)?;
    debug!(files = classified.len(), "inputs classified");
    for (role, path) in classified.iter() {
        info!(role = %role, file = %file_label(path), "input classified");
    }
    task.advance(TaskState::Classified)?;

    let records = build_records(config, &classified)?;
    task.advance(TaskState::Normalized)?;

    let template = SlideTemplate::from_package(template_pkg, config.report.slide_index)?;
    let populator = Populator::new(&template, config)?;
    let assembled = assemble_slides(&records, config.report.partial_success, |record| {
        populator.populate(record)
    })?;
    info!(
        populated = assembled.slides.len(),
        skipped = assembled.skipped.len(),
        "slides populated"
    );
    task.advance(TaskState::Populated)?;

    let deck = merge_slides(template_pkg, &assembled.slides)?;
    let output = task.output_dir().join(format!(
        "{}_{}.pptx",
        config.report.output_prefix,
        task.period()
    ));
    deck.save(&output)?;
    task.advance(TaskState::Merged)?;
    info!(output = %output.display(), slides = assembled.slides.len(), "deck written");

    let summary = RunSummary {
        period: task.period().to_string(),
        task_dir: task.dir().display().to_string(),
        state: TaskState::Done.to_string(),
        output: Some(output.display().to_string()),
        slides: assembled.slides.len(),
        skipped: assembled.skipped,
        clients: assembled.rows,
    };
    write_json(&task.output_dir().join("run_summary.json"), &summary)?;
    write_csv(&task.output_dir().join("client_results.csv"), &summary.clients)?;
    task.advance(TaskState::Done)?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::package::presentation_slides;
    use crate::types::WeeklyMetric;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 3).unwrap()
    }

    fn setup() -> (tempfile::TempDir, ReportConfig, GenerateOptions) {
        let root = tempfile::tempdir().unwrap();
        let input = root.path().join("in");
        fs::create_dir(&input).unwrap();
        fixtures::write_inputs(&input);
        let template = fixtures::write_template(root.path());
        let mut config = ReportConfig::default();
        config.tasks_dir = root.path().join("tasks");
        let opts = GenerateOptions {
            period: "202601".into(),
            files: Vec::new(),
            input_dir: Some(input),
            template: Some(template),
        };
        (root, config, opts)
    }

    fn classified_inputs(root: &Path, config: &ReportConfig) -> Classified<Role> {
        let dir = root.join("in");
        let files = collect_inputs(&[], Some(&dir), &["csv"]).unwrap();
        classify(&files, &config.classification, UnmatchedPolicy::Reject).unwrap()
    }

    #[test]
    fn records_follow_summary_order() {
        let (root, config, _) = setup();
        let records = build_records(&config, &classified_inputs(root.path(), &config)).unwrap();
        let keys: Vec<&str> = records.iter().map(|r| r.group_key.as_str()).collect();
        assert_eq!(keys, vec!["c2", "c1"]);

        let c1 = &records[1];
        let purchase: Vec<f64> = c1.purchase.iter().map(|m| m.value).collect();
        assert_eq!(purchase, vec![0.0, 7.0, 0.0]);
        assert_eq!(c1.login.len(), 3);
        assert_eq!(c1.brands.len(), 2);
        assert_eq!(c1.brands[0].total_price, 12000.0);

        let c2 = &records[0];
        assert!(c2.purchase.is_empty());
        assert_eq!(c2.display_name, "株式会社Y（申込企業：株式会社Z）");
    }

    #[test]
    fn login_gap_aborts() {
        let (root, config, _) = setup();
        let login = root.path().join("in").join("login_weekly.csv");
        fs::write(
            &login,
            "client_id,company_name,week_start_date,weekly_login_users\n\
             c1,Alpha,2026-01-05,10\n\
             c1,Alpha,2026-01-12,11\n\
             c1,Alpha,2026-01-19,15\n\
             c2,株式会社Y,2026-01-05,3\n\
             c2,株式会社Y,2026-01-19,5\n",
        )
        .unwrap();
        let err = build_records(&config, &classified_inputs(root.path(), &config)).unwrap_err();
        assert!(matches!(err, ReportError::IncompleteCalendar { .. }));
    }

    #[test]
    fn generate_writes_deck_and_summary() {
        let (_root, config, opts) = setup();
        let summary = run_generate(&config, &opts, today()).unwrap();
        assert_eq!(summary.slides, 2);
        assert!(summary.skipped.is_empty());
        assert_eq!(summary.state, "done");

        let task_dir = config.tasks_dir.join("20260203");
        let output = task_dir.join("output").join("JCB報告資料_202601.pptx");
        assert_eq!(summary.output.as_deref(), Some(output.display().to_string().as_str()));
        let written: serde_json::Value =
            serde_json::from_slice(&fs::read(task_dir.join("output").join("run_summary.json")).unwrap()).unwrap();
        assert_eq!(written["state"], "done");
        assert!(written.get("error").is_none());
        assert!(task_dir.join("output").join("client_results.csv").is_file());
        assert!(task_dir.join("input").join("brand_sales.csv").is_file());

        let deck = Package::open(&output).unwrap();
        let slides = presentation_slides(&deck).unwrap();
        assert_eq!(slides.len(), 2);
        let first = deck.xml(&slides[0].1).unwrap().root.text_of("a:t");
        assert!(first.contains("株式会社Y ご報告資料"));
        // c2 has no purchases: its slide only carries login and brand charts
        assert!(deck.contains("ppt/media/report_1_login.png"));
        assert!(!deck.contains("ppt/media/report_1_purchase.png"));
        assert!(deck.contains("ppt/media/report_2_purchase.png"));
    }

    #[test]
    fn missing_role_fails_with_task_record() {
        let (root, config, opts) = setup();
        fs::remove_file(root.path().join("in").join("brand_sales.csv")).unwrap();
        let err = run_generate(&config, &opts, today()).unwrap_err();
        assert!(matches!(err, ReportError::MissingInput { ref role } if role == "brand"));
        let task_dir = config.tasks_dir.join("20260203");
        assert!(task_dir.join("task.json").is_file());
        assert_eq!(fs::read_dir(task_dir.join("output")).unwrap().count(), 0);
    }

    #[test]
    fn unknown_file_is_rejected() {
        let (root, config, opts) = setup();
        fs::write(root.path().join("in").join("notes.csv"), "x\n1\n").unwrap();
        let err = run_generate(&config, &opts, today()).unwrap_err();
        assert!(matches!(err, ReportError::AmbiguousInput { .. }));
    }

    #[test]
    fn second_run_same_day_gets_suffix() {
        let (_root, config, opts) = setup();
        run_generate(&config, &opts, today()).unwrap();
        let summary = run_generate(&config, &opts, today()).unwrap();
        assert!(summary.task_dir.ends_with("20260203_2"));
    }

    fn record(name: &str) -> ClientRecord {
        ClientRecord {
            group_key: name.into(),
            display_name: name.into(),
            login: vec![WeeklyMetric {
                week_start: today(),
                value: 1.0,
            }],
            purchase: Vec::new(),
            summary: None,
            brands: Vec::new(),
        }
    }

    fn flaky(record: &ClientRecord) -> Result<String> {
        if record.display_name == "bad" {
            Err(ReportError::population("bad", "no picture"))
        } else {
            Ok(record.display_name.clone())
        }
    }

    #[test]
    fn partial_success_skips_failed_client() {
        let records = vec![record("a"), record("bad"), record("c")];
        let out = assemble_slides(&records, true, flaky).unwrap();
        assert_eq!(out.slides, vec!["a", "c"]);
        assert_eq!(out.skipped, vec!["bad"]);
        let statuses: Vec<&str> = out.rows.iter().map(|r| r.status.as_str()).collect();
        assert_eq!(statuses, vec!["ok", "skipped", "ok"]);
    }

    #[test]
    fn strict_mode_aborts_on_failed_client() {
        let records = vec![record("a"), record("bad")];
        let err = assemble_slides(&records, false, flaky).unwrap_err();
        assert!(matches!(err, ReportError::Population { .. }));
    }

    #[test]
    fn non_population_errors_always_abort() {
        let records = vec![record("a")];
        let err = assemble_slides(&records, true, |_| -> Result<()> {
            Err(ReportError::Template("broken".into()))
        })
        .unwrap_err();
        assert!(matches!(err, ReportError::Template(_)));
    }
}
