// `validate` run: compares the brand table of every slide in a generated
// deck with the table on the template slide.
//
// Row and column counts, column widths, table size and single-paragraph
// cells are errors; row heights, position and a missing table only warn.
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use tabled::Tabled;
use tracing::{debug, info};

use crate::config::ReportConfig;
use crate::error::{ReportError, Result};
use crate::package::{presentation_slides, Package};
use crate::util::file_label;
use crate::xml::Element;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => f.write_str("error"),
            Severity::Warning => f.write_str("warning"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Tabled)]
pub struct Issue {
    #[tabled(rename = "Slide")]
    pub slide: usize,
    #[tabled(rename = "Severity")]
    pub severity: Severity,
    #[tabled(rename = "Message")]
    pub message: String,
}

impl Issue {
    fn error(slide: usize, message: String) -> Self {
        Self {
            slide,
            severity: Severity::Error,
            message,
        }
    }

    fn warning(slide: usize, message: String) -> Self {
        Self {
            slide,
            severity: Severity::Warning,
            message,
        }
    }
}

/// Geometry of the first table on a slide, in EMU.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableMetrics {
    pub offset: (i64, i64),
    pub size: (i64, i64),
    pub row_heights: Vec<i64>,
    pub col_widths: Vec<i64>,
    /// Paragraphs per cell, row by row.
    pub paragraphs: Vec<Vec<usize>>,
}

fn emu(el: Option<&Element>, key: &str) -> i64 {
    el.and_then(|e| e.attr(key))
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

pub fn table_metrics(slide: &Element) -> Option<TableMetrics> {
    let mut frames = Vec::new();
    slide.descendants("p:graphicFrame", &mut frames);
    frames.into_iter().find_map(|frame| {
        let tbl = frame.path(&["a:graphic", "a:graphicData", "a:tbl"])?;
        let xfrm = frame.child("p:xfrm");
        let off = xfrm.and_then(|x| x.child("a:off"));
        let ext = xfrm.and_then(|x| x.child("a:ext"));
        let rows: Vec<&Element> = tbl.elements().filter(|e| e.name == "a:tr").collect();
        let col_widths = tbl
            .child("a:tblGrid")
            .map(|g| {
                g.elements()
                    .filter(|c| c.name == "a:gridCol")
                    .map(|c| emu(Some(c), "w"))
                    .collect()
            })
            .unwrap_or_default();
        let paragraphs = rows
            .iter()
            .map(|tr| {
                tr.elements()
                    .filter(|e| e.name == "a:tc")
                    .map(|tc| {
                        tc.child("a:txBody")
                            .map(|body| body.elements().filter(|p| p.name == "a:p").count())
                            .unwrap_or(0)
                    })
                    .collect()
            })
            .collect();
        Some(TableMetrics {
            offset: (emu(off, "x"), emu(off, "y")),
            size: (emu(ext, "cx"), emu(ext, "cy")),
            row_heights: rows.iter().map(|tr| emu(Some(tr), "h")).collect(),
            col_widths,
            paragraphs,
        })
    })
}

/// Differences between the template table and one slide's table.
pub fn compare(slide: usize, template: &TableMetrics, deck: &TableMetrics) -> Vec<Issue> {
    let mut issues = Vec::new();
    if deck.row_heights.len() != template.row_heights.len() {
        issues.push(Issue::error(
            slide,
            format!(
                "row count differs: template {}, deck {}",
                template.row_heights.len(),
                deck.row_heights.len()
            ),
        ));
    }
    if deck.col_widths.len() != template.col_widths.len() {
        issues.push(Issue::error(
            slide,
            format!(
                "column count differs: template {}, deck {}",
                template.col_widths.len(),
                deck.col_widths.len()
            ),
        ));
    }
    for (i, (t, d)) in template.row_heights.iter().zip(&deck.row_heights).enumerate() {
        if t != d {
            issues.push(Issue::warning(
                slide,
                format!("row {} height differs: template {}, deck {}", i, t, d),
            ));
        }
    }
    for (i, (t, d)) in template.col_widths.iter().zip(&deck.col_widths).enumerate() {
        if t != d {
            issues.push(Issue::error(
                slide,
                format!("column {} width differs: template {}, deck {}", i, t, d),
            ));
        }
    }
    if deck.offset != template.offset {
        issues.push(Issue::warning(
            slide,
            format!(
                "table moved: template ({},{}), deck ({},{})",
                template.offset.0, template.offset.1, deck.offset.0, deck.offset.1
            ),
        ));
    }
    if deck.size != template.size {
        issues.push(Issue::error(
            slide,
            format!(
                "table size differs: template {}x{}, deck {}x{}",
                template.size.0, template.size.1, deck.size.0, deck.size.1
            ),
        ));
    }
    for (i, row) in deck.paragraphs.iter().enumerate() {
        for (j, &n) in row.iter().enumerate() {
            if n != 1 {
                issues.push(Issue::error(
                    slide,
                    format!("row {} column {} has {} paragraphs, expected 1", i, j, n),
                ));
            }
        }
    }
    issues
}

/// Check every slide of `deck` against the table on template slide
/// `slide_index`.
pub fn validate_deck(template: &Package, slide_index: usize, deck: &Package) -> Result<Vec<Issue>> {
    let template_slides = presentation_slides(template)?;
    let (_, part) = template_slides.get(slide_index).ok_or_else(|| {
        ReportError::Template(format!(
            "template has {} slide(s), no slide at index {}",
            template_slides.len(),
            slide_index
        ))
    })?;
    let reference = table_metrics(&template.xml(part)?.root)
        .ok_or_else(|| ReportError::Template("template slide has no table".into()))?;

    let slides = presentation_slides(deck)?;
    if slides.is_empty() {
        return Ok(vec![Issue::error(0, "deck has no slides".into())]);
    }
    let mut issues = Vec::new();
    for (i, (_, part)) in slides.iter().enumerate() {
        let n = i + 1;
        match table_metrics(&deck.xml(part)?.root) {
            Some(metrics) => issues.extend(compare(n, &reference, &metrics)),
            // Clients without brand rows get no table.
            None => issues.push(Issue::warning(n, "no table on slide".into())),
        }
    }
    debug!(slides = slides.len(), issues = issues.len(), "deck compared");
    Ok(issues)
}

#[derive(Debug, Clone, Default)]
pub struct ValidateOptions {
    pub deck: PathBuf,
    /// Overrides `report.template` from the config.
    pub template: Option<PathBuf>,
}

pub fn run_validate(config: &ReportConfig, opts: &ValidateOptions) -> Result<Vec<Issue>> {
    let template_path = opts
        .template
        .as_deref()
        .unwrap_or(config.report.template.as_path());
    let template = Package::open(template_path)?;
    let deck = Package::open(&opts.deck)?;
    let issues = validate_deck(&template, config.report.slide_index, &deck)?;
    let errors = error_count(&issues);
    info!(
        deck = %file_label(&opts.deck),
        errors,
        warnings = issues.len() - errors,
        "deck validated"
    );
    Ok(issues)
}

pub fn error_count(issues: &[Issue]) -> usize {
    issues.iter().filter(|i| i.severity == Severity::Error).count()
}
