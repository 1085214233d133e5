// Fills one copy of the template slide with a client's figures.
//
// Placeholders are found by their text, pictures by position: a chart picture
// is the nearest picture below its label. Text is written into existing runs
// so the template's fonts survive.
use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use tracing::{debug, warn};

use crate::aggregate::{brand_views, clean_title, series_total, top_n_with_other};
use crate::chart;
use crate::config::{Placeholder, PlaceholderRule, ReportConfig, SlideReportConfig};
use crate::error::{ReportError, Result};
use crate::package::{presentation_slides, Package, Relationships, REL_IMAGE};
use crate::types::{BrandMetric, ClientRecord, SummaryMetric, WeeklyMetric};
use crate::util::{fit_font_size, format_figure, format_int, period_month};
use crate::xml::{Document, Element, Node};

const BRAND_FONT_PT: f64 = 10.5;
const BRAND_FONT_MIN_PT: f64 = 7.0;

/// Text placeholders every template must carry.
const REQUIRED: [Placeholder; 7] = [
    Placeholder::Title,
    Placeholder::Period,
    Placeholder::RegistrationUsers,
    Placeholder::Mau,
    Placeholder::Distribution,
    Placeholder::LoginChartLabel,
    Placeholder::PurchaseChartLabel,
];

/// The slide every client page is cloned from.
#[derive(Debug, Clone)]
pub struct SlideTemplate {
    pub xml: Document,
    pub rels: Relationships,
}

impl SlideTemplate {
    pub fn from_package(pkg: &Package, index: usize) -> Result<Self> {
        let slides = presentation_slides(pkg)?;
        let (_, part) = slides.get(index).ok_or_else(|| {
            ReportError::Template(format!(
                "template has {} slide(s), no slide at index {}",
                slides.len(),
                index
            ))
        })?;
        Ok(Self {
            xml: pkg.xml(part)?,
            rels: pkg.relationships(part)?,
        })
    }
}

/// A rendered chart, referenced from the slide through `rel_id`.
#[derive(Debug, Clone)]
pub struct MediaAsset {
    pub kind: &'static str,
    pub rel_id: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct PopulatedSlide {
    pub client: String,
    pub xml: Document,
    pub rels: Relationships,
    pub media: Vec<MediaAsset>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ShapeKind {
    Text,
    Picture,
    Table,
}

#[derive(Debug, Clone)]
struct Shape {
    /// Child indices from the slide root.
    path: Vec<usize>,
    kind: ShapeKind,
    y: i64,
    cx: i64,
    cy: i64,
    text: String,
}

fn xfrm_value(el: &Element, xfrm: &[&str], leaf: &str, attr: &str) -> i64 {
    let mut path = xfrm.to_vec();
    path.push(leaf);
    el.path(&path)
        .and_then(|e| e.attr(attr))
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

fn shape(el: &Element, path: &[usize], kind: ShapeKind, xfrm: &[&str]) -> Shape {
    Shape {
        path: path.to_vec(),
        kind,
        y: xfrm_value(el, xfrm, "a:off", "y"),
        cx: xfrm_value(el, xfrm, "a:ext", "cx"),
        cy: xfrm_value(el, xfrm, "a:ext", "cy"),
        text: el.text_of("a:t"),
    }
}

fn scan(el: &Element, prefix: &mut Vec<usize>, out: &mut Vec<Shape>) {
    for (i, node) in el.children.iter().enumerate() {
        let Node::Element(child) = node else { continue };
        prefix.push(i);
        match child.name.as_str() {
            "p:grpSp" => scan(child, prefix, out),
            "p:sp" if child.child("p:txBody").is_some() => {
                out.push(shape(child, prefix, ShapeKind::Text, &["p:spPr", "a:xfrm"]))
            }
            "p:pic" => out.push(shape(child, prefix, ShapeKind::Picture, &["p:spPr", "a:xfrm"])),
            "p:graphicFrame" if child.find_descendant("a:tbl").is_some() => {
                out.push(shape(child, prefix, ShapeKind::Table, &["p:xfrm"]))
            }
            _ => {}
        }
        prefix.pop();
    }
}

/// Where each placeholder sits in one slide.
#[derive(Debug, Default)]
struct Layout {
    text: BTreeMap<Placeholder, Vec<usize>>,
    login_picture: Option<Vec<usize>>,
    purchase_picture: Option<Vec<usize>>,
    brand_picture: Option<Vec<usize>>,
    /// Pictures that are removed whatever the data.
    stray_pictures: Vec<Vec<usize>>,
    table: Option<Vec<usize>>,
}

fn nearest_below(pictures: &[&Shape], taken: &[bool], label_y: i64) -> Option<usize> {
    pictures
        .iter()
        .enumerate()
        .filter(|(i, p)| !taken[*i] && p.y > label_y)
        .min_by_key(|(_, p)| p.y - label_y)
        .map(|(i, _)| i)
}

fn detect(root: &Element, rules: &[PlaceholderRule]) -> Layout {
    let mut shapes = Vec::new();
    let c_sld = root.child_index("p:cSld");
    let sp_tree = root.child("p:cSld").and_then(|c| c.child_index("p:spTree"));
    if let (Some(c), Some(t), Some(tree)) = (c_sld, sp_tree, root.path(&["p:cSld", "p:spTree"])) {
        scan(tree, &mut vec![c, t], &mut shapes);
    }

    let mut layout = Layout::default();
    let mut label_y = BTreeMap::new();
    for s in shapes.iter().filter(|s| s.kind == ShapeKind::Text) {
        let Some(rule) = rules.iter().find(|r| r.matches(&s.text)) else {
            continue;
        };
        if layout.text.contains_key(&rule.key) {
            debug!(placeholder = %rule.key, text = %s.text, "placeholder already taken, shape left alone");
            continue;
        }
        debug!(placeholder = %rule.key, text = %s.text, "placeholder detected");
        layout.text.insert(rule.key, s.path.clone());
        label_y.insert(rule.key, s.y);
    }

    let pictures: Vec<&Shape> = shapes.iter().filter(|s| s.kind == ShapeKind::Picture).collect();
    let mut taken = vec![false; pictures.len()];
    let claim = |key: Placeholder, taken: &mut Vec<bool>| -> Option<usize> {
        let i = nearest_below(&pictures, taken, *label_y.get(&key)?)?;
        taken[i] = true;
        Some(i)
    };
    layout.login_picture = claim(Placeholder::LoginChartLabel, &mut taken).map(|i| pictures[i].path.clone());
    layout.purchase_picture =
        claim(Placeholder::PurchaseChartLabel, &mut taken).map(|i| pictures[i].path.clone());
    if let Some(first) = claim(Placeholder::BrandChartLabel, &mut taken) {
        // A second picture on the same row as the first: keep the wider one.
        let top = pictures[first].y;
        let bottom = top + pictures[first].cy.max(1);
        let second = pictures
            .iter()
            .enumerate()
            .filter(|(i, p)| !taken[*i] && p.y >= top && p.y < bottom)
            .min_by_key(|(_, p)| p.y - top)
            .map(|(i, _)| i);
        let (target, stray) = match second {
            Some(s) if pictures[s].cx > pictures[first].cx => (s, Some(first)),
            Some(s) => (first, Some(s)),
            None => (first, None),
        };
        layout.brand_picture = Some(pictures[target].path.clone());
        if let Some(s) = stray {
            layout.stray_pictures.push(pictures[s].path.clone());
        }
    }
    layout.table = shapes
        .iter()
        .find(|s| s.kind == ShapeKind::Table)
        .map(|s| s.path.clone());
    layout
}

/// Blank every run and write `text` into the first one.
fn replace_shape_text(shape: &mut Element, text: &str) -> bool {
    let Some(body) = shape.child_mut("p:txBody") else {
        return false;
    };
    let mut placed = false;
    for para in body.elements_mut().filter(|e| e.name == "a:p") {
        for run in para.elements_mut().filter(|e| e.name == "a:r") {
            let t = run.ensure_child("a:t");
            if placed {
                t.set_text("");
            } else {
                t.set_text(text);
                placed = true;
            }
        }
    }
    placed
}

/// Rewrite the `yyyy`, `/mm` and `：…）` runs of a chart label.
fn replace_label_runs(shape: &mut Element, year: &str, month: &str, tail: &str) -> bool {
    let mut touched = false;
    shape.for_each_descendant_mut("a:r", &mut |run: &mut Element| {
        let Some(t) = run.child_mut("a:t") else { return };
        let current = t.text();
        let replacement = match current.trim() {
            "yyyy" => year.to_string(),
            "/mm" => format!("/{}", month),
            s if s.starts_with('：') => tail.to_string(),
            _ => return,
        };
        t.set_text(&replacement);
        touched = true;
    });
    touched
}

fn compact_spacing(para: &mut Element) {
    if para.child_index("a:pPr").is_none() {
        para.insert_child(0, Element::new("a:pPr"));
    }
    if let Some(ppr) = para.child_mut("a:pPr") {
        ppr.remove_where(&|e| matches!(e.name.as_str(), "a:lnSpc" | "a:spcBef" | "a:spcAft"));
        let spacing = |name: &str, unit: &str, val: &str| {
            Element::new(name).with_child(Element::new(unit).with_attr("val", val))
        };
        ppr.insert_child(0, spacing("a:spcAft", "a:spcPts", "0"));
        ppr.insert_child(0, spacing("a:spcBef", "a:spcPts", "0"));
        ppr.insert_child(0, spacing("a:lnSpc", "a:spcPct", "100000"));
    }
}

fn write_first_run(para: &mut Element, text: &str, size_pt: Option<f64>) {
    if para.child_index("a:r").is_none() {
        // Empty cell: borrow the paragraph-end properties as run properties.
        let props = Element {
            name: "a:rPr".to_string(),
            attrs: para
                .child("a:endParaRPr")
                .map(|e| e.attrs.clone())
                .unwrap_or_default(),
            children: Vec::new(),
        };
        let at = para.child_index("a:endParaRPr").unwrap_or(para.children.len());
        para.insert_child(at, Element::new("a:r").with_child(props).with_child(Element::new("a:t")));
    }
    if let Some(run) = para.child_mut("a:r") {
        run.ensure_child("a:t").set_text(text);
        if let Some(pt) = size_pt {
            if run.child_index("a:rPr").is_none() {
                run.insert_child(0, Element::new("a:rPr"));
            }
            let sz = (pt * 100.0).round() as i64;
            run.ensure_child("a:rPr").set_attr("sz", &sz.to_string());
        }
    }
}

fn set_cell_text(cell: &mut Element, text: &str, size_pt: Option<f64>) {
    let Some(body) = cell.child_mut("a:txBody") else { return };
    let mut first = true;
    for para in body.elements_mut().filter(|e| e.name == "a:p") {
        for run in para.elements_mut().filter(|e| e.name == "a:r") {
            if let Some(t) = run.child_mut("a:t") {
                t.set_text("");
            }
        }
        if first {
            if !text.is_empty() {
                write_first_run(para, text, size_pt);
            }
            compact_spacing(para);
            first = false;
        }
    }
}

fn table_cells(b: &BrandMetric) -> [String; 4] {
    [
        b.brand_name.clone(),
        format!("{}円", format_int(b.total_price.trunc() as i64)),
        format!("{}件", format_int(b.total_count.trunc() as i64)),
        format!("{}人", format_int(b.unique_user_count.trunc() as i64)),
    ]
}

/// Data rows the brand table can show: the template's rows below the
/// header, capped at `max_rows`.
fn table_capacity(frame: &Element, max_rows: usize) -> std::result::Result<usize, String> {
    let tbl = frame
        .path(&["a:graphic", "a:graphicData", "a:tbl"])
        .ok_or("table frame has no a:tbl")?;
    let available = tbl.elements().filter(|e| e.name == "a:tr").count().saturating_sub(1);
    Ok(available.min(max_rows))
}

/// Fill the data rows of the brand table; rows past `rows` are blanked.
fn fill_table(frame: &mut Element, rows: &[BrandMetric]) -> std::result::Result<(), String> {
    let tbl = frame
        .path_mut(&["a:graphic", "a:graphicData", "a:tbl"])
        .ok_or("table frame has no a:tbl")?;
    let brand_width = tbl
        .child("a:tblGrid")
        .and_then(|g| g.child("a:gridCol"))
        .and_then(|c| c.attr("w"))
        .and_then(|w| w.parse::<i64>().ok())
        .unwrap_or(0);

    for (i, tr) in tbl.elements_mut().filter(|e| e.name == "a:tr").skip(1).enumerate() {
        let values = rows.get(i).map(table_cells);
        for (j, tc) in tr.elements_mut().filter(|e| e.name == "a:tc").enumerate() {
            let text = values.as_ref().and_then(|v| v.get(j)).map(String::as_str).unwrap_or("");
            let size = if j == 0 && !text.is_empty() && brand_width > 0 {
                fit_font_size(text, brand_width, BRAND_FONT_PT, BRAND_FONT_MIN_PT)
            } else {
                None
            };
            set_cell_text(tc, text, size);
        }
    }
    Ok(())
}

/// Every relationship id the slide XML refers to.
fn referenced_ids(el: &Element, out: &mut BTreeSet<String>) {
    for (key, value) in &el.attrs {
        if key.starts_with("r:") {
            out.insert(value.clone());
        }
    }
    for child in el.elements() {
        referenced_ids(child, out);
    }
}

fn chart_total(series: &[WeeklyMetric]) -> String {
    if series.is_empty() {
        String::new()
    } else {
        format_int(series_total(series).trunc() as i64)
    }
}

fn series_values(series: &[WeeklyMetric]) -> Vec<f64> {
    series.iter().map(|m| m.value).collect()
}

pub struct Populator<'a> {
    template: &'a SlideTemplate,
    report: &'a SlideReportConfig,
    rules: &'a [PlaceholderRule],
    title_strip: Regex,
}

impl<'a> Populator<'a> {
    pub fn new(template: &'a SlideTemplate, config: &'a ReportConfig) -> Result<Self> {
        Ok(Self {
            template,
            report: &config.report,
            rules: &config.placeholders,
            title_strip: config.title_strip_regex()?,
        })
    }

    pub fn populate(&self, client: &ClientRecord) -> Result<PopulatedSlide> {
        let name = clean_title(&client.display_name, &self.title_strip);
        let fail = |message: String| ReportError::population(&name, message);

        let mut xml = self.template.xml.clone();
        let mut rels = self.template.rels.clone();
        let layout = detect(&xml.root, self.rules);
        if let Some(missing) = REQUIRED.iter().find(|k| !layout.text.contains_key(*k)) {
            return Err(fail(format!("template has no `{}` placeholder", missing)));
        }

        let summary = client.summary.clone().unwrap_or_default();
        for (key, text) in text_values(&name, &summary) {
            let shape = shape_at(&mut xml, &layout.text, key).ok_or_else(|| fail(format!("`{}` shape vanished", key)))?;
            if !replace_shape_text(shape, &text) {
                warn!(client = %name, placeholder = %key, "placeholder shape has no text run to write into");
            }
        }

        let (year, month) = period_month(summary.period_start.as_deref());
        let labels = [
            (Placeholder::LoginChartLabel, chart_total(&client.login), "人"),
            (Placeholder::PurchaseChartLabel, chart_total(&client.purchase), "件"),
        ];
        for (key, total, unit) in labels {
            let shape = shape_at(&mut xml, &layout.text, key).ok_or_else(|| fail(format!("`{}` shape vanished", key)))?;
            if !replace_label_runs(shape, &year, &month, &format!("：{}{}）", total, unit)) {
                warn!(client = %name, placeholder = %key, "chart label has no yyyy, /mm or total run");
            }
        }

        let views = brand_views(
            &client.brands,
            self.report.top_n,
            self.report.donut_max,
            &self.report.other_label,
        );
        let encode = |e: ReportError| fail(format!("chart encoding failed: {}", e));
        let login_png = if client.login.is_empty() {
            None
        } else {
            Some(chart::bar_chart(&series_values(&client.login), chart::BLUE).map_err(encode)?)
        };
        let purchase_png = if client.purchase.is_empty() {
            None
        } else {
            Some(chart::bar_chart(&series_values(&client.purchase), chart::GREEN).map_err(encode)?)
        };
        let brand_png = if views.donut.is_empty() {
            None
        } else {
            let counts: Vec<f64> = views.donut.iter().map(|b| b.total_count).collect();
            let prices: Vec<f64> = views.donut.iter().map(|b| b.total_price).collect();
            Some(chart::double_donut(&counts, &prices).map_err(encode)?)
        };

        let mut media = Vec::new();
        let mut removals = layout.stray_pictures.clone();
        for (kind, target, png) in [
            ("login", &layout.login_picture, login_png),
            ("purchase", &layout.purchase_picture, purchase_png),
            ("brand", &layout.brand_picture, brand_png),
        ] {
            match (target, png) {
                (Some(path), Some(bytes)) => {
                    let rel_id = rels.add(REL_IMAGE, &format!("../media/{}.png", kind));
                    let blip = xml
                        .root
                        .at_mut(path)
                        .and_then(|pic| pic.path_mut(&["p:blipFill", "a:blip"]))
                        .ok_or_else(|| fail(format!("{} picture has no a:blip", kind)))?;
                    blip.set_attr("r:embed", &rel_id);
                    media.push(MediaAsset { kind, rel_id, bytes });
                }
                (None, Some(_)) => {
                    return Err(fail(format!("no picture placeholder below the {} chart label", kind)));
                }
                (Some(path), None) => {
                    debug!(client = %name, kind, "no data, removing picture");
                    removals.push(path.clone());
                }
                (None, None) => {}
            }
        }

        match (&layout.table, views.table.is_empty()) {
            (Some(path), false) => {
                let frame = xml.root.at_mut(path).ok_or_else(|| fail("table vanished".into()))?;
                let capacity = table_capacity(frame, self.report.table_max_rows).map_err(fail)?;
                if capacity == 0 {
                    return Err(fail("brand table has no data rows".into()));
                }
                let rows = if views.table.len() > capacity {
                    debug!(client = %name, rows = views.table.len(), capacity, "folding brand table into capacity");
                    top_n_with_other(&views.table, capacity - 1, &self.report.other_label)
                } else {
                    views.table.clone()
                };
                fill_table(frame, &rows).map_err(fail)?;
            }
            (Some(path), true) => removals.push(path.clone()),
            (None, false) => return Err(fail("template has no brand table".into())),
            (None, true) => {}
        }

        // Later paths first so earlier indices stay valid.
        removals.sort();
        removals.dedup();
        for path in removals.iter().rev() {
            xml.root.remove_at(path);
        }

        let mut used = BTreeSet::new();
        referenced_ids(&xml.root, &mut used);
        rels.retain(|r| r.rel_type != REL_IMAGE || used.contains(&r.id));

        debug!(client = %name, media = media.len(), "slide populated");
        Ok(PopulatedSlide {
            client: name,
            xml,
            rels,
            media,
        })
    }
}

fn shape_at<'d>(
    xml: &'d mut Document,
    text: &BTreeMap<Placeholder, Vec<usize>>,
    key: Placeholder,
) -> Option<&'d mut Element> {
    xml.root.at_mut(text.get(&key)?)
}

fn text_values(name: &str, s: &SummaryMetric) -> [(Placeholder, String); 5] {
    [
        (Placeholder::Title, format!("{} ご報告資料", name)),
        (
            Placeholder::Period,
            format!(
                "期間：{}〜{}",
                s.period_start.as_deref().unwrap_or("yyyy/mm/dd"),
                s.period_end.as_deref().unwrap_or("yyyy/mm/dd")
            ),
        ),
        (
            Placeholder::RegistrationUsers,
            format!("■初回登録ユーザー数：{}人", format_figure(s.registration_users.as_deref())),
        ),
        (
            Placeholder::Mau,
            format!("■MAU(購入ユーザー数)：{}人", format_figure(s.mau.as_deref())),
        ),
        (
            Placeholder::Distribution,
            format!(
                "　商品代流通総額：{}円 (総購入金額：{}円)",
                format_figure(s.distribution_total.as_deref()),
                format_figure(s.purchase_amount.as_deref())
            ),
        ),
    ]
}
