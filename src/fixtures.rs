// Test-only builders: a one-slide template carrying every placeholder the
// populator looks for, client records and the four dashboard CSVs.
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDate};

use crate::package::Package;
use crate::types::{BrandMetric, ClientRecord, SummaryMetric, WeeklyMetric};

const NS: &str = concat!(
    r#"xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" "#,
    r#"xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships" "#,
    r#"xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main""#
);
const DECL: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;
const RELS_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const REL_BASE: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

pub const LOGIN_LABEL: [&str; 6] = [
    "■ログインユーザー数推移",
    "（",
    "yyyy",
    "/mm",
    "のログインユーザー数",
    "：　人）",
];
pub const PURCHASE_LABEL: [&str; 6] = ["■購入数推移", "（", "yyyy", "/mm", "の購入数", "：　件）"];

/// Brand-name column width of the fixture table.
pub const BRAND_COLUMN_EMU: i64 = 1_000_000;
pub const TABLE_DATA_ROWS: usize = 10;

fn run(text: &str, size: u32) -> String {
    format!(r#"<a:r><a:rPr lang="ja-JP" sz="{size}"/><a:t>{text}</a:t></a:r>"#)
}

fn text_shape(id: u32, y: i64, runs: &[(&str, u32)]) -> String {
    let body: String = runs.iter().map(|(t, s)| run(t, *s)).collect();
    format!(
        r#"<p:sp><p:nvSpPr><p:cNvPr id="{id}" name="TextBox {id}"/><p:cNvSpPr txBox="1"/><p:nvPr/></p:nvSpPr><p:spPr><a:xfrm><a:off x="300000" y="{y}"/><a:ext cx="4000000" cy="250000"/></a:xfrm></p:spPr><p:txBody><a:bodyPr/><a:lstStyle/><a:p>{body}</a:p></p:txBody></p:sp>"#
    )
}

fn label_shape(id: u32, y: i64, runs: &[&str]) -> String {
    let sized: Vec<(&str, u32)> = runs
        .iter()
        .enumerate()
        .map(|(i, t)| (*t, if i == 0 { 1400 } else { 1000 }))
        .collect();
    text_shape(id, y, &sized)
}

fn picture(id: u32, x: i64, y: i64, cx: i64, rel: &str) -> String {
    format!(
        r#"<p:pic><p:nvPicPr><p:cNvPr id="{id}" name="Picture {id}"/><p:cNvPicPr/><p:nvPr/></p:nvPicPr><p:blipFill><a:blip r:embed="{rel}"/><a:stretch><a:fillRect/></a:stretch></p:blipFill><p:spPr><a:xfrm><a:off x="{x}" y="{y}"/><a:ext cx="{cx}" cy="900000"/></a:xfrm><a:prstGeom prst="rect"><a:avLst/></a:prstGeom></p:spPr></p:pic>"#
    )
}

fn table(id: u32) -> String {
    let row = |texts: [&str; 4]| {
        let cells: String = texts
            .iter()
            .map(|t| {
                format!(
                    r#"<a:tc><a:txBody><a:bodyPr/><a:lstStyle/><a:p>{}</a:p></a:txBody><a:tcPr/></a:tc>"#,
                    run(t, 1050)
                )
            })
            .collect();
        format!(r#"<a:tr h="250000">{cells}</a:tr>"#)
    };
    let mut rows = row(["ブランド名", "販売総額", "発行総数", "購入者数"]);
    for _ in 0..TABLE_DATA_ROWS {
        rows.push_str(&row(["-", "-", "-", "-"]));
    }
    format!(
        r#"<p:graphicFrame><p:nvGraphicFramePr><p:cNvPr id="{id}" name="Table {id}"/><p:cNvGraphicFramePr><a:graphicFrameLocks noGrp="1"/></p:cNvGraphicFramePr><p:nvPr/></p:nvGraphicFramePr><p:xfrm><a:off x="5000000" y="700000"/><a:ext cx="3000000" cy="2750000"/></p:xfrm><a:graphic><a:graphicData uri="http://schemas.openxmlformats.org/drawingml/2006/table"><a:tbl><a:tblPr firstRow="1"/><a:tblGrid><a:gridCol w="{BRAND_COLUMN_EMU}"/><a:gridCol w="800000"/><a:gridCol w="600000"/><a:gridCol w="600000"/></a:tblGrid>{rows}</a:tbl></a:graphicData></a:graphic></p:graphicFrame>"#
    )
}

pub fn slide_xml() -> String {
    let shapes = [
        picture(2, 100000, 50000, 600000, "rId3"),
        text_shape(3, 100000, &[("〇〇株式会社 ご報告資料", 2400)]),
        text_shape(4, 400000, &[("期間：yyyy/mm/dd〜yyyy/mm/dd", 1200)]),
        text_shape(5, 700000, &[("■初回登録ユーザー数：xx人", 1200)]),
        text_shape(6, 900000, &[("■MAU(購入ユーザー数)：xx人", 1200)]),
        text_shape(
            7,
            1100000,
            &[("　商品代流通総額：xx円", 1200), (" (総購入金額：xx円)", 1000)],
        ),
        label_shape(8, 1400000, &LOGIN_LABEL),
        picture(9, 300000, 1600000, 5000000, "rId2"),
        label_shape(10, 2600000, &PURCHASE_LABEL),
        picture(11, 300000, 2800000, 5000000, "rId2"),
        text_shape(12, 450000, &[("購入上位TOP10ブランド", 1200)]),
        table(13),
        text_shape(14, 3800000, &[("■ブランド別 発行総数・販売総額", 1400)]),
        picture(15, 300000, 4000000, 5000000, "rId2"),
        picture(16, 5400000, 4000000, 2000000, "rId2"),
        text_shape(17, 6300000, &[("Confidential", 800)]),
    ]
    .concat();
    format!(
        r#"{DECL}<p:sld {NS}><p:cSld><p:spTree><p:nvGrpSpPr><p:cNvPr id="1" name=""/><p:cNvGrpSpPr/><p:nvPr/></p:nvGrpSpPr><p:grpSpPr/>{shapes}</p:spTree></p:cSld><p:clrMapOvr><a:masterClrMapping/></p:clrMapOvr></p:sld>"#
    )
}

fn rels(items: &[(&str, &str, &str)]) -> Vec<u8> {
    let body: String = items
        .iter()
        .map(|(id, kind, target)| {
            format!(r#"<Relationship Id="{id}" Type="{REL_BASE}/{kind}" Target="{target}"/>"#)
        })
        .collect();
    format!(r#"{DECL}<Relationships xmlns="{RELS_NS}">{body}</Relationships>"#).into_bytes()
}

const CONTENT_TYPES: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#,
    r#"<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>"#,
    r#"<Default Extension="xml" ContentType="application/xml"/>"#,
    r#"<Override PartName="/ppt/presentation.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.presentation.main+xml"/>"#,
    r#"<Override PartName="/ppt/slides/slide1.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.slide+xml"/>"#,
    r#"<Override PartName="/ppt/slideLayouts/slideLayout1.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.slideLayout+xml"/>"#,
    r#"<Override PartName="/ppt/slideMasters/slideMaster1.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.slideMaster+xml"/>"#,
    r#"<Override PartName="/ppt/notesSlides/notesSlide1.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.notesSlide+xml"/>"#,
    r#"</Types>"#
);

pub fn template_package() -> Package {
    let mut pkg = Package::default();
    pkg.put("[Content_Types].xml", CONTENT_TYPES.as_bytes().to_vec());
    pkg.put(
        "_rels/.rels",
        rels(&[("rId1", "officeDocument", "ppt/presentation.xml")]),
    );
    pkg.put(
        "ppt/presentation.xml",
        format!(
            r#"{DECL}<p:presentation {NS}><p:sldMasterIdLst><p:sldMasterId id="2147483648" r:id="rId1"/></p:sldMasterIdLst><p:sldIdLst><p:sldId id="256" r:id="rId2"/></p:sldIdLst><p:sldSz cx="9144000" cy="6858000"/><p:notesSz cx="6858000" cy="9144000"/></p:presentation>"#
        )
        .into_bytes(),
    );
    pkg.put(
        "ppt/_rels/presentation.xml.rels",
        rels(&[
            ("rId1", "slideMaster", "slideMasters/slideMaster1.xml"),
            ("rId2", "slide", "slides/slide1.xml"),
        ]),
    );
    pkg.put(
        "ppt/slideMasters/slideMaster1.xml",
        format!(r#"{DECL}<p:sldMaster {NS}><p:cSld><p:spTree/></p:cSld></p:sldMaster>"#).into_bytes(),
    );
    pkg.put(
        "ppt/slideMasters/_rels/slideMaster1.xml.rels",
        rels(&[("rId1", "slideLayout", "../slideLayouts/slideLayout1.xml")]),
    );
    pkg.put(
        "ppt/slideLayouts/slideLayout1.xml",
        format!(r#"{DECL}<p:sldLayout {NS}><p:cSld><p:spTree/></p:cSld></p:sldLayout>"#).into_bytes(),
    );
    pkg.put(
        "ppt/slideLayouts/_rels/slideLayout1.xml.rels",
        rels(&[("rId1", "slideMaster", "../slideMasters/slideMaster1.xml")]),
    );
    pkg.put("ppt/slides/slide1.xml", slide_xml().into_bytes());
    pkg.put(
        "ppt/slides/_rels/slide1.xml.rels",
        rels(&[
            ("rId1", "slideLayout", "../slideLayouts/slideLayout1.xml"),
            ("rId2", "image", "../media/image1.png"),
            ("rId3", "image", "../media/image2.png"),
            ("rId4", "notesSlide", "../notesSlides/notesSlide1.xml"),
        ]),
    );
    pkg.put(
        "ppt/notesSlides/notesSlide1.xml",
        format!(r#"{DECL}<p:notes {NS}><p:cSld><p:spTree/></p:cSld></p:notes>"#).into_bytes(),
    );
    pkg.put(
        "ppt/notesSlides/_rels/notesSlide1.xml.rels",
        rels(&[("rId1", "slide", "../slides/slide1.xml")]),
    );
    pkg.put("ppt/media/image1.png", b"chart placeholder".to_vec());
    pkg.put("ppt/media/image2.png", b"logo".to_vec());
    pkg
}

pub fn write_template(dir: &Path) -> PathBuf {
    let path = dir.join("template.pptx");
    template_package().save(&path).unwrap();
    path
}

/// Consecutive Mondays from 2026-01-05.
pub fn weeks(values: &[f64]) -> Vec<WeeklyMetric> {
    let start = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
    values
        .iter()
        .enumerate()
        .map(|(i, v)| WeeklyMetric {
            week_start: start + Duration::weeks(i as i64),
            value: *v,
        })
        .collect()
}

pub fn brand(name: &str, price: f64, count: f64, users: f64) -> BrandMetric {
    BrandMetric {
        brand_name: name.to_string(),
        total_count: count,
        unique_user_count: users,
        total_price: price,
        ..BrandMetric::default()
    }
}

/// A client with every section populated.
pub fn client(key: &str, name: &str) -> ClientRecord {
    ClientRecord {
        group_key: key.to_string(),
        display_name: name.to_string(),
        login: weeks(&[10.0, 11.0, 15.0]),
        purchase: weeks(&[0.0, 7.0, 0.0]),
        summary: Some(SummaryMetric {
            period_start: Some("2026/01/01".into()),
            period_end: Some("2026/01/31".into()),
            registration_users: Some("1234".into()),
            mau: Some("567".into()),
            distribution_total: Some("8901234".into()),
            purchase_amount: Some("9000000".into()),
        }),
        brands: vec![
            brand("B", 5000.0, 10.0, 5.0),
            brand("ブランド名七字", 12000.0, 30.0, 20.0),
            brand("C", 100.0, 1.0, 1.0),
        ],
    }
}

/// The four dashboard exports for clients c1 (`Alpha`) and c2, in a layout
/// matching the default column maps. c2 has no purchase rows and appears
/// first in the summary.
pub fn write_inputs(dir: &Path) -> Vec<PathBuf> {
    let files = [
        (
            "login_weekly.csv",
            "client_id,company_name,week_start_date,weekly_login_users\n\
             c1,Alpha,2026-01-05,10\n\
             c1,Alpha,2026-01-12,11\n\
             c1,Alpha,2026-01-19,15\n\
             c2,株式会社Y,2026-01-05,3\n\
             c2,株式会社Y,2026-01-12,4\n\
             c2,株式会社Y,2026-01-19,5\n",
        ),
        (
            "purchase_weekly.csv",
            "client_id,company_name,week_start,weekly_purchase_count\n\
             c1,Alpha,2026-01-12,7\n",
        ),
        (
            "brand_sales.csv",
            "client_id,client_name,brand_name,total_count,unique_user_count,total_price\n\
             c1,Alpha,Cafe,30,20,\"12,000\"\n\
             c1,Alpha,Books,10,5,5000\n\
             c2,株式会社Y,Cinema,2,2,3600\n",
        ),
        (
            "client_summary.csv",
            "client_id,client_name,period_start,period_end,first_registration_users,mau,product_distribution_total,total_purchase_amount\n\
             c2,株式会社Y（申込企業：株式会社Z）,2026/01/01,2026/01/31,12,5,3600,4000\n\
             c1,Alpha,2026/01/01,2026/01/31,1234,567,8901234,9000000\n",
        ),
    ];
    files
        .iter()
        .map(|(name, content)| {
            let path = dir.join(name);
            std::fs::write(&path, content).unwrap();
            path
        })
        .collect()
}
