// Static configuration of a report variant.
//
// Column names, classification keywords, placeholder fragments and numeric
// thresholds all live here so an upstream rename only needs a TOML edit.
// A `ReportConfig` is built once and handed to every stage by reference.
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ReportError, Result};
use crate::types::{MonthlyRole, Role};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub tasks_dir: PathBuf,
    pub report: SlideReportConfig,
    pub classification: Vec<KeywordRule<Role>>,
    pub columns: ColumnTable,
    pub placeholders: Vec<PlaceholderRule>,
    pub monthly: MonthlyConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlideReportConfig {
    pub template: PathBuf,
    pub slide_index: usize,
    pub output_prefix: String,
    pub top_n: usize,
    pub donut_max: usize,
    pub table_max_rows: usize,
    pub other_label: String,
    pub partial_success: bool,
    pub title_strip_pattern: String,
}

/// One priority-ordered classification rule: a file whose lower-cased name
/// contains any keyword belongs to `role`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordRule<R> {
    pub role: R,
    pub keywords: Vec<String>,
}

impl<R> KeywordRule<R> {
    pub fn new(role: R, keywords: &[&str]) -> Self {
        Self {
            role,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// Source column names for one role.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ColumnMap {
    pub group_key: String,
    pub company_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Canonical field name -> source column.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnTable {
    pub login: ColumnMap,
    pub purchase: ColumnMap,
    pub brand: ColumnMap,
    pub summary: ColumnMap,
}

impl ColumnTable {
    pub fn for_role(&self, role: Role) -> &ColumnMap {
        match role {
            Role::Login => &self.login,
            Role::Purchase => &self.purchase,
            Role::Brand => &self.brand,
            Role::Summary => &self.summary,
        }
    }
}

/// Named regions of the slide template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placeholder {
    Title,
    Period,
    RegistrationUsers,
    Mau,
    Distribution,
    RankingLabel,
    PurchaseChartLabel,
    LoginChartLabel,
    BrandChartLabel,
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Placeholder::Title => "title",
            Placeholder::Period => "period",
            Placeholder::RegistrationUsers => "registration_users",
            Placeholder::Mau => "mau",
            Placeholder::Distribution => "distribution",
            Placeholder::RankingLabel => "ranking_label",
            Placeholder::PurchaseChartLabel => "purchase_chart_label",
            Placeholder::LoginChartLabel => "login_chart_label",
            Placeholder::BrandChartLabel => "brand_chart_label",
        })
    }
}

/// A shape matches when its text contains every `all` fragment and, if
/// `any` is non-empty, at least one `any` fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceholderRule {
    pub key: Placeholder,
    #[serde(default)]
    pub any: Vec<String>,
    #[serde(default)]
    pub all: Vec<String>,
}

impl PlaceholderRule {
    pub fn new(key: Placeholder, any: &[&str], all: &[&str]) -> Self {
        Self {
            key,
            any: any.iter().map(|s| s.to_string()).collect(),
            all: all.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn matches(&self, text: &str) -> bool {
        if self.any.is_empty() && self.all.is_empty() {
            return false;
        }
        self.all.iter().all(|f| text.contains(f.as_str()))
            && (self.any.is_empty() || self.any.iter().any(|f| text.contains(f.as_str())))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonthlyConfig {
    pub classification: Vec<KeywordRule<MonthlyRole>>,
    pub campaign_columns: Vec<String>,
    pub discount_columns: Vec<String>,
    pub point_columns: Vec<String>,
    pub result_columns: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn column_map(
    group_key: &str,
    company_name: &str,
    date: Option<&str>,
    value: Option<&str>,
    extra: &[(&str, &str)],
) -> ColumnMap {
    ColumnMap {
        group_key: group_key.to_string(),
        company_name: company_name.to_string(),
        date: date.map(str::to_string),
        value: value.map(str::to_string),
        extra: extra
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            tasks_dir: PathBuf::from("tasks"),
            report: SlideReportConfig::default(),
            classification: vec![
                KeywordRule::new(Role::Login, &["login", "ログイン"]),
                KeywordRule::new(Role::Purchase, &["purchase", "購入"]),
                KeywordRule::new(Role::Brand, &["brand", "ブランド", "販売"]),
                KeywordRule::new(Role::Summary, &["summary", "サマリ"]),
            ],
            columns: ColumnTable::default(),
            placeholders: default_placeholders(),
            monthly: MonthlyConfig::default(),
        }
    }
}

impl Default for SlideReportConfig {
    fn default() -> Self {
        Self {
            template: PathBuf::from("template/報告資料_v3.pptx"),
            slide_index: 0,
            output_prefix: "JCB報告資料".to_string(),
            top_n: 10,
            donut_max: 8,
            table_max_rows: 10,
            other_label: "その他".to_string(),
            partial_success: true,
            title_strip_pattern: r"\s*[（(]申込企業[：:][^）)]*[）)]".to_string(),
        }
    }
}

impl Default for ColumnTable {
    fn default() -> Self {
        Self {
            login: column_map(
                "client_id",
                "company_name",
                Some("week_start_date"),
                Some("weekly_login_users"),
                &[],
            ),
            purchase: column_map(
                "client_id",
                "company_name",
                Some("week_start"),
                Some("weekly_purchase_count"),
                &[],
            ),
            brand: column_map(
                "client_id",
                "client_name",
                None,
                None,
                &[
                    ("brand_name", "brand_name"),
                    ("total_count", "total_count"),
                    ("unique_user_count", "unique_user_count"),
                    ("total_price", "total_price"),
                ],
            ),
            summary: column_map(
                "client_id",
                "client_name",
                None,
                None,
                &[
                    ("period_start", "period_start"),
                    ("period_end", "period_end"),
                    ("registration_users", "first_registration_users"),
                    ("mau", "mau"),
                    ("distribution_total", "product_distribution_total"),
                    ("purchase_amount", "total_purchase_amount"),
                ],
            ),
        }
    }
}

fn default_placeholders() -> Vec<PlaceholderRule> {
    use Placeholder::*;
    vec![
        PlaceholderRule::new(Title, &["ご報告資料"], &[]),
        PlaceholderRule::new(Period, &[], &["期間", "yyyy"]),
        PlaceholderRule::new(RegistrationUsers, &["初回登録ユーザー数"], &[]),
        PlaceholderRule::new(Mau, &["MAU"], &[]),
        PlaceholderRule::new(Distribution, &["流通総額", "総購入金額"], &[]),
        PlaceholderRule::new(RankingLabel, &["購入上位", "TOP10"], &[]),
        PlaceholderRule::new(PurchaseChartLabel, &["購入数推移"], &[]),
        PlaceholderRule::new(LoginChartLabel, &["ログインユーザー数推移"], &[]),
        PlaceholderRule::new(BrandChartLabel, &["ブランド"], &[]),
    ]
}

impl Default for MonthlyConfig {
    fn default() -> Self {
        Self {
            classification: vec![
                KeywordRule::new(MonthlyRole::Campaign, &["商品×割引率", "campaign"]),
                KeywordRule::new(MonthlyRole::Discount, &["割引率一覧", "discount"]),
                KeywordRule::new(MonthlyRole::Point, &["ポイント利用", "point"]),
            ],
            campaign_columns: strings(&[
                "brand_name",
                "item_name",
                "item_code",
                "discount_rate",
                "issue_count",
                "item_price",
                "total_item_price",
                "purchase_price",
                "total_purchase_amount",
                "discount_amount",
                "total_discount_amount",
            ]),
            discount_columns: strings(&[
                "ブランド",
                "商品",
                "gx_item_type",
                "gx_item_code",
                "等価価格",
                "割引率",
                "割引価格",
                "おすすめ度",
                "掲載状況",
                "案件個別_掲載可",
                "マスタ_掲載可",
                "更新日",
                "project_id",
                "client_id",
            ]),
            point_columns: strings(&[
                "client_id",
                "company_name",
                "month",
                "granted_points",
                "used_points",
                "remaining_points",
                "avg_user_usage",
                "point_usage_rate_percent",
                "monthly_point_users",
                "point_consumption_rate_percent",
            ]),
            result_columns: strings(&[
                "client_id",
                "company_name",
                "month",
                "granted_points",
                "used_points",
            ]),
        }
    }
}

impl ReportConfig {
    /// Load from a TOML file, or fall back to the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)?;
                toml::from_str::<ReportConfig>(&content)
                    .map_err(|e| ReportError::Config(format!("{}: {}", p.display(), e)))?
            }
            None => ReportConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.report.top_n == 0 {
            return Err(ReportError::Config("report.top_n must be at least 1".into()));
        }
        if self.report.donut_max == 0 {
            return Err(ReportError::Config("report.donut_max must be at least 1".into()));
        }
        if self.report.table_max_rows == 0 {
            return Err(ReportError::Config("report.table_max_rows must be at least 1".into()));
        }
        self.title_strip_regex()?;
        if !self.columns.brand.extra.contains_key("brand_name") {
            return Err(ReportError::Config(
                "columns.brand.extra must map `brand_name`".into(),
            ));
        }
        for role in [Role::Login, Role::Purchase] {
            let map = self.columns.for_role(role);
            if map.date.is_none() || map.value.is_none() {
                return Err(ReportError::Config(format!(
                    "columns.{} needs both `date` and `value`",
                    role
                )));
            }
        }
        // The calculation formulas address columns by letter.
        if self.monthly.campaign_columns.len() != 11 {
            return Err(ReportError::Config(
                "monthly.campaign_columns must list exactly 11 columns (A..K)".into(),
            ));
        }
        if self.monthly.result_columns.len() != 5 {
            return Err(ReportError::Config(
                "monthly.result_columns must list exactly 5 columns (A..E)".into(),
            ));
        }
        for role in Role::ALL {
            if !self.classification.iter().any(|r| r.role == role) {
                return Err(ReportError::Config(format!(
                    "no classification rule for role `{}`",
                    role
                )));
            }
        }
        Ok(())
    }

    pub fn title_strip_regex(&self) -> Result<Regex> {
        Regex::new(&self.report.title_strip_pattern)
            .map_err(|e| ReportError::Config(format!("report.title_strip_pattern: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_file_matches_defaults() {
        let text = include_str!("../report.example.toml");
        let parsed: ReportConfig = toml::from_str(text).unwrap();
        assert_eq!(parsed, ReportConfig::default());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let parsed: ReportConfig = toml::from_str("[report]\ntop_n = 5\n").unwrap();
        assert_eq!(parsed.report.top_n, 5);
        assert_eq!(parsed.report.donut_max, 8);
        assert_eq!(parsed.columns, ColumnTable::default());
        parsed.validate().unwrap();
    }

    #[test]
    fn renamed_column_only_touches_config() {
        let parsed: ReportConfig = toml::from_str(
            r#"
[columns.login]
group_key = "cid"
company_name = "name"
date = "week"
value = "users"
"#,
        )
        .unwrap();
        assert_eq!(parsed.columns.login.value.as_deref(), Some("users"));
        assert_eq!(parsed.columns.purchase, ColumnTable::default().purchase);
    }

    #[test]
    fn validate_rejects_zero_top_n() {
        let mut config = ReportConfig::default();
        config.report.top_n = 0;
        assert!(matches!(config.validate(), Err(ReportError::Config(_))));
        let mut config = ReportConfig::default();
        config.report.table_max_rows = 0;
        assert!(matches!(config.validate(), Err(ReportError::Config(_))));
    }

    #[test]
    fn validate_rejects_bad_pattern() {
        let mut config = ReportConfig::default();
        config.report.title_strip_pattern = "(".into();
        assert!(matches!(config.validate(), Err(ReportError::Config(_))));
    }

    #[test]
    fn validate_rejects_login_without_date() {
        let mut config = ReportConfig::default();
        config.columns.login.date = None;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("columns.login"));
    }

    #[test]
    fn placeholder_rule_all_and_any() {
        let rule = PlaceholderRule::new(Placeholder::Period, &[], &["期間", "yyyy"]);
        assert!(rule.matches("期間：yyyy/mm/dd〜yyyy/mm/dd"));
        assert!(!rule.matches("期間：2026/01/01"));
        let rule = PlaceholderRule::new(Placeholder::Distribution, &["流通総額", "総購入金額"], &[]);
        assert!(rule.matches("(総購入金額：xx円)"));
        assert!(!rule.matches("MAU"));
    }
}
