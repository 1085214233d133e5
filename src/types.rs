use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tabled::Tabled;

/// Semantic category of a dashboard export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Login,
    Purchase,
    Brand,
    Summary,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Login, Role::Purchase, Role::Brand, Role::Summary];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Login => "login",
            Role::Purchase => "purchase",
            Role::Brand => "brand",
            Role::Summary => "summary",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs of the monthly workbook report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonthlyRole {
    Campaign,
    Discount,
    Point,
}

impl fmt::Display for MonthlyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MonthlyRole::Campaign => "campaign",
            MonthlyRole::Discount => "discount",
            MonthlyRole::Point => "point",
        })
    }
}

/// A CSV row after column mapping, independent of the source column names.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRow {
    pub line: u64,
    pub group_key: String,
    pub company_name: String,
    pub date: Option<String>,
    pub value: Option<String>,
    pub extra: BTreeMap<String, String>,
}

impl CanonicalRow {
    pub fn extra(&self, field: &str) -> Option<&str> {
        self.extra.get(field).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeeklyMetric {
    pub week_start: NaiveDate,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct BrandMetric {
    pub brand_name: String,
    pub total_count: f64,
    pub unique_user_count: f64,
    pub total_price: f64,
    pub discounted_price_sum: f64,
    pub discount_sum: f64,
}

/// Pre-aggregated per-client figures, passed through verbatim.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SummaryMetric {
    pub period_start: Option<String>,
    pub period_end: Option<String>,
    pub registration_users: Option<String>,
    pub mau: Option<String>,
    pub distribution_total: Option<String>,
    pub purchase_amount: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientRecord {
    pub group_key: String,
    pub display_name: String,
    pub login: Vec<WeeklyMetric>,
    pub purchase: Vec<WeeklyMetric>,
    pub summary: Option<SummaryMetric>,
    pub brands: Vec<BrandMetric>,
}

/// One line of the console overview printed after a run.
#[derive(Debug, Serialize, Tabled, Clone)]
pub struct ClientResultRow {
    #[serde(rename = "Client")]
    #[tabled(rename = "Client")]
    pub client: String,
    #[serde(rename = "Status")]
    #[tabled(rename = "Status")]
    pub status: String,
    #[serde(rename = "LoginWeeks")]
    #[tabled(rename = "LoginWeeks")]
    pub login_weeks: usize,
    #[serde(rename = "PurchaseTotal")]
    #[tabled(rename = "PurchaseTotal")]
    pub purchase_total: String,
    #[serde(rename = "Brands")]
    #[tabled(rename = "Brands")]
    pub brands: usize,
}

/// Machine-readable record of one run, written next to the deck.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub period: String,
    pub task_dir: String,
    pub state: String,
    pub output: Option<String>,
    pub slides: usize,
    pub skipped: Vec<String>,
    pub clients: Vec<ClientResultRow>,
}

/// Record of one monthly workbook run.
#[derive(Debug, Serialize)]
pub struct MonthlySummary {
    pub period: String,
    pub task_dir: String,
    pub state: String,
    pub outputs: Vec<String>,
    pub skipped: Vec<String>,
}
