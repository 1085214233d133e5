use std::cmp::Ordering;

use regex::Regex;

use crate::types::{BrandMetric, WeeklyMetric};

/// Stable ranking by total price, highest first. Ties keep input order.
pub fn rank_brands(brands: &[BrandMetric]) -> Vec<BrandMetric> {
    let mut ranked = brands.to_vec();
    ranked.sort_by(|a, b| {
        b.total_price
            .partial_cmp(&a.total_price)
            .unwrap_or(Ordering::Equal)
    });
    ranked
}

/// Keep the first `n` ranked brands and fold the rest into one trailing
/// `other_label` row. No row is added when nothing is left over.
pub fn top_n_with_other(ranked: &[BrandMetric], n: usize, other_label: &str) -> Vec<BrandMetric> {
    if ranked.len() <= n {
        return ranked.to_vec();
    }
    let (kept, rest) = ranked.split_at(n);
    let mut out = kept.to_vec();
    let other = rest.iter().fold(
        BrandMetric {
            brand_name: other_label.to_string(),
            ..BrandMetric::default()
        },
        |mut acc, b| {
            acc.total_count += b.total_count;
            acc.unique_user_count += b.unique_user_count;
            acc.total_price += b.total_price;
            acc.discounted_price_sum += b.discounted_price_sum;
            acc.discount_sum += b.discount_sum;
            acc
        },
    );
    out.push(other);
    out
}

/// The table and donut views of one client's brands.
#[derive(Debug, Clone, PartialEq)]
pub struct BrandViews {
    pub table: Vec<BrandMetric>,
    pub donut: Vec<BrandMetric>,
}

pub fn brand_views(brands: &[BrandMetric], top_n: usize, donut_max: usize, other_label: &str) -> BrandViews {
    let ranked = rank_brands(brands);
    BrandViews {
        table: top_n_with_other(&ranked, top_n, other_label),
        donut: top_n_with_other(&ranked, donut_max, other_label),
    }
}

/// Remove the bracketed applicant annotation from a company name.
///
/// Brackets opened inside an annotation are closed with it, and stripping
/// repeats until nothing matches, so a cleaned name cleans to itself.
pub fn clean_title(name: &str, strip: &Regex) -> String {
    let mut current = name.to_string();
    loop {
        let next = strip_once(&current, strip);
        if next == current {
            return next.trim().to_string();
        }
        current = next;
    }
}

fn strip_once(name: &str, strip: &Regex) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last = 0;
    for m in strip.find_iter(name) {
        if m.start() < last {
            continue;
        }
        out.push_str(&name[last..m.start()]);
        last = balanced_end(name, m.start(), m.end());
    }
    out.push_str(&name[last..]);
    out
}

/// Push `end` past the closers of brackets opened within `name[start..end]`.
fn balanced_end(name: &str, start: usize, end: usize) -> usize {
    let depth = |c: char| match c {
        '（' | '(' => 1,
        '）' | ')' => -1,
        _ => 0,
    };
    let mut open: i32 = name[start..end].chars().map(depth).sum();
    let mut stop = end;
    for c in name[end..].chars() {
        if open <= 0 {
            break;
        }
        open += depth(c);
        stop += c.len_utf8();
    }
    stop
}

pub fn series_total(series: &[WeeklyMetric]) -> f64 {
    series.iter().map(|m| m.value).sum()
}
