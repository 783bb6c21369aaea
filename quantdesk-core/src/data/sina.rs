//! Index membership from Sina Finance's "newest component" pages.
//!
//! The page lists members in the `NewStockTable` table, one row per stock,
//! with the 6-digit code in the first cell. Lists span several pages; pages
//! are read until one adds no new code.

use super::constituents::MembershipSource;
use super::http::HttpClient;
use super::provider::DataError;
use super::series::Symbol;
use regex::Regex;
use std::collections::BTreeSet;

const COMPONENT_URL: &str =
    "https://vip.stock.finance.sina.com.cn/corp/go.php/vII_NewestComponent/indexid";
const MAX_PAGES: usize = 30;
const CODE_CELL: &str = r"<td[^>]*>\s*(?:<[^>]+>\s*)*(\d{6})\s*(?:<[^>]+>\s*)*</td>";

pub struct SinaMembership {
    http: HttpClient,
}

impl SinaMembership {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }
}

/// Member codes on one component page, in page order.
pub fn parse_component_page(html: &str, code_cell: &Regex) -> Vec<String> {
    let Some(start) = html.find("NewStockTable") else {
        return Vec::new();
    };
    let table = &html[start..];
    let table = table.find("</table>").map_or(table, |end| &table[..end]);
    code_cell
        .captures_iter(table)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Read pages in order until one contributes no unseen code.
fn collect_members(
    mut page: impl FnMut(usize) -> Result<Vec<String>, DataError>,
) -> Result<Vec<String>, DataError> {
    let mut seen = BTreeSet::new();
    let mut members = Vec::new();
    for index in 1..=MAX_PAGES {
        let before = members.len();
        for code in page(index)? {
            if seen.insert(code.clone()) {
                members.push(code);
            }
        }
        if members.len() == before {
            break;
        }
    }
    Ok(members)
}

impl MembershipSource for SinaMembership {
    fn members(&self, index: &Symbol) -> Result<Vec<Symbol>, DataError> {
        let code_cell = Regex::new(CODE_CELL)
            .map_err(|e| DataError::Other(format!("component pattern: {e}")))?;
        let url = format!("{COMPONENT_URL}/{}.phtml", index.as_str());

        let codes = collect_members(|page| {
            let html = self
                .http
                .get_text(&url, &[("page", page.to_string())], None)?;
            let codes = parse_component_page(&html, &code_cell);
            tracing::debug!(%index, page, codes = codes.len(), "component page");
            Ok(codes)
        })?;

        tracing::info!(%index, members = codes.len(), "index membership fetched");
        codes.into_iter().map(Symbol::new).collect()
    }
}
