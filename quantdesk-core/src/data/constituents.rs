//! Index constituent fetches.
//!
//! Wraps a bar provider: a fetch for an index symbol looks up the index's
//! current members, fetches every member over the same range and tags each
//! row with the member code. Any member failure fails the whole index, so a
//! partial batch never advances the watermark past a member that was not
//! fetched.

use super::provider::{DataError, DataProvider, DataSource, FetchResult};
use super::series::{DateRange, Period, Symbol};
use std::collections::BTreeMap;

/// Where index membership comes from.
pub trait MembershipSource: Send + Sync {
    /// Current members of `index`. An index with no known members is an error.
    fn members(&self, index: &Symbol) -> Result<Vec<Symbol>, DataError>;
}

/// Fixed member lists, e.g. from configuration.
impl MembershipSource for BTreeMap<Symbol, Vec<Symbol>> {
    fn members(&self, index: &Symbol) -> Result<Vec<Symbol>, DataError> {
        self.get(index)
            .filter(|m| !m.is_empty())
            .cloned()
            .ok_or_else(|| DataError::SymbolNotFound {
                symbol: format!("{index} (no constituent list configured)"),
            })
    }
}

/// Asks `primary` first and uses `fallback` when it fails or finds nothing.
pub struct FallbackMembership<P, F> {
    primary: P,
    fallback: F,
}

impl<P, F> FallbackMembership<P, F> {
    pub fn new(primary: P, fallback: F) -> Self {
        Self { primary, fallback }
    }
}

impl<P: MembershipSource, F: MembershipSource> MembershipSource for FallbackMembership<P, F> {
    fn members(&self, index: &Symbol) -> Result<Vec<Symbol>, DataError> {
        match self.primary.members(index) {
            Ok(members) if !members.is_empty() => Ok(members),
            Ok(_) => {
                tracing::warn!(%index, "membership lookup returned no members, using fallback");
                self.fallback.members(index)
            }
            Err(e) => {
                tracing::warn!(%index, error = %e, "membership lookup failed, using fallback");
                self.fallback.members(index).map_err(|fallback_err| {
                    DataError::SymbolNotFound {
                        symbol: format!("{index} (lookup failed: {e}; {fallback_err})"),
                    }
                })
            }
        }
    }
}

pub struct ConstituentProvider<P, M> {
    inner: P,
    membership: M,
}

impl<P: DataProvider, M: MembershipSource> ConstituentProvider<P, M> {
    pub fn new(inner: P, membership: M) -> Self {
        Self { inner, membership }
    }
}

impl<P: DataProvider, M: MembershipSource> DataProvider for ConstituentProvider<P, M> {
    fn name(&self) -> &str {
        "index_constituents"
    }

    fn fetch(
        &self,
        symbol: &Symbol,
        period: Period,
        range: DateRange,
    ) -> Result<FetchResult, DataError> {
        let members = self.membership.members(symbol)?;
        tracing::debug!(index = %symbol, members = members.len(), "membership resolved");

        let mut rows = Vec::new();
        for member in &members {
            let fetched = self.inner.fetch(member, period, range).map_err(|e| {
                DataError::Other(format!("constituent {member} of {symbol}: {e}"))
            })?;
            tracing::debug!(
                index = %symbol,
                %member,
                rows = fetched.rows.len(),
                "constituent fetched"
            );
            rows.extend(
                fetched
                    .rows
                    .into_iter()
                    .map(|row| row.with_constituent(member.as_str())),
            );
        }

        Ok(FetchResult {
            symbol: symbol.clone(),
            rows,
            source: DataSource::Constituents,
        })
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }
}
