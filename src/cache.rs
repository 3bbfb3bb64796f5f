//! Month-keyed booking cache.
//!
//! Entries hold every reservation scheduled in one calendar month and live for
//! a TTL measured from fetch time. Mutations invalidate the months they touch.
//! A failed refetch keeps the previous data so callers can still show it.
//! The cache is for display only; conflict decisions always go to the store.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::engine::EngineError;
use crate::model::Reservation;
use crate::observability::{CACHE_FETCH_ERRORS_TOTAL, CACHE_REQUESTS_TOTAL};
use crate::store::ReservationStore;

/// Calendar month, written `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonthKey {
    year: i32,
    month: u32,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|_| Self { year, month })
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn last_day(&self) -> NaiveDate {
        self.next()
            .first_day()
            .pred_opt()
            .unwrap_or(NaiveDate::MAX)
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for MonthKey {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EngineError::validation("INVALID_MONTH", format!("expected YYYY-MM, got {s:?}"));
        let (year, month) = s.split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        MonthKey::new(year, month).ok_or_else(invalid)
    }
}

struct Entry {
    reservations: Vec<Reservation>,
    fetched_at: Instant,
    /// Invalidated since fetch; data kept as last-known-good.
    stale: bool,
}

/// What the cache currently holds for a month, without fetching.
#[derive(Debug, Clone)]
pub struct CachedMonth {
    pub reservations: Vec<Reservation>,
    pub fresh: bool,
}

pub struct BookingCache {
    ttl: Duration,
    entries: DashMap<MonthKey, Entry>,
    /// One fetch per month at a time.
    flights: DashMap<MonthKey, Arc<tokio::sync::Mutex<()>>>,
    /// Bumped by every invalidation; a fetch that started under an older
    /// generation stores its result as stale.
    generations: DashMap<MonthKey, u64>,
    /// Month most recently requested through `get`; never swept.
    focused: Mutex<Option<MonthKey>>,
}

impl BookingCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
            flights: DashMap::new(),
            generations: DashMap::new(),
            focused: Mutex::new(None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Reservations scheduled in `month`, fetched from `store` when the entry is
    /// absent, expired or invalidated. Concurrent callers share one fetch.
    pub async fn get<S>(&self, store: &S, month: MonthKey) -> Result<Vec<Reservation>, EngineError>
    where
        S: ReservationStore + ?Sized,
    {
        self.set_focus(month);
        self.sweep();

        if let Some(hit) = self.fresh(month) {
            metrics::counter!(CACHE_REQUESTS_TOTAL, "result" => "hit").increment(1);
            debug!(%month, "booking cache hit");
            return Ok(hit);
        }

        let flight = self.flights.entry(month).or_default().clone();
        let _turn = flight.lock().await;
        // Whoever held the turn before us may have refreshed it.
        if let Some(hit) = self.fresh(month) {
            metrics::counter!(CACHE_REQUESTS_TOTAL, "result" => "hit").increment(1);
            return Ok(hit);
        }

        let result = if self.entries.contains_key(&month) { "stale" } else { "miss" };
        metrics::counter!(CACHE_REQUESTS_TOTAL, "result" => result).increment(1);

        let generation = self.generation(month);
        match store
            .list_reservations_by_date_range(month.first_day(), month.last_day())
            .await
        {
            Ok(reservations) => {
                let stale = self.generation(month) != generation;
                self.entries.insert(
                    month,
                    Entry {
                        reservations: reservations.clone(),
                        fetched_at: Instant::now(),
                        stale,
                    },
                );
                debug!(%month, count = reservations.len(), stale, "booking cache filled");
                Ok(reservations)
            }
            Err(e) => {
                metrics::counter!(CACHE_FETCH_ERRORS_TOTAL).increment(1);
                warn!(%month, error = %e, kept = self.entries.contains_key(&month), "booking cache fetch failed");
                Err(e)
            }
        }
    }

    /// Last data held for `month`, fresh or not. Never fetches.
    pub fn peek(&self, month: MonthKey) -> Option<CachedMonth> {
        self.entries.get(&month).map(|e| CachedMonth {
            reservations: e.reservations.clone(),
            fresh: self.is_fresh(&e),
        })
    }

    pub fn invalidate(&self, month: MonthKey) {
        *self.generations.entry(month).or_insert(0) += 1;
        if let Some(mut e) = self.entries.get_mut(&month) {
            e.stale = true;
        }
        debug!(%month, "booking cache invalidated");
    }

    /// Invalidate every month containing one of `dates`.
    pub fn invalidate_dates(&self, dates: impl IntoIterator<Item = NaiveDate>) {
        let months: HashSet<MonthKey> = dates.into_iter().map(MonthKey::from_date).collect();
        for month in months {
            self.invalidate(month);
        }
    }

    /// Drop entries past TTL, except the focused month.
    pub fn sweep(&self) {
        let focused = self.focus();
        self.entries
            .retain(|month, e| Some(*month) == focused || e.fetched_at.elapsed() <= self.ttl);
        self.flights
            .retain(|month, flight| self.entries.contains_key(month) || Arc::strong_count(flight) > 1);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn focus(&self) -> Option<MonthKey> {
        *self.focused.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_focus(&self, month: MonthKey) {
        *self.focused.lock().unwrap_or_else(|e| e.into_inner()) = Some(month);
    }

    fn generation(&self, month: MonthKey) -> u64 {
        self.generations.get(&month).map_or(0, |g| *g)
    }

    fn is_fresh(&self, e: &Entry) -> bool {
        !e.stale && e.fetched_at.elapsed() <= self.ttl
    }

    fn fresh(&self, month: MonthKey) -> Option<Vec<Reservation>> {
        let e = self.entries.get(&month)?;
        self.is_fresh(&e).then(|| e.reservations.clone())
    }
}
