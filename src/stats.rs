use chrono::{Datelike, NaiveDate};

use crate::komoot::TourSummary;
use crate::storage::LastTour;

pub const LAST_TOURS_SHOWN: usize = 5;

/// Distance and riding time accumulated over one calendar month.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MonthStats {
    pub distance_m: f64,
    pub duration_s: f64,
}

impl MonthStats {
    pub fn distance_km(&self) -> f64 {
        round1(self.distance_m / 1000.0)
    }

    /// Whole hours and remaining minutes.
    pub fn hours_minutes(&self) -> (u64, u64) {
        let secs = self.duration_s.max(0.0) as u64;
        (secs / 3600, (secs % 3600) / 60)
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// Sum the tours whose date falls in the month of `today`.
///
/// Dates are compared on their `YYYY-MM` prefix, i.e. in the tour's own
/// timezone.
pub fn month_stats(tours: &[TourSummary], today: NaiveDate) -> MonthStats {
    let prefix = format!("{:04}-{:02}", today.year(), today.month());
    tours
        .iter()
        .filter(|t| t.date.starts_with(&prefix))
        .fold(MonthStats::default(), |acc, t| MonthStats {
            distance_m: acc.distance_m + t.distance,
            duration_s: acc.duration_s + t.duration,
        })
}

/// The first `limit` tours in sidebar form.
pub fn last_tours(tours: &[TourSummary], limit: usize) -> Vec<LastTour> {
    tours
        .iter()
        .take(limit)
        .map(|t| LastTour {
            name: t.name.clone().unwrap_or_else(|| "Untitled".to_string()),
            date: t.date.get(..10).unwrap_or(&t.date).to_string(),
            dist: round1(t.distance / 1000.0),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tour(id: u64, date: &str, distance: f64, duration: f64) -> TourSummary {
        TourSummary {
            id,
            name: Some(format!("Tour {id}")),
            date: date.to_string(),
            distance,
            duration,
        }
    }

    #[test]
    fn only_current_month_counts() {
        let tours = vec![
            tour(1, "2024-05-20T08:00:00.000+02:00", 42_340.0, 5_400.0),
            tour(2, "2024-05-02T18:30:00.000+02:00", 10_000.0, 2_100.0),
            tour(3, "2024-04-30T09:00:00.000+02:00", 99_000.0, 9_000.0),
        ];
        let today = NaiveDate::from_ymd_opt(2024, 5, 31).unwrap();
        let stats = month_stats(&tours, today);
        assert_eq!(stats.distance_km(), 52.3);
        assert_eq!(stats.hours_minutes(), (2, 5));
    }

    #[test]
    fn empty_month() {
        let today = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let stats = month_stats(&[], today);
        assert_eq!(stats, MonthStats::default());
        assert_eq!(stats.hours_minutes(), (0, 0));
    }

    #[test]
    fn last_tours_are_capped_and_formatted() {
        let tours: Vec<TourSummary> = (0..8)
            .map(|i| tour(i, "2024-05-01T08:00:00Z", 12_345.0, 0.0))
            .collect();
        let last = last_tours(&tours, LAST_TOURS_SHOWN);
        assert_eq!(last.len(), 5);
        assert_eq!(last[0].date, "2024-05-01");
        assert_eq!(last[0].dist, 12.3);
        assert_eq!(last[4].name, "Tour 4");
    }

    #[test]
    fn unnamed_tour_and_short_date() {
        let mut t = tour(1, "2024", 0.0, 0.0);
        t.name = None;
        let last = last_tours(&[t], 5);
        assert_eq!(last[0].name, "Untitled");
        assert_eq!(last[0].date, "2024");
    }
}
