//! Figures behind the analytics page.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::applications::{ApplicationRecord, ApplicationStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdmissionsSummary {
    pub total: usize,
    pub by_status: BTreeMap<&'static str, usize>,
    pub awaiting_decision: usize,
    /// Accepted over accepted + rejected; `None` until something has been decided.
    pub acceptance_rate: Option<f32>,
    pub daily_submissions: Vec<DailySubmissions>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DailySubmissions {
    pub date: NaiveDate,
    pub count: usize,
}

pub fn summarize(records: &[ApplicationRecord]) -> AdmissionsSummary {
    let mut by_status: BTreeMap<&'static str, usize> = ApplicationStatus::ALL
        .into_iter()
        .map(|status| (status.label(), 0))
        .collect();
    let mut per_day: BTreeMap<NaiveDate, usize> = BTreeMap::new();

    for record in records {
        *by_status.entry(record.status.label()).or_default() += 1;
        *per_day.entry(record.submitted_at.date_naive()).or_default() += 1;
    }

    let count = |status: ApplicationStatus| by_status.get(status.label()).copied().unwrap_or(0);
    let accepted = count(ApplicationStatus::Accepted);
    let decided = accepted + count(ApplicationStatus::Rejected);
    let acceptance_rate = (decided > 0).then(|| accepted as f32 / decided as f32);
    let awaiting_decision = count(ApplicationStatus::New) + count(ApplicationStatus::Reviewed);

    AdmissionsSummary {
        total: records.len(),
        by_status,
        awaiting_decision,
        acceptance_rate,
        daily_submissions: per_day
            .into_iter()
            .map(|(date, count)| DailySubmissions { date, count })
            .collect(),
    }
}
