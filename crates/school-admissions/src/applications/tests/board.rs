use super::common::*;
use crate::applications::domain::{ApplicationId, ApplicationStatus};
use crate::applications::{export_csv, ApplicantBoard};

#[test]
fn pending_actions_lists_undecided_oldest_first() {
    let board = board(vec![
        application("a3", ApplicationStatus::Reviewed, 3),
        application("a1", ApplicationStatus::New, 1),
        application("a2", ApplicationStatus::Accepted, 2),
        application("a4", ApplicationStatus::Rejected, 4),
    ]);

    let ids: Vec<&str> = board
        .pending_actions()
        .into_iter()
        .map(|record| record.id.0.as_str())
        .collect();
    assert_eq!(ids, vec!["a1", "a3"]);
    assert_eq!(board.with_status(ApplicationStatus::Rejected).len(), 1);
}

#[tokio::test]
async fn load_reads_the_school_applications_newest_first() {
    let store = seeded_store(&[
        application("a1", ApplicationStatus::New, 1),
        application("a2", ApplicationStatus::New, 2),
    ]);

    let board = ApplicantBoard::load(store.as_ref(), &school_id())
        .await
        .expect("board loads");
    assert_eq!(board.records()[0].id, ApplicationId("a2".to_string()));
    assert_eq!(board.records().len(), 2);
}

#[test]
fn csv_export_has_header_and_one_row_per_application() {
    let mut accepted = application("a2", ApplicationStatus::Accepted, 2);
    accepted.notes = Some("Sibling attends, priority, waitlist".to_string());
    let board = board(vec![application("a1", ApplicationStatus::New, 1), accepted]);

    let csv = export_csv(&board).expect("export succeeds");
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(
        lines[0],
        "application_id,applicant,email,status,submitted_at,notes"
    );
    assert_eq!(lines.len(), 3);
    assert!(lines[1].starts_with("a1,Applicant a1,a1@family.test,new,2025-03-01T09:00:00+00:00"));
    assert!(lines[2].ends_with("\"Sibling attends, priority, waitlist\""));
}
