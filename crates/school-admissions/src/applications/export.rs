use super::board::ApplicantBoard;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("failed to write csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("csv output was not valid utf-8")]
    Encoding,
}

/// Renders the board as CSV for download, one row per application.
pub fn export_csv(board: &ApplicantBoard) -> Result<String, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "application_id",
        "applicant",
        "email",
        "status",
        "submitted_at",
        "notes",
    ])?;

    for record in board.records() {
        let email = record
            .applicant
            .as_ref()
            .and_then(|profile| profile.email.as_deref())
            .unwrap_or_default();
        let submitted_at = record.submitted_at.to_rfc3339();
        writer.write_record([
            record.id.0.as_str(),
            record.applicant_name(),
            email,
            record.status.label(),
            submitted_at.as_str(),
            record.notes.as_deref().unwrap_or_default(),
        ])?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|err| ExportError::Csv(err.into_error().into()))?;
    String::from_utf8(bytes).map_err(|_| ExportError::Encoding)
}
