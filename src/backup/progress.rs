use super::ProgressSample;
use tracing::info;

const BAR_LENGTH: usize = 20;

/// Renders `[#####...............] 25% | Copying name (5/20)`.
///
/// Returns `None` when the total is unknown, so nothing is logged rather than
/// a meaningless bar. The ratio is clamped because the total is only an
/// estimate and the copy may find more files than the count did.
pub fn format_progress(sample: &ProgressSample) -> Option<String> {
    if sample.total_files == 0 {
        return None;
    }

    let ratio = (sample.copied_files as f64 / sample.total_files as f64).min(1.0);
    let completed = (ratio * BAR_LENGTH as f64).round() as usize;
    let bar = format!("[{}{}]", "#".repeat(completed), ".".repeat(BAR_LENGTH - completed));

    Some(format!(
        "{} {:.0}% | Copying {} ({}/{})",
        bar,
        ratio * 100.0,
        sample.file_name,
        sample.copied_files,
        sample.total_files
    ))
}

/// Progress callback used by the sequencer: one log line per copied file.
pub fn log_progress(sample: &ProgressSample) {
    if let Some(line) = format_progress(sample) {
        info!("{}", line);
    }
}
