use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use common::{DashboardStats, DiagnosisJob, DiagnosisResult, JobSummary, StatusUpdate};
use medrag_client::{Notice, NoticeKind, PollSnapshot};

fn clip(text: &str, width: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(width).collect();
    if chars.next().is_some() {
        format!("{}…", head)
    } else {
        head
    }
}

pub fn case_table(cases: &[JobSummary]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["ID", "Patient", "Status", "Symptoms", "Diagnosis", "Created"]);

    for case in cases {
        let diagnosis = case
            .diagnosis
            .as_ref()
            .and_then(DiagnosisResult::primary_diagnosis)
            .unwrap_or_default();
        let created = case
            .created_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();

        table.add_row(vec![
            case.id.to_string(),
            case.patient_name.clone().unwrap_or_default(),
            case.status.to_string(),
            clip(case.symptoms.as_deref().unwrap_or(""), 40),
            clip(&diagnosis, 40),
            created,
        ]);
    }

    table
}

pub fn stats_table(stats: &DashboardStats) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["Cases", "Count"]);
    for (label, count) in [
        ("Total", stats.total_cases),
        ("Pending", stats.pending_cases),
        ("Diagnosed", stats.diagnosed_cases),
        ("Recent", stats.recent_cases),
    ] {
        table.add_row(vec![label.to_string(), count.to_string()]);
    }
    table
}

pub fn print_job(job: &DiagnosisJob) {
    println!("Diagnosis {}:", job.id);
    println!("  Status:   {}", job.status);
    if let Some(progress) = job.progress {
        println!("  Progress: {}%", progress);
    }
    if let Some(ref message) = job.status_message {
        println!("  Message:  {}", message);
    }
    if let Some(patient) = job.detail_str("patient_name") {
        println!("  Patient:  {}", patient);
    }
    println!("  Created:  {}", job.created_at.format("%Y-%m-%d %H:%M:%S"));

    match job.result {
        Some(ref result) => {
            if let Some(primary) = result.primary_diagnosis() {
                println!("  Primary:  {}", primary);
            }
            println!();
            match result {
                DiagnosisResult::Structured(value) => {
                    let pretty = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
                    println!("{}", pretty);
                }
                DiagnosisResult::Text(text) => println!("{}", text),
            }
        }
        None => println!("  No diagnosis yet."),
    }
}

pub fn print_status(update: &StatusUpdate) {
    let progress = update
        .progress
        .map(|p| format!(" {}%", p.min(100)))
        .unwrap_or_default();
    match update.message {
        Some(ref message) => println!("{}{} - {}", update.status, progress, message),
        None => println!("{}{}", update.status, progress),
    }
}

/// One line per visible change while watching.
pub fn progress_line(snapshot: &PollSnapshot) -> String {
    let job = &snapshot.job;
    let progress = job.progress.map(|p| format!("{:>3}%", p)).unwrap_or_else(|| "  -%".into());
    let message = job.status_message.as_deref().unwrap_or("");
    format!("[{}] {} {}", progress, job.status, message).trim_end().to_string()
}

pub fn print_notice(notice: &Notice) {
    let marker = match notice.kind {
        NoticeKind::Success => "ok",
        NoticeKind::Error => "error",
        NoticeKind::Info => "info",
    };
    eprintln!("[{}] {}", marker, notice.message);
}
