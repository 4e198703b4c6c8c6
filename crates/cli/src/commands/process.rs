//! `careline process`: Run inbound messages through the pipeline.

use super::runtime::{self, CliResult};
use careline_agent::{MessageProcessor, ProcessingOutcome};
use careline_core::{PatientContext, StaticPatientDirectory};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn run(
    config_path: Option<&Path>,
    phone: &str,
    message: Option<String>,
    patients: Option<&Path>,
    json: bool,
) -> CliResult {
    let config = runtime::load_config(config_path)?;
    let directory = match patients {
        Some(path) => load_directory(path)?,
        None => StaticPatientDirectory::new(),
    };
    let rt = runtime::build(&config, Arc::new(directory)).await?;

    if let Some(text) = message {
        handle(&rt.processor, phone, &text, json).await?;
    } else {
        eprintln!("  Reading messages from {phone}, one per line. Ctrl+D to finish.");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            handle(&rt.processor, phone, text, json).await?;
        }
    }

    let queued = rt.queue.drain();
    if !queued.is_empty() {
        eprintln!();
        eprintln!("  {} message(s) queued for redelivery:", queued.len());
        for item in &queued {
            eprintln!(
                "    [{}] {} ({})",
                item.priority.as_str(),
                item.message,
                item.reason().unwrap_or("unspecified")
            );
        }
    }

    Ok(())
}

async fn handle(processor: &MessageProcessor, phone: &str, text: &str, json: bool) -> CliResult {
    let outcome = processor.process(phone, text).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome_json(&outcome))?);
    } else {
        println!("{}", outcome.reply);
        eprintln!(
            "  intent={} confidence={:.2} path={:?} generated={} escalated={}",
            outcome.intent,
            outcome.confidence,
            outcome.path,
            outcome.used_generation,
            outcome.escalated
        );
    }
    Ok(())
}

/// Patient contexts keyed by phone number.
pub(super) fn load_directory(path: &Path) -> CliResult<StaticPatientDirectory> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    let patients: BTreeMap<String, PatientContext> = serde_json::from_str(&raw)
        .map_err(|e| format!("Invalid patient file {}: {e}", path.display()))?;
    Ok(patients
        .into_iter()
        .fold(StaticPatientDirectory::new(), |dir, (phone, ctx)| {
            dir.with_patient(phone, ctx)
        }))
}

fn outcome_json(outcome: &ProcessingOutcome) -> serde_json::Value {
    serde_json::json!({
        "state_id": outcome.state_id,
        "patient_id": outcome.patient_id,
        "reply": outcome.reply,
        "intent": outcome.intent,
        "confidence": outcome.confidence,
        "entities": outcome.entities,
        "sentiment": outcome.sentiment,
        "path": format!("{:?}", outcome.path).to_lowercase(),
        "used_generation": outcome.used_generation,
        "escalated": outcome.escalated,
        "emergency": outcome.safety.is_emergency,
        "emergency_indicators": outcome.safety.indicators,
        "generation": outcome.generation,
        "context": outcome.context,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn patient_file_parses() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "081234567890": {{
                    "patient_id": "p-1",
                    "patient": {{ "name": "Ibu Sari", "verification_status": "verified" }},
                    "active_reminders": [{{ "id": "r-1", "medication_name": "Morfin", "scheduled_time": "08:00" }}]
                }}
            }}"#
        )
        .unwrap();
        assert!(load_directory(file.path()).is_ok());
    }

    #[test]
    fn bad_patient_file_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = load_directory(file.path()).unwrap_err();
        assert!(err.to_string().contains("Invalid patient file"));
    }
}
