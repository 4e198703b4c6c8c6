//! `careline verify`: Send the verification prompt to a patient.

use super::process::load_directory;
use super::runtime::{self, CliResult};
use careline_core::{StateData, StaticPatientDirectory};
use std::path::Path;
use std::sync::Arc;

pub async fn run(config_path: Option<&Path>, phone: &str, patients: Option<&Path>) -> CliResult {
    let config = runtime::load_config(config_path)?;
    let directory = match patients {
        Some(path) => load_directory(path)?,
        None => StaticPatientDirectory::new(),
    };
    let rt = runtime::build(&config, Arc::new(directory)).await?;

    let state = rt.processor.start_verification(phone).await?;
    println!("✅ Verification prompt sent to {phone}");
    println!("  State:    {}", state.id);
    println!("  Patient:  {}", state.patient_id);
    if let StateData::Verification {
        triggered_by_message_id: Some(id),
        ..
    } = &state.state_data
    {
        println!("  Message:  {id}");
    }
    println!("  Expires:  {}", state.expires_at.format("%Y-%m-%d %H:%M UTC"));
    Ok(())
}
