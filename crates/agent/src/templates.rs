//! Fixed reply templates, one per intent.
//!
//! The table is an exhaustive match over [`Intent`], so every intent has a
//! template and the `requires_generative` flag is decided in one place.
//! Accept, decline and unsubscribe replies never go through the generator.

use careline_core::{Intent, PatientContext};

/// Placeholder name when the patient is unknown.
pub const DEFAULT_SALUTATION: &str = "Bapak/Ibu";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseTemplate {
    pub template: &'static str,
    /// Whether a generated reply may replace the template.
    pub requires_generative: bool,
}

impl ResponseTemplate {
    const fn fixed(template: &'static str) -> Self {
        Self {
            template,
            requires_generative: false,
        }
    }

    const fn generative(template: &'static str) -> Self {
        Self {
            template,
            requires_generative: true,
        }
    }
}

/// Values substituted into `{name}`, `{medication}` and `{reminders}`.
#[derive(Debug, Clone)]
pub struct TemplateVars {
    pub name: String,
    pub medication: String,
    pub reminders: String,
}

impl Default for TemplateVars {
    fn default() -> Self {
        Self {
            name: DEFAULT_SALUTATION.to_string(),
            medication: "Anda".to_string(),
            reminders: "belum ada pengingat aktif".to_string(),
        }
    }
}

impl TemplateVars {
    pub fn from_patient(patient: Option<&PatientContext>) -> Self {
        let Some(ctx) = patient else {
            return Self::default();
        };
        let mut vars = Self::default();
        if !ctx.patient.name.trim().is_empty() {
            vars.name = ctx.patient.name.clone();
        }
        if let Some(first) = ctx.active_reminders.first() {
            vars.medication = first.medication_name.clone();
        }
        if !ctx.active_reminders.is_empty() {
            vars.reminders = ctx
                .active_reminders
                .iter()
                .map(|r| match &r.scheduled_time {
                    Some(at) => format!("{} pukul {at}", r.medication_name),
                    None => r.medication_name.clone(),
                })
                .collect::<Vec<_>>()
                .join(", ");
        }
        vars
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateTable;

impl TemplateTable {
    pub fn new() -> Self {
        Self
    }

    pub fn entry(&self, intent: Intent) -> ResponseTemplate {
        match intent {
            Intent::Accept => ResponseTemplate::fixed(
                "Terima kasih, {name}. Nomor Anda sudah terverifikasi. Kami akan mengirimkan pengingat minum obat melalui nomor ini.",
            ),
            Intent::Decline => ResponseTemplate::fixed(
                "Baik, {name}. Kami tidak akan mengirimkan pengingat ke nomor ini. Jika berubah pikiran, silakan hubungi relawan kami.",
            ),
            Intent::Unsubscribe => ResponseTemplate::fixed(
                "Baik, {name}. Anda sudah berhenti menerima pengingat. Terima kasih telah menggunakan layanan kami.",
            ),
            Intent::Emergency => ResponseTemplate::fixed(
                "{name}, jika ini keadaan darurat segera hubungi 119 atau datang ke IGD terdekat. Relawan kami sudah diberi tahu dan akan segera menghubungi Anda.",
            ),
            Intent::ConfirmTaken => ResponseTemplate::generative(
                "Terima kasih, {name}! Senang mendengar Anda sudah minum obat {medication}. Tetap jaga kesehatan ya.",
            ),
            Intent::ConfirmMissed => ResponseTemplate::generative(
                "Tidak apa-apa, {name}. Mohon minum obat {medication} jika masih sesuai jadwal, atau tanyakan kepada relawan kami bila ragu.",
            ),
            Intent::ConfirmLater => ResponseTemplate::generative(
                "Baik, {name}. Kami akan mengingatkan Anda lagi nanti.",
            ),
            Intent::Help => ResponseTemplate::generative(
                "Kami siap membantu, {name}. Relawan kami akan segera menghubungi Anda.",
            ),
            Intent::Inquiry => ResponseTemplate::generative(
                "Terima kasih atas pertanyaannya, {name}. Relawan kami akan membantu menjawab secepatnya.",
            ),
            Intent::ReminderInquiry => ResponseTemplate::generative(
                "{name}, jadwal pengingat Anda: {reminders}.",
            ),
            Intent::Unknown => ResponseTemplate::fixed(LOW_CONFIDENCE),
        }
    }

    pub fn render(&self, intent: Intent, vars: &TemplateVars) -> String {
        render(self.entry(intent).template, vars)
    }

    /// Opening message asking a patient to confirm this number.
    pub fn verification_prompt(&self, vars: &TemplateVars) -> String {
        render(VERIFICATION_PROMPT, vars)
    }

    /// Reply when the message could not be understood.
    pub fn low_confidence(&self, vars: &TemplateVars) -> String {
        render(LOW_CONFIDENCE, vars)
    }
}

const VERIFICATION_PROMPT: &str =
    "Halo {name}, kami dari layanan pendamping paliatif. Apakah Anda bersedia menerima pengingat minum obat melalui nomor ini? Balas YA untuk setuju atau TIDAK untuk menolak.";

const LOW_CONFIDENCE: &str =
    "Maaf, {name}, kami belum memahami pesan Anda. Bisa dijelaskan lagi? Relawan kami juga siap membantu.";

fn render(template: &str, vars: &TemplateVars) -> String {
    template
        .replace("{name}", &vars.name)
        .replace("{medication}", &vars.medication)
        .replace("{reminders}", &vars.reminders)
}
