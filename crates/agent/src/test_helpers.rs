//! Shared test helpers for agent tests.

use async_trait::async_trait;
use careline_core::{
    CollaboratorError, GenerationRequest, GenerationResponse, Notification, Notifier, Provider,
    ProviderError, Usage,
};
use std::collections::VecDeque;
use std::sync::Mutex;

type Scripted = Result<String, ProviderError>;

/// A mock provider that returns scripted responses in order.
///
/// Once the script is exhausted the last entry repeats. Every request is
/// recorded so tests can assert on call counts and prompt shape.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Scripted>>,
    last: Mutex<Option<Scripted>>,
    requests: Mutex<Vec<GenerationRequest>>,
    call_count: Mutex<usize>,
    system_role: bool,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            call_count: Mutex::new(0),
            system_role: true,
        }
    }

    pub fn always_text(text: &str) -> Self {
        Self::new(vec![Ok(text.to_string())])
    }

    pub fn texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Ok(t.to_string())).collect())
    }

    pub fn always_err(error: ProviderError) -> Self {
        Self::new(vec![Err(error)])
    }

    pub fn without_system_role(mut self) -> Self {
        self.system_role = false;
        self
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted_mock"
    }

    fn supports_system_role(&self) -> bool {
        self.system_role
    }

    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, ProviderError> {
        *self.call_count.lock().unwrap() += 1;
        let model = request.model.clone();
        self.requests.lock().unwrap().push(request);

        let next = {
            let mut script = self.script.lock().unwrap();
            let mut last = self.last.lock().unwrap();
            match script.pop_front() {
                Some(entry) => {
                    *last = Some(entry.clone());
                    entry
                }
                None => last
                    .clone()
                    .expect("ScriptedProvider: empty script"),
            }
        };

        next.map(|content| make_response(&content, &model))
    }
}

pub fn make_response(content: &str, model: &str) -> GenerationResponse {
    GenerationResponse {
        content: content.to_string(),
        tokens_used: 15,
        model: model.to_string(),
        stop_reason: Some("stop".into()),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
    }
}

/// A notifier that records every notification.
#[derive(Default)]
pub struct CapturingNotifier {
    pub sent: Mutex<Vec<Notification>>,
}

impl CapturingNotifier {
    pub fn notifications(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for CapturingNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), CollaboratorError> {
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }
}
