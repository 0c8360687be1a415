//! Session lifecycle and history.
//!
//! One session at a time per controller. Steps and verifications are
//! append-only; the session is sealed on stop and never reused. The
//! verification-as-wait primitive reuses the assert path one-shot, without
//! touching the recorded history.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::AgentConfig;
use crate::device::DeviceSession;
use crate::engine::decision::{ActionKind, Decided, DecisionEngine, DecisionMethod};
use crate::engine::dispatcher::ActionDispatcher;
use crate::errors::{TapwrightError, TapwrightResult};
use crate::llm::parser::{self, VerificationOutcome};
use crate::llm::prompts;
use crate::llm::provider::LlmProvider;
use crate::perception::observer::UiObserver;
use crate::perception::types::{CaptureMode, UIElement, UIState};

const HISTORY_WINDOW: usize = 5;
const DEFAULT_WAIT_TIMEOUT_MS: u64 = 5000;
const DEFAULT_WAIT_POLL_MS: u64 = 1000;

/// One recorded action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionStep {
    pub action: ActionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<DecisionMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<UIElement>,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_before: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_after: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Passed,
    Failed,
    Error,
}

/// One recorded assertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationPoint {
    pub condition: String,
    pub expected: bool,
    pub actual: bool,
    pub status: VerificationStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Aggregate result for one automation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub task: String,
    pub steps: Vec<ActionStep>,
    pub verifications: Vec<VerificationPoint>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub screenshots: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Session {
    fn new(task: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task,
            steps: Vec::new(),
            verifications: Vec::new(),
            started_at: chrono::Utc::now(),
            ended_at: None,
            duration_ms: None,
            success: None,
            screenshots: Vec::new(),
            logs: Vec::new(),
            metadata: serde_json::Map::new(),
        }
    }

    fn sealed(&self) -> bool {
        self.ended_at.is_some()
    }
}

pub struct WaitOptions {
    pub timeout_ms: u64,
    pub poll_ms: u64,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
            poll_ms: DEFAULT_WAIT_POLL_MS,
        }
    }
}

pub struct SessionController {
    device: Arc<dyn DeviceSession>,
    llm: Arc<dyn LlmProvider>,
    engine: DecisionEngine,
    dispatcher: ActionDispatcher,
    observer: UiObserver,
    config: AgentConfig,
    session: Option<Session>,
    /// Rolling `{action}-{reasoning}` lines fed back into prompts.
    action_history: Vec<String>,
}

impl SessionController {
    pub fn new(
        device: Arc<dyn DeviceSession>,
        llm: Arc<dyn LlmProvider>,
        config: AgentConfig,
    ) -> Self {
        let engine = DecisionEngine::new(device.clone(), llm.clone(), config.clone());
        let dispatcher = ActionDispatcher::new(device.clone(), config.artifacts_dir());
        let observer = UiObserver::new(device.clone());
        Self {
            device,
            llm,
            engine,
            dispatcher,
            observer,
            config,
            session: None,
            action_history: Vec::new(),
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Apply a new configuration to this controller and its engine.
    pub fn reconfigure(&mut self, config: AgentConfig) {
        self.engine.set_config(config.clone());
        self.dispatcher = ActionDispatcher::new(self.device.clone(), config.artifacts_dir());
        self.config = config;
    }

    pub fn current_session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Open a session. Takes an initial snapshot so the first decision has a
    /// warm activity to log against.
    pub async fn start_session(&mut self, task: &str) -> TapwrightResult<Session> {
        if self.session.as_ref().is_some_and(|s| !s.sealed()) {
            return Err(TapwrightError::Session(
                "a session is already open".into(),
            ));
        }

        let session = Session::new(task.to_string());
        tracing::info!(session_id = %session.id, task, "session started");
        self.action_history.clear();
        self.session = Some(session.clone());

        match self.observer.snapshot(CaptureMode::None, 0).await {
            Ok(state) => {
                tracing::info!(activity = %state.activity, elements = state.elements.len(), "initial snapshot");
            }
            Err(e) => {
                tracing::warn!(error = %e, "initial snapshot failed");
            }
        }

        Ok(session)
    }

    /// Decide and execute one instruction. Exactly one step is appended,
    /// success or failure.
    pub async fn execute(&mut self, instruction: &str) -> TapwrightResult<ActionStep> {
        self.require_open()?;
        tracing::info!(instruction, "execute");

        let decided = match self.engine.decide(instruction, &self.action_history).await {
            Ok(decided) => decided,
            Err(e) => {
                // Catastrophic: no decision at all. Record a sentinel step.
                let step = ActionStep {
                    action: ActionKind::Click,
                    method: None,
                    target: None,
                    parameters: serde_json::Map::new(),
                    timestamp: chrono::Utc::now(),
                    success: false,
                    error: Some(e.to_string()),
                    screenshot_before: None,
                    screenshot_after: None,
                };
                self.push_step(step);
                return Err(e);
            }
        };

        let Decided {
            decision, target, ..
        } = decided;

        let outcome = self.dispatcher.execute(&decision, target.as_ref()).await;
        let (success, error, before, after) = match &outcome {
            Ok((before, after)) => (true, None, before.clone(), after.clone()),
            Err(e) => (false, Some(e.to_string()), None, None),
        };

        let step = ActionStep {
            action: decision.action,
            method: Some(decision.method),
            target,
            parameters: decision.parameters.clone(),
            timestamp: chrono::Utc::now(),
            success,
            error,
            screenshot_before: before,
            screenshot_after: after,
        };
        self.push_step(step.clone());

        self.action_history.push(format!(
            "{}-{}",
            decision.action.as_str(),
            decision.reasoning
        ));
        if self.action_history.len() > HISTORY_WINDOW {
            self.action_history.remove(0);
        }

        outcome.map(|_| step)
    }

    /// Verify a natural-language condition and record the outcome. Never
    /// fails on a negative verdict; internal errors record an error point
    /// and return false.
    pub async fn assert(&mut self, condition: &str) -> TapwrightResult<bool> {
        self.require_open()?;
        tracing::info!(condition, "assert");

        let (actual, status, issues) = match self.verify_once(condition).await {
            Ok(outcome) => {
                let status = if outcome.passed {
                    VerificationStatus::Passed
                } else {
                    VerificationStatus::Failed
                };
                (outcome.passed, status, outcome.issues)
            }
            Err(e) => {
                tracing::warn!(error = %e, "verification errored");
                (false, VerificationStatus::Error, vec![e.to_string()])
            }
        };

        if let Some(session) = self.session.as_mut() {
            session.verifications.push(VerificationPoint {
                condition: condition.to_string(),
                expected: true,
                actual,
                status,
                issues,
                timestamp: chrono::Utc::now(),
            });
        }
        Ok(actual)
    }

    /// Poll a verification until it passes or the deadline elapses. One-shot:
    /// the session's recorded verifications are left untouched.
    pub async fn wait_for_condition(
        &mut self,
        condition: &str,
        options: WaitOptions,
    ) -> TapwrightResult<bool> {
        self.require_open()?;
        let deadline = Instant::now() + Duration::from_millis(options.timeout_ms);
        tracing::info!(condition, timeout_ms = options.timeout_ms, "wait for condition");

        loop {
            match self.verify_once(condition).await {
                Ok(outcome) if outcome.passed => return Ok(true),
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "verification poll errored");
                }
            }
            if Instant::now() >= deadline {
                tracing::info!(condition, "condition wait timed out");
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(options.poll_ms)).await;
        }
    }

    /// Execute, then use the condition as a post-action synchronization
    /// barrier.
    pub async fn execute_and_wait(
        &mut self,
        instruction: &str,
        condition: &str,
        options: WaitOptions,
    ) -> TapwrightResult<bool> {
        self.execute(instruction).await?;
        self.wait_for_condition(condition, options).await
    }

    /// Seal the session with the caller-supplied status and return it.
    pub async fn stop_session(&mut self, success: bool) -> TapwrightResult<Session> {
        let session = self
            .session
            .as_mut()
            .filter(|s| !s.sealed())
            .ok_or_else(|| TapwrightError::Session("no open session".into()))?;

        let ended = chrono::Utc::now();
        session.ended_at = Some(ended);
        session.duration_ms = Some((ended - session.started_at).num_milliseconds());
        session.success = Some(success);

        let sealed = session.clone();
        tracing::info!(
            session_id = %sealed.id,
            steps = sealed.steps.len(),
            verifications = sealed.verifications.len(),
            duration_ms = ?sealed.duration_ms,
            success,
            "session stopped"
        );

        if let Some(dir) = self.config.artifacts_dir() {
            if let Err(e) = persist_report(&dir, &sealed) {
                tracing::warn!(error = %e, "session report write failed");
            }
        }

        Ok(sealed)
    }

    /// Raw screenshot straight from the device.
    pub async fn take_screenshot(&self) -> TapwrightResult<String> {
        self.device.take_screenshot().await
    }

    /// Fresh snapshot of the current UI.
    pub async fn get_current_state(
        &self,
        include_screenshot: bool,
    ) -> TapwrightResult<UIState> {
        let mode = if include_screenshot {
            CaptureMode::Screenshot
        } else {
            CaptureMode::None
        };
        self.observer.snapshot(mode, 0).await
    }

    /// One verification pass: snapshot, prompt, parse. Does not record.
    async fn verify_once(&self, condition: &str) -> TapwrightResult<VerificationOutcome> {
        let state = self.observer.snapshot(CaptureMode::None, 0).await?;
        let prompt = prompts::verification_prompt(condition, &state);
        let raw = self.llm.query(&prompt, None).await?;
        parser::parse_verification(&raw)
    }

    fn require_open(&self) -> TapwrightResult<()> {
        match self.session.as_ref() {
            Some(s) if !s.sealed() => Ok(()),
            Some(_) => Err(TapwrightError::Session("session is closed".into())),
            None => Err(TapwrightError::Session(
                "no session started; call start_session first".into(),
            )),
        }
    }

    fn push_step(&mut self, step: ActionStep) {
        if let Some(session) = self.session.as_mut() {
            if let Some(p) = step.screenshot_before.clone() {
                session.screenshots.push(p);
            }
            if let Some(p) = step.screenshot_after.clone() {
                session.screenshots.push(p);
            }
            session.logs.push(format!(
                "step {}: {} ({})",
                session.steps.len() + 1,
                step.action.as_str(),
                if step.success { "ok" } else { "failed" },
            ));
            session.steps.push(step);
        }
    }
}

fn persist_report(dir: &std::path::Path, session: &Session) -> TapwrightResult<()> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("session_{}.json", session.id));
    let json = serde_json::to_string_pretty(session)?;
    std::fs::write(&path, json)?;
    tracing::info!(path = %path.display(), "session report written");
    Ok(())
}
