//! End-to-end cascade scenarios driven by a mock device and a scripted LLM.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine as _;

use tapwright::{
    ActionKind, AgentConfig, DecisionEngine, DecisionMethod, DeviceInfo, DeviceSession,
    LlmProvider, LogicalPoint, SessionController, TapwrightError, TapwrightResult, TouchStep,
    VerificationStatus, WaitOptions, WindowSize,
};

// ── Test doubles ────────────────────────────────────────────────────────────

struct MockDevice {
    page_source: Mutex<String>,
    window: WindowSize,
    screenshot_b64: String,
    taps: Mutex<Vec<LogicalPoint>>,
    page_source_calls: AtomicU32,
    screenshot_calls: AtomicU32,
}

impl MockDevice {
    fn new(page_source: &str, window: WindowSize, screenshot_png: Vec<u8>) -> Self {
        Self {
            page_source: Mutex::new(page_source.to_string()),
            window,
            screenshot_b64: base64::engine::general_purpose::STANDARD.encode(screenshot_png),
            taps: Mutex::new(Vec::new()),
            page_source_calls: AtomicU32::new(0),
            screenshot_calls: AtomicU32::new(0),
        }
    }

    fn taps(&self) -> Vec<LogicalPoint> {
        self.taps.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceSession for MockDevice {
    async fn get_page_source(&self) -> TapwrightResult<String> {
        self.page_source_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.page_source.lock().unwrap().clone())
    }

    async fn get_current_activity(&self) -> TapwrightResult<String> {
        Ok("com.example.MainActivity".to_string())
    }

    async fn get_window_size(&self) -> TapwrightResult<WindowSize> {
        Ok(self.window)
    }

    async fn take_screenshot(&self) -> TapwrightResult<String> {
        self.screenshot_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.screenshot_b64.clone())
    }

    async fn tap(&self, point: LogicalPoint) -> TapwrightResult<()> {
        self.taps.lock().unwrap().push(point);
        Ok(())
    }

    async fn long_press(&self, point: LogicalPoint, _duration_ms: u64) -> TapwrightResult<()> {
        self.taps.lock().unwrap().push(point);
        Ok(())
    }

    async fn swipe_gesture(&self, _steps: Vec<TouchStep>) -> TapwrightResult<()> {
        Ok(())
    }

    async fn multi_touch(&self, _fingers: Vec<Vec<TouchStep>>) -> TapwrightResult<()> {
        Ok(())
    }

    async fn type_keys(&self, _keys: &[String]) -> TapwrightResult<()> {
        Ok(())
    }

    async fn pause(&self, _ms: u64) -> TapwrightResult<()> {
        Ok(())
    }

    fn capabilities(&self) -> DeviceInfo {
        DeviceInfo {
            platform: "Android".to_string(),
            platform_version: Some("14".to_string()),
            device_name: Some("emulator".to_string()),
        }
    }
}

struct ScriptedLlm {
    text: Mutex<VecDeque<String>>,
    vision: Mutex<VecDeque<String>>,
    text_calls: AtomicU32,
    vision_calls: AtomicU32,
}

impl ScriptedLlm {
    fn new(text: Vec<&str>, vision: Vec<&str>) -> Self {
        Self {
            text: Mutex::new(text.into_iter().map(String::from).collect()),
            vision: Mutex::new(vision.into_iter().map(String::from).collect()),
            text_calls: AtomicU32::new(0),
            vision_calls: AtomicU32::new(0),
        }
    }

    fn total_calls(&self) -> u32 {
        self.text_calls.load(Ordering::SeqCst) + self.vision_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn query(&self, _prompt: &str, _system: Option<&str>) -> TapwrightResult<String> {
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        self.text
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| TapwrightError::Llm("no scripted text response left".into()))
    }

    async fn query_with_vision(
        &self,
        _prompt: &str,
        _image_base64: &str,
        _system: Option<&str>,
    ) -> TapwrightResult<String> {
        self.vision_calls.fetch_add(1, Ordering::SeqCst);
        self.vision
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| TapwrightError::Llm("no scripted vision response left".into()))
    }
}

// ── Fixtures ────────────────────────────────────────────────────────────────

fn png(width: u32, height: u32) -> Vec<u8> {
    let canvas = image::RgbaImage::from_pixel(width, height, image::Rgba([30, 30, 30, 255]));
    let mut out = Vec::new();
    image::DynamicImage::ImageRgba8(canvas)
        .write_to(
            &mut std::io::Cursor::new(&mut out),
            image::ImageFormat::Png,
        )
        .unwrap();
    out
}

/// Ten nodes; index 7 is the clickable login button, index 9 a second
/// clickable button below it.
fn two_button_source() -> String {
    let mut nodes = String::from("<hierarchy rotation=\"0\">\n");
    for i in 0..7 {
        nodes.push_str(&format!(
            "<node text=\"filler {i}\" class=\"android.widget.TextView\" bounds=\"[0,{y}][50,{y2}]\"/>\n",
            y = i * 20,
            y2 = i * 20 + 10,
        ));
    }
    nodes.push_str(
        "<node text=\"Login\" class=\"android.widget.Button\" clickable=\"true\" bounds=\"[100,200][300,260]\"/>\n",
    );
    nodes.push_str("<node text=\"spacer\" class=\"android.widget.TextView\"/>\n");
    nodes.push_str(
        "<node text=\"Sign up\" class=\"android.widget.Button\" clickable=\"true\" bounds=\"[100,300][300,360]\"/>\n",
    );
    nodes.push_str("</hierarchy>");
    nodes
}

fn no_clickables_source() -> String {
    "<hierarchy><node text=\"just text\" class=\"android.widget.TextView\" bounds=\"[0,0][100,50]\"/></hierarchy>".to_string()
}

fn quiet_config() -> AgentConfig {
    AgentConfig::default()
}

fn controller(device: Arc<MockDevice>, llm: Arc<ScriptedLlm>, config: AgentConfig) -> SessionController {
    SessionController::new(device, llm, config)
}

// ── Scenario S1: tier 1 success, high confidence, no fallback ───────────────

#[tokio::test]
async fn s1_hierarchy_high_confidence() {
    let device = Arc::new(MockDevice::new(
        &two_button_source(),
        WindowSize { width: 400, height: 800 },
        png(400, 800),
    ));
    let llm = Arc::new(ScriptedLlm::new(
        vec![r#"{"action":"click","element_id":"7","confidence":0.95,"reasoning":"the login button"}"#],
        vec![],
    ));
    let mut ctl = controller(device.clone(), llm.clone(), quiet_config());

    ctl.start_session("login flow").await.unwrap();
    let step = ctl.execute("tap the login button").await.unwrap();

    assert_eq!(device.taps(), vec![LogicalPoint::new(200, 230)]);
    assert_eq!(step.method, Some(DecisionMethod::Hierarchy));
    assert_eq!(step.action, ActionKind::Click);
    assert!(step.success);
    assert_eq!(llm.total_calls(), 1);

    let session = ctl.stop_session(true).await.unwrap();
    assert_eq!(session.steps.len(), 1);
    assert_eq!(session.success, Some(true));
}

// ── Scenario S2: tier 1 low confidence, tier 2 succeeds ────────────────────

#[tokio::test]
async fn s2_low_confidence_falls_back_to_tagging() {
    let device = Arc::new(MockDevice::new(
        &two_button_source(),
        WindowSize { width: 400, height: 800 },
        png(400, 800),
    ));
    let llm = Arc::new(ScriptedLlm::new(
        vec![r#"{"action":"click","element_id":"7","confidence":0.4,"reasoning":"unsure"}"#],
        vec![r#"{"action":"click","tag_id":2,"confidence":0.85,"reasoning":"circle 2 is the target"}"#],
    ));
    let mut ctl = controller(device.clone(), llm.clone(), quiet_config());

    ctl.start_session("login flow").await.unwrap();
    let step = ctl.execute("tap the sign up button").await.unwrap();

    // Tag 1 -> element "7", tag 2 -> element "9" (the second clickable);
    // center of [100,300][300,360] is (200,330).
    assert_eq!(device.taps(), vec![LogicalPoint::new(200, 330)]);
    assert_eq!(step.method, Some(DecisionMethod::VisionTagging));
    assert_eq!(llm.total_calls(), 2);
    assert_eq!(step.target.as_ref().unwrap().element_id, "9");
}

// ── Scenario S3: high-DPI grid overlay correctness ─────────────────────────

#[tokio::test]
async fn s3_grid_overlay_high_dpi() {
    let device = Arc::new(MockDevice::new(
        &no_clickables_source(),
        WindowSize { width: 390, height: 844 },
        png(1284, 2778),
    ));
    // Tier 1 unparseable, tier 2 skipped (no taggable elements), tier 3 hits.
    let llm = Arc::new(ScriptedLlm::new(
        vec!["I have no idea what to press here."],
        vec![r#"{"action":"click","grid_position":"E5","confidence":0.7,"reasoning":"target sits in E5"}"#],
    ));
    let mut ctl = controller(device.clone(), llm.clone(), quiet_config());

    ctl.start_session("grid").await.unwrap();
    let step = ctl.execute("tap the middle thing").await.unwrap();

    let taps = device.taps();
    assert_eq!(taps.len(), 1);
    assert!((taps[0].x - 175).abs() <= 1, "x = {}", taps[0].x);
    assert!((taps[0].y - 379).abs() <= 1, "y = {}", taps[0].y);
    assert_eq!(step.method, Some(DecisionMethod::GridOverlay));
}

// ── Scenario S4: pure vision only with percentage coordinates ──────────────

#[tokio::test]
async fn s4_pure_vision_only_decision_reads_no_tree() {
    let device = Arc::new(MockDevice::new(
        &two_button_source(),
        WindowSize { width: 375, height: 812 },
        png(375, 812),
    ));
    let llm = Arc::new(ScriptedLlm::new(
        vec![],
        vec![r#"{"element":"Login button","location":{"x_percent":50,"y_percent":85},"action":"click","confidence":0.75,"reasoning":"bottom center"}"#],
    ));
    let mut config = quiet_config();
    config.vision.pure_vision_only = true;

    let engine = DecisionEngine::new(device.clone(), llm.clone(), config);
    let decided = engine.decide("click login", &[]).await.unwrap();

    assert_eq!(
        decided.decision.coordinates,
        Some(LogicalPoint::new(187, 690))
    );
    assert_eq!(decided.decision.method, DecisionMethod::PureVision);
    assert!(decided.target.is_none());
    // Exactly one snapshot and one LLM call; the accessibility tree is never
    // queried on this path.
    assert_eq!(device.page_source_calls.load(Ordering::SeqCst), 0);
    assert_eq!(device.screenshot_calls.load(Ordering::SeqCst), 1);
    assert_eq!(llm.total_calls(), 1);
}

#[tokio::test]
async fn s4_pure_vision_tap_lands_on_floored_pixels() {
    let device = Arc::new(MockDevice::new(
        &two_button_source(),
        WindowSize { width: 375, height: 812 },
        png(375, 812),
    ));
    let llm = Arc::new(ScriptedLlm::new(
        vec![],
        vec![r#"{"element":"Login button","location":{"x_percent":50,"y_percent":85},"action":"click","confidence":0.75,"reasoning":"bottom center"}"#],
    ));
    let mut config = quiet_config();
    config.vision.pure_vision_only = true;
    let mut ctl = controller(device.clone(), llm, config);

    ctl.start_session("pure vision").await.unwrap();
    let step = ctl.execute("click login").await.unwrap();

    assert_eq!(device.taps(), vec![LogicalPoint::new(187, 690)]);
    assert_eq!(step.method, Some(DecisionMethod::PureVision));
}

// ── Scenario S5: every tier fails ──────────────────────────────────────────

#[tokio::test]
async fn s5_all_tiers_exhausted() {
    let device = Arc::new(MockDevice::new(
        &no_clickables_source(),
        WindowSize { width: 400, height: 800 },
        png(400, 800),
    ));
    let llm = Arc::new(ScriptedLlm::new(
        vec!["total garbage"],
        vec![
            "still garbage",
            r#"{"element":"?","location":{"x_percent":10,"y_percent":10},"action":"click","confidence":0.3,"reasoning":"guessing"}"#,
        ],
    ));
    let mut ctl = controller(device.clone(), llm.clone(), quiet_config());

    ctl.start_session("doomed").await.unwrap();
    let err = ctl.execute("tap something").await.unwrap_err();

    assert!(matches!(err, TapwrightError::Confidence(_)), "{err}");
    assert!(device.taps().is_empty());
    // At most four LLM queries per execute; tier 2 was skipped before its
    // query because nothing on screen is taggable.
    assert!(llm.total_calls() <= 4);
    assert_eq!(llm.total_calls(), 3);

    let session = ctl.stop_session(false).await.unwrap();
    assert_eq!(session.steps.len(), 1);
    assert!(!session.steps[0].success);
    assert!(session.steps[0]
        .error
        .as_deref()
        .unwrap()
        .contains("below minimum"));
}

// ── Scenario S6: verification as wait ──────────────────────────────────────

#[tokio::test]
async fn s6_execute_and_wait_polls_without_recording() {
    let device = Arc::new(MockDevice::new(
        &two_button_source(),
        WindowSize { width: 400, height: 800 },
        png(400, 800),
    ));
    let fail = r#"{"passed":false,"assertions":[],"issues":["not yet"],"confidence":0.8}"#;
    let pass = r#"{"passed":true,"assertions":["home visible"],"issues":[],"confidence":0.9}"#;
    let llm = Arc::new(ScriptedLlm::new(
        vec![
            r#"{"action":"click","element_id":"7","confidence":0.9,"reasoning":"login"}"#,
            fail,
            fail,
            fail,
            pass,
        ],
        vec![],
    ));
    let mut ctl = controller(device.clone(), llm.clone(), quiet_config());

    ctl.start_session("login then wait").await.unwrap();
    let passed = ctl
        .execute_and_wait(
            "tap login",
            "home screen visible",
            WaitOptions {
                timeout_ms: 5000,
                poll_ms: 20,
            },
        )
        .await
        .unwrap();

    assert!(passed);
    let session = ctl.stop_session(true).await.unwrap();
    assert_eq!(session.steps.len(), 1);
    // The one-shot wait helper never mutates recorded verifications.
    assert!(session.verifications.is_empty());
}

// ── Session lifecycle and assert bookkeeping ───────────────────────────────

#[tokio::test]
async fn operations_require_an_open_session() {
    let device = Arc::new(MockDevice::new(
        &two_button_source(),
        WindowSize { width: 400, height: 800 },
        png(400, 800),
    ));
    let llm = Arc::new(ScriptedLlm::new(vec![], vec![]));
    let mut ctl = controller(device, llm, quiet_config());

    assert!(matches!(
        ctl.execute("tap login").await.unwrap_err(),
        TapwrightError::Session(_)
    ));
    assert!(matches!(
        ctl.assert("anything").await.unwrap_err(),
        TapwrightError::Session(_)
    ));

    ctl.start_session("t").await.unwrap();
    ctl.stop_session(true).await.unwrap();
    assert!(matches!(
        ctl.execute("tap login").await.unwrap_err(),
        TapwrightError::Session(_)
    ));
}

#[tokio::test]
async fn assert_records_verifications_and_never_throws_on_negative() {
    let device = Arc::new(MockDevice::new(
        &two_button_source(),
        WindowSize { width: 400, height: 800 },
        png(400, 800),
    ));
    let llm = Arc::new(ScriptedLlm::new(
        vec![
            r#"{"passed":false,"assertions":[],"issues":["wrong screen"],"confidence":0.9}"#,
            "not json at all",
            r#"{"passed":true,"assertions":["ok"],"issues":[],"confidence":0.95}"#,
        ],
        vec![],
    ));
    let mut ctl = controller(device, llm, quiet_config());
    ctl.start_session("verify").await.unwrap();

    assert!(!ctl.assert("home visible").await.unwrap());
    assert!(!ctl.assert("home visible").await.unwrap());
    assert!(ctl.assert("home visible").await.unwrap());

    let session = ctl.stop_session(true).await.unwrap();
    assert_eq!(session.verifications.len(), 3);
    assert_eq!(session.verifications[0].status, VerificationStatus::Failed);
    assert_eq!(session.verifications[1].status, VerificationStatus::Error);
    assert_eq!(session.verifications[2].status, VerificationStatus::Passed);
    assert_eq!(session.verifications[0].issues, vec!["wrong screen"]);
}

#[tokio::test]
async fn element_not_found_triggers_fallback() {
    let device = Arc::new(MockDevice::new(
        &two_button_source(),
        WindowSize { width: 400, height: 800 },
        png(400, 800),
    ));
    // Tier 1 names an element that does not exist; tier 2 rescues.
    let llm = Arc::new(ScriptedLlm::new(
        vec![r#"{"action":"click","element_id":"99","confidence":0.9,"reasoning":"ghost"}"#],
        vec![r#"{"action":"click","tag_id":1,"confidence":0.9,"reasoning":"circle 1"}"#],
    ));
    let mut ctl = controller(device.clone(), llm.clone(), quiet_config());

    ctl.start_session("ghost").await.unwrap();
    let step = ctl.execute("tap login").await.unwrap();

    assert_eq!(step.method, Some(DecisionMethod::VisionTagging));
    assert_eq!(device.taps(), vec![LogicalPoint::new(200, 230)]);
}

#[tokio::test]
async fn undefined_confidence_does_not_fall_back() {
    let device = Arc::new(MockDevice::new(
        &two_button_source(),
        WindowSize { width: 400, height: 800 },
        png(400, 800),
    ));
    // The model omits confidence entirely: no low-confidence fallback.
    let llm = Arc::new(ScriptedLlm::new(
        vec![r#"{"action":"click","element_id":"7","reasoning":"login button"}"#],
        vec![],
    ));
    let mut ctl = controller(device.clone(), llm.clone(), quiet_config());

    ctl.start_session("t").await.unwrap();
    let step = ctl.execute("tap login").await.unwrap();

    assert_eq!(step.method, Some(DecisionMethod::Hierarchy));
    assert_eq!(llm.total_calls(), 1);
    assert_eq!(device.taps(), vec![LogicalPoint::new(200, 230)]);
}

#[tokio::test]
async fn artifacts_written_per_step_and_on_stop() {
    let dir = tempfile::tempdir().unwrap();
    let device = Arc::new(MockDevice::new(
        &two_button_source(),
        WindowSize { width: 400, height: 800 },
        png(400, 800),
    ));
    let llm = Arc::new(ScriptedLlm::new(
        vec![r#"{"action":"click","element_id":"7","confidence":0.9,"reasoning":"login"}"#],
        vec![],
    ));
    let mut config = quiet_config();
    config.artifacts_dir = Some(dir.path().to_path_buf());
    let mut ctl = controller(device, llm, config);

    ctl.start_session("artifacts").await.unwrap();
    let step = ctl.execute("tap login").await.unwrap();
    assert!(step.screenshot_before.as_ref().unwrap().exists());
    assert!(step.screenshot_after.as_ref().unwrap().exists());
    assert!(step
        .screenshot_before
        .as_ref()
        .unwrap()
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("step_1_"));

    let session = ctl.stop_session(true).await.unwrap();
    let report = dir.path().join(format!("session_{}.json", session.id));
    assert!(report.exists());
    let parsed: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(report).unwrap()).unwrap();
    assert_eq!(parsed["steps"].as_array().unwrap().len(), 1);
}
