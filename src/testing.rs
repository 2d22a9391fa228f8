//! In-memory stand-ins for the client, webhook and push collaborators.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::client::{ClientError, SessionClient};
use crate::error::AppError;
use crate::notify::{PushNotifier, Webhook};
use crate::session::state::SessionState;
use crate::types::{MediaPayload, OutgoingContent, WebhookPayload};

/// Scriptable client. Owns the `SessionState` so `initialize` can emulate the
/// ready event a real engine would emit.
pub struct FakeClient {
    state: Arc<SessionState>,
    remote_state: Mutex<String>,
    state_error: Mutex<Option<String>>,
    init_results: Mutex<VecDeque<Result<(), String>>>,
    ready_on_init: AtomicBool,
    send_results: Mutex<VecDeque<Result<String, String>>>,
    hang_sends: AtomicBool,
    destroy_error: Mutex<Option<String>>,
    reject_error: Mutex<Option<String>>,
    media: Mutex<Result<Option<MediaPayload>, String>>,
    registered: AtomicBool,
    lookup_error: Mutex<Option<String>>,
    initialize_calls: AtomicUsize,
    state_checks: AtomicUsize,
    destroy_calls: AtomicUsize,
    send_calls: AtomicUsize,
    sent: Mutex<Vec<(String, OutgoingContent)>>,
}

impl FakeClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: SessionState::new(),
            remote_state: Mutex::new("CONNECTED".to_string()),
            state_error: Mutex::new(None),
            init_results: Mutex::new(VecDeque::new()),
            ready_on_init: AtomicBool::new(false),
            send_results: Mutex::new(VecDeque::new()),
            hang_sends: AtomicBool::new(false),
            destroy_error: Mutex::new(None),
            reject_error: Mutex::new(None),
            media: Mutex::new(Ok(None)),
            registered: AtomicBool::new(true),
            lookup_error: Mutex::new(None),
            initialize_calls: AtomicUsize::new(0),
            state_checks: AtomicUsize::new(0),
            destroy_calls: AtomicUsize::new(0),
            send_calls: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn state(&self) -> Arc<SessionState> {
        Arc::clone(&self.state)
    }

    pub fn set_remote_state(&self, s: &str) {
        *self.remote_state.lock().unwrap() = s.to_string();
    }

    pub fn fail_state_checks(&self, msg: &str) {
        *self.state_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn push_init_result(&self, r: Result<(), &str>) {
        self.init_results.lock().unwrap().push_back(r.map_err(str::to_string));
    }

    /// Successful `initialize` calls emit a ready transition.
    pub fn become_ready_on_init(&self) {
        self.ready_on_init.store(true, Ordering::SeqCst);
    }

    pub fn push_send_result(&self, r: Result<&str, &str>) {
        self.send_results
            .lock()
            .unwrap()
            .push_back(r.map(str::to_string).map_err(str::to_string));
    }

    pub fn hang_sends(&self) {
        self.hang_sends.store(true, Ordering::SeqCst);
    }

    pub fn fail_destroy(&self, msg: &str) {
        *self.destroy_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn fail_reject(&self, msg: &str) {
        *self.reject_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn set_media(&self, r: Result<Option<MediaPayload>, &str>) {
        *self.media.lock().unwrap() = r.map_err(str::to_string);
    }

    pub fn set_registered(&self, registered: bool) {
        self.registered.store(registered, Ordering::SeqCst);
    }

    pub fn fail_number_lookup(&self, msg: &str) {
        *self.lookup_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn initialize_calls(&self) -> usize {
        self.initialize_calls.load(Ordering::SeqCst)
    }

    pub fn state_checks(&self) -> usize {
        self.state_checks.load(Ordering::SeqCst)
    }

    pub fn destroy_calls(&self) -> usize {
        self.destroy_calls.load(Ordering::SeqCst)
    }

    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<(String, OutgoingContent)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionClient for FakeClient {
    async fn initialize(&self) -> Result<(), ClientError> {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        let result = self.init_results.lock().unwrap().pop_front().unwrap_or(Ok(()));
        match result {
            Ok(()) => {
                if self.ready_on_init.load(Ordering::SeqCst) {
                    self.state.mark_ready();
                }
                Ok(())
            }
            Err(e) => Err(ClientError(e)),
        }
    }

    async fn get_state(&self) -> Result<String, ClientError> {
        self.state_checks.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.state_error.lock().unwrap().clone() {
            return Err(ClientError(e));
        }
        Ok(self.remote_state.lock().unwrap().clone())
    }

    async fn send_message(
        &self,
        chat_id: &str,
        content: &OutgoingContent,
    ) -> Result<String, ClientError> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang_sends.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let result = self
            .send_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("msg-id".to_string()));
        match result {
            Ok(id) => {
                self.sent
                    .lock()
                    .unwrap()
                    .push((chat_id.to_string(), content.clone()));
                Ok(id)
            }
            Err(e) => Err(ClientError(e)),
        }
    }

    async fn destroy(&self) -> Result<(), ClientError> {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        match self.destroy_error.lock().unwrap().clone() {
            Some(e) => Err(ClientError(e)),
            None => Ok(()),
        }
    }

    async fn reject_call(&self, _call_id: &str) -> Result<(), ClientError> {
        match self.reject_error.lock().unwrap().clone() {
            Some(e) => Err(ClientError(e)),
            None => Ok(()),
        }
    }

    async fn download_media(&self, _message_id: &str) -> Result<Option<MediaPayload>, ClientError> {
        self.media.lock().unwrap().clone().map_err(ClientError)
    }

    async fn get_number_id(&self, chat_id: &str) -> Result<Option<String>, ClientError> {
        if let Some(e) = self.lookup_error.lock().unwrap().clone() {
            return Err(ClientError(e));
        }
        Ok(self
            .registered
            .load(Ordering::SeqCst)
            .then(|| chat_id.to_string()))
    }
}

#[derive(Default)]
pub struct RecordingWebhook {
    forwarded: Mutex<Vec<WebhookPayload>>,
    down_notices: Mutex<Vec<String>>,
    fail_with: Mutex<Option<String>>,
}

impl RecordingWebhook {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_with(&self, msg: &str) {
        *self.fail_with.lock().unwrap() = Some(msg.to_string());
    }

    pub fn forwarded(&self) -> Vec<WebhookPayload> {
        self.forwarded.lock().unwrap().clone()
    }

    pub fn down_notices(&self) -> Vec<String> {
        self.down_notices.lock().unwrap().clone()
    }
}

#[async_trait]
impl Webhook for RecordingWebhook {
    async fn forward(&self, payload: &WebhookPayload) -> Result<(), AppError> {
        if let Some(e) = self.fail_with.lock().unwrap().clone() {
            return Err(AppError::Startup(e));
        }
        self.forwarded.lock().unwrap().push(payload.clone());
        Ok(())
    }

    async fn notify_down(&self, reason: &str) {
        self.down_notices.lock().unwrap().push(reason.to_string());
    }
}

#[derive(Default)]
pub struct RecordingPush {
    pushes: Mutex<Vec<(String, String)>>,
}

impl RecordingPush {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn titles(&self) -> Vec<String> {
        self.pushes
            .lock()
            .unwrap()
            .iter()
            .map(|(t, _)| t.clone())
            .collect()
    }

    pub fn count(&self, title: &str) -> usize {
        self.titles().iter().filter(|t| t.as_str() == title).count()
    }
}

#[async_trait]
impl PushNotifier for RecordingPush {
    async fn push(&self, title: &str, body: &str) {
        self.pushes
            .lock()
            .unwrap()
            .push((title.to_string(), body.to_string()));
    }
}
