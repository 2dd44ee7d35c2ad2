#[cfg(all(target_os = "linux", not(test)))]
use notify_rust::{Notification, Timeout};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Desktop notification client for session lifecycle events
pub struct NotificationClient {
    #[cfg(all(target_os = "linux", not(test)))]
    timeout_seconds: u32,
    enabled: AtomicBool,
}

impl NotificationClient {
    #[cfg(all(target_os = "linux", not(test)))]
    pub fn new(timeout_seconds: u32, enabled: bool) -> Self {
        Self {
            timeout_seconds,
            enabled: AtomicBool::new(enabled),
        }
    }

    #[cfg(any(not(target_os = "linux"), test))]
    pub fn new(_timeout_seconds: u32, enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
        }
    }

    /// Show notification on macOS using osascript (fire-and-forget)
    #[cfg(all(target_os = "macos", not(test)))]
    fn show_macos_notification(&self, title: &str, message: &str) {
        let script = format!(
            "display notification \"{}\" with title \"{}\"",
            message.replace('\"', "\\\"").replace('\n', " "),
            title.replace('\"', "\\\""),
        );
        let _ = std::process::Command::new("osascript")
            .arg("-e")
            .arg(&script)
            .spawn();
    }

    #[cfg(not(test))]
    fn show(&self, summary: &str, body: &str) {
        if !self.enabled.load(Ordering::Relaxed) {
            return;
        }

        #[cfg(target_os = "macos")]
        {
            self.show_macos_notification(summary, body);
        }

        #[cfg(target_os = "linux")]
        {
            let mut notification = Notification::new();
            notification.summary(summary);
            notification.body(body);
            notification.timeout(Timeout::Milliseconds(self.timeout_seconds * 1000));

            if let Err(e) = notification.show() {
                tracing::debug!("Desktop notification failed: {e}");
            }
        }

        #[cfg(not(any(target_os = "macos", target_os = "linux")))]
        {
            tracing::debug!("{summary}: {body}");
        }
    }

    #[cfg(test)]
    fn show(&self, _summary: &str, _body: &str) {}

    /// Notify that a session container is up and serving
    pub fn notify_session_ready(&self, container_name: &str, url: &str) {
        self.show(
            "Session ready",
            &format!("Session '{container_name}' is available at {url}"),
        );
    }

    /// Notify that a session was stopped, with an optional follow-up note
    pub fn notify_session_stopped(&self, container_name: &str, message: Option<&str>) {
        let body = format!(
            "Session '{container_name}' stopped{}",
            message.map(|m| format!(": {m}")).unwrap_or_default()
        );
        self.show("Session stopped", &body);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

/// Create a notification client based on the environment
pub fn create_notification_client() -> Arc<NotificationClient> {
    Arc::new(NotificationClient::new(5, true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_use_notification_client() {
        let client = create_notification_client();
        client.notify_session_ready("modelA_alice", "http://localhost:8787");
        client.notify_session_stopped("modelA_alice", Some("changes committed"));
    }

    #[test]
    fn test_notification_client_toggle() {
        let client = NotificationClient::new(5, false);
        assert!(!client.enabled.load(Ordering::Relaxed));

        client.set_enabled(true);
        assert!(client.enabled.load(Ordering::Relaxed));
    }
}
