/// Boundary to the host notification system, used when a long-running reply
/// finishes while the user is looking elsewhere.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, body: &str);
}

pub const COMPLETION_TITLE: &str = "AI reply ready";
const PREVIEW_MAX_CHARS: usize = 100;

/// Truncated preview of the final assistant text, suitable for a
/// notification body.
pub fn preview(text: &str) -> String {
    let clipped: String = text.chars().take(PREVIEW_MAX_CHARS).collect();
    if clipped.chars().count() < text.chars().count() {
        format!("{clipped}...")
    } else {
        clipped
    }
}

/// Fallback sink: routes notifications to the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, body: &str) {
        tracing::info!(title, body, "notification");
    }
}

#[cfg(feature = "desktop-notifications")]
pub struct DesktopNotifier;

#[cfg(feature = "desktop-notifications")]
impl Notifier for DesktopNotifier {
    fn notify(&self, title: &str, body: &str) {
        if let Err(error) = notify_rust::Notification::new()
            .summary(title)
            .body(body)
            .show()
        {
            tracing::error!(%error, "desktop notification failed");
        }
    }
}
