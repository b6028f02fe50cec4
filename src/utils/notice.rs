use std::fmt;

/// Severity of a user-facing notice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NoticeLevel {
    Error,
    Success,
    Info,
}

impl NoticeLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoticeLevel::Error => "ERROR",
            NoticeLevel::Success => "OK",
            NoticeLevel::Info => "INFO",
        }
    }

    fn icon(&self) -> &'static str {
        match self {
            NoticeLevel::Error => "❌",
            NoticeLevel::Success => "✅",
            NoticeLevel::Info => "💡",
        }
    }
}

/// A transient message for the user, shown once at the point of the action
/// that produced it.
#[derive(Debug, Clone)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Notice {
    pub fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Notice {
            level,
            message: message.into(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn error(err: &anyhow::Error) -> Self {
        Notice::new(NoticeLevel::Error, format!("Error: {}", readable_error(err)))
    }

    pub fn success(message: impl Into<String>) -> Self {
        Notice::new(NoticeLevel::Success, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Notice::new(NoticeLevel::Info, message)
    }

    pub fn show(&self) {
        match self.level {
            NoticeLevel::Error => eprintln!("{}", self),
            _ => println!("{}", self),
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.level.icon(), self.message)
    }
}

/// The full error chain on one line, outermost first.
pub fn readable_error(err: &anyhow::Error) -> String {
    err.chain()
        .map(|cause| cause.to_string())
        .collect::<Vec<_>>()
        .join(": ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_error_notice_includes_cause_chain() {
        let err = Err::<(), _>(anyhow::anyhow!("relay unreachable"))
            .context("Request znn_info failed")
            .unwrap_err();
        let notice = Notice::error(&err);

        assert_eq!(notice.level, NoticeLevel::Error);
        assert_eq!(notice.message, "Error: Request znn_info failed: relay unreachable");
    }

    #[test]
    fn test_display_prefixes_icon() {
        let notice = Notice::success("Sent!");
        assert_eq!(notice.to_string(), "✅ Sent!");
        assert_eq!(notice.level.as_str(), "OK");
    }
}
