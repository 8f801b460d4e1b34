use std::future::Future;

use noraids_core::ErrorDump;

/// Something to tell a chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Text(String),
    Html(String),
    Dump(ErrorDump),
}

/// Outbound side of the bot: reports outcomes to spaces and the log chat.
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, chat_id: i64, notice: Notice)
    -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Render an error for the log chat: the full debug structure, sized into
/// an inline message or an attachment.
pub fn error_dump(err: &dyn std::fmt::Debug) -> Notice {
    Notice::Dump(ErrorDump::new(format!("{err:#?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use noraids_core::INLINE_TEXT_LIMIT;

    #[derive(Debug)]
    #[allow(dead_code)]
    struct Big {
        payload: String,
    }

    #[test]
    fn test_error_dump_is_structural() {
        let notice = error_dump(&Big {
            payload: "boom".into(),
        });
        let Notice::Dump(ErrorDump::Inline(text)) = notice else {
            panic!("small dumps go inline");
        };
        assert!(text.contains("Big {"));
        assert!(text.contains("payload: \"boom\""));
    }

    #[test]
    fn test_large_error_dump_becomes_attachment() {
        let notice = error_dump(&Big {
            payload: "x".repeat(INLINE_TEXT_LIMIT),
        });
        assert!(matches!(notice, Notice::Dump(ErrorDump::Attachment(_))));
    }
}
