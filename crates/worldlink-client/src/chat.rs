//! Bounded chat history.

use std::collections::VecDeque;

/// Channel used when a chat record names none.
pub const DEFAULT_CHANNEL: &str = "global";

/// Who a chat line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    /// From the server.
    Received,
    /// Sent by this client.
    Sent,
    /// Produced locally: connection status, server errors.
    System,
}

/// One chat line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    pub kind: ChatKind,
    pub channel: String,
    pub content: String,
}

impl ChatLine {
    pub fn new(kind: ChatKind, channel: Option<String>, content: impl Into<String>) -> Self {
        Self {
            kind,
            channel: channel.unwrap_or_else(|| DEFAULT_CHANNEL.to_string()),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatKind::System, None, content)
    }
}

/// Chat history that drops its oldest lines past `limit`.
#[derive(Debug, Clone)]
pub struct ChatLog {
    lines: VecDeque<ChatLine>,
    limit: usize,
}

impl ChatLog {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(limit.min(64)),
            limit,
        }
    }

    /// Append a line, evicting from the front while over the limit.
    pub fn push(&mut self, line: ChatLine) {
        if self.limit == 0 {
            return;
        }
        while self.lines.len() >= self.limit {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    /// Lines oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &ChatLine> {
        self.lines.iter()
    }

    /// Lines on `channel`, oldest first.
    pub fn channel<'a>(&'a self, channel: &'a str) -> impl Iterator<Item = &'a ChatLine> {
        self.lines.iter().filter(move |line| line.channel == channel)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    #[must_use]
    pub fn last(&self) -> Option<&ChatLine> {
        self.lines.back()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oldest_lines_evicted() {
        let mut log = ChatLog::new(3);
        for n in 0..5 {
            log.push(ChatLine::new(ChatKind::Received, None, format!("line {n}")));
        }
        let contents: Vec<_> = log.iter().map(|l| l.content.as_str()).collect();
        assert_eq!(contents, ["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn test_default_channel_and_filter() {
        let mut log = ChatLog::new(10);
        log.push(ChatLine::new(ChatKind::Received, None, "hello"));
        log.push(ChatLine::new(ChatKind::Sent, Some("trade".into()), "wts sword"));
        log.push(ChatLine::system("disconnected"));

        assert_eq!(log.channel("global").count(), 2);
        assert_eq!(log.channel("trade").next().unwrap().content, "wts sword");
        assert_eq!(log.last().unwrap().kind, ChatKind::System);
    }

    #[test]
    fn test_zero_limit_keeps_nothing() {
        let mut log = ChatLog::new(0);
        log.push(ChatLine::system("x"));
        assert!(log.is_empty());
    }
}
