use log::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    /// Status-bar style message that clears itself.
    Transient,
    /// Best-effort modal; hosts without dialogs may show it as a transient message.
    Dialog,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusNotice {
    pub kind: NoticeKind,
    pub title: String,
    pub message: String,
}

impl StatusNotice {
    pub fn transient(message: impl Into<String>) -> Self {
        Self { kind: NoticeKind::Transient, title: String::new(), message: message.into() }
    }

    pub fn dialog(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self { kind: NoticeKind::Dialog, title: title.into(), message: message.into() }
    }
}

/// User-facing surface for bridge failures.
pub trait StatusSink {
    fn notify(&mut self, notice: StatusNotice);
}

#[derive(Debug, Default)]
pub struct LogStatusSink;

impl StatusSink for LogStatusSink {
    fn notify(&mut self, notice: StatusNotice) {
        match notice.kind {
            NoticeKind::Transient => warn!("[status] {}", notice.message),
            NoticeKind::Dialog => error!("[status] {}: {}", notice.title, notice.message),
        }
    }
}

/// Keeps the latest notices, newest last.
#[derive(Debug, Default)]
pub struct StatusHistory {
    notices: Vec<StatusNotice>,
}

impl StatusHistory {
    pub fn notices(&self) -> &[StatusNotice] {
        &self.notices
    }

    pub fn latest(&self) -> Option<&StatusNotice> {
        self.notices.last()
    }
}

impl StatusSink for StatusHistory {
    fn notify(&mut self, notice: StatusNotice) {
        if self.notices.len() >= 32 {
            self.notices.remove(0);
        }
        self.notices.push(notice);
    }
}

impl<T: StatusSink + ?Sized> StatusSink for std::rc::Rc<std::cell::RefCell<T>> {
    fn notify(&mut self, notice: StatusNotice) {
        self.borrow_mut().notify(notice);
    }
}
