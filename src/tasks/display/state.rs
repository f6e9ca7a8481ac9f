//! Display-side state machine.
//!
//! Pure: every input returns the actions the caller has to carry out, so the task loop
//! stays a thin driver and the transitions can be tested without channels or timers.

use crate::error::{ErrorReport, FailureStage};
use crate::events::{ImageDescriptor, ImageSource};

#[derive(Debug, Clone, PartialEq)]
pub enum DisplayState {
    Loading,
    Displaying(ImageDescriptor),
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DisplayAction {
    /// Load this source and report back through `on_load_success`/`on_load_failure`.
    Load(ImageSource),
    /// Ask the helper for the photo after the one with this id.
    RequestNext(String),
    /// Start the slide timer for the photo on screen.
    ArmAdvance,
    DisarmAdvance,
}

#[derive(Debug)]
pub struct DisplayStateMachine {
    state: DisplayState,
    max_retries: u32,
    retry_count: u32,
    /// Retries for the current photo are used up and `RequestNext` went out.
    exhausted: bool,
    /// Photo the helper moved to without producing an image.
    helper_position: Option<String>,
}

impl DisplayStateMachine {
    pub fn new(max_retries: u32) -> Self {
        Self {
            state: DisplayState::Loading,
            max_retries,
            retry_count: 0,
            exhausted: false,
            helper_position: None,
        }
    }

    pub fn state(&self) -> &DisplayState {
        &self.state
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn current_photo_id(&self) -> Option<&str> {
        match &self.state {
            DisplayState::Displaying(descriptor) => Some(descriptor.photo_id.as_str()),
            _ => None,
        }
    }

    /// Id to name in the next `Next` request: the helper's position if it reported one,
    /// else the photo on screen.
    pub fn advance_after(&self) -> Option<&str> {
        self.helper_position
            .as_deref()
            .or_else(|| self.current_photo_id())
    }

    /// A config went out and a fetch is underway.
    pub fn on_fetch_requested(&mut self) {
        if matches!(self.state, DisplayState::Error(_)) {
            self.state = DisplayState::Loading;
        }
    }

    pub fn on_image_ready(&mut self, descriptor: ImageDescriptor) -> Vec<DisplayAction> {
        let load = DisplayAction::Load(descriptor.source.clone());
        self.state = DisplayState::Displaying(descriptor);
        self.retry_count = 0;
        self.exhausted = false;
        self.helper_position = None;
        vec![DisplayAction::DisarmAdvance, load]
    }

    pub fn on_load_success(&mut self) -> Vec<DisplayAction> {
        if !matches!(self.state, DisplayState::Displaying(_)) {
            return Vec::new();
        }
        self.retry_count = 0;
        self.exhausted = false;
        vec![DisplayAction::ArmAdvance]
    }

    pub fn on_load_failure(&mut self) -> Vec<DisplayAction> {
        let DisplayState::Displaying(descriptor) = &self.state else {
            return Vec::new();
        };
        if self.exhausted {
            return Vec::new();
        }
        if self.retry_count < self.max_retries {
            self.retry_count += 1;
            return vec![DisplayAction::Load(descriptor.fallback.clone())];
        }
        self.exhausted = true;
        vec![DisplayAction::RequestNext(descriptor.photo_id.clone())]
    }

    pub fn on_error(&mut self, report: &ErrorReport) -> Vec<DisplayAction> {
        if report.stage == FailureStage::Resolve
            && matches!(self.state, DisplayState::Displaying(_))
        {
            // The album is fine; keep the current photo and try the next one later.
            if let Some(id) = &report.photo_id {
                self.helper_position = Some(id.clone());
            }
            return vec![DisplayAction::ArmAdvance];
        }
        self.state = DisplayState::Error(report.message.clone());
        self.retry_count = 0;
        self.exhausted = false;
        self.helper_position = None;
        vec![DisplayAction::DisarmAdvance]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn descriptor(id: &str) -> ImageDescriptor {
        ImageDescriptor {
            photo_id: id.to_string(),
            file_hash: format!("hash-{id}"),
            title: "Untitled".to_string(),
            taken_at: None,
            source: ImageSource::Remote {
                url: format!("http://frame/t/{id}"),
            },
            fallback: ImageSource::Remote {
                url: format!("http://frame/dl/{id}"),
            },
        }
    }

    #[test]
    fn image_ready_loads_primary_source() {
        let mut sm = DisplayStateMachine::new(2);
        assert_eq!(sm.state(), &DisplayState::Loading);
        let actions = sm.on_image_ready(descriptor("a"));
        assert_eq!(
            actions,
            vec![
                DisplayAction::DisarmAdvance,
                DisplayAction::Load(descriptor("a").source)
            ]
        );
        assert_eq!(sm.current_photo_id(), Some("a"));
        assert_eq!(sm.on_load_success(), vec![DisplayAction::ArmAdvance]);
    }

    #[test]
    fn retries_with_fallback_then_requests_next_once() {
        let mut sm = DisplayStateMachine::new(2);
        sm.on_image_ready(descriptor("a"));
        let fallback = DisplayAction::Load(descriptor("a").fallback);

        assert_eq!(sm.on_load_failure(), vec![fallback.clone()]);
        assert_eq!(sm.retry_count(), 1);
        assert_eq!(sm.on_load_failure(), vec![fallback]);
        assert_eq!(sm.retry_count(), 2);
        assert_eq!(
            sm.on_load_failure(),
            vec![DisplayAction::RequestNext("a".to_string())]
        );
        assert!(sm.on_load_failure().is_empty());
        assert!(sm.retry_count() <= 2);
    }

    #[test]
    fn zero_retries_skips_straight_to_next() {
        let mut sm = DisplayStateMachine::new(0);
        sm.on_image_ready(descriptor("a"));
        assert_eq!(
            sm.on_load_failure(),
            vec![DisplayAction::RequestNext("a".to_string())]
        );
    }

    #[test]
    fn new_photo_resets_retry_count() {
        let mut sm = DisplayStateMachine::new(2);
        sm.on_image_ready(descriptor("a"));
        sm.on_load_failure();
        sm.on_load_failure();
        sm.on_load_failure();
        sm.on_image_ready(descriptor("b"));
        assert_eq!(sm.retry_count(), 0);
        assert_eq!(
            sm.on_load_failure(),
            vec![DisplayAction::Load(descriptor("b").fallback)]
        );
    }

    #[test]
    fn success_after_fallback_resets_retries() {
        let mut sm = DisplayStateMachine::new(3);
        sm.on_image_ready(descriptor("a"));
        sm.on_load_failure();
        sm.on_load_success();
        assert_eq!(sm.retry_count(), 0);
    }

    #[test]
    fn sync_error_replaces_state() {
        let mut sm = DisplayStateMachine::new(2);
        sm.on_image_ready(descriptor("a"));
        let report = ErrorReport::new(ErrorKind::Remote, FailureStage::Sync, "Invalid response from server");
        assert_eq!(sm.on_error(&report), vec![DisplayAction::DisarmAdvance]);
        assert_eq!(
            sm.state(),
            &DisplayState::Error("Invalid response from server".to_string())
        );
        assert!(sm.on_load_failure().is_empty());

        sm.on_fetch_requested();
        assert_eq!(sm.state(), &DisplayState::Loading);
        sm.on_image_ready(descriptor("b"));
        assert_eq!(sm.current_photo_id(), Some("b"));
    }

    #[test]
    fn resolve_error_keeps_current_photo() {
        let mut sm = DisplayStateMachine::new(2);
        sm.on_image_ready(descriptor("a"));
        sm.on_load_success();
        let report = ErrorReport::new(ErrorKind::ContentType, FailureStage::Resolve, "Failed to prepare image");
        assert_eq!(sm.on_error(&report), vec![DisplayAction::ArmAdvance]);
        assert_eq!(sm.current_photo_id(), Some("a"));
        assert_eq!(sm.advance_after(), Some("a"));
    }

    #[test]
    fn next_names_helper_position_after_resolve_failure() {
        let mut sm = DisplayStateMachine::new(2);
        sm.on_image_ready(descriptor("a"));
        sm.on_load_success();
        let report = ErrorReport::new(ErrorKind::ContentType, FailureStage::Resolve, "Failed to prepare image")
            .for_photo("c");
        sm.on_error(&report);
        assert_eq!(sm.current_photo_id(), Some("a"));
        assert_eq!(sm.advance_after(), Some("c"));

        sm.on_image_ready(descriptor("d"));
        assert_eq!(sm.advance_after(), Some("d"));
    }

    #[test]
    fn resolve_error_without_photo_is_shown() {
        let mut sm = DisplayStateMachine::new(2);
        let report = ErrorReport::new(ErrorKind::Remote, FailureStage::Resolve, "Failed to prepare image");
        sm.on_error(&report);
        assert!(matches!(sm.state(), DisplayState::Error(_)));
    }
}
