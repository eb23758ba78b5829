//! Two-phase fetch state machine.
//!
//! ```text
//! Init ──(referer given)──▶ FetchWithReferer ──(401/403)──▶ FetchWithoutReferer ──▶ Done
//!   │                              │                                ▲
//!   │                              └──(any other status)──▶ Done    │
//!   └──(no referer)─────────────────────────────────────────────────┘
//! ```
//!
//! Transitions are pure; the fetcher drives them with the status of each
//! completed attempt.

use axum::http::StatusCode;

/// Statuses an origin uses to refuse hot-linked requests.
pub const HOTLINK_DENIAL_STATUSES: [StatusCode; 2] = [StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN];

/// Returns true if `status` signals a referer-based refusal.
pub fn is_hotlink_denial(status: StatusCode) -> bool {
    HOTLINK_DENIAL_STATUSES.contains(&status)
}

/// Phase of an upstream fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    /// Nothing issued yet.
    Init,
    /// Attempt carrying the client's page as `Referer`.
    FetchWithReferer,
    /// Attempt with no `Referer`; never followed by another attempt.
    FetchWithoutReferer,
    /// The last attempt's response is final.
    Done,
}

/// Input driving a [`FetchState`] transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchEvent {
    /// The fetch begins.
    Start { has_referer: bool },
    /// The current attempt produced a response.
    Responded(StatusCode),
}

impl FetchState {
    /// Compute the next state.
    pub fn next(self, event: FetchEvent) -> FetchState {
        match (self, event) {
            (FetchState::Init, FetchEvent::Start { has_referer: true }) => FetchState::FetchWithReferer,
            (FetchState::Init, FetchEvent::Start { has_referer: false }) => FetchState::FetchWithoutReferer,
            (FetchState::FetchWithReferer, FetchEvent::Responded(status)) if is_hotlink_denial(status) => {
                FetchState::FetchWithoutReferer
            }
            (FetchState::FetchWithReferer, FetchEvent::Responded(_))
            | (FetchState::FetchWithoutReferer, FetchEvent::Responded(_)) => FetchState::Done,
            (state, _) => state,
        }
    }

    /// Whether an attempt in this state sends `Referer`.
    pub fn sends_referer(self) -> bool {
        self == FetchState::FetchWithReferer
    }

    /// Metric label for the attempt issued in this state.
    pub fn label(self) -> &'static str {
        match self {
            FetchState::Init => "init",
            FetchState::FetchWithReferer => "with_referer",
            FetchState::FetchWithoutReferer => "without_referer",
            FetchState::Done => "done",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_depends_on_referer() {
        assert_eq!(
            FetchState::Init.next(FetchEvent::Start { has_referer: true }),
            FetchState::FetchWithReferer
        );
        assert_eq!(
            FetchState::Init.next(FetchEvent::Start { has_referer: false }),
            FetchState::FetchWithoutReferer
        );
    }

    #[test]
    fn test_denial_falls_back_once() {
        let state = FetchState::FetchWithReferer.next(FetchEvent::Responded(StatusCode::FORBIDDEN));
        assert_eq!(state, FetchState::FetchWithoutReferer);
        assert!(!state.sends_referer());

        let state = state.next(FetchEvent::Responded(StatusCode::FORBIDDEN));
        assert_eq!(state, FetchState::Done);

        let state = FetchState::FetchWithReferer.next(FetchEvent::Responded(StatusCode::UNAUTHORIZED));
        assert_eq!(state, FetchState::FetchWithoutReferer);
    }

    #[test]
    fn test_other_statuses_finish() {
        for status in [StatusCode::OK, StatusCode::NOT_MODIFIED, StatusCode::NOT_FOUND, StatusCode::BAD_GATEWAY] {
            assert_eq!(FetchState::FetchWithReferer.next(FetchEvent::Responded(status)), FetchState::Done);
        }
    }

    #[test]
    fn test_done_is_terminal() {
        assert_eq!(FetchState::Done.next(FetchEvent::Responded(StatusCode::FORBIDDEN)), FetchState::Done);
        assert_eq!(FetchState::Done.next(FetchEvent::Start { has_referer: true }), FetchState::Done);
    }
}
