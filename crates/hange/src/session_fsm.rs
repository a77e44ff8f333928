//! Session lifecycle state machine using rust-fsm.
//!
//! ## State Diagram
//!
//! ```text
//! Uninitialized ──RestoreStarted──► Restoring ──NoSession──► Anonymous
//!                                      │                        │
//!                                      │ TokenAdopted           │ LoginAttempt
//!                                      ▼                        ▼
//!   Refreshing ◄──RefreshStarted── Authenticated ◄─LoginSuccess─ SigningIn
//!      │  RefreshSuccess / RefreshInterrupted ▲                 │ LoginFailed
//!      └──────────────────────────────────────┘                 ▼
//!      │ RefreshFailed ─────────────────────────────────────► Anonymous
//!
//!   any state ──SignOutRequested──► SignedOut ──LoginAttempt──► SigningIn
//! ```

use rust_fsm::*;
use serde::{Deserialize, Serialize};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub session_machine(Uninitialized)

    Uninitialized => {
        RestoreStarted => Restoring,
        LoginAttempt => SigningIn,
        RefreshStarted => Refreshing,
        SignOutRequested => SignedOut
    },
    Restoring => {
        // Live token or web session found in custody
        TokenAdopted => Authenticated,
        // Expired or missing access token, refresh credential present
        RefreshStarted => Refreshing,
        NoSession => Anonymous,
        SignOutRequested => SignedOut
    },
    Anonymous => {
        LoginAttempt => SigningIn,
        RefreshStarted => Refreshing,
        SignOutRequested => SignedOut
    },
    SigningIn => {
        LoginSuccess => Authenticated,
        LoginFailed => Anonymous,
        // Cancelled or failed while an earlier session is still held
        LoginAbandoned => Authenticated,
        SignOutRequested => SignedOut
    },
    Authenticated => {
        RefreshStarted => Refreshing,
        LoginAttempt => SigningIn,
        SignOutRequested => SignedOut
    },
    Refreshing => {
        RefreshSuccess => Authenticated,
        // Network failure with a user still held
        RefreshInterrupted => Authenticated,
        // Network failure with no user to fall back to
        RefreshFailed => Anonymous,
        LoginAttempt => SigningIn,
        SignOutRequested => SignedOut
    },
    SignedOut => {
        LoginAttempt => SigningIn,
        RefreshStarted => Refreshing,
        SignOutRequested => SignedOut
    }
}

pub use session_machine::Input as SessionInput;
pub use session_machine::State as SessionMachineState;
pub use session_machine::StateMachine as SessionMachine;

/// Public view of the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Restoration has not started.
    Uninitialized,
    /// Reading custody at startup.
    Restoring,
    /// No user.
    Anonymous,
    /// Authorization prompt or code exchange in progress.
    SigningIn,
    /// A user and credentials are held.
    Authenticated,
    /// A refresh round trip is in flight.
    Refreshing,
    /// Signed out explicitly or after a rejected refresh.
    SignedOut,
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated)
    }

    /// Returns true while an auth operation is in flight.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SessionState::Restoring | SessionState::SigningIn | SessionState::Refreshing
        )
    }
}

impl From<&SessionMachineState> for SessionState {
    fn from(state: &SessionMachineState) -> Self {
        match state {
            SessionMachineState::Uninitialized => SessionState::Uninitialized,
            SessionMachineState::Restoring => SessionState::Restoring,
            SessionMachineState::Anonymous => SessionState::Anonymous,
            SessionMachineState::SigningIn => SessionState::SigningIn,
            SessionMachineState::Authenticated => SessionState::Authenticated,
            SessionMachineState::Refreshing => SessionState::Refreshing,
            SessionMachineState::SignedOut => SessionState::SignedOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine_in(inputs: &[SessionInput]) -> SessionMachine {
        let mut machine = SessionMachine::new();
        for input in inputs {
            machine.consume(input).unwrap();
        }
        machine
    }

    #[test]
    fn test_initial_state_is_uninitialized() {
        let machine = SessionMachine::new();
        assert_eq!(*machine.state(), SessionMachineState::Uninitialized);
    }

    #[test]
    fn test_restore_adopts_stored_token() {
        let machine = machine_in(&[SessionInput::RestoreStarted, SessionInput::TokenAdopted]);
        assert_eq!(*machine.state(), SessionMachineState::Authenticated);
    }

    #[test]
    fn test_restore_without_session_is_anonymous() {
        let machine = machine_in(&[SessionInput::RestoreStarted, SessionInput::NoSession]);
        assert_eq!(*machine.state(), SessionMachineState::Anonymous);
    }

    #[test]
    fn test_restore_through_refresh() {
        let machine = machine_in(&[
            SessionInput::RestoreStarted,
            SessionInput::RefreshStarted,
            SessionInput::RefreshSuccess,
        ]);
        assert_eq!(*machine.state(), SessionMachineState::Authenticated);
    }

    #[test]
    fn test_interrupted_refresh_keeps_session() {
        let machine = machine_in(&[
            SessionInput::RestoreStarted,
            SessionInput::TokenAdopted,
            SessionInput::RefreshStarted,
            SessionInput::RefreshInterrupted,
        ]);
        assert_eq!(*machine.state(), SessionMachineState::Authenticated);
    }

    #[test]
    fn test_login_flow() {
        let mut machine = machine_in(&[SessionInput::RestoreStarted, SessionInput::NoSession]);

        machine.consume(&SessionInput::LoginAttempt).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::SigningIn);

        machine.consume(&SessionInput::LoginSuccess).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::Authenticated);
    }

    #[test]
    fn test_login_failure_returns_to_anonymous() {
        let machine = machine_in(&[SessionInput::LoginAttempt, SessionInput::LoginFailed]);
        assert_eq!(*machine.state(), SessionMachineState::Anonymous);
    }

    #[test]
    fn test_sign_out_wins_over_refresh() {
        let mut machine = machine_in(&[
            SessionInput::RestoreStarted,
            SessionInput::TokenAdopted,
            SessionInput::RefreshStarted,
            SessionInput::SignOutRequested,
        ]);
        assert_eq!(*machine.state(), SessionMachineState::SignedOut);

        // The late refresh result has nowhere to land.
        assert!(machine.consume(&SessionInput::RefreshSuccess).is_err());
        assert_eq!(*machine.state(), SessionMachineState::SignedOut);
    }

    #[test]
    fn test_signed_out_can_sign_in_again() {
        let machine = machine_in(&[
            SessionInput::SignOutRequested,
            SessionInput::LoginAttempt,
            SessionInput::LoginSuccess,
        ]);
        assert_eq!(*machine.state(), SessionMachineState::Authenticated);
    }

    #[test]
    fn test_invalid_transition_returns_error() {
        let mut machine = SessionMachine::new();

        assert!(machine.consume(&SessionInput::LoginSuccess).is_err());
        assert!(machine.consume(&SessionInput::RefreshSuccess).is_err());
        assert_eq!(*machine.state(), SessionMachineState::Uninitialized);
    }

    #[test]
    fn test_session_state_conversion() {
        assert_eq!(
            SessionState::from(&SessionMachineState::Restoring),
            SessionState::Restoring
        );
        assert_eq!(
            SessionState::from(&SessionMachineState::Authenticated),
            SessionState::Authenticated
        );
        assert_eq!(
            SessionState::from(&SessionMachineState::SignedOut),
            SessionState::SignedOut
        );
    }

    #[test]
    fn test_session_state_flags() {
        assert!(SessionState::Authenticated.is_authenticated());
        assert!(!SessionState::Refreshing.is_authenticated());
        assert!(SessionState::Restoring.is_transient());
        assert!(SessionState::SigningIn.is_transient());
        assert!(SessionState::Refreshing.is_transient());
        assert!(!SessionState::Anonymous.is_transient());
        assert!(!SessionState::SignedOut.is_transient());
    }
}
