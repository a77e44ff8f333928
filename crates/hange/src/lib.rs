//! Session core for the Tallyup client.
//!
//! This crate provides:
//! - Structural decoding of access tokens for identity and expiry
//! - Bearer (native) and cookie (web) session custody behind [`TokenCarrier`]
//! - An explicit FSM for the session lifecycle
//! - [`Session`]: restoration, sign-in, single-flight refresh,
//!   authenticated requests with one retry on 401, and sign-out

mod carrier;
mod error;
mod http;
mod session;
mod session_fsm;
pub mod token_codec;
mod user;

pub use carrier::{
    carrier_for_platform, BearerTokenCarrier, CarrierContext, CookieSessionCarrier, Grant,
    RefreshedSession, Restored, RetryDecision, TokenCarrier,
};
pub use error::{AuthError, AuthErrorKind, AuthResult, LastError};
pub use http::{
    BackendEndpoints, HttpBody, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport,
};
pub use session::{Clock, RefreshOutcome, Session, SessionEvent, SessionSnapshot};
pub use session_fsm::session_machine;
pub use session_fsm::{SessionInput, SessionMachine, SessionMachineState, SessionState};
pub use token_codec::{DecodeError, DecodedToken};
pub use user::AuthUser;

pub use reqwest::{Method, StatusCode};
