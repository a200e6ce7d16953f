//! Queue operation names shared with the backend.

use crate::entity::EntityKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Every job class the adapter can enqueue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    CreateUser,
    UpdateUser,
    DeleteUser,
    CreateSession,
    UpdateSession,
    DeleteSession,
    CreateVerificationRequest,
    UseVerificationRequest,
    LinkAccount,
    UnlinkAccount,

    GetUser,
    GetUserByEmail,
    GetUserByAccount,
    GetSessionAndUser,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::CreateUser => "CREATE_USER",
            Operation::UpdateUser => "UPDATE_USER",
            Operation::DeleteUser => "DELETE_USER",
            Operation::CreateSession => "CREATE_SESSION",
            Operation::UpdateSession => "UPDATE_SESSION",
            Operation::DeleteSession => "DELETE_SESSION",
            Operation::CreateVerificationRequest => "CREATE_VERIFICATION_REQUEST",
            Operation::UseVerificationRequest => "USE_VERIFICATION_REQUEST",
            Operation::LinkAccount => "LINK_ACCOUNT",
            Operation::UnlinkAccount => "UNLINK_ACCOUNT",
            Operation::GetUser => "GET_USER",
            Operation::GetUserByEmail => "GET_USER_BY_EMAIL",
            Operation::GetUserByAccount => "GET_USER_BY_ACCOUNT",
            Operation::GetSessionAndUser => "GET_SESSION_AND_USER",
        }
    }

    /// Entity whose settings (persistence, cache, TTL, queue) govern the job.
    pub fn entity(&self) -> EntityKind {
        match self {
            Operation::CreateUser
            | Operation::UpdateUser
            | Operation::DeleteUser
            | Operation::GetUser
            | Operation::GetUserByEmail => EntityKind::User,
            Operation::CreateSession
            | Operation::UpdateSession
            | Operation::DeleteSession
            | Operation::GetSessionAndUser => EntityKind::Session,
            Operation::LinkAccount | Operation::UnlinkAccount | Operation::GetUserByAccount => {
                EntityKind::Account
            }
            Operation::CreateVerificationRequest | Operation::UseVerificationRequest => {
                EntityKind::VerificationRequest
            }
        }
    }

    /// Read jobs are answered through the cache, not the queue.
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            Operation::GetUser
                | Operation::GetUserByEmail
                | Operation::GetUserByAccount
                | Operation::GetSessionAndUser
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
